//! Collaborator interfaces
//!
//! The engine never talks to a network directly. It calls into:
//! - a [`Backend`] that stores contracts, proposals and signatures
//! - a [`ChainAdapter`] that originates contracts and submits operations
//! - a [`Signer`] that holds key material and produces signatures
//!
//! [`MockChain`] and [`KeyPairSigner`] are in-process implementations
//! for local runs and tests; see `storage` for the backend.

pub mod backend;
pub mod chain;
pub mod mock_chain;
pub mod signer;

pub use backend::Backend;
pub use chain::{
    await_confirmation, ChainAdapter, ChainCallError, Confirmation, OriginationRequest,
    PendingOperation,
};
pub use mock_chain::MockChain;
pub use signer::{KeyPairSigner, Signer};

use crate::error::CollaboratorError;
use std::future::Future;
use std::time::Duration;

/// Run a collaborator call under a deadline
///
/// An elapsed deadline surfaces as [`CollaboratorError::Timeout`]; the
/// call's own errors pass through unchanged.
pub async fn bounded<T, E, F>(limit: Duration, what: &str, call: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<CollaboratorError>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            log::warn!("{} timed out after {:?}", what, limit);
            Err(CollaboratorError::Timeout(what.to_string()).into())
        }
    }
}
