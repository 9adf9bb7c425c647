//! Chain adapter interface
//!
//! Originates contracts, submits assembled operations and reports
//! confirmation. Submissions return a [`PendingOperation`] handle that can
//! be polled again later, so reconciliation survives a restart.

use crate::adapters::bounded;
use crate::config::EngineConfig;
use crate::error::{ChainError, CollaboratorError, EngineError};
use crate::multisig::{AssembledOperation, InitialStorage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

/// Errors from chain calls
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainCallError {
    /// The chain refused the operation; it will not land
    #[error("Rejected: {0}")]
    Rejected(String),
    /// The call did not complete; the outcome is unknown
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

/// Contract origination parameters
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OriginationRequest {
    pub code: String,
    pub storage: InitialStorage,
    pub balance: u64,
}

/// Handle to an operation the chain has accepted
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingOperation {
    /// Chain-assigned operation hash
    pub hash: String,
}

/// Confirmation state of a pending operation
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Confirmation {
    Pending,
    /// Finalized; originations report the new contract address
    Confirmed { contract_address: Option<String> },
    /// Permanently failed after acceptance
    Failed { reason: String },
}

#[async_trait]
pub trait ChainAdapter: Send + Sync {
    async fn originate(
        &self,
        request: &OriginationRequest,
    ) -> Result<PendingOperation, ChainCallError>;

    async fn submit_operation(
        &self,
        contract: &str,
        operation: &AssembledOperation,
    ) -> Result<PendingOperation, ChainCallError>;

    async fn confirmation(
        &self,
        pending: &PendingOperation,
    ) -> Result<Confirmation, ChainCallError>;
}

impl ChainCallError {
    /// Map to an engine error, classifying a rejection with `rejected`
    pub fn into_engine(self, rejected: fn(String) -> ChainError) -> EngineError {
        match self {
            ChainCallError::Rejected(reason) => rejected(reason).into(),
            ChainCallError::Collaborator(err) => err.into(),
        }
    }
}

/// Poll `pending` until it leaves `Pending` or the confirmation deadline passes
pub async fn await_confirmation(
    chain: &dyn ChainAdapter,
    pending: &PendingOperation,
    config: &EngineConfig,
) -> Result<Confirmation, EngineError> {
    let deadline = Instant::now() + config.confirmation_timeout();

    loop {
        let status = bounded(
            config.call_timeout(),
            "confirmation poll",
            chain.confirmation(pending),
        )
        .await
        .map_err(|e| e.into_engine(ChainError::ConfirmationFailed))?;

        if status != Confirmation::Pending {
            return Ok(status);
        }

        if Instant::now() + config.confirmation_poll_interval() > deadline {
            return Err(CollaboratorError::Timeout(format!(
                "confirmation of {}",
                pending.hash
            ))
            .into());
        }
        log::debug!("Operation {} still pending", pending.hash);
        tokio::time::sleep(config.confirmation_poll_interval()).await;
    }
}
