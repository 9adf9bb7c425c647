//! Multisig Coordinator: multi-party authorization of chain operations
//!
//! This crate coordinates M-of-N multisig contracts:
//! - Contract origination with an owner set and threshold
//! - Proposals pinned to the contract's execution counter
//! - ECDSA signature collection (secp256k1) with quorum detection
//! - Veto ballots that race approvals, first to quorum wins
//! - At-most-once submission and confirmation tracking
//! - Pluggable backend, chain and signer collaborators
//! - JSON snapshot persistence for the local backend
//!
//! # Example
//!
//! ```rust,no_run
//! use multisig_coordinator::adapters::{KeyPairSigner, MockChain, Signer};
//! use multisig_coordinator::multisig::ProposalKind;
//! use multisig_coordinator::storage::LocalBackend;
//! use multisig_coordinator::{EngineConfig, MultisigEngine};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), multisig_coordinator::EngineError> {
//! let backend = Arc::new(LocalBackend::in_memory("parameter unit;"));
//! let engine = MultisigEngine::new(backend, Arc::new(MockChain::new()), EngineConfig::default())?;
//!
//! // Originate a 2-of-3 contract
//! let signers: Vec<KeyPairSigner> = (0..3).map(|_| KeyPairSigner::generate()).collect();
//! let owners = signers.iter().map(|s| s.public_identity()).collect();
//! let contract = engine.originate(owners, 2, 100).await?;
//!
//! // Propose, sign, execute
//! let kind = ProposalKind::Transfer { destination: "1Recipient".to_string(), amount: 10 };
//! let proposal = engine.create_proposal(&contract.address, kind).await?;
//! engine.sign_with(&proposal.id, &signers[0]).await?;
//! engine.sign_with(&proposal.id, &signers[1]).await?;
//! engine.execute(&proposal.id).await?;
//!
//! let settled = engine.settle(&proposal.id).await?;
//! println!("Proposal {} is {:?}", settled.id, settled.status);
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod multisig;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use adapters::{Backend, ChainAdapter, KeyPairSigner, MockChain, Signer};
pub use config::EngineConfig;
pub use crypto::KeyPair;
pub use engine::MultisigEngine;
pub use error::{EngineError, EngineResult};
pub use multisig::{
    ContractState, Owner, Proposal, ProposalKind, ProposalStatus, Signature,
};
pub use storage::{LocalBackend, StorageConfig};
