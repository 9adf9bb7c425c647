//! Multisig contracts and the proposals that spend from them
//!
//! A contract holds an owner set, a threshold and an execution counter.
//! Every operation against it goes through a [`Proposal`]: owners sign the
//! proposal's payload, and once `threshold` of them have signed it can be
//! executed exactly once, consuming the counter value it was built for.
//!
//! # Example
//!
//! ```ignore
//! use multisig_coordinator::multisig::ProposalKind;
//!
//! // 2-of-3 contract, proposal pinned to the current counter
//! let proposal = store
//!     .create(&contract.address, ProposalKind::Transfer { destination, amount: 10 })
//!     .await?;
//!
//! // Collect signatures
//! coordinator.sign_with(&proposal.id, &alice).await?;
//! coordinator.sign_with(&proposal.id, &bob).await?;
//!
//! // Quorate: submit once, then follow the chain
//! executor.execute(&proposal.id).await?;
//! executor.reconcile(&proposal.id).await?;
//! ```

pub mod book;
pub mod contract;
pub mod coordinator;
pub mod executor;
pub mod proposal;
pub mod store;

pub use book::ContractBook;
pub use contract::{validate_owner_set, ContractState, InitialStorage, Owner};
pub use coordinator::SignatureCoordinator;
pub use executor::ExecutionSubmitter;
pub use proposal::{
    AssembledOperation, FailureReason, OperationAction, Payload, Proposal, ProposalKind,
    ProposalStatus, QuorumSignature, Signature, TransferAction,
};
pub use store::ProposalStore;
