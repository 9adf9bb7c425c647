//! Backend persistence interface
//!
//! The backend is the durable record of contracts, proposals and
//! signatures. Every write is an idempotent upsert so a failed engine call
//! can simply be repeated.

use crate::error::CollaboratorError;
use crate::multisig::{ContractState, Proposal, ProposalStatus, Signature};
use async_trait::async_trait;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Code to originate new multisig contracts with
    async fn fetch_contract_code(&self) -> Result<String, CollaboratorError>;

    /// Current owners, threshold and counter of a contract
    async fn fetch_contract_state(
        &self,
        address: &str,
    ) -> Result<Option<ContractState>, CollaboratorError>;

    async fn persist_contract_state(&self, state: &ContractState)
        -> Result<(), CollaboratorError>;

    async fn persist_proposal(&self, proposal: &Proposal) -> Result<(), CollaboratorError>;

    /// A stored proposal; its signatures come from [`Backend::fetch_quorate_signatures`]
    async fn fetch_proposal(&self, id: &str) -> Result<Option<Proposal>, CollaboratorError>;

    async fn list_proposals(
        &self,
        contract: &str,
        filter: Option<ProposalStatus>,
    ) -> Result<Vec<Proposal>, CollaboratorError>;

    async fn persist_signature(
        &self,
        proposal_id: &str,
        signature: &Signature,
    ) -> Result<(), CollaboratorError>;

    /// Every signature recorded for a proposal
    async fn fetch_quorate_signatures(
        &self,
        proposal_id: &str,
    ) -> Result<Vec<Signature>, CollaboratorError>;
}
