//! Coordination engine
//!
//! Wires the contract book, proposal store, signature coordinator and
//! execution submitter to one backend, one chain adapter and one
//! configuration.

use crate::adapters::{Backend, ChainAdapter, Signer};
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::multisig::{
    ContractBook, ContractState, ExecutionSubmitter, Owner, Proposal, ProposalKind,
    ProposalStatus, ProposalStore, SignatureCoordinator,
};
use futures::stream::BoxStream;
use std::sync::Arc;

/// The multisig coordination engine
pub struct MultisigEngine {
    config: EngineConfig,
    chain: Arc<dyn ChainAdapter>,
    contracts: Arc<ContractBook>,
    proposals: Arc<ProposalStore>,
    coordinator: SignatureCoordinator,
    executor: ExecutionSubmitter,
}

impl MultisigEngine {
    /// Create an engine over `backend` and `chain`
    pub fn new(
        backend: Arc<dyn Backend>,
        chain: Arc<dyn ChainAdapter>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        config.validate()?;

        let contracts = Arc::new(ContractBook::new(backend.clone(), config.clone()));
        let proposals = Arc::new(ProposalStore::new(
            backend,
            contracts.clone(),
            config.clone(),
        ));
        let coordinator =
            SignatureCoordinator::new(proposals.clone(), contracts.clone(), config.clone());
        let executor = ExecutionSubmitter::new(
            proposals.clone(),
            contracts.clone(),
            chain.clone(),
            config.clone(),
        );

        log::info!(
            "Multisig engine ready (proposal ttl {}s, call timeout {}ms)",
            config.proposal_ttl_secs,
            config.call_timeout_ms
        );

        Ok(Self {
            config,
            chain,
            contracts,
            proposals,
            coordinator,
            executor,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn contracts(&self) -> &ContractBook {
        &self.contracts
    }

    pub fn proposals(&self) -> &ProposalStore {
        &self.proposals
    }

    pub fn coordinator(&self) -> &SignatureCoordinator {
        &self.coordinator
    }

    pub fn executor(&self) -> &ExecutionSubmitter {
        &self.executor
    }

    // Contracts

    /// Originate a new multisig contract
    pub async fn originate(
        &self,
        owners: Vec<Owner>,
        threshold: u32,
        balance: u64,
    ) -> EngineResult<ContractState> {
        self.contracts
            .originate(self.chain.as_ref(), owners, threshold, balance)
            .await
    }

    pub async fn load_contract(&self, address: &str) -> EngineResult<ContractState> {
        self.contracts.load(address).await
    }

    pub async fn is_owner(&self, address: &str, identity: &str) -> EngineResult<bool> {
        self.contracts.is_owner(address, identity).await
    }

    pub async fn is_valid_contract(&self, address: &str) -> EngineResult<bool> {
        self.contracts.is_valid_contract(address).await
    }

    // Proposals

    pub async fn create_proposal(
        &self,
        contract: &str,
        kind: ProposalKind,
    ) -> EngineResult<Proposal> {
        self.proposals.create(contract, kind).await
    }

    pub async fn get_proposal(&self, id: &str) -> EngineResult<Proposal> {
        self.proposals.get(id).await
    }

    pub async fn list_proposals(
        &self,
        contract: &str,
        filter: Option<ProposalStatus>,
    ) -> EngineResult<BoxStream<'static, Proposal>> {
        self.proposals.list(contract, filter).await
    }

    pub async fn find_by_operation_hash(
        &self,
        contract: &str,
        operation_hash: &str,
    ) -> EngineResult<Option<Proposal>> {
        self.proposals
            .find_by_operation_hash(contract, operation_hash)
            .await
    }

    pub async fn expire_overdue(&self, contract: &str) -> EngineResult<Vec<Proposal>> {
        self.proposals.expire_overdue(contract).await
    }

    // Signatures

    pub async fn signing_digest(&self, proposal_id: &str) -> EngineResult<Vec<u8>> {
        self.coordinator.signing_digest(proposal_id).await
    }

    pub async fn submit_signature(
        &self,
        proposal_id: &str,
        owner: &str,
        signature: Vec<u8>,
    ) -> EngineResult<Proposal> {
        self.coordinator
            .submit_signature(proposal_id, owner, signature)
            .await
    }

    pub async fn sign_with(
        &self,
        proposal_id: &str,
        signer: &dyn Signer,
    ) -> EngineResult<Proposal> {
        self.coordinator.sign_with(proposal_id, signer).await
    }

    // Execution

    pub async fn execute(&self, proposal_id: &str) -> EngineResult<Proposal> {
        self.executor.execute(proposal_id).await
    }

    pub async fn reconcile(&self, proposal_id: &str) -> EngineResult<Proposal> {
        self.executor.reconcile(proposal_id).await
    }

    /// Reconcile until the proposal settles or the confirmation timeout passes
    pub async fn settle(&self, proposal_id: &str) -> EngineResult<Proposal> {
        self.executor.settle(proposal_id).await
    }
}
