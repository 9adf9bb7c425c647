//! Shared fixtures for engine tests

use crate::adapters::{Backend, KeyPairSigner, MockChain, Signer};
use crate::config::EngineConfig;
use crate::engine::MultisigEngine;
use crate::error::EngineResult;
use crate::multisig::{ContractState, Proposal, ProposalKind};
use crate::storage::LocalBackend;
use std::sync::Arc;

pub(crate) const CONTRACT_CODE: &str = "parameter (or (unit %default) (pair %main payload sigs));";

/// An engine with a funded 2-of-3 contract and its three owners
pub(crate) struct Harness {
    pub backend: Arc<LocalBackend>,
    pub chain: Arc<MockChain>,
    pub engine: MultisigEngine,
    pub signers: Vec<KeyPairSigner>,
    pub contract: ContractState,
}

pub(crate) fn test_config() -> EngineConfig {
    EngineConfig {
        confirmation_poll_ms: 10,
        confirmation_timeout_ms: 2_000,
        ..Default::default()
    }
}

pub(crate) async fn harness() -> Harness {
    harness_full(test_config(), MockChain::new()).await
}

pub(crate) async fn harness_with(config: EngineConfig) -> Harness {
    harness_full(config, MockChain::new()).await
}

pub(crate) async fn harness_on(chain: MockChain) -> Harness {
    harness_full(test_config(), chain).await
}

pub(crate) async fn harness_full(config: EngineConfig, chain: MockChain) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();

    let backend = Arc::new(LocalBackend::in_memory(CONTRACT_CODE));
    let chain = Arc::new(chain);
    let engine = MultisigEngine::new(backend.clone(), chain.clone(), config).unwrap();

    let signers: Vec<KeyPairSigner> = (0..3).map(|_| KeyPairSigner::generate()).collect();
    let owners = signers.iter().map(|s| s.public_identity()).collect();
    let contract = engine.originate(owners, 2, 100).await.unwrap();

    Harness {
        backend,
        chain,
        engine,
        signers,
        contract,
    }
}

pub(crate) fn transfer(amount: u64) -> ProposalKind {
    ProposalKind::Transfer {
        destination: "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2".to_string(),
        amount,
    }
}

impl Harness {
    pub async fn create(&self, kind: ProposalKind) -> Proposal {
        self.engine
            .create_proposal(&self.contract.address, kind)
            .await
            .unwrap()
    }

    /// Sign with owner `index`
    pub async fn sign(&self, proposal_id: &str, index: usize) -> EngineResult<Proposal> {
        self.engine
            .sign_with(proposal_id, &self.signers[index])
            .await
    }

    /// Create a proposal and sign it with the first two owners
    pub async fn quorate(&self, kind: ProposalKind) -> Proposal {
        let proposal = self.create(kind).await;
        self.sign(&proposal.id, 0).await.unwrap();
        self.sign(&proposal.id, 1).await.unwrap()
    }

    /// Counter as the backend sees it
    pub async fn counter(&self) -> u64 {
        self.engine
            .contracts()
            .refresh(&self.contract.address)
            .await
            .unwrap()
            .counter
    }

    pub async fn stored_signatures(&self, proposal_id: &str) -> usize {
        self.backend
            .fetch_quorate_signatures(proposal_id)
            .await
            .unwrap()
            .len()
    }
}
