//! Signature collection
//!
//! Validates signatures against a proposal and its contract's owner set,
//! records them and detects quorum. A reject ballot that reaches quorum
//! vetoes its target; an approval that reaches quorum supersedes it.
//! Ballots and approvals are locked together with their target (target
//! first) so at most one track wins.

use crate::adapters::{bounded, Signer};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, StateError};
use crate::multisig::book::ContractBook;
use crate::multisig::proposal::{FailureReason, Proposal, ProposalKind, ProposalStatus};
use crate::multisig::store::ProposalStore;
use std::sync::Arc;

pub struct SignatureCoordinator {
    store: Arc<ProposalStore>,
    contracts: Arc<ContractBook>,
    config: EngineConfig,
}

impl SignatureCoordinator {
    pub fn new(
        store: Arc<ProposalStore>,
        contracts: Arc<ContractBook>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            contracts,
            config,
        }
    }

    /// Record `owner`'s signature on a proposal
    ///
    /// Nothing is changed when any check fails.
    pub async fn submit_signature(
        &self,
        proposal_id: &str,
        owner: &str,
        signature: Vec<u8>,
    ) -> EngineResult<Proposal> {
        let handle = self.store.handle(proposal_id).await?;
        let kind = handle.lock().await.kind.clone();

        match kind {
            ProposalKind::Reject { target } => {
                let target = self.store.handle(&target).await?;
                let mut target = target.lock().await;
                let mut ballot = handle.lock().await;
                self.sign_ballot(&mut ballot, &mut target, owner, signature)
                    .await
            }
            ProposalKind::Approve { target } => {
                let target = self.store.handle(&target).await?;
                let mut target = target.lock().await;
                let mut approval = handle.lock().await;
                self.sign_approval(&mut approval, &mut target, owner, signature)
                    .await
            }
            ProposalKind::Transfer { .. } => {
                let mut proposal = handle.lock().await;
                let (next, _) = self.signed(&mut proposal, owner, signature).await?;
                self.record(&mut proposal, next, owner).await?;
                Ok(proposal.clone())
            }
        }
    }

    /// Sign a proposal's digest with `signer` and record the result
    pub async fn sign_with(
        &self,
        proposal_id: &str,
        signer: &dyn Signer,
    ) -> EngineResult<Proposal> {
        let digest = self.signing_digest(proposal_id).await?;
        let signature = bounded(self.config.call_timeout(), "sign payload", async {
            signer.sign(&digest).await.map_err(EngineError::from)
        })
        .await?;

        let identity = signer.public_identity();
        self.submit_signature(proposal_id, &identity.address, signature)
            .await
    }

    /// The digest owners sign for a proposal
    pub async fn signing_digest(&self, proposal_id: &str) -> EngineResult<Vec<u8>> {
        Ok(self.store.get(proposal_id).await?.signing_digest())
    }

    async fn sign_ballot(
        &self,
        ballot: &mut Proposal,
        target: &mut Proposal,
        owner: &str,
        signature: Vec<u8>,
    ) -> EngineResult<Proposal> {
        self.ensure_open(ballot).await?;
        self.ensure_open(target).await?;

        let (next, reached) = self.signed(ballot, owner, signature).await?;
        if !reached {
            self.record(ballot, next, owner).await?;
            return Ok(ballot.clone());
        }

        let mut vetoed = target.clone();
        vetoed.fail(FailureReason::Vetoed {
            by: ballot.id.clone(),
        })?;
        self.store.persist(&vetoed).await?;
        self.record(ballot, next, owner).await?;
        *target = vetoed;

        log::info!("Proposal {} vetoed by ballot {}", target.id, ballot.id);
        Ok(ballot.clone())
    }

    async fn sign_approval(
        &self,
        approval: &mut Proposal,
        target: &mut Proposal,
        owner: &str,
        signature: Vec<u8>,
    ) -> EngineResult<Proposal> {
        self.ensure_open(approval).await?;
        if target.status.is_committed() {
            return Err(StateError::AlreadySubmitted(target.id.clone()).into());
        }
        if !target.is_reapprovable() {
            return Err(StateError::Closed {
                id: target.id.clone(),
                status: target.status,
            }
            .into());
        }

        let (next, reached) = self.signed(approval, owner, signature).await?;
        if !reached || !target.status.can_transition_to(ProposalStatus::Failed) {
            self.record(approval, next, owner).await?;
            return Ok(approval.clone());
        }

        let mut superseded = target.clone();
        superseded.fail(FailureReason::Superseded {
            by: approval.id.clone(),
        })?;
        self.store.persist(&superseded).await?;
        self.record(approval, next, owner).await?;
        *target = superseded;

        log::info!("Proposal {} superseded by approval {}", target.id, approval.id);
        Ok(approval.clone())
    }

    /// Validate and apply a signature to a copy of the locked proposal
    ///
    /// Returns the updated copy and whether it just reached quorum.
    async fn signed(
        &self,
        proposal: &mut Proposal,
        owner: &str,
        signature: Vec<u8>,
    ) -> EngineResult<(Proposal, bool)> {
        self.ensure_open(proposal).await?;

        let contract = self.contracts.load(&proposal.contract).await?;
        let mut next = proposal.clone();
        let reached = next.add_signature(owner, signature, &contract)?;
        Ok((next, reached))
    }

    /// Persist the new signature and proposal, then commit in memory
    async fn record(&self, slot: &mut Proposal, next: Proposal, owner: &str) -> EngineResult<()> {
        if let Some(signature) = next.signatures.get(owner) {
            bounded(
                self.config.call_timeout(),
                "persist signature",
                self.store.backend().persist_signature(&next.id, signature),
            )
            .await?;
        }
        let reached =
            slot.status == ProposalStatus::Open && next.status == ProposalStatus::Quorate;
        self.store.commit(slot, next).await?;

        log::debug!(
            "Proposal {} signed by {} ({}/{})",
            slot.id,
            owner,
            slot.signature_count(),
            slot.threshold
        );
        if reached {
            log::info!("Proposal {} reached quorum via {}", slot.id, owner);
        }
        Ok(())
    }

    /// Fail unless the locked proposal still accepts signatures
    async fn ensure_open(&self, proposal: &mut Proposal) -> EngineResult<()> {
        self.store.expire_if_overdue(proposal).await?;

        match proposal.status {
            ProposalStatus::Open => Ok(()),
            status if status.is_committed() => {
                Err(StateError::AlreadySubmitted(proposal.id.clone()).into())
            }
            status => Err(StateError::Closed {
                id: proposal.id.clone(),
                status,
            }
            .into()),
        }
    }
}
