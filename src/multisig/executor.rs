//! Execution of quorate proposals
//!
//! `execute` re-reads the contract counter and claims a quorate proposal
//! by moving it to `Submitting` under its lock, then submits outside the
//! lock. The claim set keeps a second
//! submission of the same proposal from starting while one is in flight,
//! including re-submissions driven by `reconcile`.

use crate::adapters::{bounded, ChainAdapter, ChainCallError, Confirmation, PendingOperation};
use crate::config::EngineConfig;
use crate::error::{ChainError, EngineResult, StateError};
use crate::multisig::book::ContractBook;
use crate::multisig::proposal::{AssembledOperation, FailureReason, Proposal, ProposalStatus};
use crate::multisig::store::{ProposalHandle, ProposalStore};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Exclusive right to talk to the chain about one proposal
struct Claim<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&self.id);
        }
    }
}

pub struct ExecutionSubmitter {
    store: Arc<ProposalStore>,
    contracts: Arc<ContractBook>,
    chain: Arc<dyn ChainAdapter>,
    config: EngineConfig,
    in_flight: Mutex<HashSet<String>>,
}

impl ExecutionSubmitter {
    pub fn new(
        store: Arc<ProposalStore>,
        contracts: Arc<ContractBook>,
        chain: Arc<dyn ChainAdapter>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            contracts,
            chain,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, id: &str) -> Option<Claim<'_>> {
        let mut in_flight = self.in_flight.lock().ok()?;
        if !in_flight.insert(id.to_string()) {
            return None;
        }
        Some(Claim {
            in_flight: &self.in_flight,
            id: id.to_string(),
        })
    }

    /// Submit a quorate proposal to the chain, at most once
    ///
    /// Proposals that are already submitting, submitted or confirmed are
    /// returned as they are.
    pub async fn execute(&self, proposal_id: &str) -> EngineResult<Proposal> {
        let handle = self.store.handle(proposal_id).await?;

        let (claim, operation) = {
            let mut proposal = handle.lock().await;
            match proposal.status {
                ProposalStatus::Quorate => {}
                ProposalStatus::Open => {
                    return Err(StateError::QuorumNotReached {
                        have: proposal.signature_count(),
                        need: proposal.threshold,
                    }
                    .into())
                }
                status if status.is_committed() => return Ok(proposal.clone()),
                status => {
                    return Err(StateError::Closed {
                        id: proposal.id.clone(),
                        status,
                    }
                    .into())
                }
            }

            // The counter may only be consumed while the proposal is held
            let contract = self.contracts.refresh(&proposal.contract).await?;
            if contract.counter != proposal.target_counter() {
                log::warn!(
                    "Proposal {} targets counter {}, contract {} is at {}",
                    proposal.id,
                    proposal.target_counter(),
                    contract.address,
                    contract.counter
                );
                return Err(StateError::StaleProposal {
                    target: proposal.target_counter(),
                    current: contract.counter,
                }
                .into());
            }
            let operation = proposal.finalize()?;

            let Some(claim) = self.claim(proposal_id) else {
                return Ok(proposal.clone());
            };
            let mut next = proposal.clone();
            next.transition(ProposalStatus::Submitting)?;
            self.store.commit(&mut proposal, next).await?;
            (claim, operation)
        };

        log::info!(
            "Submitting proposal {} to {} at counter {}",
            proposal_id,
            operation.contract,
            operation.counter
        );
        let outcome = self.submit(&handle, &operation).await;
        drop(claim);
        outcome
    }

    /// Hand the assembled operation to the chain and record the answer
    ///
    /// Caller holds the claim.
    async fn submit(
        &self,
        handle: &ProposalHandle,
        operation: &AssembledOperation,
    ) -> EngineResult<Proposal> {
        let result = bounded(
            self.config.call_timeout(),
            "submit operation",
            self.chain.submit_operation(&operation.contract, operation),
        )
        .await;

        let mut proposal = handle.lock().await;
        if proposal.status != ProposalStatus::Submitting {
            return Ok(proposal.clone());
        }

        match result {
            Ok(PendingOperation { hash }) => {
                let mut next = proposal.clone();
                next.transition(ProposalStatus::Submitted)?;
                next.operation_hash = Some(hash);
                self.store.commit(&mut proposal, next).await?;
                log::info!(
                    "Proposal {} accepted by chain as {}",
                    proposal.id,
                    proposal.operation_hash.as_deref().unwrap_or_default()
                );
                Ok(proposal.clone())
            }
            Err(ChainCallError::Rejected(reason)) => {
                let mut next = proposal.clone();
                next.fail(FailureReason::SubmissionRejected {
                    message: reason.clone(),
                })?;
                self.store.commit(&mut proposal, next).await?;
                log::warn!("Chain rejected proposal {}: {}", proposal.id, reason);
                Err(ChainError::SubmissionRejected(reason).into())
            }
            Err(ChainCallError::Collaborator(e)) => {
                log::warn!(
                    "Submission of proposal {} did not complete, left submitting: {}",
                    proposal.id,
                    e
                );
                Err(e.into())
            }
        }
    }

    /// Bring a proposal up to date with the chain
    ///
    /// Terminal proposals are returned unchanged.
    pub async fn reconcile(&self, proposal_id: &str) -> EngineResult<Proposal> {
        let handle = self.store.handle(proposal_id).await?;
        let snapshot = handle.lock().await.clone();

        match snapshot.status {
            status if status.is_terminal() => Ok(snapshot),
            ProposalStatus::Open => Err(StateError::QuorumNotReached {
                have: snapshot.signature_count(),
                need: snapshot.threshold,
            }
            .into()),
            ProposalStatus::Quorate => Err(StateError::NotSubmitted(snapshot.id).into()),
            ProposalStatus::Submitting => self.resubmit(&handle, &snapshot).await,
            _ => self.poll(&handle, &snapshot).await,
        }
    }

    /// Re-drive a submission that never got an answer from the chain
    async fn resubmit(
        &self,
        handle: &ProposalHandle,
        snapshot: &Proposal,
    ) -> EngineResult<Proposal> {
        let Some(claim) = self.claim(&snapshot.id) else {
            // Someone else is already talking to the chain about it
            return Ok(snapshot.clone());
        };

        let operation = snapshot.finalize()?;
        log::info!("Re-submitting proposal {}", snapshot.id);
        let outcome = self.submit(handle, &operation).await;
        drop(claim);
        outcome
    }

    /// Poll the chain for a submitted proposal's outcome
    async fn poll(&self, handle: &ProposalHandle, snapshot: &Proposal) -> EngineResult<Proposal> {
        let hash = snapshot
            .operation_hash
            .clone()
            .ok_or_else(|| StateError::NotSubmitted(snapshot.id.clone()))?;

        let confirmation = bounded(
            self.config.call_timeout(),
            "poll confirmation",
            self.chain.confirmation(&PendingOperation { hash }),
        )
        .await
        .map_err(|e| e.into_engine(ChainError::ConfirmationFailed))?;

        match confirmation {
            Confirmation::Pending => Ok(snapshot.clone()),
            Confirmation::Confirmed { .. } => {
                self.contracts
                    .record_execution(&snapshot.contract, snapshot.target_counter())
                    .await?;

                let mut proposal = handle.lock().await;
                if proposal.status == ProposalStatus::Submitted {
                    let mut next = proposal.clone();
                    next.transition(ProposalStatus::Confirmed)?;
                    self.store.commit(&mut proposal, next).await?;
                    log::info!(
                        "Proposal {} confirmed, counter {} consumed",
                        proposal.id,
                        proposal.target_counter()
                    );
                }
                Ok(proposal.clone())
            }
            Confirmation::Failed { reason } => {
                let mut proposal = handle.lock().await;
                if proposal.status == ProposalStatus::Submitted {
                    let mut next = proposal.clone();
                    next.fail(FailureReason::ConfirmationFailed {
                        message: reason.clone(),
                    })?;
                    self.store.commit(&mut proposal, next).await?;
                    log::warn!("Proposal {} failed on chain: {}", proposal.id, reason);
                }
                Err(ChainError::ConfirmationFailed(reason).into())
            }
        }
    }

    /// Reconcile until the proposal leaves `Submitting`/`Submitted` or the
    /// confirmation timeout passes
    pub async fn settle(&self, proposal_id: &str) -> EngineResult<Proposal> {
        let deadline = tokio::time::Instant::now() + self.config.confirmation_timeout();
        loop {
            let proposal = self.reconcile(proposal_id).await?;
            if !matches!(
                proposal.status,
                ProposalStatus::Submitting | ProposalStatus::Submitted
            ) {
                return Ok(proposal);
            }
            if tokio::time::Instant::now() >= deadline {
                log::warn!("Proposal {} still {:?} at deadline", proposal.id, proposal.status);
                return Ok(proposal);
            }
            tokio::time::sleep(self.config.confirmation_poll_interval()).await;
        }
    }
}
