//! Proposal store
//!
//! Proposals keyed by id, each behind its own mutex. The id map is only
//! locked to look up or insert handles; all mutation happens under the
//! per-proposal lock. Changes are persisted to the backend before they are
//! committed in memory.

use crate::adapters::{bounded, Backend};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, StateError, ValidationError};
use crate::multisig::book::ContractBook;
use crate::multisig::proposal::{
    OperationAction, Proposal, ProposalKind, ProposalStatus, TransferAction,
};
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub(crate) type ProposalHandle = Arc<Mutex<Proposal>>;

pub struct ProposalStore {
    backend: Arc<dyn Backend>,
    contracts: Arc<ContractBook>,
    proposals: RwLock<HashMap<String, ProposalHandle>>,
    config: EngineConfig,
}

impl ProposalStore {
    pub fn new(
        backend: Arc<dyn Backend>,
        contracts: Arc<ContractBook>,
        config: EngineConfig,
    ) -> Self {
        Self {
            backend,
            contracts,
            proposals: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Create an open proposal against the contract's current counter
    pub async fn create(&self, contract: &str, kind: ProposalKind) -> EngineResult<Proposal> {
        let action = self.action_for(contract, &kind).await?;
        let state = self.contracts.refresh(contract).await?;
        let proposal = Proposal::new(&state, kind, action)?;

        self.persist(&proposal).await?;
        self.proposals.write().await.insert(
            proposal.id.clone(),
            Arc::new(Mutex::new(proposal.clone())),
        );

        log::info!(
            "Created {} proposal {} on {} at counter {}",
            proposal.kind.name(),
            proposal.id,
            proposal.contract,
            proposal.target_counter()
        );
        Ok(proposal)
    }

    /// Validate `kind` and work out what executing it would do
    async fn action_for(
        &self,
        contract: &str,
        kind: &ProposalKind,
    ) -> EngineResult<OperationAction> {
        match kind {
            ProposalKind::Transfer {
                destination,
                amount,
            } => {
                if destination.trim().is_empty() {
                    return Err(invalid("transfer destination is empty"));
                }
                if *amount == 0 {
                    return Err(invalid("transfer amount must be positive"));
                }
                Ok(OperationAction::Transfer(TransferAction {
                    destination: destination.clone(),
                    amount: *amount,
                }))
            }
            ProposalKind::Approve { target } => {
                let target = self.target_of(contract, target).await?;
                if !target.is_reapprovable() {
                    return Err(invalid(&format!(
                        "proposal {} can no longer be re-approved ({:?})",
                        target.id, target.status
                    )));
                }
                Ok(target.action)
            }
            ProposalKind::Reject { target } => {
                let target = self.target_of(contract, target).await?;
                if target.status != ProposalStatus::Open {
                    return Err(invalid(&format!(
                        "proposal {} is {:?}, only open proposals can be rejected",
                        target.id, target.status
                    )));
                }
                Ok(OperationAction::Cancel)
            }
        }
    }

    /// Look up the proposal an approve or reject acts on
    async fn target_of(&self, contract: &str, target: &str) -> EngineResult<Proposal> {
        let proposal = match self.get(target).await {
            Ok(proposal) => proposal,
            Err(EngineError::State(StateError::NotFound(_))) => {
                return Err(invalid(&format!("target proposal {} not found", target)))
            }
            Err(e) => return Err(e),
        };

        if proposal.contract != contract {
            return Err(invalid(&format!(
                "target proposal {} belongs to {}",
                target, proposal.contract
            )));
        }
        if proposal.transfer().is_none() {
            return Err(invalid(&format!(
                "target proposal {} does not carry a transfer",
                target
            )));
        }
        Ok(proposal)
    }

    /// Current state of a proposal
    pub async fn get(&self, id: &str) -> EngineResult<Proposal> {
        let handle = self.handle(id).await?;
        let proposal = handle.lock().await.clone();
        Ok(proposal)
    }

    /// Handle of a proposal, hydrating it from the backend on first access
    pub(crate) async fn handle(&self, id: &str) -> EngineResult<ProposalHandle> {
        if let Some(handle) = self.proposals.read().await.get(id) {
            return Ok(handle.clone());
        }

        let record = bounded(
            self.config.call_timeout(),
            "fetch proposal",
            self.backend.fetch_proposal(id),
        )
        .await?
        .ok_or_else(|| StateError::NotFound(id.to_string()))?;

        self.hydrate(record).await
    }

    /// Attach stored signatures to a backend record and register it
    async fn hydrate(&self, mut record: Proposal) -> EngineResult<ProposalHandle> {
        let signatures = bounded(
            self.config.call_timeout(),
            "fetch signatures",
            self.backend.fetch_quorate_signatures(&record.id),
        )
        .await?;
        for signature in signatures {
            record.signatures.insert(signature.owner.clone(), signature);
        }

        // Another task may have hydrated the same proposal meanwhile
        let mut proposals = self.proposals.write().await;
        let handle = proposals
            .entry(record.id.clone())
            .or_insert_with(|| {
                log::debug!("Hydrated proposal {} from backend", record.id);
                Arc::new(Mutex::new(record))
            })
            .clone();
        Ok(handle)
    }

    /// Handles of every proposal on `contract`, oldest first
    async fn handles_for(&self, contract: &str) -> EngineResult<Vec<ProposalHandle>> {
        let records = bounded(
            self.config.call_timeout(),
            "list proposals",
            self.backend.list_proposals(contract, None),
        )
        .await?;

        let mut handles = Vec::with_capacity(records.len());
        for record in records {
            let known = self.proposals.read().await.get(&record.id).cloned();
            let handle = match known {
                Some(handle) => handle,
                None => self.hydrate(record).await?,
            };
            handles.push(handle);
        }
        Ok(handles)
    }

    /// Proposals on `contract`, optionally filtered by status
    ///
    /// Each item is read under its proposal's lock only when the stream is
    /// polled. Call again for a fresh pass.
    pub async fn list(
        &self,
        contract: &str,
        filter: Option<ProposalStatus>,
    ) -> EngineResult<BoxStream<'static, Proposal>> {
        let handles = self.handles_for(contract).await?;

        Ok(stream::iter(handles)
            .filter_map(move |handle| async move {
                let proposal = handle.lock().await.clone();
                match filter {
                    Some(status) if proposal.status != status => None,
                    _ => Some(proposal),
                }
            })
            .boxed())
    }

    /// The proposal on `contract` the chain knows by `operation_hash`
    pub async fn find_by_operation_hash(
        &self,
        contract: &str,
        operation_hash: &str,
    ) -> EngineResult<Option<Proposal>> {
        let mut proposals = self.list(contract, None).await?;
        while let Some(proposal) = proposals.next().await {
            if proposal.operation_hash.as_deref() == Some(operation_hash) {
                return Ok(Some(proposal));
            }
        }
        Ok(None)
    }

    /// Move every overdue open proposal on `contract` to `Expired`
    pub async fn expire_overdue(&self, contract: &str) -> EngineResult<Vec<Proposal>> {
        let mut expired = Vec::new();
        for handle in self.handles_for(contract).await? {
            let mut proposal = handle.lock().await;
            if self.expire_if_overdue(&mut proposal).await? {
                expired.push(proposal.clone());
            }
        }
        Ok(expired)
    }

    /// Expire a locked proposal if it outlived the TTL
    pub(crate) async fn expire_if_overdue(&self, slot: &mut Proposal) -> EngineResult<bool> {
        if !slot.is_expired(self.config.proposal_ttl(), Utc::now()) {
            return Ok(false);
        }

        let mut next = slot.clone();
        next.transition(ProposalStatus::Expired)?;
        self.commit(slot, next).await?;

        log::info!("Proposal {} expired without reaching quorum", slot.id);
        Ok(true)
    }

    /// Persist `next`, then replace the locked proposal with it
    pub(crate) async fn commit(&self, slot: &mut Proposal, next: Proposal) -> EngineResult<()> {
        self.persist(&next).await?;
        *slot = next;
        Ok(())
    }

    pub(crate) async fn persist(&self, proposal: &Proposal) -> EngineResult<()> {
        bounded(
            self.config.call_timeout(),
            "persist proposal",
            self.backend.persist_proposal(proposal),
        )
        .await?;
        Ok(())
    }

    pub(crate) fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }
}

fn invalid(reason: &str) -> EngineError {
    ValidationError::InvalidProposal(reason.to_string()).into()
}
