//! In-process chain for local runs and tests
//!
//! Keeps contract storage in memory and behaves like a strict multisig
//! contract: an operation is accepted only if it targets the current
//! counter and carries `threshold` valid owner signatures. Accepted
//! operations confirm after a configurable number of polls, at which point
//! the counter advances. Identical operations share one hash, so
//! resubmitting is harmless.

use crate::adapters::chain::{
    ChainAdapter, ChainCallError, Confirmation, OriginationRequest, PendingOperation,
};
use crate::crypto::{
    base58check_address, public_key_from_hex, sha256, verify_digest, CONTRACT_ADDRESS_VERSION,
};
use crate::error::CollaboratorError;
use crate::multisig::{AssembledOperation, InitialStorage, OperationAction};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
struct OnChainContract {
    storage: InitialStorage,
    balance: u64,
}

#[derive(Debug, Clone)]
enum OperationEffect {
    Origination { address: String },
    Execution {
        contract: String,
        counter: u64,
        action: OperationAction,
    },
}

#[derive(Debug, Clone)]
struct OnChainOperation {
    effect: OperationEffect,
    confirmation: Confirmation,
    polls: u32,
}

#[derive(Debug, Default)]
struct ChainInner {
    contracts: HashMap<String, OnChainContract>,
    operations: HashMap<String, OnChainOperation>,
    nonce: u64,
    submissions: usize,
    reject_next: Option<String>,
    fail_next_confirmation: Option<String>,
    unavailable_next: bool,
}

/// Mock chain adapter
pub struct MockChain {
    inner: Mutex<ChainInner>,
    /// Polls before a pending operation resolves
    confirm_after_polls: u32,
    /// Artificial latency on every submission
    submit_delay: Duration,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ChainInner::default()),
            confirm_after_polls: 1,
            submit_delay: Duration::ZERO,
        }
    }

    pub fn with_confirm_after_polls(mut self, polls: u32) -> Self {
        self.confirm_after_polls = polls.max(1);
        self
    }

    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ChainInner>, ChainCallError> {
        self.inner.lock().map_err(|_| {
            ChainCallError::Collaborator(CollaboratorError::Unavailable(
                "mock chain state poisoned".to_string(),
            ))
        })
    }

    /// Refuse the next origination or submission with `reason`
    pub fn reject_next(&self, reason: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.reject_next = Some(reason.to_string());
        }
    }

    /// Make the next operation to resolve fail with `reason`
    pub fn fail_next_confirmation(&self, reason: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_next_confirmation = Some(reason.to_string());
        }
    }

    /// Make the next submission fail as if the node were unreachable
    pub fn unavailable_once(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.unavailable_next = true;
        }
    }

    /// Number of distinct operations accepted for execution
    pub fn submission_count(&self) -> usize {
        self.inner.lock().map(|i| i.submissions).unwrap_or(0)
    }

    /// On-chain counter of a contract
    pub fn counter_of(&self, address: &str) -> Option<u64> {
        let inner = self.inner.lock().ok()?;
        inner.contracts.get(address).map(|c| c.storage.counter)
    }

    /// On-chain balance of a contract
    pub fn balance_of(&self, address: &str) -> Option<u64> {
        let inner = self.inner.lock().ok()?;
        inner.contracts.get(address).map(|c| c.balance)
    }
}

fn check_signatures(
    storage: &InitialStorage,
    operation: &AssembledOperation,
) -> Result<(), String> {
    let digest = sha256(&operation.operation);
    let mut valid = 0u32;

    for sig in &operation.signatures {
        if !storage.keys.contains(&sig.public_key) {
            return Err(format!("signature from unknown key {}", sig.public_key));
        }
        let key = public_key_from_hex(&sig.public_key).map_err(|e| e.to_string())?;
        let bytes = hex::decode(&sig.signature).map_err(|e| e.to_string())?;
        if verify_digest(&key, &digest, &bytes).map_err(|e| e.to_string())? {
            valid += 1;
        }
    }

    if valid < storage.threshold {
        return Err(format!(
            "{} valid signatures, threshold is {}",
            valid, storage.threshold
        ));
    }
    Ok(())
}

/// Apply a confirmed execution to contract storage
fn apply_execution(
    contracts: &mut HashMap<String, OnChainContract>,
    contract: &str,
    counter: u64,
    action: &OperationAction,
) -> Confirmation {
    let Some(state) = contracts.get_mut(contract) else {
        return Confirmation::Failed {
            reason: format!("unknown contract {}", contract),
        };
    };

    if state.storage.counter != counter {
        return Confirmation::Failed {
            reason: format!(
                "counter {} already consumed (now {})",
                counter, state.storage.counter
            ),
        };
    }

    if let OperationAction::Transfer(transfer) = action {
        if transfer.amount > state.balance {
            return Confirmation::Failed {
                reason: format!(
                    "insufficient balance: have {}, need {}",
                    state.balance, transfer.amount
                ),
            };
        }
        state.balance -= transfer.amount;
    }

    state.storage.counter += 1;
    Confirmation::Confirmed {
        contract_address: None,
    }
}

#[async_trait]
impl ChainAdapter for MockChain {
    async fn originate(
        &self,
        request: &OriginationRequest,
    ) -> Result<PendingOperation, ChainCallError> {
        let mut inner = self.lock()?;

        if let Some(reason) = inner.reject_next.take() {
            return Err(ChainCallError::Rejected(reason));
        }

        let seed = format!(
            "{}{:?}{}",
            request.code, request.storage, inner.nonce
        );
        inner.nonce += 1;
        let address = base58check_address(CONTRACT_ADDRESS_VERSION, seed.as_bytes());
        let hash = hex::encode(&sha256(seed.as_bytes())[..16]);

        inner.contracts.insert(
            address.clone(),
            OnChainContract {
                storage: request.storage.clone(),
                balance: request.balance,
            },
        );
        inner.operations.insert(
            hash.clone(),
            OnChainOperation {
                effect: OperationEffect::Origination { address },
                confirmation: Confirmation::Pending,
                polls: 0,
            },
        );

        Ok(PendingOperation { hash })
    }

    async fn submit_operation(
        &self,
        contract: &str,
        operation: &AssembledOperation,
    ) -> Result<PendingOperation, ChainCallError> {
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }

        let mut inner = self.lock()?;

        if inner.unavailable_next {
            inner.unavailable_next = false;
            return Err(CollaboratorError::Unavailable("mock node unreachable".to_string()).into());
        }
        if let Some(reason) = inner.reject_next.take() {
            return Err(ChainCallError::Rejected(reason));
        }

        let hash = operation.content_hash();
        if inner.operations.contains_key(&hash) {
            return Ok(PendingOperation { hash });
        }

        let state = inner
            .contracts
            .get(contract)
            .ok_or_else(|| ChainCallError::Rejected(format!("unknown contract {}", contract)))?;

        if operation.counter != state.storage.counter {
            return Err(ChainCallError::Rejected(format!(
                "counter mismatch: operation {}, contract {}",
                operation.counter, state.storage.counter
            )));
        }
        check_signatures(&state.storage, operation).map_err(ChainCallError::Rejected)?;

        inner.operations.insert(
            hash.clone(),
            OnChainOperation {
                effect: OperationEffect::Execution {
                    contract: contract.to_string(),
                    counter: operation.counter,
                    action: operation.action.clone(),
                },
                confirmation: Confirmation::Pending,
                polls: 0,
            },
        );
        inner.submissions += 1;

        Ok(PendingOperation { hash })
    }

    async fn confirmation(
        &self,
        pending: &PendingOperation,
    ) -> Result<Confirmation, ChainCallError> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;

        let op = inner
            .operations
            .get_mut(&pending.hash)
            .ok_or_else(|| ChainCallError::Rejected(format!("unknown operation {}", pending.hash)))?;

        if op.confirmation != Confirmation::Pending {
            return Ok(op.confirmation.clone());
        }

        op.polls += 1;
        if op.polls < self.confirm_after_polls {
            return Ok(Confirmation::Pending);
        }

        op.confirmation = if let Some(reason) = inner.fail_next_confirmation.take() {
            Confirmation::Failed { reason }
        } else {
            match &op.effect {
                OperationEffect::Origination { address } => Confirmation::Confirmed {
                    contract_address: Some(address.clone()),
                },
                OperationEffect::Execution {
                    contract,
                    counter,
                    action,
                } => apply_execution(&mut inner.contracts, contract, *counter, action),
            }
        };

        Ok(op.confirmation.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> OriginationRequest {
        OriginationRequest {
            code: "parameter unit;".to_string(),
            storage: InitialStorage {
                counter: 0,
                threshold: 1,
                keys: vec![],
            },
            balance: 50,
        }
    }

    #[tokio::test]
    async fn test_origination_confirms_with_address() {
        let chain = MockChain::new();
        let pending = chain.originate(&request()).await.unwrap();

        match chain.confirmation(&pending).await.unwrap() {
            Confirmation::Confirmed {
                contract_address: Some(address),
            } => {
                assert!(address.starts_with('3'));
                assert_eq!(chain.balance_of(&address), Some(50));
                assert_eq!(chain.counter_of(&address), Some(0));
            }
            other => panic!("unexpected confirmation {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_confirmation_after_polls() {
        let chain = MockChain::new().with_confirm_after_polls(3);
        let pending = chain.originate(&request()).await.unwrap();

        assert_eq!(chain.confirmation(&pending).await.unwrap(), Confirmation::Pending);
        assert_eq!(chain.confirmation(&pending).await.unwrap(), Confirmation::Pending);
        assert!(matches!(
            chain.confirmation(&pending).await.unwrap(),
            Confirmation::Confirmed { .. }
        ));
    }

    #[tokio::test]
    async fn test_scripted_rejection() {
        let chain = MockChain::new();
        chain.reject_next("no funds for fees");

        let result = chain.originate(&request()).await;
        assert_eq!(
            result,
            Err(ChainCallError::Rejected("no funds for fees".to_string()))
        );
        assert!(chain.originate(&request()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let chain = MockChain::new();
        let result = chain
            .confirmation(&PendingOperation {
                hash: "missing".to_string(),
            })
            .await;
        assert!(matches!(result, Err(ChainCallError::Rejected(_))));
    }
}
