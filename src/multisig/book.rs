//! Contract book
//!
//! Fetch-and-cache view of contract states. Cached snapshots are advisory:
//! anything that consumes the counter re-reads it with [`ContractBook::refresh`].

use crate::adapters::{
    await_confirmation, bounded, Backend, ChainAdapter, Confirmation, OriginationRequest,
};
use crate::config::EngineConfig;
use crate::error::{ChainError, EngineResult, StateError};
use crate::multisig::contract::{validate_owner_set, ContractState, Owner};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct ContractBook {
    backend: Arc<dyn Backend>,
    cache: RwLock<HashMap<String, ContractState>>,
    config: EngineConfig,
}

impl ContractBook {
    pub fn new(backend: Arc<dyn Backend>, config: EngineConfig) -> Self {
        Self {
            backend,
            cache: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Contract state, from cache when available
    pub async fn load(&self, address: &str) -> EngineResult<ContractState> {
        if let Some(state) = self.cache.read().await.get(address) {
            return Ok(state.clone());
        }
        self.refresh(address).await
    }

    /// Contract state straight from the backend, updating the cache
    pub async fn refresh(&self, address: &str) -> EngineResult<ContractState> {
        let fetched = bounded(
            self.config.call_timeout(),
            "fetch contract state",
            self.backend.fetch_contract_state(address),
        )
        .await?;

        let state = fetched.ok_or_else(|| StateError::ContractNotFound(address.to_string()))?;
        validate_owner_set(&state.owners, state.threshold)?;

        self.cache
            .write()
            .await
            .insert(address.to_string(), state.clone());
        Ok(state)
    }

    /// Check whether `identity` may sign for the contract at `address`
    pub async fn is_owner(&self, address: &str, identity: &str) -> EngineResult<bool> {
        Ok(self.load(address).await?.is_owner(identity))
    }

    /// Whether the backend knows a contract at `address`
    ///
    /// Transport failures are errors, not `false`.
    pub async fn is_valid_contract(&self, address: &str) -> EngineResult<bool> {
        if self.cache.read().await.contains_key(address) {
            return Ok(true);
        }
        let fetched = bounded(
            self.config.call_timeout(),
            "fetch contract state",
            self.backend.fetch_contract_state(address),
        )
        .await?;
        Ok(fetched.is_some())
    }

    /// Originate a new multisig contract and register its state
    pub async fn originate(
        &self,
        chain: &dyn ChainAdapter,
        owners: Vec<Owner>,
        threshold: u32,
        balance: u64,
    ) -> EngineResult<ContractState> {
        validate_owner_set(&owners, threshold)?;

        let code = bounded(
            self.config.call_timeout(),
            "fetch contract code",
            self.backend.fetch_contract_code(),
        )
        .await?;

        let request = OriginationRequest {
            code,
            storage: ContractState::initial_storage(&owners, threshold),
            balance,
        };
        let pending = bounded(self.config.call_timeout(), "originate", chain.originate(&request))
            .await
            .map_err(|e| e.into_engine(ChainError::OriginationRejected))?;

        log::info!("Origination {} accepted, awaiting confirmation", pending.hash);

        let address = match await_confirmation(chain, &pending, &self.config).await? {
            Confirmation::Confirmed {
                contract_address: Some(address),
            } => address,
            Confirmation::Confirmed {
                contract_address: None,
            } => {
                return Err(ChainError::ConfirmationFailed(format!(
                    "origination {} confirmed without a contract address",
                    pending.hash
                ))
                .into())
            }
            Confirmation::Failed { reason } => {
                return Err(ChainError::ConfirmationFailed(reason).into())
            }
            Confirmation::Pending => {
                return Err(ChainError::ConfirmationFailed(format!(
                    "origination {} still pending",
                    pending.hash
                ))
                .into())
            }
        };

        let mut state = ContractState::new(address, owners, threshold, 0)?;
        state.balance = balance;

        bounded(
            self.config.call_timeout(),
            "persist contract state",
            self.backend.persist_contract_state(&state),
        )
        .await?;
        self.cache
            .write()
            .await
            .insert(state.address.clone(), state.clone());

        log::info!(
            "Originated {} multisig contract {}",
            state.description(),
            state.address
        );
        Ok(state)
    }

    /// Advance the counter past `consumed_counter`
    ///
    /// Idempotent: a counter already beyond `consumed_counter` is left alone.
    pub async fn record_execution(
        &self,
        address: &str,
        consumed_counter: u64,
    ) -> EngineResult<ContractState> {
        let mut state = self.refresh(address).await?;
        if state.counter > consumed_counter {
            return Ok(state);
        }

        state.counter = consumed_counter + 1;
        bounded(
            self.config.call_timeout(),
            "persist contract state",
            self.backend.persist_contract_state(&state),
        )
        .await?;
        self.cache
            .write()
            .await
            .insert(address.to_string(), state.clone());

        log::info!("Contract {} counter advanced to {}", address, state.counter);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockChain;
    use crate::crypto::KeyPair;
    use crate::error::{EngineError, ValidationError};
    use crate::storage::LocalBackend;

    fn owners(n: usize) -> Vec<Owner> {
        (0..n)
            .map(|_| Owner::from_public_key_hex(&KeyPair::generate().public_key_hex()).unwrap())
            .collect()
    }

    fn book() -> (ContractBook, Arc<LocalBackend>) {
        let backend = Arc::new(LocalBackend::in_memory("parameter (or unit ...);"));
        (
            ContractBook::new(backend.clone(), EngineConfig::default()),
            backend,
        )
    }

    #[tokio::test]
    async fn test_originate_registers_contract() {
        let (book, backend) = book();
        let chain = MockChain::new();
        let set = owners(3);

        let state = book.originate(&chain, set.clone(), 2, 100).await.unwrap();
        assert_eq!(state.counter, 0);
        assert_eq!(state.balance, 100);
        assert_eq!(chain.balance_of(&state.address), Some(100));

        // Persisted for other engines to discover
        let stored = backend.fetch_contract_state(&state.address).await.unwrap();
        assert_eq!(stored, Some(state.clone()));

        assert!(book.is_owner(&state.address, &set[1].address).await.unwrap());
        assert!(!book.is_owner(&state.address, "1stranger").await.unwrap());
    }

    #[tokio::test]
    async fn test_originate_validates_before_calling_chain() {
        let (book, _) = book();
        let chain = MockChain::new();

        let err = book.originate(&chain, owners(2), 3, 0).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::InvalidContract(_))
        ));
        assert_eq!(chain.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_originate_rejected() {
        let (book, _) = book();
        let chain = MockChain::new();
        chain.reject_next("balance too low");

        let err = book.originate(&chain, owners(2), 1, 0).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Chain(ChainError::OriginationRejected(_))
        ));
    }

    #[tokio::test]
    async fn test_load_unknown_contract() {
        let (book, _) = book();
        let err = book.load("3missing").await.unwrap_err();
        assert!(matches!(err, EngineError::State(StateError::ContractNotFound(_))));
        assert!(!book.is_valid_contract("3missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_is_valid_contract_reports_outage() {
        let (book, backend) = book();
        backend.set_online(false);
        assert!(book.is_valid_contract("3anything").await.is_err());
    }

    #[tokio::test]
    async fn test_record_execution_is_idempotent() {
        let (book, _) = book();
        let chain = MockChain::new();
        let state = book.originate(&chain, owners(2), 1, 0).await.unwrap();

        let after = book.record_execution(&state.address, 0).await.unwrap();
        assert_eq!(after.counter, 1);

        let again = book.record_execution(&state.address, 0).await.unwrap();
        assert_eq!(again.counter, 1);
        assert_eq!(book.load(&state.address).await.unwrap().counter, 1);
    }
}
