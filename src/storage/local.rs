//! Local backend
//!
//! Keeps contracts, proposals and signatures in memory and, when opened
//! with a [`StorageConfig`], mirrors them to a JSON snapshot after every
//! write. Writes are applied to a copy that replaces the live snapshot only
//! once it is on disk, so a failed flush changes nothing. Snapshots are
//! written to a temporary file and renamed into place.

use crate::adapters::Backend;
use crate::error::CollaboratorError;
use crate::multisig::{ContractState, Proposal, ProposalStatus, Signature};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl From<StorageError> for CollaboratorError {
    fn from(err: StorageError) -> Self {
        CollaboratorError::Unavailable(err.to_string())
    }
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub snapshot_file: String,
    /// Keep the previous snapshot as `<file>.backup`
    pub backup_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".multisig_data"),
            snapshot_file: "backend.json".to_string(),
            backup_enabled: true,
        }
    }
}

impl StorageConfig {
    fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.snapshot_file)
    }

    fn backup_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.backup", self.snapshot_file))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    contract_code: String,
    contracts: HashMap<String, ContractState>,
    /// Proposal records without signatures
    proposals: HashMap<String, Proposal>,
    /// Signatures by proposal id, then owner
    signatures: HashMap<String, BTreeMap<String, Signature>>,
}

/// In-memory backend with optional JSON persistence
pub struct LocalBackend {
    snapshot: RwLock<Snapshot>,
    storage: Option<StorageConfig>,
    /// When false, every call fails with `Unavailable`
    online: AtomicBool,
    /// Artificial latency per call, in milliseconds
    latency_ms: AtomicU64,
}

impl LocalBackend {
    /// Purely in-memory backend serving `contract_code` for originations
    pub fn in_memory(contract_code: &str) -> Self {
        Self {
            snapshot: RwLock::new(Snapshot {
                contract_code: contract_code.to_string(),
                ..Default::default()
            }),
            storage: None,
            online: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Open a file-backed backend, loading an existing snapshot if present
    pub fn open(config: StorageConfig, contract_code: &str) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.data_dir)?;

        let path = config.snapshot_path();
        let mut snapshot = if path.exists() {
            let file = fs::File::open(&path)?;
            serde_json::from_reader(BufReader::new(file))?
        } else {
            Snapshot::default()
        };
        snapshot.contract_code = contract_code.to_string();

        log::info!(
            "Opened backend at {:?} ({} contracts, {} proposals)",
            path,
            snapshot.contracts.len(),
            snapshot.proposals.len()
        );

        Ok(Self {
            snapshot: RwLock::new(snapshot),
            storage: Some(config),
            online: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        })
    }

    /// Simulate the backend going away (or coming back)
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    async fn reachable(&self) -> Result<(), CollaboratorError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("backend offline".to_string()));
        }
        Ok(())
    }

    /// Apply `change` to a copy of the snapshot and swap it in once flushed
    async fn update(&self, change: impl FnOnce(&mut Snapshot)) -> Result<(), StorageError> {
        let mut snapshot = self.snapshot.write().await;
        let mut next = snapshot.clone();
        change(&mut next);
        self.flush(&next)?;
        *snapshot = next;
        Ok(())
    }

    /// Write the snapshot to disk if file-backed
    fn flush(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let Some(config) = &self.storage else {
            return Ok(());
        };
        let path = config.snapshot_path();

        if config.backup_enabled && path.exists() {
            fs::copy(&path, config.backup_path())?;
        }

        // Write to temporary file first
        let temp_path = config.data_dir.join(format!("{}.tmp", config.snapshot_file));
        let file = fs::File::create(&temp_path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), snapshot)?;

        // Atomic rename
        fs::rename(&temp_path, &path)?;
        Ok(())
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn fetch_contract_code(&self) -> Result<String, CollaboratorError> {
        self.reachable().await?;
        Ok(self.snapshot.read().await.contract_code.clone())
    }

    async fn fetch_contract_state(
        &self,
        address: &str,
    ) -> Result<Option<ContractState>, CollaboratorError> {
        self.reachable().await?;
        Ok(self.snapshot.read().await.contracts.get(address).cloned())
    }

    async fn persist_contract_state(
        &self,
        state: &ContractState,
    ) -> Result<(), CollaboratorError> {
        self.reachable().await?;
        self.update(|snapshot| {
            snapshot
                .contracts
                .insert(state.address.clone(), state.clone());
        })
        .await?;
        Ok(())
    }

    async fn persist_proposal(&self, proposal: &Proposal) -> Result<(), CollaboratorError> {
        self.reachable().await?;
        let mut record = proposal.clone();
        record.signatures.clear();

        self.update(|snapshot| {
            snapshot.proposals.insert(record.id.clone(), record);
        })
        .await?;
        Ok(())
    }

    async fn fetch_proposal(&self, id: &str) -> Result<Option<Proposal>, CollaboratorError> {
        self.reachable().await?;
        Ok(self.snapshot.read().await.proposals.get(id).cloned())
    }

    async fn list_proposals(
        &self,
        contract: &str,
        filter: Option<ProposalStatus>,
    ) -> Result<Vec<Proposal>, CollaboratorError> {
        self.reachable().await?;
        let snapshot = self.snapshot.read().await;
        let mut proposals: Vec<Proposal> = snapshot
            .proposals
            .values()
            .filter(|p| p.contract == contract)
            .filter(|p| filter.map_or(true, |status| p.status == status))
            .cloned()
            .collect();
        proposals.sort_by_key(|p| p.created_at);
        Ok(proposals)
    }

    async fn persist_signature(
        &self,
        proposal_id: &str,
        signature: &Signature,
    ) -> Result<(), CollaboratorError> {
        self.reachable().await?;
        self.update(|snapshot| {
            snapshot
                .signatures
                .entry(proposal_id.to_string())
                .or_default()
                .insert(signature.owner.clone(), signature.clone());
        })
        .await?;
        Ok(())
    }

    async fn fetch_quorate_signatures(
        &self,
        proposal_id: &str,
    ) -> Result<Vec<Signature>, CollaboratorError> {
        self.reachable().await?;
        let snapshot = self.snapshot.read().await;
        Ok(snapshot
            .signatures
            .get(proposal_id)
            .map(|sigs| sigs.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::multisig::{OperationAction, Owner, ProposalKind, TransferAction};

    fn sample_contract() -> ContractState {
        let owners = (0..2)
            .map(|_| Owner::from_public_key_hex(&KeyPair::generate().public_key_hex()).unwrap())
            .collect();
        ContractState::new("3contract".to_string(), owners, 1, 0).unwrap()
    }

    fn sample_proposal(contract: &ContractState) -> Proposal {
        Proposal::new(
            contract,
            ProposalKind::Transfer {
                destination: "1dest".to_string(),
                amount: 5,
            },
            OperationAction::Transfer(TransferAction {
                destination: "1dest".to_string(),
                amount: 5,
            }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            data_dir: temp_dir.path().to_path_buf(),
            ..Default::default()
        };

        let contract = sample_contract();
        let proposal = sample_proposal(&contract);
        {
            let backend = LocalBackend::open(config.clone(), "code").unwrap();
            backend.persist_contract_state(&contract).await.unwrap();
            backend.persist_proposal(&proposal).await.unwrap();
        }

        let reopened = LocalBackend::open(config.clone(), "code").unwrap();
        let loaded = reopened.fetch_contract_state(&contract.address).await.unwrap();
        assert_eq!(loaded, Some(contract.clone()));

        let listed = reopened
            .list_proposals(&contract.address, Some(ProposalStatus::Open))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, proposal.id);
        assert!(config.backup_path().exists());
    }

    #[tokio::test]
    async fn test_signatures_stored_separately() {
        let backend = LocalBackend::in_memory("code");
        let contract = sample_contract();
        let proposal = sample_proposal(&contract);
        let signature = Signature::new(&contract.owners[0], vec![1, 2, 3]);

        backend.persist_proposal(&proposal).await.unwrap();
        backend.persist_signature(&proposal.id, &signature).await.unwrap();
        // Upserts are idempotent
        backend.persist_signature(&proposal.id, &signature).await.unwrap();

        let sigs = backend.fetch_quorate_signatures(&proposal.id).await.unwrap();
        assert_eq!(sigs, vec![signature]);
        assert!(backend.fetch_quorate_signatures("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_backend() {
        let backend = LocalBackend::in_memory("code");
        backend.set_online(false);
        assert!(matches!(
            backend.fetch_contract_code().await,
            Err(CollaboratorError::Unavailable(_))
        ));

        backend.set_online(true);
        assert_eq!(backend.fetch_contract_code().await.unwrap(), "code");
    }

    #[tokio::test]
    async fn test_failed_flush_leaves_snapshot_unchanged() {
        let temp_dir = tempfile::tempdir().unwrap();
        let data_dir = temp_dir.path().join("backend");
        let config = StorageConfig {
            data_dir: data_dir.clone(),
            ..Default::default()
        };

        let contract = sample_contract();
        let proposal = sample_proposal(&contract);
        let backend = LocalBackend::open(config, "code").unwrap();
        backend.persist_contract_state(&contract).await.unwrap();
        backend.persist_proposal(&proposal).await.unwrap();

        // Nowhere left to write the snapshot
        fs::remove_dir_all(&data_dir).unwrap();

        let mut quorate = proposal.clone();
        quorate.status = ProposalStatus::Quorate;
        assert!(matches!(
            backend.persist_proposal(&quorate).await,
            Err(CollaboratorError::Unavailable(_))
        ));
        let signature = Signature::new(&contract.owners[0], vec![1, 2, 3]);
        assert!(backend.persist_signature(&proposal.id, &signature).await.is_err());
        let mut advanced = contract.clone();
        advanced.counter = 1;
        assert!(backend.persist_contract_state(&advanced).await.is_err());

        let stored = backend.fetch_proposal(&proposal.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProposalStatus::Open);
        assert!(backend.fetch_quorate_signatures(&proposal.id).await.unwrap().is_empty());
        let state = backend.fetch_contract_state(&contract.address).await.unwrap();
        assert_eq!(state.map(|s| s.counter), Some(0));
    }

    #[test]
    fn test_oversized_latency_saturates() {
        let backend = LocalBackend::in_memory("code");
        backend.set_latency(Duration::MAX);
        assert_eq!(backend.latency_ms.load(Ordering::SeqCst), u64::MAX);
    }
}
