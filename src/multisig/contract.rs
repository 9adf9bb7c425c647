//! Multisig contract state
//!
//! Owner set, threshold and execution counter of an originated contract.

use crate::crypto::{public_key_from_hex, public_key_to_address, KeyError};
use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};

/// An identity allowed to sign proposals for a contract
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Owner {
    /// Public-key-derived address
    pub address: String,
    /// Compressed secp256k1 public key (hex)
    pub public_key: String,
}

impl Owner {
    /// Build an owner from its public key, deriving the address
    pub fn from_public_key_hex(public_key: &str) -> Result<Self, KeyError> {
        let pk = public_key_from_hex(public_key)?;
        Ok(Self {
            address: public_key_to_address(&pk),
            public_key: public_key.to_string(),
        })
    }

    /// Parsed public key
    pub fn key(&self) -> Result<PublicKey, KeyError> {
        public_key_from_hex(&self.public_key)
    }
}

/// Initial storage of a multisig contract at origination
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitialStorage {
    pub counter: u64,
    pub threshold: u32,
    /// Owner public keys (hex)
    pub keys: Vec<String>,
}

/// Snapshot of a contract's owners, threshold and counter
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractState {
    /// Chain address of the contract
    pub address: String,
    /// Authorized signers
    pub owners: Vec<Owner>,
    /// Minimum distinct signatures for quorum
    pub threshold: u32,
    /// Execution counter; the next execution consumes this value
    pub counter: u64,
    /// Balance the contract was originated with
    #[serde(default)]
    pub balance: u64,
    /// When this snapshot was taken
    pub fetched_at: DateTime<Utc>,
}

impl ContractState {
    /// Create a validated contract state
    ///
    /// # Errors
    /// Returns `InvalidContract` if the owner set is empty or has duplicate
    /// addresses, or if the threshold is outside `1..=owners.len()`.
    pub fn new(
        address: String,
        owners: Vec<Owner>,
        threshold: u32,
        counter: u64,
    ) -> Result<Self, ValidationError> {
        validate_owner_set(&owners, threshold)?;

        Ok(Self {
            address,
            owners,
            threshold,
            counter,
            balance: 0,
            fetched_at: Utc::now(),
        })
    }

    /// Check if an identity is one of the owners
    pub fn is_owner(&self, identity: &str) -> bool {
        self.owners.iter().any(|o| o.address == identity)
    }

    /// Look up an owner by address
    pub fn owner(&self, identity: &str) -> Option<&Owner> {
        self.owners.iter().find(|o| o.address == identity)
    }

    /// Total number of owners
    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    /// Get description like "2-of-3"
    pub fn description(&self) -> String {
        format!("{}-of-{}", self.threshold, self.owners.len())
    }

    /// Storage to originate a contract with this owner set
    pub fn initial_storage(owners: &[Owner], threshold: u32) -> InitialStorage {
        InitialStorage {
            counter: 0,
            threshold,
            keys: owners.iter().map(|o| o.public_key.clone()).collect(),
        }
    }
}

/// Validate owners and threshold before a contract is originated or loaded
pub fn validate_owner_set(owners: &[Owner], threshold: u32) -> Result<(), ValidationError> {
    if owners.is_empty() {
        return Err(ValidationError::InvalidContract(
            "owner set must not be empty".to_string(),
        ));
    }

    if threshold == 0 {
        return Err(ValidationError::InvalidContract(
            "threshold must be at least 1".to_string(),
        ));
    }

    if threshold as usize > owners.len() {
        return Err(ValidationError::InvalidContract(format!(
            "threshold {} exceeds owner count {}",
            threshold,
            owners.len()
        )));
    }

    let mut addresses: Vec<&str> = owners.iter().map(|o| o.address.as_str()).collect();
    addresses.sort_unstable();
    if addresses.windows(2).any(|pair| pair[0] == pair[1]) {
        return Err(ValidationError::InvalidContract(
            "duplicate owner".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn owners(n: usize) -> Vec<Owner> {
        (0..n)
            .map(|_| Owner::from_public_key_hex(&KeyPair::generate().public_key_hex()).unwrap())
            .collect()
    }

    #[test]
    fn test_state_creation() {
        let state = ContractState::new("3contract".to_string(), owners(3), 2, 0).unwrap();

        assert_eq!(state.threshold, 2);
        assert_eq!(state.owner_count(), 3);
        assert_eq!(state.description(), "2-of-3");
    }

    #[test]
    fn test_state_validation() {
        // Zero threshold
        assert!(ContractState::new("c".to_string(), owners(3), 0, 0).is_err());

        // Threshold > owners
        assert!(ContractState::new("c".to_string(), owners(3), 4, 0).is_err());

        // No owners
        assert!(ContractState::new("c".to_string(), vec![], 1, 0).is_err());

        // Duplicate owners
        let one = owners(1);
        let dup = vec![one[0].clone(), one[0].clone()];
        assert!(ContractState::new("c".to_string(), dup, 1, 0).is_err());

        // A single owner with threshold 1 is a valid contract
        assert!(ContractState::new("c".to_string(), owners(1), 1, 0).is_ok());
    }

    #[test]
    fn test_is_owner() {
        let set = owners(3);
        let state = ContractState::new("c".to_string(), set.clone(), 2, 0).unwrap();

        assert!(state.is_owner(&set[0].address));
        assert!(state.is_owner(&set[2].address));
        assert!(!state.is_owner("not_an_owner"));
        assert_eq!(state.owner(&set[1].address), Some(&set[1]));
    }

    #[test]
    fn test_owner_address_matches_key_pair() {
        let kp = KeyPair::generate();
        let owner = Owner::from_public_key_hex(&kp.public_key_hex()).unwrap();
        assert_eq!(owner.address, kp.address());
        assert_eq!(owner.key().unwrap(), kp.public_key);
    }

    #[test]
    fn test_initial_storage() {
        let set = owners(2);
        let storage = ContractState::initial_storage(&set, 2);
        assert_eq!(storage.counter, 0);
        assert_eq!(storage.threshold, 2);
        assert_eq!(storage.keys[0], set[0].public_key);
    }
}
