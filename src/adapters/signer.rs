//! Signing capability
//!
//! Passed explicitly into signature-producing operations so the engine
//! never depends on where keys are kept.

use crate::crypto::{KeyError, KeyPair};
use crate::multisig::Owner;
use async_trait::async_trait;

#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign a 32-byte payload digest
    async fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, KeyError>;

    /// Identity the signatures belong to
    fn public_identity(&self) -> Owner;
}

/// Signer backed by an in-memory secp256k1 key pair
#[derive(Clone, Debug)]
pub struct KeyPairSigner {
    key_pair: KeyPair,
}

impl KeyPairSigner {
    pub fn new(key_pair: KeyPair) -> Self {
        Self { key_pair }
    }

    pub fn generate() -> Self {
        Self::new(KeyPair::generate())
    }

    pub fn address(&self) -> String {
        self.key_pair.address()
    }
}

#[async_trait]
impl Signer for KeyPairSigner {
    async fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, KeyError> {
        self.key_pair.sign(digest)
    }

    fn public_identity(&self) -> Owner {
        Owner {
            address: self.key_pair.address(),
            public_key: self.key_pair.public_key_hex(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{sha256, verify_digest};

    #[tokio::test]
    async fn test_key_pair_signer() {
        let signer = KeyPairSigner::generate();
        let identity = signer.public_identity();
        assert_eq!(identity.address, signer.address());

        let digest = sha256(b"payload");
        let signature = signer.sign(&digest).await.unwrap();
        let key = identity.key().unwrap();
        assert!(verify_digest(&key, &digest, &signature).unwrap());
    }
}
