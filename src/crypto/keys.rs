//! ECDSA key management
//!
//! Owners are secp256k1 keys. An owner's identity is the Base58Check
//! address derived from its compressed public key; signatures are compact
//! ECDSA over a 32-byte payload digest.

use rand::rngs::OsRng;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use thiserror::Error;

use super::hash::{base58check_address, OWNER_ADDRESS_VERSION};

/// Errors that can occur during key operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature encoding")]
    InvalidSignature,
    #[error("Digest must be 32 bytes, got {0}")]
    InvalidDigest(usize),
}

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPrivateKey)?;
        let secret_key =
            SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        let public_key = PublicKey::from_secret_key(&Secp256k1::new(), &secret_key);
        Ok(Self {
            secret_key,
            public_key,
        })
    }

    /// Public key as hex (compressed format)
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    /// Owner identity derived from the public key
    pub fn address(&self) -> String {
        public_key_to_address(&self.public_key)
    }

    /// Sign a 32-byte digest
    pub fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, KeyError> {
        sign_digest(&self.secret_key, digest)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// Owner identity: Base58Check(RIPEMD160(SHA256(pubkey)))
pub fn public_key_to_address(public_key: &PublicKey) -> String {
    base58check_address(OWNER_ADDRESS_VERSION, &public_key.serialize())
}

/// Parse a public key from hex string
pub fn public_key_from_hex(hex_key: &str) -> Result<PublicKey, KeyError> {
    let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPublicKey)?;
    PublicKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPublicKey)
}

fn digest_message(digest: &[u8]) -> Result<Message, KeyError> {
    if digest.len() != 32 {
        return Err(KeyError::InvalidDigest(digest.len()));
    }
    Message::from_digest_slice(digest).map_err(|_| KeyError::InvalidDigest(digest.len()))
}

/// Sign a 32-byte digest with a secret key, returning the compact signature
pub fn sign_digest(secret_key: &SecretKey, digest: &[u8]) -> Result<Vec<u8>, KeyError> {
    let message = digest_message(digest)?;
    let signature = Secp256k1::new().sign_ecdsa(&message, secret_key);
    Ok(signature.serialize_compact().to_vec())
}

/// Verify a compact signature over a 32-byte digest
///
/// Returns `Ok(false)` for a well-formed signature that does not match.
pub fn verify_digest(
    public_key: &PublicKey,
    digest: &[u8],
    signature: &[u8],
) -> Result<bool, KeyError> {
    let message = digest_message(digest)?;
    let sig = secp256k1::ecdsa::Signature::from_compact(signature)
        .map_err(|_| KeyError::InvalidSignature)?;

    Ok(Secp256k1::verification_only()
        .verify_ecdsa(&message, &sig, public_key)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256;

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate();
        let digest = sha256(b"transfer 10 to X");

        let signature = kp.sign(&digest).unwrap();
        assert!(verify_digest(&kp.public_key, &digest, &signature).unwrap());

        let other = sha256(b"transfer 11 to X");
        assert!(!verify_digest(&kp.public_key, &other, &signature).unwrap());
    }

    #[test]
    fn test_wrong_key_does_not_verify() {
        let signer = KeyPair::generate();
        let stranger = KeyPair::generate();
        let digest = sha256(b"payload");

        let signature = signer.sign(&digest).unwrap();
        assert!(!verify_digest(&stranger.public_key, &digest, &signature).unwrap());
    }

    #[test]
    fn test_digest_length_enforced() {
        let kp = KeyPair::generate();
        assert_eq!(kp.sign(b"short"), Err(KeyError::InvalidDigest(5)));
    }

    #[test]
    fn test_malformed_signature() {
        let kp = KeyPair::generate();
        let digest = sha256(b"payload");
        assert_eq!(
            verify_digest(&kp.public_key, &digest, &[1, 2, 3]),
            Err(KeyError::InvalidSignature)
        );
    }

    #[test]
    fn test_key_pair_from_hex() {
        let kp1 = KeyPair::generate();
        let private_hex = hex::encode(kp1.secret_key.secret_bytes());

        let kp2 = KeyPair::from_private_key_hex(&private_hex).unwrap();
        assert_eq!(kp1.public_key_hex(), kp2.public_key_hex());
        assert_eq!(kp1.address(), kp2.address());
        assert!(kp1.address().starts_with('1'));
    }

    #[test]
    fn test_public_key_from_hex() {
        let kp = KeyPair::generate();
        let parsed = public_key_from_hex(&kp.public_key_hex()).unwrap();
        assert_eq!(parsed, kp.public_key);
        assert!(public_key_from_hex("zz").is_err());
    }
}
