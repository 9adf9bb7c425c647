//! Cryptographic utilities
//!
//! This module provides:
//! - SHA-256 hashing and Base58Check address encoding
//! - ECDSA key management (secp256k1) over payload digests

pub mod hash;
pub mod keys;

pub use hash::{
    base58check_address, hash160, sha256, sha256_hex, CONTRACT_ADDRESS_VERSION,
    OWNER_ADDRESS_VERSION,
};
pub use keys::{
    public_key_from_hex, public_key_to_address, sign_digest, verify_digest, KeyError, KeyPair,
};
