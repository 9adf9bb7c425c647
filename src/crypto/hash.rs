//! Hashing and address encoding
//!
//! SHA-256 digests for payloads and ids, plus the Base58Check address
//! encoding shared by owner identities and contract addresses.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Version byte for owner (public-key) addresses, encodes with a leading '1'
pub const OWNER_ADDRESS_VERSION: u8 = 0x00;

/// Version byte for contract addresses, encodes with a leading '3'
pub const CONTRACT_ADDRESS_VERSION: u8 = 0x05;

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Computes SHA-256 hash and returns it as a hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// RIPEMD160(SHA256(data))
pub fn hash160(data: &[u8]) -> Vec<u8> {
    let mut ripemd = Ripemd160::new();
    ripemd.update(sha256(data));
    ripemd.finalize().to_vec()
}

/// Base58Check(version || hash160(data))
pub fn base58check_address(version: u8, data: &[u8]) -> String {
    let mut address_bytes = vec![version];
    address_bytes.extend_from_slice(&hash160(data));

    // Checksum is the first 4 bytes of double SHA-256
    let checksum = sha256(&sha256(&address_bytes));
    address_bytes.extend_from_slice(&checksum[..4]);

    bs58::encode(address_bytes).into_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256() {
        let data = b"hello world";
        assert_eq!(sha256(data).len(), 32);
        assert_eq!(
            sha256_hex(data),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_address_versions() {
        let owner = base58check_address(OWNER_ADDRESS_VERSION, b"owner");
        let contract = base58check_address(CONTRACT_ADDRESS_VERSION, b"contract");
        assert!(owner.starts_with('1'));
        assert!(contract.starts_with('3'));
    }

    #[test]
    fn test_address_checksum_roundtrip() {
        let address = base58check_address(CONTRACT_ADDRESS_VERSION, b"code+storage");
        let bytes = bs58::decode(&address).into_vec().unwrap();
        assert_eq!(bytes.len(), 25);

        let (body, checksum) = bytes.split_at(21);
        assert_eq!(&sha256(&sha256(body))[..4], checksum);
    }
}
