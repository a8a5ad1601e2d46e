//! Cryptographic utilities
//!
//! This module provides:
//! - SHA-256, double SHA-256 and HASH160
//! - ECDSA key management (secp256k1) with DER signatures
//! - Base58Check pay-to-key addresses

pub mod hash;
pub mod keys;

pub use hash::{double_sha256, double_sha256_hex, hash160, sha256, sha256_hex};
pub use keys::{
    sign_digest, verify_signature, Address, KeyError, KeyPair,
    COMPRESSED_PUBKEY_LEN, MAINNET_ADDRESS_VERSION, MAX_DER_SIGNATURE_LEN,
    TESTNET_ADDRESS_VERSION,
};
