//! ECDSA key management
//!
//! Provides key pair generation, DER signing and verification using
//! the secp256k1 elliptic curve, plus Base58Check pay-to-key addresses.

use std::fmt;
use std::str::FromStr;

use rand::rngs::OsRng;
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::hash::{double_sha256, hash160};

/// Address version byte for mainnet pay-to-key addresses
pub const MAINNET_ADDRESS_VERSION: u8 = 0x00;

/// Address version byte for test networks
pub const TESTNET_ADDRESS_VERSION: u8 = 0x6f;

/// Largest DER-encoded secp256k1 signature, in bytes
pub const MAX_DER_SIGNATURE_LEN: usize = 72;

/// Compressed public key length
pub const COMPRESSED_PUBKEY_LEN: usize = 33;

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
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

    /// Create a key pair from an existing secret key
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
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
        Ok(Self::from_secret_key(secret_key))
    }

    /// Get the private key as a hex string
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Compressed public key bytes
    pub fn public_key_bytes(&self) -> [u8; COMPRESSED_PUBKEY_LEN] {
        self.public_key.serialize()
    }

    /// Get the public key as a hex string (compressed format)
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    /// HASH160 of the compressed public key
    pub fn pubkey_hash(&self) -> [u8; 20] {
        hash160(&self.public_key_bytes())
    }

    /// Mainnet address for this key
    pub fn address(&self) -> Address {
        self.address_with_version(MAINNET_ADDRESS_VERSION)
    }

    /// Address for this key under the given version byte
    pub fn address_with_version(&self, version: u8) -> Address {
        Address::new(version, self.pubkey_hash())
    }

    /// Sign a 32-byte digest, returning a DER-encoded signature
    pub fn sign(&self, digest: &[u8; 32]) -> Vec<u8> {
        sign_digest(&self.secret_key, digest)
    }

    /// Verify a DER signature against this key pair's public key
    pub fn verify(&self, digest: &[u8; 32], signature: &[u8]) -> Result<bool, KeyError> {
        verify_signature(&self.public_key, digest, signature)
    }
}

/// Sign a digest with a secret key (RFC 6979 nonce, low-S, DER encoded)
pub fn sign_digest(secret_key: &SecretKey, digest: &[u8; 32]) -> Vec<u8> {
    let secp = Secp256k1::signing_only();
    let message = Message::from_digest(*digest);
    let signature = secp.sign_ecdsa(&message, secret_key);
    signature.serialize_der().to_vec()
}

/// Verify a DER signature against a public key
pub fn verify_signature(
    public_key: &PublicKey,
    digest: &[u8; 32],
    signature: &[u8],
) -> Result<bool, KeyError> {
    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(*digest);
    let sig = Signature::from_der(signature).map_err(|_| KeyError::InvalidSignature)?;

    match secp.verify_ecdsa(&message, &sig, public_key) {
        Ok(()) => Ok(true),
        Err(_) => Ok(false),
    }
}

// =============================================================================
// Address
// =============================================================================

/// A Base58Check pay-to-key address: version byte + HASH160 of a public key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    version: u8,
    hash: [u8; 20],
}

impl Address {
    pub fn new(version: u8, hash: [u8; 20]) -> Self {
        Self { version, hash }
    }

    /// Version byte (network prefix)
    pub fn version(&self) -> u8 {
        self.version
    }

    /// The 20-byte public key hash
    pub fn pubkey_hash(&self) -> &[u8; 20] {
        &self.hash
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bytes = Vec::with_capacity(25);
        bytes.push(self.version);
        bytes.extend_from_slice(&self.hash);
        let checksum = double_sha256(&bytes);
        bytes.extend_from_slice(&checksum[..4]);
        f.write_str(&bs58::encode(bytes).into_string())
    }
}

impl FromStr for Address {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = bs58::decode(s.trim())
            .into_vec()
            .map_err(|e| KeyError::InvalidAddress(e.to_string()))?;
        if decoded.len() != 25 {
            return Err(KeyError::InvalidAddress(format!(
                "expected 25 bytes, got {}",
                decoded.len()
            )));
        }

        let checksum = double_sha256(&decoded[..21]);
        if checksum[..4] != decoded[21..] {
            return Err(KeyError::InvalidAddress("checksum mismatch".to_string()));
        }

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&decoded[1..21]);
        Ok(Self::new(decoded[0], hash))
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
