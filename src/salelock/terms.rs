//! Sale terms
//!
//! The immutable conditions of one listing. Changing the price means
//! cancelling and listing again.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::Address;

/// Largest price accepted, in satoshis (the total money supply)
pub const MAX_PRICE: u64 = 2_100_000_000_000_000;

/// Default bound on the asset id length, in bytes
pub const DEFAULT_MAX_ASSET_ID_LEN: usize = 128;

/// Default bound on embedded item metadata, in bytes
pub const DEFAULT_MAX_ITEM_METADATA_LEN: usize = 1024;

/// Sale terms validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TermsError {
    #[error("Price must be greater than zero")]
    ZeroPrice,
    #[error("Price {0} exceeds the maximum of 2100000000000000")]
    PriceTooHigh(u64),
    #[error("Asset id must not be empty")]
    EmptyAssetId,
    #[error("Asset id is {len} bytes (max: {max})")]
    AssetIdTooLong { len: usize, max: usize },
    #[error("Item metadata is {len} bytes (max: {max})")]
    MetadataTooLarge { len: usize, max: usize },
}

/// Size bounds applied to sale terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermsLimits {
    pub max_asset_id_len: usize,
    pub max_item_metadata_len: usize,
}

impl Default for TermsLimits {
    fn default() -> Self {
        Self {
            max_asset_id_len: DEFAULT_MAX_ASSET_ID_LEN,
            max_item_metadata_len: DEFAULT_MAX_ITEM_METADATA_LEN,
        }
    }
}

/// Conditions under which a listed item may be bought or withdrawn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleTerms {
    /// Key allowed to cancel the listing
    pub cancel_authority: Address,
    /// Recipient of the payment
    pub payee: Address,
    /// Minimum payment in satoshis
    pub price: u64,
    /// Opaque item data embedded in the locking script
    #[serde(with = "hex_bytes")]
    pub item_metadata: Vec<u8>,
    /// Identifier of the token being sold
    pub asset_id: String,
}

impl SaleTerms {
    pub fn new(
        cancel_authority: Address,
        payee: Address,
        price: u64,
        item_metadata: Vec<u8>,
        asset_id: impl Into<String>,
    ) -> Self {
        Self {
            cancel_authority,
            payee,
            price,
            item_metadata,
            asset_id: asset_id.into(),
        }
    }

    /// Check the terms against the embedding bounds
    pub fn validate(&self, limits: &TermsLimits) -> Result<(), TermsError> {
        if self.price == 0 {
            return Err(TermsError::ZeroPrice);
        }
        if self.price > MAX_PRICE {
            return Err(TermsError::PriceTooHigh(self.price));
        }
        if self.asset_id.is_empty() {
            return Err(TermsError::EmptyAssetId);
        }
        if self.asset_id.len() > limits.max_asset_id_len {
            return Err(TermsError::AssetIdTooLong {
                len: self.asset_id.len(),
                max: limits.max_asset_id_len,
            });
        }
        if self.item_metadata.len() > limits.max_item_metadata_len {
            return Err(TermsError::MetadataTooLarge {
                len: self.item_metadata.len(),
                max: limits.max_item_metadata_len,
            });
        }
        Ok(())
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn terms(price: u64) -> SaleTerms {
        let seller = KeyPair::generate();
        SaleTerms::new(
            seller.address(),
            seller.address(),
            price,
            b"{\"name\":\"Sword\"}".to_vec(),
            "sword-001",
        )
    }

    #[test]
    fn test_valid_terms() {
        terms(1000).validate(&TermsLimits::default()).unwrap();
        terms(MAX_PRICE).validate(&TermsLimits::default()).unwrap();
    }

    #[test]
    fn test_price_bounds() {
        let limits = TermsLimits::default();
        assert_eq!(terms(0).validate(&limits), Err(TermsError::ZeroPrice));
        assert_eq!(
            terms(MAX_PRICE + 1).validate(&limits),
            Err(TermsError::PriceTooHigh(MAX_PRICE + 1))
        );
    }

    #[test]
    fn test_size_bounds() {
        let limits = TermsLimits {
            max_asset_id_len: 4,
            max_item_metadata_len: 8,
        };

        let mut t = terms(10);
        t.asset_id = String::new();
        assert_eq!(t.validate(&limits), Err(TermsError::EmptyAssetId));

        t.asset_id = "abcde".to_string();
        assert!(matches!(
            t.validate(&limits),
            Err(TermsError::AssetIdTooLong { len: 5, max: 4 })
        ));

        t.asset_id = "abcd".to_string();
        assert!(matches!(
            t.validate(&limits),
            Err(TermsError::MetadataTooLarge { max: 8, .. })
        ));
    }

    #[test]
    fn test_terms_serde() {
        let t = terms(1000);
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains(&hex::encode(&t.item_metadata)));
        let back: SaleTerms = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
