//! Marketplace configuration
//!
//! Knobs for building marketplace transactions. Loaded from JSON; any field
//! left out takes its default.

use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{Script, TransactionOutput, MAX_SCRIPT_SIZE};
use crate::crypto::MAINNET_ADDRESS_VERSION;
use crate::salelock::max_rendered_len;
use crate::salelock::terms::{
    TermsLimits, DEFAULT_MAX_ASSET_ID_LEN, DEFAULT_MAX_ITEM_METADATA_LEN,
};
use crate::unlock::{max_purchase_unlock_len, CANCEL_UNLOCK_MAX_LEN};

/// Default safety margin added to a measured unlocking script length
pub const DEFAULT_UNLOCK_LENGTH_BUFFER: usize = 40;

/// Default length reserved for a purchase unlock before it can be measured
pub const DEFAULT_PURCHASE_PLACEHOLDER_LEN: usize = 4096;

/// Default number of submissions of one signed transaction
pub const DEFAULT_MAX_BROADCAST_ATTEMPTS: u32 = 3;

/// Default pause between transient broadcast failures
pub const DEFAULT_BROADCAST_RETRY_DELAY_MS: u64 = 500;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Marketplace configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Version byte used when addresses are rebuilt from scripts
    pub address_version: u8,
    /// Bytes added to each measured purchase unlock length
    pub unlock_length_buffer: usize,
    /// Length reserved for each purchase unlock in the first pass
    pub purchase_unlock_placeholder_len: usize,
    /// Whether the signing service may shuffle outputs; must stay false
    pub randomize_outputs: bool,
    /// Longest asset id accepted in sale terms
    pub max_asset_id_len: usize,
    /// Largest item metadata accepted in sale terms
    pub max_item_metadata_len: usize,
    /// Submissions of one signed transaction before a transient failure is
    /// returned to the caller
    pub max_broadcast_attempts: u32,
    /// Pause between submissions after a transient failure
    pub broadcast_retry_delay_ms: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            address_version: MAINNET_ADDRESS_VERSION,
            unlock_length_buffer: DEFAULT_UNLOCK_LENGTH_BUFFER,
            purchase_unlock_placeholder_len: DEFAULT_PURCHASE_PLACEHOLDER_LEN,
            randomize_outputs: false,
            max_asset_id_len: DEFAULT_MAX_ASSET_ID_LEN,
            max_item_metadata_len: DEFAULT_MAX_ITEM_METADATA_LEN,
            max_broadcast_attempts: DEFAULT_MAX_BROADCAST_ATTEMPTS,
            broadcast_retry_delay_ms: DEFAULT_BROADCAST_RETRY_DELAY_MS,
        }
    }
}

impl MarketConfig {
    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = fs::File::open(path.as_ref())?;
        let config: MarketConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        log::debug!("Loaded market config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Write configuration as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let file = fs::File::create(path.as_ref())?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Reject settings the transaction builder cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.randomize_outputs {
            return Err(ConfigError::Invalid(
                "output randomization is not supported: sale-lock outputs are positional"
                    .to_string(),
            ));
        }
        if self.purchase_unlock_placeholder_len <= CANCEL_UNLOCK_MAX_LEN {
            return Err(ConfigError::Invalid(format!(
                "purchase unlock placeholder ({}) must exceed {} bytes",
                self.purchase_unlock_placeholder_len, CANCEL_UNLOCK_MAX_LEN
            )));
        }
        if self.max_broadcast_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_broadcast_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_asset_id_len == 0 {
            return Err(ConfigError::Invalid(
                "max_asset_id_len must be positive".to_string(),
            ));
        }

        // Listings at the limits must stay spendable through both branches
        let lock_len = max_rendered_len(&self.terms_limits());
        if lock_len > MAX_SCRIPT_SIZE {
            return Err(ConfigError::Invalid(format!(
                "terms limits allow {} byte sale-locks, over the {} byte script limit",
                lock_len, MAX_SCRIPT_SIZE
            )));
        }
        let change = TransactionOutput::new(0, Script::p2pkh(&[0; 20])).size();
        let unlock_len = max_purchase_unlock_len(lock_len, change);
        if unlock_len > MAX_SCRIPT_SIZE {
            return Err(ConfigError::Invalid(format!(
                "terms limits allow {} byte purchase unlocks, over the {} byte script limit",
                unlock_len, MAX_SCRIPT_SIZE
            )));
        }
        if unlock_len > self.purchase_unlock_placeholder_len {
            return Err(ConfigError::Invalid(format!(
                "purchase unlock placeholder ({}) is below the {} bytes the terms limits allow",
                self.purchase_unlock_placeholder_len, unlock_len
            )));
        }
        Ok(())
    }

    /// Pause between broadcast retries
    pub fn broadcast_retry_delay(&self) -> Duration {
        Duration::from_millis(self.broadcast_retry_delay_ms)
    }

    /// Bounds applied to sale terms
    pub fn terms_limits(&self) -> TermsLimits {
        TermsLimits {
            max_asset_id_len: self.max_asset_id_len,
            max_item_metadata_len: self.max_item_metadata_len,
        }
    }
}
