//! Fee accounting
//!
//! Fees are charged per serialized byte. Because unlocking scripts are not
//! known until signing, sizes are estimated from the expected unlocking
//! script length of every input.

use serde::{Deserialize, Serialize};

use super::transaction::{varint_len, TransactionOutput, INPUT_FIXED_SIZE};

// =============================================================================
// Constants
// =============================================================================

/// Default fee rate (sat/kilobyte)
pub const DEFAULT_FEE_RATE: u64 = 500;

/// Outputs below this value are not worth creating as change
pub const DUST_LIMIT: u64 = 1;

// =============================================================================
// Fee Rate
// =============================================================================

/// Fee rate in satoshis per 1000 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeeRate(pub u64);

impl FeeRate {
    /// Create from satoshis per kilobyte
    pub fn from_sat_per_kb(rate: u64) -> Self {
        Self(rate)
    }

    /// Create from total fee and transaction size
    pub fn from_fee_and_size(fee: u64, size_bytes: usize) -> Self {
        if size_bytes == 0 {
            Self(0)
        } else {
            Self(fee * 1000 / size_bytes as u64)
        }
    }

    /// Calculate fee for a given size, rounding up
    pub fn fee_for_size(&self, size_bytes: usize) -> u64 {
        (self.0 * size_bytes as u64).div_ceil(1000)
    }

    /// Get rate as satoshis per kilobyte
    pub fn as_sat_per_kb(&self) -> u64 {
        self.0
    }

    /// Whether `fee` pays for `size_bytes` at this rate
    pub fn is_covered(&self, fee: u64, size_bytes: usize) -> bool {
        fee >= self.fee_for_size(size_bytes)
    }
}

impl Default for FeeRate {
    fn default() -> Self {
        Self(DEFAULT_FEE_RATE)
    }
}

// =============================================================================
// Size Estimation
// =============================================================================

/// Serialized size of an input carrying an unlocking script of `unlock_len`
pub fn input_size(unlock_len: usize) -> usize {
    INPUT_FIXED_SIZE + varint_len(unlock_len as u64) + unlock_len
}

/// Estimated size of a transaction given each input's unlocking script
/// length and the full output list
pub fn estimate_size(unlock_lens: &[usize], outputs: &[TransactionOutput]) -> usize {
    let inputs: usize = unlock_lens.iter().map(|len| input_size(*len)).sum();
    let outputs_size: usize = outputs.iter().map(TransactionOutput::size).sum();
    8 + varint_len(unlock_lens.len() as u64)
        + inputs
        + varint_len(outputs.len() as u64)
        + outputs_size
}
