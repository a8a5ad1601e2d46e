//! Signature hashing
//!
//! Builds the FORKID signature-hash preimage for one input of a transaction.
//! The preimage commits to the previous outputs, sequences, the spent output's
//! script and value, and the new outputs:
//!
//! ```text
//! version(4) | hashPrevouts(32) | hashSequence(32) | outpoint(36)
//! | varint + scriptCode | value(8) | sequence(4) | hashOutputs(32)
//! | locktime(4) | sighash type(4)
//! ```
//!
//! Unlocking scripts are never part of the preimage, which is what lets an
//! unlocking script carry its own input's preimage.

use bitflags::bitflags;

use super::script::Script;
use super::transaction::{serialize_outputs, write_varint, Transaction, TransactionError};
use crate::crypto::double_sha256;

bitflags! {
    /// Signature hash flags
    ///
    /// The low five bits select the base type (ALL, NONE, SINGLE); FORKID and
    /// ANYONECANPAY are modifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SigHashType: u32 {
        const ALL = 0x01;
        const NONE = 0x02;
        const SINGLE = 0x03;
        const FORKID = 0x40;
        const ANYONECANPAY = 0x80;
    }
}

/// Base signature hash type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseSigHash {
    All,
    None,
    Single,
}

/// Mask selecting the base type bits
const BASE_TYPE_MASK: u32 = 0x1f;

/// Length of the fixed preimage tail: hashOutputs + locktime + sighash type
const PREIMAGE_TAIL_LEN: usize = 40;

impl SigHashType {
    /// Flags used to sign plain-key and cancel spends
    pub const STANDARD: Self = Self::from_bits_retain(0x01 | 0x40);

    /// Flags the purchase path commits with: every output, only its own input
    pub const PURCHASE: Self = Self::from_bits_retain(0x01 | 0x40 | 0x80);

    /// Interpret the trailing byte of a signature
    pub fn from_byte(byte: u8) -> Self {
        Self::from_bits_retain(byte as u32)
    }

    /// The byte appended to signatures
    pub fn as_byte(&self) -> u8 {
        self.bits() as u8
    }

    /// Base type, or `None` for an undefined base
    pub fn base(&self) -> Option<BaseSigHash> {
        match self.bits() & BASE_TYPE_MASK {
            0x01 => Some(BaseSigHash::All),
            0x02 => Some(BaseSigHash::None),
            0x03 => Some(BaseSigHash::Single),
            _ => None,
        }
    }

    pub fn anyone_can_pay(&self) -> bool {
        self.contains(Self::ANYONECANPAY)
    }

    pub fn has_fork_id(&self) -> bool {
        self.contains(Self::FORKID)
    }
}

/// Build the signature hash preimage for `input_index`, spending an output
/// locked by `script_code` and worth `value`
pub fn preimage(
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    value: u64,
    sighash: SigHashType,
) -> Result<Vec<u8>, TransactionError> {
    let input = tx
        .inputs
        .get(input_index)
        .ok_or(TransactionError::InputIndexOutOfRange(input_index))?;
    let base = sighash.base().ok_or_else(|| {
        TransactionError::InvalidTransaction(format!(
            "undefined sighash base type 0x{:02x}",
            sighash.bits()
        ))
    })?;

    let hash_prevouts = if sighash.anyone_can_pay() {
        [0u8; 32]
    } else {
        let mut buf = Vec::with_capacity(tx.inputs.len() * 36);
        for i in &tx.inputs {
            buf.extend_from_slice(i.previous_output.txid.as_bytes());
            buf.extend_from_slice(&i.previous_output.index.to_le_bytes());
        }
        double_sha256(&buf)
    };

    let hash_sequence = if sighash.anyone_can_pay() || base != BaseSigHash::All {
        [0u8; 32]
    } else {
        let mut buf = Vec::with_capacity(tx.inputs.len() * 4);
        for i in &tx.inputs {
            buf.extend_from_slice(&i.sequence.to_le_bytes());
        }
        double_sha256(&buf)
    };

    let hash_outputs = match base {
        BaseSigHash::All => double_sha256(&serialize_outputs(&tx.outputs)),
        BaseSigHash::Single if input_index < tx.outputs.len() => {
            double_sha256(&tx.outputs[input_index].to_bytes())
        }
        _ => [0u8; 32],
    };

    let mut buf = Vec::with_capacity(160 + script_code.len());
    buf.extend_from_slice(&tx.version.to_le_bytes());
    buf.extend_from_slice(&hash_prevouts);
    buf.extend_from_slice(&hash_sequence);
    buf.extend_from_slice(input.previous_output.txid.as_bytes());
    buf.extend_from_slice(&input.previous_output.index.to_le_bytes());
    write_varint(&mut buf, script_code.len() as u64);
    buf.extend_from_slice(script_code.as_bytes());
    buf.extend_from_slice(&value.to_le_bytes());
    buf.extend_from_slice(&input.sequence.to_le_bytes());
    buf.extend_from_slice(&hash_outputs);
    buf.extend_from_slice(&tx.locktime.to_le_bytes());
    buf.extend_from_slice(&sighash.bits().to_le_bytes());
    Ok(buf)
}

/// Preimage for an input whose source transaction is attached
pub fn preimage_for_input(
    tx: &Transaction,
    input_index: usize,
    sighash: SigHashType,
) -> Result<Vec<u8>, TransactionError> {
    let source = tx.source_output(input_index)?;
    preimage(tx, input_index, &source.locking_script, source.value, sighash)
}

/// Digest that signatures commit to: double SHA-256 of the preimage
pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    value: u64,
    sighash: SigHashType,
) -> Result<[u8; 32], TransactionError> {
    Ok(double_sha256(&preimage(
        tx,
        input_index,
        script_code,
        value,
        sighash,
    )?))
}

/// hashOutputs field of a preimage
pub fn preimage_hash_outputs(preimage: &[u8]) -> Option<[u8; 32]> {
    let start = preimage.len().checked_sub(PREIMAGE_TAIL_LEN)?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&preimage[start..start + 32]);
    Some(out)
}

/// Sighash type field of a preimage
pub fn preimage_sighash_type(preimage: &[u8]) -> Option<SigHashType> {
    let start = preimage.len().checked_sub(4)?;
    let b = &preimage[start..];
    Some(SigHashType::from_bits_retain(u32::from_le_bytes([
        b[0], b[1], b[2], b[3],
    ])))
}
