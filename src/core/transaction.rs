//! Transaction handling
//!
//! Implements the byte-exact UTXO transaction format:
//! - Versioned transactions with Bitcoin varint framing
//! - Transaction ids as double SHA-256, displayed byte-reversed
//! - Output references (`txid.index`) naming one spendable unit
//! - Source transactions attached to inputs for signing

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::script::Script;
use crate::crypto::double_sha256;

// =============================================================================
// Constants
// =============================================================================

/// Current transaction version
pub const TX_VERSION: u32 = 1;

/// Sequence number that disables locktime
pub const SEQUENCE_FINAL: u32 = 0xFFFFFFFF;

/// Value of an output that carries an item: one indivisible unit
pub const NOMINAL_ITEM_VALUE: u64 = 1;

/// Fixed bytes of an input besides its unlocking script:
/// txid (32) + index (4) + sequence (4)
pub const INPUT_FIXED_SIZE: usize = 40;

// =============================================================================
// Error Types
// =============================================================================

/// Transaction-related errors
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Invalid transaction id: {0}")]
    InvalidTxId(String),
    #[error("Invalid output reference: {0}")]
    InvalidOutputReference(String),
    #[error("Truncated transaction data")]
    Truncated,
    #[error("Input index {0} out of range")]
    InputIndexOutOfRange(usize),
    #[error("Input {0} has no source transaction attached")]
    MissingSourceOutput(usize),
    #[error("Crypto error: {0}")]
    CryptoError(#[from] crate::crypto::KeyError),
}

// =============================================================================
// Transaction Id
// =============================================================================

/// A 32-byte transaction id, stored in hash byte order
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TxId([u8; 32]);

impl TxId {
    /// Wrap bytes in hash (internal) order
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Bytes in hash (internal) order, as they appear in outpoints
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Display form: byte-reversed hex
    pub fn to_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }

    /// Parse the byte-reversed display form
    pub fn from_hex(s: &str) -> Result<Self, TransactionError> {
        let mut bytes = hex::decode(s).map_err(|e| TransactionError::InvalidTxId(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(TransactionError::InvalidTxId(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        bytes.reverse();
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.to_hex())
    }
}

impl FromStr for TxId {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for TxId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TxId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Output Reference
// =============================================================================

/// Pointer to one spendable output: `(txid, index)`, written `"hex.index"`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputReference {
    pub txid: TxId,
    pub index: u32,
}

impl OutputReference {
    pub fn new(txid: TxId, index: u32) -> Self {
        Self { txid, index }
    }
}

impl fmt::Display for OutputReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.txid, self.index)
    }
}

impl fmt::Debug for OutputReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputReference({})", self)
    }
}

impl FromStr for OutputReference {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid, index) = s
            .split_once('.')
            .ok_or_else(|| TransactionError::InvalidOutputReference(s.to_string()))?;
        let index = index
            .parse::<u32>()
            .map_err(|_| TransactionError::InvalidOutputReference(s.to_string()))?;
        Ok(Self::new(TxId::from_hex(txid)?, index))
    }
}

impl Serialize for OutputReference {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for OutputReference {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Transaction Input
// =============================================================================

/// Transaction input (reference to a previous output)
#[derive(Debug, Clone)]
pub struct TransactionInput {
    /// The output being spent
    pub previous_output: OutputReference,
    /// Proof satisfying the previous output's locking script
    pub unlocking_script: Script,
    /// Sequence number
    pub sequence: u32,
    /// Transaction that created `previous_output`; not part of the wire format
    pub source_transaction: Option<Arc<Transaction>>,
}

impl PartialEq for TransactionInput {
    fn eq(&self, other: &Self) -> bool {
        self.previous_output == other.previous_output
            && self.unlocking_script == other.unlocking_script
            && self.sequence == other.sequence
    }
}

impl Eq for TransactionInput {}

impl TransactionInput {
    /// Unsigned input spending `previous_output`
    pub fn new(previous_output: OutputReference) -> Self {
        Self {
            previous_output,
            unlocking_script: Script::new(),
            sequence: SEQUENCE_FINAL,
            source_transaction: None,
        }
    }

    /// The output this input spends, when the source transaction is attached
    pub fn source_output(&self) -> Option<&TransactionOutput> {
        let source = self.source_transaction.as_ref()?;
        if source.id() != self.previous_output.txid {
            return None;
        }
        source.outputs.get(self.previous_output.index as usize)
    }
}

// =============================================================================
// Transaction Output
// =============================================================================

/// Transaction output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TransactionOutput {
    /// Amount in satoshis
    pub value: u64,
    /// Spending condition
    pub locking_script: Script,
}

impl TransactionOutput {
    pub fn new(value: u64, locking_script: Script) -> Self {
        Self {
            value,
            locking_script,
        }
    }

    /// Append the wire encoding: value (8 LE) + varint length + script
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.value.to_le_bytes());
        write_varint(buf, self.locking_script.len() as u64);
        buf.extend_from_slice(self.locking_script.as_bytes());
    }

    /// Wire encoding of this output alone
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        self.write_to(&mut buf);
        buf
    }

    /// Serialized size in bytes
    pub fn size(&self) -> usize {
        8 + varint_len(self.locking_script.len() as u64) + self.locking_script.len()
    }
}

/// Wire encoding of a run of outputs, without a count prefix
pub fn serialize_outputs(outputs: &[TransactionOutput]) -> Vec<u8> {
    let mut buf = Vec::new();
    for output in outputs {
        output.write_to(&mut buf);
    }
    buf
}

// =============================================================================
// Transaction
// =============================================================================

/// A transaction in wire form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Transaction version
    pub version: u32,
    /// Transaction inputs
    pub inputs: Vec<TransactionInput>,
    /// Transaction outputs
    pub outputs: Vec<TransactionOutput>,
    /// Locktime (0 = always final)
    pub locktime: u32,
}

impl Transaction {
    /// Create a new transaction
    pub fn new(inputs: Vec<TransactionInput>, outputs: Vec<TransactionOutput>) -> Self {
        Self {
            version: TX_VERSION,
            inputs,
            outputs,
            locktime: 0,
        }
    }

    /// Transaction id: double SHA-256 of the wire encoding
    pub fn id(&self) -> TxId {
        TxId::from_bytes(double_sha256(&self.to_bytes()))
    }

    /// Reference to one of this transaction's outputs
    pub fn output_reference(&self, index: u32) -> OutputReference {
        OutputReference::new(self.id(), index)
    }

    /// Wire encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        buf.extend_from_slice(&self.version.to_le_bytes());

        write_varint(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            buf.extend_from_slice(input.previous_output.txid.as_bytes());
            buf.extend_from_slice(&input.previous_output.index.to_le_bytes());
            write_varint(&mut buf, input.unlocking_script.len() as u64);
            buf.extend_from_slice(input.unlocking_script.as_bytes());
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }

        write_varint(&mut buf, self.outputs.len() as u64);
        for output in &self.outputs {
            output.write_to(&mut buf);
        }

        buf.extend_from_slice(&self.locktime.to_le_bytes());
        buf
    }

    /// Parse the wire encoding
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransactionError> {
        let mut reader = Reader::new(bytes);
        let version = reader.read_u32()?;

        let input_count = reader.read_varint()?;
        let mut inputs = Vec::new();
        for _ in 0..input_count {
            let mut txid = [0u8; 32];
            txid.copy_from_slice(reader.read_bytes(32)?);
            let index = reader.read_u32()?;
            let script_len = reader.read_varint()? as usize;
            let unlocking_script = Script::from_bytes(reader.read_bytes(script_len)?.to_vec());
            let sequence = reader.read_u32()?;
            inputs.push(TransactionInput {
                previous_output: OutputReference::new(TxId::from_bytes(txid), index),
                unlocking_script,
                sequence,
                source_transaction: None,
            });
        }

        let output_count = reader.read_varint()?;
        let mut outputs = Vec::new();
        for _ in 0..output_count {
            let value = reader.read_u64()?;
            let script_len = reader.read_varint()? as usize;
            let locking_script = Script::from_bytes(reader.read_bytes(script_len)?.to_vec());
            outputs.push(TransactionOutput::new(value, locking_script));
        }

        let locktime = reader.read_u32()?;
        if !reader.is_empty() {
            return Err(TransactionError::InvalidTransaction(
                "trailing bytes after locktime".to_string(),
            ));
        }

        Ok(Self {
            version,
            inputs,
            outputs,
            locktime,
        })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(raw: &str) -> Result<Self, TransactionError> {
        let bytes =
            hex::decode(raw).map_err(|e| TransactionError::InvalidTransaction(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Serialized size in bytes
    pub fn size(&self) -> usize {
        let inputs: usize = self
            .inputs
            .iter()
            .map(|i| {
                INPUT_FIXED_SIZE
                    + varint_len(i.unlocking_script.len() as u64)
                    + i.unlocking_script.len()
            })
            .sum();
        let outputs: usize = self.outputs.iter().map(TransactionOutput::size).sum();
        8 + varint_len(self.inputs.len() as u64)
            + inputs
            + varint_len(self.outputs.len() as u64)
            + outputs
    }

    /// Get total output amount
    pub fn total_output(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Total input amount, when every input has its source attached
    pub fn total_input(&self) -> Option<u64> {
        self.inputs
            .iter()
            .map(|i| i.source_output().map(|o| o.value))
            .sum()
    }

    /// Position of the input spending `reference`
    pub fn input_spending(&self, reference: &OutputReference) -> Option<usize> {
        self.inputs
            .iter()
            .position(|i| i.previous_output == *reference)
    }

    /// Whether any input spends `reference`
    pub fn spends(&self, reference: &OutputReference) -> bool {
        self.input_spending(reference).is_some()
    }

    /// Attach the source transaction of an input
    pub fn attach_source(
        &mut self,
        input_index: usize,
        source: Arc<Transaction>,
    ) -> Result<(), TransactionError> {
        let input = self
            .inputs
            .get_mut(input_index)
            .ok_or(TransactionError::InputIndexOutOfRange(input_index))?;
        if source.id() != input.previous_output.txid {
            return Err(TransactionError::InvalidTransaction(format!(
                "source {} does not match input {} ({})",
                source.id(),
                input_index,
                input.previous_output
            )));
        }
        input.source_transaction = Some(source);
        Ok(())
    }

    /// The output spent by an input, requiring its source to be attached
    pub fn source_output(&self, input_index: usize) -> Result<&TransactionOutput, TransactionError> {
        self.inputs
            .get(input_index)
            .ok_or(TransactionError::InputIndexOutOfRange(input_index))?
            .source_output()
            .ok_or(TransactionError::MissingSourceOutput(input_index))
    }
}

impl Serialize for Transaction {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Transaction {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Transaction Builder
// =============================================================================

/// Builder for creating transactions with all options
pub struct TransactionBuilder {
    inputs: Vec<TransactionInput>,
    outputs: Vec<TransactionOutput>,
    locktime: u32,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            locktime: 0,
        }
    }

    /// Add an unsigned input
    pub fn add_input(mut self, previous_output: OutputReference) -> Self {
        self.inputs.push(TransactionInput::new(previous_output));
        self
    }

    /// Add an input with its source transaction attached
    pub fn add_input_from(mut self, source: Arc<Transaction>, index: u32) -> Self {
        let mut input = TransactionInput::new(source.output_reference(index));
        input.source_transaction = Some(source);
        self.inputs.push(input);
        self
    }

    /// Add an output
    pub fn add_output(mut self, value: u64, locking_script: Script) -> Self {
        self.outputs.push(TransactionOutput::new(value, locking_script));
        self
    }

    /// Set locktime
    pub fn locktime(mut self, locktime: u32) -> Self {
        self.locktime = locktime;
        self
    }

    pub fn build(self) -> Transaction {
        let mut tx = Transaction::new(self.inputs, self.outputs);
        tx.locktime = self.locktime;
        tx
    }
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Varint framing
// =============================================================================

/// Encode a u64 as a Bitcoin varint
pub fn write_varint(buf: &mut Vec<u8>, n: u64) {
    if n < 0xfd {
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(0xfd);
        buf.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(0xfe);
        buf.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        buf.push(0xff);
        buf.extend_from_slice(&n.to_le_bytes());
    }
}

/// Encoded size of a varint
pub fn varint_len(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x10000..=0xffff_ffff => 5,
        _ => 9,
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], TransactionError> {
        let end = self.pos.checked_add(n).ok_or(TransactionError::Truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or(TransactionError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, TransactionError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, TransactionError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.read_bytes(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn read_varint(&mut self) -> Result<u64, TransactionError> {
        let first = self.read_bytes(1)?[0];
        Ok(match first {
            0xfd => {
                let b = self.read_bytes(2)?;
                u16::from_le_bytes([b[0], b[1]]) as u64
            }
            0xfe => self.read_u32()? as u64,
            0xff => self.read_u64()?,
            n => n as u64,
        })
    }

    fn is_empty(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn funding_tx(value: u64) -> Transaction {
        let kp = KeyPair::generate();
        TransactionBuilder::new()
            .add_input(OutputReference::new(TxId::default(), 0))
            .add_output(value, Script::p2pkh(&kp.pubkey_hash()))
            .build()
    }

    #[test]
    fn test_wire_roundtrip_preserves_id() {
        let source = Arc::new(funding_tx(5_000));
        let mut unlocking = Script::new();
        unlocking.push_data(&[0xab; 71]).push_data(&[0x02; 33]);

        let mut tx = TransactionBuilder::new()
            .add_input_from(source.clone(), 0)
            .add_output(1, Script::p2pkh(&[1u8; 20]))
            .add_output(4_000, Script::p2pkh(&[2u8; 20]))
            .build();
        tx.inputs[0].unlocking_script = unlocking;

        let bytes = tx.to_bytes();
        assert_eq!(bytes.len(), tx.size());

        let parsed = Transaction::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, tx);
        assert_eq!(parsed.id(), tx.id());
        assert!(parsed.inputs[0].source_transaction.is_none());
    }

    #[test]
    fn test_truncated_and_trailing_bytes_rejected() {
        let bytes = funding_tx(10).to_bytes();
        assert!(matches!(
            Transaction::from_bytes(&bytes[..bytes.len() - 1]),
            Err(TransactionError::Truncated)
        ));

        let mut extended = bytes.clone();
        extended.push(0);
        assert!(Transaction::from_bytes(&extended).is_err());
    }

    #[test]
    fn test_txid_display_is_reversed() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xaa;
        let txid = TxId::from_bytes(bytes);
        assert!(txid.to_hex().ends_with("aa"));
        assert_eq!(TxId::from_hex(&txid.to_hex()).unwrap(), txid);
    }

    #[test]
    fn test_output_reference_format() {
        let tx = funding_tx(10);
        let reference = tx.output_reference(3);
        let text = reference.to_string();
        assert_eq!(text, format!("{}.3", tx.id()));
        assert_eq!(text.parse::<OutputReference>().unwrap(), reference);

        assert!("nodot".parse::<OutputReference>().is_err());
        assert!(format!("{}.x", tx.id()).parse::<OutputReference>().is_err());
        assert!("abcd.0".parse::<OutputReference>().is_err());
    }

    #[test]
    fn test_source_output_requires_matching_source() {
        let source = Arc::new(funding_tx(700));
        let mut tx = TransactionBuilder::new()
            .add_input(source.output_reference(0))
            .add_output(600, Script::p2pkh(&[3u8; 20]))
            .build();

        assert!(matches!(
            tx.source_output(0),
            Err(TransactionError::MissingSourceOutput(0))
        ));
        assert!(tx.attach_source(0, Arc::new(funding_tx(1))).is_err());

        tx.attach_source(0, source).unwrap();
        assert_eq!(tx.source_output(0).unwrap().value, 700);
        assert_eq!(tx.total_input(), Some(700));
    }

    #[test]
    fn test_varint_sizes() {
        for n in [0u64, 0xfc, 0xfd, 0xffff, 0x10000, 0xffff_ffff, 0x1_0000_0000] {
            let mut buf = Vec::new();
            write_varint(&mut buf, n);
            assert_eq!(buf.len(), varint_len(n));
        }
    }

    #[test]
    fn test_transaction_serde_as_hex() {
        let tx = funding_tx(42);
        let json = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id(), tx.id());
    }
}
