//! Script encoding for output locking conditions
//!
//! A `Script` is the raw byte program attached to outputs (locking) and
//! inputs (unlocking). This module handles minimal push-data encoding,
//! script numbers, chunk parsing and disassembly.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::opcodes::{OpCode, MAX_DIRECT_PUSH};
use crate::crypto::Address;

// =============================================================================
// Script Constants
// =============================================================================

/// Size of a standard pay-to-key locking script
pub const P2PKH_SCRIPT_LEN: usize = 25;

/// Largest script number accepted by the interpreter, in bytes
pub const MAX_SCRIPT_NUM_LEN: usize = 8;

// =============================================================================
// Script Errors
// =============================================================================

/// Script-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Malformed script: {0}")]
    Malformed(String),
    #[error("Script execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Stack underflow")]
    StackUnderflow,
    #[error("Unbalanced conditional")]
    UnbalancedConditional,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Script number overflow: {0} bytes")]
    NumberOverflow(usize),
    #[error("Script too large: {0} bytes")]
    ScriptTooLarge(usize),
    #[error("Not a sale-lock script: {0}")]
    NotSaleLock(String),
}

// =============================================================================
// Script
// =============================================================================

/// A raw script program
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Script(Vec<u8>);

/// One parsed element of a script: an opcode, or a data push with the
/// opcode that introduced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Op(u8),
    Push { opcode: u8, data: Vec<u8> },
}

impl Chunk {
    /// Data carried by this chunk, treating OP_0 as an empty push
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Chunk::Push { data, .. } => Some(data),
            Chunk::Op(0x00) => Some(&[]),
            Chunk::Op(_) => None,
        }
    }

    /// Opcode byte of this chunk
    pub fn opcode(&self) -> u8 {
        match self {
            Chunk::Op(op) => *op,
            Chunk::Push { opcode, .. } => *opcode,
        }
    }

    /// Whether this chunk only pushes data
    pub fn is_push(&self) -> bool {
        match self {
            Chunk::Push { .. } => true,
            Chunk::Op(op) => OpCode::from_byte(*op).map(|o| o.is_push()).unwrap_or(false),
        }
    }

    /// Interpret this chunk as a script number
    pub fn as_number(&self) -> Result<i64, ScriptError> {
        if let Chunk::Op(op) = self {
            if let Some(n) = OpCode::from_byte(*op).and_then(|o| o.small_int_value()) {
                return Ok(n);
            }
        }
        match self.data() {
            Some(data) => decode_script_num(data),
            None => Err(ScriptError::Malformed(format!(
                "expected a number, found opcode 0x{:02x}",
                self.opcode()
            ))),
        }
    }
}

impl Script {
    /// Create an empty script
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Wrap raw script bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Decode a hex-encoded script
    pub fn from_hex(hex_script: &str) -> Result<Self, ScriptError> {
        hex::decode(hex_script)
            .map(Self)
            .map_err(|e| ScriptError::Malformed(format!("invalid hex: {}", e)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Append an opcode
    pub fn push_opcode(&mut self, op: OpCode) -> &mut Self {
        self.0.push(op as u8);
        self
    }

    /// Append a minimally encoded data push
    pub fn push_data(&mut self, data: &[u8]) -> &mut Self {
        let len = data.len();
        if len == 0 {
            self.0.push(OpCode::Op0 as u8);
            return self;
        }
        if len <= MAX_DIRECT_PUSH {
            self.0.push(len as u8);
        } else if len <= 0xff {
            self.0.push(OpCode::PushData1 as u8);
            self.0.push(len as u8);
        } else if len <= 0xffff {
            self.0.push(OpCode::PushData2 as u8);
            self.0.extend_from_slice(&(len as u16).to_le_bytes());
        } else {
            self.0.push(OpCode::PushData4 as u8);
            self.0.extend_from_slice(&(len as u32).to_le_bytes());
        }
        self.0.extend_from_slice(data);
        self
    }

    /// Append a script number, using OP_0/OP_1NEGATE/OP_1..OP_16 where possible
    pub fn push_int(&mut self, n: i64) -> &mut Self {
        match n {
            0 => self.push_opcode(OpCode::Op0),
            -1 => self.push_opcode(OpCode::Op1Negate),
            1..=16 => {
                self.0.push(0x50 + n as u8);
                self
            }
            _ => self.push_data(&encode_script_num(n)),
        }
    }

    /// Standard pay-to-key locking script:
    /// OP_DUP OP_HASH160 <20-byte-hash> OP_EQUALVERIFY OP_CHECKSIG
    pub fn p2pkh(pubkey_hash: &[u8; 20]) -> Self {
        let mut script = Self(Vec::with_capacity(P2PKH_SCRIPT_LEN));
        script
            .push_opcode(OpCode::Dup)
            .push_opcode(OpCode::Hash160)
            .push_data(pubkey_hash)
            .push_opcode(OpCode::EqualVerify)
            .push_opcode(OpCode::CheckSig);
        script
    }

    /// Pay-to-key locking script for an address
    pub fn p2pkh_for(address: &Address) -> Self {
        Self::p2pkh(address.pubkey_hash())
    }

    /// The public key hash if this is a standard pay-to-key script
    pub fn p2pkh_hash(&self) -> Option<[u8; 20]> {
        let b = &self.0;
        if b.len() == P2PKH_SCRIPT_LEN
            && b[0] == OpCode::Dup as u8
            && b[1] == OpCode::Hash160 as u8
            && b[2] == 20
            && b[23] == OpCode::EqualVerify as u8
            && b[24] == OpCode::CheckSig as u8
        {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&b[3..23]);
            Some(hash)
        } else {
            None
        }
    }

    /// Split the script into opcodes and data pushes
    pub fn chunks(&self) -> Result<Vec<Chunk>, ScriptError> {
        let b = &self.0;
        let mut chunks = Vec::new();
        let mut pos = 0;

        while pos < b.len() {
            let opcode = b[pos];
            pos += 1;

            let len = match opcode {
                0x01..=0x4b => opcode as usize,
                0x4c => {
                    let n = *b.get(pos).ok_or_else(|| truncated("OP_PUSHDATA1"))? as usize;
                    pos += 1;
                    n
                }
                0x4d => {
                    let bytes = b.get(pos..pos + 2).ok_or_else(|| truncated("OP_PUSHDATA2"))?;
                    pos += 2;
                    u16::from_le_bytes([bytes[0], bytes[1]]) as usize
                }
                0x4e => {
                    let bytes = b.get(pos..pos + 4).ok_or_else(|| truncated("OP_PUSHDATA4"))?;
                    pos += 4;
                    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
                }
                _ => {
                    chunks.push(Chunk::Op(opcode));
                    continue;
                }
            };

            let data = b
                .get(pos..pos + len)
                .ok_or_else(|| truncated("data push"))?
                .to_vec();
            pos += len;
            chunks.push(Chunk::Push { opcode, data });
        }

        Ok(chunks)
    }

    /// Whether the script consists only of data pushes
    pub fn is_push_only(&self) -> bool {
        self.chunks()
            .map(|chunks| chunks.iter().all(Chunk::is_push))
            .unwrap_or(false)
    }

    /// Human-readable disassembly
    pub fn to_asm(&self) -> String {
        let chunks = match self.chunks() {
            Ok(chunks) => chunks,
            Err(_) => return format!("[error] {}", self.to_hex()),
        };

        chunks
            .iter()
            .map(|chunk| match chunk {
                Chunk::Push { data, .. } => hex::encode(data),
                Chunk::Op(op) => OpCode::from_byte(*op)
                    .map(|o| o.name().to_string())
                    .unwrap_or_else(|| format!("OP_UNKNOWN_0x{:02x}", op)),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn truncated(what: &str) -> ScriptError {
    ScriptError::Malformed(format!("truncated {}", what))
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({})", self.to_hex())
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_asm())
    }
}

impl Serialize for Script {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Script {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Script::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Encoding helpers
// =============================================================================

/// Bytes a push of `len` data bytes occupies, including its length prefix
pub fn push_data_len(len: usize) -> usize {
    match len {
        0 => 1,
        1..=MAX_DIRECT_PUSH => 1 + len,
        0x4c..=0xff => 2 + len,
        0x100..=0xffff => 3 + len,
        _ => 5 + len,
    }
}

/// Minimal little-endian sign-magnitude encoding of a script number
pub fn encode_script_num(n: i64) -> Vec<u8> {
    if n == 0 {
        return Vec::new();
    }

    let negative = n < 0;
    let mut abs = n.unsigned_abs();
    let mut out = Vec::with_capacity(9);
    while abs > 0 {
        out.push((abs & 0xff) as u8);
        abs >>= 8;
    }

    // The top bit carries the sign; add a byte when the magnitude already uses it
    let last = out.len() - 1;
    if out[last] & 0x80 != 0 {
        out.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        out[last] |= 0x80;
    }
    out
}

/// Decode a minimally encoded script number
pub fn decode_script_num(bytes: &[u8]) -> Result<i64, ScriptError> {
    if bytes.is_empty() {
        return Ok(0);
    }
    if bytes.len() > MAX_SCRIPT_NUM_LEN {
        return Err(ScriptError::NumberOverflow(bytes.len()));
    }

    let last = bytes[bytes.len() - 1];
    if last & 0x7f == 0 && (bytes.len() == 1 || bytes[bytes.len() - 2] & 0x80 == 0) {
        return Err(ScriptError::Malformed("non-minimal script number".to_string()));
    }

    let mut value: i64 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        let b = if i == bytes.len() - 1 { byte & 0x7f } else { *byte };
        value |= (b as i64) << (8 * i);
    }
    if last & 0x80 != 0 {
        value = -value;
    }
    Ok(value)
}

// =============================================================================
// Tests
// =============================================================================
