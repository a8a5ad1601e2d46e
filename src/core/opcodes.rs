//! Script opcodes
//!
//! Defines the instruction set understood by the script interpreter.
//! Data pushes of 1-75 bytes use the length itself as the opcode and are
//! not listed here.

use serde::{Deserialize, Serialize};

/// Largest length that can be pushed with a single direct-length opcode
pub const MAX_DIRECT_PUSH: usize = 0x4b;

/// Opcodes for the script interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpCode {
    // Constants
    /// Push an empty byte vector (false)
    Op0 = 0x00,
    /// Next byte is the push length
    PushData1 = 0x4c,
    /// Next two bytes (LE) are the push length
    PushData2 = 0x4d,
    /// Next four bytes (LE) are the push length
    PushData4 = 0x4e,
    /// Push -1
    Op1Negate = 0x4f,
    /// Push 1 (true)
    Op1 = 0x51,
    Op2 = 0x52,
    Op3 = 0x53,
    Op4 = 0x54,
    Op5 = 0x55,
    Op6 = 0x56,
    Op7 = 0x57,
    Op8 = 0x58,
    Op9 = 0x59,
    Op10 = 0x5a,
    Op11 = 0x5b,
    Op12 = 0x5c,
    Op13 = 0x5d,
    Op14 = 0x5e,
    Op15 = 0x5f,
    Op16 = 0x60,

    // Flow control
    Nop = 0x61,
    If = 0x63,
    NotIf = 0x64,
    Else = 0x67,
    EndIf = 0x68,
    /// Fail unless top of stack is true (consumes it)
    Verify = 0x69,
    /// Mark output provably unspendable
    Return = 0x6a,

    // Stack
    TwoDrop = 0x6d,
    Drop = 0x75,
    Dup = 0x76,
    Swap = 0x7c,

    // Comparison
    Equal = 0x87,
    EqualVerify = 0x88,

    // Crypto
    Sha256 = 0xa8,
    Hash160 = 0xa9,
    Hash256 = 0xaa,
    CheckSig = 0xac,
    CheckSigVerify = 0xad,

    /// Output covenant check for sale-lock purchases (occupies the NOP10 slot)
    CheckOutputsVerify = 0xb9,
}

impl OpCode {
    /// Convert byte to opcode
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(OpCode::Op0),
            0x4c => Some(OpCode::PushData1),
            0x4d => Some(OpCode::PushData2),
            0x4e => Some(OpCode::PushData4),
            0x4f => Some(OpCode::Op1Negate),
            0x51 => Some(OpCode::Op1),
            0x52 => Some(OpCode::Op2),
            0x53 => Some(OpCode::Op3),
            0x54 => Some(OpCode::Op4),
            0x55 => Some(OpCode::Op5),
            0x56 => Some(OpCode::Op6),
            0x57 => Some(OpCode::Op7),
            0x58 => Some(OpCode::Op8),
            0x59 => Some(OpCode::Op9),
            0x5a => Some(OpCode::Op10),
            0x5b => Some(OpCode::Op11),
            0x5c => Some(OpCode::Op12),
            0x5d => Some(OpCode::Op13),
            0x5e => Some(OpCode::Op14),
            0x5f => Some(OpCode::Op15),
            0x60 => Some(OpCode::Op16),
            0x61 => Some(OpCode::Nop),
            0x63 => Some(OpCode::If),
            0x64 => Some(OpCode::NotIf),
            0x67 => Some(OpCode::Else),
            0x68 => Some(OpCode::EndIf),
            0x69 => Some(OpCode::Verify),
            0x6a => Some(OpCode::Return),
            0x6d => Some(OpCode::TwoDrop),
            0x75 => Some(OpCode::Drop),
            0x76 => Some(OpCode::Dup),
            0x7c => Some(OpCode::Swap),
            0x87 => Some(OpCode::Equal),
            0x88 => Some(OpCode::EqualVerify),
            0xa8 => Some(OpCode::Sha256),
            0xa9 => Some(OpCode::Hash160),
            0xaa => Some(OpCode::Hash256),
            0xac => Some(OpCode::CheckSig),
            0xad => Some(OpCode::CheckSigVerify),
            0xb9 => Some(OpCode::CheckOutputsVerify),
            _ => None,
        }
    }

    /// Small integer opcode (OP_1..OP_16) for `n`
    pub fn small_int(n: u8) -> Option<Self> {
        match n {
            1..=16 => Self::from_byte(0x50 + n),
            _ => None,
        }
    }

    /// Value pushed by OP_1NEGATE and OP_1..OP_16
    pub fn small_int_value(&self) -> Option<i64> {
        match *self as u8 {
            0x4f => Some(-1),
            b @ 0x51..=0x60 => Some((b - 0x50) as i64),
            _ => None,
        }
    }

    /// Whether this opcode only pushes data
    pub fn is_push(&self) -> bool {
        (*self as u8) <= 0x60 && *self as u8 != 0x50
    }

    /// Get opcode name for disassembly
    pub fn name(&self) -> &'static str {
        match self {
            OpCode::Op0 => "OP_0",
            OpCode::PushData1 => "OP_PUSHDATA1",
            OpCode::PushData2 => "OP_PUSHDATA2",
            OpCode::PushData4 => "OP_PUSHDATA4",
            OpCode::Op1Negate => "OP_1NEGATE",
            OpCode::Op1 => "OP_1",
            OpCode::Op2 => "OP_2",
            OpCode::Op3 => "OP_3",
            OpCode::Op4 => "OP_4",
            OpCode::Op5 => "OP_5",
            OpCode::Op6 => "OP_6",
            OpCode::Op7 => "OP_7",
            OpCode::Op8 => "OP_8",
            OpCode::Op9 => "OP_9",
            OpCode::Op10 => "OP_10",
            OpCode::Op11 => "OP_11",
            OpCode::Op12 => "OP_12",
            OpCode::Op13 => "OP_13",
            OpCode::Op14 => "OP_14",
            OpCode::Op15 => "OP_15",
            OpCode::Op16 => "OP_16",
            OpCode::Nop => "OP_NOP",
            OpCode::If => "OP_IF",
            OpCode::NotIf => "OP_NOTIF",
            OpCode::Else => "OP_ELSE",
            OpCode::EndIf => "OP_ENDIF",
            OpCode::Verify => "OP_VERIFY",
            OpCode::Return => "OP_RETURN",
            OpCode::TwoDrop => "OP_2DROP",
            OpCode::Drop => "OP_DROP",
            OpCode::Dup => "OP_DUP",
            OpCode::Swap => "OP_SWAP",
            OpCode::Equal => "OP_EQUAL",
            OpCode::EqualVerify => "OP_EQUALVERIFY",
            OpCode::Sha256 => "OP_SHA256",
            OpCode::Hash160 => "OP_HASH160",
            OpCode::Hash256 => "OP_HASH256",
            OpCode::CheckSig => "OP_CHECKSIG",
            OpCode::CheckSigVerify => "OP_CHECKSIGVERIFY",
            OpCode::CheckOutputsVerify => "OP_CHECKOUTPUTSVERIFY",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        let opcodes = [
            OpCode::Op0,
            OpCode::If,
            OpCode::EqualVerify,
            OpCode::CheckSig,
            OpCode::CheckOutputsVerify,
            OpCode::Op16,
        ];

        for op in opcodes {
            assert_eq!(OpCode::from_byte(op as u8), Some(op));
        }
        assert_eq!(OpCode::from_byte(0x50), None);
    }

    #[test]
    fn test_small_ints() {
        assert_eq!(OpCode::small_int(1), Some(OpCode::Op1));
        assert_eq!(OpCode::small_int(16), Some(OpCode::Op16));
        assert_eq!(OpCode::small_int(0), None);
        assert_eq!(OpCode::small_int(17), None);
        assert_eq!(OpCode::Op7.small_int_value(), Some(7));
        assert_eq!(OpCode::Op1Negate.small_int_value(), Some(-1));
        assert_eq!(OpCode::Dup.small_int_value(), None);
    }

    #[test]
    fn test_push_classification() {
        assert!(OpCode::Op0.is_push());
        assert!(OpCode::PushData2.is_push());
        assert!(OpCode::Op16.is_push());
        assert!(!OpCode::Nop.is_push());
        assert!(!OpCode::CheckSig.is_push());
    }
}
