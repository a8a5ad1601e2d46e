//! Core transaction components
//!
//! This module contains the chain-level building blocks:
//! - Transactions (UTXO model, byte-exact wire format, output references)
//! - Scripts (minimal push encoding, script numbers, disassembly)
//! - Signature hashing (FORKID preimages, ANYONECANPAY)
//! - Script interpreter (pay-to-key and the output covenant)
//! - Fee accounting

pub mod fee;
pub mod interpreter;
pub mod opcodes;
pub mod script;
pub mod sighash;
pub mod transaction;

pub use fee::{estimate_size, input_size, FeeRate, DEFAULT_FEE_RATE, DUST_LIMIT};
pub use interpreter::{
    cast_to_bool, verify_input, verify_spend, Interpreter, SpendContext, MAX_SCRIPT_SIZE,
    MAX_STACK_SIZE,
};
pub use opcodes::OpCode;
pub use script::{
    decode_script_num, encode_script_num, push_data_len, Chunk, Script, ScriptError,
    P2PKH_SCRIPT_LEN,
};
pub use sighash::{
    preimage, preimage_for_input, preimage_hash_outputs, preimage_sighash_type, signature_hash,
    BaseSigHash, SigHashType,
};
pub use transaction::{
    serialize_outputs, varint_len, write_varint, OutputReference, Transaction, TransactionBuilder,
    TransactionError, TransactionInput, TransactionOutput, TxId, NOMINAL_ITEM_VALUE,
    SEQUENCE_FINAL, TX_VERSION,
};
