//! Script interpreter
//!
//! A stack machine that decides whether an unlocking script satisfies a
//! locking script for one input of a transaction. Security limits:
//! - Unlocking scripts must be push-only
//! - Stack depth and script size are bounded
//! - Every conditional must be closed within the script that opened it
//!
//! Besides the usual pay-to-key opcodes it implements the output covenant
//! `OP_CHECKOUTPUTSVERIFY`, which lets a locking script constrain the shape
//! of the outputs of the transaction that spends it.

use secp256k1::PublicKey;

use super::opcodes::OpCode;
use super::script::{decode_script_num, encode_script_num, Chunk, Script, ScriptError};
use super::sighash::{self, BaseSigHash, SigHashType};
use super::transaction::{Transaction, TransactionOutput, NOMINAL_ITEM_VALUE};
use crate::crypto::{double_sha256, hash160, sha256, verify_signature};

// =============================================================================
// Interpreter Constants
// =============================================================================

/// Maximum stack depth
pub const MAX_STACK_SIZE: usize = 1000;

/// Maximum size of a single script
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Items consumed by `OP_CHECKOUTPUTSVERIFY`
pub const CHECK_OUTPUTS_ARITY: usize = 8;

// =============================================================================
// Spend Context
// =============================================================================

/// The input being verified and the output it spends
#[derive(Debug, Clone, Copy)]
pub struct SpendContext<'a> {
    pub tx: &'a Transaction,
    pub input_index: usize,
    pub locking_script: &'a Script,
    pub value: u64,
}

impl<'a> SpendContext<'a> {
    pub fn new(
        tx: &'a Transaction,
        input_index: usize,
        locking_script: &'a Script,
        value: u64,
    ) -> Self {
        Self {
            tx,
            input_index,
            locking_script,
            value,
        }
    }

    fn preimage(&self, sighash: SigHashType) -> Result<Vec<u8>, ScriptError> {
        sighash::preimage(
            self.tx,
            self.input_index,
            self.locking_script,
            self.value,
            sighash,
        )
        .map_err(|e| ScriptError::ExecutionFailed(e.to_string()))
    }
}

// =============================================================================
// Interpreter
// =============================================================================

/// Stack machine evaluating scripts for one input
pub struct Interpreter<'a> {
    /// Data stack
    stack: Vec<Vec<u8>>,
    /// Branch execution flags for open conditionals
    exec: Vec<bool>,
    /// Spend being verified
    context: SpendContext<'a>,
}

impl<'a> Interpreter<'a> {
    /// Create an interpreter with an empty stack
    pub fn new(context: SpendContext<'a>) -> Self {
        Self {
            stack: Vec::with_capacity(16),
            exec: Vec::new(),
            context,
        }
    }

    /// Current stack, bottom first
    pub fn stack(&self) -> &[Vec<u8>] {
        &self.stack
    }

    /// Run a script against the current stack
    pub fn execute(&mut self, script: &Script) -> Result<(), ScriptError> {
        if script.len() > MAX_SCRIPT_SIZE {
            return Err(ScriptError::ScriptTooLarge(script.len()));
        }

        for chunk in script.chunks()? {
            self.step(&chunk)?;
        }

        if !self.exec.is_empty() {
            return Err(ScriptError::UnbalancedConditional);
        }
        Ok(())
    }

    fn executing(&self) -> bool {
        self.exec.iter().all(|b| *b)
    }

    fn step(&mut self, chunk: &Chunk) -> Result<(), ScriptError> {
        let executing = self.executing();

        let opcode = match chunk {
            Chunk::Push { data, .. } => {
                if executing {
                    self.push(data.clone())?;
                }
                return Ok(());
            }
            Chunk::Op(byte) => *byte,
        };

        let op = OpCode::from_byte(opcode);

        // Conditionals are tracked even inside unexecuted branches
        match op {
            Some(OpCode::If) | Some(OpCode::NotIf) => {
                let mut branch = false;
                if executing {
                    let top = self.pop()?;
                    branch = cast_to_bool(&top);
                    if op == Some(OpCode::NotIf) {
                        branch = !branch;
                    }
                }
                self.exec.push(branch);
                return Ok(());
            }
            Some(OpCode::Else) => {
                let last = self
                    .exec
                    .last_mut()
                    .ok_or(ScriptError::UnbalancedConditional)?;
                *last = !*last;
                return Ok(());
            }
            Some(OpCode::EndIf) => {
                self.exec.pop().ok_or(ScriptError::UnbalancedConditional)?;
                return Ok(());
            }
            _ => {}
        }

        if !executing {
            return Ok(());
        }

        let op = op.ok_or_else(|| {
            ScriptError::ExecutionFailed(format!("unknown opcode 0x{:02x}", opcode))
        })?;

        match op {
            OpCode::Op0 => self.push(Vec::new())?,
            OpCode::Op1Negate | OpCode::Op1 | OpCode::Op2 | OpCode::Op3 | OpCode::Op4
            | OpCode::Op5 | OpCode::Op6 | OpCode::Op7 | OpCode::Op8 | OpCode::Op9
            | OpCode::Op10 | OpCode::Op11 | OpCode::Op12 | OpCode::Op13 | OpCode::Op14
            | OpCode::Op15 | OpCode::Op16 => {
                let n = op.small_int_value().unwrap_or_default();
                self.push(encode_script_num(n))?;
            }

            OpCode::Nop => {}
            OpCode::Verify => {
                let top = self.pop()?;
                if !cast_to_bool(&top) {
                    return Err(fail("OP_VERIFY"));
                }
            }
            OpCode::Return => return Err(fail("OP_RETURN")),

            OpCode::TwoDrop => {
                self.pop()?;
                self.pop()?;
            }
            OpCode::Drop => {
                self.pop()?;
            }
            OpCode::Dup => {
                let top = self.stack.last().ok_or(ScriptError::StackUnderflow)?.clone();
                self.push(top)?;
            }
            OpCode::Swap => {
                let a = self.pop()?;
                let b = self.pop()?;
                self.push(a)?;
                self.push(b)?;
            }

            OpCode::Equal | OpCode::EqualVerify => {
                let a = self.pop()?;
                let b = self.pop()?;
                let equal = a == b;
                if op == OpCode::EqualVerify {
                    if !equal {
                        return Err(fail("OP_EQUALVERIFY"));
                    }
                } else {
                    self.push(bool_bytes(equal))?;
                }
            }

            OpCode::Sha256 => {
                let top = self.pop()?;
                self.push(sha256(&top).to_vec())?;
            }
            OpCode::Hash160 => {
                let top = self.pop()?;
                self.push(hash160(&top).to_vec())?;
            }
            OpCode::Hash256 => {
                let top = self.pop()?;
                self.push(double_sha256(&top).to_vec())?;
            }

            OpCode::CheckSig | OpCode::CheckSigVerify => {
                let pubkey = self.pop()?;
                let signature = self.pop()?;
                let valid = self.check_signature(&signature, &pubkey)?;
                if op == OpCode::CheckSigVerify {
                    if !valid {
                        return Err(fail("OP_CHECKSIGVERIFY"));
                    }
                } else {
                    self.push(bool_bytes(valid))?;
                }
            }

            OpCode::CheckOutputsVerify => self.check_outputs()?,

            OpCode::PushData1 | OpCode::PushData2 | OpCode::PushData4 => {
                // Parsed as pushes by `Script::chunks`
                return Err(ScriptError::Malformed("bare push opcode".to_string()));
            }
            OpCode::If | OpCode::NotIf | OpCode::Else | OpCode::EndIf => {}
        }

        Ok(())
    }

    /// Verify a signature with its trailing sighash byte against the spend
    fn check_signature(&self, signature: &[u8], pubkey: &[u8]) -> Result<bool, ScriptError> {
        let Some((&sighash_byte, der)) = signature.split_last() else {
            return Ok(false);
        };
        let sighash = SigHashType::from_byte(sighash_byte);
        if !sighash.has_fork_id() || sighash.base().is_none() {
            return Err(ScriptError::InvalidSignature);
        }

        let pubkey = PublicKey::from_slice(pubkey).map_err(|_| ScriptError::InvalidPublicKey)?;
        let digest = double_sha256(&self.context.preimage(sighash)?);
        verify_signature(&pubkey, &digest, der).map_err(|_| ScriptError::InvalidSignature)
    }

    /// `OP_CHECKOUTPUTSVERIFY`
    ///
    /// Stack, top first: `<pubkey> <price> <payee_pkh> <signature> <preimage>
    /// <trailing_outputs> <payment_value> <buyer_pkh>`. All eight are consumed.
    fn check_outputs(&mut self) -> Result<(), ScriptError> {
        if self.stack.len() < CHECK_OUTPUTS_ARITY {
            return Err(ScriptError::StackUnderflow);
        }
        let pubkey = self.pop()?;
        let price = decode_script_num(&self.pop()?)?;
        let payee_pkh = self.pop()?;
        let signature = self.pop()?;
        let preimage = self.pop()?;
        let trailing_outputs = self.pop()?;
        let payment_value = decode_script_num(&self.pop()?)?;
        let buyer_pkh = self.pop()?;

        // The preimage must be signed by the push-tx key under its own type
        let sighash = sighash::preimage_sighash_type(&preimage)
            .ok_or_else(|| fail("preimage too short"))?;
        if signature.last().copied() != Some(sighash.as_byte()) {
            return Err(fail("signature type differs from preimage type"));
        }
        let pubkey = PublicKey::from_slice(&pubkey).map_err(|_| ScriptError::InvalidPublicKey)?;
        let der = &signature[..signature.len() - 1];
        let digest = double_sha256(&preimage);
        if !verify_signature(&pubkey, &digest, der).map_err(|_| ScriptError::InvalidSignature)? {
            return Err(fail("push-tx signature does not verify"));
        }

        // The preimage must be this input's real preimage
        if sighash.base() != Some(BaseSigHash::All) || !sighash.has_fork_id() {
            return Err(fail("preimage must commit to all outputs"));
        }
        if preimage != self.context.preimage(sighash)? {
            return Err(fail("preimage does not match spending transaction"));
        }

        // The committed outputs must start with item and payment outputs
        let buyer_pkh: [u8; 20] = buyer_pkh
            .as_slice()
            .try_into()
            .map_err(|_| fail("buyer key hash must be 20 bytes"))?;
        let payee_pkh: [u8; 20] = payee_pkh
            .as_slice()
            .try_into()
            .map_err(|_| fail("payee key hash must be 20 bytes"))?;
        if payment_value < 0 {
            return Err(fail("negative payment value"));
        }

        let mut outputs = Vec::new();
        TransactionOutput::new(NOMINAL_ITEM_VALUE, Script::p2pkh(&buyer_pkh))
            .write_to(&mut outputs);
        TransactionOutput::new(payment_value as u64, Script::p2pkh(&payee_pkh))
            .write_to(&mut outputs);
        outputs.extend_from_slice(&trailing_outputs);

        if Some(double_sha256(&outputs)) != sighash::preimage_hash_outputs(&preimage) {
            return Err(fail("outputs do not match the required shape"));
        }

        if price <= 0 || payment_value < price {
            return Err(fail("payment below price"));
        }
        Ok(())
    }

    fn push(&mut self, item: Vec<u8>) -> Result<(), ScriptError> {
        if self.stack.len() >= MAX_STACK_SIZE {
            return Err(ScriptError::ExecutionFailed("stack overflow".to_string()));
        }
        self.stack.push(item);
        Ok(())
    }

    fn pop(&mut self) -> Result<Vec<u8>, ScriptError> {
        self.stack.pop().ok_or(ScriptError::StackUnderflow)
    }
}

fn fail(reason: &str) -> ScriptError {
    ScriptError::ExecutionFailed(reason.to_string())
}

fn bool_bytes(value: bool) -> Vec<u8> {
    if value {
        vec![1]
    } else {
        Vec::new()
    }
}

/// Script truthiness: any non-zero byte, except a lone sign bit at the end
pub fn cast_to_bool(bytes: &[u8]) -> bool {
    for (i, byte) in bytes.iter().enumerate() {
        if *byte != 0 {
            return !(i == bytes.len() - 1 && *byte == 0x80);
        }
    }
    false
}

// =============================================================================
// Verification entry points
// =============================================================================

/// Verify that input `input_index` of `tx` may spend an output locked by
/// `locking_script` holding `value`
pub fn verify_spend(
    tx: &Transaction,
    input_index: usize,
    locking_script: &Script,
    value: u64,
) -> Result<(), ScriptError> {
    let input = tx.inputs.get(input_index).ok_or_else(|| {
        ScriptError::ExecutionFailed(format!("input {} out of range", input_index))
    })?;
    if !input.unlocking_script.is_push_only() {
        return Err(ScriptError::Malformed(
            "unlocking script must be push-only".to_string(),
        ));
    }

    let context = SpendContext::new(tx, input_index, locking_script, value);
    let mut interpreter = Interpreter::new(context);
    interpreter.execute(&input.unlocking_script)?;
    interpreter.execute(locking_script)?;

    match interpreter.stack().last() {
        Some(top) if cast_to_bool(top) => Ok(()),
        _ => Err(fail("script evaluated to false")),
    }
}

/// Verify an input against its attached source output
pub fn verify_input(tx: &Transaction, input_index: usize) -> Result<(), ScriptError> {
    let source = tx
        .source_output(input_index)
        .map_err(|e| ScriptError::ExecutionFailed(e.to_string()))?;
    verify_spend(tx, input_index, &source.locking_script, source.value)
}

// =============================================================================
// Tests
// =============================================================================
