//! Purchase-branch unlocking for sale-locks
//!
//! `<buyer_pkh> <payment_value> <trailing_outputs> <preimage> <push_tx_sig> OP_0`
//!
//! The preimage covers the whole output list, so the script can only be built
//! once the transaction is laid out and its length depends on it. Anyone may
//! produce it: the push-tx key is public, and the locking script only checks
//! that the outputs have the required shape.

use super::{UnlockError, UnlockingTemplate};
use crate::core::{
    preimage_for_input, push_data_len, serialize_outputs, varint_len, OpCode, Script,
    ScriptError, SigHashType, Transaction, NOMINAL_ITEM_VALUE,
};
use crate::crypto::{double_sha256, MAX_DER_SIGNATURE_LEN};

/// Preimage bytes other than the script code and its length prefix
const PREIMAGE_FIXED_LEN: usize = 156;

/// Longest payment value as a script number
const MAX_PAYMENT_NUM_LEN: usize = 9;

/// Longest purchase unlock for a sale-lock of `lock_len` bytes, with
/// `trailing_len` bytes of serialized outputs after the payment
pub fn max_purchase_unlock_len(lock_len: usize, trailing_len: usize) -> usize {
    let preimage = PREIMAGE_FIXED_LEN
        .saturating_add(varint_len(lock_len as u64))
        .saturating_add(lock_len);
    push_data_len(20)
        + push_data_len(MAX_PAYMENT_NUM_LEN)
        + push_data_len(trailing_len)
        + push_data_len(MAX_DER_SIGNATURE_LEN + 1)
        + 1
        + push_data_len(preimage)
}
use crate::salelock::{self, SaleTerms};

/// Buys a listed item under known terms
#[derive(Debug, Clone)]
pub struct PurchaseUnlock {
    terms: SaleTerms,
}

impl PurchaseUnlock {
    pub fn new(terms: SaleTerms) -> Self {
        Self { terms }
    }

    pub fn terms(&self) -> &SaleTerms {
        &self.terms
    }

    /// Check outputs 0 and 1 have the shape the locking script demands,
    /// returning the buyer's key hash and the payment
    fn check_shape(&self, tx: &Transaction) -> Result<([u8; 20], u64), UnlockError> {
        let item = tx.outputs.first().ok_or_else(|| UnlockError::InvalidShape {
            index: 0,
            reason: "missing item output".to_string(),
        })?;
        if item.value != NOMINAL_ITEM_VALUE {
            return Err(UnlockError::InvalidShape {
                index: 0,
                reason: format!(
                    "item output carries {} instead of {}",
                    item.value, NOMINAL_ITEM_VALUE
                ),
            });
        }
        let buyer_pkh = item
            .locking_script
            .p2pkh_hash()
            .ok_or_else(|| UnlockError::InvalidShape {
                index: 0,
                reason: "item output is not pay-to-key".to_string(),
            })?;

        let payment = tx.outputs.get(1).ok_or_else(|| UnlockError::InvalidShape {
            index: 1,
            reason: "missing payment output".to_string(),
        })?;
        if payment.locking_script.p2pkh_hash() != Some(*self.terms.payee.pubkey_hash()) {
            return Err(UnlockError::InvalidShape {
                index: 1,
                reason: "payment output does not pay the payee".to_string(),
            });
        }
        if payment.value < self.terms.price {
            return Err(UnlockError::Underpayment {
                paid: payment.value,
                price: self.terms.price,
            });
        }

        Ok((buyer_pkh, payment.value))
    }
}

impl UnlockingTemplate for PurchaseUnlock {
    fn sign(&self, tx: &Transaction, input_index: usize) -> Result<Script, UnlockError> {
        let source = tx.source_output(input_index)?;
        if source.locking_script != salelock::render(&self.terms) {
            return Err(ScriptError::NotSaleLock(
                "spent output is not locked by these terms".to_string(),
            )
            .into());
        }

        let (buyer_pkh, payment_value) = self.check_shape(tx)?;
        let trailing = serialize_outputs(&tx.outputs[2..]);
        let preimage = preimage_for_input(tx, input_index, SigHashType::PURCHASE)?;

        let mut signature = salelock::push_tx_key()?.sign(&double_sha256(&preimage));
        signature.push(SigHashType::PURCHASE.as_byte());

        let mut script = Script::new();
        script
            .push_data(&buyer_pkh)
            .push_int(payment_value as i64)
            .push_data(&trailing)
            .push_data(&preimage)
            .push_data(&signature)
            .push_opcode(OpCode::Op0);
        Ok(script)
    }

    fn estimate_length(&self, tx: &Transaction, input_index: usize) -> Result<usize, UnlockError> {
        Ok(self.sign(tx, input_index)?.len())
    }

    fn fixed_length(&self) -> Option<usize> {
        None
    }
}
