//! Unlocking script templates
//!
//! A template knows how to produce the unlocking script for one input once
//! the transaction is laid out, and how long that script will be, so fees can
//! be computed before signing.
//!
//! Templates read the spent output (value and locking script) from the source
//! transaction attached to the input.

pub mod cancel;
pub mod p2pkh;
pub mod purchase;

use thiserror::Error;

use crate::core::{
    preimage_for_input, Script, ScriptError, SigHashType, Transaction, TransactionError,
};
use crate::crypto::{double_sha256, KeyError, KeyPair};

pub use cancel::{CancelUnlock, CANCEL_UNLOCK_MAX_LEN};
pub use p2pkh::{P2pkhUnlock, P2PKH_UNLOCK_MAX_LEN};
pub use purchase::{max_purchase_unlock_len, PurchaseUnlock};

/// Errors raised while producing unlocking scripts
#[derive(Error, Debug)]
pub enum UnlockError {
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),
    #[error("Output {index}: {reason}")]
    InvalidShape { index: usize, reason: String },
    #[error("Payment of {paid} is below the price of {price}")]
    Underpayment { paid: u64, price: u64 },
    #[error("Key does not match the spent output")]
    WrongKey,
}

/// Produces the unlocking script for one input
pub trait UnlockingTemplate {
    /// Build the unlocking script for `input_index` of `tx`
    fn sign(&self, tx: &Transaction, input_index: usize) -> Result<Script, UnlockError>;

    /// Length in bytes of the script `sign` will produce
    fn estimate_length(&self, tx: &Transaction, input_index: usize)
        -> Result<usize, UnlockError>;

    /// Upper bound known without looking at the transaction, if any
    fn fixed_length(&self) -> Option<usize>;
}

/// The templates a marketplace transaction uses
#[derive(Debug, Clone)]
pub enum UnlockTemplate {
    Cancel(CancelUnlock),
    Purchase(PurchaseUnlock),
    PlainKey(P2pkhUnlock),
}

impl UnlockTemplate {
    /// Whether the script length depends on the transaction
    pub fn is_variable_length(&self) -> bool {
        self.fixed_length().is_none()
    }
}

impl UnlockingTemplate for UnlockTemplate {
    fn sign(&self, tx: &Transaction, input_index: usize) -> Result<Script, UnlockError> {
        match self {
            UnlockTemplate::Cancel(t) => t.sign(tx, input_index),
            UnlockTemplate::Purchase(t) => t.sign(tx, input_index),
            UnlockTemplate::PlainKey(t) => t.sign(tx, input_index),
        }
    }

    fn estimate_length(
        &self,
        tx: &Transaction,
        input_index: usize,
    ) -> Result<usize, UnlockError> {
        match self {
            UnlockTemplate::Cancel(t) => t.estimate_length(tx, input_index),
            UnlockTemplate::Purchase(t) => t.estimate_length(tx, input_index),
            UnlockTemplate::PlainKey(t) => t.estimate_length(tx, input_index),
        }
    }

    fn fixed_length(&self) -> Option<usize> {
        match self {
            UnlockTemplate::Cancel(t) => t.fixed_length(),
            UnlockTemplate::Purchase(t) => t.fixed_length(),
            UnlockTemplate::PlainKey(t) => t.fixed_length(),
        }
    }
}

impl From<CancelUnlock> for UnlockTemplate {
    fn from(t: CancelUnlock) -> Self {
        UnlockTemplate::Cancel(t)
    }
}

impl From<PurchaseUnlock> for UnlockTemplate {
    fn from(t: PurchaseUnlock) -> Self {
        UnlockTemplate::Purchase(t)
    }
}

impl From<P2pkhUnlock> for UnlockTemplate {
    fn from(t: P2pkhUnlock) -> Self {
        UnlockTemplate::PlainKey(t)
    }
}

/// Sign an input with `key`, returning the DER signature with its sighash byte
pub(crate) fn sign_input(
    tx: &Transaction,
    input_index: usize,
    key: &KeyPair,
    sighash: SigHashType,
) -> Result<Vec<u8>, UnlockError> {
    let preimage = preimage_for_input(tx, input_index, sighash)?;
    let mut signature = key.sign(&double_sha256(&preimage));
    signature.push(sighash.as_byte());
    Ok(signature)
}
