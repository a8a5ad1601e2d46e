//! Cancel-branch unlocking for sale-locks: `<sig> <pubkey> OP_1`

use super::{sign_input, UnlockError, UnlockingTemplate};
use crate::core::{OpCode, Script, SigHashType, Transaction};
use crate::crypto::{KeyPair, COMPRESSED_PUBKEY_LEN, MAX_DER_SIGNATURE_LEN};
use crate::salelock;

/// Largest cancel unlocking script: a plain-key unlock plus the branch selector
pub const CANCEL_UNLOCK_MAX_LEN: usize =
    1 + MAX_DER_SIGNATURE_LEN + 1 + 1 + COMPRESSED_PUBKEY_LEN + 1;

/// Withdraws a listing with the cancel authority's key
#[derive(Debug, Clone)]
pub struct CancelUnlock {
    key: KeyPair,
}

impl CancelUnlock {
    pub fn new(key: KeyPair) -> Self {
        Self { key }
    }
}

impl UnlockingTemplate for CancelUnlock {
    fn sign(&self, tx: &Transaction, input_index: usize) -> Result<Script, UnlockError> {
        let source = tx.source_output(input_index)?;
        let terms = salelock::parse(&source.locking_script, 0)?;
        if *terms.cancel_authority.pubkey_hash() != self.key.pubkey_hash() {
            return Err(UnlockError::WrongKey);
        }

        let signature = sign_input(tx, input_index, &self.key, SigHashType::STANDARD)?;
        let mut script = Script::new();
        script
            .push_data(&signature)
            .push_data(&self.key.public_key_bytes())
            .push_opcode(OpCode::Op1);
        Ok(script)
    }

    fn estimate_length(&self, _tx: &Transaction, _input_index: usize) -> Result<usize, UnlockError> {
        Ok(CANCEL_UNLOCK_MAX_LEN)
    }

    fn fixed_length(&self) -> Option<usize> {
        Some(CANCEL_UNLOCK_MAX_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{verify_input, TransactionBuilder, NOMINAL_ITEM_VALUE};
    use crate::salelock::{render, spend_path, SaleTerms, SpendPath};
    use crate::unlock::test_support::source_with;

    fn listing_source(seller: &KeyPair) -> std::sync::Arc<Transaction> {
        let terms = SaleTerms::new(seller.address(), seller.address(), 1000, vec![1, 2, 3], "a1");
        source_with(NOMINAL_ITEM_VALUE, render(&terms))
    }

    #[test]
    fn test_cancel_unlock_verifies() {
        let seller = KeyPair::generate();
        let mut tx = TransactionBuilder::new()
            .add_input_from(listing_source(&seller), 0)
            .add_output(NOMINAL_ITEM_VALUE, Script::p2pkh(&seller.pubkey_hash()))
            .build();

        let script = CancelUnlock::new(seller).sign(&tx, 0).unwrap();
        assert!(script.len() <= CANCEL_UNLOCK_MAX_LEN);
        assert_eq!(CANCEL_UNLOCK_MAX_LEN, 109);
        assert_eq!(spend_path(&script), Some(SpendPath::Cancel));

        tx.inputs[0].unlocking_script = script;
        verify_input(&tx, 0).unwrap();
    }

    #[test]
    fn test_cancel_requires_authority() {
        let seller = KeyPair::generate();
        let tx = TransactionBuilder::new()
            .add_input_from(listing_source(&seller), 0)
            .add_output(NOMINAL_ITEM_VALUE, Script::p2pkh(&[1u8; 20]))
            .build();
        assert!(matches!(
            CancelUnlock::new(KeyPair::generate()).sign(&tx, 0),
            Err(UnlockError::WrongKey)
        ));
    }

    #[test]
    fn test_forged_cancel_fails_on_chain() {
        // A signature from another key with the selector set still fails
        let seller = KeyPair::generate();
        let thief = KeyPair::generate();
        let mut tx = TransactionBuilder::new()
            .add_input_from(listing_source(&seller), 0)
            .add_output(NOMINAL_ITEM_VALUE, Script::p2pkh(&thief.pubkey_hash()))
            .build();

        let signature = sign_input(&tx, 0, &thief, SigHashType::STANDARD).unwrap();
        let mut forged = Script::new();
        forged
            .push_data(&signature)
            .push_data(&thief.public_key_bytes())
            .push_opcode(OpCode::Op1);
        tx.inputs[0].unlocking_script = forged;
        assert!(verify_input(&tx, 0).is_err());
    }
}
