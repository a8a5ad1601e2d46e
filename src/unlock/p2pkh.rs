//! Plain pay-to-key unlocking: `<sig> <pubkey>`

use super::{sign_input, UnlockError, UnlockingTemplate};
use crate::core::{Script, SigHashType, Transaction};
use crate::crypto::{KeyPair, COMPRESSED_PUBKEY_LEN, MAX_DER_SIGNATURE_LEN};

/// Largest plain-key unlocking script: two pushes of a signature with its
/// sighash byte and a compressed key
pub const P2PKH_UNLOCK_MAX_LEN: usize = 1 + MAX_DER_SIGNATURE_LEN + 1 + 1 + COMPRESSED_PUBKEY_LEN;

/// Unlocks a standard pay-to-key output
#[derive(Debug, Clone)]
pub struct P2pkhUnlock {
    key: KeyPair,
    sighash: SigHashType,
}

impl P2pkhUnlock {
    pub fn new(key: KeyPair) -> Self {
        Self {
            key,
            sighash: SigHashType::STANDARD,
        }
    }
}

impl UnlockingTemplate for P2pkhUnlock {
    fn sign(&self, tx: &Transaction, input_index: usize) -> Result<Script, UnlockError> {
        let source = tx.source_output(input_index)?;
        if source.locking_script.p2pkh_hash() != Some(self.key.pubkey_hash()) {
            return Err(UnlockError::WrongKey);
        }

        let signature = sign_input(tx, input_index, &self.key, self.sighash)?;
        let mut script = Script::new();
        script
            .push_data(&signature)
            .push_data(&self.key.public_key_bytes());
        Ok(script)
    }

    fn estimate_length(&self, _tx: &Transaction, _input_index: usize) -> Result<usize, UnlockError> {
        Ok(P2PKH_UNLOCK_MAX_LEN)
    }

    fn fixed_length(&self) -> Option<usize> {
        Some(P2PKH_UNLOCK_MAX_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{verify_input, TransactionBuilder};
    use crate::unlock::test_support::source_with;

    #[test]
    fn test_p2pkh_unlock_verifies() {
        let key = KeyPair::generate();
        let source = source_with(2_000, Script::p2pkh(&key.pubkey_hash()));
        let mut tx = TransactionBuilder::new()
            .add_input_from(source, 0)
            .add_output(1_900, Script::p2pkh(&[4u8; 20]))
            .build();

        let template = P2pkhUnlock::new(key);
        let script = template.sign(&tx, 0).unwrap();
        assert_eq!(P2PKH_UNLOCK_MAX_LEN, 108);
        assert!(script.len() <= template.estimate_length(&tx, 0).unwrap());

        tx.inputs[0].unlocking_script = script;
        verify_input(&tx, 0).unwrap();
    }

    #[test]
    fn test_p2pkh_unlock_refuses_foreign_output() {
        let source = source_with(2_000, Script::p2pkh(&[8u8; 20]));
        let tx = TransactionBuilder::new()
            .add_input_from(source, 0)
            .add_output(1_900, Script::p2pkh(&[4u8; 20]))
            .build();
        assert!(matches!(
            P2pkhUnlock::new(KeyPair::generate()).sign(&tx, 0),
            Err(UnlockError::WrongKey)
        ));
    }
}
