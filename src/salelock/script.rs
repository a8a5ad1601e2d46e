//! Sale-lock locking scripts
//!
//! A sale-lock output can be spent two ways:
//! - **Cancel**: a standard signature by the cancel authority
//! - **Purchase**: anyone, provided the spending transaction pays the item to
//!   a key of their choice at output 0 and at least the price to the payee at
//!   output 1
//!
//! Layout (all pushes minimally encoded):
//!
//! ```text
//! OP_0 OP_IF "salelock" <version> <asset_id> <item_metadata> OP_ENDIF
//! OP_IF
//!     OP_DUP OP_HASH160 <cancel_pkh> OP_EQUALVERIFY OP_CHECKSIG
//! OP_ELSE
//!     <payee_pkh> <price> <push_tx_pubkey> OP_CHECKOUTPUTSVERIFY OP_1
//! OP_ENDIF
//! ```
//!
//! The leading envelope is never executed; it only carries the item data.
//! Rendering is a pure function of the terms, so honest parties produce
//! byte-identical scripts and compare them directly.

use secp256k1::SecretKey;

use super::terms::{SaleTerms, TermsLimits, MAX_PRICE};
use crate::core::{push_data_len, Chunk, OpCode, Script, ScriptError};
use crate::crypto::{Address, KeyError, KeyPair};

/// Envelope tag identifying sale-lock scripts
pub const SALELOCK_TAG: &[u8] = b"salelock";

/// Layout version carried in the envelope
pub const SALELOCK_VERSION: i64 = 1;

/// Compressed public key of the push-tx key (the generator point, secret 1)
pub const PUSH_TX_PUBKEY: [u8; 33] = [
    0x02, 0x79, 0xbe, 0x66, 0x7e, 0xf9, 0xdc, 0xbb, 0xac, 0x55, 0xa0, 0x62, 0x95, 0xce, 0x87,
    0x0b, 0x07, 0x02, 0x9b, 0xfc, 0xdb, 0x2d, 0xce, 0x28, 0xd9, 0x59, 0xf2, 0x81, 0x5b, 0x16,
    0xf8, 0x17, 0x98,
];

const PUSH_TX_SECRET: [u8; 32] = {
    let mut secret = [0u8; 32];
    secret[31] = 1;
    secret
};

/// The publicly known key whose signature proves a pushed preimage is real
pub fn push_tx_key() -> Result<KeyPair, KeyError> {
    let secret = SecretKey::from_slice(&PUSH_TX_SECRET)?;
    Ok(KeyPair::from_secret_key(secret))
}

/// Which branch of a sale-lock an unlocking script takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendPath {
    Cancel,
    Purchase,
}

/// Render the locking script for `terms`
pub fn render(terms: &SaleTerms) -> Script {
    let mut script = Script::new();
    script
        .push_opcode(OpCode::Op0)
        .push_opcode(OpCode::If)
        .push_data(SALELOCK_TAG)
        .push_int(SALELOCK_VERSION)
        .push_data(terms.asset_id.as_bytes())
        .push_data(&terms.item_metadata)
        .push_opcode(OpCode::EndIf);

    script
        .push_opcode(OpCode::If)
        .push_opcode(OpCode::Dup)
        .push_opcode(OpCode::Hash160)
        .push_data(terms.cancel_authority.pubkey_hash())
        .push_opcode(OpCode::EqualVerify)
        .push_opcode(OpCode::CheckSig)
        .push_opcode(OpCode::Else)
        .push_data(terms.payee.pubkey_hash())
        .push_int(terms.price as i64)
        .push_data(&PUSH_TX_PUBKEY)
        .push_opcode(OpCode::CheckOutputsVerify)
        .push_opcode(OpCode::Op1)
        .push_opcode(OpCode::EndIf);

    script
}

/// Longest script `render` produces for terms within `limits`
pub fn max_rendered_len(limits: &TermsLimits) -> usize {
    // Empty asset id and metadata each render as a one-byte OP_0
    let skeleton = SaleTerms::new(
        Address::new(0, [0; 20]),
        Address::new(0, [0; 20]),
        MAX_PRICE,
        Vec::new(),
        "",
    );
    (render(&skeleton).len() - 2)
        .saturating_add(push_data_len(limits.max_asset_id_len))
        .saturating_add(push_data_len(limits.max_item_metadata_len))
}

/// Recover the terms from a sale-lock script
///
/// Addresses are rebuilt with `address_version`. Any script that is not
/// exactly a rendered sale-lock is rejected.
pub fn parse(script: &Script, address_version: u8) -> Result<SaleTerms, ScriptError> {
    let chunks = script.chunks()?;
    if chunks.len() != 20 {
        return Err(not_salelock(format!("{} elements", chunks.len())));
    }

    let expect_op = |i: usize, op: OpCode| -> Result<(), ScriptError> {
        if chunks[i] == Chunk::Op(op as u8) {
            Ok(())
        } else {
            Err(not_salelock(format!("expected {} at {}", op.name(), i)))
        }
    };
    let data = |i: usize| -> Result<&[u8], ScriptError> {
        chunks[i]
            .data()
            .ok_or_else(|| not_salelock(format!("expected data at {}", i)))
    };
    let hash = |i: usize| -> Result<[u8; 20], ScriptError> {
        data(i)?
            .try_into()
            .map_err(|_| not_salelock(format!("expected 20-byte hash at {}", i)))
    };

    expect_op(0, OpCode::Op0)?;
    expect_op(1, OpCode::If)?;
    if data(2)? != SALELOCK_TAG {
        return Err(not_salelock("missing tag".to_string()));
    }
    if chunks[3].as_number()? != SALELOCK_VERSION {
        return Err(not_salelock("unsupported version".to_string()));
    }
    let asset_id = String::from_utf8(data(4)?.to_vec())
        .map_err(|_| not_salelock("asset id is not UTF-8".to_string()))?;
    let item_metadata = data(5)?.to_vec();
    expect_op(6, OpCode::EndIf)?;

    expect_op(7, OpCode::If)?;
    expect_op(8, OpCode::Dup)?;
    expect_op(9, OpCode::Hash160)?;
    let cancel_pkh = hash(10)?;
    expect_op(11, OpCode::EqualVerify)?;
    expect_op(12, OpCode::CheckSig)?;
    expect_op(13, OpCode::Else)?;
    let payee_pkh = hash(14)?;
    let price = chunks[15].as_number()?;
    if data(16)? != &PUSH_TX_PUBKEY[..] {
        return Err(not_salelock("unexpected push-tx key".to_string()));
    }
    expect_op(17, OpCode::CheckOutputsVerify)?;
    expect_op(18, OpCode::Op1)?;
    expect_op(19, OpCode::EndIf)?;

    if price <= 0 {
        return Err(not_salelock("price must be positive".to_string()));
    }

    let terms = SaleTerms::new(
        Address::new(address_version, cancel_pkh),
        Address::new(address_version, payee_pkh),
        price as u64,
        item_metadata,
        asset_id,
    );

    // Reject non-minimal encodings that would render differently
    if render(&terms) != *script {
        return Err(not_salelock("non-canonical encoding".to_string()));
    }
    Ok(terms)
}

/// Whether `script` is a well-formed sale-lock
pub fn is_salelock(script: &Script) -> bool {
    parse(script, 0).is_ok()
}

/// Branch selected by a sale-lock unlocking script, from its final element
pub fn spend_path(unlocking_script: &Script) -> Option<SpendPath> {
    let chunks = unlocking_script.chunks().ok()?;
    match chunks.last()? {
        Chunk::Op(op) if *op == OpCode::Op1 as u8 => Some(SpendPath::Cancel),
        Chunk::Op(op) if *op == OpCode::Op0 as u8 => Some(SpendPath::Purchase),
        _ => None,
    }
}

fn not_salelock(reason: String) -> ScriptError {
    ScriptError::NotSaleLock(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MAINNET_ADDRESS_VERSION;

    fn sample_terms() -> SaleTerms {
        let seller = KeyPair::generate();
        SaleTerms::new(
            seller.address(),
            KeyPair::generate().address(),
            1000,
            b"{\"name\":\"Flame Sword\",\"rarity\":\"epic\"}".to_vec(),
            "item-42",
        )
    }

    #[test]
    fn test_push_tx_key_is_generator() {
        let key = push_tx_key().unwrap();
        assert_eq!(key.public_key_bytes(), PUSH_TX_PUBKEY);
    }

    #[test]
    fn test_render_is_deterministic() {
        let terms = sample_terms();
        assert_eq!(render(&terms), render(&terms.clone()));

        let mut other = terms.clone();
        other.price = 1001;
        assert_ne!(render(&terms), render(&other));
    }

    #[test]
    fn test_max_rendered_len_is_exact_at_limits() {
        let limits = TermsLimits {
            max_asset_id_len: 77,
            max_item_metadata_len: 300,
        };
        let seller = KeyPair::generate();
        let terms = SaleTerms::new(
            seller.address(),
            seller.address(),
            MAX_PRICE,
            vec![0xab; 300],
            "a".repeat(77),
        );
        assert_eq!(render(&terms).len(), max_rendered_len(&limits));

        let mut smaller = terms.clone();
        smaller.price = 1000;
        smaller.item_metadata.truncate(10);
        assert!(render(&smaller).len() < max_rendered_len(&limits));
    }

    #[test]
    fn test_parse_recovers_terms() {
        let terms = sample_terms();
        let script = render(&terms);
        assert_eq!(parse(&script, MAINNET_ADDRESS_VERSION).unwrap(), terms);
        assert!(is_salelock(&script));
        assert!(script.to_asm().contains("OP_CHECKOUTPUTSVERIFY"));
    }

    #[test]
    fn test_parse_small_price_and_empty_metadata() {
        let mut terms = sample_terms();
        terms.price = 5;
        terms.item_metadata.clear();
        let script = render(&terms);
        assert_eq!(parse(&script, MAINNET_ADDRESS_VERSION).unwrap(), terms);
    }

    #[test]
    fn test_parse_rejects_other_scripts() {
        assert!(!is_salelock(&Script::p2pkh(&[1u8; 20])));
        assert!(!is_salelock(&Script::new()));

        let script = render(&sample_terms());
        let mut bytes = script.into_bytes();
        let tag_at = bytes.iter().position(|b| *b == b's').unwrap();
        bytes[tag_at] = b'S';
        assert!(matches!(
            parse(&Script::from_bytes(bytes), 0),
            Err(ScriptError::NotSaleLock(_))
        ));
    }

    #[test]
    fn test_spend_path() {
        let mut cancel = Script::new();
        cancel.push_data(&[1u8; 71]).push_data(&[2u8; 33]).push_int(1);
        assert_eq!(spend_path(&cancel), Some(SpendPath::Cancel));

        let mut purchase = Script::new();
        purchase.push_data(&[3u8; 20]).push_int(0);
        assert_eq!(spend_path(&purchase), Some(SpendPath::Purchase));

        assert_eq!(spend_path(&Script::new()), None);
    }
}
