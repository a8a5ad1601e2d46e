//! Sale-lock contract
//!
//! Sale terms and the locking script that enforces them.

pub mod script;
pub mod terms;

pub use script::{
    is_salelock, max_rendered_len, parse, push_tx_key, render, spend_path, SpendPath, PUSH_TX_PUBKEY, SALELOCK_TAG,
    SALELOCK_VERSION,
};
pub use terms::{SaleTerms, TermsError, TermsLimits, MAX_PRICE};
