//! Salelock: escrow-free sale-lock transactions in Rust
//!
//! This crate builds, signs and validates the transactions that let a player
//! sell a uniquely identified token (an in-game item held in a one-unit
//! output) without a trusted escrow:
//! - Sale-lock locking scripts with a cancel branch and a shape-constrained
//!   purchase branch
//! - Unlocking templates for cancel, purchase and plain pay-to-key inputs
//! - Two-pass transaction building for purchase unlocks whose length depends
//!   on the transaction itself
//! - A sign / finalize / broadcast pipeline against an external wallet
//! - Validation of client-built listings and settlements
//! - Proof bundles with merkle inclusion paths
//!
//! # Example
//!
//! ```rust
//! use salelock::crypto::KeyPair;
//! use salelock::salelock::{parse, render, SaleTerms};
//!
//! let seller = KeyPair::generate();
//! let terms = SaleTerms::new(
//!     seller.address(),
//!     seller.address(),
//!     1_000,
//!     b"{\"name\":\"Sword\"}".to_vec(),
//!     "sword-1",
//! );
//!
//! // Every honest party renders the same bytes
//! let script = render(&terms);
//! assert_eq!(script, render(&terms.clone()));
//! assert_eq!(parse(&script, seller.address().version()).unwrap(), terms);
//! ```

pub mod builder;
pub mod config;
pub mod core;
pub mod crypto;
pub mod devnet;
pub mod error;
pub mod listing;
pub mod market;
pub mod pipeline;
pub mod proof;
pub mod salelock;
pub mod services;
pub mod unlock;
pub mod validator;

// Re-export commonly used types
pub use builder::{BuildPhase, PreparedTransaction, TransactionPlan, TwoPassBuilder};
pub use config::MarketConfig;
pub use self::core::{OutputReference, Script, Transaction, TransactionOutput, TxId, NOMINAL_ITEM_VALUE};
pub use crypto::{Address, KeyPair};
pub use error::{ErrorKind, MarketError};
pub use listing::{ListingRecord, ListingStatus};
pub use market::Marketplace;
pub use pipeline::{AttemptState, Outcome, TransactionAttempt};
pub use proof::{MerklePath, ProofBundle};
pub use self::salelock::{render, SaleTerms, SpendPath};
pub use services::{Broadcaster, OutputResolver, SigningService};
pub use unlock::{CancelUnlock, P2pkhUnlock, PurchaseUnlock, UnlockTemplate, UnlockingTemplate};
pub use validator::{ClientListing, ListingValidator};
