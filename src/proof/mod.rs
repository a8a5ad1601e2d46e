//! Output validity evidence
//!
//! - Merkle paths proving a transaction is in an accepted block
//! - Proof bundles carrying the ancestry of unconfirmed transactions

pub mod bundle;
pub mod merkle;

pub use bundle::{BundleEntry, BundleError, ProofBundle};
pub use merkle::{merkle_root, ChainTracker, Checkpoints, MerkleNode, MerklePath};
