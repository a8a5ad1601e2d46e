//! Proof bundles
//!
//! A bundle is the self-contained evidence that some outputs are valid: their
//! source transactions, plus every unconfirmed ancestor back to transactions
//! that carry a merkle path. Bundles from unrelated sources are merged by
//! union before a new transaction spending from all of them is built.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::merkle::{ChainTracker, MerklePath};
use crate::core::{OutputReference, Transaction, TxId};

/// Proof bundle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BundleError {
    #[error("Bundle is missing transaction {0}")]
    MissingTransaction(TxId),
    #[error("Bundle transaction has no output {0}")]
    MissingOutput(OutputReference),
    #[error("Unproven transaction {tx} is missing ancestor {ancestor}")]
    MissingAncestor { tx: TxId, ancestor: TxId },
    #[error("Merkle path for {0} does not match an accepted block")]
    InvalidProof(TxId),
}

/// One transaction in a bundle, with its inclusion proof when mined
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleEntry {
    pub tx: Transaction,
    pub proof: Option<MerklePath>,
}

/// Set of transactions and merkle proofs keyed by transaction id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofBundle {
    entries: BTreeMap<TxId, BundleEntry>,
}

impl ProofBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transaction; an existing entry keeps whichever copy has a proof
    pub fn insert(&mut self, tx: Transaction, proof: Option<MerklePath>) {
        let txid = tx.id();
        match self.entries.get_mut(&txid) {
            Some(existing) => {
                if existing.proof.is_none() {
                    existing.proof = proof;
                }
            }
            None => {
                self.entries.insert(txid, BundleEntry { tx, proof });
            }
        }
    }

    /// Union another bundle into this one
    pub fn absorb(&mut self, other: &ProofBundle) {
        for entry in other.entries.values() {
            self.insert(entry.tx.clone(), entry.proof.clone());
        }
    }

    /// Union of any number of bundles
    ///
    /// Associative, commutative and idempotent over the covered transaction
    /// set. A transaction proven in any input stays proven.
    pub fn merge<'a>(bundles: impl IntoIterator<Item = &'a ProofBundle>) -> ProofBundle {
        let mut merged = ProofBundle::new();
        for bundle in bundles {
            merged.absorb(bundle);
        }
        merged
    }

    pub fn get(&self, txid: &TxId) -> Option<&BundleEntry> {
        self.entries.get(txid)
    }

    pub fn transaction(&self, txid: &TxId) -> Option<&Transaction> {
        self.entries.get(txid).map(|e| &e.tx)
    }

    pub fn contains(&self, txid: &TxId) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Transaction ids in the bundle, in ascending order
    pub fn txids(&self) -> impl Iterator<Item = &TxId> {
        self.entries.keys()
    }

    /// Check that every referenced output's source transaction is present,
    /// along with the ancestry of any unproven transaction
    pub fn ensure_covers(&self, inputs: &[OutputReference]) -> Result<(), BundleError> {
        let mut visited = BTreeSet::new();
        for input in inputs {
            let entry = self
                .entries
                .get(&input.txid)
                .ok_or(BundleError::MissingTransaction(input.txid))?;
            if entry.tx.outputs.len() <= input.index as usize {
                return Err(BundleError::MissingOutput(*input));
            }
            self.check_ancestry(input.txid, &mut visited)?;
        }
        Ok(())
    }

    fn check_ancestry(&self, txid: TxId, visited: &mut BTreeSet<TxId>) -> Result<(), BundleError> {
        let mut pending = vec![txid];
        while let Some(current) = pending.pop() {
            if !visited.insert(current) {
                continue;
            }
            let entry = self
                .entries
                .get(&current)
                .ok_or(BundleError::MissingTransaction(current))?;
            if entry.proof.is_some() {
                continue;
            }
            for input in &entry.tx.inputs {
                let ancestor = input.previous_output.txid;
                if !self.entries.contains_key(&ancestor) {
                    return Err(BundleError::MissingAncestor {
                        tx: current,
                        ancestor,
                    });
                }
                pending.push(ancestor);
            }
        }
        Ok(())
    }

    /// Sub-bundle holding `txid` and the unproven ancestry it depends on
    pub fn extract(&self, txid: &TxId) -> Result<ProofBundle, BundleError> {
        let mut visited = BTreeSet::new();
        self.check_ancestry(*txid, &mut visited)?;

        let mut out = ProofBundle::new();
        for id in visited {
            if let Some(entry) = self.entries.get(&id) {
                out.entries.insert(id, entry.clone());
            }
        }
        Ok(out)
    }

    /// Verify every merkle path against the tracker and the ancestry of every
    /// unproven transaction
    pub fn verify(&self, tracker: &impl ChainTracker) -> Result<(), BundleError> {
        for (txid, entry) in &self.entries {
            if let Some(proof) = &entry.proof {
                if !proof.verify(txid, tracker) {
                    return Err(BundleError::InvalidProof(*txid));
                }
            }
        }

        let mut visited = BTreeSet::new();
        for txid in self.entries.keys() {
            self.check_ancestry(*txid, &mut visited)?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
