//! Merkle inclusion proofs
//!
//! A `MerklePath` shows that a transaction id is a leaf of the merkle tree
//! committed to by a block header. Roots are checked against a
//! `ChainTracker`, which knows which header roots are accepted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::TxId;
use crate::crypto::double_sha256;

/// A sibling hash along a merkle path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleNode {
    /// Sibling hash at this level
    #[serde(with = "hex_hash")]
    pub hash: [u8; 32],
    /// Whether the sibling is on the left
    pub is_left: bool,
}

/// Proof that a transaction is included in a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerklePath {
    /// Height of the block containing the transaction
    pub block_height: u64,
    /// Position of the transaction in the block
    pub index: u32,
    /// Sibling hashes from leaf to root
    pub path: Vec<MerkleNode>,
}

impl MerklePath {
    /// Create a proof for the transaction at `index` among `txids`
    pub fn create(block_height: u64, txids: &[TxId], index: usize) -> Option<Self> {
        if index >= txids.len() {
            return None;
        }
        let leaves: Vec<[u8; 32]> = txids.iter().map(|id| *id.as_bytes()).collect();

        Some(Self {
            block_height,
            index: index as u32,
            path: build_proof_path(&leaves, index),
        })
    }

    /// Root implied by this path for `txid`
    pub fn compute_root(&self, txid: &TxId) -> [u8; 32] {
        let mut hash = *txid.as_bytes();
        for node in &self.path {
            hash = if node.is_left {
                hash_pair(&node.hash, &hash)
            } else {
                hash_pair(&hash, &node.hash)
            };
        }
        hash
    }

    /// Verify the path for `txid` against the tracker's accepted roots
    pub fn verify(&self, txid: &TxId, tracker: &impl ChainTracker) -> bool {
        tracker.is_valid_root(self.block_height, &self.compute_root(txid))
    }
}

/// Merkle root over a block's transaction ids
pub fn merkle_root(txids: &[TxId]) -> [u8; 32] {
    let mut level: Vec<[u8; 32]> = txids.iter().map(|id| *id.as_bytes()).collect();
    if level.is_empty() {
        return [0u8; 32];
    }

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(level[level.len() - 1]);
        }
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }
    level[0]
}

fn build_proof_path(leaves: &[[u8; 32]], mut index: usize) -> Vec<MerkleNode> {
    let mut path = Vec::new();
    let mut level = leaves.to_vec();

    while level.len() > 1 {
        // If odd number, duplicate last
        if level.len() % 2 == 1 {
            level.push(level[level.len() - 1]);
        }

        let sibling = index ^ 1;
        path.push(MerkleNode {
            hash: level[sibling],
            is_left: index % 2 == 1,
        });

        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
        index /= 2;
    }

    path
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left);
    data[32..].copy_from_slice(right);
    double_sha256(&data)
}

// =============================================================================
// Chain Tracker
// =============================================================================

/// Source of accepted block merkle roots
pub trait ChainTracker {
    /// Whether `root` is the merkle root of the accepted block at `height`
    fn is_valid_root(&self, height: u64, root: &[u8; 32]) -> bool;
}

/// Fixed set of trusted header roots
#[derive(Debug, Clone, Default)]
pub struct Checkpoints {
    roots: BTreeMap<u64, [u8; 32]>,
}

impl Checkpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust `root` as the merkle root at `height`
    pub fn insert(&mut self, height: u64, root: [u8; 32]) {
        self.roots.insert(height, root);
    }

    /// Highest trusted height
    pub fn tip(&self) -> Option<u64> {
        self.roots.keys().next_back().copied()
    }
}

impl ChainTracker for Checkpoints {
    fn is_valid_root(&self, height: u64, root: &[u8; 32]) -> bool {
        self.roots.get(&height) == Some(root)
    }
}

mod hex_hash {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32-byte hash"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txids(n: u8) -> Vec<TxId> {
        (0..n).map(|i| TxId::from_bytes([i + 1; 32])).collect()
    }

    #[test]
    fn test_single_leaf_root() {
        let ids = txids(1);
        assert_eq!(merkle_root(&ids), *ids[0].as_bytes());
        let proof = MerklePath::create(3, &ids, 0).unwrap();
        assert!(proof.path.is_empty());
        assert_eq!(proof.compute_root(&ids[0]), merkle_root(&ids));
    }

    #[test]
    fn test_every_leaf_proves_to_root() {
        for n in 1..=7u8 {
            let ids = txids(n);
            let root = merkle_root(&ids);
            let mut checkpoints = Checkpoints::new();
            checkpoints.insert(10, root);

            for (i, id) in ids.iter().enumerate() {
                let proof = MerklePath::create(10, &ids, i).unwrap();
                assert!(proof.verify(id, &checkpoints), "n={} i={}", n, i);
            }
        }
    }

    #[test]
    fn test_wrong_txid_or_height_fails() {
        let ids = txids(4);
        let mut checkpoints = Checkpoints::new();
        checkpoints.insert(1, merkle_root(&ids));

        let proof = MerklePath::create(1, &ids, 2).unwrap();
        assert!(!proof.verify(&ids[1], &checkpoints));

        let mut moved = proof.clone();
        moved.block_height = 2;
        assert!(!moved.verify(&ids[2], &checkpoints));
        assert!(MerklePath::create(1, &ids, 4).is_none());
    }

    #[test]
    fn test_path_serde() {
        let ids = txids(3);
        let proof = MerklePath::create(5, &ids, 1).unwrap();
        let json = serde_json::to_string(&proof).unwrap();
        let back: MerklePath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, proof);
    }
}
