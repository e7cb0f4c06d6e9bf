//! Keccak-256 Merkle tree for IOC batches and the legacy contributor list.
//!
//! Pairs are hashed in sorted order and an odd trailing node is promoted to
//! the next level unchanged, so the root matches merkletreejs built with
//! `sortPairs: true`. Proofs are plain sibling lists without direction bits.
//! This tree never feeds the zero-knowledge circuit; see
//! [`crate::contributor_tree`] for that.

use crate::error::TreeError;
use crate::hash::{keccak256, keccak_sorted_pair, HASH_SIZE};
use ethers::types::Address;
use std::fmt;

pub type Hash = [u8; HASH_SIZE];

/// Inclusion proof in an [`IocBatchTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IocProof {
    pub leaf: Hash,
    pub root: Hash,
    pub siblings: Vec<Hash>,
    pub index: usize,
}

/// Variable-depth sorted-pair Keccak tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IocBatchTree {
    layers: Vec<Vec<Hash>>,
}

fn next_layer(layer: &[Hash]) -> Vec<Hash> {
    layer
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => keccak_sorted_pair(left, right),
            _ => pair[0],
        })
        .collect()
}

impl IocBatchTree {
    /// Builds a tree over already-hashed leaves.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::EmptyTree`] for an empty leaf list.
    pub fn new(leaves: Vec<Hash>) -> Result<Self, TreeError> {
        if leaves.is_empty() {
            return Err(TreeError::EmptyTree);
        }

        let mut layers = vec![leaves];
        while layers[layers.len() - 1].len() > 1 {
            let next = next_layer(&layers[layers.len() - 1]);
            layers.push(next);
        }

        Ok(Self { layers })
    }

    /// Tree over a batch of IOC strings; each leaf is `keccak256(utf8)`.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::EmptyTree`] for an empty batch.
    pub fn from_iocs<S: AsRef<str>>(iocs: &[S]) -> Result<Self, TreeError> {
        Self::new(iocs.iter().map(|ioc| keccak256(ioc.as_ref().as_bytes())).collect())
    }

    /// Legacy contributor tree; each leaf is `keccak256(address bytes)`.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::EmptyTree`] for an empty list.
    pub fn from_addresses(addresses: &[Address]) -> Result<Self, TreeError> {
        Self::new(addresses.iter().map(|a| keccak256(a.as_bytes())).collect())
    }

    #[must_use]
    pub fn root(&self) -> Hash {
        self.layers[self.layers.len() - 1][0]
    }

    #[must_use]
    pub fn root_hex(&self) -> String {
        format!("0x{}", hex::encode(self.root()))
    }

    #[must_use]
    pub fn leaves(&self) -> &[Hash] {
        &self.layers[0]
    }

    /// Number of hashing levels above the leaves.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.layers.len() - 1
    }

    /// Proof for the leaf at `leaf_index`, or `None` if out of range.
    #[must_use]
    pub fn generate_proof(&self, leaf_index: usize) -> Option<IocProof> {
        if leaf_index >= self.leaves().len() {
            return None;
        }

        let mut siblings = Vec::new();
        let mut index = leaf_index;

        for layer in &self.layers[..self.layers.len() - 1] {
            let sibling_index = index ^ 1;
            // A promoted node has no sibling at this level.
            if let Some(sibling) = layer.get(sibling_index) {
                siblings.push(*sibling);
            }
            index /= 2;
        }

        Some(IocProof {
            leaf: self.leaves()[leaf_index],
            root: self.root(),
            siblings,
            index: leaf_index,
        })
    }

    /// Proof for a leaf value, if it is present.
    #[must_use]
    pub fn proof_for_leaf(&self, leaf: &Hash) -> Option<IocProof> {
        let index = self.leaves().iter().position(|l| l == leaf)?;
        self.generate_proof(index)
    }

    /// Verifies a proof against this tree's root.
    #[must_use]
    pub fn verify_proof(&self, proof: &IocProof) -> bool {
        proof.root == self.root() && verify_ioc_proof(&proof.leaf, &proof.siblings, &self.root())
    }
}

/// Folds a sorted-pair proof and compares with `root`.
#[must_use]
pub fn verify_ioc_proof(leaf: &Hash, siblings: &[Hash], root: &Hash) -> bool {
    let computed = siblings
        .iter()
        .fold(*leaf, |current, sibling| keccak_sorted_pair(&current, sibling));
    &computed == root
}

/// Leaf for a legacy contributor entry.
#[must_use]
pub fn address_leaf(address: &Address) -> Hash {
    keccak256(address.as_bytes())
}

impl fmt::Display for IocProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IocProof:\n  Leaf: {}\n  Root: {}\n  Index: {}\n  Siblings: {}",
            hex::encode(self.leaf),
            hex::encode(self.root),
            self.index,
            self.siblings.len()
        )
    }
}

impl fmt::Display for IocBatchTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IocBatchTree: {} leaves, depth {}, root {}",
            self.leaves().len(),
            self.depth(),
            self.root_hex()
        )
    }
}
