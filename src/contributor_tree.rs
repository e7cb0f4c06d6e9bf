//! Fixed-depth Poseidon Merkle tree over registered contributors.
//!
//! The tree is the perfect binary tree of depth `D` whose first `n` leaves are
//! `Poseidon1(address)` and whose remaining `2^D - n` leaves are zero. Only the
//! populated prefix of each level is stored; a missing right sibling at level
//! `l` is the precomputed root of an all-zero subtree of height `l`.

use crate::error::TreeError;
use crate::ethereum::{address_to_field, format_address, ContributorSet};
use crate::hash::CircuitHasher;
use crate::utils::field_to_hex;
use crate::MAX_TREE_DEPTH;
use ark_bn254::Fr;
use ark_ff::Zero;
use ethers::types::Address;
use log::debug;
use std::fmt;

/// Roots of all-zero subtrees: `zero[0] = 0`, `zero[i + 1] = Poseidon2(zero[i], zero[i])`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZeroSubtreeTable {
    zeros: Vec<Fr>,
}

impl ZeroSubtreeTable {
    /// Computes the table for `depth` levels (`depth + 1` entries).
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::DepthTooLarge`] if `depth > MAX_TREE_DEPTH`.
    pub fn new(depth: usize, hasher: &CircuitHasher) -> Result<Self, TreeError> {
        if depth > MAX_TREE_DEPTH {
            return Err(TreeError::DepthTooLarge {
                depth,
                max: MAX_TREE_DEPTH,
            });
        }

        let mut zeros = Vec::with_capacity(depth + 1);
        zeros.push(Fr::zero());
        for level in 0..depth {
            let below = zeros[level];
            zeros.push(hasher.hash2(below, below));
        }
        Ok(Self { zeros })
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.zeros.len() - 1
    }

    /// Root of an empty subtree of the given height.
    #[must_use]
    pub fn zero(&self, level: usize) -> Fr {
        self.zeros[level]
    }

    #[must_use]
    pub fn zeros(&self) -> &[Fr] {
        &self.zeros
    }
}

/// Inclusion path for one contributor leaf.
///
/// `path_indices[l]` is 0 when the running node is the left child at level
/// `l` and 1 when it is the right child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContributorProof {
    pub address: Address,
    pub leaf_index: usize,
    pub leaf: Fr,
    pub siblings: Vec<Fr>,
    pub path_indices: Vec<u8>,
}

impl ContributorProof {
    #[must_use]
    pub fn verify(&self, root: Fr, hasher: &CircuitHasher) -> bool {
        verify_path(self.leaf, &self.siblings, &self.path_indices, root, hasher)
    }
}

/// Folds a leaf up its path. Returns `None` for mismatched lengths or a
/// direction bit outside {0, 1}.
#[must_use]
pub fn fold_path(
    leaf: Fr,
    siblings: &[Fr],
    path_indices: &[u8],
    hasher: &CircuitHasher,
) -> Option<Fr> {
    if siblings.len() != path_indices.len() {
        return None;
    }

    siblings
        .iter()
        .zip(path_indices)
        .try_fold(leaf, |current, (sibling, bit)| match bit {
            0 => Some(hasher.hash2(current, *sibling)),
            1 => Some(hasher.hash2(*sibling, current)),
            _ => None,
        })
}

/// Returns true when the path folds from `leaf` to `root`.
#[must_use]
pub fn verify_path(
    leaf: Fr,
    siblings: &[Fr],
    path_indices: &[u8],
    root: Fr,
    hasher: &CircuitHasher,
) -> bool {
    fold_path(leaf, siblings, path_indices, hasher) == Some(root)
}

/// Leaf value for a contributor: `Poseidon1(address)`.
#[must_use]
pub fn contributor_leaf(address: &Address, hasher: &CircuitHasher) -> Fr {
    hasher.hash1(address_to_field(address))
}

/// Fixed-depth contributor tree with per-leaf proofs.
#[derive(Clone)]
pub struct ContributorTree {
    depth: usize,
    contributors: Vec<Address>,
    // levels[0] holds the leaves, levels[depth] holds only the root.
    levels: Vec<Vec<Fr>>,
    zero_table: ZeroSubtreeTable,
}

impl fmt::Debug for ContributorTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContributorTree")
            .field("depth", &self.depth)
            .field("contributors", &self.contributors.len())
            .field("root", &field_to_hex(&self.root()))
            .finish()
    }
}

/// Builds the fixed-depth tree over `contributors` in registration order.
///
/// # Errors
///
/// - [`TreeError::DepthTooLarge`] if `depth > MAX_TREE_DEPTH`
/// - [`TreeError::ZeroTableMismatch`] if the table was built for another depth
/// - [`TreeError::EmptyTree`] if there are no contributors
/// - [`TreeError::DepthTooSmall`] if more than `2^depth` contributors are given
pub fn build_tree(
    contributors: &ContributorSet,
    depth: usize,
    zero_table: &ZeroSubtreeTable,
    hasher: &CircuitHasher,
) -> Result<ContributorTree, TreeError> {
    if depth > MAX_TREE_DEPTH {
        return Err(TreeError::DepthTooLarge {
            depth,
            max: MAX_TREE_DEPTH,
        });
    }
    if zero_table.depth() != depth {
        return Err(TreeError::ZeroTableMismatch {
            table: zero_table.depth(),
            tree: depth,
        });
    }
    if contributors.is_empty() {
        return Err(TreeError::EmptyTree);
    }

    let capacity = 1u64 << depth;
    let count = contributors.len();
    if count as u64 > capacity {
        return Err(TreeError::DepthTooSmall {
            depth,
            leaves: count,
            required: ceil_log2(count),
        });
    }

    let leaves: Vec<Fr> = contributors
        .addresses()
        .iter()
        .map(|address| contributor_leaf(address, hasher))
        .collect();

    let mut levels = Vec::with_capacity(depth + 1);
    levels.push(leaves);

    for level in 0..depth {
        let current = &levels[level];
        let zero = zero_table.zero(level);
        let next: Vec<Fr> = current
            .chunks(2)
            .map(|pair| {
                let right = pair.get(1).copied().unwrap_or(zero);
                hasher.hash2(pair[0], right)
            })
            .collect();
        levels.push(next);
    }

    let tree = ContributorTree {
        depth,
        contributors: contributors.addresses().to_vec(),
        levels,
        zero_table: zero_table.clone(),
    };

    debug!(
        "Built contributor tree: depth={}, contributors={}, root={}",
        depth,
        count,
        field_to_hex(&tree.root())
    );

    Ok(tree)
}

fn ceil_log2(n: usize) -> usize {
    let mut bits = 0;
    while (1u64 << bits) < n as u64 {
        bits += 1;
    }
    bits
}

impl ContributorTree {
    #[must_use]
    pub fn root(&self) -> Fr {
        self.levels[self.depth][0]
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[must_use]
    pub fn leaves(&self) -> &[Fr] {
        &self.levels[0]
    }

    #[must_use]
    pub fn contributors(&self) -> &[Address] {
        &self.contributors
    }

    #[must_use]
    pub fn zero_table(&self) -> &ZeroSubtreeTable {
        &self.zero_table
    }

    /// Number of registered contributors, i.e. the anonymity-set size.
    #[must_use]
    pub fn anonymity_set_size(&self) -> usize {
        self.contributors.len()
    }

    /// Inclusion proof for the leaf at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::LeafIndexOutOfRange`] for an unregistered index.
    pub fn proof(&self, index: usize) -> Result<ContributorProof, TreeError> {
        if index >= self.contributors.len() {
            return Err(TreeError::LeafIndexOutOfRange {
                index,
                len: self.contributors.len(),
            });
        }

        let mut siblings = Vec::with_capacity(self.depth);
        let mut path_indices = Vec::with_capacity(self.depth);
        let mut position = index;

        for level in 0..self.depth {
            let sibling_position = position ^ 1;
            let sibling = self.levels[level]
                .get(sibling_position)
                .copied()
                .unwrap_or_else(|| self.zero_table.zero(level));
            siblings.push(sibling);
            path_indices.push((position & 1) as u8);
            position >>= 1;
        }

        Ok(ContributorProof {
            address: self.contributors[index],
            leaf_index: index,
            leaf: self.levels[0][index],
            siblings,
            path_indices,
        })
    }

    /// Proof for a registered address, if present.
    #[must_use]
    pub fn proof_for(&self, address: &Address) -> Option<ContributorProof> {
        let index = self.contributors.iter().position(|a| a == address)?;
        self.proof(index).ok()
    }

    /// Proofs for every registered leaf, in leaf order.
    #[must_use]
    pub fn proofs(&self) -> Vec<ContributorProof> {
        (0..self.contributors.len())
            .filter_map(|index| self.proof(index).ok())
            .collect()
    }
}

impl fmt::Display for ContributorTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Contributor Tree (depth {}):", self.depth)?;
        writeln!(f, "  Root: {}", field_to_hex(&self.root()))?;
        writeln!(f, "  Contributors: {}", self.contributors.len())?;
        for (i, address) in self.contributors.iter().enumerate() {
            writeln!(
                f,
                "    [{}] {} -> {}",
                i,
                format_address(address),
                field_to_hex(&self.levels[0][i])
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethereum::parse_address;

    fn hasher() -> CircuitHasher {
        CircuitHasher::new().unwrap()
    }

    fn contributors(raw: &[&str]) -> ContributorSet {
        ContributorSet::from_addresses(raw.iter().map(|a| parse_address(a).unwrap())).unwrap()
    }

    fn naive_root(set: &ContributorSet, depth: usize, hasher: &CircuitHasher) -> Fr {
        let mut level: Vec<Fr> = set
            .addresses()
            .iter()
            .map(|a| contributor_leaf(a, hasher))
            .collect();
        level.resize(1 << depth, Fr::zero());
        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|pair| hasher.hash2(pair[0], pair[1]))
                .collect();
        }
        level[0]
    }

    #[test]
    fn test_zero_table_recurrence() {
        let hasher = hasher();
        let table = ZeroSubtreeTable::new(4, &hasher).unwrap();
        assert_eq!(table.depth(), 4);
        assert_eq!(table.zero(0), Fr::zero());
        for level in 0..4 {
            assert_eq!(
                table.zero(level + 1),
                hasher.hash2(table.zero(level), table.zero(level))
            );
        }
    }

    #[test]
    fn test_zero_table_depth_limit() {
        let err = ZeroSubtreeTable::new(MAX_TREE_DEPTH + 1, &hasher()).unwrap_err();
        assert!(matches!(err, TreeError::DepthTooLarge { .. }));
    }

    #[test]
    fn test_root_matches_full_padding() {
        let hasher = hasher();
        let table = ZeroSubtreeTable::new(4, &hasher).unwrap();
        for raw in [
            vec!["0xAAA"],
            vec!["0xAAA", "0xBBB"],
            vec!["0xAAA", "0xBBB", "0xCCC"],
            vec!["0x1", "0x2", "0x3", "0x4", "0x5"],
        ] {
            let set = contributors(&raw);
            let tree = build_tree(&set, 4, &table, &hasher).unwrap();
            assert_eq!(tree.root(), naive_root(&set, 4, &hasher));
        }
    }

    #[test]
    fn test_full_tree_at_capacity() {
        let hasher = hasher();
        let table = ZeroSubtreeTable::new(2, &hasher).unwrap();
        let set = contributors(&["0x1", "0x2", "0x3", "0x4"]);
        let tree = build_tree(&set, 2, &table, &hasher).unwrap();
        assert_eq!(tree.root(), naive_root(&set, 2, &hasher));
        for proof in tree.proofs() {
            assert!(proof.verify(tree.root(), &hasher));
        }
    }

    #[test]
    fn test_every_path_folds_to_root() {
        let hasher = hasher();
        let table = ZeroSubtreeTable::new(5, &hasher).unwrap();
        let set = contributors(&["0x11", "0x22", "0x33", "0x44", "0x55", "0x66", "0x77"]);
        let tree = build_tree(&set, 5, &table, &hasher).unwrap();

        let proofs = tree.proofs();
        assert_eq!(proofs.len(), 7);
        for (i, proof) in proofs.iter().enumerate() {
            assert_eq!(proof.leaf_index, i);
            assert_eq!(proof.siblings.len(), 5);
            assert_eq!(proof.path_indices.len(), 5);
            assert!(proof.verify(tree.root(), &hasher), "leaf {} failed", i);
        }
    }

    #[test]
    fn test_direction_bits_follow_index() {
        let hasher = hasher();
        let table = ZeroSubtreeTable::new(3, &hasher).unwrap();
        let set = contributors(&["0x1", "0x2", "0x3", "0x4", "0x5", "0x6"]);
        let tree = build_tree(&set, 3, &table, &hasher).unwrap();
        // 5 = 0b101
        assert_eq!(tree.proof(5).unwrap().path_indices, vec![1, 0, 1]);
        assert_eq!(tree.proof(0).unwrap().path_indices, vec![0, 0, 0]);
    }

    #[test]
    fn test_missing_siblings_are_zero_subtrees() {
        let hasher = hasher();
        let table = ZeroSubtreeTable::new(4, &hasher).unwrap();
        let set = contributors(&["0xAAA"]);
        let tree = build_tree(&set, 4, &table, &hasher).unwrap();
        let proof = tree.proof(0).unwrap();
        assert_eq!(proof.siblings, table.zeros()[..4].to_vec());
    }

    #[test]
    fn test_tampered_path_rejected() {
        let hasher = hasher();
        let table = ZeroSubtreeTable::new(3, &hasher).unwrap();
        let set = contributors(&["0x1", "0x2", "0x3"]);
        let tree = build_tree(&set, 3, &table, &hasher).unwrap();

        let mut proof = tree.proof(1).unwrap();
        proof.path_indices[0] = 0;
        assert!(!proof.verify(tree.root(), &hasher));

        let mut proof = tree.proof(1).unwrap();
        proof.path_indices[1] = 2;
        assert!(!proof.verify(tree.root(), &hasher));

        let proof = tree.proof(1).unwrap();
        assert!(!verify_path(
            proof.leaf,
            &proof.siblings[..2],
            &proof.path_indices,
            tree.root(),
            &hasher
        ));
    }

    #[test]
    fn test_build_errors() {
        let hasher = hasher();
        let table = ZeroSubtreeTable::new(1, &hasher).unwrap();

        let empty = ContributorSet::new();
        assert_eq!(
            build_tree(&empty, 1, &table, &hasher).unwrap_err(),
            TreeError::EmptyTree
        );

        let set = contributors(&["0x1", "0x2", "0x3"]);
        assert_eq!(
            build_tree(&set, 1, &table, &hasher).unwrap_err(),
            TreeError::DepthTooSmall {
                depth: 1,
                leaves: 3,
                required: 2,
            }
        );

        assert_eq!(
            build_tree(&set, 2, &table, &hasher).unwrap_err(),
            TreeError::ZeroTableMismatch { table: 1, tree: 2 }
        );

        assert!(matches!(
            build_tree(&set, 33, &table, &hasher).unwrap_err(),
            TreeError::DepthTooLarge { depth: 33, .. }
        ));
    }

    #[test]
    fn test_proof_index_out_of_range() {
        let hasher = hasher();
        let table = ZeroSubtreeTable::new(2, &hasher).unwrap();
        let tree = build_tree(&contributors(&["0x1"]), 2, &table, &hasher).unwrap();
        assert_eq!(
            tree.proof(1).unwrap_err(),
            TreeError::LeafIndexOutOfRange { index: 1, len: 1 }
        );
    }

    #[test]
    fn test_anonymity_set_size_and_lookup() {
        let hasher = hasher();
        let table = ZeroSubtreeTable::new(3, &hasher).unwrap();
        let set = contributors(&["0xAAA", "0xBBB", "0xCCC"]);
        let tree = build_tree(&set, 3, &table, &hasher).unwrap();
        assert_eq!(tree.anonymity_set_size(), 3);

        let bbb = parse_address("0xBBB").unwrap();
        assert_eq!(tree.proof_for(&bbb).unwrap().leaf_index, 1);
        assert!(tree.proof_for(&parse_address("0xDDD").unwrap()).is_none());
    }

    #[test]
    fn test_display() {
        let hasher = hasher();
        let table = ZeroSubtreeTable::new(2, &hasher).unwrap();
        let tree = build_tree(&contributors(&["0xAAA"]), 2, &table, &hasher).unwrap();
        let rendered = tree.to_string();
        assert!(rendered.contains("Contributor Tree (depth 2)"));
        assert!(rendered.contains("0x0000000000000000000000000000000000000aaa"));
    }
}
