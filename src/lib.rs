//! Contributor membership proofs for a threat-intelligence sharing platform.
//!
//! A contributor proves that their address is a leaf of a fixed-depth
//! Poseidon Merkle tree and binds the proof to a fresh per-submission
//! commitment, without revealing which leaf is theirs.
//!
//! # Components
//!
//! - [`CircuitHasher`]: circom-compatible Poseidon over BN254
//! - [`ContributorTree`] and [`ZeroSubtreeTable`]: fixed-depth contributor tree
//! - [`make_commitment`]: `Poseidon2(address, nonce)`
//! - [`ContributorProver`] and [`ContributorVerifier`]: Groth16 membership proofs
//! - [`VerifierRegistry`]: trusted roots and replay protection
//! - [`TreeArtifact`]: the JSON tree handed to provers
//! - [`TreeRebuilder`]: versioned, single-writer rebuilds
//! - [`IocBatchTree`]: Keccak integrity tree for IOC batches (not zk-friendly)
//!
//! # Example
//!
//! ```no_run
//! use cti_zk_membership::{build_tree, CircuitHasher, ContributorSet, ZeroSubtreeTable, TREE_DEPTH};
//!
//! let hasher = CircuitHasher::new()?;
//! let zeros = ZeroSubtreeTable::new(TREE_DEPTH, &hasher)?;
//! let set = ContributorSet::from_strings(&["0xAAA".to_string(), "0xBBB".to_string()])?;
//! let tree = build_tree(&set, TREE_DEPTH, &zeros, &hasher)?;
//! println!("root: {}", tree);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod artifact;
pub mod circuit;
pub mod commitment;
pub mod config;
pub mod contributor_tree;
pub mod error;
pub mod ethereum;
pub mod hash;
pub mod merkle;
pub mod rebuild;
pub mod registry;
pub mod retry;
pub mod types;
pub mod utils;

#[cfg(test)]
mod merkle_tests;

pub use artifact::TreeArtifact;
pub use circuit::{ContributorMembershipCircuit, ContributorProver, ContributorVerifier};
pub use commitment::{make_commitment, Commitment, Nonce};
pub use config::Config;
pub use contributor_tree::{build_tree, ContributorProof, ContributorTree, ZeroSubtreeTable};
pub use error::{ArtifactError, FieldError, ProofError, RegistryError, TreeError};
pub use ethereum::ContributorSet;
pub use hash::CircuitHasher;
pub use merkle::{IocBatchTree, IocProof};
pub use rebuild::{TreeRebuilder, TreeVersion};
pub use registry::{MembershipRegistry, VerifierRegistry};
pub use types::{ProofInput, PublicSignals, SolidityProof, SubmissionProof};
pub use utils::{field_to_bytes, parse_field};

/// Depth of the deployed contributor tree (up to 2^20 contributors).
///
/// Proving and verifying keys are specific to a depth; changing it requires
/// a new setup and re-registration of every root.
pub const TREE_DEPTH: usize = 20;

/// Largest depth the builder accepts.
pub const MAX_TREE_DEPTH: usize = 32;

/// Artifacts older than this (48 hours) are reported as stale.
pub const STALE_AFTER_SECS: u64 = 48 * 3600;

/// Public inputs of the membership circuit: `[commitment, merkleRoot]`.
pub const PUBLIC_SIGNAL_COUNT: usize = 2;
