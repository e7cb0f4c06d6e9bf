//! Persisted contributor-tree artifact (JSON).
//!
//! The artifact is what provers load to find their Merkle path: the root,
//! every leaf, and one proof per contributor. Field elements are stored as
//! `0x`-prefixed 64-digit hex; `timestamp` is unix milliseconds.

use crate::contributor_tree::{contributor_leaf, fold_path, ContributorTree};
use crate::commitment::Nonce;
use crate::error::{ArtifactError, FieldError, ProofError};
use crate::ethereum::{format_address, parse_address, ContributorSet};
use crate::hash::CircuitHasher;
use crate::types::ProofInput;
use crate::utils::{field_to_hex, parse_field};
use anyhow::{Context, Result};
use ark_bn254::Fr;
use ethers::types::Address;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const POSEIDON_HASH_FUNCTION: &str = "Poseidon";
pub const KECCAK_HASH_FUNCTION: &str = "keccak256";

/// Contributor entry: a bare address or `{address, leafIndex}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContributorEntry {
    Address(String),
    Indexed {
        address: String,
        #[serde(rename = "leafIndex")]
        leaf_index: usize,
    },
}

impl ContributorEntry {
    #[must_use]
    pub fn address(&self) -> &str {
        match self {
            ContributorEntry::Address(address) => address,
            ContributorEntry::Indexed { address, .. } => address,
        }
    }
}

/// Unix milliseconds, or an ISO-8601 string written by older tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArtifactTimestamp {
    Millis(u64),
    Text(String),
}

/// Per-contributor Merkle path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactProof {
    pub address: String,
    pub leaf: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf_index: Option<usize>,
    pub proof: Vec<String>,
    #[serde(default)]
    pub path_indices: Vec<u8>,
}

/// Age of an artifact relative to a reference clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freshness {
    pub age_secs: u64,
    pub is_stale: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeArtifact {
    pub root: String,
    pub tree_depth: usize,
    pub hash_function: String,
    pub contributor_count: usize,
    pub timestamp: ArtifactTimestamp,
    pub leaves: Vec<String>,
    pub contributors: Vec<ContributorEntry>,
    pub proofs: Vec<ArtifactProof>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

fn field_error(field: impl Into<String>, source: FieldError) -> ArtifactError {
    ArtifactError::Field {
        field: field.into(),
        source,
    }
}

impl TreeArtifact {
    /// Serializable snapshot of a built tree.
    #[must_use]
    pub fn from_tree(tree: &ContributorTree, timestamp_ms: u64) -> Self {
        let proofs = tree
            .proofs()
            .into_iter()
            .map(|p| ArtifactProof {
                address: format_address(&p.address),
                leaf: field_to_hex(&p.leaf),
                leaf_index: Some(p.leaf_index),
                proof: p.siblings.iter().map(field_to_hex).collect(),
                path_indices: p.path_indices,
            })
            .collect();

        Self {
            root: field_to_hex(&tree.root()),
            tree_depth: tree.depth(),
            hash_function: POSEIDON_HASH_FUNCTION.to_string(),
            contributor_count: tree.anonymity_set_size(),
            timestamp: ArtifactTimestamp::Millis(timestamp_ms),
            leaves: tree.leaves().iter().map(field_to_hex).collect(),
            contributors: tree
                .contributors()
                .iter()
                .map(|a| ContributorEntry::Address(format_address(a)))
                .collect(),
            proofs,
            network: None,
        }
    }

    /// Parsed root.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Field`] if the root is not a canonical field element.
    pub fn root_field(&self) -> Result<Fr, ArtifactError> {
        parse_field(&self.root).map_err(|e| field_error("root", e))
    }

    /// Structural validation.
    ///
    /// # Errors
    ///
    /// Returns the first [`ArtifactError`] found.
    pub fn validate(&self) -> Result<(), ArtifactError> {
        if !self.hash_function.eq_ignore_ascii_case(POSEIDON_HASH_FUNCTION) {
            return Err(ArtifactError::UnsupportedHashFunction(
                self.hash_function.clone(),
            ));
        }

        if self.contributor_count != self.contributors.len() {
            return Err(ArtifactError::CountMismatch {
                declared: self.contributor_count,
                actual: self.contributors.len(),
            });
        }
        if self.leaves.len() != self.contributors.len() {
            return Err(ArtifactError::CountMismatch {
                declared: self.contributor_count,
                actual: self.leaves.len(),
            });
        }

        self.root_field()?;
        for (i, leaf) in self.leaves.iter().enumerate() {
            parse_field(leaf).map_err(|e| field_error(format!("leaves[{}]", i), e))?;
        }

        for (index, proof) in self.proofs.iter().enumerate() {
            if proof.proof.len() != self.tree_depth {
                return Err(ArtifactError::DepthMismatch {
                    index,
                    field: "proof",
                    expected: self.tree_depth,
                    got: proof.proof.len(),
                });
            }
            if proof.path_indices.len() != self.tree_depth {
                return Err(ArtifactError::DepthMismatch {
                    index,
                    field: "pathIndices",
                    expected: self.tree_depth,
                    got: proof.path_indices.len(),
                });
            }
            if let Some(&bit) = proof.path_indices.iter().find(|bit| **bit > 1) {
                return Err(ArtifactError::InvalidPathIndex { index, bit });
            }
            parse_field(&proof.leaf)
                .map_err(|e| field_error(format!("proofs[{}].leaf", index), e))?;
            for (level, sibling) in proof.proof.iter().enumerate() {
                parse_field(sibling).map_err(|e| {
                    field_error(format!("proofs[{}].proof[{}]", index, level), e)
                })?;
            }
            parse_address(&proof.address)
                .map_err(|e| field_error(format!("proofs[{}].address", index), e))?;
        }

        debug!(
            "Artifact valid: depth={}, contributors={}, proofs={}",
            self.tree_depth,
            self.contributor_count,
            self.proofs.len()
        );
        Ok(())
    }

    /// Re-folds every proof from `Poseidon1(address)` and checks it reaches the root.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::RootMismatch`] for the first proof that does not.
    pub fn verify_against_root(&self, hasher: &CircuitHasher) -> Result<(), ArtifactError> {
        self.validate()?;
        let root = self.root_field()?;

        for (index, proof) in self.proofs.iter().enumerate() {
            let address = parse_address(&proof.address)
                .map_err(|e| field_error(format!("proofs[{}].address", index), e))?;
            let leaf = contributor_leaf(&address, hasher);
            let stored = parse_field(&proof.leaf)
                .map_err(|e| field_error(format!("proofs[{}].leaf", index), e))?;
            let siblings = proof
                .proof
                .iter()
                .map(|s| parse_field(s))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| field_error(format!("proofs[{}].proof", index), e))?;

            if stored != leaf || fold_path(leaf, &siblings, &proof.path_indices, hasher) != Some(root)
            {
                return Err(ArtifactError::RootMismatch { index });
            }
        }
        Ok(())
    }

    /// Age of the artifact at `now_ms`.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Field`] if the timestamp is not in milliseconds.
    pub fn freshness(&self, now_ms: u64, max_age: Duration) -> Result<Freshness, ArtifactError> {
        let built_at = match &self.timestamp {
            ArtifactTimestamp::Millis(ms) => *ms,
            ArtifactTimestamp::Text(text) => {
                return Err(field_error(
                    "timestamp",
                    FieldError::InvalidDecimal(text.clone()),
                ))
            }
        };
        let age_secs = now_ms.saturating_sub(built_at) / 1000;
        Ok(Freshness {
            age_secs,
            is_stale: age_secs > max_age.as_secs(),
        })
    }

    /// Logs a stale artifact and, when `reject_stale` is set, refuses it.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Stale`] for a stale artifact under `reject_stale`.
    pub fn ensure_fresh(
        &self,
        now_ms: u64,
        max_age: Duration,
        reject_stale: bool,
    ) -> Result<Freshness, ArtifactError> {
        let freshness = self.freshness(now_ms, max_age)?;
        if freshness.is_stale {
            warn!(
                "Tree artifact is {}s old (max {}s); proofs may target a superseded root",
                freshness.age_secs,
                max_age.as_secs()
            );
            if reject_stale {
                return Err(ArtifactError::Stale {
                    age_secs: freshness.age_secs,
                    max_age_secs: max_age.as_secs(),
                });
            }
        }
        Ok(freshness)
    }

    /// Proof entry for `address`, if listed.
    #[must_use]
    pub fn proof_for(&self, address: &Address) -> Option<&ArtifactProof> {
        self.proofs
            .iter()
            .find(|p| parse_address(&p.address).map(|a| a == *address).unwrap_or(false))
    }

    /// Assembles the prover input for `address` from this artifact.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::InvalidInput`] if the address is not listed or a
    /// stored value is malformed.
    pub fn proof_input(
        &self,
        address: Address,
        nonce: Nonce,
        hasher: &CircuitHasher,
    ) -> Result<ProofInput, ProofError> {
        let entry = self.proof_for(&address).ok_or_else(|| {
            ProofError::InvalidInput(format!(
                "{} is not a registered contributor in this tree",
                format_address(&address)
            ))
        })?;
        ProofInput::from_strings(
            address,
            nonce,
            &self.root,
            &entry.proof,
            &entry.path_indices,
            hasher,
        )
    }

    /// Contributors in leaf order.
    ///
    /// # Errors
    ///
    /// Fails on an unparsable or duplicate address.
    pub fn contributor_set(&self) -> Result<ContributorSet> {
        let addresses: Vec<String> = self
            .contributors
            .iter()
            .map(|c| c.address().to_string())
            .collect();
        ContributorSet::from_strings(&addresses)
    }

    /// Loads an artifact from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read tree artifact: {}", path.display()))?;
        let artifact: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse tree artifact: {}", path.display()))?;
        Ok(artifact)
    }

    /// Writes the artifact as pretty JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create artifact directory: {}", parent.display())
                })?;
            }
        }
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize tree artifact")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write tree artifact: {}", path.display()))?;
        info!("Tree artifact written to {}", path.display());
        Ok(())
    }
}
