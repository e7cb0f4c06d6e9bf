//! Proof inputs, public signals and the serialized submission format.
//!
//! [`ProofInput`] carries the secret witness and is never serialized. What
//! leaves the prover is a [`SubmissionProof`]: the Groth16 proof in Solidity
//! calldata layout plus the two public signals `[commitment, merkleRoot]`.

use crate::commitment::{make_commitment, Commitment, Nonce};
use crate::contributor_tree::ContributorProof;
use crate::error::{FieldError, ProofError};
use crate::hash::CircuitHasher;
use crate::utils::{
    field_to_decimal, field_to_hex, parse_field, parse_prime_field, prime_field_to_decimal,
};
use crate::PUBLIC_SIGNAL_COUNT;
use anyhow::Result;
use ark_bn254::{Bn254, Fq, Fq2, Fr, G1Affine, G2Affine};
use ark_ec::AffineRepr;
use ark_ff::Zero;
use ark_groth16::Proof;
use ethers::types::Address;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Public half of a membership statement, in circuit input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicSignals {
    pub commitment: Fr,
    pub merkle_root: Fr,
}

impl PublicSignals {
    /// `[commitment, merkleRoot]`, the order the circuit allocates its inputs.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Fr> {
        vec![self.commitment, self.merkle_root]
    }

    #[must_use]
    pub fn to_decimal_strings(&self) -> Vec<String> {
        self.to_vec().iter().map(field_to_decimal).collect()
    }

    /// Parses exactly two canonical field strings.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError`] for a wrong count or a non-canonical value.
    pub fn from_strings(signals: &[String]) -> Result<Self, FieldError> {
        if signals.len() != PUBLIC_SIGNAL_COUNT {
            return Err(FieldError::InvalidLength {
                expected: PUBLIC_SIGNAL_COUNT,
                got: signals.len(),
            });
        }
        Ok(Self {
            commitment: parse_field(&signals[0])?,
            merkle_root: parse_field(&signals[1])?,
        })
    }

    #[must_use]
    pub fn commitment(&self) -> Commitment {
        Commitment::from_field(self.commitment)
    }
}

/// Everything the prover needs for one submission. Consumed by value.
pub struct ProofInput {
    pub commitment: Commitment,
    pub merkle_root: Fr,
    pub address: Address,
    pub nonce: Nonce,
    pub siblings: Vec<Fr>,
    pub path_indices: Vec<u8>,
}

impl ProofInput {
    /// Assembles an input from a tree proof, computing the commitment.
    #[must_use]
    pub fn new(
        address: Address,
        nonce: Nonce,
        proof: ContributorProof,
        merkle_root: Fr,
        hasher: &CircuitHasher,
    ) -> Self {
        let commitment = make_commitment(&address, &nonce, hasher);
        Self {
            commitment,
            merkle_root,
            address,
            nonce,
            siblings: proof.siblings,
            path_indices: proof.path_indices,
        }
    }

    /// Assembles an input from artifact text fields.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::InvalidInput`] if a sibling or the root is not a
    /// canonical field element, or a direction bit is not 0 or 1.
    pub fn from_strings(
        address: Address,
        nonce: Nonce,
        merkle_root: &str,
        siblings: &[String],
        path_indices: &[u8],
        hasher: &CircuitHasher,
    ) -> Result<Self, ProofError> {
        let merkle_root = parse_field(merkle_root)?;
        let siblings = siblings
            .iter()
            .map(|s| parse_field(s))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(bad) = path_indices.iter().find(|bit| **bit > 1) {
            return Err(ProofError::InvalidInput(format!(
                "path index {} is not a direction bit",
                bad
            )));
        }

        Ok(Self {
            commitment: make_commitment(&address, &nonce, hasher),
            merkle_root,
            address,
            nonce,
            siblings,
            path_indices: path_indices.to_vec(),
        })
    }

    #[must_use]
    pub fn public_signals(&self) -> PublicSignals {
        PublicSignals {
            commitment: self.commitment.as_field(),
            merkle_root: self.merkle_root,
        }
    }
}

impl fmt::Debug for ProofInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofInput")
            .field("commitment", &self.commitment.to_hex())
            .field("merkle_root", &field_to_hex(&self.merkle_root))
            .field("depth", &self.siblings.len())
            .finish_non_exhaustive()
    }
}

/// Groth16 proof in the layout Solidity verifiers expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolidityProof {
    #[serde(rename = "pA")]
    pub p_a: [String; 2],
    /// Each coordinate is `[c1, c0]`, the reverse of arkworks order.
    #[serde(rename = "pB")]
    pub p_b: [[String; 2]; 2],
    #[serde(rename = "pC")]
    pub p_c: [String; 2],
}

fn g1_to_strings(point: &G1Affine) -> [String; 2] {
    if point.infinity {
        return ["0".to_string(), "0".to_string()];
    }
    [prime_field_to_decimal(&point.x), prime_field_to_decimal(&point.y)]
}

fn fq2_to_strings(value: &Fq2) -> [String; 2] {
    [prime_field_to_decimal(&value.c1), prime_field_to_decimal(&value.c0)]
}

fn g2_to_strings(point: &G2Affine) -> [[String; 2]; 2] {
    if point.infinity {
        let zero = || ["0".to_string(), "0".to_string()];
        return [zero(), zero()];
    }
    [fq2_to_strings(&point.x), fq2_to_strings(&point.y)]
}

fn parse_g1(label: &str, coords: &[String; 2]) -> Result<G1Affine, ProofError> {
    let x: Fq = parse_prime_field(&coords[0])?;
    let y: Fq = parse_prime_field(&coords[1])?;
    if x.is_zero() && y.is_zero() {
        return Ok(<G1Affine as AffineRepr>::zero());
    }
    let point = G1Affine::new_unchecked(x, y);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(ProofError::InvalidInput(format!(
            "{} is not a valid G1 point",
            label
        )));
    }
    Ok(point)
}

fn parse_fq2(coords: &[String; 2]) -> Result<Fq2, ProofError> {
    let c1: Fq = parse_prime_field(&coords[0])?;
    let c0: Fq = parse_prime_field(&coords[1])?;
    Ok(Fq2::new(c0, c1))
}

fn parse_g2(label: &str, coords: &[[String; 2]; 2]) -> Result<G2Affine, ProofError> {
    let x = parse_fq2(&coords[0])?;
    let y = parse_fq2(&coords[1])?;
    if x.is_zero() && y.is_zero() {
        return Ok(<G2Affine as AffineRepr>::zero());
    }
    let point = G2Affine::new_unchecked(x, y);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(ProofError::InvalidInput(format!(
            "{} is not a valid G2 point",
            label
        )));
    }
    Ok(point)
}

impl SolidityProof {
    #[must_use]
    pub fn from_proof(proof: &Proof<Bn254>) -> Self {
        Self {
            p_a: g1_to_strings(&proof.a),
            p_b: g2_to_strings(&proof.b),
            p_c: g1_to_strings(&proof.c),
        }
    }

    /// Decodes and curve-checks the three proof points.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::InvalidInput`] for non-canonical coordinates or
    /// points outside the prime-order subgroup.
    pub fn to_proof(&self) -> Result<Proof<Bn254>, ProofError> {
        Ok(Proof {
            a: parse_g1("pA", &self.p_a)?,
            b: parse_g2("pB", &self.p_b)?,
            c: parse_g1("pC", &self.p_c)?,
        })
    }
}

/// Submission file written by the prover and read by the verifier.
///
/// Holds only public data; the address, nonce and Merkle path never appear.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionProof {
    pub proof: SolidityProof,
    pub public_signals: Vec<String>,
    /// Hex form of `publicSignals[0]`.
    pub commitment: String,
    /// Hex form of `publicSignals[1]`.
    pub merkle_root: String,
    pub anonymity_set_size: usize,
    /// Unix milliseconds.
    pub timestamp: u64,
}

impl SubmissionProof {
    const TIMESTAMP_TOLERANCE_MS: u64 = 30_000;

    #[must_use]
    pub fn new(
        proof: &Proof<Bn254>,
        signals: &PublicSignals,
        anonymity_set_size: usize,
        timestamp: u64,
    ) -> Self {
        Self {
            proof: SolidityProof::from_proof(proof),
            public_signals: signals.to_decimal_strings(),
            commitment: field_to_hex(&signals.commitment),
            merkle_root: field_to_hex(&signals.merkle_root),
            anonymity_set_size,
            timestamp,
        }
    }

    /// Parsed public signals.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError`] if the signals are malformed.
    pub fn signals(&self) -> Result<PublicSignals, FieldError> {
        PublicSignals::from_strings(&self.public_signals)
    }

    /// Checks shape, timestamp window and signal consistency.
    ///
    /// `now_ms` is the verifier's clock and `max_age_ms` the oldest accepted
    /// proof; a proof from slightly in the future is tolerated.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first inconsistency found.
    pub fn validate(&self, now_ms: u64, max_age_ms: u64) -> Result<()> {
        debug!("Validating submission for root {}", self.merkle_root);
        debug!("Public signals: {}", self.public_signals.len());
        debug!("Anonymity set size: {}", self.anonymity_set_size);

        let signals = self
            .signals()
            .map_err(|e| anyhow::anyhow!("Malformed public signals: {}", e))?;

        if self.timestamp > now_ms + Self::TIMESTAMP_TOLERANCE_MS {
            return Err(anyhow::anyhow!(
                "Timestamp is too far in the future: {} (current: {}, tolerance: {}ms). Please check system clock and proof timestamp.",
                self.timestamp,
                now_ms,
                Self::TIMESTAMP_TOLERANCE_MS
            ));
        }
        if now_ms > self.timestamp.saturating_add(max_age_ms) {
            return Err(anyhow::anyhow!(
                "Timestamp is too old: {} (current: {}, max age: {}ms). Please generate a fresh proof.",
                self.timestamp,
                now_ms,
                max_age_ms
            ));
        }

        let commitment = parse_field(&self.commitment)
            .map_err(|e| anyhow::anyhow!("Invalid commitment: {}", e))?;
        if commitment != signals.commitment {
            return Err(anyhow::anyhow!(
                "Commitment {} does not match publicSignals[0]",
                self.commitment
            ));
        }

        let root = parse_field(&self.merkle_root)
            .map_err(|e| anyhow::anyhow!("Invalid merkle root: {}", e))?;
        if root != signals.merkle_root {
            return Err(anyhow::anyhow!(
                "Merkle root {} does not match publicSignals[1]",
                self.merkle_root
            ));
        }

        if self.anonymity_set_size == 0 {
            return Err(anyhow::anyhow!(
                "Anonymity set size cannot be zero"
            ));
        }

        Ok(())
    }
}
