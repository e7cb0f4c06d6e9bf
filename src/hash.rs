//! Hash primitives shared by the contributor tree, commitments and the circuit.
//!
//! Poseidon is the circom-compatible BN254 instance (x^5 S-box, widths 2 and
//! 3). The permutation is evaluated directly from the circom round constants
//! so the native hasher and the R1CS gadget in [`crate::circuit`] consume the
//! very same [`PoseidonParameters`]. Keccak-256 backs the IOC batch tree only.

use crate::error::HashError;
use ark_bn254::Fr;
use ark_ff::{Field, Zero};
use light_poseidon::{parameters::bn254_x5::get_poseidon_parameters, PoseidonParameters};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::sync::Arc;

pub const HASH_SIZE: usize = 32;

/// Session-scoped Poseidon instance for arities 1 and 2.
///
/// Cloning is cheap; the round constants are shared behind `Arc`.
#[derive(Clone)]
pub struct CircuitHasher {
    arity1: Arc<PoseidonParameters<Fr>>,
    arity2: Arc<PoseidonParameters<Fr>>,
}

impl fmt::Debug for CircuitHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitHasher")
            .field("arity1_width", &self.arity1.width)
            .field("arity2_width", &self.arity2.width)
            .finish()
    }
}

fn load_parameters(width: usize) -> Result<PoseidonParameters<Fr>, HashError> {
    get_poseidon_parameters::<Fr>(width as u8).map_err(|e| HashError {
        width,
        reason: e.to_string(),
    })
}

impl CircuitHasher {
    /// Loads the circom constants for state widths 2 and 3.
    ///
    /// # Errors
    /// Returns [`HashError`] if the constant tables cannot be loaded.
    pub fn new() -> Result<Self, HashError> {
        Ok(Self {
            arity1: Arc::new(load_parameters(2)?),
            arity2: Arc::new(load_parameters(3)?),
        })
    }

    /// `Poseidon1(x)`, used for contributor leaves.
    #[must_use]
    pub fn hash1(&self, input: Fr) -> Fr {
        permute(&self.arity1, &[input])
    }

    /// `Poseidon2(left, right)`, used for tree nodes and commitments.
    #[must_use]
    pub fn hash2(&self, left: Fr, right: Fr) -> Fr {
        permute(&self.arity2, &[left, right])
    }

    pub fn arity1_parameters(&self) -> Arc<PoseidonParameters<Fr>> {
        Arc::clone(&self.arity1)
    }

    pub fn arity2_parameters(&self) -> Arc<PoseidonParameters<Fr>> {
        Arc::clone(&self.arity2)
    }
}

/// Runs the Poseidon permutation over `[0, inputs..]` and returns `state[0]`.
///
/// Round schedule: half of the full rounds, then the partial rounds (S-box on
/// the first element only), then the remaining full rounds. Each round adds
/// constants, applies the S-box and multiplies by the MDS matrix.
fn permute(params: &PoseidonParameters<Fr>, inputs: &[Fr]) -> Fr {
    debug_assert_eq!(inputs.len() + 1, params.width);

    let mut state = Vec::with_capacity(params.width);
    state.push(Fr::zero());
    state.extend_from_slice(inputs);

    let half_full = params.full_rounds / 2;
    let total = params.full_rounds + params.partial_rounds;

    for round in 0..total {
        for (i, element) in state.iter_mut().enumerate() {
            *element += params.ark[round * params.width + i];
        }

        if round < half_full || round >= half_full + params.partial_rounds {
            for element in state.iter_mut() {
                *element = element.pow([params.alpha]);
            }
        } else {
            state[0] = state[0].pow([params.alpha]);
        }

        state = params
            .mds
            .iter()
            .map(|row| row.iter().zip(&state).map(|(m, s)| *m * s).sum())
            .collect();
    }

    state[0]
}

/// Keccak-256 digest.
#[must_use]
pub fn keccak256(data: &[u8]) -> [u8; HASH_SIZE] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hashes a node pair with the smaller operand first (`sortPairs` semantics),
/// so proofs carry no direction bits.
#[must_use]
pub fn keccak_sorted_pair(a: &[u8; HASH_SIZE], b: &[u8; HASH_SIZE]) -> [u8; HASH_SIZE] {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Keccak256::new();
    hasher.update(first);
    hasher.update(second);
    hasher.finalize().into()
}
