//! Groth16 circuit for anonymous contributor membership.
//!
//! Public inputs, in allocation order: `commitment`, `merkleRoot`.
//! Private witness: `address`, `nonce`, `siblings[D]`, `pathIndices[D]`.
//!
//! The circuit enforces:
//! 1. `commitment == Poseidon2(address, nonce)`
//! 2. `leaf == Poseidon1(address)`
//! 3. every direction bit is boolean
//! 4. folding `leaf` up the path with a conditional swap per level ends at `merkleRoot`
//!
//! Proving fails cleanly with [`ProofError::ConstraintUnsatisfied`] when the
//! witness does not satisfy these relations; the Groth16 prover is only
//! invoked on satisfiable assignments.

use crate::commitment::make_commitment;
use crate::config::KeysConfig;
use crate::contributor_tree::{contributor_leaf, fold_path};
use crate::error::ProofError;
use crate::ethereum::address_to_field;
use crate::hash::CircuitHasher;
use crate::types::{ProofInput, PublicSignals};
use ark_bn254::{Bn254, Fr};
use ark_ff::Zero;
use ark_groth16::{
    prepare_verifying_key, Groth16, PreparedVerifyingKey, Proof, ProvingKey, VerifyingKey,
};
use ark_r1cs_std::fields::fp::FpVar;
use ark_r1cs_std::prelude::*;
use ark_relations::r1cs::{
    ConstraintSynthesizer, ConstraintSystem, ConstraintSystemRef, SynthesisError,
};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use light_poseidon::PoseidonParameters;
use log::{debug, info};
use rand::{CryptoRng, RngCore};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// In-circuit Poseidon over `[0, inputs..]`, mirroring the native permutation.
pub fn poseidon_var(
    params: &PoseidonParameters<Fr>,
    inputs: &[FpVar<Fr>],
) -> Result<FpVar<Fr>, SynthesisError> {
    if inputs.len() + 1 != params.width {
        return Err(SynthesisError::Unsatisfiable);
    }

    let mut state: Vec<FpVar<Fr>> = Vec::with_capacity(params.width);
    state.push(FpVar::zero());
    state.extend(inputs.iter().cloned());

    let half_full = params.full_rounds / 2;
    let total = params.full_rounds + params.partial_rounds;

    for round in 0..total {
        for (i, element) in state.iter_mut().enumerate() {
            *element += params.ark[round * params.width + i];
        }

        if round < half_full || round >= half_full + params.partial_rounds {
            for element in state.iter_mut() {
                *element = element.pow_by_constant([params.alpha])?;
            }
        } else {
            state[0] = state[0].pow_by_constant([params.alpha])?;
        }

        let mut mixed = Vec::with_capacity(params.width);
        for row in &params.mds {
            let mut acc = FpVar::<Fr>::zero();
            for (coefficient, element) in row.iter().zip(&state) {
                acc += element * *coefficient;
            }
            mixed.push(acc);
        }
        state = mixed;
    }

    Ok(state.swap_remove(0))
}

/// Membership relation for a fixed tree depth.
#[derive(Clone)]
pub struct ContributorMembershipCircuit {
    pub commitment: Option<Fr>,
    pub merkle_root: Option<Fr>,
    pub address: Option<Fr>,
    pub nonce: Option<Fr>,
    pub siblings: Vec<Option<Fr>>,
    pub path_indices: Vec<Option<bool>>,
    depth: usize,
    leaf_params: Arc<PoseidonParameters<Fr>>,
    node_params: Arc<PoseidonParameters<Fr>>,
}

impl ContributorMembershipCircuit {
    /// Shape-only instance used for key generation.
    #[must_use]
    pub fn blank(depth: usize, hasher: &CircuitHasher) -> Self {
        let zero = Some(Fr::zero());
        Self {
            commitment: zero,
            merkle_root: zero,
            address: zero,
            nonce: zero,
            siblings: vec![zero; depth],
            path_indices: vec![Some(false); depth],
            depth,
            leaf_params: hasher.arity1_parameters(),
            node_params: hasher.arity2_parameters(),
        }
    }

    /// Fully assigned instance. Direction bits must already be 0 or 1.
    #[must_use]
    pub fn from_input(input: &ProofInput, depth: usize, hasher: &CircuitHasher) -> Self {
        Self {
            commitment: Some(input.commitment.as_field()),
            merkle_root: Some(input.merkle_root),
            address: Some(address_to_field(&input.address)),
            nonce: Some(input.nonce.as_field()),
            siblings: input.siblings.iter().copied().map(Some).collect(),
            path_indices: input.path_indices.iter().map(|bit| Some(*bit == 1)).collect(),
            depth,
            leaf_params: hasher.arity1_parameters(),
            node_params: hasher.arity2_parameters(),
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl ConstraintSynthesizer<Fr> for ContributorMembershipCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
        if self.siblings.len() != self.depth || self.path_indices.len() != self.depth {
            return Err(SynthesisError::Unsatisfiable);
        }

        let commitment = FpVar::new_input(cs.clone(), || {
            self.commitment.ok_or(SynthesisError::AssignmentMissing)
        })?;
        let merkle_root = FpVar::new_input(cs.clone(), || {
            self.merkle_root.ok_or(SynthesisError::AssignmentMissing)
        })?;

        let address = FpVar::new_witness(cs.clone(), || {
            self.address.ok_or(SynthesisError::AssignmentMissing)
        })?;
        let nonce = FpVar::new_witness(cs.clone(), || {
            self.nonce.ok_or(SynthesisError::AssignmentMissing)
        })?;

        let computed = poseidon_var(&self.node_params, &[address.clone(), nonce])?;
        computed.enforce_equal(&commitment)?;

        let mut current = poseidon_var(&self.leaf_params, &[address])?;
        for (sibling_value, bit_value) in self.siblings.iter().zip(&self.path_indices) {
            let sibling = FpVar::new_witness(cs.clone(), || {
                sibling_value.ok_or(SynthesisError::AssignmentMissing)
            })?;
            // Boolean allocation constrains the bit to {0, 1}.
            let is_right = Boolean::new_witness(cs.clone(), || {
                bit_value.ok_or(SynthesisError::AssignmentMissing)
            })?;

            let left = is_right.select(&sibling, &current)?;
            let right = is_right.select(&current, &sibling)?;
            current = poseidon_var(&self.node_params, &[left, right])?;
        }

        current.enforce_equal(&merkle_root)?;
        Ok(())
    }
}

/// Groth16 verifier with a prepared verifying key.
#[derive(Clone)]
pub struct ContributorVerifier {
    pvk: Arc<PreparedVerifyingKey<Bn254>>,
}

impl ContributorVerifier {
    #[must_use]
    pub fn new(vk: &VerifyingKey<Bn254>) -> Self {
        Self {
            pvk: Arc::new(prepare_verifying_key(vk)),
        }
    }

    /// Loads the verifying key cached for `depth` under `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::MissingKeys`] if no key is cached.
    pub fn load(dir: &Path, depth: usize) -> Result<Self, ProofError> {
        let path = vk_path(dir, depth);
        if !path.exists() {
            return Err(ProofError::MissingKeys);
        }
        let vk: VerifyingKey<Bn254> = read_key(&path)?;
        Ok(Self::new(&vk))
    }

    /// Checks a proof against `[commitment, merkleRoot]`.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::Synthesis`] if the pairing check cannot run.
    pub fn verify(&self, proof: &Proof<Bn254>, signals: &PublicSignals) -> Result<bool, ProofError> {
        Groth16::<Bn254>::verify_proof(&self.pvk, proof, &signals.to_vec())
            .map_err(|e| ProofError::Synthesis(e.to_string()))
    }
}

/// Key file for the proving key at `depth`.
#[must_use]
pub fn pk_path(dir: &Path, depth: usize) -> PathBuf {
    dir.join(format!("contributor_d{}.pk", depth))
}

/// Key file for the verifying key at `depth`.
#[must_use]
pub fn vk_path(dir: &Path, depth: usize) -> PathBuf {
    dir.join(format!("contributor_d{}.vk", depth))
}

fn write_key<T: CanonicalSerialize>(path: &Path, key: &T) -> Result<(), ProofError> {
    let mut writer = BufWriter::new(File::create(path)?);
    key.serialize_uncompressed(&mut writer)
        .map_err(|e| ProofError::Serialization(e.to_string()))
}

fn read_key<T: CanonicalDeserialize>(path: &Path) -> Result<T, ProofError> {
    let reader = BufReader::new(File::open(path)?);
    // Keys are only ever read back from the local cache this crate wrote.
    T::deserialize_uncompressed_unchecked(reader)
        .map_err(|e| ProofError::Serialization(e.to_string()))
}

/// Prover for contributor membership with cached keys.
pub struct ContributorProver {
    depth: usize,
    hasher: CircuitHasher,
    pk: Option<Arc<ProvingKey<Bn254>>>,
}

impl ContributorProver {
    /// Create a new prover with no cached keys.
    #[must_use]
    pub fn new(depth: usize, hasher: CircuitHasher) -> Self {
        Self {
            depth,
            hasher,
            pk: None,
        }
    }

    /// Create a prover with a pre-generated proving key.
    #[must_use]
    pub fn with_keys(depth: usize, hasher: CircuitHasher, pk: Arc<ProvingKey<Bn254>>) -> Self {
        Self {
            depth,
            hasher,
            pk: Some(pk),
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[must_use]
    pub fn has_keys(&self) -> bool {
        self.pk.is_some()
    }

    pub fn proving_key(&self) -> Option<Arc<ProvingKey<Bn254>>> {
        self.pk.clone()
    }

    /// Runs the circuit-specific setup and caches the keys in memory.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::Synthesis`] if parameter generation fails.
    pub fn generate_and_cache_keys<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<(), ProofError> {
        info!("Generating Groth16 keys for depth {}", self.depth);
        let circuit = ContributorMembershipCircuit::blank(self.depth, &self.hasher);
        let pk = Groth16::<Bn254>::generate_random_parameters_with_reduction(circuit, rng)
            .map_err(|e| ProofError::Synthesis(e.to_string()))?;
        self.pk = Some(Arc::new(pk));
        Ok(())
    }

    /// Writes the cached keys to `dir` as `contributor_d{depth}.{pk,vk}`.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::MissingKeys`] if no keys are cached, or an I/O
    /// or serialization error.
    pub fn save_keys(&self, dir: &Path) -> Result<(), ProofError> {
        let pk = self.pk.as_ref().ok_or(ProofError::MissingKeys)?;
        fs::create_dir_all(dir)?;
        write_key(&pk_path(dir, self.depth), &**pk)?;
        write_key(&vk_path(dir, self.depth), &pk.vk)?;
        debug!("Saved keys for depth {} to {}", self.depth, dir.display());
        Ok(())
    }

    /// Loads keys previously written by [`save_keys`](Self::save_keys).
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::MissingKeys`] if the key file does not exist.
    pub fn load_keys(&mut self, dir: &Path) -> Result<(), ProofError> {
        let path = pk_path(dir, self.depth);
        if !path.exists() {
            return Err(ProofError::MissingKeys);
        }
        let pk: ProvingKey<Bn254> = read_key(&path)?;
        self.pk = Some(Arc::new(pk));
        debug!("Loaded keys for depth {} from {}", self.depth, dir.display());
        Ok(())
    }

    /// Loads cached keys when persistence is enabled, otherwise generates
    /// (and, with persistence, saves) a fresh pair.
    ///
    /// # Errors
    ///
    /// Propagates key generation, I/O and serialization failures.
    pub fn load_or_generate_keys<R: RngCore + CryptoRng>(
        &mut self,
        keys: &KeysConfig,
        rng: &mut R,
    ) -> Result<(), ProofError> {
        if keys.enable_persistence {
            match self.load_keys(&keys.cache_dir) {
                Ok(()) => return Ok(()),
                Err(ProofError::MissingKeys) => {
                    info!("No cached keys in {}", keys.cache_dir.display());
                }
                Err(e) => return Err(e),
            }
        }

        self.generate_and_cache_keys(rng)?;

        if keys.enable_persistence {
            self.save_keys(&keys.cache_dir)?;
        }
        Ok(())
    }

    /// Verifier bound to the cached verifying key.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::MissingKeys`] if no keys are cached.
    pub fn verifier(&self) -> Result<ContributorVerifier, ProofError> {
        let pk = self.pk.as_ref().ok_or(ProofError::MissingKeys)?;
        Ok(ContributorVerifier::new(&pk.vk))
    }

    /// Native pre-check of the membership relation.
    ///
    /// # Errors
    ///
    /// - [`ProofError::InvalidInput`] for a malformed path
    /// - [`ProofError::ConstraintUnsatisfied`] if the commitment or the path
    ///   does not match
    pub fn check_input(&self, input: &ProofInput) -> Result<(), ProofError> {
        if input.siblings.len() != self.depth || input.path_indices.len() != self.depth {
            return Err(ProofError::InvalidInput(format!(
                "Merkle path has {} siblings and {} path indices, expected {}",
                input.siblings.len(),
                input.path_indices.len(),
                self.depth
            )));
        }
        if let Some(bad) = input.path_indices.iter().find(|bit| **bit > 1) {
            return Err(ProofError::InvalidInput(format!(
                "path index {} is not a direction bit",
                bad
            )));
        }

        let expected = make_commitment(&input.address, &input.nonce, &self.hasher);
        if expected != input.commitment {
            return Err(ProofError::ConstraintUnsatisfied(
                "commitment does not equal Poseidon(address, nonce)".to_string(),
            ));
        }

        let leaf = contributor_leaf(&input.address, &self.hasher);
        if fold_path(leaf, &input.siblings, &input.path_indices, &self.hasher)
            != Some(input.merkle_root)
        {
            return Err(ProofError::ConstraintUnsatisfied(
                "Merkle path from Poseidon(address) does not reach the root".to_string(),
            ));
        }

        Ok(())
    }

    /// Synthesizes the assigned circuit and reports the first failing constraint.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::ConstraintUnsatisfied`] naming the constraint.
    pub fn check_constraints(&self, input: &ProofInput) -> Result<(), ProofError> {
        let circuit = ContributorMembershipCircuit::from_input(input, self.depth, &self.hasher);
        let cs = ConstraintSystem::<Fr>::new_ref();
        circuit
            .generate_constraints(cs.clone())
            .map_err(|e| ProofError::Synthesis(e.to_string()))?;

        debug!("Membership circuit has {} constraints", cs.num_constraints());

        let satisfied = cs
            .is_satisfied()
            .map_err(|e| ProofError::Synthesis(e.to_string()))?;
        if !satisfied {
            let which = cs
                .which_is_unsatisfied()
                .map_err(|e| ProofError::Synthesis(e.to_string()))?
                .unwrap_or_else(|| "unknown constraint".to_string());
            return Err(ProofError::ConstraintUnsatisfied(which));
        }
        Ok(())
    }

    /// Proves membership for `input`.
    ///
    /// # Errors
    ///
    /// - [`ProofError::MissingKeys`] if no keys are cached
    /// - [`ProofError::InvalidInput`] or [`ProofError::ConstraintUnsatisfied`]
    ///   when the witness does not satisfy the relation
    /// - [`ProofError::Synthesis`] if Groth16 proving fails
    pub fn generate_proof<R: RngCore + CryptoRng>(
        &self,
        input: ProofInput,
        rng: &mut R,
    ) -> Result<(Proof<Bn254>, PublicSignals), ProofError> {
        let pk = self.pk.as_ref().ok_or(ProofError::MissingKeys)?;

        self.check_input(&input)?;
        self.check_constraints(&input)?;

        let signals = input.public_signals();
        let circuit = ContributorMembershipCircuit::from_input(&input, self.depth, &self.hasher);
        drop(input);

        let proof = Groth16::<Bn254>::create_random_proof_with_reduction(circuit, pk, rng)
            .map_err(|e| ProofError::Synthesis(e.to_string()))?;

        debug!("Generated membership proof for commitment {}", signals.commitment());
        Ok((proof, signals))
    }

    /// Verifies a proof with the cached verifying key.
    ///
    /// # Errors
    ///
    /// Returns [`ProofError::MissingKeys`] if no keys are cached.
    pub fn verify_proof(
        &self,
        proof: &Proof<Bn254>,
        signals: &PublicSignals,
    ) -> Result<bool, ProofError> {
        self.verifier()?.verify(proof, signals)
    }
}
