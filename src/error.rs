//! Error taxonomy for tree construction, proving and verification.
//!
//! Structural errors ([`TreeError`], [`ArtifactError`]) are non-retryable and
//! surface immediately. Constraint violations ([`ProofError::ConstraintUnsatisfied`])
//! are the expected outcome for forged membership claims and are returned as
//! ordinary values. [`RegistryError`] distinguishes an untrusted root from a
//! replayed commitment because the remedy differs.

use thiserror::Error;

/// Raised when circom Poseidon constants cannot be loaded for a width.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Poseidon parameters unavailable for width {width}: {reason}")]
pub struct HashError {
    pub width: usize,
    pub reason: String,
}

/// Errors raised while building or querying the contributor tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("Cannot build a contributor tree from an empty contributor set")]
    EmptyTree,

    #[error("Tree depth {depth} is too small for {leaves} contributors (needs at least {required})")]
    DepthTooSmall {
        depth: usize,
        leaves: usize,
        required: usize,
    },

    #[error("Tree depth {depth} exceeds the supported maximum of {max}")]
    DepthTooLarge { depth: usize, max: usize },

    #[error("Duplicate contributor {address} at positions {first} and {second}")]
    DuplicateContributor {
        address: String,
        first: usize,
        second: usize,
    },

    #[error("Leaf index {index} out of range for {len} contributors")]
    LeafIndexOutOfRange { index: usize, len: usize },

    #[error("Zero-subtree table has depth {table}, tree requires depth {tree}")]
    ZeroTableMismatch { table: usize, tree: usize },
}

/// Errors raised while decoding field elements, hex strings and addresses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("Invalid hex string '{0}'")]
    InvalidHex(String),

    #[error("Invalid decimal string '{0}'")]
    InvalidDecimal(String),

    #[error("Value {0} is not a canonical field element (must be below the field modulus)")]
    NonCanonical(String),

    #[error("Expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("Invalid Ethereum address '{0}'")]
    InvalidAddress(String),
}

/// Errors raised by proof-input assembly and the Groth16 prover.
#[derive(Debug, Error)]
pub enum ProofError {
    #[error("Invalid proof input: {0}")]
    InvalidInput(String),

    #[error("Constraint unsatisfied: {0}")]
    ConstraintUnsatisfied(String),

    #[error("Proving keys have not been generated or loaded")]
    MissingKeys,

    #[error("Constraint synthesis failed: {0}")]
    Synthesis(String),

    #[error("Key or proof serialization failed: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FieldError> for ProofError {
    fn from(err: FieldError) -> Self {
        ProofError::InvalidInput(err.to_string())
    }
}

/// Rejection reasons reported by a membership registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Merkle root {0} is not registered with the verifier; rebuild the tree and regenerate the proof")]
    RootNotRegistered(String),

    #[error("Commitment {0} already used; mint a new commitment with a fresh nonce")]
    CommitmentAlreadyUsed(String),

    #[error("Proof invalid: Groth16 verification rejected the proof")]
    InvalidProof,

    #[error("Malformed submission: {0}")]
    MalformedSubmission(String),

    #[error("Caller {0} is not the authorized root updater")]
    Unauthorized(String),

    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

impl RegistryError {
    /// Only transport-level failures are worth retrying; every other
    /// rejection is terminal for the submission that caused it.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegistryError::Unavailable(_))
    }
}

/// Errors raised while validating a persisted tree artifact.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactError {
    #[error("Proof {index} has {field} of length {got}, expected treeDepth {expected}")]
    DepthMismatch {
        index: usize,
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Hash function '{0}' cannot back a contributor membership proof")]
    UnsupportedHashFunction(String),

    #[error("contributorCount is {declared} but {actual} contributors are listed")]
    CountMismatch { declared: usize, actual: usize },

    #[error("Proof {index} has path index {bit}; direction bits must be 0 or 1")]
    InvalidPathIndex { index: usize, bit: u8 },

    #[error("Proof {index} does not fold to the artifact root")]
    RootMismatch { index: usize },

    #[error("Artifact field {field}: {source}")]
    Field {
        field: String,
        #[source]
        source: FieldError,
    },

    #[error("Tree artifact is stale: {age_secs}s old (max {max_age_secs}s); rebuild the tree")]
    Stale { age_secs: u64, max_age_secs: u64 },
}

/// Errors raised by the versioned tree rebuilder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RebuildError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("Root registration failed: {0}")]
    Registry(#[from] RegistryError),
}
