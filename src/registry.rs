//! Verifier-side membership registry: trusted roots and used commitments.
//!
//! [`MembershipRegistry`] is the interface the platform consumes from its
//! on-chain verifier. [`VerifierRegistry`] is an in-process implementation
//! backed by a [`CommitmentStore`], used by the `verifier` binary and tests.
//!
//! A submission is accepted only when its root is trusted and its
//! commitment is unused; acceptance marks the commitment used forever.

use crate::circuit::ContributorVerifier;
use crate::commitment::Commitment;
use crate::error::RegistryError;
use crate::ethereum::format_address;
use crate::types::PublicSignals;
use crate::utils::field_to_hex;
use ark_bn254::{Bn254, Fr};
use ark_groth16::Proof;
use ethers::types::Address;
use log::{debug, info, warn};
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Default number of superseded roots that stay trusted.
pub const DEFAULT_ROOT_HISTORY: usize = 8;

/// Emitted for every accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionEvent {
    pub commitment: Commitment,
    pub merkle_root: Fr,
    pub ipfs_pointer: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    /// Position of the accepted submission in the registry's batch log.
    pub batch_index: u64,
    pub event: SubmissionEvent,
}

pub trait MembershipRegistry {
    /// Trusts `root`. Only the authorized updater may call this.
    fn register_root(&mut self, caller: &Address, root: Fr) -> Result<(), RegistryError>;

    /// Withdraws trust from `root`; returns whether it was trusted.
    fn revoke_root(&mut self, caller: &Address, root: &Fr) -> Result<bool, RegistryError>;

    fn is_root_trusted(&self, root: &Fr) -> bool;

    fn is_commitment_used(&self, commitment: &Commitment) -> Result<bool, RegistryError>;

    /// Checks and records a submission. `public_signals` are the decimal
    /// strings `[commitment, merkleRoot]` as passed to the verifier contract.
    fn submit(
        &mut self,
        proof: &Proof<Bn254>,
        public_signals: &[String],
        ipfs_pointer: &str,
    ) -> Result<SubmissionReceipt, RegistryError>;
}

/// Set of commitments that have already been accepted.
pub trait CommitmentStore {
    fn contains(&self, commitment: &Commitment) -> Result<bool, RegistryError>;

    /// Records `commitment`; returns `false` if it was already present.
    fn insert(&mut self, commitment: &Commitment) -> Result<bool, RegistryError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryCommitmentStore {
    used: HashSet<Commitment>,
}

impl InMemoryCommitmentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommitmentStore for InMemoryCommitmentStore {
    fn contains(&self, commitment: &Commitment) -> Result<bool, RegistryError> {
        Ok(self.used.contains(commitment))
    }

    fn insert(&mut self, commitment: &Commitment) -> Result<bool, RegistryError> {
        Ok(self.used.insert(*commitment))
    }

    fn len(&self) -> usize {
        self.used.len()
    }
}

/// Append-only ledger file, one lowercase `0x` hex commitment per line.
///
/// The file is read once on open; the in-memory copy answers lookups and
/// every insert is appended and flushed before it is reported.
#[derive(Debug)]
pub struct FileCommitmentLedger {
    path: PathBuf,
    used: HashSet<String>,
}

fn ledger_unavailable(path: &Path, action: &str, err: std::io::Error) -> RegistryError {
    RegistryError::Unavailable(format!(
        "failed to {} commitment ledger {}: {}",
        action,
        path.display(),
        err
    ))
}

impl FileCommitmentLedger {
    /// Opens (or creates) the ledger at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unavailable`] if the file cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| ledger_unavailable(&path, "open", e))?;

        let mut used = HashSet::new();
        for line in BufReader::new(&file).lines() {
            let line = line.map_err(|e| ledger_unavailable(&path, "read", e))?;
            let entry = line.trim().to_lowercase();
            if !entry.is_empty() {
                used.insert(entry);
            }
        }
        debug!(
            "Loaded {} used commitments from {}",
            used.len(),
            path.display()
        );
        Ok(Self { path, used })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CommitmentStore for FileCommitmentLedger {
    fn contains(&self, commitment: &Commitment) -> Result<bool, RegistryError> {
        Ok(self.used.contains(&commitment.to_hex()))
    }

    fn insert(&mut self, commitment: &Commitment) -> Result<bool, RegistryError> {
        let entry = commitment.to_hex();
        if self.used.contains(&entry) {
            return Ok(false);
        }

        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| ledger_unavailable(&self.path, "open", e))?;
        writeln!(file, "{}", entry).map_err(|e| ledger_unavailable(&self.path, "append to", e))?;
        file.flush()
            .map_err(|e| ledger_unavailable(&self.path, "flush", e))?;

        self.used.insert(entry);
        Ok(true)
    }

    fn len(&self) -> usize {
        self.used.len()
    }
}

/// In-process verifier with a bounded trusted-root history.
pub struct VerifierRegistry<S: CommitmentStore> {
    updater: Address,
    verifier: ContributorVerifier,
    roots: VecDeque<Fr>,
    root_history: usize,
    store: S,
    events: Vec<SubmissionEvent>,
}

impl<S: CommitmentStore> VerifierRegistry<S> {
    #[must_use]
    pub fn new(updater: Address, verifier: ContributorVerifier, store: S) -> Self {
        Self::with_root_history(updater, verifier, store, DEFAULT_ROOT_HISTORY)
    }

    /// `root_history` is the number of roots trusted at once (at least one).
    #[must_use]
    pub fn with_root_history(
        updater: Address,
        verifier: ContributorVerifier,
        store: S,
        root_history: usize,
    ) -> Self {
        Self {
            updater,
            verifier,
            roots: VecDeque::new(),
            root_history: root_history.max(1),
            store,
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn updater(&self) -> Address {
        self.updater
    }

    /// Most recently registered root still trusted.
    #[must_use]
    pub fn current_root(&self) -> Option<Fr> {
        self.roots.front().copied()
    }

    /// Trusted roots, newest first.
    pub fn trusted_roots(&self) -> impl Iterator<Item = &Fr> {
        self.roots.iter()
    }

    /// Accepted submissions in order.
    #[must_use]
    pub fn events(&self) -> &[SubmissionEvent] {
        &self.events
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    fn authorize(&self, caller: &Address) -> Result<(), RegistryError> {
        if *caller != self.updater {
            return Err(RegistryError::Unauthorized(format_address(caller)));
        }
        Ok(())
    }
}

impl<S: CommitmentStore> MembershipRegistry for VerifierRegistry<S> {
    fn register_root(&mut self, caller: &Address, root: Fr) -> Result<(), RegistryError> {
        self.authorize(caller)?;

        self.roots.retain(|r| *r != root);
        self.roots.push_front(root);
        while self.roots.len() > self.root_history {
            if let Some(evicted) = self.roots.pop_back() {
                debug!("Root {} fell out of the trusted window", field_to_hex(&evicted));
            }
        }
        info!("Registered trusted root {}", field_to_hex(&root));
        Ok(())
    }

    fn revoke_root(&mut self, caller: &Address, root: &Fr) -> Result<bool, RegistryError> {
        self.authorize(caller)?;
        let before = self.roots.len();
        self.roots.retain(|r| r != root);
        let revoked = self.roots.len() != before;
        if revoked {
            info!("Revoked root {}", field_to_hex(root));
        }
        Ok(revoked)
    }

    fn is_root_trusted(&self, root: &Fr) -> bool {
        self.roots.contains(root)
    }

    fn is_commitment_used(&self, commitment: &Commitment) -> Result<bool, RegistryError> {
        self.store.contains(commitment)
    }

    fn submit(
        &mut self,
        proof: &Proof<Bn254>,
        public_signals: &[String],
        ipfs_pointer: &str,
    ) -> Result<SubmissionReceipt, RegistryError> {
        let signals = PublicSignals::from_strings(public_signals)
            .map_err(|e| RegistryError::MalformedSubmission(e.to_string()))?;
        if ipfs_pointer.trim().is_empty() {
            return Err(RegistryError::MalformedSubmission(
                "IPFS pointer is empty".to_string(),
            ));
        }

        let root_hex = field_to_hex(&signals.merkle_root);
        if !self.is_root_trusted(&signals.merkle_root) {
            warn!("Rejected submission against unregistered root {}", root_hex);
            return Err(RegistryError::RootNotRegistered(root_hex));
        }

        let commitment = signals.commitment();
        if self.store.contains(&commitment)? {
            warn!("Rejected replayed commitment {}", commitment);
            return Err(RegistryError::CommitmentAlreadyUsed(commitment.to_hex()));
        }

        let valid = self
            .verifier
            .verify(proof, &signals)
            .map_err(|e| RegistryError::MalformedSubmission(e.to_string()))?;
        if !valid {
            return Err(RegistryError::InvalidProof);
        }

        if !self.store.insert(&commitment)? {
            return Err(RegistryError::CommitmentAlreadyUsed(commitment.to_hex()));
        }

        let event = SubmissionEvent {
            commitment,
            merkle_root: signals.merkle_root,
            ipfs_pointer: ipfs_pointer.to_string(),
        };
        let batch_index = self.events.len() as u64;
        self.events.push(event.clone());
        info!(
            "Accepted submission #{} (commitment {}, root {}, ipfs {})",
            batch_index, commitment, root_hex, ipfs_pointer
        );

        Ok(SubmissionReceipt { batch_index, event })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::ContributorProver;
    use crate::commitment::{make_commitment, Nonce};
    use crate::contributor_tree::{build_tree, ZeroSubtreeTable};
    use crate::ethereum::{parse_address, ContributorSet};
    use crate::hash::CircuitHasher;
    use crate::types::ProofInput;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::OnceLock;
    use tempfile::TempDir;

    const DEPTH: usize = 3;

    struct Fixture {
        prover: ContributorProver,
        root: Fr,
        proof: Proof<Bn254>,
        signals: PublicSignals,
    }

    // Setup and proving are slow; share one proof across the module.
    fn fixture() -> &'static Fixture {
        static FIXTURE: OnceLock<Fixture> = OnceLock::new();
        FIXTURE.get_or_init(|| {
            let hasher = CircuitHasher::new().unwrap();
            let table = ZeroSubtreeTable::new(DEPTH, &hasher).unwrap();
            let set = ContributorSet::from_strings(&[
                "0xAAA".to_string(),
                "0xBBB".to_string(),
                "0xCCC".to_string(),
            ])
            .unwrap();
            let tree = build_tree(&set, DEPTH, &table, &hasher).unwrap();
            let mut rng = StdRng::seed_from_u64(11);

            let mut prover = ContributorProver::new(DEPTH, hasher.clone());
            prover.generate_and_cache_keys(&mut rng).unwrap();

            let address = parse_address("0xBBB").unwrap();
            let nonce = Nonce::random(&mut rng);
            let path = tree.proof_for(&address).unwrap();
            let input = ProofInput::new(address, nonce, path, tree.root(), &hasher);
            let (proof, signals) = prover.generate_proof(input, &mut rng).unwrap();

            Fixture {
                prover,
                root: tree.root(),
                proof,
                signals,
            }
        })
    }

    fn updater() -> Address {
        parse_address("0x1111111111111111111111111111111111111111").unwrap()
    }

    fn registry() -> VerifierRegistry<InMemoryCommitmentStore> {
        let verifier = fixture().prover.verifier().unwrap();
        VerifierRegistry::new(updater(), verifier, InMemoryCommitmentStore::new())
    }

    #[test]
    fn test_only_updater_registers_roots() {
        let mut registry = registry();
        let intruder = parse_address("0x2222222222222222222222222222222222222222").unwrap();
        assert!(matches!(
            registry.register_root(&intruder, Fr::from(1u64)),
            Err(RegistryError::Unauthorized(_))
        ));
        assert!(!registry.is_root_trusted(&Fr::from(1u64)));

        registry.register_root(&updater(), Fr::from(1u64)).unwrap();
        assert!(registry.is_root_trusted(&Fr::from(1u64)));
        assert_eq!(registry.current_root(), Some(Fr::from(1u64)));
    }

    #[test]
    fn test_root_history_is_bounded() {
        let verifier = fixture().prover.verifier().unwrap();
        let mut registry =
            VerifierRegistry::with_root_history(updater(), verifier, InMemoryCommitmentStore::new(), 2);
        for i in 1..=3u64 {
            registry.register_root(&updater(), Fr::from(i)).unwrap();
        }
        assert!(!registry.is_root_trusted(&Fr::from(1u64)));
        assert!(registry.is_root_trusted(&Fr::from(2u64)));
        assert!(registry.is_root_trusted(&Fr::from(3u64)));

        assert!(registry.revoke_root(&updater(), &Fr::from(3u64)).unwrap());
        assert!(!registry.revoke_root(&updater(), &Fr::from(3u64)).unwrap());
        assert_eq!(registry.current_root(), Some(Fr::from(2u64)));
    }

    #[test]
    fn test_accept_then_replay_rejected() {
        let fx = fixture();
        let mut registry = registry();
        registry.register_root(&updater(), fx.root).unwrap();
        let signals = fx.signals.to_decimal_strings();

        let receipt = registry.submit(&fx.proof, &signals, "QmBatch1").unwrap();
        assert_eq!(receipt.batch_index, 0);
        assert_eq!(receipt.event.commitment, fx.signals.commitment());
        assert!(registry.is_commitment_used(&fx.signals.commitment()).unwrap());

        assert_eq!(
            registry.submit(&fx.proof, &signals, "QmBatch2").unwrap_err(),
            RegistryError::CommitmentAlreadyUsed(fx.signals.commitment().to_hex())
        );
        assert_eq!(registry.events().len(), 1);
    }

    #[test]
    fn test_unregistered_root_rejected_before_replay_check() {
        let fx = fixture();
        let mut registry = registry();
        let signals = fx.signals.to_decimal_strings();
        assert!(matches!(
            registry.submit(&fx.proof, &signals, "QmBatch"),
            Err(RegistryError::RootNotRegistered(_))
        ));
        assert!(!registry.is_commitment_used(&fx.signals.commitment()).unwrap());
    }

    #[test]
    fn test_malformed_signals() {
        let fx = fixture();
        let mut registry = registry();
        registry.register_root(&updater(), fx.root).unwrap();

        let short = vec![fx.signals.to_decimal_strings()[0].clone()];
        assert!(matches!(
            registry.submit(&fx.proof, &short, "QmBatch"),
            Err(RegistryError::MalformedSubmission(_))
        ));
        assert!(matches!(
            registry.submit(&fx.proof, &fx.signals.to_decimal_strings(), " "),
            Err(RegistryError::MalformedSubmission(_))
        ));
    }

    #[test]
    fn test_forged_commitment_is_invalid_proof() {
        let fx = fixture();
        let mut registry = registry();
        registry.register_root(&updater(), fx.root).unwrap();

        let hasher = CircuitHasher::new().unwrap();
        let other = make_commitment(
            &parse_address("0xBBB").unwrap(),
            &"42".parse::<Nonce>().unwrap(),
            &hasher,
        );
        let forged = PublicSignals {
            commitment: other.as_field(),
            merkle_root: fx.root,
        };
        assert_eq!(
            registry
                .submit(&fx.proof, &forged.to_decimal_strings(), "QmBatch")
                .unwrap_err(),
            RegistryError::InvalidProof
        );
        assert!(!registry.is_commitment_used(&other).unwrap());
    }

    #[test]
    fn test_file_ledger_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("commitments.txt");
        let commitment = Commitment::from_field(Fr::from(77u64));

        let mut ledger = FileCommitmentLedger::open(&path).unwrap();
        assert!(ledger.is_empty());
        assert!(ledger.insert(&commitment).unwrap());
        assert!(!ledger.insert(&commitment).unwrap());

        let reopened = FileCommitmentLedger::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(reopened.contains(&commitment).unwrap());

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, format!("{}\n", commitment.to_hex()));
    }
}
