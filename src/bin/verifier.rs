use anyhow::{Context, Result};
use clap::Parser;
use cti_zk_membership::{
    artifact::TreeArtifact,
    config::CONFIG_ENV_VAR,
    registry::{CommitmentStore, FileCommitmentLedger, MembershipRegistry},
    rebuild::TreeRebuilder,
    types::SubmissionProof,
    utils::{field_to_hex, now_millis},
    CircuitHasher, Config, ContributorVerifier, RegistryError, VerifierRegistry,
};
use ethers::types::Address;
use log::{debug, error, info};
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Verify a membership submission and record its commitment", long_about = None)]
struct Args {
    #[arg(short, long)]
    proof_file: PathBuf,

    /// Tree artifact whose root is trusted for this run. Local demo mode:
    /// the verifier registers this root itself as updater, so it is not an
    /// authorized-updater flow.
    #[arg(short, long)]
    artifact: PathBuf,

    /// Used-commitment ledger; defaults to the configured path.
    #[arg(short, long)]
    ledger: Option<PathBuf>,

    /// Content identifier of the submitted IOC batch.
    #[arg(short, long, default_value = "local")]
    ipfs: String,

    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Config::load_optional(args.config.as_deref())?;
    let ledger_path = args
        .ledger
        .clone()
        .unwrap_or_else(|| config.registry.commitment_ledger.clone());

    if !args.proof_file.exists() {
        return Err(anyhow::anyhow!(
            "Proof file does not exist: {}",
            args.proof_file.display()
        ));
    }
    let metadata = fs::metadata(&args.proof_file).context("Failed to read proof file metadata")?;
    if metadata.len() > config.proof.max_file_size {
        return Err(anyhow::anyhow!(
            "Proof file too large: {} bytes (max {} bytes). Regenerate the proof or raise proof.max_file_size",
            metadata.len(),
            config.proof.max_file_size
        ));
    }

    info!("Loading submission from {}", args.proof_file.display());
    let content = fs::read_to_string(&args.proof_file).context("Failed to read proof file")?;
    let submission: SubmissionProof =
        serde_json::from_str(&content).context("Failed to parse submission JSON")?;

    let now = now_millis()?;
    submission
        .validate(now, config.proof.submission_max_age_secs.saturating_mul(1000))
        .context("Submission validation failed")?;

    println!("Submission details:");
    println!("  Commitment: {}", submission.commitment);
    println!("  Merkle Root: {}", submission.merkle_root);
    println!("  Anonymity set: {}", submission.anonymity_set_size);
    println!("  Timestamp: {}", submission.timestamp);

    let artifact = TreeArtifact::load_from_file(&args.artifact)?;
    let hasher = CircuitHasher::new().context("Failed to load Poseidon parameters")?;
    artifact
        .verify_against_root(&hasher)
        .context("Tree artifact proofs do not match its root")?;
    artifact.ensure_fresh(now, config.freshness.max_age(), config.freshness.reject_stale)?;

    let verifier = ContributorVerifier::load(&config.keys.cache_dir, artifact.tree_depth)
        .with_context(|| {
            format!(
                "Failed to load verifying key for depth {} from {}. Run the prover once to perform setup",
                artifact.tree_depth,
                config.keys.cache_dir.display()
            )
        })?;

    let ledger = FileCommitmentLedger::open(&ledger_path)
        .with_context(|| format!("Failed to open ledger {}", ledger_path.display()))?;
    debug!(
        "Ledger {} holds {} commitments",
        ledger_path.display(),
        ledger.len()
    );

    // Local mode: this process is its own root updater and trusts the root
    // rebuilt from the artifact's contributor list.
    let updater = Address::zero();
    let mut registry = VerifierRegistry::with_root_history(
        updater,
        verifier,
        ledger,
        config.registry.trusted_root_history,
    );
    let contributors = artifact.contributor_set()?;
    let rebuilder = TreeRebuilder::new(artifact.tree_depth, hasher)?;
    let version = rebuilder
        .rebuild_and_register(&contributors, now, &mut registry, &updater, &config.retry)
        .context("Failed to register the artifact root")?;
    if version.tree.root() != artifact.root_field()? {
        return Err(anyhow::anyhow!(
            "Artifact root {} does not match the tree rebuilt from its contributors ({}). Rebuild the artifact",
            artifact.root,
            field_to_hex(&version.tree.root())
        ));
    }

    let proof = submission
        .proof
        .to_proof()
        .context("Submission carries malformed proof points")?;

    println!("Verifying membership proof...");
    match registry.submit(&proof, &submission.public_signals, &args.ipfs) {
        Ok(receipt) => {
            info!("Proof verification PASSED");
            println!("\n✓ Proof verification PASSED!");
            println!(
                "The submitter is one of {} registered contributors.",
                artifact.contributor_count
            );
            println!("\nCommitment recorded: {}", receipt.event.commitment);
            println!("Ledger: {}", ledger_path.display());
            Ok(())
        }
        Err(e) => {
            error!("Proof verification FAILED: {}", e);
            println!("\n✗ Proof verification FAILED!");
            println!("Error: {}", e);
            match &e {
                RegistryError::CommitmentAlreadyUsed(_) => {
                    println!("This commitment was already accepted; the submission is a replay.")
                }
                RegistryError::RootNotRegistered(_) => {
                    println!("The proof targets a different tree; rebuild and regenerate.")
                }
                _ => {}
            }
            Err(anyhow::anyhow!("Proof verification failed: {}", e))
        }
    }
}
