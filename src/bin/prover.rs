use anyhow::{Context, Result};
use clap::Parser;
use cti_zk_membership::{
    artifact::TreeArtifact,
    config::CONFIG_ENV_VAR,
    ethereum::{format_address, parse_address, validate_private_key},
    types::SubmissionProof,
    utils::now_millis,
    CircuitHasher, Config, ContributorProver, Nonce,
};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use log::{debug, info};
use rand::rngs::OsRng;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Prove contributor membership for one submission", long_about = None)]
struct Args {
    /// Poseidon tree artifact produced by `build_tree`.
    #[arg(short, long)]
    artifact: PathBuf,

    #[arg(long, conflicts_with = "private_key", required_unless_present = "private_key")]
    address: Option<String>,

    /// Derive the contributor address from this key instead of `--address`.
    #[arg(short, long)]
    private_key: Option<String>,

    /// Decimal or 0x-hex nonce. A fresh random nonce is drawn when omitted.
    #[arg(short, long)]
    nonce: Option<String>,

    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,
}

fn resolve_address(args: &Args) -> Result<Address> {
    if let Some(private_key) = &args.private_key {
        validate_private_key(private_key)?;
        let wallet: LocalWallet = private_key
            .trim()
            .parse()
            .context("Failed to parse private key")?;
        return Ok(wallet.address());
    }
    let address = args
        .address
        .as_deref()
        .context("Either --address or --private-key is required")?;
    parse_address(address).with_context(|| format!("Invalid contributor address '{}'", address))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Config::load_optional(args.config.as_deref())?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| config.proof.output_file.clone());

    let address = resolve_address(&args)?;
    println!("Contributor address: {}", format_address(&address));

    info!("Loading tree artifact from {}", args.artifact.display());
    let artifact = TreeArtifact::load_from_file(&args.artifact)?;
    artifact
        .validate()
        .context("Tree artifact failed validation")?;

    let now = now_millis()?;
    let freshness = artifact
        .ensure_fresh(now, config.freshness.max_age(), config.freshness.reject_stale)
        .context("Tree artifact rejected")?;
    debug!("Artifact age: {}s", freshness.age_secs);

    let hasher = CircuitHasher::new().context("Failed to load Poseidon parameters")?;

    let nonce = match &args.nonce {
        Some(nonce) => nonce
            .parse::<Nonce>()
            .with_context(|| format!("Invalid nonce '{}'", nonce))?,
        None => Nonce::generate(),
    };

    let input = artifact
        .proof_input(address, nonce, &hasher)
        .context("Failed to assemble proof input")?;
    println!("Commitment: {}", input.commitment);
    println!("Merkle root: {}", artifact.root);
    println!("Anonymity set: {}", artifact.contributor_count);

    let mut prover = ContributorProver::new(artifact.tree_depth, hasher);
    println!("Loading Groth16 keys (first run performs setup, this may take a while)...");
    prover
        .load_or_generate_keys(&config.keys, &mut OsRng)
        .context("Failed to load or generate proving keys")?;

    println!("Generating membership proof...");
    let (proof, signals) = prover
        .generate_proof(input, &mut OsRng)
        .context("Failed to generate membership proof")?;

    let submission = SubmissionProof::new(&proof, &signals, artifact.contributor_count, now);
    let json =
        serde_json::to_string_pretty(&submission).context("Failed to serialize submission")?;
    fs::write(&output, json)
        .with_context(|| format!("Failed to write submission file: {}", output.display()))?;

    info!("Submission written to {}", output.display());
    println!("Proof successfully generated and saved to {}", output.display());
    println!("Public signals:");
    println!("  commitment: {}", submission.public_signals[0]);
    println!("  merkleRoot: {}", submission.public_signals[1]);

    Ok(())
}
