use anyhow::{Context, Result};
use clap::Parser;
use cti_zk_membership::{
    artifact::TreeArtifact,
    config::CONFIG_ENV_VAR,
    rebuild::TreeRebuilder,
    utils::{field_to_hex, now_millis},
    CircuitHasher, Config, ContributorSet,
};
use log::{debug, error, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Build the Poseidon contributor tree artifact", long_about = None)]
struct Args {
    /// One contributor address per line, in registration order.
    #[arg(short, long)]
    accounts_file: PathBuf,

    #[arg(short, long)]
    depth: Option<usize>,

    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Poll the accounts file every SECS seconds and rebuild when the
    /// contributor count changes.
    #[arg(short, long, value_name = "SECS", num_args = 0..=1, default_missing_value = "0")]
    watch: Option<u64>,

    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,
}

fn load_contributors(path: &Path, max_file_size: u64) -> Result<ContributorSet> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to read accounts file metadata: {}", path.display()))?;
    if metadata.len() > max_file_size {
        return Err(anyhow::anyhow!(
            "Accounts file too large: {} bytes (max {} bytes)",
            metadata.len(),
            max_file_size
        ));
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read accounts file: {}", path.display()))?;
    let addresses: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();

    ContributorSet::from_strings(&addresses)
        .with_context(|| format!("Invalid contributor list in {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Config::load_optional(args.config.as_deref())?;
    let depth = args.depth.unwrap_or(config.tree.depth);
    let output = args.output.unwrap_or_else(|| config.tree.artifact_path.clone());

    let hasher = CircuitHasher::new().context("Failed to load Poseidon parameters")?;
    let rebuilder = TreeRebuilder::new(depth, hasher).context("Invalid tree depth")?;

    let contributors = load_contributors(&args.accounts_file, config.tree.max_accounts_file_size)?;
    info!(
        "Loaded {} contributors from {}",
        contributors.len(),
        args.accounts_file.display()
    );

    let version = rebuilder
        .rebuild(&contributors, now_millis()?)
        .context("Failed to build contributor tree")?;
    TreeArtifact::from_tree(&version.tree, version.built_at_ms).save_to_file(&output)?;

    println!("Contributor tree built");
    println!("  Root: {}", field_to_hex(&version.tree.root()));
    println!("  Depth: {}", depth);
    println!("  Anonymity set: {}", version.tree.anonymity_set_size());
    println!("  Artifact: {}", output.display());

    let Some(watch) = args.watch else {
        return Ok(());
    };
    let interval = if watch == 0 {
        config.tree.poll_interval_secs
    } else {
        watch
    };
    info!("Watching {} every {}s", args.accounts_file.display(), interval);

    loop {
        thread::sleep(Duration::from_secs(interval));

        let contributors =
            match load_contributors(&args.accounts_file, config.tree.max_accounts_file_size) {
                Ok(contributors) => contributors,
                Err(e) => {
                    error!("Skipping rebuild: {:#}", e);
                    continue;
                }
            };

        match rebuilder.rebuild_if_changed(&contributors, now_millis()?) {
            Ok(Some(version)) => {
                TreeArtifact::from_tree(&version.tree, version.built_at_ms)
                    .save_to_file(&output)?;
                info!(
                    "Rebuilt tree version {} with {} contributors",
                    version.version,
                    version.tree.anonymity_set_size()
                );
            }
            Ok(None) => debug!("No contributor changes"),
            Err(e) => error!("Rebuild failed: {}", e),
        }
    }
}
