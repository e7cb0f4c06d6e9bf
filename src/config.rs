//! Configuration file support for the contributor membership pipeline.
//!
//! Every section and field has a default, so a partial TOML file (or none at
//! all) yields a working configuration.

use crate::retry::RetryPolicy;
use crate::{STALE_AFTER_SECS, TREE_DEPTH};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_ACCOUNTS_FILE_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_PROOF_FILE_SIZE: u64 = 1024 * 1024;
const DEFAULT_SUBMISSION_MAX_AGE_SECS: u64 = 86400;
const DEFAULT_TRUSTED_ROOT_HISTORY: usize = 8;

/// Environment variable naming the config file for every binary.
pub const CONFIG_ENV_VAR: &str = "CTI_ZK_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tree: TreeConfig,
    #[serde(default)]
    pub proof: ProofConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub freshness: FreshnessConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    #[serde(default = "default_tree_depth")]
    pub depth: usize,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_artifact_path")]
    pub artifact_path: PathBuf,
    #[serde(default = "default_max_accounts_file_size")]
    pub max_accounts_file_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofConfig {
    #[serde(default = "default_proof_output_file")]
    pub output_file: PathBuf,
    #[serde(default = "default_max_proof_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_submission_max_age_secs")]
    pub submission_max_age_secs: u64,
}

/// Groth16 key cache. Keys are named by tree depth under `cache_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    #[serde(default = "default_keys_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_true")]
    pub enable_persistence: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessConfig {
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default)]
    pub reject_stale: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_trusted_root_history")]
    pub trusted_root_history: usize,
    #[serde(default = "default_commitment_ledger")]
    pub commitment_ledger: PathBuf,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            depth: TREE_DEPTH,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            artifact_path: default_artifact_path(),
            max_accounts_file_size: DEFAULT_MAX_ACCOUNTS_FILE_SIZE,
        }
    }
}

impl Default for ProofConfig {
    fn default() -> Self {
        Self {
            output_file: default_proof_output_file(),
            max_file_size: DEFAULT_MAX_PROOF_FILE_SIZE,
            submission_max_age_secs: DEFAULT_SUBMISSION_MAX_AGE_SECS,
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_keys_dir(),
            enable_persistence: true,
        }
    }
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            max_age_secs: STALE_AFTER_SECS,
            reject_stale: false,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            trusted_root_history: DEFAULT_TRUSTED_ROOT_HISTORY,
            commitment_ledger: default_commitment_ledger(),
        }
    }
}

impl FreshnessConfig {
    #[must_use]
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

fn default_tree_depth() -> usize {
    TREE_DEPTH
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_artifact_path() -> PathBuf {
    PathBuf::from("contributor-merkle-tree.json")
}

fn default_max_accounts_file_size() -> u64 {
    DEFAULT_MAX_ACCOUNTS_FILE_SIZE
}

fn default_proof_output_file() -> PathBuf {
    PathBuf::from("submission.json")
}

fn default_max_proof_file_size() -> u64 {
    DEFAULT_MAX_PROOF_FILE_SIZE
}

fn default_submission_max_age_secs() -> u64 {
    DEFAULT_SUBMISSION_MAX_AGE_SECS
}

fn default_keys_dir() -> PathBuf {
    PathBuf::from(".keys")
}

fn default_true() -> bool {
    true
}

fn default_max_age_secs() -> u64 {
    STALE_AFTER_SECS
}

fn default_trusted_root_history() -> usize {
    DEFAULT_TRUSTED_ROOT_HISTORY
}

fn default_commitment_ledger() -> PathBuf {
    PathBuf::from("used-commitments.txt")
}

impl Config {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn load_from_file_or_default(path: &Path) -> Self {
        Self::load_from_file(path).unwrap_or_default()
    }

    /// Loads `path` if given, otherwise the defaults.
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory: {}", parent.display())
                })?;
            }
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}
