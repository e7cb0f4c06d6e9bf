//! Versioned contributor-tree rebuilds with a single writer.
//!
//! Each rebuild produces a new immutable [`TreeVersion`] behind an `Arc`.
//! Readers clone the `Arc` and keep proving against their version while a
//! newer one is published; nothing is mutated in place.

use crate::contributor_tree::{build_tree, ContributorTree, ZeroSubtreeTable};
use crate::error::{RebuildError, TreeError};
use crate::ethereum::ContributorSet;
use crate::hash::CircuitHasher;
use crate::registry::MembershipRegistry;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::utils::field_to_hex;
use ethers::types::Address;
use log::{debug, info};
use std::sync::{Arc, Mutex, MutexGuard};

/// One published tree.
#[derive(Debug)]
pub struct TreeVersion {
    pub version: u64,
    pub tree: ContributorTree,
    pub built_at_ms: u64,
}

pub struct TreeRebuilder {
    depth: usize,
    hasher: CircuitHasher,
    zero_table: ZeroSubtreeTable,
    // Held for the whole of a rebuild; the guarded value is the latest version.
    current: Mutex<Option<Arc<TreeVersion>>>,
}

impl TreeRebuilder {
    /// # Errors
    ///
    /// Returns [`TreeError::DepthTooLarge`] for an unsupported depth.
    pub fn new(depth: usize, hasher: CircuitHasher) -> Result<Self, TreeError> {
        let zero_table = ZeroSubtreeTable::new(depth, &hasher)?;
        Ok(Self {
            depth,
            hasher,
            zero_table,
            current: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<TreeVersion>>> {
        // A panicked rebuild never publishes, so the stored version is intact.
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Latest published version, if any.
    #[must_use]
    pub fn current(&self) -> Option<Arc<TreeVersion>> {
        self.lock().clone()
    }

    fn build_next(
        &self,
        previous: &Option<Arc<TreeVersion>>,
        contributors: &ContributorSet,
        built_at_ms: u64,
    ) -> Result<Arc<TreeVersion>, TreeError> {
        let tree = build_tree(contributors, self.depth, &self.zero_table, &self.hasher)?;
        let version = previous.as_ref().map_or(1, |v| v.version + 1);
        Ok(Arc::new(TreeVersion {
            version,
            tree,
            built_at_ms,
        }))
    }

    /// Builds and publishes a new version.
    ///
    /// # Errors
    ///
    /// Returns the [`TreeError`] from the build; the previous version stays current.
    pub fn rebuild(
        &self,
        contributors: &ContributorSet,
        built_at_ms: u64,
    ) -> Result<Arc<TreeVersion>, TreeError> {
        let mut current = self.lock();
        let next = self.build_next(&current, contributors, built_at_ms)?;
        info!(
            "Published tree version {}: {} contributors, root {}",
            next.version,
            next.tree.anonymity_set_size(),
            field_to_hex(&next.tree.root())
        );
        *current = Some(Arc::clone(&next));
        Ok(next)
    }

    /// Rebuilds only when the contributor count differs from the current version.
    ///
    /// Returns `None` when nothing changed.
    ///
    /// # Errors
    ///
    /// Returns the [`TreeError`] from the build.
    pub fn rebuild_if_changed(
        &self,
        contributors: &ContributorSet,
        built_at_ms: u64,
    ) -> Result<Option<Arc<TreeVersion>>, TreeError> {
        if let Some(current) = self.current() {
            if current.tree.anonymity_set_size() == contributors.len() {
                debug!(
                    "Contributor count unchanged at {}; keeping version {}",
                    contributors.len(),
                    current.version
                );
                return Ok(None);
            }
        }
        self.rebuild(contributors, built_at_ms).map(Some)
    }

    /// Builds a new version and registers its root before publishing it.
    ///
    /// The writer lock is held until registration completes, so readers
    /// never observe a version whose root the registry does not trust.
    /// Registration is retried under `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`RebuildError::Tree`] if the build fails, or
    /// [`RebuildError::Registry`] if registration fails; in both cases the
    /// previous version stays current.
    pub fn rebuild_and_register<R: MembershipRegistry>(
        &self,
        contributors: &ContributorSet,
        built_at_ms: u64,
        registry: &mut R,
        caller: &Address,
        policy: &RetryPolicy,
    ) -> Result<Arc<TreeVersion>, RebuildError> {
        let mut current = self.lock();
        let next = self.build_next(&current, contributors, built_at_ms)?;
        let root = next.tree.root();

        retry_with_backoff(policy, |attempt| {
            if attempt > 0 {
                debug!("Retrying registration of root {}", field_to_hex(&root));
            }
            registry.register_root(caller, root)
        })?;

        info!(
            "Registered and published tree version {} (root {})",
            next.version,
            field_to_hex(&root)
        );
        *current = Some(Arc::clone(&next));
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::Commitment;
    use crate::error::RegistryError;
    use crate::registry::SubmissionReceipt;
    use ark_bn254::{Bn254, Fr};
    use ark_groth16::Proof;
    use std::collections::HashSet;

    /// Registry double that fails a configurable number of times.
    struct FlakyRegistry {
        failures_left: u32,
        roots: HashSet<Fr>,
        calls: u32,
    }

    impl FlakyRegistry {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: failures,
                roots: HashSet::new(),
                calls: 0,
            }
        }
    }

    impl MembershipRegistry for FlakyRegistry {
        fn register_root(&mut self, _caller: &Address, root: Fr) -> Result<(), RegistryError> {
            self.calls += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(RegistryError::Unavailable("rpc timeout".to_string()));
            }
            self.roots.insert(root);
            Ok(())
        }

        fn revoke_root(&mut self, _caller: &Address, root: &Fr) -> Result<bool, RegistryError> {
            Ok(self.roots.remove(root))
        }

        fn is_root_trusted(&self, root: &Fr) -> bool {
            self.roots.contains(root)
        }

        fn is_commitment_used(&self, _commitment: &Commitment) -> Result<bool, RegistryError> {
            Ok(false)
        }

        fn submit(
            &mut self,
            _proof: &Proof<Bn254>,
            _public_signals: &[String],
            _ipfs_pointer: &str,
        ) -> Result<SubmissionReceipt, RegistryError> {
            Err(RegistryError::Unavailable("not supported".to_string()))
        }
    }

    fn set(addresses: &[&str]) -> ContributorSet {
        let owned: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
        ContributorSet::from_strings(&owned).unwrap()
    }

    fn rebuilder() -> TreeRebuilder {
        TreeRebuilder::new(4, CircuitHasher::new().unwrap()).unwrap()
    }

    #[test]
    fn test_versions_increase_and_old_versions_survive() {
        let rebuilder = rebuilder();
        assert!(rebuilder.current().is_none());

        let v1 = rebuilder.rebuild(&set(&["0xAAA", "0xBBB"]), 1).unwrap();
        let v2 = rebuilder.rebuild(&set(&["0xAAA", "0xBBB", "0xCCC"]), 2).unwrap();

        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
        assert_ne!(v1.tree.root(), v2.tree.root());
        assert_eq!(v1.tree.anonymity_set_size(), 2);
        assert_eq!(rebuilder.current().unwrap().version, 2);
    }

    #[test]
    fn test_rebuild_if_changed_skips_same_count() {
        let rebuilder = rebuilder();
        assert!(rebuilder
            .rebuild_if_changed(&set(&["0xAAA"]), 1)
            .unwrap()
            .is_some());
        assert!(rebuilder
            .rebuild_if_changed(&set(&["0xAAA"]), 2)
            .unwrap()
            .is_none());
        let v = rebuilder
            .rebuild_if_changed(&set(&["0xAAA", "0xBBB"]), 3)
            .unwrap()
            .unwrap();
        assert_eq!(v.version, 2);
        assert_eq!(v.built_at_ms, 3);
    }

    #[test]
    fn test_failed_build_keeps_previous_version() {
        let rebuilder = rebuilder();
        rebuilder.rebuild(&set(&["0xAAA"]), 1).unwrap();
        assert_eq!(
            rebuilder.rebuild(&ContributorSet::new(), 2).unwrap_err(),
            TreeError::EmptyTree
        );
        assert_eq!(rebuilder.current().unwrap().version, 1);
    }

    #[test]
    fn test_register_retries_transient_failures() {
        let rebuilder = rebuilder();
        let mut registry = FlakyRegistry::new(2);
        let caller = Address::zero();

        let version = rebuilder
            .rebuild_and_register(
                &set(&["0xAAA", "0xBBB"]),
                1,
                &mut registry,
                &caller,
                &RetryPolicy::immediate(5),
            )
            .unwrap();
        assert_eq!(registry.calls, 3);
        assert!(registry.is_root_trusted(&version.tree.root()));
    }

    #[test]
    fn test_registration_failure_does_not_publish() {
        let rebuilder = rebuilder();
        let mut registry = FlakyRegistry::new(10);
        let result = rebuilder.rebuild_and_register(
            &set(&["0xAAA"]),
            1,
            &mut registry,
            &Address::zero(),
            &RetryPolicy::immediate(3),
        );
        assert!(matches!(result, Err(RebuildError::Registry(RegistryError::Unavailable(_)))));
        assert!(rebuilder.current().is_none());
        assert_eq!(registry.calls, 3);
    }
}
