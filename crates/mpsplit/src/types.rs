//! Shared type definitions for the mpsplit crate
//!
//! This module contains the bundle identity types used across the dependency
//! trees, the partitioner and the rewriters.

use std::{
    cmp::Reverse,
    path::{Path, PathBuf},
};

/// Key of the main bundle wherever bundles are keyed by root directory
pub const MAIN_BUNDLE_KEY: &str = "";

/// Role of a bundle in the output tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BundleKind {
    /// The always-loaded main package at the source root
    Main,

    /// A sub-package loaded on demand, identified by its root directory
    Sub,
}

impl BundleKind {
    pub fn is_sub(self) -> bool {
        matches!(self, Self::Sub)
    }
}

/// Where each bundle lives in the source tree
///
/// Every path below the source root belongs to exactly one bundle: the
/// sub-package whose root contains it, or the main bundle otherwise.
#[derive(Debug, Clone)]
pub struct BundleLayout {
    source_root: PathBuf,
    sub_roots: Vec<String>,
}

impl BundleLayout {
    pub fn new(source_root: &Path, sub_roots: impl IntoIterator<Item = String>) -> Self {
        let mut sub_roots: Vec<String> = sub_roots.into_iter().collect();
        // Longest first, so a nested root wins over the root containing it
        sub_roots.sort_by_key(|root| Reverse(root.len()));
        Self {
            source_root: source_root.to_path_buf(),
            sub_roots,
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Root key of the bundle owning `path` ([`MAIN_BUNDLE_KEY`] for main)
    pub fn owner_of(&self, path: &Path) -> &str {
        self.sub_roots
            .iter()
            .find(|root| path.starts_with(self.source_root.join(root.as_str())))
            .map_or(MAIN_BUNDLE_KEY, String::as_str)
    }

    pub fn root_path(&self, root: &str) -> PathBuf {
        self.source_root.join(root)
    }
}
