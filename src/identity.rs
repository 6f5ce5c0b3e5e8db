//! Repository identity and on-disk addressing
//!
//! A repository (plus optional branch) is identified by the SHA-256 of its normalized
//! locator. That digest is the only key used to place snapshots, vector stores and
//! lock files on disk.

use crate::paths::PlatformPaths;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static LOCATOR_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?:https?://|ssh://|file://)\S+|[A-Za-z0-9._-]+@[A-Za-z0-9.-]+:[^\s]+").ok()
});

/// A normalized repository locator, optionally suffixed with `#<branch>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryLocator(String);

impl RepositoryLocator {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into the base locator and the branch selector, if any
    pub fn split_branch(&self) -> (&str, Option<&str>) {
        split_branch(&self.0)
    }

    /// Digest of this locator
    pub fn id(&self) -> RepositoryId {
        compute_id(self)
    }
}

impl fmt::Display for RepositoryLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase hex SHA-256 of a normalized locator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepositoryId(String);

impl RepositoryId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract the repository locator from free-form input
///
/// Picks the first `http(s)://`, `ssh://`, `file://` or scp-style `user@host:path`
/// substring. When nothing matches, the trimmed input is used as-is. A trailing `/`
/// is dropped either way. Never fails.
pub fn normalize(input: &str) -> RepositoryLocator {
    let trimmed = input.trim();
    let extracted = LOCATOR_PATTERN
        .as_ref()
        .and_then(|re| re.find(trimmed))
        .map(|m| m.as_str())
        .unwrap_or(trimmed);

    RepositoryLocator(extracted.trim_end_matches('/').to_string())
}

/// Deterministic id for a normalized locator; the branch suffix participates
pub fn compute_id(locator: &RepositoryLocator) -> RepositoryId {
    let digest = Sha256::digest(locator.as_str().as_bytes());
    RepositoryId(format!("{:x}", digest))
}

/// Text after the last `#` is the branch; an empty suffix means no branch
pub fn split_branch(locator: &str) -> (&str, Option<&str>) {
    match locator.rsplit_once('#') {
        Some((base, branch)) if !branch.is_empty() => (base, Some(branch)),
        Some((base, _)) => (base, None),
        None => (locator, None),
    }
}

/// Whether `base` points at the local filesystem rather than a network remote
pub fn is_local_source(base: &str) -> bool {
    base.starts_with("file://") || Path::new(base).is_absolute() || base.starts_with("./")
}

/// The three on-disk locations owned by one repository id
#[derive(Debug, Clone)]
pub struct RepoLocation {
    pub locator: RepositoryLocator,
    pub id: RepositoryId,
    /// Shallow working copy
    pub snapshot_dir: PathBuf,
    /// LanceDB directory plus the version marker sidecar
    pub store_dir: PathBuf,
    pub lock_path: PathBuf,
}

impl RepoLocation {
    pub fn new(data_dir: &Path, locator: RepositoryLocator) -> Self {
        let id = compute_id(&locator);
        Self {
            snapshot_dir: PlatformPaths::repos_dir(data_dir).join(id.as_str()),
            store_dir: PlatformPaths::vector_stores_dir(data_dir).join(id.as_str()),
            lock_path: PlatformPaths::locks_dir(data_dir).join(format!("{}.lock", id)),
            locator,
            id,
        }
    }

    /// Normalize `input` and resolve its locations under `data_dir`
    pub fn resolve(data_dir: &Path, input: &str) -> Self {
        Self::new(data_dir, normalize(input))
    }
}
