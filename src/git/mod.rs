//! Git transport operations
//!
//! Two operations are needed against a remote: asking for the commit a branch points
//! at without downloading anything, and producing a shallow single-branch working copy.
//! Both are blocking libgit2 calls; async callers run them on a blocking thread.

/// Remote reference listing (`git ls-remote` equivalent)
pub mod remote;
/// Shallow single-branch clone with progress and error classification
pub mod snapshot;

pub use remote::check_remote_version;
pub use snapshot::{Snapshot, classify_clone_error, fetch_snapshot};

/// Convert a locator into something libgit2 can open
///
/// scp-style `user@host:path` and URLs pass through unchanged; `file://` URLs are
/// turned into plain paths, which the local transport handles more reliably.
pub(crate) fn transport_url(base: &str) -> &str {
    base.strip_prefix("file://").unwrap_or(base)
}

#[cfg(test)]
mod tests;
