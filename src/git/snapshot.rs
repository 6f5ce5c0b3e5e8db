use super::remote::remote_default_branch;
use super::transport_url;
use crate::error::FetchError;
use crate::identity::is_local_source;
use git2::build::RepoBuilder;
use git2::{ErrorClass, ErrorCode, FetchOptions, Progress, RemoteCallbacks};
use std::cell::Cell;
use std::path::{Path, PathBuf};

/// A checked-out working copy
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub path: PathBuf,
    /// Commit id of the checked-out `HEAD`
    pub head: String,
}

/// Fraction of transfer work done, in `0.0..=1.0`
///
/// Object reception counts for the first 80%, delta resolution for the rest.
fn transfer_fraction(stats: &Progress<'_>) -> f32 {
    let total = stats.total_objects();
    if total == 0 {
        return 0.0;
    }

    let received = stats.received_objects() as f32 / total as f32;
    let deltas = match stats.total_deltas() {
        0 if stats.received_objects() == total => 1.0,
        0 => 0.0,
        n => stats.indexed_deltas() as f32 / n as f32,
    };

    (received * 0.8 + deltas * 0.2).clamp(0.0, 1.0)
}

/// Clone a shallow, single-branch copy of `base` into `dest`
///
/// `dest` must not exist yet. Network sources are fetched with `depth = 1`; local
/// sources are cloned in full because the local transport cannot produce shallow
/// clones. When `branch` is `None` the remote's default branch is resolved first so
/// only that branch is fetched.
///
/// `on_progress` receives a status line and the transfer fraction; it is only called
/// when the whole-percent value changes.
pub fn fetch_snapshot(
    base: &str,
    branch: Option<&str>,
    dest: &Path,
    on_progress: &dyn Fn(&str, f32),
) -> Result<Snapshot, FetchError> {
    let url = transport_url(base);
    let local = is_local_source(base);

    let target_branch = match branch {
        Some(b) => Some(b.to_string()),
        None => match remote_default_branch(base) {
            Ok(b) => Some(b),
            Err(e) => {
                tracing::debug!(
                    "Could not resolve default branch of {}, fetching all heads: {:#}",
                    base,
                    e
                );
                None
            }
        },
    };

    tracing::info!(
        "Cloning {} ({}) into {}",
        base,
        target_branch.as_deref().unwrap_or("default branch"),
        dest.display()
    );

    let last_percent = Cell::new(u32::MAX);
    let mut callbacks = RemoteCallbacks::new();
    callbacks.transfer_progress(|stats| {
        let fraction = transfer_fraction(&stats);
        let percent = (fraction * 100.0) as u32;
        if percent != last_percent.get() {
            last_percent.set(percent);
            let message = if stats.received_objects() < stats.total_objects() {
                format!(
                    "Receiving objects: {}% ({}/{})",
                    percent,
                    stats.received_objects(),
                    stats.total_objects()
                )
            } else {
                format!(
                    "Resolving deltas: {}/{}",
                    stats.indexed_deltas(),
                    stats.total_deltas()
                )
            };
            on_progress(&message, fraction);
        }
        true
    });

    let mut fetch_options = FetchOptions::new();
    fetch_options.remote_callbacks(callbacks);
    if !local {
        fetch_options.depth(1);
    }

    let mut builder = RepoBuilder::new();
    builder.fetch_options(fetch_options);

    if let Some(b) = target_branch.as_deref() {
        builder.branch(b);
        let refspec = format!("+refs/heads/{b}:refs/remotes/origin/{b}");
        builder.remote_create(move |repo, name, url| repo.remote_with_fetch(name, url, &refspec));
    }

    let repo = builder
        .clone(url, dest)
        .map_err(|e| classify_clone_error(base, &e))?;

    let head = repo
        .head()
        .and_then(|r| r.peel_to_commit())
        .map(|c| c.id().to_string())
        .map_err(|e| FetchError::Failed {
            locator: base.to_string(),
            reason: format!("cloned repository has no HEAD commit: {}", e.message()),
        })?;

    tracing::info!("Snapshot of {} checked out at {}", base, head);

    Ok(Snapshot {
        path: dest.to_path_buf(),
        head,
    })
}

/// Map a libgit2 clone error onto not-found / auth-denied / generic failure
pub fn classify_clone_error(locator: &str, err: &git2::Error) -> FetchError {
    let message = err.message().to_string();
    let lower = message.to_lowercase();

    let auth = err.code() == ErrorCode::Auth
        || err.code() == ErrorCode::Certificate
        || (err.class() == ErrorClass::Http
            && (lower.contains("401") || lower.contains("403")))
        || lower.contains("authentication")
        || lower.contains("permission denied");

    if auth {
        return FetchError::AuthDenied {
            locator: locator.to_string(),
            reason: message,
        };
    }

    let not_found = err.code() == ErrorCode::NotFound
        || lower.contains("not found")
        || lower.contains("404")
        || lower.contains("failed to resolve path")
        || lower.contains("could not find repository");

    if not_found {
        return FetchError::NotFound {
            locator: locator.to_string(),
        };
    }

    FetchError::Failed {
        locator: locator.to_string(),
        reason: message,
    }
}
