use super::transport_url;
use anyhow::{Context, Result};
use git2::{Direction, Remote};

/// Commit id the remote reports for `branch`, or for `HEAD` when no branch is given
///
/// Nothing is downloaded. Any failure (network, auth, unknown branch) yields `None`,
/// which callers treat as "version unknown".
pub fn check_remote_version(base: &str, branch: Option<&str>) -> Option<String> {
    match list_remote_ref(base, branch) {
        Ok(Some(oid)) => {
            tracing::debug!("Remote {} is at {}", base, oid);
            Some(oid)
        }
        Ok(None) => {
            tracing::warn!(
                "Remote {} does not advertise {}",
                base,
                branch.map(|b| format!("branch '{}'", b)).unwrap_or_else(|| "HEAD".into())
            );
            None
        }
        Err(e) => {
            tracing::warn!("Version check failed for {}: {:#}", base, e);
            None
        }
    }
}

fn list_remote_ref(base: &str, branch: Option<&str>) -> Result<Option<String>> {
    let mut remote =
        Remote::create_detached(transport_url(base)).context("Failed to create remote")?;
    remote
        .connect(Direction::Fetch)
        .context("Failed to connect to remote")?;

    let wanted = match branch {
        Some(b) => format!("refs/heads/{}", b),
        None => "HEAD".to_string(),
    };

    let oid = remote
        .list()
        .context("Failed to list remote references")?
        .iter()
        .find(|head| head.name() == wanted)
        .map(|head| head.oid().to_string());

    Ok(oid)
}

/// Short name of the branch the remote's `HEAD` points at
pub(crate) fn remote_default_branch(base: &str) -> Result<String> {
    let mut remote =
        Remote::create_detached(transport_url(base)).context("Failed to create remote")?;
    remote
        .connect(Direction::Fetch)
        .context("Failed to connect to remote")?;

    let buf = remote
        .default_branch()
        .context("Remote did not report a default branch")?;
    let full = buf
        .as_str()
        .context("Default branch name is not valid UTF-8")?;

    Ok(full.strip_prefix("refs/heads/").unwrap_or(full).to_string())
}
