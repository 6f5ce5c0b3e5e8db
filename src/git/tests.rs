use super::*;
use crate::error::FetchError;
use git2::{ErrorClass, ErrorCode, Repository, Signature};
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;

fn commit_file(repo: &Repository, name: &str, content: &str, message: &str) -> git2::Oid {
    let workdir = repo.workdir().unwrap();
    std::fs::write(workdir.join(name), content).unwrap();

    let mut index = repo.index().unwrap();
    index.add_path(Path::new(name)).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = Signature::now("Test", "test@example.com").unwrap();

    let parents = match repo.head() {
        Ok(head) => vec![head.peel_to_commit().unwrap()],
        Err(_) => vec![],
    };
    let parent_refs: Vec<&git2::Commit> = parents.iter().collect();

    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
        .unwrap()
}

fn origin_repo() -> (TempDir, Repository, git2::Oid) {
    let dir = TempDir::new().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    let oid = commit_file(&repo, "README.md", "Hello world\n", "initial");
    (dir, repo, oid)
}

fn no_progress(_: &str, _: f32) {}

#[test]
fn test_remote_version_matches_head() {
    let (dir, _repo, oid) = origin_repo();
    let base = dir.path().to_string_lossy().to_string();
    assert_eq!(check_remote_version(&base, None), Some(oid.to_string()));
}

#[test]
fn test_remote_version_for_branch() {
    let (dir, repo, _) = origin_repo();
    let head_commit = repo.head().unwrap().peel_to_commit().unwrap();
    repo.branch("dev", &head_commit, false).unwrap();
    let base = dir.path().to_string_lossy().to_string();

    assert_eq!(
        check_remote_version(&base, Some("dev")),
        Some(head_commit.id().to_string())
    );
    assert_eq!(check_remote_version(&base, Some("does-not-exist")), None);
}

#[test]
fn test_remote_version_unknown_on_failure() {
    let missing = TempDir::new().unwrap();
    let base = missing.path().join("nope").to_string_lossy().to_string();
    assert_eq!(check_remote_version(&base, None), None);
}

#[test]
fn test_fetch_snapshot_checks_out_head() {
    let (dir, _repo, oid) = origin_repo();
    let dest_root = TempDir::new().unwrap();
    let dest = dest_root.path().join("snapshot");

    let snapshot = fetch_snapshot(
        &dir.path().to_string_lossy(),
        None,
        &dest,
        &no_progress,
    )
    .unwrap();

    assert_eq!(snapshot.head, oid.to_string());
    assert_eq!(
        std::fs::read_to_string(dest.join("README.md")).unwrap(),
        "Hello world\n"
    );
}

#[test]
fn test_fetch_snapshot_pins_branch() {
    let (dir, repo, _) = origin_repo();
    let main_head = repo.head().unwrap().peel_to_commit().unwrap();
    let main_ref = repo.head().unwrap().name().unwrap().to_string();

    repo.branch("feature", &main_head, false).unwrap();
    repo.set_head("refs/heads/feature").unwrap();
    let feature_oid = commit_file(&repo, "feature.rs", "fn feature() {}\n", "feature work");
    repo.set_head(&main_ref).unwrap();
    repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))
        .unwrap();

    let dest_root = TempDir::new().unwrap();
    let dest = dest_root.path().join("snapshot");
    let snapshot = fetch_snapshot(
        &dir.path().to_string_lossy(),
        Some("feature"),
        &dest,
        &no_progress,
    )
    .unwrap();

    assert_eq!(snapshot.head, feature_oid.to_string());
    assert!(dest.join("feature.rs").exists());
}

#[test]
fn test_fetch_snapshot_reports_progress() {
    let (dir, _repo, _) = origin_repo();
    let dest_root = TempDir::new().unwrap();
    let seen = Mutex::new(Vec::new());

    fetch_snapshot(
        &format!("file://{}", dir.path().display()),
        None,
        &dest_root.path().join("snapshot"),
        &|_msg: &str, fraction: f32| seen.lock().unwrap().push(fraction),
    )
    .unwrap();

    let seen = seen.into_inner().unwrap();
    assert!(seen.iter().all(|f| (0.0..=1.0).contains(f)));
}

#[test]
fn test_fetch_missing_repository_is_not_found() {
    let missing = TempDir::new().unwrap();
    let base = missing.path().join("nope").to_string_lossy().to_string();
    let dest = missing.path().join("snapshot");

    let err = fetch_snapshot(&base, Some("main"), &dest, &no_progress).unwrap_err();
    assert!(matches!(err, FetchError::NotFound { .. }), "got {err:?}");
    assert!(err.to_string().contains("nope"));
}

#[test]
fn test_fetch_missing_branch_is_not_found() {
    let (dir, _repo, _) = origin_repo();
    let dest_root = TempDir::new().unwrap();

    let err = fetch_snapshot(
        &dir.path().to_string_lossy(),
        Some("no-such-branch"),
        &dest_root.path().join("snapshot"),
        &no_progress,
    )
    .unwrap_err();
    assert!(matches!(err, FetchError::NotFound { .. }), "got {err:?}");
}

#[test]
fn test_classify_auth_error() {
    let err = git2::Error::new(ErrorCode::Auth, ErrorClass::Http, "authentication required");
    assert!(matches!(
        classify_clone_error("https://example.com/private.git", &err),
        FetchError::AuthDenied { .. }
    ));

    let err = git2::Error::new(
        ErrorCode::GenericError,
        ErrorClass::Http,
        "unexpected http status code: 403",
    );
    assert!(matches!(
        classify_clone_error("https://example.com/private.git", &err),
        FetchError::AuthDenied { .. }
    ));
}

#[test]
fn test_classify_not_found_error() {
    let err = git2::Error::new(
        ErrorCode::GenericError,
        ErrorClass::Http,
        "unexpected http status code: 404",
    );
    let classified = classify_clone_error("https://example.com/missing.git", &err);
    assert_eq!(
        classified.to_string(),
        "Repository not found: https://example.com/missing.git"
    );
}

#[test]
fn test_classify_generic_error() {
    let err = git2::Error::new(ErrorCode::GenericError, ErrorClass::Net, "connection reset");
    match classify_clone_error("https://example.com/repo.git", &err) {
        FetchError::Failed { locator, reason } => {
            assert_eq!(locator, "https://example.com/repo.git");
            assert!(reason.contains("connection reset"));
        }
        other => panic!("unexpected classification: {other:?}"),
    }
}

#[test]
fn test_transport_url_strips_file_scheme() {
    assert_eq!(transport_url("file:///srv/repo"), "/srv/repo");
    assert_eq!(
        transport_url("https://github.com/acme/widgets"),
        "https://github.com/acme/widgets"
    );
}
