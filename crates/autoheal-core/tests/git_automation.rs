//! Commit/push behavior of the `git` CLI layer against a local bare remote.

use std::path::Path;
use std::process::Command as StdCommand;

use autoheal_core::git::{CliGit, CommitRequest, GitConfig, GitFailure, GitOps, GitState};

fn run_git(repo_dir: &Path, args: &[&str]) -> String {
    let output = StdCommand::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A bare remote plus a clone of it with one commit on `main`.
struct Fixture {
    _root: tempfile::TempDir,
    remote: std::path::PathBuf,
    work: std::path::PathBuf,
}

fn make_fixture() -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let remote = root.path().join("remote.git");
    let work = root.path().join("work");
    std::fs::create_dir_all(&remote).unwrap();
    std::fs::create_dir_all(&work).unwrap();

    run_git(&remote, &["init", "--bare", "--initial-branch=main"]);
    run_git(&work, &["init", "--initial-branch=main"]);
    run_git(&work, &["config", "user.name", "test-user"]);
    run_git(&work, &["config", "user.email", "test@example.com"]);
    std::fs::write(work.join("calc.py"), "def add(a, b):\n    return a + b\n").unwrap();
    run_git(&work, &["add", "-A"]);
    run_git(&work, &["commit", "-m", "initial"]);
    run_git(&work, &["remote", "add", "origin", remote.to_str().unwrap()]);
    run_git(&work, &["push", "origin", "main"]);

    Fixture {
        _root: root,
        remote,
        work,
    }
}

fn git() -> CliGit {
    CliGit::new(GitConfig::default())
}

fn request<'a>(work: &'a Path, branch: &'a str, message: &'a str) -> CommitRequest<'a> {
    CommitRequest {
        workspace: work,
        branch,
        message,
        credentials: None,
        remote_url: None,
    }
}

#[tokio::test]
async fn test_commit_and_push_lands_on_remote_with_prefix() {
    let fx = make_fixture();
    let git = git();
    let branch = git.prepare_branch(&fx.work, "Code Warriors", "Jane Doe").await.unwrap();
    assert_eq!(branch, "CODE_WARRIORS_JANE_DOE_AI_FIX");

    std::fs::write(fx.work.join("calc.py"), "def add(a, b):\n    return a + b  # fixed\n").unwrap();
    let outcome = git
        .commit_and_push(request(&fx.work, &branch, "fix SYNTAX in calc.py line 2"))
        .await
        .unwrap();

    assert!(outcome.success, "push failed: {:?}", outcome.reason);
    assert_eq!(outcome.state, GitState::Pushed);
    let sha = outcome.commit_id.unwrap();
    assert_eq!(sha.len(), 40);

    let refname = format!("refs/heads/{branch}");
    let remote_sha = run_git(&fx.remote, &["rev-parse", refname.as_str()]);
    assert_eq!(remote_sha, sha);
    let subject = run_git(&fx.remote, &["log", "-1", "--format=%s", refname.as_str()]);
    assert_eq!(subject, "[AI-AGENT] fix SYNTAX in calc.py line 2");
}

#[tokio::test]
async fn test_prefix_is_not_doubled() {
    let fx = make_fixture();
    let git = git();
    let branch = git.prepare_branch(&fx.work, "a", "b").await.unwrap();
    std::fs::write(fx.work.join("new.py"), "x = 1\n").unwrap();

    let outcome = git
        .commit_and_push(request(&fx.work, &branch, "[AI-AGENT] already tagged"))
        .await
        .unwrap();
    assert!(outcome.success);
    let subject = run_git(&fx.work, &["log", "-1", "--format=%s"]);
    assert_eq!(subject, "[AI-AGENT] already tagged");
}

#[tokio::test]
async fn test_nothing_to_commit_is_a_noop() {
    let fx = make_fixture();
    let git = git();
    let branch = git.prepare_branch(&fx.work, "a", "b").await.unwrap();
    let head_before = run_git(&fx.work, &["rev-parse", "HEAD"]);

    let outcome = git
        .commit_and_push(request(&fx.work, &branch, "no change"))
        .await
        .unwrap();
    assert!(!outcome.success);
    assert!(outcome.is_noop());
    assert_eq!(outcome.state, GitState::Branched);
    assert!(outcome.commit_id.is_none());
    assert_eq!(run_git(&fx.work, &["rev-parse", "HEAD"]), head_before);
}

#[tokio::test]
async fn test_protected_branch_is_refused_before_any_change() {
    let fx = make_fixture();
    std::fs::write(fx.work.join("calc.py"), "changed\n").unwrap();
    let head_before = run_git(&fx.work, &["rev-parse", "HEAD"]);

    for branch in ["main", "MASTER", "refs/heads/main"] {
        let outcome = git()
            .commit_and_push(request(&fx.work, branch, "sneaky"))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(matches!(outcome.reason, Some(GitFailure::ProtectedBranch { .. })));
    }
    assert_eq!(run_git(&fx.work, &["rev-parse", "HEAD"]), head_before);
    // Nothing was staged either.
    assert_eq!(run_git(&fx.work, &["diff", "--cached", "--name-only"]), "");
}

#[tokio::test]
async fn test_branch_mismatch_fails_closed() {
    let fx = make_fixture();
    std::fs::write(fx.work.join("calc.py"), "changed\n").unwrap();
    let outcome = git()
        .commit_and_push(request(&fx.work, "OTHER_AI_FIX", "msg"))
        .await
        .unwrap();
    assert!(!outcome.success);
    assert!(matches!(
        outcome.reason,
        Some(GitFailure::BranchMismatch { ref actual, .. }) if actual == "main"
    ));
}

#[tokio::test]
async fn test_explicit_remote_url_is_restored_after_push() {
    let fx = make_fixture();
    let git = git();
    let branch = git.prepare_branch(&fx.work, "a", "b").await.unwrap();

    // origin points somewhere unreachable; the request names the real remote.
    run_git(&fx.work, &["remote", "set-url", "origin", "/nonexistent/remote.git"]);
    std::fs::write(fx.work.join("calc.py"), "changed\n").unwrap();
    let outcome = git
        .commit_and_push(CommitRequest {
            remote_url: fx.remote.to_str(),
            ..request(&fx.work, &branch, "push elsewhere")
        })
        .await
        .unwrap();

    assert!(outcome.success, "push failed: {:?}", outcome.reason);
    assert_eq!(
        run_git(&fx.work, &["remote", "get-url", "origin"]),
        "/nonexistent/remote.git"
    );
}

#[tokio::test]
async fn test_push_failure_withdraws_commit_and_restores_remote() {
    let fx = make_fixture();
    let git = git();
    let branch = git.prepare_branch(&fx.work, "a", "b").await.unwrap();
    let head_before = run_git(&fx.work, &["rev-parse", "HEAD"]);
    std::fs::write(fx.work.join("calc.py"), "changed\n").unwrap();

    let outcome = git
        .commit_and_push(CommitRequest {
            remote_url: Some("/nonexistent/remote.git"),
            ..request(&fx.work, &branch, "will not push")
        })
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.state, GitState::Branched);
    assert!(outcome.commit_id.is_none());
    assert_eq!(run_git(&fx.work, &["rev-parse", "HEAD"]), head_before);
    assert_eq!(
        std::fs::read_to_string(fx.work.join("calc.py")).unwrap(),
        "def add(a, b):\n    return a + b\n"
    );
    assert_eq!(
        run_git(&fx.work, &["remote", "get-url", "origin"]),
        fx.remote.to_str().unwrap()
    );
}

#[tokio::test]
async fn test_sequential_fixes_stack_on_one_branch() {
    let fx = make_fixture();
    let git = git();
    let branch = git.prepare_branch(&fx.work, "a", "b").await.unwrap();

    for (i, file) in ["one.py", "two.py", "three.py"].iter().enumerate() {
        std::fs::write(fx.work.join(file), format!("x = {i}\n")).unwrap();
        let message = format!("fix {file}");
        let outcome = git
            .commit_and_push(request(&fx.work, &branch, &message))
            .await
            .unwrap();
        assert!(outcome.success, "push {i} failed: {:?}", outcome.reason);
    }

    let refname = format!("refs/heads/{branch}");
    let count = run_git(&fx.remote, &["rev-list", "--count", refname.as_str()]);
    assert_eq!(count, "4");
}

#[tokio::test]
async fn test_duplicate_branch_creation_fails() {
    let fx = make_fixture();
    let git = git();
    git.prepare_branch(&fx.work, "a", "b").await.unwrap();
    run_git(&fx.work, &["checkout", "main"]);
    let err = git.prepare_branch(&fx.work, "a", "b").await.unwrap_err();
    assert!(err.to_string().contains("A_B_AI_FIX"), "unexpected error: {err}");
}

#[tokio::test]
async fn test_prepare_on_existing_fix_branch_continues_it() {
    let fx = make_fixture();
    let git = git();
    let first = git.prepare_branch(&fx.work, "a", "b").await.unwrap();
    let again = git.prepare_branch(&fx.work, "a", "b").await.unwrap();
    assert_eq!(first, again);
    assert_eq!(
        run_git(&fx.work, &["rev-parse", "--abbrev-ref", "HEAD"]),
        "A_B_AI_FIX"
    );
}

/// A second clone of the fixture's remote, checked out on `branch`.
fn second_clone(fx: &Fixture, branch: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path();
    run_git(path, &["clone", "--quiet", fx.remote.to_str().unwrap(), "."]);
    run_git(path, &["config", "user.name", "other-user"]);
    run_git(path, &["config", "user.email", "other@example.com"]);
    run_git(path, &["checkout", "--quiet", branch]);
    dir
}

#[tokio::test]
async fn test_remote_ahead_is_fast_forwarded_before_commit() {
    let fx = make_fixture();
    let git = git();
    let branch = git.prepare_branch(&fx.work, "a", "b").await.unwrap();
    std::fs::write(fx.work.join("one.py"), "x = 1\n").unwrap();
    let first = git
        .commit_and_push(request(&fx.work, &branch, "fix one.py"))
        .await
        .unwrap();
    assert!(first.success, "push failed: {:?}", first.reason);

    // Someone else extends the fix branch on the remote.
    let other = second_clone(&fx, &branch);
    std::fs::write(other.path().join("other.py"), "y = 2\n").unwrap();
    run_git(other.path(), &["add", "-A"]);
    run_git(other.path(), &["commit", "-m", "concurrent fix"]);
    run_git(other.path(), &["push", "origin", branch.as_str()]);

    std::fs::write(fx.work.join("two.py"), "x = 2\n").unwrap();
    let second = git
        .commit_and_push(request(&fx.work, &branch, "fix two.py"))
        .await
        .unwrap();

    assert!(second.success, "push failed: {:?}", second.reason);
    assert!(fx.work.join("other.py").exists());
    let refname = format!("refs/heads/{branch}");
    assert_eq!(
        run_git(&fx.remote, &["rev-parse", refname.as_str()]),
        second.commit_id.unwrap()
    );
    assert_eq!(
        run_git(&fx.remote, &["rev-list", "--count", refname.as_str()]),
        "4"
    );
}

#[tokio::test]
async fn test_diverged_remote_rejects_and_withdraws() {
    let fx = make_fixture();
    let git = git();
    let branch = git.prepare_branch(&fx.work, "a", "b").await.unwrap();
    std::fs::write(fx.work.join("one.py"), "x = 1\n").unwrap();
    let first = git
        .commit_and_push(request(&fx.work, &branch, "fix one.py"))
        .await
        .unwrap();
    assert!(first.success, "push failed: {:?}", first.reason);

    let other = second_clone(&fx, &branch);
    std::fs::write(other.path().join("other.py"), "y = 2\n").unwrap();
    run_git(other.path(), &["add", "-A"]);
    run_git(other.path(), &["commit", "-m", "concurrent fix"]);
    run_git(other.path(), &["push", "origin", branch.as_str()]);
    let refname = format!("refs/heads/{branch}");
    let remote_tip = run_git(&fx.remote, &["rev-parse", refname.as_str()]);

    // A local-only commit means the histories can no longer fast-forward.
    std::fs::write(fx.work.join("local.py"), "z = 3\n").unwrap();
    run_git(&fx.work, &["add", "-A"]);
    run_git(&fx.work, &["commit", "-m", "local only"]);
    let base = run_git(&fx.work, &["rev-parse", "HEAD"]);

    std::fs::write(fx.work.join("two.py"), "x = 2\n").unwrap();
    let outcome = git
        .commit_and_push(request(&fx.work, &branch, "fix two.py"))
        .await
        .unwrap();

    assert!(!outcome.success);
    assert!(matches!(outcome.reason, Some(GitFailure::PushRejected { .. })));
    assert_eq!(outcome.state, GitState::Branched);
    assert!(outcome.commit_id.is_none());
    assert_eq!(run_git(&fx.work, &["rev-parse", "HEAD"]), base);
    assert!(!fx.work.join("two.py").exists());
    assert_eq!(run_git(&fx.remote, &["rev-parse", refname.as_str()]), remote_tip);
}
