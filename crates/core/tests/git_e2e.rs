//! End-to-end tests against real git repositories.
//!
//! Each test builds a small federation on disk: a seed repo cloned by Alice,
//! Bob, Charlie and the local user. Peers are plain `git remote`s pointing at
//! sibling directories, so no network I/O happens.
//!
//! Tests skip gracefully if `git` is not installed.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use peerpick_core::config::AcceptStashPolicy;
use peerpick_core::git::GitCommitSource;
use peerpick_core::ledger::{FileLedgerStore, LedgerStore};
use peerpick_core::models::{Decision, Peer};
use peerpick_core::preview::{PreviewController, PreviewState};
use peerpick_core::{group_pending, PendingResolver, Project};

// ===========================================================================
// Helpers
// ===========================================================================

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_EDITOR", "true")
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn configure(dir: &Path, name: &str) {
    git(dir, &["config", "user.name", name]);
    git(dir, &["config", "user.email", &format!("{}@example.com", name.to_lowercase())]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}

fn write(dir: &Path, rel: &str, contents: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn commit_all(dir: &Path, message: &str) -> String {
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "--quiet", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

struct Federation {
    _tmp: TempDir,
    root: PathBuf,
    local: PathBuf,
    ledgers: PathBuf,
}

impl Federation {
    /// Seed repo on branch `main`, cloned once per participant.
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();

        let seed = root.join("seed");
        std::fs::create_dir_all(&seed).unwrap();
        git(&seed, &["init", "--quiet"]);
        git(&seed, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        configure(&seed, "Seed");
        write(&seed, "notes/intro.md", "# Shared vault\n\nhello\n");
        commit_all(&seed, "Initial vault");

        for name in ["alice", "bob", "charlie", "local"] {
            let dir = root.join(name);
            git(&root, &["clone", "--quiet", seed.to_str().unwrap(), name]);
            configure(&dir, name);
        }

        let local = root.join("local");
        for peer in ["bob", "charlie"] {
            let path = root.join(peer);
            git(&local, &["remote", "add", peer, path.to_str().unwrap()]);
        }

        Self {
            ledgers: root.join("ledgers"),
            local,
            root,
            _tmp: tmp,
        }
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Alice writes a note; Bob and Charlie both relay it with `-x`.
    /// Bob also adds a note of his own. Returns Alice's hash.
    fn relay_scenario(&self) -> String {
        let alice = self.dir("alice");
        write(&alice, "notes/ideas.md", "- federated notes\n");
        let original = commit_all(&alice, "Add ideas");

        for relay in ["bob", "charlie"] {
            let dir = self.dir(relay);
            git(&dir, &["fetch", "--quiet", alice.to_str().unwrap(), "main"]);
            git(&dir, &["cherry-pick", "-x", &original]);
        }

        let bob = self.dir("bob");
        write(&bob, "notes/bob.md", "bob was here\n");
        commit_all(&bob, "Add bob's page");
        original
    }

    fn project(&self) -> Project {
        let source = GitCommitSource::new(
            &self.local,
            Duration::from_secs(60),
            Duration::from_secs(60),
        )
        .expect("open local working copy");
        let peers = ["bob", "charlie"]
            .iter()
            .map(|id| Peer {
                id: id.to_string(),
                display_name: id.to_string(),
                remote: id.to_string(),
                branch: "main".into(),
            })
            .collect();
        Project::new("vault", "Vault", peers, Arc::new(source))
    }

    fn ledger(&self) -> Arc<FileLedgerStore> {
        Arc::new(FileLedgerStore::new(&self.ledgers))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn relayed_contribution_is_grouped_and_rejected() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fed = Federation::new();
    let original = fed.relay_scenario();
    let project = fed.project();
    let ledger = fed.ledger();

    // Uncommitted work, tracked and untracked.
    write(&fed.local, "notes/intro.md", "# Shared vault\n\nhello, draft\n");
    write(&fed.local, "scratch.md", "unsaved thoughts\n");
    let start_head = git(&fed.local, &["rev-parse", "HEAD"]);

    let report = PendingResolver::new(ledger.clone(), 2).resolve(&project).await;
    assert!(report.peers.iter().all(|p| !p.is_failed()), "{report:?}");
    let groups = group_pending(&report.peers);
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].contribution_id, original);
    assert_eq!(groups[0].offered_by, vec!["bob", "charlie"]);
    assert_eq!(groups[1].offered_by, vec!["bob"]);

    let controller = PreviewController::new(ledger.clone(), AcceptStashPolicy::Restore);
    let outcome = controller.start(&project, groups).await.unwrap();
    assert_eq!(outcome.state, PreviewState::Previewing);
    assert!(fed.local.join("notes/ideas.md").exists());
    assert!(fed.local.join("notes/bob.md").exists());
    assert!(!fed.local.join("scratch.md").exists());

    let outcome = controller.reject("vault").await.unwrap();
    assert_eq!(outcome.state, PreviewState::Rejected);

    assert_eq!(git(&fed.local, &["rev-parse", "HEAD"]), start_head);
    assert!(!fed.local.join("notes/ideas.md").exists());
    assert!(fed.local.join("scratch.md").exists());
    let intro = std::fs::read_to_string(fed.local.join("notes/intro.md")).unwrap();
    assert!(intro.contains("hello, draft"));
    assert!(git(&fed.local, &["stash", "list"]).is_empty());

    let rejected = ledger.list_rejected("vault", "charlie").unwrap();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].original_contribution_identity, original);

    let report = PendingResolver::new(ledger.clone(), 2).resolve(&project).await;
    assert_eq!(report.summary.pending, 0);
    assert_eq!(report.summary.filtered_rejected, 3);
}

#[tokio::test]
async fn accepted_preview_lands_in_history() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fed = Federation::new();
    let original = fed.relay_scenario();
    let project = fed.project();
    let ledger = fed.ledger();
    write(&fed.local, "scratch.md", "unsaved thoughts\n");

    let report = PendingResolver::new(ledger.clone(), 4).resolve(&project).await;
    let groups = group_pending(&report.peers);

    let controller = PreviewController::new(ledger.clone(), AcceptStashPolicy::Restore);
    controller.start(&project, groups).await.unwrap();
    let outcome = controller.accept("vault").await.unwrap();
    assert_eq!(outcome.state, PreviewState::Accepted);
    assert!(outcome.retained_stash.is_none());
    assert!(fed.local.join("scratch.md").exists());

    let log = git(&fed.local, &["log", "--format=%B", "-n", "2"]);
    assert!(log.contains(&format!("(cherry picked from commit {original})")));

    let bob = ledger.lookup("vault", "bob", &original).unwrap().unwrap();
    assert_eq!(bob.decision, Decision::Accepted);
    assert!(bob.local_hash.is_some());

    let entries = ledger.load("vault", "bob").unwrap().len()
        + ledger.load("vault", "charlie").unwrap().len();
    assert_eq!(entries, 3);

    assert!(project.source.has_uncommitted_changes().await.unwrap());
}

#[tokio::test]
async fn conflicting_offer_parks_then_cancels_cleanly() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fed = Federation::new();
    let project = fed.project();
    let ledger = fed.ledger();

    let bob = fed.dir("bob");
    write(&bob, "notes/intro.md", "# Shared vault\n\nhello from bob\n");
    commit_all(&bob, "Bob rewrites intro");

    write(&fed.local, "notes/intro.md", "# Shared vault\n\nhello from me\n");
    let start_head = commit_all(&fed.local, "I rewrite intro");

    let report = PendingResolver::new(ledger.clone(), 4).resolve(&project).await;
    let groups = group_pending(&report.peers);
    assert_eq!(groups.len(), 1);

    let controller = PreviewController::new(ledger.clone(), AcceptStashPolicy::Restore);
    let outcome = controller.start(&project, groups).await.unwrap();
    assert_eq!(outcome.state, PreviewState::Conflicted);
    let conflict = outcome.conflict.unwrap();
    assert_eq!(conflict.conflicting_files, vec!["notes/intro.md"]);
    assert!(fed.local.join(".git").join("CHERRY_PICK_HEAD").exists());

    let outcome = controller.cancel("vault").await.unwrap();
    assert_eq!(outcome.state, PreviewState::Cancelled);
    assert_eq!(git(&fed.local, &["rev-parse", "HEAD"]), start_head);
    assert!(!fed.local.join(".git").join("CHERRY_PICK_HEAD").exists());
    assert!(git(&fed.local, &["status", "--porcelain"]).is_empty());
    assert!(ledger.load("vault", "bob").unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_peer_does_not_hide_others() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fed = Federation::new();
    fed.relay_scenario();
    git(
        &fed.local,
        &["remote", "add", "ghost", fed.root.join("missing").to_str().unwrap()],
    );

    let mut project = fed.project();
    project.peers.insert(
        1,
        Peer {
            id: "ghost".into(),
            display_name: "Ghost".into(),
            remote: "ghost".into(),
            branch: "main".into(),
        },
    );

    let report = PendingResolver::new(fed.ledger(), 3).resolve(&project).await;
    assert_eq!(report.peers.len(), 3);
    assert_eq!(report.peers[0].commits.len(), 2);
    assert!(report.peers[1].fetch_error.is_some());
    assert_eq!(report.peers[2].commits.len(), 1);
    assert_eq!(report.summary.peers_failed, 1);
}

#[tokio::test]
async fn conflict_resolved_by_hand_resumes_into_history() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fed = Federation::new();
    let project = fed.project();
    let ledger = fed.ledger();

    let bob = fed.dir("bob");
    write(&bob, "notes/intro.md", "# Shared vault\n\nhello from bob\n");
    let bob_hash = commit_all(&bob, "Bob rewrites intro");

    write(&fed.local, "notes/intro.md", "# Shared vault\n\nhello from me\n");
    commit_all(&fed.local, "I rewrite intro");

    let report = PendingResolver::new(ledger.clone(), 4).resolve(&project).await;
    let groups = group_pending(&report.peers);
    let controller = PreviewController::new(ledger.clone(), AcceptStashPolicy::Restore);
    let outcome = controller.start(&project, groups).await.unwrap();
    assert_eq!(outcome.state, PreviewState::Conflicted);

    // Still unmerged: resume reports the conflict again.
    let outcome = controller.resume("vault").await.unwrap();
    assert_eq!(outcome.state, PreviewState::Conflicted);
    assert_eq!(
        outcome.conflict.unwrap().conflicting_files,
        vec!["notes/intro.md"]
    );

    write(&fed.local, "notes/intro.md", "# Shared vault\n\nhello from both of us\n");
    git(&fed.local, &["add", "notes/intro.md"]);
    let outcome = controller.resume("vault").await.unwrap();
    assert_eq!(outcome.state, PreviewState::Previewing);
    assert!(!fed.local.join(".git").join("CHERRY_PICK_HEAD").exists());

    let outcome = controller.accept("vault").await.unwrap();
    assert_eq!(outcome.state, PreviewState::Accepted);

    let head = git(&fed.local, &["rev-parse", "HEAD"]);
    let message = git(&fed.local, &["log", "--format=%B", "-n", "1"]);
    assert!(message.contains(&format!("(cherry picked from commit {bob_hash})")));
    let intro = std::fs::read_to_string(fed.local.join("notes/intro.md")).unwrap();
    assert!(intro.contains("hello from both of us"));

    let entry = ledger.lookup("vault", "bob", &bob_hash).unwrap().unwrap();
    assert_eq!(entry.decision, Decision::Accepted);
    assert_eq!(entry.local_hash.as_deref(), Some(head.as_str()));
    assert!(git(&fed.local, &["status", "--porcelain"]).is_empty());
}

#[tokio::test]
async fn own_commit_relayed_back_is_not_offered() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fed = Federation::new();
    let project = fed.project();
    let ledger = fed.ledger();

    write(&fed.local, "notes/mine.md", "my note\n");
    let mine = commit_all(&fed.local, "My note");

    let bob = fed.dir("bob");
    git(&bob, &["fetch", "--quiet", fed.local.to_str().unwrap(), "main"]);
    git(&bob, &["cherry-pick", "-x", &mine]);

    let report = PendingResolver::new(ledger.clone(), 4).resolve(&project).await;
    assert!(report.peers.iter().all(|p| !p.is_failed()), "{report:?}");
    assert_eq!(report.summary.pending, 0);
    assert_eq!(report.summary.filtered_local, 1);
    assert!(group_pending(&report.peers).is_empty());
}

#[tokio::test]
async fn accepted_contribution_from_new_relay_is_not_offered() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }
    let fed = Federation::new();
    let project = fed.project();
    let ledger = fed.ledger();

    let alice = fed.dir("alice");
    write(&alice, "notes/ideas.md", "- federated notes\n");
    let original = commit_all(&alice, "Add ideas");
    let bob = fed.dir("bob");
    git(&bob, &["fetch", "--quiet", alice.to_str().unwrap(), "main"]);
    git(&bob, &["cherry-pick", "-x", &original]);

    let report = PendingResolver::new(ledger.clone(), 4).resolve(&project).await;
    let groups = group_pending(&report.peers);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].offered_by, vec!["bob"]);

    let controller = PreviewController::new(ledger.clone(), AcceptStashPolicy::Restore);
    controller.start(&project, groups).await.unwrap();
    controller.accept("vault").await.unwrap();
    let commits_after_accept = git(&fed.local, &["rev-list", "--count", "HEAD"]);

    // Charlie relays the same contribution only now.
    let charlie = fed.dir("charlie");
    git(&charlie, &["fetch", "--quiet", alice.to_str().unwrap(), "main"]);
    git(&charlie, &["cherry-pick", "-x", &original]);

    let report = PendingResolver::new(ledger.clone(), 4).resolve(&project).await;
    assert_eq!(report.summary.pending, 0);
    assert_eq!(report.summary.filtered_accepted, 1);
    assert_eq!(report.summary.filtered_local, 1);
    assert!(group_pending(&report.peers).is_empty());
    assert!(ledger.lookup("vault", "charlie", &original).unwrap().is_none());
    assert_eq!(git(&fed.local, &["rev-list", "--count", "HEAD"]), commits_after_accept);
}
