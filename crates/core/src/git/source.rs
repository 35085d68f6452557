//! The commit source adapter: everything the engine needs from git.
//!
//! Reads go through `git2` on a blocking task; anything that mutates the
//! working copy or talks to a remote goes through the `git` CLI so that
//! cherry-pick, stash and fetch behave exactly as they do for the user.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use git2::{Delta, Repository, Sort, StatusOptions};
use tracing::{debug, info, instrument, warn};

use super::provenance::parse_provenance;
use super::runner::GitRunner;
use crate::errors::GitError;
use crate::models::{
    AppliedCommit, ApplyConflict, ApplyOutcome, ChangeKind, Commit, FetchOutcome, FileChange,
    LocalHistory, Peer, StashToken,
};

/// Upper bound on commits listed per peer in one fetch.
const MAX_INCOMING: usize = 1000;

/// Version-control capability consumed by the resolver and the preview
/// controller. One instance wraps one working copy.
#[async_trait]
pub trait CommitSource: Send + Sync {
    /// Fetch a peer without merging and list the commits reachable from its
    /// branch but not from local `HEAD`, oldest first.
    ///
    /// Never fails: fetch problems are reported in [`FetchOutcome::error`].
    async fn fetch(&self, peer: &Peer) -> FetchOutcome;

    /// Every contribution id already present locally: the hashes reachable
    /// from `HEAD` and the origins named by their provenance trailers. An
    /// unborn `HEAD` yields an empty history.
    async fn local_history(&self) -> Result<LocalHistory, GitError>;

    /// Hash of the commit `HEAD` points at.
    async fn head_hash(&self) -> Result<String, GitError>;

    /// Whether tracked or untracked changes exist in the working copy.
    async fn has_uncommitted_changes(&self) -> Result<bool, GitError>;

    /// Stash all uncommitted work, untracked files included. Returns `None`
    /// when there was nothing to stash.
    async fn stash(&self, label: &str) -> Result<Option<StashToken>, GitError>;

    /// Re-apply and drop the stash entry identified by `token`.
    async fn restore(&self, token: &StashToken) -> Result<(), GitError>;

    /// Drop the stash entry identified by `token` without applying it.
    async fn drop_stash(&self, token: &StashToken) -> Result<(), GitError>;

    /// Cherry-pick `commits` in order, stopping at the first conflict.
    /// Commits applied before the conflict stay in place.
    async fn apply_commits(&self, commits: &[Commit]) -> Result<ApplyOutcome, GitError>;

    /// Finish a conflicted cherry-pick of `commit` after manual resolution.
    /// Reports the conflict again if unmerged paths remain.
    async fn continue_apply(&self, commit: &Commit) -> Result<ApplyOutcome, GitError>;

    /// Hard-reset the working copy to `reference`, abandoning any
    /// in-progress cherry-pick.
    async fn reset_to(&self, reference: &str) -> Result<(), GitError>;
}

/// [`CommitSource`] backed by a local git working copy.
pub struct GitCommitSource {
    repo_path: PathBuf,
    runner: GitRunner,
    fetch_timeout: Duration,
}

impl GitCommitSource {
    /// Open the working copy at `repo_path`.
    pub fn new<P: AsRef<Path>>(
        repo_path: P,
        command_timeout: Duration,
        fetch_timeout: Duration,
    ) -> Result<Self, GitError> {
        let path = repo_path.as_ref();
        info!(path = %path.display(), "opening git working copy");
        let repo = Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        let root = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| GitError::RepositoryNotFound(format!("{} (bare)", path.display())))?;
        Ok(Self {
            runner: GitRunner::new(&root, command_timeout),
            repo_path: root,
            fetch_timeout,
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Run a `git2` closure on the blocking pool against a fresh handle.
    async fn with_repo<T, F>(&self, f: F) -> Result<T, GitError>
    where
        T: Send + 'static,
        F: FnOnce(&Repository) -> Result<T, GitError> + Send + 'static,
    {
        let path = self.repo_path.clone();
        tokio::task::spawn_blocking(move || {
            let repo = Repository::open(&path)
                .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
            f(&repo)
        })
        .await
        .map_err(|e| GitError::TaskFailed(e.to_string()))?
    }

    async fn list_incoming(&self, tracking_ref: String) -> Result<Vec<Commit>, GitError> {
        self.with_repo(move |repo| list_incoming_blocking(repo, &tracking_ref))
            .await
    }

    async fn conflicted_files(&self) -> Result<Vec<String>, GitError> {
        self.with_repo(conflicted_files_blocking).await
    }

    /// Position of `token` in `git stash list`, as a `stash@{n}` ref.
    async fn stash_ref(&self, token: &StashToken) -> Result<String, GitError> {
        let listing = self.runner.run(&["stash", "list", "--format=%H"]).await?;
        listing
            .lines()
            .position(|line| line.trim() == token.0)
            .map(|idx| format!("stash@{{{idx}}}"))
            .ok_or_else(|| GitError::StashNotFound(token.0.clone()))
    }

    async fn cherry_pick_one(&self, commit: &Commit) -> Result<Result<String, Vec<String>>, GitError> {
        let output = self
            .runner
            .output(&["cherry-pick", "-x", "--keep-redundant-commits", &commit.hash])
            .await?;
        if output.success() {
            let local = self.head_hash().await?;
            debug!(source = %commit.short_hash(), local = %local, "cherry-picked");
            return Ok(Ok(local));
        }

        let files = self.conflicted_files().await?;
        if files.is_empty() {
            warn!(hash = %commit.hash, stderr = %output.stderr.trim(), "cherry-pick failed without conflicts");
            return Err(GitError::CommandFailed {
                command: "cherry-pick".into(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(Err(files))
    }
}

#[async_trait]
impl CommitSource for GitCommitSource {
    #[instrument(skip(self, peer), fields(peer = %peer.id, remote = %peer.remote))]
    async fn fetch(&self, peer: &Peer) -> FetchOutcome {
        info!("fetching peer");
        if let Err(e) = self
            .runner
            .run_with_timeout(&["fetch", "--no-tags", "--quiet", &peer.remote], self.fetch_timeout)
            .await
        {
            warn!(error = %e, "fetch failed");
            return FetchOutcome::failed(&peer.id, e.to_string());
        }

        match self.list_incoming(peer.tracking_ref()).await {
            Ok(commits) => {
                debug!(count = commits.len(), "listed incoming commits");
                FetchOutcome {
                    peer_id: peer.id.clone(),
                    has_updates: !commits.is_empty(),
                    commits,
                    error: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "could not list incoming commits");
                FetchOutcome::failed(&peer.id, e.to_string())
            }
        }
    }

    #[instrument(skip(self))]
    async fn local_history(&self) -> Result<LocalHistory, GitError> {
        let history = self.with_repo(local_history_blocking).await?;
        debug!(ids = history.len(), "scanned local history");
        Ok(history)
    }

    async fn head_hash(&self) -> Result<String, GitError> {
        self.with_repo(|repo| {
            let commit = repo.head()?.peel_to_commit()?;
            Ok(commit.id().to_string())
        })
        .await
    }

    async fn has_uncommitted_changes(&self) -> Result<bool, GitError> {
        self.with_repo(|repo| {
            let mut opts = StatusOptions::new();
            opts.include_untracked(true)
                .include_ignored(false)
                .exclude_submodules(true);
            let statuses = repo.statuses(Some(&mut opts))?;
            Ok(statuses.iter().any(|entry| {
                let status = entry.status();
                !status.is_ignored() && status != git2::Status::CURRENT
            }))
        })
        .await
    }

    #[instrument(skip(self))]
    async fn stash(&self, label: &str) -> Result<Option<StashToken>, GitError> {
        if !self.has_uncommitted_changes().await? {
            debug!("nothing to stash");
            return Ok(None);
        }
        self.runner
            .run(&["stash", "push", "--include-untracked", "-m", label])
            .await?;
        let hash = self
            .runner
            .run(&["rev-parse", "--verify", "refs/stash"])
            .await?
            .trim()
            .to_string();
        if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(GitError::ParseError(format!("unexpected stash hash '{hash}'")));
        }
        info!(token = %hash, "stashed uncommitted work");
        Ok(Some(StashToken(hash)))
    }

    #[instrument(skip(self), fields(token = %token))]
    async fn restore(&self, token: &StashToken) -> Result<(), GitError> {
        let stash_ref = self.stash_ref(token).await?;
        self.runner.run(&["stash", "pop", &stash_ref]).await?;
        info!("restored stashed work");
        Ok(())
    }

    #[instrument(skip(self), fields(token = %token))]
    async fn drop_stash(&self, token: &StashToken) -> Result<(), GitError> {
        let stash_ref = self.stash_ref(token).await?;
        self.runner.run(&["stash", "drop", &stash_ref]).await?;
        info!("dropped stashed work");
        Ok(())
    }

    #[instrument(skip(self, commits), fields(count = commits.len()))]
    async fn apply_commits(&self, commits: &[Commit]) -> Result<ApplyOutcome, GitError> {
        let mut outcome = ApplyOutcome::default();
        for commit in commits {
            match self.cherry_pick_one(commit).await? {
                Ok(local_hash) => outcome.applied.push(AppliedCommit {
                    source_hash: commit.hash.clone(),
                    local_hash,
                }),
                Err(conflicting_files) => {
                    info!(hash = %commit.short_hash(), files = conflicting_files.len(), "cherry-pick conflicted");
                    outcome.conflicted = Some(ApplyConflict {
                        commit: commit.clone(),
                        conflicting_files,
                    });
                    break;
                }
            }
        }
        Ok(outcome)
    }

    #[instrument(skip(self, commit), fields(hash = %commit.short_hash()))]
    async fn continue_apply(&self, commit: &Commit) -> Result<ApplyOutcome, GitError> {
        let remaining = self.conflicted_files().await?;
        if !remaining.is_empty() {
            return Ok(ApplyOutcome {
                applied: Vec::new(),
                conflicted: Some(ApplyConflict {
                    commit: commit.clone(),
                    conflicting_files: remaining,
                }),
            });
        }

        self.runner.run(&["cherry-pick", "--continue"]).await?;
        let local_hash = self.head_hash().await?;
        info!(local = %local_hash, "resolved cherry-pick committed");
        Ok(ApplyOutcome {
            applied: vec![AppliedCommit {
                source_hash: commit.hash.clone(),
                local_hash,
            }],
            conflicted: None,
        })
    }

    #[instrument(skip(self))]
    async fn reset_to(&self, reference: &str) -> Result<(), GitError> {
        self.runner
            .run(&["reset", "--hard", "--quiet", reference])
            .await?;
        self.with_repo(|repo| {
            repo.cleanup_state()?;
            Ok(())
        })
        .await?;
        info!("working copy reset");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Blocking git2 helpers
// ---------------------------------------------------------------------------

fn list_incoming_blocking(repo: &Repository, tracking_ref: &str) -> Result<Vec<Commit>, GitError> {
    let remote_oid = repo
        .refname_to_id(tracking_ref)
        .map_err(|_| GitError::RefNotFound(tracking_ref.to_string()))?;

    let mut revwalk = repo.revwalk()?;
    revwalk.push(remote_oid)?;
    if let Some(head_oid) = repo.head().ok().and_then(|h| h.target()) {
        revwalk.hide(head_oid)?;
    }
    revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME | Sort::REVERSE)?;

    let mut commits = Vec::new();
    for oid_result in revwalk {
        let commit = repo.find_commit(oid_result?)?;
        if commit.parent_count() > 1 {
            debug!(sha = %commit.id(), "skipping merge commit");
            continue;
        }
        commits.push(read_commit(repo, &commit)?);
        if commits.len() >= MAX_INCOMING {
            warn!("reached {} incoming commit limit", MAX_INCOMING);
            break;
        }
    }
    Ok(commits)
}

fn local_history_blocking(repo: &Repository) -> Result<LocalHistory, GitError> {
    let mut history = LocalHistory::new();
    let Some(head_oid) = repo.head().ok().and_then(|h| h.target()) else {
        return Ok(history);
    };

    let mut revwalk = repo.revwalk()?;
    revwalk.push(head_oid)?;
    for oid_result in revwalk {
        let oid = oid_result?;
        history.insert(&oid.to_string());
        let commit = repo.find_commit(oid)?;
        let message = String::from_utf8_lossy(commit.message_bytes());
        let (_, body) = split_message(&message);
        if let Some(origin) = parse_provenance(&body) {
            history.insert(&origin);
        }
    }
    Ok(history)
}

/// Validate a `git2` commit into the engine's [`Commit`] shape.
fn read_commit(repo: &Repository, commit: &git2::Commit<'_>) -> Result<Commit, GitError> {
    let message = String::from_utf8_lossy(commit.message_bytes()).to_string();
    let (subject, body) = split_message(&message);

    let seconds = commit.time().seconds();
    let timestamp = DateTime::from_timestamp(seconds, 0).ok_or_else(|| {
        GitError::ParseError(format!("commit {} has invalid time {}", commit.id(), seconds))
    })?;

    let author = commit.author();
    Ok(Commit {
        hash: commit.id().to_string(),
        author_name: author.name().unwrap_or("").to_string(),
        author_email: author.email().unwrap_or("").to_string(),
        subject,
        body,
        timestamp,
        file_changes: file_changes(repo, commit)?,
    })
}

fn file_changes(repo: &Repository, commit: &git2::Commit<'_>) -> Result<Vec<FileChange>, GitError> {
    let tree = commit.tree()?;
    let parent_tree = if commit.parent_count() > 0 {
        Some(commit.parent(0)?.tree()?)
    } else {
        None
    };
    let mut diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;
    diff.find_similar(None)?;

    let changes = diff
        .deltas()
        .map(|delta| {
            let old_path = diff_path(&delta.old_file());
            let new_path = diff_path(&delta.new_file());
            match delta.status() {
                Delta::Added => FileChange {
                    path: new_path,
                    kind: ChangeKind::Added,
                },
                Delta::Deleted => FileChange {
                    path: old_path,
                    kind: ChangeKind::Deleted,
                },
                Delta::Renamed => FileChange {
                    path: new_path,
                    kind: ChangeKind::Renamed { from: old_path },
                },
                _ => FileChange {
                    path: new_path,
                    kind: ChangeKind::Modified,
                },
            }
        })
        .collect();
    Ok(changes)
}

fn diff_path(file: &git2::DiffFile<'_>) -> String {
    file.path()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn conflicted_files_blocking(repo: &Repository) -> Result<Vec<String>, GitError> {
    let index = repo.index()?;
    let mut files = Vec::new();
    for conflict in index.conflicts()? {
        let conflict = conflict?;
        let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
        if let Some(entry) = entry {
            files.push(String::from_utf8_lossy(&entry.path).to_string());
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// Split a raw commit message into subject and trimmed body.
pub fn split_message(message: &str) -> (String, String) {
    let message = message.trim_start();
    match message.split_once('\n') {
        Some((subject, rest)) => (subject.trim().to_string(), rest.trim().to_string()),
        None => (message.trim().to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_message() {
        let (s, b) = split_message("Add notes\n\nLonger text.\n\n(cherry picked from commit abcdef1)\n");
        assert_eq!(s, "Add notes");
        assert_eq!(b, "Longer text.\n\n(cherry picked from commit abcdef1)");

        let (s, b) = split_message("single line");
        assert_eq!(s, "single line");
        assert!(b.is_empty());
    }

    #[test]
    fn test_repo_not_found() {
        let result = GitCommitSource::new(
            "/nonexistent/peerpick",
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(GitError::RepositoryNotFound(_))));
    }

    #[test]
    fn test_local_history_includes_trailer_origins() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        assert!(local_history_blocking(&repo).unwrap().is_empty());

        let sig = git2::Signature::now("Alice", "alice@example.com").unwrap();
        let tree = repo
            .find_tree(repo.index().unwrap().write_tree().unwrap())
            .unwrap();
        let first = repo
            .commit(Some("HEAD"), &sig, &sig, "Start", &tree, &[])
            .unwrap();
        let parent = repo.find_commit(first).unwrap();
        let relay = repo
            .commit(
                Some("HEAD"),
                &sig,
                &sig,
                "Add ideas\n\n(cherry picked from commit 94494f33aa)",
                &tree,
                &[&parent],
            )
            .unwrap();

        let history = local_history_blocking(&repo).unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.contains(&first.to_string()));
        assert!(history.contains(&relay.to_string()));
        assert!(history.contains("94494f33aa"));
    }

    #[test]
    fn test_read_commit_from_git2_repo() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("a.txt")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = git2::Signature::now("Alice", "alice@example.com").unwrap();
        let oid = repo
            .commit(Some("HEAD"), &sig, &sig, "Add a\n\nbody text", &tree, &[])
            .unwrap();

        let commit = repo.find_commit(oid).unwrap();
        let parsed = read_commit(&repo, &commit).unwrap();
        assert_eq!(parsed.hash, oid.to_string());
        assert_eq!(parsed.subject, "Add a");
        assert_eq!(parsed.body, "body text");
        assert_eq!(parsed.author_name, "Alice");
        assert_eq!(
            parsed.file_changes,
            vec![FileChange {
                path: "a.txt".into(),
                kind: ChangeKind::Added
            }]
        );
    }
}
