//! Domain model types used throughout peerpick.
//!
//! These types bridge the commit source adapter, the resolver, the preview
//! controller and whatever presentation layer renders them. Everything here
//! is already validated; raw git output never reaches this module.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Peers
// ---------------------------------------------------------------------------

/// A collaborator reachable through a pre-configured git remote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Peer {
    /// Stable identifier, also the ledger file name.
    pub id: String,
    /// Human-readable name shown in the UI.
    pub display_name: String,
    /// Name of the git remote.
    pub remote: String,
    /// Branch on the remote that carries this peer's offers.
    pub branch: String,
}

impl Peer {
    /// Remote-tracking ref updated by `git fetch <remote>`.
    pub fn tracking_ref(&self) -> String {
        format!("refs/remotes/{}/{}", self.remote, self.branch)
    }
}

// ---------------------------------------------------------------------------
// Commits
// ---------------------------------------------------------------------------

/// Kind of change to a file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed { from: String },
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "A"),
            Self::Modified => write!(f, "M"),
            Self::Deleted => write!(f, "D"),
            Self::Renamed { .. } => write!(f, "R"),
        }
    }
}

/// A single file touched by a commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    #[serde(flatten)]
    pub kind: ChangeKind,
}

/// An immutable commit as read from a peer's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Commit {
    /// Hash in the origin repository's history.
    pub hash: String,
    pub author_name: String,
    pub author_email: String,
    /// First line of the message.
    pub subject: String,
    /// Remainder of the message after the subject, trimmed.
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub file_changes: Vec<FileChange>,
}

impl Commit {
    /// Abbreviated hash for display.
    pub fn short_hash(&self) -> &str {
        short_hash(&self.hash)
    }
}

/// Abbreviate a hash to at most 8 characters.
pub fn short_hash(hash: &str) -> &str {
    match hash.char_indices().nth(8) {
        Some((end, _)) => &hash[..end],
        None => hash,
    }
}

/// A commit offered by one peer, annotated with its contribution identity.
///
/// Created per resolve cycle and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingCommit {
    pub commit: Commit,
    /// The original contribution this commit carries (dedup key).
    pub contribution_id: String,
    /// The peer offering this copy of the contribution.
    pub peer_id: String,
}

impl PendingCommit {
    /// True when this copy is the contribution itself rather than a relay.
    pub fn is_origin(&self) -> bool {
        self.commit.hash == self.contribution_id
    }
}

// ---------------------------------------------------------------------------
// Adapter outcomes
// ---------------------------------------------------------------------------

/// Result of fetching one peer. Network-class failures land in `error`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchOutcome {
    pub peer_id: String,
    pub has_updates: bool,
    pub commits: Vec<Commit>,
    pub error: Option<String>,
}

impl FetchOutcome {
    pub fn failed(peer_id: &str, error: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            has_updates: false,
            commits: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// A commit successfully cherry-picked onto the working copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppliedCommit {
    pub source_hash: String,
    pub local_hash: String,
}

/// The commit at which an apply stopped, with its unmerged paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyConflict {
    pub commit: Commit,
    pub conflicting_files: Vec<String>,
}

/// Result of applying a sequence of commits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub applied: Vec<AppliedCommit>,
    pub conflicted: Option<ApplyConflict>,
}

/// Opaque handle to stashed uncommitted work (the stash commit hash).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StashToken(pub String);

impl std::fmt::Display for StashToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// A recorded decision about a contribution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accepted,
    Rejected,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// One line of a peer ledger.
///
/// Fields this version does not know about are carried in `extra` so a
/// rewrite never drops them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub original_contribution_identity: String,
    pub peer_id: String,
    pub decision: Decision,
    pub decided_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_hash: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl LedgerEntry {
    pub fn new(
        identity: &str,
        peer_id: &str,
        decision: Decision,
        local_hash: Option<&str>,
    ) -> Self {
        Self {
            original_contribution_identity: identity.to_string(),
            peer_id: peer_id.to_string(),
            decision,
            decided_at: Utc::now(),
            local_hash: local_hash.map(str::to_string),
            extra: serde_json::Map::new(),
        }
    }
}

/// What a `record_decision` call did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// No live decision existed; one was appended.
    Created,
    /// The same decision was already live; nothing was written.
    Unchanged,
    /// The opposite decision was live and has been replaced.
    Superseded,
}

// ---------------------------------------------------------------------------
// Local history
// ---------------------------------------------------------------------------

/// Shortest abbreviation a contribution id may use.
const MIN_ID_LEN: usize = 7;

/// Contribution ids already present in the local working copy: every commit
/// reachable from `HEAD` plus the origin named by each local provenance
/// trailer.
///
/// Lookups tolerate abbreviation on either side, since trailers written by
/// other tooling may carry short hashes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalHistory {
    ids: BTreeSet<String>,
}

impl LocalHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: &str) {
        self.ids.insert(id.to_ascii_lowercase());
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether `id`, full or abbreviated, names a contribution already here.
    pub fn contains(&self, id: &str) -> bool {
        let id = id.to_ascii_lowercase();
        if self.ids.contains(&id) {
            return true;
        }
        if id.len() < MIN_ID_LEN || !id.is_ascii() {
            return false;
        }
        // A longer known id that `id` abbreviates.
        if self
            .ids
            .range(id.clone()..)
            .next()
            .is_some_and(|known| known.starts_with(&id))
        {
            return true;
        }
        // A known abbreviation of `id`.
        (MIN_ID_LEN..id.len()).any(|end| self.ids.contains(&id[..end]))
    }
}

impl<'a> FromIterator<&'a str> for LocalHistory {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut history = Self::new();
        for id in iter {
            history.insert(id);
        }
        history
    }
}

// ---------------------------------------------------------------------------
// Resolve results
// ---------------------------------------------------------------------------

/// Pending commits offered by one peer after ledger filtering.
///
/// `fetch_error` and `ledger_error` distinguish "failed" from "no updates",
/// which is an empty `commits` list with both errors unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerResolution {
    pub peer_id: String,
    pub display_name: String,
    pub commits: Vec<PendingCommit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_error: Option<String>,
}

impl PeerResolution {
    pub fn is_failed(&self) -> bool {
        self.fetch_error.is_some() || self.ledger_error.is_some()
    }
}

/// Aggregate counts for one resolve cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolveSummary {
    pub peers: usize,
    pub peers_failed: usize,
    pub pending: usize,
    pub filtered_accepted: usize,
    pub filtered_rejected: usize,
    /// Commits whose contribution is already in local history.
    #[serde(default)]
    pub filtered_local: usize,
}

/// Everything one resolve cycle produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolveReport {
    pub peers: Vec<PeerResolution>,
    pub summary: ResolveSummary,
}

// ---------------------------------------------------------------------------
// Display groups
// ---------------------------------------------------------------------------

/// One original contribution with every peer currently offering it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisplayGroup {
    pub contribution_id: String,
    /// The copy that will be applied.
    pub representative: PendingCommit,
    /// Every offering peer, sorted and unique.
    pub offered_by: Vec<String>,
    /// Every pending copy that collapsed into this group.
    pub members: Vec<PendingCommit>,
}

impl DisplayGroup {
    /// Offering peers other than the representative's.
    pub fn also_offered_by(&self) -> Vec<&str> {
        self.offered_by
            .iter()
            .filter(|p| **p != self.representative.peer_id)
            .map(String::as_str)
            .collect()
    }

    pub fn commit(&self) -> &Commit {
        &self.representative.commit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_hash_counts_characters() {
        assert_eq!(short_hash("0123456789abcdef"), "01234567");
        assert_eq!(short_hash("abc"), "abc");
        // Hand-edited ledgers can carry non-ASCII identities.
        assert_eq!(short_hash("a\u{e9}\u{e9}\u{e9}\u{e9}"), "a\u{e9}\u{e9}\u{e9}\u{e9}");
        assert_eq!(
            short_hash("\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}"),
            "\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}"
        );
    }

    #[test]
    fn test_local_history_matches_abbreviations() {
        let history: LocalHistory = ["9C9F87AF0123456789abcdef0123456789abcdef", "26498c0"]
            .into_iter()
            .collect();

        assert!(history.contains("9c9f87af0123456789abcdef0123456789abcdef"));
        assert!(history.contains("9c9f87a"));
        assert!(history.contains("26498c0ffee0123456789abcdef0123456789abcd"));
        assert!(!history.contains("9c9f87b"));
        assert!(!history.contains("26498"));
        assert!(!history.contains("ba11fc8"));
    }
}
