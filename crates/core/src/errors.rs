//! Error types for the peerpick core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! Two failure classes are deliberately *not* errors: a failed peer fetch is
//! carried as data on [`crate::models::FetchOutcome`], and a cherry-pick
//! conflict is a preview state, not a failure.

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Preview(#[from] PreviewError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from the commit source adapter (git CLI and `git2`).
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// The `git` binary was not found on `$PATH`.
    #[error("git binary not found: {0}")]
    BinaryNotFound(String),

    /// A `git` command exited with a non-zero status.
    #[error("git {command} failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// A `git` command did not finish within its time budget.
    #[error("git {command} timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, remote-tracking ref, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// Backend output could not be validated into a typed value.
    #[error("could not parse git output: {0}")]
    ParseError(String),

    /// No stash entry matches the given token.
    #[error("stash entry {0} not found")]
    StashNotFound(String),

    /// A blocking git task panicked or was cancelled.
    #[error("git task failed: {0}")]
    TaskFailed(String),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Ledger errors
// ---------------------------------------------------------------------------

/// Errors from the collaboration memory store.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger exists but is structurally invalid. History is never
    /// discarded silently; the caller must repair the file.
    #[error("ledger {path} is corrupt at line {line}: {detail}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        detail: String,
    },

    /// Reading or writing a ledger file failed.
    #[error("ledger I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An entry could not be serialised.
    #[error("ledger serialisation error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A project or peer id cannot be used as a ledger file name.
    #[error("invalid ledger key '{0}'")]
    InvalidKey(String),
}

// ---------------------------------------------------------------------------
// Preview errors
// ---------------------------------------------------------------------------

/// Errors from the preview workflow controller.
#[derive(Debug, Error)]
pub enum PreviewError {
    /// A preview is already running for this project. Raised before any
    /// mutation of the working copy.
    #[error("a preview is already active for project '{project_id}' (session {session_id})")]
    AlreadyActive {
        project_id: String,
        session_id: String,
    },

    /// No preview is active for this project.
    #[error("no preview is active for project '{0}'")]
    NotActive(String),

    /// The requested action is not valid in the session's current phase.
    #[error("cannot {action} while preview is {phase}")]
    InvalidState { action: String, phase: String },

    /// `start` was called with an empty selection.
    #[error("no groups selected for preview")]
    NothingSelected,

    #[error("preview git error: {0}")]
    Git(#[from] GitError),

    #[error("preview ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Working-copy recovery failed after another failure. The working copy
    /// may be inconsistent and must be inspected by hand.
    #[error("working copy recovery failed ({recovery}) after: {cause}{}", stash_hint(.stash_token))]
    RestoreFailed {
        cause: String,
        recovery: String,
        stash_token: Option<String>,
    },
}

fn stash_hint(token: &Option<String>) -> String {
    match token {
        Some(t) => format!("; your uncommitted work is kept in stash {t}"),
        None => String::new(),
    }
}

impl PreviewError {
    /// True for errors where the user must intervene on the working copy.
    pub fn is_restore_failure(&self) -> bool {
        matches!(self, Self::RestoreFailed { .. })
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
