//! peerpick core library.
//!
//! This crate provides the cherry-pick collaboration engine: fetching change
//! offers from peer remotes, collapsing relayed copies of the same
//! contribution, staging a reversible preview on the working copy, and
//! keeping a per-peer accept/reject ledger.

pub mod config;
pub mod conflict;
pub mod errors;
pub mod git;
pub mod grouping;
pub mod ledger;
pub mod models;
pub mod preview;
pub mod project;
pub mod resolver;

// Re-exports for convenience.
pub use config::PeerpickConfig;
pub use conflict::ConflictPayload;
pub use grouping::group_pending;
pub use ledger::{FileLedgerStore, LedgerStore, MemoryLedgerStore};
pub use preview::{PreviewController, PreviewOutcome, PreviewState};
pub use project::Project;
pub use resolver::PendingResolver;
