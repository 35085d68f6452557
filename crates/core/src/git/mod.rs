//! The commit source adapter over git.

pub mod provenance;
pub mod runner;
pub mod source;

pub use provenance::{contribution_id, read_provenance};
pub use runner::GitRunner;
pub use source::{CommitSource, GitCommitSource};
