//! A collaborative project: one working copy plus the peers it pulls from.

use std::sync::Arc;

use tracing::info;

use crate::config::PeerpickConfig;
use crate::errors::CoreError;
use crate::git::{CommitSource, GitCommitSource};
use crate::models::Peer;

/// One working copy and its configured peers.
///
/// The commit source is shared so resolver tasks and the preview controller
/// can hold it at the same time.
#[derive(Clone)]
pub struct Project {
    pub id: String,
    pub display_name: String,
    pub peers: Vec<Peer>,
    pub source: Arc<dyn CommitSource>,
}

impl Project {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        peers: Vec<Peer>,
        source: Arc<dyn CommitSource>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            peers,
            source,
        }
    }

    /// Open the configured working copy with the git-backed commit source.
    pub fn from_config(config: &PeerpickConfig) -> Result<Self, CoreError> {
        let source = GitCommitSource::new(
            &config.project.path,
            config.command_timeout(),
            config.fetch_timeout(),
        )?;
        let project = Self::new(
            config.project_id(),
            config.project_display_name(),
            config.peers(),
            Arc::new(source),
        );
        info!(
            project = %project.id,
            peers = project.peers.len(),
            "project opened"
        );
        Ok(project)
    }

    pub fn peer(&self, peer_id: &str) -> Option<&Peer> {
        self.peers.iter().find(|p| p.id == peer_id)
    }
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("peers", &self.peers)
            .finish_non_exhaustive()
    }
}
