//! Pending commit resolution.
//!
//! For every configured peer: fetch, tag each commit with its contribution
//! id, and drop whatever the peer's ledger has already decided or local
//! history already contains. Peers are
//! resolved concurrently and in isolation; one peer failing (network or a
//! corrupt ledger) never hides another peer's results.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::git::contribution_id;
use crate::ledger::LedgerStore;
use crate::models::{
    Decision, FetchOutcome, LocalHistory, Peer, PeerResolution, PendingCommit, ResolveReport,
    ResolveSummary,
};
use crate::project::Project;

/// Turns peer histories into per-peer lists of undecided commits.
pub struct PendingResolver {
    ledger: Arc<dyn LedgerStore>,
    max_concurrent: usize,
}

/// Filtering counts for one peer.
#[derive(Debug, Default, Clone, Copy)]
struct FilterCounts {
    accepted: usize,
    rejected: usize,
    local: usize,
}

impl PendingResolver {
    pub fn new(ledger: Arc<dyn LedgerStore>, max_concurrent: usize) -> Self {
        Self {
            ledger,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Fetch every peer and return its undecided commits, in configured peer
    /// order.
    #[instrument(skip(self, project), fields(project = %project.id, peers = project.peers.len()))]
    pub async fn resolve(&self, project: &Project) -> ResolveReport {
        let outcomes = self.fetch_all(project).await;
        // Scanned after fetching so it reflects the head the commits were
        // listed against.
        let local = match project.source.local_history().await {
            Ok(history) => Ok(history),
            Err(e) => {
                warn!(error = %e, "local history unreadable; every peer skipped");
                Err(format!("local history unreadable: {e}"))
            }
        };

        let mut peers = Vec::with_capacity(project.peers.len());
        let mut summary = ResolveSummary {
            peers: project.peers.len(),
            ..Default::default()
        };

        for peer in &project.peers {
            let outcome = match (&local, outcomes.get(&peer.id)) {
                (_, None) => FetchOutcome::failed(&peer.id, "fetch task did not complete"),
                (_, Some(outcome)) if outcome.error.is_some() => outcome.clone(),
                (Err(message), Some(_)) => FetchOutcome::failed(&peer.id, message.as_str()),
                (Ok(_), Some(outcome)) => outcome.clone(),
            };
            let history = local.as_ref().ok();
            let (resolution, counts) = self.resolve_peer(&project.id, peer, outcome, history);

            if resolution.is_failed() {
                summary.peers_failed += 1;
            }
            summary.pending += resolution.commits.len();
            summary.filtered_accepted += counts.accepted;
            summary.filtered_rejected += counts.rejected;
            summary.filtered_local += counts.local;
            peers.push(resolution);
        }

        info!(
            pending = summary.pending,
            failed = summary.peers_failed,
            filtered_accepted = summary.filtered_accepted,
            filtered_rejected = summary.filtered_rejected,
            filtered_local = summary.filtered_local,
            "resolve complete"
        );
        ResolveReport { peers, summary }
    }

    /// One fetch task per peer, at most `max_concurrent` in flight, all
    /// joined before returning.
    async fn fetch_all(&self, project: &Project) -> HashMap<String, FetchOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        for peer in project.peers.iter().cloned() {
            let source = Arc::clone(&project.source);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => source.fetch(&peer).await,
                    Err(_) => FetchOutcome::failed(&peer.id, "fetch scheduler closed"),
                };
                (peer.id, outcome)
            });
        }

        let mut outcomes = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((peer_id, outcome)) => {
                    outcomes.insert(peer_id, outcome);
                }
                Err(e) => warn!(error = %e, "fetch task panicked"),
            }
        }
        outcomes
    }

    fn resolve_peer(
        &self,
        project_id: &str,
        peer: &Peer,
        outcome: FetchOutcome,
        local: Option<&LocalHistory>,
    ) -> (PeerResolution, FilterCounts) {
        let mut resolution = PeerResolution {
            peer_id: peer.id.clone(),
            display_name: peer.display_name.clone(),
            ..Default::default()
        };
        let mut counts = FilterCounts::default();

        if let Some(error) = outcome.error {
            resolution.fetch_error = Some(error);
            return (resolution, counts);
        }

        let decided: HashMap<String, Decision> = match self.ledger.load(project_id, &peer.id) {
            Ok(entries) => entries
                .into_iter()
                .map(|e| (e.original_contribution_identity, e.decision))
                .collect(),
            Err(e) => {
                warn!(peer = %peer.id, error = %e, "ledger unreadable; peer skipped");
                resolution.ledger_error = Some(e.to_string());
                return (resolution, counts);
            }
        };

        for commit in outcome.commits {
            let id = contribution_id(&commit);
            match decided.get(&id) {
                Some(Decision::Accepted) => counts.accepted += 1,
                Some(Decision::Rejected) => counts.rejected += 1,
                None if local.is_some_and(|history| history.contains(&id)) => {
                    debug!(peer = %peer.id, contribution = %id, "already in local history");
                    counts.local += 1;
                }
                None => resolution.commits.push(PendingCommit {
                    commit,
                    contribution_id: id,
                    peer_id: peer.id.clone(),
                }),
            }
        }

        debug!(
            peer = %peer.id,
            pending = resolution.commits.len(),
            "peer resolved"
        );
        (resolution, counts)
    }
}
