//! Collaboration memory: the durable accept/reject ledger per project and peer.
//!
//! The ledger answers one question for the resolver: has this original
//! contribution already been decided for this peer? Each (project, peer)
//! pair owns an independent ledger, so damage to one never affects another.
//!
//! Store handles are passed explicitly into the resolver and the preview
//! controller; there is no ambient ledger state.

pub mod file;
pub mod memory;

use std::collections::HashMap;

use crate::errors::LedgerError;
use crate::models::{Decision, LedgerEntry, RecordOutcome};

pub use file::FileLedgerStore;
pub use memory::MemoryLedgerStore;

/// Durable per-peer decision history.
///
/// Implementations must be safe to share across tasks. Writers to the same
/// (project, peer) ledger are serialised; different peers are independent.
pub trait LedgerStore: Send + Sync {
    /// Live entries for one peer. A missing or empty ledger yields an empty
    /// list; a structurally invalid one yields [`LedgerError::Corrupt`].
    fn load(&self, project_id: &str, peer_id: &str) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Record a decision. Recording the live decision again is a no-op;
    /// recording the opposite decision supersedes it.
    fn record_decision(
        &self,
        project_id: &str,
        peer_id: &str,
        identity: &str,
        decision: Decision,
        local_hash: Option<&str>,
    ) -> Result<RecordOutcome, LedgerError>;

    /// Remove the live entry for `identity` if it carries `decision`.
    /// Returns `false` when no such entry was live.
    fn retract(
        &self,
        project_id: &str,
        peer_id: &str,
        identity: &str,
        decision: Decision,
    ) -> Result<bool, LedgerError>;

    /// Remove a live rejection so the contribution can be offered again.
    /// Returns `false` when no rejection was live.
    fn unreject(&self, project_id: &str, peer_id: &str, identity: &str) -> Result<bool, LedgerError> {
        self.retract(project_id, peer_id, identity, Decision::Rejected)
    }

    /// The live entry for one contribution, if any.
    fn lookup(
        &self,
        project_id: &str,
        peer_id: &str,
        identity: &str,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        Ok(self
            .load(project_id, peer_id)?
            .into_iter()
            .find(|e| e.original_contribution_identity == identity))
    }

    /// Live rejections, for history and undo views.
    fn list_rejected(&self, project_id: &str, peer_id: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self
            .load(project_id, peer_id)?
            .into_iter()
            .filter(|e| e.decision == Decision::Rejected)
            .collect())
    }
}

/// Whether `key` can name a ledger directory or file.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key != "."
        && key != ".."
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

pub(crate) fn check_key(key: &str) -> Result<(), LedgerError> {
    if is_valid_key(key) {
        Ok(())
    } else {
        Err(LedgerError::InvalidKey(key.to_string()))
    }
}

/// Collapse raw records into one live entry per contribution.
///
/// Later records supersede earlier ones, which keeps concatenated or
/// hand-merged ledgers meaningful. Each identity keeps the position of its
/// first appearance.
pub fn fold_entries<I>(records: I) -> Vec<LedgerEntry>
where
    I: IntoIterator<Item = LedgerEntry>,
{
    let mut live: Vec<LedgerEntry> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for record in records {
        match positions.get(&record.original_contribution_identity) {
            Some(&idx) => live[idx] = record,
            None => {
                positions.insert(record.original_contribution_identity.clone(), live.len());
                live.push(record);
            }
        }
    }
    live
}

/// The change `record_decision` must make to a set of live entries.
#[derive(Debug)]
pub(crate) enum RecordPlan {
    Nothing,
    Append(LedgerEntry),
    Replace(usize, LedgerEntry),
}

pub(crate) fn plan_record(
    live: &[LedgerEntry],
    peer_id: &str,
    identity: &str,
    decision: Decision,
    local_hash: Option<&str>,
) -> (RecordOutcome, RecordPlan) {
    match live
        .iter()
        .position(|e| e.original_contribution_identity == identity)
    {
        Some(idx) if live[idx].decision == decision => (RecordOutcome::Unchanged, RecordPlan::Nothing),
        Some(idx) => {
            let mut entry = LedgerEntry::new(identity, peer_id, decision, local_hash);
            entry.extra = live[idx].extra.clone();
            (RecordOutcome::Superseded, RecordPlan::Replace(idx, entry))
        }
        None => (
            RecordOutcome::Created,
            RecordPlan::Append(LedgerEntry::new(identity, peer_id, decision, local_hash)),
        ),
    }
}

/// Position of the live entry for `identity` when it carries `decision`.
pub(crate) fn decision_index(
    live: &[LedgerEntry],
    identity: &str,
    decision: Decision,
) -> Option<usize> {
    live.iter()
        .position(|e| e.original_contribution_identity == identity && e.decision == decision)
}
