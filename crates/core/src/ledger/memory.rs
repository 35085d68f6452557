//! In-memory ledger store with the same semantics as the file store.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{check_key, decision_index, plan_record, LedgerStore, RecordPlan};
use crate::errors::LedgerError;
use crate::models::{Decision, LedgerEntry, RecordOutcome};

type LedgerKey = (String, String);

/// Ledger store that keeps every (project, peer) ledger in memory.
#[derive(Default)]
pub struct MemoryLedgerStore {
    ledgers: Mutex<HashMap<LedgerKey, Vec<LedgerEntry>>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of live entries across every ledger.
    pub fn total_entries(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<LedgerKey, Vec<LedgerEntry>>> {
        self.ledgers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key(project_id: &str, peer_id: &str) -> Result<LedgerKey, LedgerError> {
        check_key(project_id)?;
        check_key(peer_id)?;
        Ok((project_id.to_string(), peer_id.to_string()))
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn load(&self, project_id: &str, peer_id: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        let key = Self::key(project_id, peer_id)?;
        Ok(self.lock().get(&key).cloned().unwrap_or_default())
    }

    fn record_decision(
        &self,
        project_id: &str,
        peer_id: &str,
        identity: &str,
        decision: Decision,
        local_hash: Option<&str>,
    ) -> Result<RecordOutcome, LedgerError> {
        let key = Self::key(project_id, peer_id)?;
        let mut ledgers = self.lock();
        let live = ledgers.entry(key).or_default();
        let (outcome, plan) = plan_record(live, peer_id, identity, decision, local_hash);
        match plan {
            RecordPlan::Nothing => {}
            RecordPlan::Append(entry) => live.push(entry),
            RecordPlan::Replace(idx, entry) => live[idx] = entry,
        }
        Ok(outcome)
    }

    fn retract(
        &self,
        project_id: &str,
        peer_id: &str,
        identity: &str,
        decision: Decision,
    ) -> Result<bool, LedgerError> {
        let key = Self::key(project_id, peer_id)?;
        let mut ledgers = self.lock();
        let Some(live) = ledgers.get_mut(&key) else {
            return Ok(false);
        };
        match decision_index(live, identity, decision) {
            Some(idx) => {
                live.remove(idx);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_unreject() {
        let store = MemoryLedgerStore::new();
        assert_eq!(
            store
                .record_decision("vault", "bob", "a1b2c3d", Decision::Rejected, None)
                .unwrap(),
            RecordOutcome::Created
        );
        assert_eq!(
            store
                .record_decision("vault", "bob", "a1b2c3d", Decision::Rejected, None)
                .unwrap(),
            RecordOutcome::Unchanged
        );
        assert_eq!(store.total_entries(), 1);

        assert!(store.unreject("vault", "bob", "a1b2c3d").unwrap());
        assert_eq!(store.total_entries(), 0);
    }

    #[test]
    fn test_retract_only_matching_decision() {
        let store = MemoryLedgerStore::new();
        store
            .record_decision("vault", "bob", "a1b2c3d", Decision::Accepted, Some("feed123"))
            .unwrap();

        assert!(!store.unreject("vault", "bob", "a1b2c3d").unwrap());
        assert_eq!(store.total_entries(), 1);
        assert!(store
            .retract("vault", "bob", "a1b2c3d", Decision::Accepted)
            .unwrap());
        assert_eq!(store.total_entries(), 0);
        assert!(!store
            .retract("vault", "charlie", "a1b2c3d", Decision::Accepted)
            .unwrap());
    }

    #[test]
    fn test_peers_are_independent() {
        let store = MemoryLedgerStore::new();
        store
            .record_decision("vault", "bob", "a1b2c3d", Decision::Accepted, None)
            .unwrap();
        assert!(store.load("vault", "charlie").unwrap().is_empty());
        assert!(store.load("other", "bob").unwrap().is_empty());
    }
}
