//! JSON-lines ledger files, one per (project, peer).
//!
//! Layout: `<root>/<project_id>/<peer_id>.jsonl`, one JSON object per line.
//! New decisions are appended. Supersession and unreject rewrite the file
//! compacted, through a temp file renamed over the original, so a crash
//! never leaves a half-written ledger.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, instrument, warn};

use super::{check_key, decision_index, fold_entries, plan_record, LedgerStore, RecordPlan};
use crate::errors::LedgerError;
use crate::models::{Decision, LedgerEntry, RecordOutcome};

/// File extension of a ledger.
const LEDGER_EXT: &str = "jsonl";

/// Ledger store backed by JSON-lines files under a root directory.
pub struct FileLedgerStore {
    root: PathBuf,
    /// One writer lock per ledger file.
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FileLedgerStore {
    /// Create a store rooted at `root`. Directories are created lazily.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref().to_path_buf();
        info!(root = %root.display(), "using ledger directory");
        Self {
            root,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the ledger for one (project, peer) pair.
    pub fn ledger_path(&self, project_id: &str, peer_id: &str) -> Result<PathBuf, LedgerError> {
        check_key(project_id)?;
        check_key(peer_id)?;
        Ok(self
            .root
            .join(project_id)
            .join(format!("{peer_id}.{LEDGER_EXT}")))
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Read, parse and fold a ledger. Returns the raw text alongside so an
    /// append can repair a missing trailing newline.
    fn read(&self, path: &Path, peer_id: &str) -> Result<(String, Vec<LedgerEntry>), LedgerError> {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no ledger yet");
                return Ok((String::new(), Vec::new()));
            }
            Err(e) => {
                return Err(LedgerError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        let records = parse_ledger(path, &contents, peer_id)?;
        Ok((contents, fold_entries(records)))
    }

    fn append(&self, path: &Path, existing: &str, entry: &LedgerEntry) -> Result<(), LedgerError> {
        ensure_parent(path)?;
        let mut line = String::new();
        if !existing.is_empty() && !existing.ends_with('\n') {
            line.push('\n');
        }
        line.push_str(&serde_json::to_string(entry)?);
        line.push('\n');

        let io_err = |e| LedgerError::Io {
            path: path.to_path_buf(),
            source: e,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err)?;
        file.write_all(line.as_bytes()).map_err(io_err)?;
        file.sync_data().map_err(io_err)?;
        Ok(())
    }

    fn rewrite(&self, path: &Path, entries: &[LedgerEntry]) -> Result<(), LedgerError> {
        let dir = ensure_parent(path)?;
        let io_err = |e| LedgerError::Io {
            path: path.to_path_buf(),
            source: e,
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        for entry in entries {
            let line = serde_json::to_string(entry)?;
            writeln!(tmp, "{line}").map_err(io_err)?;
        }
        tmp.as_file().sync_data().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        debug!(path = %path.display(), entries = entries.len(), "ledger rewritten");
        Ok(())
    }
}

impl LedgerStore for FileLedgerStore {
    fn load(&self, project_id: &str, peer_id: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        let path = self.ledger_path(project_id, peer_id)?;
        let (_, live) = self.read(&path, peer_id)?;
        Ok(live)
    }

    #[instrument(skip(self, local_hash), fields(project = project_id, peer = peer_id))]
    fn record_decision(
        &self,
        project_id: &str,
        peer_id: &str,
        identity: &str,
        decision: Decision,
        local_hash: Option<&str>,
    ) -> Result<RecordOutcome, LedgerError> {
        let path = self.ledger_path(project_id, peer_id)?;
        let lock = self.lock_for(&path);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let (raw, mut live) = self.read(&path, peer_id)?;
        let (outcome, plan) = plan_record(&live, peer_id, identity, decision, local_hash);
        match plan {
            RecordPlan::Nothing => {}
            RecordPlan::Append(entry) => self.append(&path, &raw, &entry)?,
            RecordPlan::Replace(idx, entry) => {
                live[idx] = entry;
                self.rewrite(&path, &live)?;
            }
        }
        debug!(identity, %decision, ?outcome, "decision recorded");
        Ok(outcome)
    }

    #[instrument(skip(self), fields(project = project_id, peer = peer_id))]
    fn retract(
        &self,
        project_id: &str,
        peer_id: &str,
        identity: &str,
        decision: Decision,
    ) -> Result<bool, LedgerError> {
        let path = self.ledger_path(project_id, peer_id)?;
        let lock = self.lock_for(&path);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let (_, mut live) = self.read(&path, peer_id)?;
        match decision_index(&live, identity, decision) {
            Some(idx) => {
                live.remove(idx);
                self.rewrite(&path, &live)?;
                info!(identity, %decision, "decision retracted");
                Ok(true)
            }
            None => {
                warn!(identity, %decision, "no live decision to retract");
                Ok(false)
            }
        }
    }
}

/// Parse every non-blank line of a ledger into an entry.
fn parse_ledger(path: &Path, contents: &str, peer_id: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
    let corrupt = |line: usize, detail: String| LedgerError::Corrupt {
        path: path.to_path_buf(),
        line,
        detail,
    };

    let mut records = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: LedgerEntry =
            serde_json::from_str(line).map_err(|e| corrupt(idx + 1, e.to_string()))?;
        if entry.original_contribution_identity.trim().is_empty() {
            return Err(corrupt(idx + 1, "empty original_contribution_identity".into()));
        }
        if entry.peer_id != peer_id {
            return Err(corrupt(
                idx + 1,
                format!("entry belongs to peer '{}'", entry.peer_id),
            ));
        }
        records.push(entry);
    }
    Ok(records)
}

fn ensure_parent(path: &Path) -> Result<&Path, LedgerError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| LedgerError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    Ok(dir)
}
