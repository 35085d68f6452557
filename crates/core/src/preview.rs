//! Preview workflow: stage selected groups on the working copy, then accept
//! them into history or fully revert.
//!
//! The [`PreviewController`] owns an explicit registry of sessions keyed by
//! project id. At most one session exists per project; a second `start`
//! fails with [`PreviewError::AlreadyActive`] before anything is touched.
//!
//! Lifecycle of a session:
//!
//! 1. `start` records `HEAD`, stashes uncommitted work and cherry-picks each
//!    group's representative, oldest first. A conflict parks the session in
//!    `Conflicted` with the partial apply left in place.
//! 2. `resume` continues a conflicted session after manual resolution.
//! 3. `accept` records the applied groups in every offering peer's ledger and
//!    disposes of the stash per [`AcceptStashPolicy`].
//! 4. `reject` and `cancel` reset to the recorded head and restore the stash;
//!    only `reject` writes to the ledger. Once the working copy is recovered
//!    the session is `Reverted`: a ledger failure after that point leaves it
//!    registered for reject or cancel to retry, and accept is refused.
//!
//! Entries written by an accept that failed part way are remembered and
//! taken back if the session is then reverted, so the ledger never claims a
//! contribution that is not in the working copy.
//!
//! Every mutating step for a session runs while holding that session's mutex.
//! When a step fails after the stash was taken, the working copy is recovered
//! before the error is returned. If recovery itself fails the session stays
//! registered in `RecoveryFailed` with its stash token, and the caller gets
//! [`PreviewError::RestoreFailed`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::AcceptStashPolicy;
use crate::conflict::{build_conflict_payload, ConflictPayload};
use crate::errors::PreviewError;
use crate::git::CommitSource;
use crate::ledger::LedgerStore;
use crate::models::{
    short_hash, AppliedCommit, Commit, Decision, DisplayGroup, RecordOutcome, StashToken,
};
use crate::project::Project;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Phase of a live session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PreviewPhase {
    /// Every selected group is applied; awaiting accept, reject or cancel.
    Previewing,
    /// A cherry-pick stopped on conflicts; awaiting resume, reject or cancel.
    Conflicted,
    /// Recovery of the working copy failed; only reject or cancel (which
    /// retry recovery) are allowed.
    RecoveryFailed,
    /// The working copy is recovered but the ledger update did not finish;
    /// only reject or cancel are allowed.
    Reverted,
}

impl std::fmt::Display for PreviewPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Previewing => write!(f, "previewing"),
            Self::Conflicted => write!(f, "conflicted"),
            Self::RecoveryFailed => write!(f, "recovery_failed"),
            Self::Reverted => write!(f, "reverted"),
        }
    }
}

/// State reported back to the caller after each controller action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PreviewState {
    Previewing,
    Conflicted,
    Accepted,
    Rejected,
    Cancelled,
}

impl std::fmt::Display for PreviewState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Previewing => write!(f, "previewing"),
            Self::Conflicted => write!(f, "conflicted"),
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected => write!(f, "rejected"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of a controller action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewOutcome {
    pub state: PreviewState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictPayload>,
    /// Stash entry left for the user after accept (policy `keep`, or a
    /// restore that did not apply cleanly).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retained_stash: Option<StashToken>,
}

impl PreviewOutcome {
    fn new(state: PreviewState) -> Self {
        Self {
            state,
            conflict: None,
            retained_stash: None,
        }
    }
}

/// Read-only view of a live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewSnapshot {
    pub session_id: String,
    pub project_id: String,
    pub phase: PreviewPhase,
    pub stash_token: Option<StashToken>,
    pub started_against_head: String,
    pub started_at: DateTime<Utc>,
    pub groups: Vec<DisplayGroup>,
    pub applied: Vec<AppliedCommit>,
    pub conflict: Option<ConflictPayload>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A ledger change made by an accept that did not complete.
#[derive(Debug, Clone)]
struct AcceptedWrite {
    peer_id: String,
    identity: String,
    outcome: RecordOutcome,
}

/// One preview on one project. `applied[i]` is the local copy of
/// `groups[i]`.
struct PreviewSession {
    id: Uuid,
    project_id: String,
    source: Arc<dyn CommitSource>,
    phase: PreviewPhase,
    stash_token: Option<StashToken>,
    started_against_head: String,
    started_at: DateTime<Utc>,
    groups: Vec<DisplayGroup>,
    applied: Vec<AppliedCommit>,
    conflict: Option<ConflictPayload>,
    accepted_writes: Vec<AcceptedWrite>,
    /// Set once the session leaves the registry; waiters that locked it
    /// afterwards must treat it as gone.
    closed: bool,
}

impl PreviewSession {
    fn snapshot(&self) -> PreviewSnapshot {
        PreviewSnapshot {
            session_id: self.id.to_string(),
            project_id: self.project_id.clone(),
            phase: self.phase,
            stash_token: self.stash_token.clone(),
            started_against_head: self.started_against_head.clone(),
            started_at: self.started_at,
            groups: self.groups.clone(),
            applied: self.applied.clone(),
            conflict: self.conflict.clone(),
        }
    }

    fn require(&self, action: &str, phase: PreviewPhase) -> Result<(), PreviewError> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(PreviewError::InvalidState {
                action: action.to_string(),
                phase: self.phase.to_string(),
            })
        }
    }
}

type SessionHandle = Arc<Mutex<PreviewSession>>;

struct RegistryEntry {
    session_id: Uuid,
    handle: SessionHandle,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Owns every live preview session.
pub struct PreviewController {
    ledger: Arc<dyn LedgerStore>,
    stash_policy: AcceptStashPolicy,
    sessions: StdMutex<HashMap<String, RegistryEntry>>,
}

impl PreviewController {
    pub fn new(ledger: Arc<dyn LedgerStore>, stash_policy: AcceptStashPolicy) -> Self {
        Self {
            ledger,
            stash_policy,
            sessions: StdMutex::new(HashMap::new()),
        }
    }

    pub fn stash_policy(&self) -> AcceptStashPolicy {
        self.stash_policy
    }

    /// Whether a session is registered for this project.
    pub fn is_active(&self, project_id: &str) -> bool {
        self.registry().contains_key(project_id)
    }

    /// Snapshot of the project's live session, if any. Waits for an
    /// in-flight action on that session to finish.
    pub async fn status(&self, project_id: &str) -> Option<PreviewSnapshot> {
        self.lock_session(project_id).await.ok().map(|s| s.snapshot())
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    /// Start a preview of `groups`, applied in the order given.
    #[instrument(skip(self, project, groups), fields(project = %project.id, groups = groups.len()))]
    pub async fn start(
        &self,
        project: &Project,
        groups: Vec<DisplayGroup>,
    ) -> Result<PreviewOutcome, PreviewError> {
        if groups.is_empty() {
            return Err(PreviewError::NothingSelected);
        }

        let id = Uuid::new_v4();
        let handle: SessionHandle = Arc::new(Mutex::new(PreviewSession {
            id,
            project_id: project.id.clone(),
            source: Arc::clone(&project.source),
            phase: PreviewPhase::Previewing,
            stash_token: None,
            started_against_head: String::new(),
            started_at: Utc::now(),
            groups,
            applied: Vec::new(),
            conflict: None,
            accepted_writes: Vec::new(),
            closed: false,
        }));
        // Uncontended: nobody else can see the handle yet.
        let mut session = Arc::clone(&handle).lock_owned().await;
        let reservation = self.reserve(&project.id, id, &handle)?;
        info!(session = %id, "starting preview");

        session.started_against_head = project.source.head_hash().await?;
        session.stash_token = project
            .source
            .stash(&format!("peerpick preview {id}"))
            .await?;

        let result = self.apply_remaining(&mut session).await;
        if result.is_ok() || session.phase == PreviewPhase::RecoveryFailed {
            reservation.keep();
        }
        result
    }

    /// Continue a conflicted preview once the user has resolved and staged
    /// the conflicting files.
    #[instrument(skip(self))]
    pub async fn resume(&self, project_id: &str) -> Result<PreviewOutcome, PreviewError> {
        let mut session = self.lock_session(project_id).await?;
        session.require("resume", PreviewPhase::Conflicted)?;

        let Some(blocking) = session
            .groups
            .get(session.applied.len())
            .map(|g| g.commit().clone())
        else {
            return Err(PreviewError::InvalidState {
                action: "resume".into(),
                phase: session.phase.to_string(),
            });
        };

        let source = Arc::clone(&session.source);
        let outcome = match source.continue_apply(&blocking).await {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.abort(&mut session, e.into()).await),
        };

        if let Some(still) = outcome.conflicted {
            info!(files = still.conflicting_files.len(), "conflicts remain");
            let payload = build_conflict_payload(&still, &session.groups, session.applied.len());
            session.conflict = Some(payload.clone());
            return Ok(PreviewOutcome {
                conflict: Some(payload),
                ..PreviewOutcome::new(PreviewState::Conflicted)
            });
        }

        session.applied.extend(outcome.applied);
        self.apply_remaining(&mut session).await
    }

    /// Keep the applied groups and record them as accepted for every peer
    /// that offered them.
    #[instrument(skip(self))]
    pub async fn accept(&self, project_id: &str) -> Result<PreviewOutcome, PreviewError> {
        let mut session = self.lock_session(project_id).await?;
        session.require("accept", PreviewPhase::Previewing)?;

        // A ledger failure leaves the session in `Previewing`. Recording is
        // idempotent, so accept can be retried; what was written is kept in
        // `accepted_writes` for a later reject or cancel to take back.
        let state = &mut *session;
        let mut recorded = 0usize;
        for (group, applied) in state.groups.iter().zip(&state.applied) {
            for peer_id in &group.offered_by {
                let outcome = self.ledger.record_decision(
                    &state.project_id,
                    peer_id,
                    &group.contribution_id,
                    Decision::Accepted,
                    Some(&applied.local_hash),
                )?;
                if outcome != RecordOutcome::Unchanged {
                    state.accepted_writes.push(AcceptedWrite {
                        peer_id: peer_id.clone(),
                        identity: group.contribution_id.clone(),
                        outcome,
                    });
                }
                recorded += 1;
            }
        }
        info!(entries = recorded, "accepted preview recorded");

        let retained = self.dispose_stash(&mut session).await;
        self.close(&mut session);
        let retained_stash = retained?;
        if let Some(ref token) = retained_stash {
            warn!(stash = %token, "uncommitted work kept in stash");
        }

        Ok(PreviewOutcome {
            retained_stash,
            ..PreviewOutcome::new(PreviewState::Accepted)
        })
    }

    /// Revert the working copy and record every selected group as rejected
    /// for every offering peer.
    #[instrument(skip(self))]
    pub async fn reject(&self, project_id: &str) -> Result<PreviewOutcome, PreviewError> {
        self.revert(project_id, Some(Decision::Rejected)).await
    }

    /// Revert the working copy without recording anything.
    #[instrument(skip(self))]
    pub async fn cancel(&self, project_id: &str) -> Result<PreviewOutcome, PreviewError> {
        self.revert(project_id, None).await
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn revert(
        &self,
        project_id: &str,
        record: Option<Decision>,
    ) -> Result<PreviewOutcome, PreviewError> {
        let mut session = self.lock_session(project_id).await?;
        let action = if record.is_some() { "reject" } else { "cancel" };

        if session.phase != PreviewPhase::Reverted {
            if let Err(recovery) = recover(&mut session).await {
                return Err(recovery_failed(
                    &mut session,
                    format!("{action} requested"),
                    recovery,
                ));
            }
            session.phase = PreviewPhase::Reverted;
        }

        self.retract_accepted(&mut session)?;
        if let Some(decision) = record {
            let mut recorded = 0usize;
            for group in &session.groups {
                recorded += self.record_group(&session.project_id, group, decision, None)?;
            }
            info!(entries = recorded, "rejected preview recorded");
        }

        self.close(&mut session);
        Ok(PreviewOutcome::new(if record.is_some() {
            PreviewState::Rejected
        } else {
            PreviewState::Cancelled
        }))
    }

    /// Apply every group not yet applied, updating the session's phase.
    async fn apply_remaining(
        &self,
        session: &mut PreviewSession,
    ) -> Result<PreviewOutcome, PreviewError> {
        let commits: Vec<Commit> = session.groups[session.applied.len()..]
            .iter()
            .map(|g| g.commit().clone())
            .collect();

        let source = Arc::clone(&session.source);
        let outcome = match source.apply_commits(&commits).await {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.abort(session, e.into()).await),
        };
        session.applied.extend(outcome.applied);

        match outcome.conflicted {
            Some(conflict) => {
                let payload = build_conflict_payload(&conflict, &session.groups, session.applied.len());
                info!(
                    hash = %conflict.commit.short_hash(),
                    files = conflict.conflicting_files.len(),
                    "preview conflicted"
                );
                session.phase = PreviewPhase::Conflicted;
                session.conflict = Some(payload.clone());
                Ok(PreviewOutcome {
                    conflict: Some(payload),
                    ..PreviewOutcome::new(PreviewState::Conflicted)
                })
            }
            None => {
                info!(applied = session.applied.len(), "preview ready");
                session.phase = PreviewPhase::Previewing;
                session.conflict = None;
                Ok(PreviewOutcome::new(PreviewState::Previewing))
            }
        }
    }

    /// Recover after a failed step and close the session. Returns the error
    /// to surface.
    async fn abort(&self, session: &mut PreviewSession, cause: PreviewError) -> PreviewError {
        warn!(error = %cause, "preview step failed; recovering working copy");
        match recover(session).await {
            Ok(()) => {
                self.close(session);
                cause
            }
            Err(recovery) => recovery_failed(session, cause.to_string(), recovery),
        }
    }

    /// What accept does with the pre-preview stash. Returns the stash left
    /// for the user, if any.
    async fn dispose_stash(
        &self,
        session: &mut PreviewSession,
    ) -> Result<Option<StashToken>, PreviewError> {
        let Some(token) = session.stash_token.take() else {
            return Ok(None);
        };
        let source = Arc::clone(&session.source);

        match self.stash_policy {
            AcceptStashPolicy::Keep => Ok(Some(token)),
            AcceptStashPolicy::Discard => match source.drop_stash(&token).await {
                Ok(()) => Ok(None),
                Err(e) => {
                    warn!(stash = %token, error = %e, "could not drop stash");
                    Ok(Some(token))
                }
            },
            AcceptStashPolicy::Restore => match source.restore(&token).await {
                Ok(()) => Ok(None),
                Err(e) => {
                    // The tree was clean before the pop, so resetting to HEAD
                    // only undoes the partial restore. The entry stays.
                    warn!(stash = %token, error = %e, "stash did not re-apply cleanly");
                    match source.reset_to("HEAD").await {
                        Ok(()) => Ok(Some(token)),
                        Err(reset) => Err(PreviewError::RestoreFailed {
                            cause: format!("re-applying stash after accept failed: {e}"),
                            recovery: format!("cleaning the working copy failed: {reset}"),
                            stash_token: Some(token.0),
                        }),
                    }
                }
            },
        }
    }

    /// Undo the entries of an accept that failed part way, newest first.
    fn retract_accepted(&self, session: &mut PreviewSession) -> Result<(), PreviewError> {
        while let Some(write) = session.accepted_writes.last() {
            match write.outcome {
                // The acceptance replaced a live rejection; put it back.
                RecordOutcome::Superseded => {
                    self.ledger.record_decision(
                        &session.project_id,
                        &write.peer_id,
                        &write.identity,
                        Decision::Rejected,
                        None,
                    )?;
                }
                RecordOutcome::Created | RecordOutcome::Unchanged => {
                    self.ledger.retract(
                        &session.project_id,
                        &write.peer_id,
                        &write.identity,
                        Decision::Accepted,
                    )?;
                }
            }
            info!(
                peer = %write.peer_id,
                contribution = %short_hash(&write.identity),
                "partial acceptance taken back"
            );
            session.accepted_writes.pop();
        }
        Ok(())
    }

    /// Record `decision` for one group against each peer offering it.
    fn record_group(
        &self,
        project_id: &str,
        group: &DisplayGroup,
        decision: Decision,
        local_hash: Option<&str>,
    ) -> Result<usize, PreviewError> {
        for peer_id in &group.offered_by {
            self.ledger.record_decision(
                project_id,
                peer_id,
                &group.contribution_id,
                decision,
                local_hash,
            )?;
        }
        Ok(group.offered_by.len())
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, RegistryEntry>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reserve(
        &self,
        project_id: &str,
        session_id: Uuid,
        handle: &SessionHandle,
    ) -> Result<Reservation<'_>, PreviewError> {
        let mut registry = self.registry();
        if let Some(existing) = registry.get(project_id) {
            return Err(PreviewError::AlreadyActive {
                project_id: project_id.to_string(),
                session_id: existing.session_id.to_string(),
            });
        }
        registry.insert(
            project_id.to_string(),
            RegistryEntry {
                session_id,
                handle: Arc::clone(handle),
            },
        );
        Ok(Reservation {
            controller: self,
            project_id: project_id.to_string(),
            session_id,
            kept: false,
        })
    }

    fn release(&self, project_id: &str, session_id: Uuid) {
        let mut registry = self.registry();
        if registry.get(project_id).map(|e| e.session_id) == Some(session_id) {
            registry.remove(project_id);
        }
    }

    fn close(&self, session: &mut PreviewSession) {
        session.closed = true;
        self.release(&session.project_id, session.id);
        info!(session = %session.id, "preview session closed");
    }

    async fn lock_session(
        &self,
        project_id: &str,
    ) -> Result<OwnedMutexGuard<PreviewSession>, PreviewError> {
        let handle = self
            .registry()
            .get(project_id)
            .map(|e| Arc::clone(&e.handle))
            .ok_or_else(|| PreviewError::NotActive(project_id.to_string()))?;
        let session = handle.lock_owned().await;
        if session.closed {
            return Err(PreviewError::NotActive(project_id.to_string()));
        }
        Ok(session)
    }
}

/// Reset to the starting head, then restore the stash. The token is cleared
/// only once the restore succeeded.
async fn recover(session: &mut PreviewSession) -> Result<(), String> {
    let source = Arc::clone(&session.source);
    if let Err(e) = source.reset_to(&session.started_against_head).await {
        return Err(format!(
            "reset to {} failed: {e}",
            short_hash(&session.started_against_head)
        ));
    }
    if let Some(token) = session.stash_token.clone() {
        if let Err(e) = source.restore(&token).await {
            return Err(format!("restoring stash {token} failed: {e}"));
        }
        session.stash_token = None;
    }
    info!(head = %short_hash(&session.started_against_head), "working copy recovered");
    Ok(())
}

fn recovery_failed(session: &mut PreviewSession, cause: String, recovery: String) -> PreviewError {
    session.phase = PreviewPhase::RecoveryFailed;
    error!(
        session = %session.id,
        cause = %cause,
        recovery = %recovery,
        "working copy recovery failed; manual inspection required"
    );
    PreviewError::RestoreFailed {
        cause,
        recovery,
        stash_token: session.stash_token.as_ref().map(|t| t.0.clone()),
    }
}

// ---------------------------------------------------------------------------
// Registry slot RAII guard
// ---------------------------------------------------------------------------

/// Releases a freshly reserved registry slot on drop unless kept, so a
/// `start` that fails early never blocks the next one.
struct Reservation<'a> {
    controller: &'a PreviewController,
    project_id: String,
    session_id: Uuid,
    kept: bool,
}

impl Reservation<'_> {
    fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.kept {
            self.controller.release(&self.project_id, self.session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(PreviewPhase::Previewing.to_string(), "previewing");
        assert_eq!(PreviewPhase::RecoveryFailed.to_string(), "recovery_failed");
        assert_eq!(PreviewPhase::Reverted.to_string(), "reverted");
        assert_eq!(PreviewState::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_outcome_serialization_shape() {
        let outcome = PreviewOutcome::new(PreviewState::Rejected);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["state"], "rejected");
        assert!(json.get("conflict").is_none());
        assert!(json.get("retained_stash").is_none());
    }
}
