//! Conflict reporting for a preview that stopped mid-apply.
//!
//! A cherry-pick conflict is a state, not a failure. The working copy is left
//! with the conflicted index in place so the user can resolve it by hand and
//! then either continue with the remaining groups or abort the preview.

use serde::{Deserialize, Serialize};

use crate::models::{ApplyConflict, Commit, DisplayGroup};

/// Everything a caller needs to offer manual resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictPayload {
    /// The commit whose cherry-pick stopped.
    pub blocking_commit: Commit,
    /// Paths with unmerged entries in the index.
    pub conflicting_files: Vec<String>,
    /// Groups whose representative is already applied.
    pub groups_already_applied: Vec<DisplayGroup>,
    /// Groups after the blocking one, never attempted.
    pub groups_not_yet_tried: Vec<DisplayGroup>,
}

impl ConflictPayload {
    /// The group whose representative conflicted.
    pub fn blocking_contribution<'a>(&self, groups: &'a [DisplayGroup]) -> Option<&'a DisplayGroup> {
        groups
            .iter()
            .find(|g| g.representative.commit.hash == self.blocking_commit.hash)
    }
}

/// Split `groups` around the conflicting commit.
///
/// `applied_count` is how many groups were applied before the conflict; it is
/// only used when the conflicting commit cannot be matched to a group. The
/// blocking group appears in neither list.
pub fn build_conflict_payload(
    conflict: &ApplyConflict,
    groups: &[DisplayGroup],
    applied_count: usize,
) -> ConflictPayload {
    let blocking = groups
        .iter()
        .position(|g| g.representative.commit.hash == conflict.commit.hash)
        .unwrap_or_else(|| applied_count.min(groups.len()));

    ConflictPayload {
        blocking_commit: conflict.commit.clone(),
        conflicting_files: conflict.conflicting_files.clone(),
        groups_already_applied: groups[..blocking].to_vec(),
        groups_not_yet_tried: groups.get(blocking + 1..).map(<[_]>::to_vec).unwrap_or_default(),
    }
}
