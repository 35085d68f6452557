//! Deduplication of relayed contributions into display groups.
//!
//! The same original contribution can reach us from several peers: once
//! from its author and again from anyone who cherry-picked it. Each
//! contribution becomes exactly one [`DisplayGroup`], so it is shown once and
//! applied once.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::{DisplayGroup, PeerResolution, PendingCommit};

/// Collapse every pending commit into one group per contribution id.
///
/// Groups come back oldest first by their earliest member's timestamp, so a
/// contribution never sorts after a relay's later commits that build on it.
/// Ties fall back to the earliest position any member held in its peer's
/// list, then to the contribution id.
pub fn group_pending(resolutions: &[PeerResolution]) -> Vec<DisplayGroup> {
    struct Bucket {
        members: Vec<PendingCommit>,
        first_position: usize,
    }

    let mut buckets: HashMap<&str, Bucket> = HashMap::new();
    for resolution in resolutions {
        for (position, pending) in resolution.commits.iter().enumerate() {
            let bucket = buckets
                .entry(pending.contribution_id.as_str())
                .or_insert_with(|| Bucket {
                    members: Vec::new(),
                    first_position: position,
                });
            bucket.first_position = bucket.first_position.min(position);
            bucket.members.push(pending.clone());
        }
    }

    let mut keyed: Vec<(Option<DateTime<Utc>>, usize, DisplayGroup)> = buckets
        .into_iter()
        .map(|(id, bucket)| {
            let earliest = bucket
                .members
                .iter()
                .map(|m| m.commit.timestamp)
                .min();
            let representative = pick_representative(&bucket.members).clone();
            let mut offered_by: Vec<String> =
                bucket.members.iter().map(|m| m.peer_id.clone()).collect();
            offered_by.sort();
            offered_by.dedup();
            (
                earliest,
                bucket.first_position,
                DisplayGroup {
                    contribution_id: id.to_string(),
                    representative,
                    offered_by,
                    members: bucket.members,
                },
            )
        })
        .collect();

    keyed.sort_by(|(time_a, pos_a, a), (time_b, pos_b, b)| {
        time_a
            .cmp(time_b)
            .then(pos_a.cmp(pos_b))
            .then_with(|| a.contribution_id.cmp(&b.contribution_id))
    });
    keyed.into_iter().map(|(_, _, group)| group).collect()
}

/// The true origin when some member is it, otherwise the copy from the
/// lexicographically smallest peer id.
fn pick_representative(members: &[PendingCommit]) -> &PendingCommit {
    members
        .iter()
        .filter(|m| m.is_origin())
        .min_by(|a, b| a.peer_id.cmp(&b.peer_id))
        .or_else(|| members.iter().min_by(|a, b| a.peer_id.cmp(&b.peer_id)))
        .unwrap_or(&members[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Commit;
    use chrono::{TimeZone, Utc};

    fn pending(peer: &str, hash: &str, contribution: &str, minute: u32) -> PendingCommit {
        PendingCommit {
            commit: Commit {
                hash: hash.into(),
                author_name: "Alice".into(),
                author_email: "alice@example.com".into(),
                subject: format!("edit {contribution}"),
                body: String::new(),
                timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 9, minute, 0).unwrap(),
                file_changes: Vec::new(),
            },
            contribution_id: contribution.into(),
            peer_id: peer.into(),
        }
    }

    fn resolution(peer: &str, commits: Vec<PendingCommit>) -> PeerResolution {
        PeerResolution {
            peer_id: peer.into(),
            display_name: peer.into(),
            commits,
            ..Default::default()
        }
    }

    #[test]
    fn test_relay_collapses_into_origin_group() {
        // Bob relays Alice's a1; Charlie relays Bob's relay of it.
        let resolutions = vec![
            resolution("bob", vec![pending("bob", "b0b0b0b1", "a1a1a1a1", 5)]),
            resolution("charlie", vec![pending("charlie", "c4c4c4c1", "a1a1a1a1", 7)]),
        ];
        let groups = group_pending(&resolutions);

        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.contribution_id, "a1a1a1a1");
        assert_eq!(group.offered_by, vec!["bob", "charlie"]);
        assert_eq!(group.representative.peer_id, "bob");
        assert_eq!(group.also_offered_by(), vec!["charlie"]);
        assert_eq!(group.members.len(), 2);
    }

    #[test]
    fn test_origin_wins_representative() {
        let resolutions = vec![
            resolution("alice", vec![pending("alice", "a1a1a1a1", "a1a1a1a1", 1)]),
            resolution("bob", vec![pending("bob", "b0b0b0b1", "a1a1a1a1", 5)]),
        ];
        let groups = group_pending(&resolutions);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].representative.peer_id, "alice");
        assert!(groups[0].representative.is_origin());
    }

    #[test]
    fn test_groups_sorted_oldest_first() {
        let resolutions = vec![
            resolution(
                "bob",
                vec![
                    pending("bob", "2222222", "2222222", 20),
                    pending("bob", "1111111", "1111111", 10),
                ],
            ),
            resolution("charlie", vec![pending("charlie", "3333333", "3333333", 15)]),
        ];
        let ids: Vec<String> = group_pending(&resolutions)
            .into_iter()
            .map(|g| g.contribution_id)
            .collect();
        assert_eq!(ids, vec!["1111111", "3333333", "2222222"]);
    }

    #[test]
    fn test_group_sorts_by_earliest_member() {
        // charlie's relay of a1 (t=3) is the parent of charlie's c2 (t=5);
        // bob's later relay of a1 (t=10) is the representative.
        let resolutions = vec![
            resolution("bob", vec![pending("bob", "b0b0b0b1", "a1a1a1a1", 10)]),
            resolution(
                "charlie",
                vec![
                    pending("charlie", "c4c4c4c1", "a1a1a1a1", 3),
                    pending("charlie", "c4c4c4c2", "c4c4c4c2", 5),
                ],
            ),
        ];
        let groups = group_pending(&resolutions);

        assert_eq!(groups[0].contribution_id, "a1a1a1a1");
        assert_eq!(groups[0].representative.peer_id, "bob");
        assert_eq!(groups[1].contribution_id, "c4c4c4c2");
    }

    #[test]
    fn test_timestamp_ties_use_position_then_id() {
        let resolutions = vec![resolution(
            "bob",
            vec![
                pending("bob", "ffff001", "ffff001", 0),
                pending("bob", "aaaa002", "aaaa002", 0),
            ],
        )];
        let ids: Vec<String> = group_pending(&resolutions)
            .into_iter()
            .map(|g| g.contribution_id)
            .collect();
        assert_eq!(ids, vec!["ffff001", "aaaa002"]);
    }

    #[test]
    fn test_every_pending_commit_in_exactly_one_group() {
        let resolutions = vec![
            resolution(
                "bob",
                vec![
                    pending("bob", "1111111", "1111111", 1),
                    pending("bob", "2222222", "9999999", 2),
                ],
            ),
            resolution("charlie", vec![pending("charlie", "3333333", "9999999", 3)]),
            resolution("dave", Vec::new()),
        ];
        let groups = group_pending(&resolutions);
        let total: usize = groups.iter().map(|g| g.members.len()).sum();
        assert_eq!(total, 3);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_empty_input() {
        assert!(group_pending(&[]).is_empty());
    }
}
