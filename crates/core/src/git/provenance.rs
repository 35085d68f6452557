//! Provenance trailers: how a relayed commit points back at its origin.
//!
//! Two forms are recognised in a commit body:
//!
//! - `(cherry picked from commit <hash>)`, written by `git cherry-pick -x`
//! - `Original-Commit: <hash>`, for relays produced by other tooling
//!
//! A relay of a relay accumulates one trailer per hop, oldest first, so the
//! first valid trailer names the true origin.

use std::sync::OnceLock;

use regex_lite::Regex;

use crate::models::Commit;

/// Trailer key accepted alongside git's own cherry-pick note.
pub const ORIGINAL_COMMIT_TRAILER: &str = "Original-Commit";

fn cherry_pick_note() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\(cherry picked from commit ([0-9a-fA-F]{7,64})\)$")
            .expect("static regex is valid")
    })
}

fn original_commit_trailer() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"^{ORIGINAL_COMMIT_TRAILER}:\s*([0-9a-fA-F]{{7,64}})$"))
            .expect("static regex is valid")
    })
}

/// Extract the origin hash from a commit message body, if any.
pub fn parse_provenance(body: &str) -> Option<String> {
    body.lines().map(str::trim).find_map(|line| {
        cherry_pick_note()
            .captures(line)
            .or_else(|| original_commit_trailer().captures(line))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_ascii_lowercase())
    })
}

/// The hash a commit's provenance trailer points to, or `None` when the
/// commit is itself an origin.
pub fn read_provenance(commit: &Commit) -> Option<String> {
    parse_provenance(&commit.body)
}

/// Resolve the original contribution identity of a commit.
///
/// Pure function of the commit's metadata.
pub fn contribution_id(commit: &Commit) -> String {
    read_provenance(commit).unwrap_or_else(|| commit.hash.clone())
}
