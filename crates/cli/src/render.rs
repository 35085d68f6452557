//! Table rendering for resolve results, display groups and ledger history.

use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressStyle};

use peerpick_core::models::{DisplayGroup, LedgerEntry, PeerResolution};
use peerpick_core::ConflictPayload;

use crate::style;

fn table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Spinner shown while peers are fetched.
pub fn spinner(msg: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::with_template("{spinner:.blue} {msg}") {
        spinner.set_style(
            template.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
    }
    spinner.set_message(msg.to_string());
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    spinner
}

/// Per-peer fetch status. Failures are shown in red but never hide other
/// peers.
pub fn peers(resolutions: &[PeerResolution]) -> Table {
    let mut table = table();
    table.set_header(vec!["Peer", "Status", "Pending"]);

    for peer in resolutions {
        let (status, color) = match (&peer.fetch_error, &peer.ledger_error) {
            (Some(e), _) => (format!("fetch failed: {e}"), Color::Red),
            (None, Some(e)) => (format!("ledger unreadable: {e}"), Color::Red),
            (None, None) if peer.commits.is_empty() => ("up to date".to_string(), Color::Reset),
            (None, None) => ("updates".to_string(), Color::Green),
        };
        table.add_row(vec![
            Cell::new(&peer.display_name),
            Cell::new(status).fg(color),
            Cell::new(peer.commits.len()),
        ]);
    }
    table
}

/// One line per contribution, oldest first.
pub fn groups(groups: &[DisplayGroup]) -> Table {
    let mut table = table();
    table.set_header(vec!["#", "Commit", "Subject", "Author", "Date", "Offered by"]);

    for (idx, group) in groups.iter().enumerate() {
        let commit = group.commit();
        table.add_row(vec![
            Cell::new(idx + 1),
            Cell::new(style::hash(&group.contribution_id)),
            Cell::new(&commit.subject),
            Cell::new(&commit.author_name),
            Cell::new(commit.timestamp.format("%Y-%m-%d %H:%M").to_string()),
            Cell::new(group.offered_by.join(", ")),
        ]);
    }
    table
}

/// Label used in selection prompts.
pub fn group_label(group: &DisplayGroup) -> String {
    let commit = group.commit();
    let also = group.also_offered_by();
    let relays = if also.is_empty() {
        String::new()
    } else {
        format!(" (also from {})", also.join(", "))
    };
    format!(
        "{} {} by {} via {}{}",
        peerpick_core::models::short_hash(&group.contribution_id),
        commit.subject,
        commit.author_name,
        group.representative.peer_id,
        relays
    )
}

/// Conflict details: which commit stopped and which files need attention.
pub fn conflict(payload: &ConflictPayload) -> Table {
    let mut table = table();
    table.set_header(vec!["Conflicting file"]);
    for file in &payload.conflicting_files {
        table.add_row(vec![Cell::new(file).fg(Color::Red)]);
    }
    table
}

/// Live ledger entries.
pub fn ledger(peer_id: &str, entries: &[LedgerEntry]) -> Table {
    let mut table = table();
    table.set_header(vec!["Peer", "Contribution", "Decision", "Decided at"]);
    for entry in entries {
        table.add_row(vec![
            Cell::new(peer_id),
            Cell::new(&entry.original_contribution_identity),
            Cell::new(entry.decision),
            Cell::new(entry.decided_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }
    table
}
