//! Interactive review: pick contributions, preview them, then decide.
//!
//! The preview registry lives in this process, so the whole flow from
//! `start` to accept / reject / decide-later runs inside one invocation.

use std::sync::Arc;

use anyhow::{Context, Result};
use dialoguer::{MultiSelect, Select};

use peerpick_core::errors::PreviewError;
use peerpick_core::models::DisplayGroup;
use peerpick_core::{
    group_pending, LedgerStore, PeerpickConfig, PendingResolver, PreviewController,
    PreviewOutcome, PreviewState, Project,
};

use crate::{render, style};

pub async fn run_review(
    config: &PeerpickConfig,
    project: &Project,
    ledger: Arc<dyn LedgerStore>,
) -> Result<()> {
    let spinner = render::spinner(&format!("Fetching {} peer(s)...", project.peers.len()));
    let report = PendingResolver::new(Arc::clone(&ledger), config.fetch.max_concurrent)
        .resolve(project)
        .await;
    spinner.finish_and_clear();

    for peer in report.peers.iter().filter(|p| p.is_failed()) {
        println!(
            "{}",
            style::warn(&format!("{} skipped this round", peer.display_name))
        );
    }

    let groups = group_pending(&report.peers);
    if groups.is_empty() {
        println!();
        println!("{}", style::success("Nothing pending"));
        println!();
        return Ok(());
    }

    println!();
    println!(
        "{}",
        style::header(&format!("Pending contributions ({})", groups.len()))
    );
    println!();

    let labels: Vec<String> = groups.iter().map(render::group_label).collect();
    let defaults = vec![true; groups.len()];
    let chosen = MultiSelect::new()
        .with_prompt("Select contributions to preview (space toggles, enter confirms)")
        .items(&labels)
        .defaults(&defaults)
        .interact()
        .context("failed to read selection")?;

    let selected: Vec<DisplayGroup> = groups
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| chosen.contains(idx))
        .map(|(_, group)| group)
        .collect();
    if selected.is_empty() {
        println!("{}", style::dim("Nothing selected."));
        return Ok(());
    }

    let controller = PreviewController::new(ledger, config.preview.accept_stash_policy);
    println!();
    println!(
        "{}",
        style::dim("Previewing on your working copy. Your uncommitted work is stashed until you decide.")
    );

    let mut outcome = surface(controller.start(project, selected).await)?;
    loop {
        outcome = match outcome.state {
            PreviewState::Previewing => {
                let choice = Select::new()
                    .with_prompt("Preview applied. What now?")
                    .items(&[
                        "Accept: keep these changes",
                        "Reject: revert and don't offer them again",
                        "Decide later: revert for now",
                    ])
                    .default(0)
                    .interact()
                    .context("failed to read decision")?;
                match choice {
                    0 => surface(controller.accept(&project.id).await)?,
                    1 => surface(controller.reject(&project.id).await)?,
                    _ => surface(controller.cancel(&project.id).await)?,
                }
            }
            PreviewState::Conflicted => {
                if let Some(ref payload) = outcome.conflict {
                    println!();
                    println!(
                        "{}",
                        style::error(&format!(
                            "{} {} conflicts with your copy",
                            style::hash(&payload.blocking_commit.hash),
                            payload.blocking_commit.subject
                        ))
                    );
                    println!("{}", render::conflict(payload));
                    println!(
                        "  {} applied, {} still to try",
                        payload.groups_already_applied.len(),
                        payload.groups_not_yet_tried.len()
                    );
                    println!();
                }
                let choice = Select::new()
                    .with_prompt("Resolve the files in your editor and stage them, then")
                    .items(&[
                        "Continue: conflicts are resolved and staged",
                        "Reject the whole preview",
                        "Decide later: revert for now",
                    ])
                    .default(0)
                    .interact()
                    .context("failed to read decision")?;
                match choice {
                    0 => surface(controller.resume(&project.id).await)?,
                    1 => surface(controller.reject(&project.id).await)?,
                    _ => surface(controller.cancel(&project.id).await)?,
                }
            }
            PreviewState::Accepted | PreviewState::Rejected | PreviewState::Cancelled => break,
        };
    }

    finish(&outcome);
    Ok(())
}

fn finish(outcome: &PreviewOutcome) {
    println!();
    match outcome.state {
        PreviewState::Accepted => println!("{}", style::success("Accepted and recorded")),
        PreviewState::Rejected => println!(
            "{}",
            style::success("Rejected and recorded. Use 'peerpick unreject' to undo.")
        ),
        PreviewState::Cancelled => println!(
            "{}",
            style::success("Working copy restored. These contributions stay pending.")
        ),
        PreviewState::Previewing | PreviewState::Conflicted => {}
    }
    if let Some(ref token) = outcome.retained_stash {
        println!(
            "{}",
            style::warn(&format!(
                "Your earlier uncommitted work is kept in stash {token}. Apply it with 'git stash apply'."
            ))
        );
    }
    println!();
}

/// Print recovery failures distinctly before handing the error back.
fn surface(result: Result<PreviewOutcome, PreviewError>) -> Result<PreviewOutcome> {
    result.map_err(|e| {
        if e.is_restore_failure() {
            eprintln!();
            eprintln!("{}", style::urgent(&e.to_string()));
            eprintln!("Inspect the working copy with 'git status' and 'git stash list' before continuing.");
            eprintln!();
        }
        anyhow::Error::new(e).context("preview failed")
    })
}
