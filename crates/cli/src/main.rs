//! peerpick command-line tool.
//!
//! Provides subcommands for generating and validating a project
//! configuration, listing what peers currently offer, reviewing offers
//! through a reversible preview, and inspecting or undoing rejections.

mod render;
mod review;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use peerpick_core::{
    group_pending, FileLedgerStore, LedgerStore, PeerpickConfig, PendingResolver, Project,
};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// peerpick command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "peerpick",
    version,
    about = "Review and cherry-pick what your peers offer, one contribution at a time"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "./peerpick.toml")]
    config: PathBuf,

    /// Also write logs to this file (level from `[logging]`).
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./peerpick.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Fetch every peer and list pending contributions.
    Pending {
        /// Print machine-readable JSON instead of tables.
        #[arg(long)]
        json: bool,
    },

    /// Select contributions, preview them, then accept or reject.
    Review,

    /// Show rejected contributions.
    History {
        /// Only this peer.
        #[arg(short, long)]
        peer: Option<String>,
    },

    /// Offer a rejected contribution again.
    Unreject {
        /// Peer whose rejection is undone.
        #[arg(short, long)]
        peer: String,

        /// Contribution id (full hash or unique prefix).
        identity: String,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_logging(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

/// Console logging stays at `warn` so it does not drown the tables;
/// `--log-file` captures the configured level. `RUST_LOG` overrides both.
fn init_logging(cli: &Cli) -> Option<WorkerGuard> {
    let Some(ref log_file) = cli.log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
            .with_target(false)
            .without_time()
            .init();
        return None;
    };

    let level = PeerpickConfig::load_from_file(&cli.config)
        .map(|c| c.logging.level)
        .unwrap_or_else(|_| "info".into());
    let dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = log_file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "peerpick.log".into());
    let appender = tracing_appender::rolling::never(dir, name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Some(guard)
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&cli.config),
        command => {
            tracing::debug!(config = %cli.config.display(), "loading project");
            let config = load_config(&cli.config)?;
            let project = Project::from_config(&config).context("failed to open project")?;
            let ledger: Arc<dyn LedgerStore> = Arc::new(FileLedgerStore::new(config.ledger_dir()));

            match command {
                Commands::Pending { json } => cmd_pending(&config, &project, ledger, json).await,
                Commands::Review => review::run_review(&config, &project, ledger).await,
                Commands::History { peer } => cmd_history(&project, ledger.as_ref(), peer.as_deref()),
                Commands::Unreject { peer, identity } => {
                    cmd_unreject(&project, ledger.as_ref(), &peer, &identity)
                }
                Commands::Init { .. } | Commands::Validate => unreachable!(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<PeerpickConfig> {
    PeerpickConfig::load_and_validate(path).with_context(|| {
        format!(
            "failed to load configuration from {} (run 'peerpick init' to create one)",
            path.display()
        )
    })
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# peerpick configuration
# One file per project. Peers are ordinary git remotes of the working copy.

[project]
path = "."
# id = "my-vault"            # derived from the working copy path when unset
# display_name = "My vault"

[ledger]
# dir = "~/.local/share/peerpick/ledgers"

[fetch]
timeout_secs = 60
max_concurrent = 4

[git]
command_timeout_secs = 120

[preview]
# What accept does with uncommitted work stashed at preview start:
# "restore" re-applies it, "keep" leaves it in `git stash list`,
# "discard" drops it.
accept_stash_policy = "restore"

[logging]
level = "info"

# [[peers]]
# id = "bob"
# display_name = "Bob"
# remote = "bob"           # defaults to the id
# branch = "main"
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Add each collaborator as a git remote: git remote add bob <url>");
    println!("  2. Add a [[peers]] entry for each remote");
    println!(
        "  3. Validate with: peerpick validate --config {}",
        output.display()
    );
    println!("  4. Review offers: peerpick review --config {}", output.display());

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let config =
        PeerpickConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    match config.validate() {
        Ok(()) => println!("  [OK] All fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    let repo_ok = config.project.path.join(".git").exists();
    if repo_ok {
        println!("  [OK] Working copy is a git repository");
    } else {
        println!(
            "  [WARN] No .git found under {}",
            config.project.path.display()
        );
    }

    println!();
    println!("Configuration summary:");
    println!("  Project       : {}", config.project_display_name());
    println!("  Project id    : {}", config.project_id());
    println!("  Working copy  : {}", config.project.path.display());
    println!("  Ledgers       : {}", config.ledger_dir().display());
    println!(
        "  Fetch         : {}s timeout, {} at a time",
        config.fetch.timeout_secs, config.fetch.max_concurrent
    );
    println!("  Stash policy  : {}", config.preview.accept_stash_policy);
    println!("  Peers         : {}", config.peers.len());
    for peer in config.peers() {
        println!(
            "    - {} ({}/{})",
            peer.display_name, peer.remote, peer.branch
        );
    }
    println!();
    println!("Configuration is valid.");

    Ok(())
}

async fn cmd_pending(
    config: &PeerpickConfig,
    project: &Project,
    ledger: Arc<dyn LedgerStore>,
    json: bool,
) -> Result<()> {
    let spinner = (!json).then(|| render::spinner(&format!("Fetching {} peer(s)...", project.peers.len())));
    let report = PendingResolver::new(ledger, config.fetch.max_concurrent)
        .resolve(project)
        .await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let groups = group_pending(&report.peers);

    if json {
        let out = serde_json::json!({
            "project_id": project.id,
            "peers": report.peers,
            "summary": report.summary,
            "groups": groups,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", style::header(&format!("Peers of {}", project.display_name)));
    println!();
    println!("{}", render::peers(&report.peers));

    println!();
    if groups.is_empty() {
        println!("{}", style::success("Nothing pending"));
    } else {
        println!(
            "{}",
            style::header(&format!("Pending contributions ({})", groups.len()))
        );
        println!();
        println!("{}", render::groups(&groups));
        println!();
        println!("{}", style::dim("Run 'peerpick review' to preview and decide."));
    }

    let summary = &report.summary;
    if summary.filtered_accepted + summary.filtered_rejected > 0 {
        println!(
            "{}",
            style::dim(&format!(
                "{} already accepted, {} rejected earlier",
                summary.filtered_accepted, summary.filtered_rejected
            ))
        );
    }
    if summary.filtered_local > 0 {
        println!(
            "{}",
            style::dim(&format!(
                "{} already in your history",
                summary.filtered_local
            ))
        );
    }
    println!();

    if summary.peers_failed > 0 {
        println!(
            "{}",
            style::warn(&format!("{} peer(s) could not be checked", summary.peers_failed))
        );
        println!();
    }
    Ok(())
}

fn cmd_history(project: &Project, ledger: &dyn LedgerStore, peer: Option<&str>) -> Result<()> {
    let peers: Vec<&str> = match peer {
        Some(id) => {
            project
                .peer(id)
                .with_context(|| format!("peer '{id}' is not configured"))?;
            vec![id]
        }
        None => project.peers.iter().map(|p| p.id.as_str()).collect(),
    };

    let mut total = 0;
    for peer_id in peers {
        let rejected = ledger
            .list_rejected(&project.id, peer_id)
            .with_context(|| format!("failed to read ledger for '{peer_id}'"))?;
        if rejected.is_empty() {
            continue;
        }
        total += rejected.len();
        println!();
        println!("{}", render::ledger(peer_id, &rejected));
    }

    println!();
    if total == 0 {
        println!("{}", style::success("No rejected contributions"));
    } else {
        println!(
            "{}",
            style::dim("Undo with: peerpick unreject --peer <peer> <contribution>")
        );
    }
    println!();
    Ok(())
}

fn cmd_unreject(
    project: &Project,
    ledger: &dyn LedgerStore,
    peer: &str,
    identity: &str,
) -> Result<()> {
    project
        .peer(peer)
        .with_context(|| format!("peer '{peer}' is not configured"))?;

    let rejected = ledger
        .list_rejected(&project.id, peer)
        .with_context(|| format!("failed to read ledger for '{peer}'"))?;
    let needle = identity.to_lowercase();
    let matches: Vec<&str> = rejected
        .iter()
        .map(|e| e.original_contribution_identity.as_str())
        .filter(|id| id.starts_with(needle.as_str()))
        .collect();

    let full = match matches.as_slice() {
        [] => {
            println!(
                "{}",
                style::warn(&format!("No live rejection of {identity} for {peer}"))
            );
            return Ok(());
        }
        [one] => *one,
        many => anyhow::bail!(
            "'{}' is ambiguous: matches {} rejected contributions",
            identity,
            many.len()
        ),
    };

    ledger
        .unreject(&project.id, peer, full)
        .context("failed to update ledger")?;
    println!(
        "{}",
        style::success(&format!(
            "{} will be offered again by {}",
            style::hash(full),
            peer
        ))
    );
    Ok(())
}
