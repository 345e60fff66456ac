use anyhow::{bail, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use snapvault::config::Settings;
use snapvault::fs::{format_size, OperatorTransport};
use snapvault::records::MemoryRecordStore;
use snapvault::state::JsonFileStateStore;
use snapvault::sync::{ConflictResolution, PhaseReport, SyncDirection, SyncKind, SyncOrchestrator};

/// Incremental encrypted backup and sync of records and files.
#[derive(Parser)]
#[command(name = "snapvault")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to <config dir>/snapvault/config.toml)
    #[arg(global = true, short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(global = true, short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload changed files and a new snapshot
    Upload,
    /// Download changed files and merge new snapshots
    Download,
    /// List snapshot files stored remotely
    Snapshots {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete all snapshots for the provider and reset sync state
    Clear {
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Check that the provider is reachable
    Test,
    /// Show items queued for retry and whether a run is active
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect or resolve record conflicts
    Conflicts {
        #[command(subcommand)]
        action: ConflictCommand,
    },
}

#[derive(Subcommand)]
enum ConflictCommand {
    /// List unresolved conflicts
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve one conflict by its index
    Resolve {
        index: usize,
        #[arg(value_enum)]
        resolution: ResolutionArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ResolutionArg {
    KeepLocal,
    UseRemote,
}

impl From<ResolutionArg> for ConflictResolution {
    fn from(arg: ResolutionArg) -> Self {
        match arg {
            ResolutionArg::KeepLocal => ConflictResolution::KeepLocal,
            ResolutionArg::UseRemote => ConflictResolution::UseRemote,
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "snapvault=info",
        1 => "snapvault=debug",
        _ => "snapvault=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_phase(label: &str, phase: &PhaseReport) {
    match &phase.error {
        Some(error) => println!("{:<10} aborted: {}", label, error),
        None => println!(
            "{:<10} {} ok, {} skipped, {} failed (of {})",
            label, phase.success, phase.skipped, phase.failed, phase.total
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = Settings::load(cli.config.as_deref())?;
    let state = Arc::new(JsonFileStateStore::open(settings.state_path())?);
    let records = Arc::new(
        MemoryRecordStore::load_json(settings.descriptors(), &settings.records_path()).await?,
    );
    let transport = OperatorTransport::shared(settings.provider.clone())?;
    let orchestrator = SyncOrchestrator::new(transport, records.clone(), state, settings.codec())
        .with_options(settings.sync_options())?;

    // Relay progress to the log while a run is active.
    let mut progress = orchestrator.registry().subscribe();
    tokio::spawn(async move {
        while let Some(update) = progress.recv().await {
            tracing::debug!(
                provider = %update.provider,
                direction = update.direction.as_str(),
                kind = update.kind.as_str(),
                percentage = update.percentage,
                current = update.current_item.as_deref().unwrap_or(""),
                "progress"
            );
        }
    });

    let root = settings.storage_root.as_path();
    let base = settings.remote_base.as_str();

    match cli.command {
        Commands::Upload => {
            let report = orchestrator.run_upload(root, base).await?;
            match &report.snapshot {
                Some(name) => println!(
                    "snapshot   {} ({} rows, {})",
                    name,
                    report.snapshot_rows,
                    if report.is_full_snapshot { "full" } else { "incremental" }
                ),
                None => println!("snapshot   no record changes"),
            }
            print_phase("files", &report.files);
            print_phase("snapshots", &report.database);
            if !report.success() {
                bail!("upload finished with failures; they will be retried on the next run");
            }
        }
        Commands::Download => {
            let report = orchestrator.run_download(root, base).await?;
            records.save_json(&settings.records_path()).await?;
            print_phase("files", &report.files);
            print_phase("snapshots", &report.database);
            println!("merged     {} snapshot(s), {} conflict(s)", report.merged.len(), report.conflicts);
            if !report.success() {
                bail!("download finished with failures; they will be retried on the next run");
            }
        }
        Commands::Snapshots { json } => {
            let entries = orchestrator.list_remote_snapshots(base).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No snapshots for {}", settings.provider.display_name());
            } else {
                for entry in entries {
                    let when = entry
                        .timestamp
                        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("{:<19}  {:>10}  {}", when, format_size(entry.size), entry.file_name);
                }
            }
        }
        Commands::Clear { yes } => {
            if !yes {
                bail!("this deletes every snapshot for {}; re-run with --yes", settings.provider.display_name());
            }
            orchestrator.run_clear(root, base).await?;
            println!("Cleared backup data for {}", settings.provider.display_name());
        }
        Commands::Test => {
            if orchestrator.test_connection().await {
                println!("{} is reachable", settings.provider.display_name());
            } else {
                bail!("{} is not reachable", settings.provider.display_name());
            }
        }
        Commands::Status { json } => {
            let mut failed = Vec::new();
            for direction in [SyncDirection::Upload, SyncDirection::Download] {
                for kind in [SyncKind::Files, SyncKind::Database] {
                    failed.extend(orchestrator.failed_files(direction, kind).into_iter().map(|f| (direction, kind, f)));
                }
            }

            if json {
                let items: Vec<_> = failed
                    .iter()
                    .map(|(direction, kind, file)| {
                        serde_json::json!({
                            "direction": direction,
                            "kind": kind,
                            "file": file,
                        })
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "provider": orchestrator.provider(),
                        "running": orchestrator.is_running(),
                        "failed": items,
                    }))?
                );
            } else {
                println!(
                    "{}: {}",
                    settings.provider.display_name(),
                    if orchestrator.is_running() { "sync running" } else { "idle" }
                );
                if failed.is_empty() {
                    println!("Nothing queued for retry");
                }
                for (direction, kind, file) in failed {
                    println!(
                        "{:<8} {:<8} {}  {}",
                        direction.as_str(),
                        kind.as_str(),
                        file.file_path,
                        file.error.as_deref().unwrap_or("")
                    );
                }
            }
        }
        Commands::Conflicts { action } => match action {
            ConflictCommand::List { json } => {
                let conflicts = orchestrator.list_conflicts()?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&conflicts)?);
                } else if conflicts.is_empty() {
                    println!("No conflicts");
                } else {
                    for (index, conflict) in conflicts.iter().enumerate() {
                        println!(
                            "#{:<3} {:<16} {:<24} {}",
                            index,
                            conflict.record_type,
                            conflict.record_id.as_deref().unwrap_or("-"),
                            conflict.detected_at.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }
            }
            ConflictCommand::Resolve { index, resolution } => {
                let resolution = ConflictResolution::from(resolution);
                let conflict = orchestrator.resolve_conflict(index, resolution).await?;
                records.save_json(&settings.records_path()).await?;
                println!(
                    "{} {}: {}",
                    conflict.record_type,
                    conflict.record_id.as_deref().unwrap_or("-"),
                    resolution.description()
                );
            }
        },
    }

    Ok(())
}
