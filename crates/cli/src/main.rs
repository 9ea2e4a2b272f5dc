use clap::{Parser, Subcommand};
use common::ToolHome;
use serde::Serialize;
use std::env;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use warden::{FixOptions, RollbackOptions, ScanOptions, Warden};

/// Log filter used when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "warden=info,oracle=info,forge=info,shadow=info,vault=info,anatomist=warn";

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Verified, reversible repairs for JS/TS source trees", long_about = None)]
struct Cli {
    /// Tool home (defaults to $WARDEN_HOME, then <path>/.warden).
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pre-flight, snapshot and analyze the import graph.
    Scan {
        #[arg(default_value = ".")]
        path: PathBuf,
        /// No snapshot, no remediation.
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        force: bool,
    },
    /// Apply and verify every candidate transformation.
    Fix {
        #[arg(default_value = ".")]
        path: PathBuf,
        /// List candidates only.
        #[arg(long)]
        dry_run: bool,
        /// Proceed even if a critical pre-flight check fails.
        #[arg(long)]
        force: bool,
    },
    /// Check the proof chain and list defects still present.
    Verify {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Restore the tree to a snapshot.
    Rollback {
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Snapshot id (latest when omitted).
        #[arg(long)]
        snapshot: Option<String>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        force: bool,
    },
    /// Snapshots, cache and proof ledger at a glance.
    Status {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

impl Commands {
    fn path(&self) -> &Path {
        match self {
            Commands::Scan { path, .. }
            | Commands::Fix { path, .. }
            | Commands::Verify { path }
            | Commands::Rollback { path, .. }
            | Commands::Status { path } => path,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Commands::Scan { .. } => "scan",
            Commands::Fix { .. } => "fix",
            Commands::Verify { .. } => "verify",
            Commands::Rollback { .. } => "rollback",
            Commands::Status { .. } => "status",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("warning: .env: {}", e);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cli.command.path().to_path_buf();
    let home = cli
        .home
        .clone()
        .or_else(|| env::var_os("WARDEN_HOME").map(PathBuf::from))
        .map(ToolHome::new)
        .unwrap_or_else(|| ToolHome::for_project(&root));

    let mut warden = Warden::open(&root, home)?;
    let command = cli.command.name();

    match cli.command {
        Commands::Scan { dry_run, force, .. } => {
            let report = warden.scan(ScanOptions { dry_run, force })?;
            let summary = &report.analysis.summary;
            print_box(
                "WARDEN SCAN",
                &[
                    ("Files", report.analysis.metrics.files.to_string()),
                    ("Internal edges", report.analysis.metrics.internal_edges.to_string()),
                    ("Cycles", summary.cycles.to_string()),
                    ("Vulnerabilities", report.analysis.vulnerabilities.len().to_string()),
                    ("Risk", format!("{:?} ({})", summary.risk.level, summary.risk.score)),
                    ("Snapshot", report.snapshot_id.clone().unwrap_or_else(|| "-".into())),
                ],
            );
            for v in &report.analysis.vulnerabilities {
                println!("  [{:?}] {:?} {} - {}", v.severity, v.kind, v.file, v.detail);
            }
            write_report(&warden, command, &report)?;
        }
        Commands::Fix { dry_run, force, .. } => {
            let report = warden.fix(FixOptions { dry_run, force })?;
            print_box(
                if dry_run { "WARDEN FIX (DRY RUN)" } else { "WARDEN FIX" },
                &[
                    ("Candidates", report.candidates.len().to_string()),
                    ("Verified", report.succeeded().to_string()),
                    ("Rejected", (report.outcomes.len() - report.succeeded()).to_string()),
                    ("Files written", report.files_written.len().to_string()),
                    ("Snapshot", report.snapshot_id.clone().unwrap_or_else(|| "-".into())),
                ],
            );
            for c in &report.candidates {
                println!("  {} <- {}", c.file, c.rule);
            }
            write_report(&warden, command, &report)?;
        }
        Commands::Verify { .. } => {
            let report = warden.verify()?;
            print_box(
                "WARDEN VERIFY",
                &[
                    ("Proof chain", if report.chain_valid { "intact" } else { "BROKEN" }.to_string()),
                    ("Records", report.ledger.total.to_string()),
                    ("Succeeded", report.ledger.succeeded.to_string()),
                    ("Outstanding", report.outstanding.len().to_string()),
                ],
            );
            if let Some(e) = &report.chain_error {
                println!("  {e}");
            }
            write_report(&warden, command, &report)?;
        }
        Commands::Rollback {
            snapshot,
            dry_run,
            force,
            ..
        } => {
            let summary = warden.rollback(RollbackOptions {
                snapshot_id: snapshot,
                dry_run,
                force,
            })?;
            let plan = &summary.report.plan;
            print_box(
                if dry_run { "WARDEN ROLLBACK (DRY RUN)" } else { "WARDEN ROLLBACK" },
                &[
                    ("Target", plan.snapshot_id.clone()),
                    ("Restore", plan.files_to_restore.len().to_string()),
                    ("Delete", plan.files_to_delete.len().to_string()),
                    (
                        "Emergency",
                        summary.report.emergency_snapshot_id.clone().unwrap_or_else(|| "-".into()),
                    ),
                ],
            );
            write_report(&warden, command, &summary)?;
        }
        Commands::Status { .. } => {
            let report = warden.status()?;
            print_box(
                "WARDEN STATUS",
                &[
                    ("Snapshots", report.snapshots.len().to_string()),
                    ("Cache entries", report.cache_entries.to_string()),
                    ("Proofs", report.ledger.total.to_string()),
                    ("Success rate", format!("{:.2}", report.ledger.success_rate)),
                ],
            );
            for s in &report.snapshots {
                println!("  {} [{}] {} files", s.id, s.tag, s.files);
            }
        }
    }

    Ok(())
}

fn print_box(title: &str, rows: &[(&str, String)]) {
    println!("+------------------------------------------+");
    println!("| {:<40} |", title);
    println!("+------------------------------------------+");
    for (label, value) in rows {
        println!("| {:<16}: {:>22} |", label, value);
    }
    println!("+------------------------------------------+");
}

/// Writes `<tool-home>/reports/<command>-<timestamp>.json`.
fn write_report(warden: &Warden, command: &str, report: &impl Serialize) -> anyhow::Result<()> {
    let path = warden
        .home()
        .reports_dir()
        .join(format!("{command}-{}.json", common::now_millis()));
    std::fs::write(&path, serde_json::to_vec_pretty(report)?)?;
    println!("Report: {}", path.display());
    Ok(())
}
