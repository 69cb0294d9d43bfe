use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use fetchledger::humanize::HumanDuration;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fetchledger")]
#[command(about = "Module version ledger CLI", long_about = None)]
pub struct Cli {
    /// Configuration file (overrides FETCHLEDGER_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record a version announced by the index
    Insert(InsertArgs),
    /// List (or claim) the next module versions to process
    Next(NextArgs),
    /// Record the outcome of a processing attempt
    Record(RecordArgs),
    /// Show a module version and its package states
    Show(ModuleArgs),
    /// Status histogram and latest index timestamp
    Stats,
    /// Most recent failed module versions
    Failures(FailuresArgs),
    /// Make a module version eligible immediately
    Requeue(ModuleArgs),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(clap::Args, Debug)]
pub struct ModuleArgs {
    pub module_path: String,
    pub version: String,
}

#[derive(clap::Args, Debug)]
pub struct InsertArgs {
    pub path: String,
    pub version: String,
    /// Index timestamp (RFC 3339)
    #[arg(long)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(clap::Args, Debug)]
pub struct NextArgs {
    /// Defaults to scheduler.batch_size
    #[arg(long)]
    pub limit: Option<usize>,
    /// Lease the returned versions so other workers skip them
    #[arg(long)]
    pub claim: bool,
    /// Lease length for --claim; defaults to scheduler.lease
    #[arg(long, requires = "claim")]
    pub lease: Option<HumanDuration>,
}

#[derive(clap::Args, Debug)]
pub struct RecordArgs {
    pub module_path: String,
    pub version: String,
    /// Outcome code of the attempt (200-299 is success)
    #[arg(long)]
    pub status: u16,
    #[arg(long)]
    pub error: Option<String>,
    #[arg(long, default_value = "")]
    pub go_mod_path: String,
    #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
    pub app_version: String,
    /// Package outcome as PATH=STATUS; repeatable
    #[arg(long = "package", value_parser = parse_package)]
    pub packages: Vec<(String, u16)>,
}

#[derive(clap::Args, Debug)]
pub struct FailuresArgs {
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

fn parse_package(raw: &str) -> Result<(String, u16), String> {
    let (path, status) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected PATH=STATUS, got {:?}", raw))?;
    let status = status
        .parse::<u16>()
        .map_err(|e| format!("bad status in {:?}: {}", raw, e))?;
    Ok((path.to_string(), status))
}
