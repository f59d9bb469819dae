use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Maximum flood depth over a window of SCHISM output snapshots
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reduce each run+grid unit to its maximum depth and export faces/max-depth tables
    MaxDepth(MaxDepthArgs),
    /// Remove the working directories of finished runs
    Cleanup(CleanupArgs),
}

#[derive(Args, Debug)]
pub struct MaxDepthArgs {
    /// Run identifiers to process
    #[arg(required = true)]
    pub run_ids: Vec<String>,

    /// Root holding `{run_id}/{grid}/outputs` snapshot directories
    #[arg(long, default_value = "/var/lib/oneconcern/inundation_schism")]
    pub input_root: PathBuf,

    /// Grid identifiers, repeat for several
    #[arg(long = "grid", default_value = "grid_1")]
    pub grids: Vec<String>,

    /// Write artifacts under `{output_root}/{run_id}/{grid}` instead of next to the snapshots
    #[arg(long)]
    pub output_root: Option<PathBuf>,

    /// First timestep included (skips spin-up)
    #[arg(long, default_value_t = 144)]
    pub start_index: u64,

    /// Last timestep included
    #[arg(long, default_value_t = 240)]
    pub end_index: u64,

    /// Elevation aggregation per snapshot: hourly or daily
    #[arg(long, default_value = "hourly")]
    pub aggregation: String,

    /// Snapshot file name prefix
    #[arg(long, default_value = "schout_")]
    pub prefix: String,

    /// Snapshot file name suffix
    #[arg(long, default_value = ".nc.gz")]
    pub suffix: String,

    /// Units processed concurrently (defaults to the number of CPUs)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Split each unit's snapshots into this many parallel partial maxima
    #[arg(long, default_value_t = 1)]
    pub shards: usize,

    /// Extra attempts for a snapshot whose read fails with an I/O error
    #[arg(long, default_value_t = 0)]
    pub retries: usize,

    /// Cancel in-flight units after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Write a per-unit outcome table to this CSV file
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Run identifiers whose directories are removed
    pub run_ids: Vec<String>,

    /// Headerless CSV whose first column lists run identifiers
    #[arg(long)]
    pub run_id_file: Option<PathBuf>,

    /// Root holding the tmp, input, output and inundation_schism areas
    #[arg(long, default_value = "/var/lib/oneconcern")]
    pub root: PathBuf,
}

pub fn get_args() -> Cli {
    Cli::parse()
}
