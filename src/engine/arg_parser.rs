use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::utils::config::RESULTS_PAGE_SIZE;

/// Scan seed ranges for generated worlds matching a rule, with resumable progress.
#[derive(Clone, Parser)]
#[command(name = "seedscan")]
#[command(about = "Scan seed ranges with a worker pool or a remote generator; export matches to CSV.")]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Settings shared by every subcommand. Unset flags fall back to `.seedscan.toml`, then the
/// environment, then defaults.
#[derive(Clone, Args)]
pub struct CommonArgs {
    /// Path to the profile database. Default: `.seedscan.db` in the working directory.
    #[arg(long, short, global = true)]
    pub db: Option<PathBuf>,

    /// Number of concurrent workers (sent to the remote process when using --remote).
    #[arg(long, short = 'j', global = true)]
    pub concurrency: Option<usize>,

    /// Checkpoint cadence in seconds.
    #[arg(long, short = 'a', global = true)]
    pub autosave: Option<f64>,

    /// Stars per generated galaxy.
    #[arg(long, global = true)]
    pub star_count: Option<u32>,

    /// Resource multiplier handed to the generator.
    #[arg(long, global = true)]
    pub resource_multiplier: Option<f32>,

    /// Remote generator address (`host:port` or `ws://host:port`).
    #[arg(long, short = 'r', global = true)]
    pub remote: Option<String>,

    /// Worker command for the local pool, e.g. "worldgen --stdio". One process per worker.
    #[arg(long, short = 'w', global = true)]
    pub worker: Option<String>,

    /// Verbose output.
    #[arg(long, short = 'v', global = true, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    /// Scan a profile's range, resuming from its last checkpoint.
    Search(SearchArgs),
    /// Regenerate a profile's matches and write them as CSV.
    Export(ExportArgs),
    /// Generate one seed and print the artifact as JSON.
    Generate(GenerateArgs),
    /// Manage profiles.
    #[command(subcommand)]
    Profile(ProfileCommand),
    /// Page through a profile's stored matches.
    Results(ResultsArgs),
}

#[derive(Clone, Args)]
pub struct SearchArgs {
    /// Existing profile id. Mutually exclusive with --name.
    #[arg(long, short, conflicts_with = "name")]
    pub profile: Option<String>,

    /// Create a new profile with this name.
    #[arg(long, short)]
    pub name: Option<String>,

    /// First seed (inclusive). Required for a new profile.
    #[arg(long)]
    pub start: Option<u32>,

    /// Last seed (exclusive). Required for a new profile.
    #[arg(long)]
    pub end: Option<u32>,

    /// Rule as JSON, or `@path` to read it from a file. Required for a new profile.
    #[arg(long)]
    pub rule: Option<String>,

    /// Drop stored matches and start over from the range start.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub restart: Option<bool>,
}

#[derive(Clone, Args)]
pub struct ExportArgs {
    /// Profile id.
    pub profile: String,

    /// Output CSV path. Default: `seedscan_export.csv`.
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Export only matches with seed >= START.
    #[arg(long)]
    pub start: Option<u32>,

    /// Export only matches with seed <= END (inclusive).
    #[arg(long)]
    pub end: Option<u32>,

    /// Write every star of each galaxy, flagging the matched ones.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub all_stars: Option<bool>,
}

#[derive(Clone, Args)]
pub struct GenerateArgs {
    /// Seed to generate.
    pub seed: u32,

    /// Write the JSON here instead of stdout.
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Clone, Subcommand)]
pub enum ProfileCommand {
    /// List profiles with their progress.
    List,
    /// Create an empty profile.
    Create { name: String },
    /// Show one profile's checkpoint.
    Show { id: String },
    /// Drop matches and reset progress to the range start.
    Clear { id: String },
    /// Delete a profile with all its data.
    Delete { id: String },
}

#[derive(Clone, Args)]
pub struct ResultsArgs {
    /// Profile id.
    pub profile: String,

    /// Rows to skip.
    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    /// Rows to show.
    #[arg(long, short = 'n', default_value_t = RESULTS_PAGE_SIZE)]
    pub limit: usize,
}
