//! Application configuration constants.
//! Tuning and thresholds in one place.

use std::sync::OnceLock;
use std::time::Duration;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived paths: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    db_filename: String,
    config_filename: String,
    export_filename: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache paths from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                db_filename: format!(".{pkg}.db"),
                config_filename: format!(".{pkg}.toml"),
                export_filename: format!("{pkg}_export.csv"),
            }
        })
    }

    /// Profile database in the working directory.
    pub fn db_filename(&self) -> &str {
        &self.db_filename
    }

    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    /// Default export output when `--output` is not given.
    pub fn export_filename(&self) -> &str {
        &self.export_filename
    }
}

// ---- Environment ----

/// Environment variables read after `.env` is loaded.
pub struct EnvKeys;

impl EnvKeys {
    pub const DB: &'static str = "SEEDSCAN_DB";
    pub const REMOTE: &'static str = "SEEDSCAN_REMOTE";
}

// ---- Dispatch ----

/// Scheduler cadence and watchdog thresholds.
pub struct DispatchConsts;

impl DispatchConsts {
    /// Autosave cadence when none (or a non-positive one) is configured, in seconds.
    pub const DEFAULT_AUTOSAVE_SECS: f64 = 5.0;
    /// Floor for the progress ticker.
    pub const MIN_TICK: Duration = Duration::from_millis(10);
    /// Warn once when no worker answered for this long.
    pub const STALL_WARN: Duration = Duration::from_secs(60);
    /// Socket read timeout of the remote backend; bounds stop latency.
    pub const REMOTE_POLL: Duration = Duration::from_millis(200);
}

// ---- Product limits ----

/// Bounds on user-supplied search settings.
pub struct ProductLimits;

impl ProductLimits {
    /// Largest accepted range end (exclusive).
    pub const MAX_SEED: u32 = 100_000_000;
    pub const MIN_STAR_COUNT: u32 = 32;
    pub const MAX_STAR_COUNT: u32 = 64;
    pub const DEFAULT_STAR_COUNT: u32 = 64;
    pub const DEFAULT_RESOURCE_MULTIPLIER: f32 = 1.0;
}

// ---- Profiles ----

/// Profile id format: prefix + hex chars of a blake3 digest.
pub struct ProfileIds;

impl ProfileIds {
    pub const PREFIX: &'static str = "profile_";
    pub const HEX_LEN: usize = 20;
}

/// Rows per page for `results` when no limit is given.
pub const RESULTS_PAGE_SIZE: usize = 50;

/// Default worker count: available threads from rayon.
pub fn default_concurrency() -> usize {
    rayon::current_num_threads().max(1)
}
