//! Public and internal types for the seedscan API and dispatchers.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::rule::RuleExpr;
use crate::utils::config::{DispatchConsts, ProductLimits, default_concurrency};

/// Generated artifact for one seed. Opaque to the scheduler; only the oracle and the export
/// aggregator look inside.
pub type Artifact = serde_json::Value;

/// Half-open seed range `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedRange {
    pub start: u32,
    pub end: u32,
}

impl SeedRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Game configuration handed to the generator. `seed` is overwritten per work item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameDesc {
    pub seed: u32,
    pub star_count: u32,
    pub resource_multiplier: f32,
    /// Generate only stars `[0, until)`. Used by export when only a few indexes are wanted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u32>,
}

impl Default for GameDesc {
    fn default() -> Self {
        Self {
            seed: 0,
            star_count: ProductLimits::DEFAULT_STAR_COUNT,
            resource_multiplier: ProductLimits::DEFAULT_RESOURCE_MULTIPLIER,
            until: None,
        }
    }
}

impl GameDesc {
    /// Same configuration, different seed.
    pub fn with_seed(&self, seed: u32) -> Self {
        Self {
            seed,
            ..self.clone()
        }
    }
}

/// Outcome of evaluating one seed. Empty `indexes` means "scanned, no match".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub seed: u32,
    /// Matched star indexes, in order.
    #[serde(default, alias = "matchedIndexes")]
    pub indexes: Vec<u32>,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        !self.indexes.is_empty()
    }
}

/// One export work item: a seed and the star indexes the user cares about.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportJob {
    pub seed: u32,
    #[serde(default, alias = "indexesOfInterest")]
    pub indexes: Vec<u32>,
}

impl From<MatchResult> for ExportJob {
    fn from(m: MatchResult) -> Self {
        ExportJob {
            seed: m.seed,
            indexes: m.indexes,
        }
    }
}

/// Persisted search progress for one profile (the checkpoint record).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: String,
    pub start: u32,
    pub end: u32,
    /// Every seed in `[start, current)` has been evaluated.
    pub current: u32,
    /// Number of distinct matching seeds recorded so far.
    pub found: u64,
    pub concurrency: usize,
    /// Autosave cadence in seconds.
    pub autosave: f64,
    pub star_count: u32,
    pub resource_multiplier: f32,
    pub rule: RuleExpr,
}

impl Checkpoint {
    pub fn range(&self) -> SeedRange {
        SeedRange::new(self.start, self.end)
    }

    /// Game configuration without a seed.
    pub fn game(&self) -> GameDesc {
        GameDesc {
            seed: 0,
            star_count: self.star_count,
            resource_multiplier: self.resource_multiplier,
            until: None,
        }
    }
}

/// Everything one search run needs. Built from a [`Checkpoint`] plus the resume point.
#[derive(Clone, Debug)]
pub struct SearchPlan {
    pub range: SeedRange,
    pub game: GameDesc,
    pub rule: RuleExpr,
    pub concurrency: usize,
    /// Progress / checkpoint cadence in seconds.
    pub autosave: f64,
}

/// How a run ended when it did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Every seed of the range was accounted for.
    Completed,
    /// Stopped (or the channel closed) before the frontier reached the end.
    Interrupted,
}

/// Profile metadata (name and creation time); progress lives in [`Checkpoint`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInfo {
    pub id: String,
    pub name: String,
    /// Milliseconds since epoch.
    pub created_at: i64,
}

/// One stored match row (seed + star index), as returned by result paging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMatch {
    pub seed: u32,
    pub index: u32,
}

/// Merged CLI settings: defaults, then `.seedscan.toml`, then environment, then flags.
#[derive(Clone, Debug)]
pub struct Opts {
    /// Profile database. When None, `.seedscan.db` in the working directory.
    pub db_path: Option<PathBuf>,
    pub concurrency: usize,
    /// Checkpoint cadence in seconds.
    pub autosave: f64,
    pub star_count: u32,
    pub resource_multiplier: f32,
    /// Remote oracle address; when set, searches run remotely.
    pub remote: Option<String>,
    /// Worker command (program then arguments) for the local pool.
    pub worker: Vec<String>,
    /// Export every star, not only the matched ones.
    pub all_stars: bool,
    pub verbose: bool,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            db_path: None,
            concurrency: default_concurrency(),
            autosave: DispatchConsts::DEFAULT_AUTOSAVE_SECS,
            star_count: ProductLimits::DEFAULT_STAR_COUNT,
            resource_multiplier: ProductLimits::DEFAULT_RESOURCE_MULTIPLIER,
            remote: None,
            worker: Vec::new(),
            all_stars: false,
            verbose: false,
        }
    }
}

impl Opts {
    pub fn game(&self) -> GameDesc {
        GameDesc {
            seed: 0,
            star_count: self.star_count,
            resource_multiplier: self.resource_multiplier,
            until: None,
        }
    }
}
