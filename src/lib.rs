//! Seedscan: bounded concurrent seed-range scanner with resumable, monotonic checkpoints

pub mod engine;
pub mod export;
pub mod oracle;
pub mod pipeline;
pub mod rule;
pub mod search;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use export::{CsvAggregator, ExportOptions, run_export};
pub use oracle::{Generator, LocalOracle, Oracle, OracleWorker, RemoteOracle, SearchSink};
pub use pipeline::StopHandle;
pub use rule::{RuleExpr, RuleLeaf};
pub use search::{CheckpointStore, SearchObserver, run_search, validate_checkpoint};
pub use utils::config::default_concurrency;

/// Result alias used by public seedscan API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Scan a profile's range with an in-process generator, one instance per worker thread.
///
/// Convenience over [`run_search`] for library callers: resumes from `store` and blocks until
/// the range is done, `stop` fires, or a worker fails.
pub fn search_with_generator<G, F>(
    make_generator: F,
    store: &mut dyn CheckpointStore,
    request: &Checkpoint,
    stop: &StopHandle,
    observer: &mut dyn SearchObserver,
) -> Result<Termination>
where
    G: Generator + Send + 'static,
    F: Fn() -> G + Send + Sync + 'static,
{
    let oracle = LocalOracle::with_generator(make_generator);
    log::debug!(
        "{} REQUEST:{:#?}",
        env!("CARGO_PKG_NAME").to_uppercase(),
        request
    );
    run_search(&oracle, store, request, stop, observer)
}
