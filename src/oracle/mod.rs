//! Oracle adapters: the boundary to the world generator.
//!
//! [`Oracle`] is what the search and export layers see. Two implementations exist:
//! [`LocalOracle`] runs a pool of [`OracleWorker`]s on threads (in-process generators or child
//! processes), [`RemoteOracle`] drives an external process over one WebSocket.

pub mod local;
pub mod process;
pub mod protocol;
pub mod remote;

pub use local::{GeneratorWorker, LocalOracle, WorkerFactory};
pub use process::ProcessWorker;
pub use protocol::{FindInput, RemoteEvent, RemoteRequest, WorkerRequest, WorkerResponse};
pub use remote::RemoteOracle;

use anyhow::Result;

use crate::pipeline::StopHandle;
use crate::rule::RuleExpr;
use crate::types::{Artifact, GameDesc, MatchResult, SearchPlan, Termination};

/// In-process generator. Implement this to plug a generator into [`GeneratorWorker`].
///
/// One instance lives on one worker thread, so it may keep warm state between calls.
pub trait Generator {
    fn generate(&mut self, game: &GameDesc) -> Result<Artifact>;

    /// Star indexes of the artifact for `game.seed` matching `rule`, in order.
    fn find(&mut self, game: &GameDesc, rule: &RuleExpr) -> Result<Vec<u32>>;
}

/// One request/response channel to an evaluator. Exactly one request is in flight at a time.
pub trait OracleWorker {
    fn call(&mut self, request: &WorkerRequest) -> Result<WorkerResponse>;
}

/// Receives results and frontier ticks from a running search.
///
/// Backends call `on_result` for every matching seed and `on_progress` on the autosave cadence
/// plus once at the end. An error returned here aborts the run.
pub trait SearchSink {
    fn on_result(&mut self, result: MatchResult) -> Result<()>;
    fn on_progress(&mut self, frontier: u32) -> Result<()>;
}

/// The evaluator contract shared by both backends.
pub trait Oracle {
    /// Generate the full artifact for one seed.
    fn generate(&self, game: &GameDesc) -> Result<Artifact>;

    /// Scan `plan.range`, streaming matches and frontier updates into `sink`.
    fn search(
        &self,
        plan: &SearchPlan,
        stop: &StopHandle,
        sink: &mut dyn SearchSink,
    ) -> Result<Termination>;
}
