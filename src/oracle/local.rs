//! Local pool backend: one warm worker per concurrency slot, each on its own thread.

use anyhow::{Result, anyhow, bail};
use std::sync::Arc;

use crate::pipeline::{Aggregator, JobDispatcher, RangeDispatcher, StopHandle};
use crate::rule::RuleExpr;
use crate::types::{Artifact, ExportJob, GameDesc, MatchResult, SearchPlan, Termination};

use super::process::ProcessWorker;
use super::{FindInput, Generator, Oracle, OracleWorker, SearchSink, WorkerRequest, WorkerResponse};

/// Builds the worker for a slot index. Called on the dispatching thread before any work starts.
pub type WorkerFactory = Arc<dyn Fn(usize) -> Result<Box<dyn OracleWorker + Send>> + Send + Sync>;

/// Adapts an in-process [`Generator`] to the worker protocol, keeping the game and rule of the
/// last `find` so `next` only carries a seed.
pub struct GeneratorWorker<G> {
    generator: G,
    context: Option<(GameDesc, RuleExpr)>,
}

impl<G: Generator> GeneratorWorker<G> {
    pub fn new(generator: G) -> Self {
        Self {
            generator,
            context: None,
        }
    }

    fn find(&mut self, game: &GameDesc, rule: &RuleExpr) -> Result<WorkerResponse> {
        let indexes = self.generator.find(game, rule)?;
        Ok(WorkerResponse::Find {
            data: MatchResult {
                seed: game.seed,
                indexes,
            },
        })
    }
}

impl<G: Generator> OracleWorker for GeneratorWorker<G> {
    fn call(&mut self, request: &WorkerRequest) -> Result<WorkerResponse> {
        match request {
            WorkerRequest::Generate(game) => Ok(WorkerResponse::Generate {
                data: self.generator.generate(game)?,
            }),
            WorkerRequest::Find(FindInput { game, rule }) => {
                let response = self.find(game, rule)?;
                self.context = Some((game.clone(), rule.clone()));
                Ok(response)
            }
            WorkerRequest::Next(seed) => {
                let Some((game, rule)) = self.context.take() else {
                    bail!("'next' for seed {} before any 'find'", seed);
                };
                let response = self.find(&game.with_seed(*seed), &rule);
                self.context = Some((game, rule));
                response
            }
        }
    }
}

/// Oracle backed by a pool of local workers.
#[derive(Clone)]
pub struct LocalOracle {
    factory: WorkerFactory,
}

impl LocalOracle {
    pub fn new(factory: WorkerFactory) -> Self {
        Self { factory }
    }

    /// Every slot gets its own generator from `make`.
    pub fn with_generator<G, F>(make: F) -> Self
    where
        G: Generator + Send + 'static,
        F: Fn() -> G + Send + Sync + 'static,
    {
        Self::new(Arc::new(move |_slot| {
            Ok(Box::new(GeneratorWorker::new(make())) as Box<dyn OracleWorker + Send>)
        }))
    }

    /// Every slot runs its own child process (`program args..`) speaking the worker protocol.
    pub fn with_command(program: String, args: Vec<String>) -> Self {
        Self::new(Arc::new(move |slot| {
            let worker = ProcessWorker::spawn(&program, &args)
                .map_err(|e| e.context(format!("start worker process for slot {}", slot)))?;
            Ok(Box::new(worker) as Box<dyn OracleWorker + Send>)
        }))
    }

    /// Generate every job's artifact with `concurrency` workers and hand them to `aggregator`.
    /// Returns `None` when stopped before every job finished.
    pub fn export<A, P>(
        &self,
        jobs: Vec<ExportJob>,
        game: &GameDesc,
        all_stars: bool,
        concurrency: usize,
        stop: &StopHandle,
        aggregator: A,
        on_progress: P,
    ) -> Result<Option<A::Output>>
    where
        A: Aggregator,
        P: FnMut(usize, usize),
    {
        let factory = Arc::clone(&self.factory);
        JobDispatcher::new(jobs, game, all_stars, concurrency, |slot| factory(slot))?
            .run(stop, aggregator, on_progress)
    }
}

impl Oracle for LocalOracle {
    fn generate(&self, game: &GameDesc) -> Result<Artifact> {
        let mut worker = (self.factory)(0)?;
        match worker.call(&WorkerRequest::Generate(game.clone()))? {
            WorkerResponse::Generate { data } => Ok(data),
            WorkerResponse::Error { message } => Err(anyhow!(
                "generate failed for seed {}: {}",
                game.seed,
                message
            )),
            other => Err(anyhow!(
                "unexpected response to generate for seed {}: {:?}",
                game.seed,
                other
            )),
        }
    }

    fn search(
        &self,
        plan: &SearchPlan,
        stop: &StopHandle,
        sink: &mut dyn SearchSink,
    ) -> Result<Termination> {
        let factory = Arc::clone(&self.factory);
        RangeDispatcher::new(plan, |slot| factory(slot))?.run(stop, sink)
    }
}
