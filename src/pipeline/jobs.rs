//! Job dispatcher: the export variant of the worker loop, over a finite job list.
//!
//! Progress is a completed count. Results are keyed by seed, so completion order does not
//! matter. The aggregator takes ownership of the result map and drops it when done.

use anyhow::{Result, anyhow, bail};
use log::{debug, warn};
use std::collections::HashMap;

use crate::oracle::{OracleWorker, WorkerRequest, WorkerResponse};
use crate::types::{Artifact, ExportJob, GameDesc};

use super::StopHandle;
use super::pool::{Completion, SlotEvent, WorkerPool};

/// Turns every generated artifact of an export into one output.
pub trait Aggregator {
    type Output;

    /// Called once, after every job finished. `artifacts` is consumed here so the large
    /// per-seed data is freed as soon as the output exists.
    fn aggregate(self, jobs: &[ExportJob], artifacts: HashMap<u32, Artifact>)
    -> Result<Self::Output>;
}

/// Generator request for one job. When only some stars are wanted, generation stops after
/// the highest wanted index.
pub fn job_request(job: &ExportJob, game: &GameDesc, all_stars: bool) -> WorkerRequest {
    let until = match all_stars {
        true => None,
        false => Some(job.indexes.iter().max().map_or(0, |m| m + 1)),
    };
    WorkerRequest::Generate(GameDesc {
        seed: job.seed,
        until,
        ..game.clone()
    })
}

/// Runs a job list through a worker pool.
pub struct JobDispatcher {
    jobs: Vec<ExportJob>,
    game: GameDesc,
    all_stars: bool,
    pool: WorkerPool,
    next_job: usize,
    completed: usize,
    artifacts: HashMap<u32, Artifact>,
    failure: Option<anyhow::Error>,
}

impl JobDispatcher {
    /// Start `min(concurrency, jobs)` workers built by `make_worker`.
    pub fn new<F>(
        jobs: Vec<ExportJob>,
        game: &GameDesc,
        all_stars: bool,
        concurrency: usize,
        mut make_worker: F,
    ) -> Result<Self>
    where
        F: FnMut(usize) -> Result<Box<dyn OracleWorker + Send>>,
    {
        if concurrency < 1 {
            bail!("concurrency must be at least 1");
        }
        let threads = concurrency.min(jobs.len());
        let workers = (0..threads)
            .map(&mut make_worker)
            .collect::<Result<Vec<_>>>()?;
        debug!("export of {} job(s) with {} worker(s)", jobs.len(), threads);
        let capacity = jobs.len();
        Ok(Self {
            jobs,
            game: game.clone(),
            all_stars,
            pool: WorkerPool::spawn(workers),
            next_job: 0,
            completed: 0,
            artifacts: HashMap::with_capacity(capacity),
            failure: None,
        })
    }

    fn fail(&mut self, err: anyhow::Error) {
        match self.failure {
            None => self.failure = Some(err),
            Some(_) => warn!("additional failure while draining: {:#}", err),
        }
    }

    fn assign_next(&mut self, slot: usize, stop: &StopHandle) {
        if self.failure.is_some() || stop.is_stopped() || self.next_job >= self.jobs.len() {
            self.pool.release(slot);
            return;
        }
        let request = job_request(&self.jobs[self.next_job], &self.game, self.all_stars);
        match self.pool.dispatch(slot, request) {
            Ok(()) => self.next_job += 1,
            Err(e) => {
                self.pool.release(slot);
                self.fail(e);
            }
        }
    }

    fn on_completion(&mut self, completion: Completion, stop: &StopHandle) -> bool {
        let Completion { slot, event } = completion;
        let Some(seed) = self.pool.complete(slot) else {
            warn!("completion from idle worker {}", slot);
            return false;
        };
        match event {
            SlotEvent::Response(Ok(WorkerResponse::Generate { data })) => {
                self.artifacts.insert(seed, data);
                self.completed += 1;
                self.assign_next(slot, stop);
                return true;
            }
            SlotEvent::Response(Ok(WorkerResponse::Error { message })) => {
                self.fail(anyhow!("worker {} failed on seed {}: {}", slot, seed, message));
            }
            SlotEvent::Response(Ok(other)) => {
                self.fail(anyhow!(
                    "worker {} sent an unexpected response for seed {}: {:?}",
                    slot,
                    seed,
                    other
                ));
            }
            SlotEvent::Response(Err(e)) => {
                self.fail(e.context(format!("worker {} failed on seed {}", slot, seed)));
            }
            SlotEvent::Lost => {
                self.fail(anyhow!("worker {} died while generating seed {}", slot, seed));
            }
        }
        self.pool.release(slot);
        false
    }

    /// Process every job, reporting `(completed, total)` after each one. Returns `None` when
    /// stopped before all jobs finished; otherwise the aggregator's output.
    pub fn run<A, P>(
        mut self,
        stop: &StopHandle,
        aggregator: A,
        mut on_progress: P,
    ) -> Result<Option<A::Output>>
    where
        A: Aggregator,
        P: FnMut(usize, usize),
    {
        let total = self.jobs.len();
        for slot in 0..self.pool.size() {
            self.assign_next(slot, stop);
        }
        let completions = self.pool.completions().clone();
        while self.pool.in_flight() > 0 {
            let Ok(completion) = completions.recv() else {
                self.fail(anyhow!("worker pool channel closed"));
                break;
            };
            if self.on_completion(completion, stop) {
                on_progress(self.completed, total);
            }
        }
        let failure = self.failure.take();
        self.pool.shutdown()?;
        if let Some(err) = failure {
            return Err(err);
        }
        if self.completed < total {
            debug!("export stopped after {} of {} job(s)", self.completed, total);
            return Ok(None);
        }
        let output = aggregator.aggregate(&self.jobs, self.artifacts)?;
        Ok(Some(output))
    }
}
