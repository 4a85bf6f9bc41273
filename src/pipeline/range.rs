//! Range dispatcher: scans `[start, end)` over a worker pool and keeps the frontier.
//!
//! All scheduling state (cursor, frontier, pending set, autosave ticker) lives on the calling
//! thread. Workers only answer requests; the loop reacts to their completions and to ticks.

use anyhow::{Result, anyhow, bail};
use crossbeam_channel::{Receiver, select, tick};
use log::{debug, info, warn};
use std::time::{Duration, Instant};

use crate::oracle::{FindInput, OracleWorker, SearchSink, WorkerRequest, WorkerResponse};
use crate::types::{MatchResult, SearchPlan, Termination};
use crate::utils::config::DispatchConsts;

use super::frontier::{Advance, Frontier};
use super::pool::{Completion, SlotEvent, WorkerPool};
use super::StopHandle;

/// Clamp the requested concurrency to the range size. Rejects zero and empty ranges.
pub fn effective_concurrency(plan: &SearchPlan) -> Result<usize> {
    if plan.concurrency < 1 {
        bail!("concurrency must be at least 1");
    }
    if plan.range.is_empty() {
        bail!(
            "empty seed range [{}, {})",
            plan.range.start,
            plan.range.end
        );
    }
    Ok(plan.concurrency.min(plan.range.len() as usize))
}

/// Autosave cadence as a ticker period (never zero).
pub fn autosave_interval(seconds: f64) -> Duration {
    if seconds.is_finite() && seconds > 0.0 {
        Duration::from_secs_f64(seconds).max(DispatchConsts::MIN_TICK)
    } else {
        Duration::from_secs_f64(DispatchConsts::DEFAULT_AUTOSAVE_SECS)
    }
}

/// Counters for one run, logged at the end.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct DispatchStats {
    evaluated: u64,
    matched: u64,
    inconsistencies: u64,
    /// Highest number of simultaneously in-flight requests observed.
    peak_in_flight: usize,
}

/// Scans one [`SearchPlan`] with a fixed set of workers.
pub struct RangeDispatcher<'a> {
    plan: &'a SearchPlan,
    pool: WorkerPool,
    frontier: Frontier,
    cursor: u32,
    /// Slots that already received their `find` (rule is warm; later seeds go as `next`).
    primed: Vec<bool>,
    failure: Option<anyhow::Error>,
    stats: DispatchStats,
}

impl<'a> RangeDispatcher<'a> {
    /// Validate the plan and start `min(concurrency, range size)` workers built by `make_worker`.
    /// Nothing is dispatched until [`run`](Self::run).
    pub fn new<F>(plan: &'a SearchPlan, mut make_worker: F) -> Result<Self>
    where
        F: FnMut(usize) -> Result<Box<dyn OracleWorker + Send>>,
    {
        let threads = effective_concurrency(plan)?;
        let workers = (0..threads)
            .map(&mut make_worker)
            .collect::<Result<Vec<_>>>()?;
        debug!(
            "range [{}, {}) with {} worker(s), autosave {}s",
            plan.range.start, plan.range.end, threads, plan.autosave
        );
        Ok(Self {
            plan,
            pool: WorkerPool::spawn(workers),
            frontier: Frontier::new(plan.range),
            cursor: plan.range.start,
            primed: vec![false; threads],
            failure: None,
            stats: DispatchStats::default(),
        })
    }

    fn halted(&self, stop: &StopHandle) -> bool {
        self.failure.is_some() || stop.is_stopped()
    }

    fn fail(&mut self, err: anyhow::Error) {
        match self.failure {
            None => self.failure = Some(err),
            Some(_) => warn!("additional failure while draining: {:#}", err),
        }
    }

    /// Give `slot` the next seed, or release it when there is nothing (more) to do.
    fn assign_next(&mut self, slot: usize, stop: &StopHandle) {
        if self.halted(stop) || self.cursor >= self.plan.range.end {
            self.pool.release(slot);
            return;
        }
        let seed = self.cursor;
        let request = if self.primed[slot] {
            WorkerRequest::Next(seed)
        } else {
            WorkerRequest::Find(FindInput {
                game: self.plan.game.with_seed(seed),
                rule: self.plan.rule.clone(),
            })
        };
        match self.pool.dispatch(slot, request) {
            Ok(()) => {
                self.cursor += 1;
                self.primed[slot] = true;
                self.stats.peak_in_flight = self.stats.peak_in_flight.max(self.pool.in_flight());
            }
            Err(e) => {
                self.pool.release(slot);
                self.fail(e);
            }
        }
    }

    /// Account for one evaluated seed and forward matches.
    fn accept(&mut self, seed: u32, mut result: MatchResult, sink: &mut dyn SearchSink) {
        if result.seed != seed {
            warn!(
                "worker answered seed {} while evaluating seed {}; using {}",
                result.seed, seed, seed
            );
            self.stats.inconsistencies += 1;
            result.seed = seed;
        }
        match self.frontier.advance(seed) {
            Advance::Moved(_) | Advance::Pending => {}
            Advance::Duplicate | Advance::OutOfRange => {
                warn!(
                    "ignoring completion for seed {} (frontier {}, end {})",
                    seed,
                    self.frontier.current(),
                    self.frontier.end()
                );
                self.stats.inconsistencies += 1;
                return;
            }
        }
        self.stats.evaluated += 1;
        if result.is_match() {
            self.stats.matched += 1;
            if let Err(e) = sink.on_result(result) {
                self.fail(e);
            }
        }
    }

    fn on_completion(
        &mut self,
        completion: Completion,
        stop: &StopHandle,
        sink: &mut dyn SearchSink,
    ) {
        let Completion { slot, event } = completion;
        let Some(seed) = self.pool.complete(slot) else {
            warn!("completion from idle worker {}", slot);
            self.stats.inconsistencies += 1;
            return;
        };
        match event {
            SlotEvent::Response(Ok(WorkerResponse::Find { data })) => {
                self.accept(seed, data, sink);
                self.assign_next(slot, stop);
            }
            SlotEvent::Response(Ok(WorkerResponse::Error { message })) => {
                self.pool.release(slot);
                self.fail(anyhow!("worker {} failed on seed {}: {}", slot, seed, message));
            }
            SlotEvent::Response(Ok(other)) => {
                self.pool.release(slot);
                self.fail(anyhow!(
                    "worker {} sent an unexpected response for seed {}: {:?}",
                    slot,
                    seed,
                    other
                ));
            }
            SlotEvent::Response(Err(e)) => {
                self.pool.release(slot);
                self.fail(e.context(format!("worker {} failed on seed {}", slot, seed)));
            }
            SlotEvent::Lost => {
                self.pool.release(slot);
                self.fail(anyhow!("worker {} died while evaluating seed {}", slot, seed));
            }
        }
    }

    /// Run until the range is exhausted or stopped, and every in-flight seed has drained.
    ///
    /// `sink.on_progress` fires on the autosave cadence when something changed, and once more
    /// after draining. Returns `Completed` only when the frontier reached the end.
    pub fn run(mut self, stop: &StopHandle, sink: &mut dyn SearchSink) -> Result<Termination> {
        let started = Instant::now();
        let ticker: Receiver<Instant> = tick(autosave_interval(self.plan.autosave));
        let completions = self.pool.completions().clone();

        for slot in 0..self.pool.size() {
            self.assign_next(slot, stop);
        }

        let mut reported = self.frontier.current();
        let mut reported_matches = 0_u64;
        let mut last_activity = Instant::now();
        let mut stall_warned = false;

        while self.pool.in_flight() > 0 {
            select! {
                recv(completions) -> msg => {
                    let Ok(completion) = msg else {
                        self.fail(anyhow!("worker pool channel closed"));
                        break;
                    };
                    last_activity = Instant::now();
                    stall_warned = false;
                    self.on_completion(completion, stop, sink);
                }
                recv(ticker) -> _ => {
                    let current = self.frontier.current();
                    if current != reported || self.stats.matched != reported_matches {
                        if let Err(e) = sink.on_progress(current) {
                            self.fail(e);
                        }
                        reported = current;
                        reported_matches = self.stats.matched;
                    }
                    if !stall_warned && last_activity.elapsed() >= DispatchConsts::STALL_WARN {
                        warn!(
                            "no worker has answered for {:?}; {} seed(s) in flight",
                            last_activity.elapsed(),
                            self.pool.in_flight()
                        );
                        stall_warned = true;
                    }
                }
            }
        }

        if let Err(e) = sink.on_progress(self.frontier.current()) {
            self.fail(e);
        }
        let stats = self.stats;
        let frontier = self.frontier.current();
        let pending = self.frontier.pending_len();
        let failure = self.failure.take();
        self.pool.shutdown()?;

        debug!(
            "range done in {:?}: {} evaluated, {} matched, frontier {}, {} pending, peak {} in flight, {} inconsistencies",
            started.elapsed(),
            stats.evaluated,
            stats.matched,
            frontier,
            pending,
            stats.peak_in_flight,
            stats.inconsistencies
        );
        if let Some(err) = failure {
            return Err(err);
        }
        if frontier >= self.plan.range.end {
            info!("Scanned [{}, {})", self.plan.range.start, self.plan.range.end);
            Ok(Termination::Completed)
        } else {
            info!(
                "Stopped at seed {} of [{}, {})",
                frontier, self.plan.range.start, self.plan.range.end
            );
            Ok(Termination::Interrupted)
        }
    }
}
