//! Resumable search: validates a checkpoint request, resumes from the stored frontier, runs the
//! oracle and persists matches and progress on the autosave cadence.

use anyhow::{Result, bail};
use log::{debug, info, warn};

use crate::oracle::{Oracle, SearchSink};
use crate::pipeline::StopHandle;
use crate::types::{Checkpoint, MatchResult, SearchPlan, SeedRange, Termination};
use crate::utils::config::ProductLimits;

/// Durable checkpoint storage.
pub trait CheckpointStore {
    fn load(&mut self, id: &str) -> Result<Option<Checkpoint>>;

    /// Record `new_matches` and, unless `checkpoint.current` is behind the stored frontier,
    /// the checkpoint itself. Returns whether the stored frontier was written.
    ///
    /// The store owns `found`: the number of distinct matched seeds it holds. The value passed
    /// in `checkpoint.found` is only the last count read back.
    fn save(&mut self, checkpoint: &Checkpoint, new_matches: &[MatchResult]) -> Result<bool>;
}

/// Run callbacks. Exactly one of `on_complete`, `on_interrupt`, `on_error` fires per run that
/// passed validation.
pub trait SearchObserver {
    fn on_result(&mut self, _result: &MatchResult) {}
    /// Frontier after the matches up to it were saved.
    fn on_progress(&mut self, _frontier: u32) {}
    fn on_complete(&mut self) {}
    fn on_interrupt(&mut self) {}
    fn on_error(&mut self, _cause: &anyhow::Error) {}
}

impl SearchObserver for () {}

/// Reject settings no run can start with.
pub fn validate_checkpoint(cp: &Checkpoint) -> Result<()> {
    if cp.id.trim().is_empty() {
        bail!("checkpoint id is empty");
    }
    if cp.start >= cp.end {
        bail!("empty seed range [{}, {})", cp.start, cp.end);
    }
    if cp.end > ProductLimits::MAX_SEED {
        bail!(
            "range end {} exceeds the maximum seed {}",
            cp.end,
            ProductLimits::MAX_SEED
        );
    }
    if cp.current > cp.end {
        bail!("frontier {} is past the range end {}", cp.current, cp.end);
    }
    if cp.concurrency < 1 {
        bail!("concurrency must be at least 1");
    }
    if !(cp.autosave.is_finite() && cp.autosave > 0.0) {
        bail!("autosave must be a positive number of seconds, got {}", cp.autosave);
    }
    if !(ProductLimits::MIN_STAR_COUNT..=ProductLimits::MAX_STAR_COUNT).contains(&cp.star_count) {
        bail!(
            "star count {} outside {}..={}",
            cp.star_count,
            ProductLimits::MIN_STAR_COUNT,
            ProductLimits::MAX_STAR_COUNT
        );
    }
    if !(cp.resource_multiplier.is_finite() && cp.resource_multiplier > 0.0) {
        bail!("resource multiplier must be positive, got {}", cp.resource_multiplier);
    }
    cp.rule.validate()?;
    debug!(
        "{}: rule '{}' with {} leaf predicate(s)",
        cp.id,
        cp.rule.kind(),
        cp.rule.leaf_count()
    );
    Ok(())
}

/// Buffers matches between ticks; each tick saves them together with the frontier.
struct CheckpointRecorder<'a> {
    store: &'a mut dyn CheckpointStore,
    observer: &'a mut dyn SearchObserver,
    record: Checkpoint,
    buffered: Vec<MatchResult>,
}

impl CheckpointRecorder<'_> {
    fn flush(&mut self) -> Result<bool> {
        let advanced = self.store.save(&self.record, &self.buffered)?;
        self.buffered.clear();
        // the store counts distinct seeds; re-found ones are not added twice
        if let Some(stored) = self.store.load(&self.record.id)? {
            self.record.found = stored.found;
        }
        Ok(advanced)
    }
}

impl SearchSink for CheckpointRecorder<'_> {
    fn on_result(&mut self, result: MatchResult) -> Result<()> {
        self.observer.on_result(&result);
        self.buffered.push(result);
        Ok(())
    }

    fn on_progress(&mut self, frontier: u32) -> Result<()> {
        self.record.current = self.record.current.max(frontier);
        self.flush()?;
        self.observer.on_progress(self.record.current);
        Ok(())
    }
}

/// Scan `request`'s range, resuming at `max(stored.current, request.start)`.
///
/// Invalid settings return `Err` before anything is spawned or any callback fires. Otherwise
/// the outcome is also reported to `observer`, and matches seen before a failure are saved.
pub fn run_search(
    oracle: &dyn Oracle,
    store: &mut dyn CheckpointStore,
    request: &Checkpoint,
    stop: &StopHandle,
    observer: &mut dyn SearchObserver,
) -> Result<Termination> {
    validate_checkpoint(request)?;

    let stored = store.load(&request.id)?;
    let (resume, found) = match &stored {
        Some(prev) => {
            if prev.rule != request.rule || prev.range() != request.range() {
                warn!(
                    "{}: settings changed since the last run; resuming at the stored frontier {}",
                    request.id, prev.current
                );
            }
            (prev.current.max(request.start), prev.found)
        }
        None => (request.start, 0),
    };
    let record = Checkpoint {
        current: resume.min(request.end),
        found,
        ..request.clone()
    };
    store.save(&record, &[])?;

    if record.current >= record.end {
        info!("{}: [{}, {}) already scanned", record.id, record.start, record.end);
        observer.on_progress(record.end);
        observer.on_complete();
        return Ok(Termination::Completed);
    }

    let plan = SearchPlan {
        range: SeedRange::new(record.current, record.end),
        game: record.game(),
        rule: record.rule.clone(),
        concurrency: record.concurrency,
        autosave: record.autosave,
    };
    debug!(
        "{} PLAN: {:?}",
        env!("CARGO_PKG_NAME").to_uppercase(),
        plan
    );
    if resume > request.start {
        info!("Resuming {} at seed {}", record.id, resume);
    }

    let mut recorder = CheckpointRecorder {
        store,
        observer,
        record,
        buffered: Vec::new(),
    };
    let mut outcome = oracle.search(&plan, stop, &mut recorder);
    if !recorder.buffered.is_empty()
        && let Err(e) = recorder.flush()
    {
        outcome = match outcome {
            Ok(_) => Err(e),
            Err(first) => {
                warn!("could not save matches after failure: {:#}", e);
                Err(first)
            }
        };
    }

    let CheckpointRecorder {
        observer, record, ..
    } = recorder;
    match outcome {
        Ok(Termination::Completed) => {
            info!("{}: {} match(es) in total", record.id, record.found);
            observer.on_complete();
            Ok(Termination::Completed)
        }
        Ok(Termination::Interrupted) => {
            info!(
                "{}: interrupted at seed {}, resume to continue",
                record.id, record.current
            );
            observer.on_interrupt();
            Ok(Termination::Interrupted)
        }
        Err(e) => {
            observer.on_error(&e);
            Err(e)
        }
    }
}
