//! Fixed-size worker pool: one thread per slot, one request in flight per slot.
//!
//! The dispatcher owns the slot table. Workers share nothing with each other; each reads its
//! own request channel and reports on one shared completion channel tagged with its slot.

use anyhow::{Result, anyhow, bail};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use log::{debug, warn};
use std::thread::{self, JoinHandle};

use crate::oracle::{OracleWorker, WorkerRequest, WorkerResponse};

/// What a slot reported.
#[derive(Debug)]
pub enum SlotEvent {
    Response(Result<WorkerResponse>),
    /// The worker thread died (panicked) with a request in flight.
    Lost,
}

/// One message on the completion channel.
#[derive(Debug)]
pub struct Completion {
    pub slot: usize,
    pub event: SlotEvent,
}

struct Slot {
    /// None once released; dropping the sender ends the worker thread.
    request_tx: Option<Sender<WorkerRequest>>,
    /// Seed of the request currently being evaluated.
    in_flight: Option<u32>,
    handle: Option<JoinHandle<()>>,
}

/// Sends [`SlotEvent::Lost`] if the worker thread unwinds.
struct LostGuard {
    slot: usize,
    completion_tx: Sender<Completion>,
}

impl Drop for LostGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            let _ = self.completion_tx.send(Completion {
                slot: self.slot,
                event: SlotEvent::Lost,
            });
        }
    }
}

fn worker_loop(
    slot: usize,
    mut worker: Box<dyn OracleWorker + Send>,
    request_rx: Receiver<WorkerRequest>,
    completion_tx: Sender<Completion>,
) {
    let _guard = LostGuard {
        slot,
        completion_tx: completion_tx.clone(),
    };
    while let Ok(request) = request_rx.recv() {
        let event = SlotEvent::Response(worker.call(&request));
        if completion_tx.send(Completion { slot, event }).is_err() {
            break;
        }
    }
    debug!("worker {} released", slot);
}

/// Pool of isolated workers. Build with [`WorkerPool::spawn`], drive with `dispatch` /
/// `complete` / `release`, and finish with [`WorkerPool::shutdown`].
pub struct WorkerPool {
    slots: Vec<Slot>,
    completion_rx: Receiver<Completion>,
}

impl WorkerPool {
    /// Start one thread per worker. Slot `i` runs `workers[i]`.
    pub fn spawn(workers: Vec<Box<dyn OracleWorker + Send>>) -> Self {
        let (completion_tx, completion_rx) = unbounded::<Completion>();
        let slots = workers
            .into_iter()
            .enumerate()
            .map(|(slot, worker)| {
                let (request_tx, request_rx) = bounded::<WorkerRequest>(1);
                let completion_tx = completion_tx.clone();
                let handle = thread::Builder::new()
                    .name(format!("{}-worker-{}", env!("CARGO_PKG_NAME"), slot))
                    .spawn(move || worker_loop(slot, worker, request_rx, completion_tx));
                match handle {
                    Ok(handle) => Slot {
                        request_tx: Some(request_tx),
                        in_flight: None,
                        handle: Some(handle),
                    },
                    Err(e) => {
                        warn!("could not start worker {}: {}", slot, e);
                        Slot {
                            request_tx: None,
                            in_flight: None,
                            handle: None,
                        }
                    }
                }
            })
            .collect();
        Self {
            slots,
            completion_rx,
        }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Number of requests currently being evaluated.
    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| s.in_flight.is_some()).count()
    }

    /// Shared completion channel; select on it to wait for any worker.
    pub fn completions(&self) -> &Receiver<Completion> {
        &self.completion_rx
    }

    /// Hand `request` to an idle slot.
    pub fn dispatch(&mut self, slot: usize, request: WorkerRequest) -> Result<()> {
        let s = self
            .slots
            .get_mut(slot)
            .ok_or_else(|| anyhow!("no worker slot {}", slot))?;
        if let Some(seed) = s.in_flight {
            bail!("worker {} is still evaluating seed {}", slot, seed);
        }
        let tx = s
            .request_tx
            .as_ref()
            .ok_or_else(|| anyhow!("worker {} is not running", slot))?;
        let seed = request.seed();
        tx.send(request)
            .map_err(|_| anyhow!("worker {} exited before accepting seed {}", slot, seed))?;
        s.in_flight = Some(seed);
        Ok(())
    }

    /// Mark `slot` idle after its completion arrived. Returns the seed it was evaluating.
    pub fn complete(&mut self, slot: usize) -> Option<u32> {
        self.slots.get_mut(slot).and_then(|s| s.in_flight.take())
    }

    /// Stop giving work to `slot`; its thread exits once idle.
    pub fn release(&mut self, slot: usize) {
        if let Some(s) = self.slots.get_mut(slot) {
            s.request_tx = None;
        }
    }

    /// Release every slot and join the worker threads. Call only once nothing is in flight.
    pub fn shutdown(mut self) -> Result<()> {
        let mut panicked = 0_usize;
        for s in self.slots.iter_mut() {
            s.request_tx = None;
            if let Some(handle) = s.handle.take()
                && handle.join().is_err()
            {
                panicked += 1;
            }
        }
        if panicked > 0 {
            warn!("{} worker thread(s) panicked", panicked);
        }
        Ok(())
    }
}
