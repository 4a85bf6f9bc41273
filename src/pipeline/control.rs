//! Cooperative stop signal shared between the caller and a running dispatcher.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cloneable stop flag. Dispatchers check it before every new assignment; work already handed
/// to a worker always runs to completion.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Idempotent.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Route Ctrl+C to this handle. The handler can only be installed once per process (CLI).
    pub fn stop_on_ctrlc(&self) -> Result<()> {
        let flag = Arc::clone(&self.0);
        ctrlc::set_handler(move || {
            log::info!("Stop requested (Ctrl+C); letting in-flight seeds finish...");
            flag.store(true, Ordering::SeqCst);
        })
        .context("set Ctrl+C handler")
    }
}
