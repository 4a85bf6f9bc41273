//! Progress bar utilities for search frontier and export count

use kdam::{Animation, Bar, BarExt};
use std::sync::{Arc, Mutex};

// Progress bar type alias
pub type ProgressBar = Arc<Mutex<Bar>>;

/// Configuration for creating a progress bar
pub struct ProgressBarConfig {
    pub total: usize,
    pub desc: &'static str,
    pub unit: &'static str,
    pub animation: Animation,
}

impl ProgressBarConfig {
    /// Create a new progress bar configuration
    pub fn new(total: usize, desc: &'static str, unit: &'static str) -> Self {
        Self {
            total,
            desc,
            unit,
            animation: Animation::Classic,
        }
    }
}

/// Create a progress bar with the given configuration
pub fn create_progress_bar(config: ProgressBarConfig) -> ProgressBar {
    Arc::new(Mutex::new(kdam::tqdm!(
        total = config.total,
        desc = config.desc,
        unit = config.unit,
        animation = config.animation
    )))
}

/// Move the bar to absolute position `n`. Uses try_lock; a contended update is skipped and
/// the next one catches up.
pub fn set_progress(pb: &ProgressBar, n: usize) {
    if let Ok(mut bar) = pb.try_lock() {
        let _ = bar.update_to(n);
    }
}

/// Print a line above the bar without breaking it.
pub fn write_above(pb: &ProgressBar, line: String) {
    match pb.lock() {
        Ok(mut bar) => {
            let _ = bar.write(line);
        }
        Err(_) => eprintln!("{}", line),
    }
}

/// Final refresh and newline so following output starts on a fresh line.
pub fn finish_bar(pb: &ProgressBar) {
    if let Ok(mut bar) = pb.lock() {
        let _ = bar.refresh();
        eprintln!();
    }
}
