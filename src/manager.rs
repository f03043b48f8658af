use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::AbacusDb;

/// Runtime sizing derived from the host.
#[derive(Debug, Clone)]
pub struct SystemProfile {
    pub logical_cores: usize,
    pub worker_threads: usize,
    pub strict_durability: bool, // true = fsync, false = OS buffer (faster)
}

impl SystemProfile {
    pub fn detect() -> Self {
        Self::for_cores(thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
    }

    pub fn for_cores(cores: usize) -> Self {
        // Potato mode: a single core can't afford an fsync per request.
        if cores <= 1 {
            warn!(cores, "CPU constraint detected, disabling fsync per write");
            return Self {
                logical_cores: cores,
                worker_threads: 2, // 1 compute + 1 I/O
                strict_durability: false,
            };
        }

        Self {
            logical_cores: cores,
            worker_threads: cores,
            strict_durability: true,
        }
    }

    /// Applies an explicit durability choice over the detected one.
    pub fn with_durability(mut self, strict: Option<bool>) -> Self {
        if let Some(strict) = strict {
            self.strict_durability = strict;
        }
        self
    }
}

/// Starts the background compaction thread. A pass is skipped when the log
/// has nothing to reclaim.
pub fn start_compaction_thread(db: Arc<AbacusDb>, interval: Duration) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        info!(interval_secs = interval.as_secs(), "Background compaction thread started");
        loop {
            thread::sleep(interval);

            if db.garbage() == 0 {
                continue;
            }
            if let Err(e) = db.compact() {
                error!(error = %e, "Compaction failed");
            }
        }
    })
}
