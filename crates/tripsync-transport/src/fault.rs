//! Per-connection fault budget

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Tolerated malformed frames per window before disconnecting
#[derive(Debug, Clone)]
pub struct FaultConfig {
    pub limit: u32,
    pub window: Duration,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            limit: 5,
            window: Duration::from_secs(60),
        }
    }
}

struct FaultWindow {
    started: Instant,
    count: u32,
}

/// Counts protocol faults in a sliding window
///
/// A single malformed frame is logged and dropped; a client that keeps
/// sending garbage exhausts the budget and gets disconnected.
pub struct FaultBudget {
    config: FaultConfig,
    window: Mutex<FaultWindow>,
}

impl FaultBudget {
    pub fn new(config: FaultConfig) -> Self {
        Self {
            config,
            window: Mutex::new(FaultWindow {
                started: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Record one fault; returns true when the budget is exhausted
    pub fn record(&self) -> bool {
        let mut window = self.window.lock();
        if window.started.elapsed() >= self.config.window {
            window.started = Instant::now();
            window.count = 0;
        }
        window.count += 1;
        window.count > self.config.limit
    }

    pub fn count(&self) -> u32 {
        self.window.lock().count
    }
}

impl Default for FaultBudget {
    fn default() -> Self {
        Self::new(FaultConfig::default())
    }
}
