use std::time::Duration;

use crate::core::config::BackoffConfig;

/// Sleep every `SLEEP_EVERY`-th step once past the yield threshold.
const SLEEP_EVERY: u32 = 10;

/// Escalating backoff for retry loops.
///
/// Starts by busy-spinning with `spin_loop` hints, doubling the burst on
/// every step, then hands the core back to the scheduler with
/// `yield_now`, and finally sleeps periodically so a stalled peer on the
/// same core gets to run.
#[derive(Debug, Clone)]
pub struct SpinWait {
    count: u32,
    spin_limit: u32,
    yield_limit: u32,
    sleep: Duration,
}

impl Default for SpinWait {
    fn default() -> Self {
        Self::new(&BackoffConfig::default())
    }
}

impl SpinWait {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            count: 0,
            spin_limit: config.spin_limit,
            yield_limit: config.yield_limit,
            sleep: config.sleep,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// True when the next `spin_once` gives up the CPU instead of spinning.
    pub fn will_yield(&self) -> bool {
        self.count >= self.yield_limit
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn spin_once(&mut self) {
        if self.will_yield() {
            let past = self.count - self.yield_limit;
            if !self.sleep.is_zero() && past % SLEEP_EVERY == SLEEP_EVERY - 1 {
                std::thread::sleep(self.sleep);
            } else {
                std::thread::yield_now();
            }
        } else {
            let spins = 1u32 << self.count.min(self.spin_limit);
            for _ in 0..spins {
                // Frees execution resources for the sibling hyper-thread.
                std::hint::spin_loop();
            }
        }
        self.count = self.count.saturating_add(1);
    }

    /// Spin without ever sleeping; used where the awaited peer holds no lock.
    pub fn spin_no_sleep(&mut self) {
        if self.will_yield() {
            std::thread::yield_now();
            self.count = self.count.saturating_add(1);
        } else {
            self.spin_once();
        }
    }
}
