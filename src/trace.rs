//! -traceTime output: elapsed and delta milliseconds before each event.

use std::time::Instant;

pub struct Timings {
    start: Instant,
    last: Instant,
}

impl Default for Timings {
    fn default() -> Self {
        Self::new()
    }
}

impl Timings {
    pub fn new() -> Self {
        let now = Instant::now();
        Timings {
            start: now,
            last: now,
        }
    }

    /// Format a line for msg, prefixed with the time since start and since
    /// the previous line.
    pub fn line(&mut self, msg: &str) -> String {
        let now = Instant::now();
        let line = format!(
            "{:>8.2}ms ({:>8.2}ms): {}",
            now.duration_since(self.start).as_secs_f64() * 1000.0,
            now.duration_since(self.last).as_secs_f64() * 1000.0,
            msg
        );
        self.last = now;
        line
    }
}
