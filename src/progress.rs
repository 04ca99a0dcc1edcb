//! Progress reporting, for the purpose of display to the user.

use crate::trace::Timings;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Trait for progress notifications.  Notifications arrive from worker
/// threads, so implementations synchronize internally.
pub trait Progress: Sync {
    /// Called before a node is hashed.
    fn hashing(&self, node: &str);

    /// Called before a generation iteration of a package.
    fn generating(&self, pkg: &str);

    /// Called when a generator process starts.
    fn generator_started(&self, dir: &Path, args: &[String]);

    /// Called when a generator process finishes, with its captured output.
    fn generator_finished(&self, args: &[String], output: &[u8]);

    /// A -traceTime event.
    fn timing(&self, msg: &str);

    /// Whether generator output should go straight to the console rather
    /// than be captured.
    fn stream_output(&self) -> bool;
}

/// Progress for the console: silent by default, a line per event with
/// -trace, timing lines with -traceTime.
pub struct ConsoleProgress {
    trace: bool,
    timings: Option<Mutex<Timings>>,
}

impl ConsoleProgress {
    pub fn new(trace: bool, trace_time: bool) -> Self {
        ConsoleProgress {
            // -traceTime replaces -trace's event lines.
            trace: trace && !trace_time,
            timings: if trace_time {
                Some(Mutex::new(Timings::new()))
            } else {
                None
            },
        }
    }

    fn eprintln(&self, msg: &str) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", msg);
    }
}

impl Progress for ConsoleProgress {
    fn hashing(&self, node: &str) {
        if self.trace {
            self.eprintln(&format!("hash {}", node));
        }
    }

    fn generating(&self, pkg: &str) {
        if self.trace {
            self.eprintln(&format!("generate {}", pkg));
        }
    }

    fn generator_started(&self, dir: &Path, args: &[String]) {
        if self.trace {
            self.eprintln(&format!("run generator: {} (in {})", args.join(" "), dir.display()));
        }
    }

    fn generator_finished(&self, args: &[String], output: &[u8]) {
        if self.trace {
            let mut msg = format!("ran generator: {}", args.join(" "));
            if !output.is_empty() {
                msg.push('\n');
                msg.push_str(String::from_utf8_lossy(output).trim_end());
            }
            self.eprintln(&msg);
        }
    }

    fn timing(&self, msg: &str) {
        if let Some(timings) = &self.timings {
            let line = match timings.lock() {
                Ok(mut t) => t.line(msg),
                Err(_) => return,
            };
            self.eprintln(&line);
        }
    }

    fn stream_output(&self) -> bool {
        self.trace
    }
}
