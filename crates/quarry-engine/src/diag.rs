use std::io::Write;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A progress report for a long scan. `total` is absent when the source
/// cannot count its rows up front.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub processed: u64,
    pub total: Option<u64>,
}

impl Progress {
    pub fn percent(&self) -> Option<f64> {
        self.total
            .filter(|total| *total > 0)
            .map(|total| (self.processed as f64 / total as f64) * 100.0)
    }
}

/// Where warnings and progress go. Result rows never pass through here,
/// so sink output can never interleave with them.
pub trait DiagnosticSink: Send + Sync {
    fn warning(&self, message: &str);
    fn progress(&self, progress: &Progress);
}

/// Swallows everything; the default when an embedder wires nothing up.
#[derive(Debug, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn warning(&self, _message: &str) {}
    fn progress(&self, _progress: &Progress) {}
}

/// Writes to the process error stream, the way an interactive shell
/// embeds the engine.
#[derive(Debug, Default)]
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn warning(&self, message: &str) {
        log::warn!("{}", message);
        let _ = writeln!(std::io::stderr(), "warning: {}", message);
    }

    fn progress(&self, progress: &Progress) {
        match progress.percent() {
            Some(percent) => {
                let _ = write!(
                    std::io::stderr(),
                    "\r{} rows ({:.0}%)",
                    progress.processed,
                    percent
                );
            }
            None => {
                let _ = write!(std::io::stderr(), "\r{} rows", progress.processed);
            }
        }
        let _ = std::io::stderr().flush();
    }
}

/// Captures everything for inspection; what the tests use.
#[derive(Debug, Default)]
pub struct CollectingSink {
    warnings: Mutex<Vec<String>>,
    progress: Mutex<Vec<Progress>>,
}

impl CollectingSink {
    pub fn new() -> CollectingSink {
        CollectingSink::default()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().expect("sink lock poisoned").clone()
    }

    pub fn progress_reports(&self) -> Vec<Progress> {
        self.progress.lock().expect("sink lock poisoned").clone()
    }
}

impl DiagnosticSink for CollectingSink {
    fn warning(&self, message: &str) {
        self.warnings
            .lock()
            .expect("sink lock poisoned")
            .push(message.to_string());
    }

    fn progress(&self, progress: &Progress) {
        self.progress
            .lock()
            .expect("sink lock poisoned")
            .push(progress.clone());
    }
}

/// Rate-limits progress emission to at most one report per interval.
pub struct ProgressTicker<'a> {
    interval: Duration,
    last: Instant,
    total: Option<u64>,
    sink: &'a dyn DiagnosticSink,
}

impl<'a> ProgressTicker<'a> {
    pub fn new(interval: Duration, total: Option<u64>, sink: &'a dyn DiagnosticSink) -> Self {
        ProgressTicker {
            interval,
            last: Instant::now(),
            total,
            sink,
        }
    }

    pub fn tick(&mut self, processed: u64) {
        if self.last.elapsed() >= self.interval {
            self.sink.progress(&Progress {
                processed,
                total: self.total,
            });
            self.last = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_needs_a_total() {
        assert_eq!(
            Progress {
                processed: 50,
                total: Some(200)
            }
            .percent(),
            Some(25.0)
        );
        assert_eq!(
            Progress {
                processed: 50,
                total: None
            }
            .percent(),
            None
        );
    }

    #[test]
    fn collecting_sink_keeps_messages_in_order() {
        let sink = CollectingSink::new();
        sink.warning("first");
        sink.warning("second");

        assert_eq!(sink.warnings(), vec!["first", "second"]);
    }
}
