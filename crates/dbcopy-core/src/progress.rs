//! User-visible progress events and the context threaded through pipelines.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{DbcopyError, Result};

/// Minimal interval between in-loop progress lines.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

pub trait ProgressSink {
    fn info(&self, msg: &str);
    fn warn(&self, msg: &str);
}

/// Forwards progress to `tracing` and counts warnings.
#[derive(Debug, Default)]
pub struct LogProgress {
    warnings: AtomicUsize,
}

impl LogProgress {
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.warnings.load(Ordering::Relaxed)
    }
}

impl ProgressSink for LogProgress {
    fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    fn warn(&self, msg: &str) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("{msg}");
    }
}

/// Collects progress in memory.
#[derive(Debug, Default)]
pub struct MemoryProgress {
    infos: Mutex<Vec<String>>,
    warnings: Mutex<Vec<String>>,
}

impl MemoryProgress {
    #[must_use]
    pub fn infos(&self) -> Vec<String> {
        self.infos.lock().map(|v| v.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl ProgressSink for MemoryProgress {
    fn info(&self, msg: &str) {
        if let Ok(mut v) = self.infos.lock() {
            v.push(msg.to_string());
        }
    }

    fn warn(&self, msg: &str) {
        if let Ok(mut v) = self.warnings.lock() {
            v.push(msg.to_string());
        }
    }
}

/// Throttles "n of total: name" lines inside long loops.
#[derive(Debug)]
pub struct Periodic {
    last: Instant,
    interval: Duration,
}

impl Periodic {
    #[must_use]
    pub fn new() -> Self {
        Self::with_interval(PROGRESS_INTERVAL)
    }

    #[must_use]
    pub fn with_interval(interval: Duration) -> Self {
        Self { last: Instant::now(), interval }
    }

    /// Emit `"{n} of {total}: {name}"` if the interval has elapsed.
    pub fn tick(&mut self, sink: &dyn ProgressSink, n: usize, total: usize, name: &str) -> bool {
        if self.last.elapsed() < self.interval {
            return false;
        }
        self.last = Instant::now();
        sink.info(&format!("{n} of {total}: {name}"));
        true
    }
}

impl Default for Periodic {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation flag shared with whoever may stop the pipeline.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-invocation state passed explicitly into every pipeline.
pub struct Context<'a> {
    pub progress: &'a dyn ProgressSink,
    pub cancel: CancelFlag,
}

impl<'a> Context<'a> {
    #[must_use]
    pub fn new(progress: &'a dyn ProgressSink) -> Self {
        Self { progress, cancel: CancelFlag::default() }
    }

    /// # Errors
    /// Returns `Precondition` once cancellation was requested.
    pub fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(DbcopyError::precondition("operation cancelled"))
        } else {
            Ok(())
        }
    }

    pub fn info(&self, msg: &str) {
        self.progress.info(msg);
    }

    pub fn warn(&self, msg: &str) {
        self.progress.warn(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periodic_is_silent_within_interval() {
        let sink = MemoryProgress::default();
        let mut p = Periodic::with_interval(Duration::from_secs(3600));
        assert!(!p.tick(&sink, 1, 10, "ageSex"));
        let mut now = Periodic::with_interval(Duration::ZERO);
        assert!(now.tick(&sink, 3, 200, "salaryAge"));
        assert_eq!(sink.infos(), vec!["3 of 200: salaryAge".to_string()]);
    }

    #[test]
    fn cancelled_context_fails_with_precondition() {
        let sink = MemoryProgress::default();
        let ctx = Context::new(&sink);
        assert!(ctx.check_cancel().is_ok());
        ctx.cancel.cancel();
        match ctx.check_cancel() {
            Ok(()) => panic!("expected cancellation"),
            Err(err) => assert_eq!(err.to_string(), "operation cancelled"),
        }
    }

    #[test]
    fn log_progress_counts_warnings() {
        let sink = LogProgress::default();
        sink.info("Model run 5 myrun");
        sink.warn("task 1 model run(s) not found");
        assert_eq!(sink.warning_count(), 1);
    }
}
