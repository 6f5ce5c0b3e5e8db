//! Stage-to-percentage table and the progress reporter built on it

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Ingestion stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    VersionCheck,
    Fetch,
    Collect,
    Split,
    Embed,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::VersionCheck,
        Stage::Fetch,
        Stage::Collect,
        Stage::Split,
        Stage::Embed,
    ];

    /// Share of the overall 0..=100 scale owned by this stage
    pub const fn range(self) -> (u8, u8) {
        match self {
            Stage::VersionCheck => (0, 5),
            Stage::Fetch => (5, 45),
            Stage::Collect => (45, 60),
            Stage::Split => (60, 65),
            Stage::Embed => (65, 100),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Stage::VersionCheck => "version_check",
            Stage::Fetch => "fetch",
            Stage::Collect => "collect",
            Stage::Split => "split",
            Stage::Embed => "embed",
        }
    }

    /// Map a within-stage fraction onto the overall scale
    pub fn scale(self, fraction: f32) -> u8 {
        let (start, end) = self.range();
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        start + ((end - start) as f32 * fraction).floor() as u8
    }
}

/// Callback receiving a status line and an overall percentage
pub type ProgressFn = dyn Fn(&str, u8) + Send + Sync;

/// Forwards stage progress to a caller callback, never letting the percentage go down
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Arc<ProgressFn>,
    last: Arc<AtomicU8>,
}

impl ProgressReporter {
    pub fn new(callback: Arc<ProgressFn>) -> Self {
        Self {
            callback,
            last: Arc::new(AtomicU8::new(0)),
        }
    }

    /// A reporter that discards everything
    pub fn silent() -> Self {
        Self::new(Arc::new(|_: &str, _: u8| {}))
    }

    /// Report `fraction` of `stage` as done
    pub fn report(&self, stage: Stage, fraction: f32, message: &str) {
        self.emit(stage.scale(fraction), message);
    }

    /// Report the start of `stage`
    pub fn enter(&self, stage: Stage, message: &str) {
        tracing::info!("[{}] {}", stage.name(), message);
        self.report(stage, 0.0, message);
    }

    /// Final call of a successful run
    pub fn finish(&self, message: &str) {
        self.emit(100, message);
    }

    fn emit(&self, percent: u8, message: &str) {
        let percent = percent.min(100);
        let previous = self.last.fetch_max(percent, Ordering::SeqCst);
        (self.callback)(message, percent.max(previous));
    }
}
