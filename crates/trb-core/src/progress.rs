//! Transfer progress: samples, bar rendering and the per-job update throttle.
//!
//! The chat transport enforces its own edit-rate limit, so a job reports at
//! most once per `min_interval`; only the terminal update bypasses it.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::{domain::MessageRef, messaging::port::MessagingPort, Result};

const BAR_SEGMENTS: usize = 10;

/// A point-in-time view of one job's progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressSample {
    pub bytes_done: u64,
    /// `0` when the total is unknown.
    pub bytes_total: u64,
    pub timestamp: Instant,
}

impl ProgressSample {
    pub fn percent(&self) -> f64 {
        if self.bytes_total == 0 {
            return 0.0;
        }
        (self.bytes_done as f64 / self.bytes_total as f64 * 100.0).min(100.0)
    }
}

/// Fixed-width bar, e.g. `█████░░░░░ 50.0%`.
pub fn render_bar(sample: &ProgressSample) -> String {
    let percent = sample.percent();
    let filled = ((percent / 10.0).floor() as usize).min(BAR_SEGMENTS);
    format!(
        "{}{} {percent:.1}%",
        "█".repeat(filled),
        "░".repeat(BAR_SEGMENTS - filled)
    )
}

/// Human-readable byte count (binary units).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for u in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = u;
    }
    format!("{value:.1} {unit}")
}

/// Rate-limiter for progress updates of a single job.
///
/// The window opens at job start: the first update is due `min_interval`
/// after the transfer began, not on the first chunk.
#[derive(Debug)]
pub struct ProgressThrottle {
    last_emit: Instant,
    min_interval: Duration,
}

impl ProgressThrottle {
    pub fn new(min_interval: Duration, started: Instant) -> Self {
        Self {
            last_emit: started,
            min_interval,
        }
    }

    pub fn should_emit_at(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_emit) < self.min_interval {
            return false;
        }
        self.last_emit = now;
        true
    }
}

/// Sink for throttled progress updates.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// Intermediate update; only called when the throttle allows it.
    async fn report(&self, file_name: &str, sample: &ProgressSample) -> Result<()>;

    /// Terminal update after the last byte was written.
    async fn finished(&self, file_name: &str, sample: &ProgressSample) -> Result<()>;
}

/// Edits a status message in the requester's chat.
pub struct StatusMessageReporter<'a> {
    messenger: &'a dyn MessagingPort,
    status: MessageRef,
}

impl<'a> StatusMessageReporter<'a> {
    pub fn new(messenger: &'a dyn MessagingPort, status: MessageRef) -> Self {
        Self { messenger, status }
    }
}

#[async_trait]
impl ProgressReporter for StatusMessageReporter<'_> {
    async fn report(&self, file_name: &str, sample: &ProgressSample) -> Result<()> {
        let html = crate::views::downloading_text(file_name, sample);
        self.messenger.edit_html(self.status, &html).await
    }

    async fn finished(&self, file_name: &str, sample: &ProgressSample) -> Result<()> {
        let html = crate::views::uploading_text(file_name, sample);
        self.messenger.edit_html(self.status, &html).await
    }
}

/// Reporter that drops every update.
pub struct NoopReporter;

#[async_trait]
impl ProgressReporter for NoopReporter {
    async fn report(&self, _file_name: &str, _sample: &ProgressSample) -> Result<()> {
        Ok(())
    }

    async fn finished(&self, _file_name: &str, _sample: &ProgressSample) -> Result<()> {
        Ok(())
    }
}
