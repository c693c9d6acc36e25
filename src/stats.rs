/*!
 * Transfer progress statistics
 *
 * A [`Stats`] value is owned by one progress stage and updated once per chunk.
 * `total` comes from the caller and is not trusted: `remaining` never goes
 * negative and `progress` never exceeds 100. Once the stream finishes, the
 * processed byte count becomes the authoritative total.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress statistics for a single transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    /// When the stage was wired into a transfer
    pub opened_at: DateTime<Utc>,
    /// When the first chunk arrived
    pub started_at: Option<DateTime<Utc>>,
    /// When the stream ended
    pub finished_at: Option<DateTime<Utc>>,
    /// Milliseconds since `started_at`, refreshed on every update
    pub duration_ms: u64,
    /// Expected number of bytes, if known
    pub total: Option<u64>,
    /// Bytes seen so far
    pub processed: u64,
    /// Bytes still expected; only known when `total` is
    pub remaining: Option<u64>,
    /// Percentage complete; only known when `total` is
    pub progress: Option<f64>,
}

impl Stats {
    /// Create stats for a new transfer
    ///
    /// A `total` of zero is treated as unknown.
    pub fn new(total: Option<u64>) -> Self {
        let total = total.filter(|&t| t > 0);
        Self {
            opened_at: Utc::now(),
            started_at: None,
            finished_at: None,
            duration_ms: 0,
            total,
            processed: 0,
            remaining: total,
            progress: total.map(|_| 0.0),
        }
    }

    /// Record the first chunk; later calls are ignored
    pub fn mark_started(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    /// Record `chunk_size` more bytes
    pub fn mark_progress(&mut self, chunk_size: u64) {
        self.mark_started();
        self.processed += chunk_size;
        self.duration_ms = self.elapsed_ms(Utc::now());

        if let Some(total) = self.total {
            self.remaining = Some(self.remaining.unwrap_or(total).saturating_sub(chunk_size));
            let percent = (self.processed as f64 / total as f64) * 100.0;
            self.progress = Some(percent.min(100.0));
        }
    }

    /// Record the end of the stream and normalise the totals
    pub fn mark_finished(&mut self) {
        self.mark_started();
        let now = Utc::now();
        self.finished_at = Some(now);
        self.duration_ms = self.elapsed_ms(now);
        self.total = Some(self.processed);
        self.remaining = Some(0);
        self.progress = Some(100.0);
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Average throughput in bytes per second, once any time has passed
    pub fn bytes_per_second(&self) -> Option<f64> {
        if self.duration_ms == 0 {
            return None;
        }
        Some((self.processed as f64 / self.duration_ms as f64) * 1000.0)
    }

    fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        self.started_at
            .map(|started| (now - started).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new(None)
    }
}
