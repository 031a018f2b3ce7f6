//! Throughput sampling for transfer telemetry.
//!
//! Samples are produced at most once per second; each carries the rate since
//! the previous sample and a remaining-time estimate. Samples are advisory:
//! consumers apply latest-value-wins and never gate correctness on them.

use tokio::time::Instant;

use crate::constants::PROGRESS_SAMPLE_INTERVAL;
use crate::protocol::{ProgressUpdate, TransferDirection};

/// Rate/ETA sampler for one transfer.
#[derive(Debug)]
pub struct ProgressTracker {
    file_name: String,
    direction: TransferDirection,
    total_bytes: u64,
    moved_bytes: u64,
    started_at: Instant,
    last_emit_at: Option<Instant>,
    last_emit_bytes: u64,
}

impl ProgressTracker {
    pub fn new(file_name: impl Into<String>, total_bytes: u64, direction: TransferDirection) -> Self {
        Self {
            file_name: file_name.into(),
            direction,
            total_bytes,
            moved_bytes: 0,
            started_at: Instant::now(),
            last_emit_at: None,
            last_emit_bytes: 0,
        }
    }

    /// Total bytes observed so far.
    pub fn moved_bytes(&self) -> u64 {
        self.moved_bytes
    }

    /// Record cumulative bytes moved; returns a sample when one is due.
    ///
    /// `cumulative` is the total moved so far, not a delta, so duplicate or
    /// reordered observer callbacks cannot move progress backwards.
    pub fn record(&mut self, cumulative: u64) -> Option<ProgressUpdate> {
        // Clamp to the announced size so an over-reporting observer cannot
        // push the counter past the total finish() later snaps back to.
        self.moved_bytes = self.moved_bytes.max(cumulative.min(self.total_bytes));

        let now = Instant::now();
        if let Some(last) = self.last_emit_at {
            if now.duration_since(last) < PROGRESS_SAMPLE_INTERVAL {
                return None;
            }
        }
        Some(self.emit(now, false))
    }

    /// Force the final 100% sample after the transfer completes.
    ///
    /// This is the only way a tracker reports exactly 100: in-flight samples
    /// are computed from byte counts and completion is signaled by the
    /// transfer engine, not inferred from them.
    pub fn finish(&mut self) -> ProgressUpdate {
        self.moved_bytes = self.total_bytes;
        self.emit(Instant::now(), true)
    }

    fn emit(&mut self, now: Instant, done: bool) -> ProgressUpdate {
        let since = self.last_emit_at.unwrap_or(self.started_at);
        let elapsed = now.duration_since(since).as_secs_f64();
        let delta = self.moved_bytes.saturating_sub(self.last_emit_bytes);

        let speed_bps = if elapsed > 0.0 {
            delta as f64 / elapsed
        } else {
            0.0
        };

        let progress: f32 = if done {
            100.0
        } else if self.total_bytes == 0 {
            0.0
        } else {
            // Cap below 100: completion is reported only via finish()
            ((self.moved_bytes as f64 / self.total_bytes as f64) * 100.0).min(99.9) as f32
        };

        let remaining = self.total_bytes.saturating_sub(self.moved_bytes);
        let eta_secs = if done {
            Some(0)
        } else if speed_bps > 0.0 {
            Some((remaining as f64 / speed_bps).ceil() as u64)
        } else {
            None
        };

        self.last_emit_at = Some(now);
        self.last_emit_bytes = self.moved_bytes;

        ProgressUpdate {
            file_name: self.file_name.clone(),
            progress,
            speed_bps,
            eta_secs,
            direction: self.direction,
        }
    }
}
