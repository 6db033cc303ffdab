//! Byte-level progress math for transfer batches.
//!
//! Everything here is a pure function of the sample sequence; the polling
//! loop lives in `monitor`.

use std::collections::VecDeque;
use std::time::Instant;

/// Deltas kept for rate smoothing
pub const WINDOW_SIZE: usize = 5;

/// Consecutive non-positive deltas before a batch is reported stalled
pub const STALL_LIMIT: u32 = 5;

/// Cumulative bytes observed at one instant
#[derive(Debug, Clone, Copy)]
pub struct ProgressSample {
    pub at: Instant,
    pub bytes: u64,
}

impl ProgressSample {
    pub fn now(bytes: u64) -> Self {
        Self {
            at: Instant::now(),
            bytes,
        }
    }
}

/// What one sample tells us about the batch
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub bytes: u64,
    pub percent: u64,

    /// Smoothed rate in bytes/second
    pub bytes_per_second: f64,

    /// `None` while no forward progress has been observed
    pub eta_seconds: Option<u64>,

    pub stalled: bool,
}

/// Sliding window over per-interval deltas
#[derive(Debug, Clone)]
pub struct ProgressWindow {
    expected_total: u64,
    interval_secs: f64,
    last: Option<ProgressSample>,
    deltas: VecDeque<i64>,
    stall_count: u32,
}

impl ProgressWindow {
    pub fn new(expected_total: u64, interval_secs: f64) -> Self {
        Self {
            expected_total,
            interval_secs,
            last: None,
            deltas: VecDeque::with_capacity(WINDOW_SIZE),
            stall_count: 0,
        }
    }

    /// Start measuring deltas from `sample` without reporting it
    pub fn baseline(&mut self, sample: ProgressSample) {
        self.last = Some(sample);
    }

    pub fn record(&mut self, sample: ProgressSample) -> ProgressReport {
        let previous = self.last.map(|s| s.bytes).unwrap_or(0);
        let delta = sample.bytes as i64 - previous as i64;
        self.last = Some(sample);

        if self.deltas.len() == WINDOW_SIZE {
            self.deltas.pop_front();
        }
        self.deltas.push_back(delta);

        if delta <= 0 {
            self.stall_count += 1;
        } else {
            self.stall_count = 0;
        }

        let avg_delta = self.average_delta();
        let remaining = self.expected_total.saturating_sub(sample.bytes);
        ProgressReport {
            bytes: sample.bytes,
            percent: percent_done(sample.bytes, self.expected_total),
            bytes_per_second: avg_delta / self.interval_secs,
            eta_seconds: eta_seconds(remaining, avg_delta, self.interval_secs),
            stalled: self.stall_count >= STALL_LIMIT,
        }
    }

    /// Mean bytes per interval over the window; backward movement counts as zero
    pub fn average_delta(&self) -> f64 {
        if self.deltas.is_empty() {
            return 0.0;
        }
        let sum: i64 = self.deltas.iter().map(|d| (*d).max(0)).sum();
        sum as f64 / self.deltas.len() as f64
    }

    pub fn stall_count(&self) -> u32 {
        self.stall_count
    }
}

/// `min(100, floor(bytes * 100 / expected))`; an empty expectation is already done
pub fn percent_done(bytes: u64, expected_total: u64) -> u64 {
    if expected_total == 0 {
        return 100;
    }
    ((bytes as u128 * 100) / expected_total as u128).min(100) as u64
}

/// `remaining / (avg_delta / interval)`
pub fn eta_seconds(remaining: u64, avg_delta: f64, interval_secs: f64) -> Option<u64> {
    if remaining == 0 {
        return Some(0);
    }
    if avg_delta <= 0.0 || interval_secs <= 0.0 {
        return None;
    }
    Some((remaining as f64 / (avg_delta / interval_secs)).ceil() as u64)
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
