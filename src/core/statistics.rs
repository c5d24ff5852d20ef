//! Rx/Tx traffic counters with a rolling rate window

use crate::core::router::ByteSink;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default length of the rate window
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Point-in-time view of one direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatisticsSnapshot {
    /// Cumulative bytes
    pub bytes: u64,
    /// Cumulative chunks
    pub frames: u64,
    /// Bytes per second over the last window
    pub rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    bytes: u64,
    frames: u64,
    first_sample: Option<Instant>,
    samples: VecDeque<(Instant, u64)>,
    window_bytes: u64,
}

impl Counters {
    fn evict(&mut self, now: Instant, window: Duration) {
        while let Some(&(at, len)) = self.samples.front() {
            if now.saturating_duration_since(at) < window {
                break;
            }
            self.window_bytes -= len;
            self.samples.pop_front();
        }
    }
}

/// Thread-safe byte counter for one traffic direction
#[derive(Debug)]
pub struct Statistician {
    window: Duration,
    counters: Mutex<Counters>,
}

impl Default for Statistician {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistician {
    /// Create a counter with the default window
    pub fn new() -> Self {
        Self::with_window(RATE_WINDOW)
    }

    /// Create a counter with a custom rate window
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Account one chunk of traffic
    pub fn input_bytes(&self, bytes: &[u8]) {
        self.input_bytes_at(Instant::now(), bytes.len());
    }

    /// Account `len` bytes observed at `now`
    pub fn input_bytes_at(&self, now: Instant, len: usize) {
        if len == 0 {
            return;
        }
        let len = len as u64;

        let mut c = self.counters.lock();
        c.bytes += len;
        c.frames += 1;
        c.first_sample.get_or_insert(now);
        c.samples.push_back((now, len));
        c.window_bytes += len;
        c.evict(now, self.window);
    }

    /// Current counters
    pub fn snapshot(&self) -> StatisticsSnapshot {
        self.snapshot_at(Instant::now())
    }

    /// Counters as seen at `now`.
    ///
    /// The rate stays 0 until a full window has passed since the first
    /// sample.
    pub fn snapshot_at(&self, now: Instant) -> StatisticsSnapshot {
        let mut c = self.counters.lock();
        c.evict(now, self.window);

        let warmed_up = c
            .first_sample
            .is_some_and(|first| now.saturating_duration_since(first) >= self.window);
        let rate = if warmed_up {
            c.window_bytes as f64 / self.window.as_secs_f64()
        } else {
            0.0
        };

        StatisticsSnapshot {
            bytes: c.bytes,
            frames: c.frames,
            rate,
        }
    }

    /// Clear all counters
    pub fn reset(&self) {
        *self.counters.lock() = Counters::default();
    }
}

impl ByteSink for Statistician {
    fn input_bytes(&self, bytes: &Bytes) {
        self.input_bytes_at(Instant::now(), bytes.len());
    }
}
