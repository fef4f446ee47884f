// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Tunables for the stick controller. `Default` matches the stick
/// firmware's comfortable operating envelope; tests shrink the timers.
#[derive(Debug, Clone)]
pub struct StickConfig {
    /// Total attempts per request before it is reported failed.
    pub message_retry: u8,

    /// Per-attempt wait for a terminating response, in milliseconds.
    pub message_timeout_ms: u64,

    /// Watchdog cycle, in milliseconds.
    pub watchdog_interval_ms: u64,

    /// Accept join requests from unknown nodes without asking the host.
    pub accept_join_requests: bool,

    /// Minimum gap between serial writes, in milliseconds. The stick
    /// drops back-to-back frames.
    pub write_gap_ms: u64,

    /// Serial baud rate.
    pub baud_rate: u32,

    /// Serial read timeout; bounds how fast the reader observes
    /// cancellation, in milliseconds.
    pub read_timeout_ms: u64,
}

impl Default for StickConfig {
    fn default() -> Self {
        Self {
            message_retry: 3,
            message_timeout_ms: 5_000,
            watchdog_interval_ms: 10_000,
            accept_join_requests: false,
            write_gap_ms: 100,
            baud_rate: 115_200,
            read_timeout_ms: 100,
        }
    }
}

impl StickConfig {
    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn write_gap(&self) -> Duration {
        Duration::from_millis(self.write_gap_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Tick of the receive-timeout scanner: fine enough to keep failure
    /// latency within one tick of `message_retry * message_timeout`.
    pub fn poll_tick(&self) -> Duration {
        Duration::from_millis((self.message_timeout_ms / 5).clamp(10, 1_000))
    }

    /// Cumulative window for a full network scan over `n` members:
    /// `10 + 2n` seconds of slack plus one full retry budget.
    pub fn scan_timeout(&self, n: usize) -> Duration {
        let retry_budget = self.message_timeout_ms * u64::from(self.message_retry);
        Duration::from_millis(10_000 + 2_000 * n as u64 + retry_budget)
    }
}
