//! Tunables for the protocol core and the threaded [`Bridge`](crate::Bridge).
//!
//! Everything has a working default; loading settings from files is left to
//! the host application.

use std::time::Duration;

use crate::DEFAULT_CLIENT_ADDRESS;

/// Periods of the background read polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    /// Temperature block.
    pub temperatures: Duration,
    /// Party time left, while a party is running.
    pub party_active: Duration,
    /// Party time left, otherwise.
    pub party_idle: Duration,
    /// The hourly housekeeping set.
    pub hourly: Duration,
    /// Device date and time.
    pub clock: Duration,
    /// Device date and time, while either is still unknown.
    pub clock_retry: Duration,
    /// Startup calendar read when no ping has been seen yet.
    pub calendar_fallback: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            temperatures: Duration::from_secs(30),
            party_active: Duration::from_secs(10 * 60),
            party_idle: Duration::from_secs(60 * 60),
            hourly: Duration::from_secs(60 * 60),
            clock: Duration::from_secs(10 * 60),
            clock_retry: Duration::from_secs(30),
            calendar_fallback: Duration::from_secs(15),
        }
    }
}

/// Diagnostic scan pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    /// Minimum time between two scan reads.
    pub spacing: Duration,
    /// Time to wait for replies after the last read.
    pub settle: Duration,
    /// The scan is abandoned after this long.
    pub timeout: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            spacing: Duration::from_millis(500),
            settle: Duration::from_secs(2),
            timeout: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Our own bus address; only pings from it open the send slot.
    pub client_address: u8,
    pub slot_duration: Duration,
    /// Scheduler loop period.
    pub scheduler_tick: Duration,
    /// Poller loop period.
    pub poll_tick: Duration,
    /// Longest blocking wait of the ingest loop, bounds shutdown latency.
    pub ingest_timeout: Duration,
    /// Minimum spacing of read requests, which are not slot-gated.
    pub read_spacing: Duration,
    pub resync_limit: usize,
    pub desync_threshold: usize,
    pub scan: ScanConfig,
    pub polling: PollIntervals,
    /// Traffic monitor auto-off.
    pub monitor_window: Duration,
    /// Run the background polling policy.
    pub enable_polling: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            client_address: DEFAULT_CLIENT_ADDRESS,
            slot_duration: Duration::from_millis(80),
            scheduler_tick: Duration::from_millis(5),
            poll_tick: Duration::from_millis(50),
            ingest_timeout: Duration::from_millis(100),
            read_spacing: Duration::from_millis(100),
            resync_limit: crate::stream::DEFAULT_RESYNC_LIMIT,
            desync_threshold: crate::stream::DEFAULT_DESYNC_THRESHOLD,
            scan: ScanConfig::default(),
            polling: PollIntervals::default(),
            monitor_window: Duration::from_secs(15 * 60),
            enable_polling: true,
        }
    }
}

impl BridgeConfig {
    pub fn with_client_address(mut self, address: u8) -> Self {
        self.client_address = address;
        self
    }

    pub fn with_slot_duration(mut self, duration: Duration) -> Self {
        self.slot_duration = duration;
        self
    }

    pub fn with_read_spacing(mut self, spacing: Duration) -> Self {
        self.read_spacing = spacing;
        self
    }

    pub fn with_scan(mut self, scan: ScanConfig) -> Self {
        self.scan = scan;
        self
    }

    pub fn with_polling(mut self, polling: PollIntervals) -> Self {
        self.polling = polling;
        self
    }

    pub fn with_monitor_window(mut self, window: Duration) -> Self {
        self.monitor_window = window;
        self
    }

    /// Disable the background polling, e.g. for a passive listener or tests.
    pub fn without_polling(mut self) -> Self {
        self.enable_polling = false;
        self
    }
}
