//! Which variables to read, and when.
//!
//! [`PollPolicy::due`] is called periodically with the current time and
//! returns the variable indices whose read requests should be queued now.

use log::{debug, info};

use std::time::{Duration, Instant};

use crate::config::PollIntervals;
use crate::store::DeviceState;
use crate::vars;

/// Read once after start-up: software version, minimum fan level, filter
/// change interval, run-on time, date and time.
pub const STARTUP_SET: &[u8] = &[0x48, 0x37, 0x38, 0x49, vars::DATE, vars::TIME];

/// Read every hour.
pub const HOURLY_SET: &[u8] = &[
    0x14, 0x15, 0x11, 0x42, 0x45, 0x46, 0x1E, 0x1F, 0x16, 0x17, 0x18, 0x19, 0x60, vars::DATE,
    vars::TIME,
];

/// The seven calendar days.
pub const CALENDAR_SET: &[u8] = &[0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06];

#[derive(Debug, Default)]
struct Timer {
    last: Option<Instant>,
}

impl Timer {
    /// True if `period` has passed since the last firing. The period is
    /// evaluated on every call, so it follows the current state.
    fn fire(&mut self, now: Instant, period: Duration) -> bool {
        let due = self
            .last
            .map_or(true, |last| now.saturating_duration_since(last) >= period);
        if due {
            self.last = Some(now);
        }
        due
    }
}

/// The background read schedule.
#[derive(Debug)]
pub struct PollPolicy {
    intervals: PollIntervals,
    started: Instant,
    startup_done: bool,
    calendars_done: bool,
    temperatures: Timer,
    party: Timer,
    clock: Timer,
    hourly: Timer,
}

impl PollPolicy {
    pub fn new(intervals: PollIntervals, started: Instant) -> Self {
        Self {
            intervals,
            started,
            startup_done: false,
            calendars_done: false,
            temperatures: Timer::default(),
            party: Timer::default(),
            clock: Timer::default(),
            hourly: Timer::default(),
        }
    }

    /// Variable indices to read now, without duplicates, in queueing order.
    ///
    /// `ping_seen` tells whether any ping has been observed on the bus; the
    /// calendar is first read after that, or after the fallback delay.
    pub fn due(&mut self, now: Instant, state: &DeviceState, ping_seen: bool) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::new();
        let mut push = |indices: &[u8]| {
            for index in indices {
                if !out.contains(index) {
                    out.push(*index);
                }
            }
        };

        if !self.startup_done {
            self.startup_done = true;
            info!("Queueing start-up reads");
            push(STARTUP_SET);
        }

        let intervals = self.intervals;
        if self.temperatures.fire(now, intervals.temperatures) {
            push(&[vars::TEMPERATURES]);
        }

        let party_running = state
            .value("party_minutes_remaining")
            .and_then(|v| v.as_f64())
            .map_or(false, |m| m > 0.0);
        let party_period = if party_running {
            intervals.party_active
        } else {
            intervals.party_idle
        };
        if self.party.fire(now, party_period) {
            push(&[vars::PARTY_MINUTES_REMAINING]);
        }

        let clock_known = state.contains("date") && state.contains("time");
        let clock_period = if clock_known {
            intervals.clock
        } else {
            intervals.clock_retry
        };
        if self.clock.fire(now, clock_period) {
            push(&[vars::DATE, vars::TIME]);
        }

        if self.hourly.fire(now, intervals.hourly) {
            push(HOURLY_SET);
        }

        if !self.calendars_done {
            let fallback = now.saturating_duration_since(self.started) >= intervals.calendar_fallback;
            if ping_seen || fallback {
                self.calendars_done = true;
                if ping_seen {
                    info!("Queueing calendar reads");
                } else {
                    info!(
                        "No ping within {:?}, queueing calendar reads anyway",
                        intervals.calendar_fallback
                    );
                }
                push(CALENDAR_SET);
            }
        }

        if !out.is_empty() {
            debug!("polling {:02X?}", out);
        }
        out
    }
}
