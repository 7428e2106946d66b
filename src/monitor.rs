//! Optional bus traffic log with per-category timing statistics.
//!
//! While enabled, every received frame and every transmitted frame is
//! logged at `info` level to the `helios_proto::traffic` target. The monitor
//! switches itself off after a fixed window so it can't be left running.

use log::info;

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::codec;
use crate::frame::parser::{next_frame, Token};
use crate::frame::{Command, Frame};
use crate::vars;

const TARGET: &str = "helios_proto::traffic";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Rx,
    Tx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Ping,
    Broadcast,
    /// Variable frame with an index from the table.
    Known,
    /// Variable frame with an index not in the table.
    Unknown,
    Acknowledge,
    Garbage,
}

impl Category {
    pub fn of(frame: &Frame) -> Self {
        match frame {
            Frame::Ping { .. } => Category::Ping,
            Frame::Broadcast { .. } => Category::Broadcast,
            Frame::Variable { index, .. } if vars::lookup(*index).is_some() => Category::Known,
            Frame::Variable { .. } => Category::Unknown,
            Frame::Acknowledge { .. } => Category::Acknowledge,
            Frame::Unclassified { .. } => Category::Garbage,
        }
    }
}

/// Event counts and inter-event intervals of one direction and category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryStats {
    pub count: u64,
    pub min_interval: Option<Duration>,
    pub max_interval: Option<Duration>,
    total_interval: Duration,
    intervals: u32,
    last_seen: Option<Instant>,
}

impl CategoryStats {
    fn record(&mut self, now: Instant) {
        self.count += 1;
        if let Some(last) = self.last_seen {
            let dt = now.saturating_duration_since(last);
            self.min_interval = Some(self.min_interval.map_or(dt, |m| m.min(dt)));
            self.max_interval = Some(self.max_interval.map_or(dt, |m| m.max(dt)));
            self.total_interval += dt;
            self.intervals += 1;
        }
        self.last_seen = Some(now);
    }

    pub fn avg_interval(&self) -> Option<Duration> {
        if self.intervals == 0 {
            None
        } else {
            Some(self.total_interval / self.intervals)
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            s.push(' ');
        }
        s.push_str(&format!("{:02X}", b));
    }
    s
}

fn describe(frame: &Frame) -> String {
    match frame {
        Frame::Variable {
            command: Command::Read,
            index,
            payload,
            ..
        } if payload.is_empty() => format!("read 0x{:02X}", index),
        Frame::Variable { index, payload, .. } => match codec::decode_index(*index, payload) {
            Ok((desc, value)) => format!("{} = {}", desc.name, value),
            Err(e) => e.to_string(),
        },
        Frame::Broadcast { payload } => {
            let status = codec::decode_broadcast(payload);
            format!(
                "fan {:?} auto {:?} filter {:?}",
                status.fan_level, status.auto_mode, status.filter_warning
            )
        }
        other => other.to_string(),
    }
}

/// Bus traffic logger with an auto-off window.
#[derive(Debug)]
pub struct TrafficMonitor {
    window: Duration,
    enabled_until: Option<Instant>,
    stats: BTreeMap<(Direction, Category), CategoryStats>,
}

impl TrafficMonitor {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            enabled_until: None,
            stats: BTreeMap::new(),
        }
    }

    /// Start logging for one window, clearing earlier statistics.
    pub fn enable(&mut self, now: Instant) {
        self.stats.clear();
        self.enabled_until = Some(now + self.window);
        info!(target: TARGET, "Traffic log enabled for {:?}", self.window);
    }

    pub fn disable(&mut self) {
        if self.enabled_until.take().is_some() {
            info!(target: TARGET, "Traffic log disabled");
        }
    }

    /// Whether logging is on at `now`; turns it off once the window has passed.
    pub fn is_enabled(&mut self, now: Instant) -> bool {
        match self.enabled_until {
            Some(until) if now >= until => {
                self.enabled_until = None;
                info!(target: TARGET, "Traffic log window elapsed\n{}", self);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    fn record(&mut self, direction: Direction, frame: &Frame, raw: &[u8], now: Instant) {
        if !self.is_enabled(now) {
            return;
        }
        let category = Category::of(frame);
        self.stats
            .entry((direction, category))
            .or_default()
            .record(now);
        info!(
            target: TARGET,
            "{:?} {:<11} {} | {}",
            direction,
            format!("{:?}", category),
            describe(frame),
            hex(raw)
        );
    }

    pub fn on_rx(&mut self, frame: &Frame, now: Instant) {
        if self.enabled_until.is_none() {
            return;
        }
        let raw = frame.to_bytes();
        self.record(Direction::Rx, frame, &raw, now);
    }

    pub fn on_tx(&mut self, bytes: &[u8], now: Instant) {
        if self.enabled_until.is_none() {
            return;
        }
        let frame = match next_frame(bytes) {
            Token::Frame(len, frame) if len == bytes.len() => frame,
            _ => Frame::Unclassified {
                bytes: bytes.to_vec(),
            },
        };
        self.record(Direction::Tx, &frame, bytes, now);
    }

    pub fn stats(&self, direction: Direction, category: Category) -> Option<&CategoryStats> {
        self.stats.get(&(direction, category))
    }
}

impl fmt::Display for TrafficMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "dir category     count      min      avg      max")?;
        let ms = |d: Option<Duration>| d.map_or("-".to_string(), |d| format!("{}ms", d.as_millis()));
        for ((direction, category), s) in &self.stats {
            writeln!(
                f,
                "{:<3} {:<11} {:>6} {:>8} {:>8} {:>8}",
                format!("{:?}", direction),
                format!("{:?}", category),
                s.count,
                ms(s.min_interval),
                ms(s.avg_interval()),
                ms(s.max_interval)
            )?;
        }
        Ok(())
    }
}
