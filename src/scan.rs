//! One-shot read of every readable variable, for diagnostics.

use log::{debug, info, warn};

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use crate::codec::{DecodedValue, TEMPERATURE_NAMES};
use crate::config::ScanConfig;
use crate::store::DeviceState;
use crate::vars::VariableDescriptor;

/// What the driver of a [`DiagnosticScan`] should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStep {
    /// Queue a read request for this variable index.
    Request(u8),
    /// Nothing to do yet, poll again later.
    Wait,
    /// All reads were issued and the settle time has passed.
    Complete,
    /// The scan ran into its timeout.
    Expired,
}

/// One line of the scan summary.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRow {
    pub name: String,
    /// `None` for values that are not variables of their own, like the
    /// named temperatures.
    pub index: Option<u8>,
    /// `None` if no reply arrived.
    pub value: Option<DecodedValue>,
    pub unit: Option<&'static str>,
    pub note: Option<&'static str>,
}

impl fmt::Display for ScanRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "0x{:02X} {:<24}", index, self.name)?,
            None => write!(f, "     {:<24}", self.name)?,
        }
        match &self.value {
            Some(value) => write!(f, " {}", value)?,
            None => f.write_str(" -")?,
        }
        if let Some(unit) = self.unit {
            write!(f, " {}", unit)?;
        }
        if let Some(note) = self.note {
            write!(f, "  ({})", note)?;
        }
        Ok(())
    }
}

/// Values reported by broadcasts or derived from other variables, added to
/// the summary when the scan itself has no row of that name.
const SYNTHESIZED: [(&str, Option<&str>, &str); 7] = [
    (TEMPERATURE_NAMES[0], Some("°C"), "from temperature block"),
    (TEMPERATURE_NAMES[1], Some("°C"), "from temperature block"),
    (TEMPERATURE_NAMES[2], Some("°C"), "from temperature block"),
    (TEMPERATURE_NAMES[3], Some("°C"), "from temperature block"),
    ("fan_level", None, "from broadcast"),
    ("auto_mode", None, "from broadcast"),
    ("filter_warning", None, "from broadcast"),
];

/// A full-table scan with its own spacing and deadline.
///
/// The scan only decides when to ask for what; the replies reach the
/// [`DeviceState`] the normal way and are collected by [`summary`](Self::summary).
#[derive(Debug)]
pub struct DiagnosticScan {
    variables: Vec<&'static VariableDescriptor>,
    pending: VecDeque<&'static VariableDescriptor>,
    config: ScanConfig,
    started: Instant,
    last_request: Option<Instant>,
    outcome: Option<ScanStep>,
}

impl DiagnosticScan {
    /// Prepare a scan over the readable variables of `table`.
    pub fn new(table: &'static [VariableDescriptor], now: Instant, config: ScanConfig) -> Self {
        let variables: Vec<_> = table.iter().filter(|v| v.is_readable()).collect();
        info!("Diagnostic scan of {} variables started", variables.len());
        Self {
            pending: variables.iter().copied().collect(),
            variables,
            config,
            started: now,
            last_request: None,
            outcome: None,
        }
    }

    pub fn poll(&mut self, now: Instant) -> ScanStep {
        if let Some(outcome) = self.outcome {
            return outcome;
        }
        if now.saturating_duration_since(self.started) >= self.config.timeout {
            warn!(
                "Diagnostic scan expired with {} reads outstanding",
                self.pending.len()
            );
            return self.finish(ScanStep::Expired);
        }
        let reference = self.last_request.unwrap_or(self.started);
        let since = now.saturating_duration_since(reference);
        match self.pending.front() {
            Some(_) if self.last_request.is_some() && since < self.config.spacing => ScanStep::Wait,
            Some(_) => {
                let next = self.pending.pop_front().map_or(0, |v| v.index);
                self.last_request = Some(now);
                debug!("scan: requesting 0x{:02X}", next);
                ScanStep::Request(next)
            }
            None if since >= self.config.settle => {
                info!("Diagnostic scan complete");
                self.finish(ScanStep::Complete)
            }
            None => ScanStep::Wait,
        }
    }

    fn finish(&mut self, outcome: ScanStep) -> ScanStep {
        self.outcome = Some(outcome);
        outcome
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// Number of reads not yet issued.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn variables(&self) -> &[&'static VariableDescriptor] {
        &self.variables
    }

    /// One row per scanned variable, plus rows for broadcast and derived
    /// values present in `state`. Names are unique. Only values updated
    /// since the scan started are reported.
    pub fn summary(&self, state: &DeviceState) -> Vec<ScanRow> {
        let fresh = |name: &str| {
            state
                .get(name)
                .filter(|(_, at)| *at >= self.started)
                .map(|(value, _)| value)
        };
        let mut rows: Vec<ScanRow> = self
            .variables
            .iter()
            .map(|v| ScanRow {
                name: v.name.to_string(),
                index: Some(v.index),
                value: fresh(v.name),
                unit: v.unit,
                note: v.note,
            })
            .collect();
        for (name, unit, note) in SYNTHESIZED {
            if rows.iter().any(|r| r.name == name) {
                continue;
            }
            if let Some(value) = fresh(name) {
                rows.push(ScanRow {
                    name: name.to_string(),
                    index: None,
                    value: Some(value),
                    unit,
                    note: Some(note),
                });
            }
        }
        rows
    }
}
