//! Threaded driver around the sans-io protocol core.
//!
//! A [`Bridge`] runs four threads:
//!
//! | thread     | waits on                          | does                                      |
//! |------------|-----------------------------------|-------------------------------------------|
//! | ingest     | received chunks, `ingest_timeout` | resync, decode, update the state, pings   |
//! | scheduler  | `scheduler_tick`                  | writes due frames to the transport        |
//! | poller     | `poll_tick`                       | background polling and diagnostic scans   |
//! | notifier   | state batches, `ingest_timeout`   | calls the state subscribers               |
//!
//! Every wait has a timeout, so all threads notice a shutdown within one tick.

use log::{debug, info, warn};
use snafu::{ensure, OptionExt, ResultExt, Snafu};

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::codec::rejected::{NotReadableSnafu, UnknownVariableSnafu};
use crate::codec::{self, DecodedValue, WriteRejected};
use crate::config::BridgeConfig;
use crate::frame::{self, Frame};
use crate::ingest::{self, Outcome};
use crate::monitor::TrafficMonitor;
use crate::polling::PollPolicy;
use crate::scan::{DiagnosticScan, ScanRow, ScanStep};
use crate::scheduler::SendSlot;
use crate::store::{lock, Change, DeviceState};
use crate::stream::{Resynchronizer, StreamStats};
use crate::types::{CalendarDay, CalendarError, Weekday, SLOTS_PER_DAY};
use crate::vars::{self, VariableDescriptor};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Transport closed"))]
    TransportClosed,
    #[snafu(context(false))]
    #[snafu(display("Transport error: {source}"))]
    Io { source: std::io::Error },
    #[snafu(display("Failed to start the {name} thread: {source}"))]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("A diagnostic scan is already running"))]
    ScanInProgress,
    #[snafu(display("The bridge has been shut down"))]
    Stopped,
}

struct ActiveScan {
    scan: DiagnosticScan,
    rows: Sender<ScanRow>,
}

/// State shared by the bridge threads.
struct Shared {
    config: BridgeConfig,
    state: Arc<DeviceState>,
    stop: AtomicBool,
    ping_seen: AtomicBool,
    slot: Mutex<SendSlot>,
    scan: Mutex<Option<ActiveScan>>,
    monitor: Mutex<TrafficMonitor>,
    stream_stats: Mutex<StreamStats>,
}

impl Shared {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn enqueue_read(&self, index: u8, now: Instant) {
        let bytes = frame::read_request(self.config.client_address, index);
        lock(&self.slot).enqueue_read(bytes, now);
    }

    fn handle_frame(&self, frame: &Frame, now: Instant) {
        lock(&self.monitor).on_rx(frame, now);
        match ingest::apply(&self.state, frame, now) {
            Outcome::Ping(source) => {
                self.ping_seen.store(true, Ordering::SeqCst);
                lock(&self.slot).on_ping(source, now);
            }
            Outcome::Applied(n) => debug!("{} applied {} values", frame.kind(), n),
            Outcome::Request { .. } | Outcome::Rejected(_) | Outcome::Ignored => {}
        }
    }

    fn ingest_loop(&self, input: Receiver<Vec<u8>>) -> Result<(), Error> {
        let mut resync =
            Resynchronizer::with_limits(self.config.resync_limit, self.config.desync_threshold);
        debug!("Ingest thread running");
        while !self.stopped() {
            match input.recv_timeout(self.config.ingest_timeout) {
                Ok(chunk) => {
                    let now = Instant::now();
                    for frame in resync.receive_data(&chunk) {
                        self.handle_frame(&frame, now);
                    }
                    *lock(&self.stream_stats) = *resync.stats();
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        let now = Instant::now();
        for frame in resync.finish() {
            self.handle_frame(&frame, now);
        }
        *lock(&self.stream_stats) = *resync.stats();
        debug!("Ingest thread stopped");
        Ok(())
    }

    fn scheduler_loop<W: Write>(&self, mut writer: W) -> Result<(), Error> {
        debug!("Scheduler thread running");
        while !self.stopped() {
            let now = Instant::now();
            let next = lock(&self.slot).next_transmission(now);
            match next {
                Some(pending) => {
                    lock(&self.monitor).on_tx(&pending.bytes, now);
                    let sent = writer
                        .write_all(&pending.bytes)
                        .and_then(|_| writer.flush());
                    if let Err(e) = sent {
                        warn!("Transmit failed: {}", e);
                        self.stop.store(true, Ordering::SeqCst);
                        return Err(e.into());
                    }
                }
                None => thread::sleep(self.config.scheduler_tick),
            }
        }
        debug!("Scheduler thread stopped");
        Ok(())
    }

    fn poll_loop(&self) -> Result<(), Error> {
        let mut policy = PollPolicy::new(self.config.polling, Instant::now());
        debug!("Poller thread running");
        while !self.stopped() {
            let now = Instant::now();
            if self.config.enable_polling {
                let ping_seen = self.ping_seen.load(Ordering::SeqCst);
                for index in policy.due(now, &self.state, ping_seen) {
                    self.enqueue_read(index, now);
                }
            }
            self.advance_scan(now);
            thread::sleep(self.config.poll_tick);
        }
        debug!("Poller thread stopped");
        Ok(())
    }

    fn advance_scan(&self, now: Instant) {
        let mut active = lock(&self.scan);
        let step = match active.as_mut() {
            Some(a) => a.scan.poll(now),
            None => return,
        };
        match step {
            ScanStep::Request(index) => self.enqueue_read(index, now),
            ScanStep::Wait => {}
            ScanStep::Complete | ScanStep::Expired => {
                if let Some(finished) = active.take() {
                    let rows = finished.scan.summary(&self.state);
                    info!("Diagnostic scan finished with {} rows", rows.len());
                    for row in rows {
                        if finished.rows.send(row).is_err() {
                            debug!("Scan receiver dropped");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// The protocol core running against a byte-stream transport.
///
/// Received bytes are handed over with [`submit_bytes`](Self::submit_bytes) or
/// [`pump`](Self::pump); outgoing frames are written to the writer passed to
/// [`start`](Self::start).
pub struct Bridge {
    shared: Arc<Shared>,
    input: Mutex<Option<Sender<Vec<u8>>>>,
    threads: Vec<(&'static str, JoinHandle<Result<(), Error>>)>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.shared.config)
            .field("stopped", &self.shared.stopped())
            .finish()
    }
}

impl Bridge {
    /// Spawn the bridge threads. Outgoing frames are written to `writer`.
    pub fn start<W>(config: BridgeConfig, writer: W) -> Result<Self, Error>
    where
        W: Write + Send + 'static,
    {
        let (tx, rx) = channel();
        let shared = Arc::new(Shared {
            slot: Mutex::new(SendSlot::from_config(&config)),
            monitor: Mutex::new(TrafficMonitor::new(config.monitor_window)),
            config,
            state: Arc::new(DeviceState::new()),
            stop: AtomicBool::new(false),
            ping_seen: AtomicBool::new(false),
            scan: Mutex::new(None),
            stream_stats: Mutex::new(StreamStats::default()),
        });
        let mut bridge = Bridge {
            shared,
            input: Mutex::new(Some(tx)),
            threads: Vec::with_capacity(4),
        };

        let shared = Arc::clone(&bridge.shared);
        bridge.spawn("ingest", move || shared.ingest_loop(rx))?;
        let shared = Arc::clone(&bridge.shared);
        bridge.spawn("scheduler", move || shared.scheduler_loop(writer))?;
        let shared = Arc::clone(&bridge.shared);
        bridge.spawn("poller", move || shared.poll_loop())?;
        let shared = Arc::clone(&bridge.shared);
        bridge.spawn("notifier", move || {
            shared
                .state
                .dispatch_until(&shared.stop, shared.config.ingest_timeout);
            Ok(())
        })?;
        info!(
            "Bridge started as client 0x{:02X}",
            bridge.shared.config.client_address
        );
        Ok(bridge)
    }

    fn spawn<F>(&mut self, name: &'static str, f: F) -> Result<(), Error>
    where
        F: FnOnce() -> Result<(), Error> + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(format!("helios-{}", name))
            .spawn(f)
            .context(SpawnSnafu { name })?;
        self.threads.push((name, handle));
        Ok(())
    }

    /// Hand a chunk of received bytes to the ingest thread.
    pub fn submit_bytes(&self, chunk: &[u8]) -> Result<(), Error> {
        ensure!(!self.shared.stopped(), StoppedSnafu);
        let input = lock(&self.input);
        let tx = input.as_ref().context(StoppedSnafu)?;
        tx.send(chunk.to_vec()).ok().context(StoppedSnafu)
    }

    /// Read from `reader` and submit everything until the bridge stops.
    ///
    /// Read timeouts are retried. Returns [`Error::TransportClosed`] at end of
    /// stream; other read errors are returned as they are.
    pub fn pump<R: Read>(&self, reader: &mut R) -> Result<(), Error> {
        let mut buf = [0u8; 512];
        while !self.shared.stopped() {
            match reader.read(&mut buf) {
                Ok(0) => {
                    warn!("Transport closed");
                    return TransportClosedSnafu.fail();
                }
                Ok(n) => self.submit_bytes(&buf[..n])?,
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
                    ) => {}
                Err(e) => {
                    warn!("Transport read failed: {}", e);
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Latest known value of a variable or derived key.
    pub fn read_variable(&self, name: &str) -> Option<DecodedValue> {
        self.shared.state.value(name)
    }

    fn descriptor(name: &str) -> Result<&'static VariableDescriptor, WriteRejected> {
        vars::by_name(name).context(UnknownVariableSnafu { name })
    }

    /// Queue a one-off read request for a readable variable.
    pub fn request_variable(&self, name: &str) -> Result<(), WriteRejected> {
        let desc = Self::descriptor(name)?;
        ensure!(desc.is_readable(), NotReadableSnafu { name: desc.name });
        self.shared.enqueue_read(desc.index, Instant::now());
        Ok(())
    }

    /// Validate `value` and queue the write for the next send slot.
    ///
    /// Nothing is queued if the value is rejected.
    pub fn write_variable(
        &self,
        name: &str,
        value: impl Into<DecodedValue>,
    ) -> Result<(), WriteRejected> {
        let desc = Self::descriptor(name)?;
        let bytes = codec::write_frame(self.shared.config.client_address, desc, &value.into())?;
        info!("Queueing write of {}", desc.name);
        lock(&self.shared.slot).enqueue_write(bytes, Instant::now());
        Ok(())
    }

    /// Queue a read of one calendar day, 0 being Monday.
    pub fn request_calendar_day(&self, day: u8) -> Result<(), WriteRejected> {
        let weekday = Weekday::new(day)
            .ok()
            .context(crate::codec::rejected::InvalidWeekdaySnafu { day })?;
        self.shared
            .enqueue_read(weekday.calendar_variable(), Instant::now());
        Ok(())
    }

    /// Validate 48 half-hour levels and queue the calendar write for `day`.
    pub fn write_calendar_day(&self, day: u8, levels: &[u8]) -> Result<(), WriteRejected> {
        let weekday = Weekday::new(day)
            .ok()
            .context(crate::codec::rejected::InvalidWeekdaySnafu { day })?;
        let desc = vars::lookup(weekday.calendar_variable())
            .context(UnknownVariableSnafu { name: weekday.short_name() })?;
        let calendar = CalendarDay::from_levels(levels).map_err(|e| match e {
            CalendarError::WrongLength(actual) => WriteRejected::WrongLength {
                name: desc.name,
                expected: SLOTS_PER_DAY,
                actual,
            },
            CalendarError::InvalidLevel { slot, level } => WriteRejected::InvalidSlotLevel {
                slot,
                level: f64::from(level),
            },
        })?;
        self.write_variable(desc.name, calendar)
    }

    /// Queue writes of the device date and time. `year` may be two- or four-digit.
    ///
    /// Both values are validated before either write is queued.
    pub fn set_device_datetime(
        &self,
        day: u8,
        month: u8,
        year: u16,
        hour: u8,
        minute: u8,
    ) -> Result<(), WriteRejected> {
        let client = self.shared.config.client_address;
        let date = codec::write_frame(client, Self::descriptor("date")?, &codec::date_value(day, month, year)?)?;
        let time = codec::write_frame(client, Self::descriptor("time")?, &codec::time_value(hour, minute)?)?;
        let now = Instant::now();
        let mut slot = lock(&self.shared.slot);
        slot.enqueue_write(date, now);
        slot.enqueue_write(time, now);
        Ok(())
    }

    /// Start reading every readable variable. The returned receiver yields
    /// the summary rows once the scan has finished, then disconnects.
    pub fn trigger_diagnostic_scan(&self) -> Result<Receiver<ScanRow>, Error> {
        ensure!(!self.shared.stopped(), StoppedSnafu);
        let mut active = lock(&self.shared.scan);
        ensure!(active.is_none(), ScanInProgressSnafu);
        let (tx, rx) = channel();
        *active = Some(ActiveScan {
            scan: DiagnosticScan::new(vars::VARIABLES, Instant::now(), self.shared.config.scan),
            rows: tx,
        });
        Ok(rx)
    }

    /// Register a callback for every applied batch of state changes.
    ///
    /// Callbacks run on the notifier thread.
    pub fn on_state_change(&self, callback: impl Fn(&[Change]) + Send + Sync + 'static) {
        self.shared.state.subscribe(callback);
    }

    pub fn state(&self) -> &Arc<DeviceState> {
        &self.shared.state
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    pub fn stream_stats(&self) -> StreamStats {
        *lock(&self.shared.stream_stats)
    }

    /// Log all bus traffic for the configured monitor window.
    pub fn enable_traffic_log(&self) {
        lock(&self.shared.monitor).enable(Instant::now());
    }

    pub fn disable_traffic_log(&self) {
        lock(&self.shared.monitor).disable();
    }

    pub fn traffic_summary(&self) -> String {
        lock(&self.shared.monitor).to_string()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped()
    }

    fn stop_threads(&mut self) -> Result<(), Error> {
        self.shared.stop.store(true, Ordering::SeqCst);
        lock(&self.input).take();
        let mut result = Ok(());
        for (name, handle) in self.threads.drain(..) {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("The {} thread failed: {}", name, e);
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
                Err(_) => warn!("The {} thread panicked", name),
            }
        }
        result
    }

    /// Stop and join all threads. Returns the first transport error a
    /// thread ran into, if any.
    pub fn shutdown(mut self) -> Result<(), Error> {
        info!("Bridge shutting down");
        self.stop_threads()
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            let _ = self.stop_threads();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<u8>>>);

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn bridge() -> Bridge {
        Bridge::start(BridgeConfig::default().without_polling(), Sink::default()).unwrap()
    }

    #[test]
    fn test_rejected_writes_are_not_queued() {
        let bridge = bridge();
        assert!(matches!(
            bridge.write_variable("fan_level", 5),
            Err(WriteRejected::OutOfRange { .. })
        ));
        assert!(matches!(
            bridge.write_variable("no_such_thing", 1),
            Err(WriteRejected::UnknownVariable { .. })
        ));
        assert!(matches!(
            bridge.write_variable("software_version", 1.0),
            Err(WriteRejected::NotWritable { .. })
        ));
        assert!(matches!(
            bridge.write_calendar_day(7, &[0; 48]),
            Err(WriteRejected::InvalidWeekday { day: 7 })
        ));
        assert!(matches!(
            bridge.write_calendar_day(0, &[0; 47]),
            Err(WriteRejected::WrongLength { expected: 48, actual: 47, .. })
        ));
        assert!(matches!(
            bridge.set_device_datetime(1, 13, 2026, 12, 0),
            Err(WriteRejected::OutOfRange { .. })
        ));
        assert!(matches!(
            bridge.request_variable("party_enabled"),
            Err(WriteRejected::NotReadable { .. })
        ));
        assert_eq!(lock(&bridge.shared.slot).pending_writes(), 0);
        bridge.shutdown().unwrap();
    }

    #[test]
    fn test_second_scan_rejected() {
        let bridge = bridge();
        let _rows = bridge.trigger_diagnostic_scan().unwrap();
        assert!(matches!(
            bridge.trigger_diagnostic_scan(),
            Err(Error::ScanInProgress)
        ));
        bridge.shutdown().unwrap();
    }

    #[test]
    fn test_submit_after_stop() {
        let mut bridge = bridge();
        bridge.stop_threads().unwrap();
        assert!(matches!(bridge.submit_bytes(&[0x10]), Err(Error::Stopped)));
    }

    #[test]
    fn test_pump_reports_eof() {
        let bridge = bridge();
        let mut reader: &[u8] = &[0x10, 0x00, 0x00, 0x11];
        assert!(matches!(bridge.pump(&mut reader), Err(Error::TransportClosed)));
        let t0 = Instant::now();
        while bridge.stream_stats().pings == 0 && t0.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(bridge.stream_stats().pings, 1);
        bridge.shutdown().unwrap();
    }
}
