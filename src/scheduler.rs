//! See [`SendSlot`] for more details.

use log::{debug, info, trace};

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::BridgeConfig;
use crate::frame::FrameBytes;

/// Gate state of the send slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// No ping from our address seen yet.
    Idle,
    /// Waiting for the next ping from our address.
    Closed,
    /// Writes may be transmitted until `expires`.
    Open { expires: Instant },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Read,
    Write,
}

/// An outbound frame waiting in the transmit queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFrame {
    pub bytes: FrameBytes,
    pub kind: FrameKind,
    pub enqueued_at: Instant,
}

/// Transmit queue and send-slot gate.
///
/// The bus has no arbitration, so writes only go out in the short window
/// after the controller pings our own address. Pings from other addresses
/// are ignored. Before our address has ever been pinged, one single write
/// is let through immediately so that a bus whose ping pattern is unknown
/// does not block writes forever.
///
/// Read requests are not gated by the slot. They are released one at a time
/// with at least `read_spacing` between them, and only after all writes
/// that may currently go out.
///
/// Queued frames are never dropped; a write waits for as many slots as it takes.
///
/// # Example
///
/// ```
/// use helios_proto::frame;
/// use helios_proto::scheduler::SendSlot;
/// use std::time::{Duration, Instant};
///
/// let mut slot = SendSlot::new(0x11, Duration::from_millis(80), Duration::from_millis(100));
/// let t0 = Instant::now();
/// slot.on_ping(0x11, t0);
/// slot.enqueue_write(frame::write_request(0x11, 0x35, &[2]).unwrap(), t0);
/// let tx = slot.next_transmission(t0 + Duration::from_millis(5)).unwrap();
/// assert_eq!(tx.bytes[3], 0x35);
/// ```
#[derive(Debug)]
pub struct SendSlot {
    client_address: u8,
    slot_duration: Duration,
    read_spacing: Duration,
    state: SlotState,
    last_ping: Option<Instant>,
    bootstrap_used: bool,
    writes: VecDeque<PendingFrame>,
    reads: VecDeque<PendingFrame>,
    last_read: Option<Instant>,
}

impl SendSlot {
    pub fn new(client_address: u8, slot_duration: Duration, read_spacing: Duration) -> Self {
        Self {
            client_address,
            slot_duration,
            read_spacing,
            state: SlotState::Idle,
            last_ping: None,
            bootstrap_used: false,
            writes: VecDeque::new(),
            reads: VecDeque::new(),
            last_read: None,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            config.client_address,
            config.slot_duration,
            config.read_spacing,
        )
    }

    /// Record a ping. Returns true if it opened the slot.
    pub fn on_ping(&mut self, source: u8, now: Instant) -> bool {
        if source != self.client_address {
            trace!("ping from 0x{:02X} does not open the slot", source);
            return false;
        }
        self.last_ping = Some(now);
        self.state = SlotState::Open {
            expires: now + self.slot_duration,
        };
        trace!("send slot open");
        true
    }

    /// Close an open slot whose window has passed.
    pub fn tick(&mut self, now: Instant) {
        if let SlotState::Open { expires } = self.state {
            if now >= expires {
                self.state = SlotState::Closed;
            }
        }
    }

    pub fn enqueue(&mut self, frame: PendingFrame) {
        debug!(
            "queued {:?} {:02X?}",
            frame.kind,
            frame.bytes.as_slice()
        );
        match frame.kind {
            FrameKind::Write => self.writes.push_back(frame),
            FrameKind::Read => self.reads.push_back(frame),
        }
    }

    pub fn enqueue_write(&mut self, bytes: FrameBytes, now: Instant) {
        self.enqueue(PendingFrame {
            bytes,
            kind: FrameKind::Write,
            enqueued_at: now,
        });
    }

    /// Queue a read request, unless the same request is already waiting.
    pub fn enqueue_read(&mut self, bytes: FrameBytes, now: Instant) -> bool {
        if self.reads.iter().any(|f| f.bytes == bytes) {
            trace!("read {:02X?} already queued", bytes.as_slice());
            return false;
        }
        self.enqueue(PendingFrame {
            bytes,
            kind: FrameKind::Read,
            enqueued_at: now,
        });
        true
    }

    /// The next frame that may be written to the bus at `now`, if any.
    pub fn next_transmission(&mut self, now: Instant) -> Option<PendingFrame> {
        self.tick(now);
        if !self.writes.is_empty() {
            match self.state {
                SlotState::Open { .. } => return self.pop_write(),
                SlotState::Idle if !self.bootstrap_used => {
                    self.bootstrap_used = true;
                    info!("No ping from our address yet, sending first write unguarded");
                    return self.pop_write();
                }
                _ => {}
            }
        }
        let spaced = self
            .last_read
            .map_or(true, |t| now.saturating_duration_since(t) >= self.read_spacing);
        if spaced {
            if let Some(frame) = self.reads.pop_front() {
                self.last_read = Some(now);
                debug!("sending read {:02X?}", frame.bytes.as_slice());
                return Some(frame);
            }
        }
        None
    }

    fn pop_write(&mut self) -> Option<PendingFrame> {
        let frame = self.writes.pop_front()?;
        debug!("sending write {:02X?}", frame.bytes.as_slice());
        Some(frame)
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn is_open(&self, now: Instant) -> bool {
        matches!(self.state, SlotState::Open { expires } if now < expires)
    }

    pub fn last_ping(&self) -> Option<Instant> {
        self.last_ping
    }

    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    pub fn pending_reads(&self) -> usize {
        self.reads.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame;

    const MS: Duration = Duration::from_millis(1);

    fn slot() -> SendSlot {
        SendSlot::new(0x11, 80 * MS, 100 * MS)
    }

    fn write(level: u8) -> FrameBytes {
        frame::write_request(0x11, 0x35, &[level]).unwrap()
    }

    #[test]
    fn test_foreign_ping_keeps_slot_closed() {
        let mut s = slot();
        let t0 = Instant::now();
        assert!(!s.on_ping(0x10, t0));
        assert_eq!(s.state(), SlotState::Idle);
        assert!(s.last_ping().is_none());
    }

    #[test]
    fn test_slot_expires() {
        let mut s = slot();
        let t0 = Instant::now();
        assert!(s.on_ping(0x11, t0));
        assert!(s.is_open(t0 + 79 * MS));
        s.tick(t0 + 80 * MS);
        assert_eq!(s.state(), SlotState::Closed);
    }

    #[test]
    fn test_bootstrap_write_only_once() {
        let mut s = slot();
        let t0 = Instant::now();
        s.enqueue_write(write(1), t0);
        s.enqueue_write(write(2), t0);
        assert_eq!(s.next_transmission(t0).map(|f| f.bytes), Some(write(1)));
        assert!(s.next_transmission(t0 + 500 * MS).is_none());
        s.on_ping(0x11, t0 + 600 * MS);
        assert_eq!(
            s.next_transmission(t0 + 601 * MS).map(|f| f.bytes),
            Some(write(2))
        );
    }

    #[test]
    fn test_no_bootstrap_after_ping() {
        let mut s = slot();
        let t0 = Instant::now();
        s.on_ping(0x11, t0);
        s.tick(t0 + 100 * MS);
        s.enqueue_write(write(1), t0 + 100 * MS);
        assert!(s.next_transmission(t0 + 100 * MS).is_none());
        assert_eq!(s.pending_writes(), 1);
    }

    #[test]
    fn test_writes_drain_fifo_within_slot() {
        let mut s = slot();
        let t0 = Instant::now();
        s.on_ping(0x11, t0);
        for level in 0..3 {
            s.enqueue_write(write(level), t0);
        }
        for level in 0..3 {
            assert_eq!(s.next_transmission(t0 + MS).map(|f| f.bytes), Some(write(level)));
        }
        assert!(s.next_transmission(t0 + MS).is_none());
    }

    #[test]
    fn test_reads_spaced_and_ungated() {
        let mut s = slot();
        let t0 = Instant::now();
        assert!(s.enqueue_read(frame::read_request(0x11, 0x3A), t0));
        assert!(!s.enqueue_read(frame::read_request(0x11, 0x3A), t0));
        assert!(s.enqueue_read(frame::read_request(0x11, 0x48), t0));
        assert!(s.next_transmission(t0).is_some());
        assert!(s.next_transmission(t0 + 99 * MS).is_none());
        assert!(s.next_transmission(t0 + 100 * MS).is_some());
        assert_eq!(s.pending_reads(), 0);
    }

    #[test]
    fn test_writes_before_reads() {
        let mut s = slot();
        let t0 = Instant::now();
        s.on_ping(0x11, t0);
        s.enqueue_read(frame::read_request(0x11, 0x3A), t0);
        s.enqueue_write(write(3), t0);
        assert_eq!(s.next_transmission(t0).map(|f| f.kind), Some(FrameKind::Write));
        assert_eq!(s.next_transmission(t0).map(|f| f.kind), Some(FrameKind::Read));
    }
}
