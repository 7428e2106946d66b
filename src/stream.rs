//! See [`Resynchronizer`] for more details.

use log::{trace, warn};

use crate::buffer::Buffer;
use crate::frame::parser::{next_frame, Token};
use crate::frame::Frame;

/// Default cap for buffered and unclassified bytes.
pub const DEFAULT_RESYNC_LIMIT: usize = 1024;
/// Default number of skipped bytes after which the stream counts as desynchronized.
pub const DEFAULT_DESYNC_THRESHOLD: usize = 300;

/// Counters kept by the [`Resynchronizer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames: u64,
    pub pings: u64,
    pub broadcasts: u64,
    pub variables: u64,
    pub acknowledgements: u64,
    pub unclassified_bytes: u64,
    /// Times the stream went `desync_threshold` bytes without a frame.
    pub desync_events: u64,
}

/// Finds frame boundaries in a continuous byte stream.
///
/// Data is fed in arbitrary chunks with [`receive_data`](Self::receive_data), which
/// returns an iterator over everything that can be classified so far. At each
/// position the frame shapes are tried in order ping, broadcast, addressed
/// frame; when none of them matches the first byte is set aside as unclassified.
/// Consecutive unclassified bytes are reported together as one
/// [`Frame::Unclassified`] span, before the next frame.
///
/// A prefix that could still become a frame is held until more data arrives,
/// so a noise byte that looks like a frame header with a large length delays
/// classification until that length has been received. At the end of the
/// stream call [`finish`](Self::finish) to classify the held tail.
///
/// # Example
///
/// ```
/// use helios_proto::{Frame, Resynchronizer};
///
/// let mut resync = Resynchronizer::new();
/// assert_eq!(resync.receive_data(&[0x10, 0x00]).count(), 0);
/// let frames: Vec<Frame> = resync.receive_data(&[0x00, 0x11]).collect();
/// assert_eq!(frames, vec![Frame::Ping { source: 0x10 }]);
/// ```
#[derive(Debug)]
pub struct Resynchronizer {
    buffer: Buffer,
    garbage: Vec<u8>,
    ready: Option<Frame>,
    flushing: bool,
    resync_limit: usize,
    desync_threshold: usize,
    skipped: usize,
    stats: StreamStats,
}

impl Default for Resynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Resynchronizer {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_RESYNC_LIMIT, DEFAULT_DESYNC_THRESHOLD)
    }

    /// `resync_limit` bounds both the held input and the length of a single
    /// unclassified span; `desync_threshold` is the number of skipped bytes
    /// that counts as one desync event.
    pub fn with_limits(resync_limit: usize, desync_threshold: usize) -> Self {
        Self {
            buffer: Buffer::new(),
            garbage: Vec::new(),
            ready: None,
            flushing: false,
            resync_limit: resync_limit.max(crate::frame::MAX_FRAME_LEN),
            desync_threshold: desync_threshold.max(1),
            skipped: 0,
            stats: StreamStats::default(),
        }
    }

    /// Add received bytes, and iterate over the frames they complete.
    ///
    /// Frames not taken from the iterator are returned by the next call.
    pub fn receive_data(&mut self, data: &[u8]) -> Frames<'_> {
        self.flushing = false;
        self.buffer.write(data);
        Frames { resync: self }
    }

    /// Iterate over frames that are already complete, without adding data.
    pub fn frames(&mut self) -> Frames<'_> {
        self.flushing = false;
        Frames { resync: self }
    }

    /// End of stream: prefixes that are still incomplete can no longer
    /// become frames, so they are skipped like any other non-matching byte.
    pub fn finish(&mut self) -> Frames<'_> {
        self.flushing = true;
        Frames { resync: self }
    }

    /// Bytes held while waiting for more data.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    fn take_garbage(&mut self) -> Frame {
        let bytes = std::mem::take(&mut self.garbage);
        self.stats.unclassified_bytes += bytes.len() as u64;
        Frame::Unclassified { bytes }
    }

    fn count(&mut self, frame: &Frame) {
        self.stats.frames += 1;
        match frame {
            Frame::Ping { .. } => self.stats.pings += 1,
            Frame::Broadcast { .. } => self.stats.broadcasts += 1,
            Frame::Variable { .. } => self.stats.variables += 1,
            Frame::Acknowledge { .. } => self.stats.acknowledgements += 1,
            Frame::Unclassified { .. } => {}
        }
    }

    fn skip_byte(&mut self) {
        let byte = self.buffer.consume(1)[0];
        trace!("skipping 0x{:02X}", byte);
        self.garbage.push(byte);
        self.skipped += 1;
        if self.skipped == self.desync_threshold {
            self.stats.desync_events += 1;
            warn!(
                "Stream desynchronized, {} bytes without a valid frame",
                self.skipped
            );
        }
    }

    fn next_event(&mut self) -> Option<Frame> {
        if let Some(frame) = self.ready.take() {
            return Some(frame);
        }
        loop {
            if self.garbage.len() >= self.resync_limit {
                return Some(self.take_garbage());
            }
            match next_frame(self.buffer.as_slice()) {
                Token::Frame(len, frame) => {
                    self.buffer.consume(len);
                    self.skipped = 0;
                    self.count(&frame);
                    if self.garbage.is_empty() {
                        return Some(frame);
                    }
                    self.ready = Some(frame);
                    return Some(self.take_garbage());
                }
                Token::Skip => self.skip_byte(),
                Token::NeedData => {
                    // at end of stream nothing more can complete the prefix
                    if (self.flushing && !self.buffer.is_empty())
                        || self.buffer.len() > self.resync_limit
                    {
                        self.skip_byte();
                        continue;
                    }
                    if self.garbage.is_empty() {
                        return None;
                    }
                    return Some(self.take_garbage());
                }
            }
        }
    }
}

/// Iterator returned by [`Resynchronizer::receive_data`].
#[derive(Debug)]
pub struct Frames<'a> {
    resync: &'a mut Resynchronizer,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.resync.next_event()
    }
}
