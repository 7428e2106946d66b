#![allow(dead_code)]

use std::io::{Error, ErrorKind, Write};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use helios_proto::checksum;

/// The transmit side of a simulated bus: everything the bridge writes ends
/// up here, and tests can block until a given frame has been seen.
#[derive(Clone, Default)]
pub struct BusSink {
    inner: Arc<SinkInner>,
}

#[derive(Default)]
struct SinkInner {
    tx: Mutex<Vec<u8>>,
    written: Condvar,
    fail_writes: Mutex<bool>,
}

impl BusSink {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.inner.tx.lock().unwrap().clone()
    }

    pub fn contains(&self, frame: &[u8]) -> bool {
        contains(&self.bytes(), frame)
    }

    pub fn trigger_write_error(&self) {
        *self.inner.fail_writes.lock().unwrap() = true;
    }

    /// Block until `pred` holds for the written bytes, or `timeout` passes.
    pub fn wait_for(&self, timeout: Duration, pred: impl Fn(&[u8]) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut tx = self.inner.tx.lock().unwrap();
        loop {
            if pred(&tx) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tx = self
                .inner
                .written
                .wait_timeout(tx, deadline - now)
                .expect("Mutex lock failed")
                .0;
        }
    }

    pub fn wait_for_frame(&self, timeout: Duration, frame: &[u8]) -> bool {
        self.wait_for(timeout, |tx| contains(tx, frame))
    }
}

impl Write for BusSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut fail = self.inner.fail_writes.lock().unwrap();
        if *fail {
            *fail = false;
            return Err(Error::new(ErrorKind::BrokenPipe, "IO write error"));
        }
        self.inner.tx.lock().unwrap().extend_from_slice(buf);
        self.inner.written.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Poll `pred` until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, pred: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    pred()
}

fn with_checksum(mut bytes: Vec<u8>) -> Vec<u8> {
    bytes.push(checksum(&bytes));
    bytes
}

pub fn ping(source: u8) -> Vec<u8> {
    with_checksum(vec![source, 0x00, 0x00])
}

/// A 23-byte broadcast payload with the given clock, fan level and mode flags.
pub fn broadcast(fan_level: u8, auto_mode: bool, filter_warning: bool) -> Vec<u8> {
    let mut payload = vec![0u8; 23];
    payload[..6].copy_from_slice(&[2, 14, 35, 19, 10, 26]);
    payload[6] = fan_level;
    payload[7] = u8::from(auto_mode);
    payload[10] = u8::from(filter_warning);
    let mut bytes = vec![0xFF, 0xFF, payload.len() as u8];
    bytes.extend_from_slice(&payload);
    with_checksum(bytes)
}

/// A device reply carrying the value of `index`.
pub fn reply(address: u8, index: u8, data: &[u8]) -> Vec<u8> {
    let mut bytes = vec![address, 0x00, data.len() as u8 + 1, index];
    bytes.extend_from_slice(data);
    with_checksum(bytes)
}

/// Temperature block reading 20.0, 18.5, 30.6 and 20.5 °C.
pub fn temperature_reply(address: u8) -> Vec<u8> {
    let mut data = vec![0u8; 20];
    data[..8].copy_from_slice(&[200, 0, 185, 0, 50, 1, 205, 0]);
    reply(address, 0x3A, &data)
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
