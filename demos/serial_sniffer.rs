//! Print the frames seen on an RS-485 adapter, with the traffic log enabled.
//!
//! Usage: `serial_sniffer [port] [baud]`

use anyhow::{Context, Result};
use serialport::{DataBits, Parity, StopBits};
use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use helios_proto::monitor::TrafficMonitor;
use helios_proto::{DeviceState, Resynchronizer};

fn main() -> Result<()> {
    env_logger::builder()
        .filter_module("helios_proto::traffic", log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let mut args = std::env::args();
    args.next(); // Skip program name
    let port = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let baud: u32 = match args.next() {
        Some(b) => b.parse().context("Invalid baud rate")?,
        None => 19200,
    };

    let mut serial = serialport::new(&port, baud)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .timeout(Duration::from_millis(100))
        .open()
        .with_context(|| format!("Failed to open serial port {}", port))?;

    let state = DeviceState::new();
    let mut resync = Resynchronizer::new();
    let mut monitor = TrafficMonitor::new(Duration::from_secs(15 * 60));
    monitor.enable(Instant::now());

    let mut buf = [0u8; 256];
    loop {
        let len = match serial.read(&mut buf) {
            Ok(0) => break,
            Ok(len) => len,
            Err(e) if e.kind() == ErrorKind::TimedOut => continue,
            Err(e) => return Err(e).context("Serial read failed"),
        };
        let now = Instant::now();
        for frame in resync.receive_data(&buf[..len]) {
            monitor.on_rx(&frame, now);
            helios_proto::ingest::apply(&state, &frame, now);
        }
        if !monitor.is_enabled(now) {
            break;
        }
    }

    println!("{:?}", resync.stats());
    print!("{}", monitor);
    for (name, (value, _)) in state.snapshot() {
        println!("{:<24} {}", name, value);
    }
    Ok(())
}
