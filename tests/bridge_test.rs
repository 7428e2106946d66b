mod common;

use common::BusSink;
use helios_proto::bridge::Error;
use helios_proto::config::ScanConfig;
use helios_proto::store::Change;
use helios_proto::{frame, vars, Bridge, BridgeConfig, DecodedValue};
use std::collections::HashSet;
use std::sync::mpsc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn start(sink: &BusSink) -> Bridge {
    common::init_logging();
    Bridge::start(BridgeConfig::default().without_polling(), sink.clone()).unwrap()
}

#[test]
fn write_waits_for_own_ping() {
    let sink = BusSink::new();
    let bridge = start(&sink);

    // nothing pinged us yet, so the first write goes straight out
    bridge.write_variable("fan_level", 1).unwrap();
    let first = frame::write_request(0x11, 0x35, &[1]).unwrap();
    assert!(sink.wait_for_frame(WAIT, &first));

    bridge.write_variable("fan_level", 2).unwrap();
    let second = [0x11, 0x01, 0x02, 0x35, 0x02, 0x4C];
    for _ in 0..5 {
        bridge.submit_bytes(&common::ping(0x10)).unwrap();
    }
    assert!(!sink.wait_for_frame(Duration::from_millis(300), &second));

    bridge.submit_bytes(&common::ping(0x11)).unwrap();
    assert!(sink.wait_for_frame(WAIT, &second));
    bridge.shutdown().unwrap();
}

#[test]
fn broadcast_reaches_subscribers() {
    let sink = BusSink::new();
    let bridge = start(&sink);
    let (tx, rx) = mpsc::channel();
    let tx = std::sync::Mutex::new(tx);
    bridge.on_state_change(move |batch: &[Change]| {
        let _ = tx.lock().unwrap().send(batch.to_vec());
    });

    bridge.submit_bytes(&common::broadcast(3, true, true)).unwrap();
    let batch = rx.recv_timeout(WAIT).unwrap();
    let names: HashSet<&str> = batch.iter().map(|c| c.name.as_str()).collect();
    for name in ["fan_level", "auto_mode", "filter_warning", "date", "time"] {
        assert!(names.contains(name), "{} missing", name);
    }
    assert_eq!(bridge.read_variable("fan_level"), Some(DecodedValue::Number(3.0)));
    assert_eq!(bridge.read_variable("filter_warning"), Some(DecodedValue::Flag(true)));
    assert_eq!(
        bridge.read_variable("date"),
        Some(DecodedValue::Sequence(vec![19.0, 10.0, 26.0]))
    );
    bridge.shutdown().unwrap();
}

#[test]
fn temperatures_across_chunks() {
    let sink = BusSink::new();
    let bridge = start(&sink);
    let reply = common::temperature_reply(0x11);
    for chunk in reply.chunks(7) {
        bridge.submit_bytes(chunk).unwrap();
    }
    assert!(common::eventually(WAIT, || bridge
        .read_variable("temp_supply")
        .is_some()));
    for (name, expected) in [
        ("temp_outdoor", 20.0),
        ("temp_extract", 18.5),
        ("temp_exhaust", 30.6),
        ("temp_supply", 20.5),
    ] {
        assert_eq!(
            bridge.read_variable(name),
            Some(DecodedValue::Number(expected)),
            "{}",
            name
        );
    }
    assert!(common::eventually(WAIT, || bridge.stream_stats().variables == 1));
    bridge.shutdown().unwrap();
}

#[test]
fn calendar_write_layout() {
    let sink = BusSink::new();
    let bridge = start(&sink);
    let mut levels = [0u8; 48];
    levels[..4].copy_from_slice(&[1, 4, 0, 2]);
    bridge.write_calendar_day(2, &levels).unwrap();

    let mut data = vec![0u8; 51];
    data[2] = 0x41;
    data[3] = 0x20;
    let expected = frame::write_request(0x11, 0x02, &data).unwrap();
    assert_eq!(&expected[..4], &[0x11, 0x01, 0x34, 0x02]);
    assert!(sink.wait_for_frame(WAIT, &expected));
    bridge.shutdown().unwrap();
}

#[test]
fn diagnostic_scan_reports_every_readable_variable() {
    let sink = BusSink::new();
    common::init_logging();
    let mut config = BridgeConfig::default()
        .without_polling()
        .with_read_spacing(Duration::from_millis(1))
        .with_scan(ScanConfig {
            spacing: Duration::from_millis(10),
            settle: Duration::from_millis(50),
            timeout: Duration::from_secs(30),
        });
    config.poll_tick = Duration::from_millis(2);
    let bridge = Bridge::start(config, sink.clone()).unwrap();

    let rows = bridge.trigger_diagnostic_scan().unwrap();
    bridge.submit_bytes(&common::broadcast(2, false, false)).unwrap();
    assert!(matches!(
        bridge.trigger_diagnostic_scan(),
        Err(Error::ScanInProgress)
    ));
    assert!(sink.wait_for_frame(Duration::from_secs(10), &frame::read_request(0x11, 0x48)));

    let mut collected = Vec::new();
    while let Ok(row) = rows.recv_timeout(Duration::from_secs(20)) {
        collected.push(row);
    }
    let readable = vars::VARIABLES.iter().filter(|v| v.is_readable()).count();
    let names: HashSet<&str> = collected.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names.len(), collected.len());
    assert!(collected.len() >= readable);
    assert!(!names.contains("party_enabled"));
    assert!(names.contains("auto_mode"));

    // a new scan may start once the first one is done
    assert!(bridge.trigger_diagnostic_scan().is_ok());
    bridge.shutdown().unwrap();
}

#[test]
fn transmit_error_is_reported_on_shutdown() {
    let sink = BusSink::new();
    let bridge = start(&sink);
    sink.trigger_write_error();
    bridge.write_variable("fan_level", 0).unwrap();
    assert!(common::eventually(WAIT, || bridge.is_stopped()));
    assert!(matches!(bridge.submit_bytes(&[0x00]), Err(Error::Stopped)));
    assert!(matches!(bridge.shutdown(), Err(Error::Io { .. })));
}

#[test]
fn pump_until_end_of_stream() {
    let sink = BusSink::new();
    let bridge = start(&sink);
    let mut stream = common::ping(0x10);
    stream.extend(common::reply(0x11, 0x48, &[0x83, 0x00]));
    let mut reader = &stream[..];
    assert!(matches!(bridge.pump(&mut reader), Err(Error::TransportClosed)));
    assert!(common::eventually(WAIT, || bridge
        .read_variable("software_version")
        .is_some()));
    assert_eq!(
        bridge.read_variable("software_version"),
        Some(DecodedValue::Number(1.31))
    );
    bridge.shutdown().unwrap();
}
