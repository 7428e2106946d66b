mod common;

use helios_proto::config::ScanConfig;
use helios_proto::scan::{DiagnosticScan, ScanStep};
use helios_proto::vars::{self, VariableDescriptor};
use helios_proto::{ingest, DecodedValue, DeviceState, Resynchronizer};
use std::collections::HashSet;
use std::time::{Duration, Instant};

const MS: Duration = Duration::from_millis(1);

/// ext_contact, hours_on and fan1_voltage: three read-only neighbours.
fn three_variables() -> &'static [VariableDescriptor] {
    let start = vars::VARIABLES
        .iter()
        .position(|v| v.index == 0x14)
        .unwrap();
    &vars::VARIABLES[start..start + 3]
}

fn device_reply(index: u8) -> Vec<u8> {
    match index {
        0x14 => common::reply(0x11, index, &[1]),
        0x15 => common::reply(0x11, index, &[0x10, 0x27, 0x00, 0x00]),
        0x16 => common::reply(0x11, index, &[0x64, 0x00, 0x5A, 0x00]),
        other => panic!("unexpected read of 0x{:02X}", other),
    }
}

#[test]
fn scan_of_three_variables() {
    common::init_logging();
    let table = three_variables();
    assert!(table.iter().all(|v| v.is_readable() && !v.is_writable()));

    let state = DeviceState::new();
    let mut resync = Resynchronizer::new();
    let t0 = Instant::now();
    // a broadcast and the temperatures arrive on their own during the scan
    for frame in resync.receive_data(&common::broadcast(3, true, false)) {
        ingest::apply(&state, &frame, t0);
    }
    for frame in resync.receive_data(&common::temperature_reply(0x11)) {
        ingest::apply(&state, &frame, t0);
    }

    let mut scan = DiagnosticScan::new(table, t0, ScanConfig::default());
    let mut requests = Vec::new();
    let mut now = t0;
    let outcome = loop {
        match scan.poll(now) {
            ScanStep::Request(index) => {
                requests.push((index, now));
                for frame in resync.receive_data(&device_reply(index)) {
                    ingest::apply(&state, &frame, now);
                }
            }
            ScanStep::Wait => {}
            done => break done,
        }
        now += 50 * MS;
    };
    assert_eq!(outcome, ScanStep::Complete);

    let indices: Vec<u8> = requests.iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, vec![0x14, 0x15, 0x16]);
    for pair in requests.windows(2) {
        assert!(pair[1].1 - pair[0].1 >= 500 * MS);
    }

    let rows = scan.summary(&state);
    let names: HashSet<&str> = rows.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names.len(), rows.len(), "duplicate rows: {:?}", rows);
    assert!(rows.len() >= 3);
    assert_eq!(rows[0].value, Some(DecodedValue::Number(1.0)));
    assert_eq!(rows[1].value, Some(DecodedValue::Number(10000.0)));
    assert_eq!(rows[2].value, Some(DecodedValue::Sequence(vec![10.0, 9.0])));
    for synthesized in ["temp_outdoor", "temp_supply", "fan_level", "auto_mode"] {
        let row = rows.iter().find(|r| r.name == synthesized).unwrap();
        assert_eq!(row.index, None);
    }
    let fan = rows.iter().find(|r| r.name == "fan_level").unwrap();
    assert_eq!(fan.value, Some(DecodedValue::Number(3.0)));
}

#[test]
fn unanswered_reads_show_as_empty() {
    let table = three_variables();
    let state = DeviceState::new();
    let t0 = Instant::now();
    let mut scan = DiagnosticScan::new(table, t0, ScanConfig::default());
    let mut now = t0;
    while !scan.is_finished() {
        scan.poll(now);
        now += 100 * MS;
    }
    let rows = scan.summary(&state);
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.value.is_none()));
    assert!(rows[0].to_string().starts_with("0x14 ext_contact"));
}
