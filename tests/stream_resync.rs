mod common;

use helios_proto::frame::{self, Payload};
use helios_proto::{Frame, Resynchronizer};
use std::convert::TryFrom;

const NOISE_1: [u8; 2] = [0xAA, 0x55];
const NOISE_2: [u8; 2] = [0x13, 0x37];
const STATUS: [u8; 11] = [1, 2, 3, 4, 5, 6, 2, 1, 0, 0, 0];

fn noisy_stream() -> Vec<u8> {
    let mut stream = NOISE_1.to_vec();
    stream.extend_from_slice(&frame::ping(0x10));
    stream.extend_from_slice(&NOISE_2);
    stream.extend_from_slice(&frame::broadcast(&STATUS).unwrap());
    stream
}

fn run<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Vec<Frame> {
    let mut resync = Resynchronizer::new();
    let mut out = Vec::new();
    for chunk in chunks {
        out.extend(resync.receive_data(chunk));
    }
    out.extend(resync.finish());
    out
}

/// Check the frame sequence, and that the noise before and between frames
/// comes out exactly, however it was split into spans.
fn check(frames: &[Frame]) {
    let mut noise: Vec<Vec<u8>> = vec![Vec::new()];
    let mut classified = Vec::new();
    for frame in frames {
        match frame {
            Frame::Unclassified { bytes } => noise.last_mut().unwrap().extend_from_slice(bytes),
            other => {
                classified.push(other.clone());
                noise.push(Vec::new());
            }
        }
    }
    assert_eq!(
        classified,
        vec![
            Frame::Ping { source: 0x10 },
            Frame::Broadcast {
                payload: Payload::try_from(&STATUS[..]).unwrap()
            },
        ]
    );
    assert_eq!(noise, vec![NOISE_1.to_vec(), NOISE_2.to_vec(), Vec::new()]);
}

#[test]
fn resync_whole_stream() {
    common::init_logging();
    let stream = noisy_stream();
    check(&run([&stream[..]]));
}

#[test]
fn resync_every_split() {
    let stream = noisy_stream();
    for split in 0..=stream.len() {
        let (a, b) = stream.split_at(split);
        check(&run([a, b]));
    }
}

#[test]
fn resync_every_double_split() {
    let stream = noisy_stream();
    for i in 0..=stream.len() {
        for j in i..=stream.len() {
            check(&run([&stream[..i], &stream[i..j], &stream[j..]]));
        }
    }
}

#[test]
fn resync_byte_by_byte() {
    let stream = noisy_stream();
    check(&run(stream.chunks(1)));
}

#[test]
fn frames_survive_corruption() {
    let mut stream = Vec::new();
    let mut bad_ping = frame::ping(0x10).to_vec();
    bad_ping[3] ^= 0x01;
    stream.extend_from_slice(&bad_ping);
    stream.extend_from_slice(&common::temperature_reply(0x11));
    stream.extend_from_slice(&frame::ping(0x11));

    let frames = run(stream.chunks(3));
    let classified: Vec<_> = frames
        .iter()
        .filter(|f| !matches!(f, Frame::Unclassified { .. }))
        .collect();
    assert_eq!(classified.len(), 2);
    assert!(matches!(classified[0], Frame::Variable { index: 0x3A, .. }));
    assert_eq!(classified[1], &Frame::Ping { source: 0x11 });
}
