//! Sans-io implementation of the Helios EC-Pro RS-485 ventilation bus protocol.
//!
//! The protocol core is a set of plain state machines: feed received bytes
//! to a [`Resynchronizer`] to get [`Frame`]s, apply them to a [`DeviceState`],
//! and let a [`SendSlot`] decide when queued request frames may go out on the
//! bus. None of these types perform IO or read the clock themselves, every
//! time-dependent call takes an [`Instant`](std::time::Instant).
//!
//! [`Bridge`] wires the pieces together with a few threads for hosts that
//! just have a byte stream (usually a TCP connection to an RS-485 gateway).
//!
//! # Example
//!
//! ```
//! use helios_proto::{Frame, Resynchronizer};
//!
//! let mut resync = Resynchronizer::new();
//! // noise, then a ping from address 0x10
//! let frames: Vec<Frame> = resync.receive_data(&[0x42, 0x10, 0x00, 0x00, 0x11]).collect();
//! assert_eq!(frames[0], Frame::Unclassified { bytes: vec![0x42] });
//! assert_eq!(frames[1], Frame::Ping { source: 0x10 });
//! ```

mod buffer;

pub mod bridge;
pub mod codec;
pub mod config;
pub mod frame;
pub mod ingest;
pub mod monitor;
pub mod polling;
pub mod scan;
pub mod scheduler;
pub mod store;
pub mod stream;
pub mod types;
pub mod vars;

pub use crate::bridge::Bridge;
pub use crate::codec::DecodedValue;
pub use crate::config::BridgeConfig;
pub use crate::frame::{Command, Frame};
pub use crate::scheduler::SendSlot;
pub use crate::store::DeviceState;
pub use crate::stream::Resynchronizer;
pub use crate::types::{level, CalendarDay, Level, Weekday};
pub use crate::vars::VariableDescriptor;

/// Bus address the bridge uses for its own requests.
pub const DEFAULT_CLIENT_ADDRESS: u8 = 0x11;

/// Compute the trailing checksum byte for `data`: the byte sum plus one, mod 256.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(1u8, |acc, b| acc.wrapping_add(*b))
}

#[cfg(test)]
mod tests {
    use super::checksum;

    #[test]
    fn test_checksum() {
        assert_eq!(checksum(&[]), 1);
        assert_eq!(checksum(&[0x10, 0x00, 0x00]), 0x11);
        assert_eq!(checksum(&[0xFF]), 0x00);
        assert_eq!(checksum(&[0x11, 0x00, 0x01, 0x3A]), 0x4D);
        assert_eq!(checksum(&[0xFF, 0xFF, 0xFF]), 0xFE);
    }
}
