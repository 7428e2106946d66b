//! Applies classified frames to a [`DeviceState`].

use log::{debug, info, warn};

use std::time::Instant;

use crate::codec::{self, DecodedValue};
use crate::frame::{Command, Frame};
use crate::store::DeviceState;
use crate::vars::{self, Codec};

/// What [`apply`] did with a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A ping; feed the source to the send slot.
    Ping(u8),
    /// This many store keys were updated.
    Applied(usize),
    /// A read request seen on the bus, carrying no data.
    Request { address: u8, index: u8 },
    /// The payload could not be decoded; the store is untouched.
    Rejected(codec::Error),
    /// Nothing to decode.
    Ignored,
}

/// Decode `frame` and merge the result into `state`, stamped with `at`.
///
/// Decode failures are logged and reported in the returned [`Outcome`],
/// they never propagate.
pub fn apply(state: &DeviceState, frame: &Frame, at: Instant) -> Outcome {
    match frame {
        Frame::Ping { source } => Outcome::Ping(*source),
        Frame::Broadcast { payload } => {
            let values = codec::decode_broadcast(payload).values();
            if values.is_empty() {
                return Outcome::Ignored;
            }
            Outcome::Applied(state.update_many(values, at))
        }
        Frame::Variable {
            address,
            command: Command::Read,
            index,
            payload,
        } if payload.is_empty() => {
            debug!("read request for 0x{:02X} from 0x{:02X}", index, address);
            Outcome::Request {
                address: *address,
                index: *index,
            }
        }
        Frame::Variable { index, payload, .. } => match decode(*index, payload) {
            Ok(values) => Outcome::Applied(state.update_many(values, at)),
            Err(e) => {
                warn!("Skipping variable 0x{:02X}: {}", index, e);
                Outcome::Rejected(e)
            }
        },
        Frame::Acknowledge { .. } | Frame::Unclassified { .. } => Outcome::Ignored,
    }
}

/// Decode a variable payload into the store keys it publishes.
pub fn decode(index: u8, payload: &[u8]) -> Result<Vec<(&'static str, DecodedValue)>, codec::Error> {
    let desc = vars::lookup(index).ok_or(codec::Error::UnknownVariable { index })?;
    if desc.codec == Codec::Temperatures {
        let temps = codec::decode_temperatures(desc, payload)?;
        let mut out = Vec::with_capacity(5);
        for (name, reading) in temps.named() {
            match reading {
                Some(t) => out.push((name, DecodedValue::Number(t))),
                None => info!("{} sensor missing or invalid", name),
            }
        }
        out.push((desc.name, DecodedValue::Sequence(temps.values)));
        return Ok(out);
    }
    let value = codec::decode_variable(desc, payload)?;
    let derived = match index {
        vars::PARTY_MINUTES_REMAINING => Some("party_active"),
        vars::QUIET_MINUTES_REMAINING => Some("quiet_active"),
        _ => None,
    };
    let mut out = Vec::with_capacity(2);
    if let (Some(flag), Some(minutes)) = (derived, value.as_f64()) {
        out.push((flag, DecodedValue::Flag(minutes > 0.0)));
    }
    out.push((desc.name, value));
    Ok(out)
}
