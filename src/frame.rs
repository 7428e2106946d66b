//! Frame shapes on the bus, their streaming parsers, and builders for the
//! frames this crate transmits.
//!
//! Every frame ends in a single checksum byte, see [`checksum`](crate::checksum).
//!
//! | frame     | bytes                                                   |
//! |-----------|---------------------------------------------------------|
//! | ping      | `src 00 00 chk`                                         |
//! | broadcast | `FF FF plen payload[plen] chk`                          |
//! | variable  | `addr cmd plen index payload[plen-1] chk`, cmd 0 or 1   |
//! | ack       | `addr cmd plen data[plen] chk`, any other cmd           |

use arrayvec::ArrayVec;
use snafu::{ensure, Snafu};

use core::convert::TryFrom;
use core::fmt;

use crate::checksum;

/// Longest possible frame: three header bytes, 255 payload bytes, checksum.
pub const MAX_FRAME_LEN: usize = 259;

/// Longest payload the length byte can describe.
pub const MAX_PAYLOAD_LEN: usize = 255;

/// A complete encoded frame, checksum included.
pub type FrameBytes = ArrayVec<u8, MAX_FRAME_LEN>;

/// The payload part of a frame.
pub type Payload = ArrayVec<u8, MAX_PAYLOAD_LEN>;

/// Error type for the frame builders
#[derive(Debug, Snafu, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The data doesn't fit behind a single length byte.
    #[snafu(display("Payload of {len} bytes does not fit in a frame"))]
    PayloadTooLong { len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Read = 0x00,
    Write = 0x01,
}

impl Command {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Command::Read),
            0x01 => Some(Command::Write),
            _ => None,
        }
    }
}

/// One classified unit of the received byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Synchronization pulse from a bus participant.
    Ping { source: u8 },
    /// Unaddressed status snapshot.
    Broadcast { payload: Payload },
    /// Addressed read or write of a variable. Read requests carry an empty payload.
    Variable {
        address: u8,
        command: Command,
        index: u8,
        payload: Payload,
    },
    /// A checksummed addressed frame with a command other than read or write.
    Acknowledge { raw: FrameBytes },
    /// Bytes that could not be matched to any frame shape.
    Unclassified { bytes: Vec<u8> },
}

impl Frame {
    /// Encode the frame back to its on-wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = match self {
            Frame::Ping { source } => vec![*source, 0x00, 0x00],
            Frame::Broadcast { payload } => {
                let mut v = vec![0xFF, 0xFF, payload.len() as u8];
                v.extend_from_slice(payload);
                v
            }
            Frame::Variable {
                address,
                command,
                index,
                payload,
            } => {
                let mut v = vec![*address, *command as u8, (payload.len() + 1) as u8, *index];
                v.extend_from_slice(payload);
                v
            }
            Frame::Acknowledge { raw } => return raw.to_vec(),
            Frame::Unclassified { bytes } => return bytes.clone(),
        };
        out.push(checksum(&out));
        out
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Ping { .. } => "ping",
            Frame::Broadcast { .. } => "broadcast",
            Frame::Variable { .. } => "variable",
            Frame::Acknowledge { .. } => "ack",
            Frame::Unclassified { .. } => "unclassified",
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Ping { source } => write!(f, "ping from 0x{:02X}", source),
            Frame::Broadcast { payload } => write!(f, "broadcast, {} bytes", payload.len()),
            Frame::Variable {
                address,
                command,
                index,
                payload,
            } => {
                let name = crate::vars::lookup(*index).map_or("?", |v| v.name);
                write!(
                    f,
                    "{:?} 0x{:02X} ({}) addr 0x{:02X}, {} bytes",
                    command,
                    index,
                    name,
                    address,
                    payload.len()
                )
            }
            Frame::Acknowledge { raw } => write!(f, "ack {:02X?}", raw.as_slice()),
            Frame::Unclassified { bytes } => write!(f, "{} unclassified bytes", bytes.len()),
        }
    }
}

fn finish(mut frame: FrameBytes) -> FrameBytes {
    let chk = checksum(&frame);
    frame.push(chk);
    frame
}

fn header(first: u8, second: u8, data_len: usize) -> Result<FrameBytes, Error> {
    ensure!(
        data_len <= MAX_PAYLOAD_LEN,
        PayloadTooLongSnafu { len: data_len }
    );
    let mut frame = FrameBytes::new();
    frame.push(first);
    frame.push(second);
    frame.push(data_len as u8);
    Ok(frame)
}

/// `src 00 00 chk`
pub fn ping(source: u8) -> FrameBytes {
    let mut frame = FrameBytes::new();
    frame.push(source);
    frame.push(0x00);
    frame.push(0x00);
    finish(frame)
}

/// `FF FF plen payload chk`
pub fn broadcast(payload: &[u8]) -> Result<FrameBytes, Error> {
    let mut frame = header(0xFF, 0xFF, payload.len())?;
    frame
        .try_extend_from_slice(payload)
        .map_err(|_| Error::PayloadTooLong { len: payload.len() })?;
    Ok(finish(frame))
}

/// Read request for a variable: `client 00 01 index chk`.
pub fn read_request(client: u8, index: u8) -> FrameBytes {
    let mut frame = FrameBytes::new();
    frame.push(client);
    frame.push(Command::Read as u8);
    frame.push(0x01);
    frame.push(index);
    finish(frame)
}

/// Write request for a variable: `client 01 1+N index data[N] chk`.
/// # Errors
/// Returns [`Error::PayloadTooLong`] if `data` is longer than 254 bytes.
pub fn write_request(client: u8, index: u8, data: &[u8]) -> Result<FrameBytes, Error> {
    let mut frame = header(client, Command::Write as u8, data.len() + 1)?;
    frame.push(index);
    frame
        .try_extend_from_slice(data)
        .map_err(|_| Error::PayloadTooLong { len: data.len() })?;
    Ok(finish(frame))
}

pub(crate) mod parser {
    use super::*;

    use nom::branch::alt;
    use nom::bytes::streaming::tag;
    use nom::combinator::{consumed, map, map_opt};
    use nom::error::{Error as NomError, ErrorKind};
    use nom::multi::length_data;
    use nom::number::streaming::u8;
    use nom::sequence::{preceded, terminated, tuple};
    use nom::Err::Incomplete;
    use nom::{IResult, Parser};

    type Buf = [u8];
    type Res<'a, O> = IResult<&'a Buf, O>;

    #[derive(Debug, PartialEq, Eq)]
    pub(crate) enum Token {
        /// A frame of the given length was found at the start of the buffer.
        Frame(usize, Frame),
        /// The start of the buffer may still become a frame.
        NeedData,
        /// No frame starts at the first byte.
        Skip,
    }

    pub(crate) fn next_frame(buf: &Buf) -> Token {
        match alt((ping, broadcast, addressed))(buf) {
            Ok((rest, frame)) => Token::Frame(buf.len() - rest.len(), frame),
            Err(Incomplete(_)) => Token::NeedData,
            Err(_) => Token::Skip,
        }
    }

    fn byte(buf: &Buf) -> Res<'_, u8> {
        u8(buf)
    }

    fn payload(buf: &Buf) -> Res<'_, Payload> {
        map_opt(length_data(byte), |p: &Buf| Payload::try_from(p).ok())(buf)
    }

    /// Run `body`, then verify the checksum byte following what it consumed.
    fn checksummed<'a, O, F>(mut body: F) -> impl FnMut(&'a Buf) -> Res<'a, O>
    where
        F: Parser<&'a Buf, O, NomError<&'a Buf>>,
    {
        move |input: &'a Buf| {
            let (rest, (raw, out)) = consumed(|i| body.parse(i))(input)?;
            let (rest, chk) = byte(rest)?;
            if chk == checksum(raw) {
                Ok((rest, out))
            } else {
                Err(nom::Err::Error(NomError::new(input, ErrorKind::Verify)))
            }
        }
    }

    fn ping(buf: &Buf) -> Res<'_, Frame> {
        map(
            checksummed(terminated(byte, tag(&[0x00u8, 0x00][..]))),
            |source| Frame::Ping { source },
        )(buf)
    }

    fn broadcast(buf: &Buf) -> Res<'_, Frame> {
        map(
            checksummed(preceded(tag(&[0xFFu8, 0xFF][..]), payload)),
            |payload| Frame::Broadcast { payload },
        )(buf)
    }

    fn addressed(buf: &Buf) -> Res<'_, Frame> {
        map_opt(
            consumed(checksummed(tuple((byte, byte, payload)))),
            |(raw, (address, command, body)): (&Buf, (u8, u8, Payload))| {
                match Command::from_byte(command) {
                    Some(command) => {
                        let (&index, data) = body.split_first()?;
                        Some(Frame::Variable {
                            address,
                            command,
                            index,
                            payload: Payload::try_from(data).ok()?,
                        })
                    }
                    None => Some(Frame::Acknowledge {
                        raw: FrameBytes::try_from(raw).ok()?,
                    }),
                }
            },
        )(buf)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        assert_eq!(ping(0x11).as_slice(), &[0x11, 0x00, 0x00, 0x12]);
        assert_eq!(read_request(0x11, 0x3A).as_slice(), &[0x11, 0x00, 0x01, 0x3A, 0x4D]);
        assert_eq!(
            broadcast(&[0x01]).unwrap().as_slice(),
            &[0xFF, 0xFF, 0x01, 0x01, 0x01]
        );
        assert_eq!(
            write_request(0x11, 0x00, &[0; 255]),
            Err(Error::PayloadTooLong { len: 256 })
        );
        assert_eq!(write_request(0x11, 0x00, &[0; 254]).unwrap().len(), MAX_FRAME_LEN);
    }

    #[test]
    fn test_to_bytes() {
        let frame = Frame::Variable {
            address: 0x11,
            command: Command::Write,
            index: 0x35,
            payload: Payload::try_from(&[3u8][..]).unwrap(),
        };
        assert_eq!(frame.to_bytes(), write_request(0x11, 0x35, &[3]).unwrap().to_vec());
        assert_eq!(Frame::Ping { source: 0x10 }.to_bytes(), ping(0x10).to_vec());
    }
}
