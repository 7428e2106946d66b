//! Payload decoding and encoding, driven by the [`vars`](crate::vars) table.
//!
//! Integers are little-endian. A descriptor's `scale` converts raw integers to
//! physical units; fractional scales are applied as a division by the rounded
//! reciprocal so that e.g. a raw `306` at scale `0.1` decodes to exactly `30.6`.

use snafu::{ensure, OptionExt, Snafu};

use core::fmt;

use crate::types::{CalendarDay, Level, SLOTS_PER_DAY};
use crate::vars::{Codec, VariableDescriptor};

/// Bytes of packed slot data in a calendar payload.
pub const CALENDAR_PACKED_LEN: usize = SLOTS_PER_DAY / 2;
/// Payload length of the extended calendar layout used for writes.
pub const CALENDAR_EXTENDED_LEN: usize = 2 + CALENDAR_PACKED_LEN + 25;

/// Decoding failures. All of them are local to one frame.
#[derive(Debug, Clone, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Unknown variable 0x{index:02X}"))]
    UnknownVariable { index: u8 },
    #[snafu(display("{name}: expected {expected} payload bytes, got {actual}"))]
    PayloadLengthMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    #[snafu(display("Calendar slot {slot} holds invalid level {level}"))]
    InvalidSlotLevel { slot: usize, level: u8 },
}

pub use self::rejected::WriteRejected;
use self::rejected::{NotWritableSnafu, OutOfRangeSnafu, WrongKindSnafu, WrongLengthSnafu};

pub(crate) mod rejected {
    use snafu::Snafu;

    /// Reasons a value is refused before anything is queued for transmission.
    #[derive(Debug, Snafu, PartialEq)]
    #[snafu(visibility(pub(crate)))]
    #[non_exhaustive]
    pub enum WriteRejected {
        #[snafu(display("Unknown variable {name:?}"))]
        UnknownVariable { name: String },
        #[snafu(display("{name} is read-only"))]
        NotWritable { name: &'static str },
        #[snafu(display("{name} is write-only"))]
        NotReadable { name: &'static str },
        #[snafu(display("{name}: {value} is outside {min}..={max}"))]
        OutOfRange {
            name: &'static str,
            value: f64,
            min: f64,
            max: f64,
        },
        #[snafu(display("{name}: expected {expected} values, got {actual}"))]
        WrongLength {
            name: &'static str,
            expected: usize,
            actual: usize,
        },
        #[snafu(display("{name}: expected {expected}"))]
        WrongKind {
            name: &'static str,
            expected: &'static str,
        },
        #[snafu(display("Calendar slot {slot}: invalid level {level}"))]
        InvalidSlotLevel { slot: usize, level: f64 },
        #[snafu(display("Invalid weekday {day}"))]
        InvalidWeekday { day: u8 },
        #[snafu(context(false))]
        #[snafu(display("{source}"))]
        Frame { source: crate::frame::Error },
    }
}

/// A decoded variable value, as kept in the device state store.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    Number(f64),
    Sequence(Vec<f64>),
    Flag(bool),
    Calendar(CalendarDay),
}

impl DecodedValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DecodedValue::Number(n) => Some(*n),
            DecodedValue::Flag(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            DecodedValue::Flag(b) => Some(*b),
            DecodedValue::Number(n) => Some(*n != 0.0),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[f64]> {
        match self {
            DecodedValue::Sequence(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_calendar(&self) -> Option<&CalendarDay> {
        match self {
            DecodedValue::Calendar(c) => Some(c),
            _ => None,
        }
    }
}

impl From<f64> for DecodedValue {
    fn from(n: f64) -> Self {
        DecodedValue::Number(n)
    }
}

impl From<i32> for DecodedValue {
    fn from(n: i32) -> Self {
        DecodedValue::Number(f64::from(n))
    }
}

impl From<bool> for DecodedValue {
    fn from(b: bool) -> Self {
        DecodedValue::Flag(b)
    }
}

impl From<Vec<f64>> for DecodedValue {
    fn from(v: Vec<f64>) -> Self {
        DecodedValue::Sequence(v)
    }
}

impl From<CalendarDay> for DecodedValue {
    fn from(c: CalendarDay) -> Self {
        DecodedValue::Calendar(c)
    }
}

impl From<Level> for DecodedValue {
    fn from(l: Level) -> Self {
        DecodedValue::Number(f64::from(*l))
    }
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedValue::Number(n) => write!(f, "{}", n),
            DecodedValue::Sequence(v) => {
                for (i, n) in v.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", n)?;
                }
                Ok(())
            }
            DecodedValue::Flag(b) => f.write_str(if *b { "on" } else { "off" }),
            DecodedValue::Calendar(c) => write!(f, "{:?}", c),
        }
    }
}

fn apply_scale(raw: i64, scale: f64) -> f64 {
    if scale < 1.0 {
        raw as f64 / (1.0 / scale).round()
    } else {
        raw as f64 * scale
    }
}

fn remove_scale(value: f64, scale: f64) -> f64 {
    if scale < 1.0 {
        (value * (1.0 / scale).round()).round()
    } else {
        (value / scale).round()
    }
}

fn read_element(bytes: &[u8], signed: bool) -> i64 {
    let raw = bytes
        .iter()
        .rev()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    if signed {
        let shift = 64 - 8 * bytes.len() as u32;
        ((raw << shift) as i64) >> shift
    } else {
        raw as i64
    }
}

/// Decode a variable payload (the bytes after the variable index).
/// # Errors
/// [`Error::PayloadLengthMismatch`] unless the length matches the descriptor
/// exactly, [`Error::InvalidSlotLevel`] for calendar nibbles above 4.
pub fn decode_variable(desc: &VariableDescriptor, payload: &[u8]) -> Result<DecodedValue, Error> {
    if desc.codec == Codec::Calendar {
        return unpack_calendar_payload(desc.name, payload).map(DecodedValue::Calendar);
    }
    ensure!(
        payload.len() == desc.payload_len(),
        PayloadLengthMismatchSnafu {
            name: desc.name,
            expected: desc.payload_len(),
            actual: payload.len(),
        }
    );
    let mut values: Vec<f64> = payload
        .chunks_exact(desc.width.bytes())
        .map(|chunk| apply_scale(read_element(chunk, desc.signed), desc.scale))
        .collect();
    Ok(if desc.count == 1 {
        DecodedValue::Number(values.remove(0))
    } else {
        DecodedValue::Sequence(values)
    })
}

/// Decode a payload by variable index.
pub fn decode_index(index: u8, payload: &[u8]) -> Result<(&'static VariableDescriptor, DecodedValue), Error> {
    let desc = crate::vars::lookup(index).context(UnknownVariableSnafu { index })?;
    Ok((desc, decode_variable(desc, payload)?))
}

/// Readings at or beyond 200 °C or -40 °C mean the sensor is absent or broken.
fn sensor_valid(t: f64) -> bool {
    t > -40.0 && t < 200.0
}

/// Names of the first four words of the temperature block, in order.
pub const TEMPERATURE_NAMES: [&str; 4] = ["temp_outdoor", "temp_extract", "temp_exhaust", "temp_supply"];

/// The decoded temperature block.
#[derive(Debug, Clone, PartialEq)]
pub struct Temperatures {
    /// All ten readings, in °C.
    pub values: Vec<f64>,
    pub outdoor: Option<f64>,
    pub extract: Option<f64>,
    pub exhaust: Option<f64>,
    pub supply: Option<f64>,
}

impl Temperatures {
    /// The named readings, `None` where the sensor reports an invalid value.
    pub fn named(&self) -> [(&'static str, Option<f64>); 4] {
        [
            (TEMPERATURE_NAMES[0], self.outdoor),
            (TEMPERATURE_NAMES[1], self.extract),
            (TEMPERATURE_NAMES[2], self.exhaust),
            (TEMPERATURE_NAMES[3], self.supply),
        ]
    }
}

/// Decode the ten-word temperature block.
pub fn decode_temperatures(desc: &VariableDescriptor, payload: &[u8]) -> Result<Temperatures, Error> {
    let values = match decode_variable(desc, payload)? {
        DecodedValue::Sequence(v) => v,
        DecodedValue::Number(n) => vec![n],
        _ => Vec::new(),
    };
    let named = |i: usize| values.get(i).copied().filter(|t| sensor_valid(*t));
    Ok(Temperatures {
        outdoor: named(0),
        extract: named(1),
        exhaust: named(2),
        supply: named(3),
        values,
    })
}

/// Status fields carried by a broadcast frame. Fields beyond the end of a
/// short payload stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStatus {
    /// 0 is Monday.
    pub weekday: Option<u8>,
    pub hour: Option<u8>,
    pub minute: Option<u8>,
    pub day: Option<u8>,
    pub month: Option<u8>,
    /// Two-digit year.
    pub year: Option<u8>,
    pub fan_level: Option<u8>,
    pub auto_mode: Option<bool>,
    pub filter_warning: Option<bool>,
}

const BC_WEEKDAY: usize = 0;
const BC_HOUR: usize = 1;
const BC_MINUTE: usize = 2;
const BC_DAY: usize = 3;
const BC_MONTH: usize = 4;
const BC_YEAR: usize = 5;
const BC_FAN_LEVEL: usize = 6;
const BC_MODE: usize = 7;
const BC_FILTER: usize = 10;

pub fn decode_broadcast(payload: &[u8]) -> BroadcastStatus {
    let at = |i: usize| payload.get(i).copied();
    BroadcastStatus {
        weekday: at(BC_WEEKDAY),
        hour: at(BC_HOUR),
        minute: at(BC_MINUTE),
        day: at(BC_DAY),
        month: at(BC_MONTH),
        year: at(BC_YEAR),
        fan_level: at(BC_FAN_LEVEL),
        auto_mode: at(BC_MODE).map(|b| b & 0x01 != 0),
        filter_warning: at(BC_FILTER).map(|b| b & 0x01 != 0),
    }
}

impl BroadcastStatus {
    /// Store keys and values for every field that is present.
    ///
    /// Date and time are only published when all their components are.
    pub fn values(&self) -> Vec<(&'static str, DecodedValue)> {
        let mut out = Vec::with_capacity(6);
        if let Some(l) = self.fan_level {
            out.push(("fan_level", DecodedValue::Number(f64::from(l))));
        }
        if let Some(a) = self.auto_mode {
            out.push(("auto_mode", DecodedValue::Flag(a)));
        }
        if let Some(w) = self.filter_warning {
            out.push(("filter_warning", DecodedValue::Flag(w)));
        }
        if let Some(d) = self.weekday {
            out.push(("weekday", DecodedValue::Number(f64::from(d))));
        }
        if let (Some(h), Some(m)) = (self.hour, self.minute) {
            out.push(("time", vec![f64::from(h), f64::from(m)].into()));
        }
        if let (Some(d), Some(m), Some(y)) = (self.day, self.month, self.year) {
            out.push(("date", vec![f64::from(d), f64::from(m), f64::from(y)].into()));
        }
        out
    }
}

/// Pack 48 slots into 24 bytes, even slot in the low nibble.
pub fn pack_calendar(day: &CalendarDay) -> [u8; CALENDAR_PACKED_LEN] {
    let mut out = [0; CALENDAR_PACKED_LEN];
    for (byte, pair) in out.iter_mut().zip(day.slots().chunks_exact(2)) {
        *byte = (*pair[0] & 0x0F) | (*pair[1] << 4);
    }
    out
}

/// Inverse of [`pack_calendar`]. `packed` must be exactly 24 bytes.
pub fn unpack_calendar(packed: &[u8]) -> Result<CalendarDay, Error> {
    ensure!(
        packed.len() == CALENDAR_PACKED_LEN,
        PayloadLengthMismatchSnafu {
            name: "calendar",
            expected: CALENDAR_PACKED_LEN,
            actual: packed.len(),
        }
    );
    let mut slots = [Level::default(); SLOTS_PER_DAY];
    for (i, slot) in slots.iter_mut().enumerate() {
        let byte = packed[i / 2];
        let nibble = if i % 2 == 0 { byte & 0x0F } else { byte >> 4 };
        *slot = Level::new(nibble)
            .ok()
            .context(InvalidSlotLevelSnafu { slot: i, level: nibble })?;
    }
    Ok(CalendarDay::from_slots(slots))
}

/// Calendar responses come as the bare 24 packed bytes, or behind two
/// leading bytes (26 bytes, or 51 in the extended layout).
fn unpack_calendar_payload(name: &'static str, payload: &[u8]) -> Result<CalendarDay, Error> {
    let packed = match payload.len() {
        CALENDAR_PACKED_LEN => payload,
        26 | CALENDAR_EXTENDED_LEN => &payload[2..2 + CALENDAR_PACKED_LEN],
        actual => {
            return PayloadLengthMismatchSnafu {
                name,
                expected: CALENDAR_PACKED_LEN,
                actual,
            }
            .fail()
        }
    };
    unpack_calendar(packed)
}

/// Write data for a calendar day in the extended layout:
/// two zero bytes, 24 packed bytes, 25 zero bytes.
pub fn calendar_write_data(day: &CalendarDay) -> Vec<u8> {
    let mut data = vec![0u8; CALENDAR_EXTENDED_LEN];
    data[2..2 + CALENDAR_PACKED_LEN].copy_from_slice(&pack_calendar(day));
    data
}

fn calendar_from_value(name: &'static str, value: &DecodedValue) -> Result<CalendarDay, WriteRejected> {
    match value {
        DecodedValue::Calendar(day) => Ok(*day),
        DecodedValue::Sequence(v) => {
            ensure!(
                v.len() == SLOTS_PER_DAY,
                WrongLengthSnafu {
                    name,
                    expected: SLOTS_PER_DAY,
                    actual: v.len(),
                }
            );
            let mut slots = [Level::default(); SLOTS_PER_DAY];
            for (slot, (dst, level)) in slots.iter_mut().zip(v).enumerate() {
                ensure!(
                    level.fract() == 0.0 && (0.0..=4.0).contains(level),
                    rejected::InvalidSlotLevelSnafu { slot, level: *level }
                );
                *dst = Level::new(*level as u8)
                    .ok()
                    .context(rejected::InvalidSlotLevelSnafu { slot, level: *level })?;
            }
            Ok(CalendarDay::from_slots(slots))
        }
        _ => WrongKindSnafu {
            name,
            expected: "48 calendar levels",
        }
        .fail(),
    }
}

fn raw_bounds(desc: &VariableDescriptor) -> (i64, i64) {
    let bits = desc.width.bits();
    if desc.signed {
        (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
    } else {
        (0, (1i64 << bits) - 1)
    }
}

const DATE_LIMITS: [(f64, f64); 3] = [(1.0, 31.0), (1.0, 12.0), (0.0, 99.0)];
const TIME_LIMITS: [(f64, f64); 2] = [(0.0, 23.0), (0.0, 59.0)];

/// Bounds for the element at `position`, before the raw width check.
fn element_limits(desc: &VariableDescriptor, position: usize) -> Option<(f64, f64)> {
    match desc.codec {
        Codec::Date => DATE_LIMITS.get(position).copied(),
        Codec::Time => TIME_LIMITS.get(position).copied(),
        _ => desc.limits,
    }
}

fn encode_element(
    desc: &VariableDescriptor,
    position: usize,
    value: f64,
    out: &mut Vec<u8>,
) -> Result<(), WriteRejected> {
    let (raw_min, raw_max) = raw_bounds(desc);
    let (min, max) = element_limits(desc, position).unwrap_or((
        apply_scale(raw_min, desc.scale),
        apply_scale(raw_max, desc.scale),
    ));
    ensure!(
        value.is_finite() && value >= min && value <= max,
        OutOfRangeSnafu {
            name: desc.name,
            value,
            min,
            max,
        }
    );
    let raw = remove_scale(value, desc.scale) as i64;
    ensure!(
        raw >= raw_min && raw <= raw_max,
        OutOfRangeSnafu {
            name: desc.name,
            value,
            min,
            max,
        }
    );
    out.extend_from_slice(&raw.to_le_bytes()[..desc.width.bytes()]);
    Ok(())
}

/// Validate `value` against the descriptor and encode the write data.
/// # Errors
/// Any [`WriteRejected`] reason; nothing is clamped.
pub fn encode_variable(desc: &VariableDescriptor, value: &DecodedValue) -> Result<Vec<u8>, WriteRejected> {
    ensure!(desc.is_writable(), NotWritableSnafu { name: desc.name });
    if desc.codec == Codec::Calendar {
        return Ok(calendar_write_data(&calendar_from_value(desc.name, value)?));
    }
    let elements: Vec<f64> = match value {
        DecodedValue::Number(n) => vec![*n],
        DecodedValue::Flag(b) => vec![f64::from(u8::from(*b))],
        DecodedValue::Sequence(v) => v.clone(),
        DecodedValue::Calendar(_) => {
            return WrongKindSnafu {
                name: desc.name,
                expected: "a number",
            }
            .fail()
        }
    };
    ensure!(
        elements.len() == usize::from(desc.count),
        WrongLengthSnafu {
            name: desc.name,
            expected: usize::from(desc.count),
            actual: elements.len(),
        }
    );
    let mut data = Vec::with_capacity(desc.payload_len());
    for (position, value) in elements.into_iter().enumerate() {
        encode_element(desc, position, value, &mut data)?;
    }
    Ok(data)
}

/// Encode a complete write frame from `client` for `desc`.
pub fn write_frame(
    client: u8,
    desc: &VariableDescriptor,
    value: &DecodedValue,
) -> Result<crate::frame::FrameBytes, WriteRejected> {
    let data = encode_variable(desc, value)?;
    Ok(crate::frame::write_request(client, desc.index, &data)?)
}

fn known(index: u8, name: &str) -> Result<&'static VariableDescriptor, WriteRejected> {
    crate::vars::lookup(index).context(rejected::UnknownVariableSnafu { name })
}

/// Validate a device date. `year` may be two- or four-digit (2000-2099).
pub fn date_value(day: u8, month: u8, year: u16) -> Result<DecodedValue, WriteRejected> {
    let year = if year >= 2000 { year - 2000 } else { year };
    let value: DecodedValue = vec![f64::from(day), f64::from(month), f64::from(year)].into();
    encode_variable(known(crate::vars::DATE, "date")?, &value)?;
    Ok(value)
}

/// Validate a device time of day.
pub fn time_value(hour: u8, minute: u8) -> Result<DecodedValue, WriteRejected> {
    let value: DecodedValue = vec![f64::from(hour), f64::from(minute)].into();
    encode_variable(known(crate::vars::TIME, "time")?, &value)?;
    Ok(value)
}
