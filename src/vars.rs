//! Static metadata for every known variable index of the EC-Pro controller.
//!
//! The table is sorted by index; [`lookup`] is a binary search.

use core::fmt;

/// Width of one element of a variable's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Bits8,
    Bits16,
    Bits32,
}

impl Width {
    pub const fn bytes(self) -> usize {
        match self {
            Width::Bits8 => 1,
            Width::Bits16 => 2,
            Width::Bits32 => 4,
        }
    }

    pub const fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }
}

/// Whether the host may read, write, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Selects the payload decoder for a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Little-endian integers, scaled.
    Numeric,
    /// 48 half-hour fan levels packed into nibbles.
    Calendar,
    /// The ten-word sensor temperature block.
    Temperatures,
    /// Day, month and two-digit year bytes.
    Date,
    /// Hour and minute bytes.
    Time,
}

/// Immutable description of how one variable index is encoded on the bus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariableDescriptor {
    pub index: u8,
    /// Stable key used in the device state store.
    pub name: &'static str,
    pub label: &'static str,
    pub width: Width,
    pub count: u8,
    pub signed: bool,
    pub scale: f64,
    pub access: Access,
    pub unit: Option<&'static str>,
    pub note: Option<&'static str>,
    pub codec: Codec,
    /// Inclusive bounds for written values, in scaled units.
    pub limits: Option<(f64, f64)>,
}

impl VariableDescriptor {
    /// A read-only single unsigned byte with unit scale.
    pub const fn new(index: u8, name: &'static str, label: &'static str) -> Self {
        Self {
            index,
            name,
            label,
            width: Width::Bits8,
            count: 1,
            signed: false,
            scale: 1.0,
            access: Access::ReadOnly,
            unit: None,
            note: None,
            codec: Codec::Numeric,
            limits: None,
        }
    }

    pub const fn width(self, width: Width) -> Self {
        Self { width, ..self }
    }

    pub const fn count(self, count: u8) -> Self {
        Self { count, ..self }
    }

    pub const fn signed(self) -> Self {
        Self {
            signed: true,
            ..self
        }
    }

    pub const fn scale(self, scale: f64) -> Self {
        Self { scale, ..self }
    }

    pub const fn access(self, access: Access) -> Self {
        Self { access, ..self }
    }

    pub const fn unit(self, unit: &'static str) -> Self {
        Self {
            unit: Some(unit),
            ..self
        }
    }

    pub const fn note(self, note: &'static str) -> Self {
        Self {
            note: Some(note),
            ..self
        }
    }

    pub const fn codec(self, codec: Codec) -> Self {
        Self { codec, ..self }
    }

    pub const fn limits(self, min: f64, max: f64) -> Self {
        Self {
            limits: Some((min, max)),
            ..self
        }
    }

    /// Nominal payload length in bytes, excluding the variable index.
    pub const fn payload_len(&self) -> usize {
        self.width.bytes() * self.count as usize
    }

    pub const fn is_readable(&self) -> bool {
        !matches!(self.access, Access::WriteOnly)
    }

    pub const fn is_writable(&self) -> bool {
        !matches!(self.access, Access::ReadOnly)
    }
}

impl fmt::Display for VariableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X} {} ({})", self.index, self.name, self.label)
    }
}

/// Variable index of the temperature block.
pub const TEMPERATURES: u8 = 0x3A;
/// Variable index of the current fan level.
pub const FAN_LEVEL: u8 = 0x35;
pub const DATE: u8 = 0x07;
pub const TIME: u8 = 0x08;
pub const PARTY_MINUTES_REMAINING: u8 = 0x10;
pub const QUIET_MINUTES_REMAINING: u8 = 0x54;

use Access::*;
use Width::*;

const fn level(index: u8, name: &'static str, label: &'static str) -> VariableDescriptor {
    VariableDescriptor::new(index, name, label)
        .access(ReadWrite)
        .limits(0.0, 4.0)
}

const fn switch(index: u8, name: &'static str, label: &'static str) -> VariableDescriptor {
    VariableDescriptor::new(index, name, label)
        .access(ReadWrite)
        .limits(0.0, 1.0)
}

const fn calendar(index: u8, name: &'static str, label: &'static str) -> VariableDescriptor {
    VariableDescriptor::new(index, name, label)
        .count(24)
        .access(ReadWrite)
        .codec(Codec::Calendar)
        .note("48 half-hour fan levels, two per byte")
}

const fn unknown(index: u8, name: &'static str, label: &'static str) -> VariableDescriptor {
    VariableDescriptor::new(index, name, label).note("meaning not known")
}

const fn tenths(index: u8, name: &'static str, label: &'static str) -> VariableDescriptor {
    VariableDescriptor::new(index, name, label)
        .width(Bits16)
        .signed()
        .scale(0.1)
        .unit("°C")
}

/// Every variable index known to the controller, sorted by index.
pub static VARIABLES: &[VariableDescriptor] = &[
    calendar(0x00, "calendar_mon", "Calendar Monday"),
    calendar(0x01, "calendar_tue", "Calendar Tuesday"),
    calendar(0x02, "calendar_wed", "Calendar Wednesday"),
    calendar(0x03, "calendar_thu", "Calendar Thursday"),
    calendar(0x04, "calendar_fri", "Calendar Friday"),
    calendar(0x05, "calendar_sat", "Calendar Saturday"),
    calendar(0x06, "calendar_sun", "Calendar Sunday"),
    VariableDescriptor::new(DATE, "date", "Device date")
        .count(3)
        .codec(Codec::Date)
        .access(ReadWrite)
        .note("day, month, two-digit year"),
    VariableDescriptor::new(TIME, "time", "Device time")
        .count(2)
        .codec(Codec::Time)
        .access(ReadWrite)
        .note("hour, minute"),
    switch(0x0D, "backup_heating", "Backup heating"),
    tenths(0x0E, "preheat_temp_request", "Preheat temperature request")
        .note("mirrors preheat_temp"),
    VariableDescriptor::new(0x0F, "party_enabled", "Party mode")
        .access(WriteOnly)
        .limits(0.0, 1.0),
    VariableDescriptor::new(PARTY_MINUTES_REMAINING, "party_minutes_remaining", "Party time left")
        .width(Bits16)
        .unit("min"),
    VariableDescriptor::new(0x11, "party_duration", "Party duration")
        .width(Bits16)
        .access(ReadWrite)
        .unit("min")
        .limits(0.0, 1440.0),
    VariableDescriptor::new(0x14, "ext_contact", "External contact"),
    VariableDescriptor::new(0x15, "hours_on", "Operating hours")
        .width(Bits32)
        .unit("h"),
    VariableDescriptor::new(0x16, "fan1_voltage", "Fan level 1 voltage")
        .width(Bits16)
        .count(2)
        .scale(0.1)
        .unit("V")
        .note("supply, extract"),
    VariableDescriptor::new(0x17, "fan2_voltage", "Fan level 2 voltage")
        .width(Bits16)
        .count(2)
        .scale(0.1)
        .unit("V")
        .note("supply, extract"),
    VariableDescriptor::new(0x18, "fan3_voltage", "Fan level 3 voltage")
        .width(Bits16)
        .count(2)
        .scale(0.1)
        .unit("V")
        .note("supply, extract"),
    VariableDescriptor::new(0x19, "fan4_voltage", "Fan level 4 voltage")
        .width(Bits16)
        .count(2)
        .scale(0.1)
        .unit("V")
        .note("supply, extract"),
    VariableDescriptor::new(0x1A, "vacation_start", "Vacation start")
        .count(3)
        .codec(Codec::Date)
        .access(ReadWrite)
        .note("day, month, two-digit year"),
    VariableDescriptor::new(0x1B, "vacation_end", "Vacation end")
        .count(3)
        .codec(Codec::Date)
        .access(ReadWrite)
        .note("day, month, two-digit year"),
    unknown(0x1C, "unknown_1c", "Unknown 0x1C").width(Bits16),
    unknown(0x1D, "unknown_1d", "Unknown 0x1D"),
    tenths(0x1E, "bypass1_temp", "Bypass 1 outdoor limit")
        .access(ReadWrite)
        .limits(-20.0, 40.0),
    tenths(0x1F, "frost_protection_temp", "Frost protection temperature")
        .access(ReadWrite)
        .limits(-20.0, 20.0),
    unknown(0x20, "unknown_20", "Unknown 0x20"),
    VariableDescriptor::new(0x21, "week_offset_co2", "Week offset CO2")
        .access(ReadWrite)
        .unit("ppm"),
    VariableDescriptor::new(0x22, "week_offset_humidity", "Week offset humidity")
        .access(ReadWrite)
        .unit("%"),
    VariableDescriptor::new(0x23, "week_offset_temp", "Week offset temperature")
        .access(ReadWrite)
        .unit("°C"),
    level(FAN_LEVEL, "fan_level", "Fan level"),
    level(0x37, "min_fan_level", "Minimum fan level"),
    VariableDescriptor::new(0x38, "filter_change_months", "Filter change interval")
        .access(ReadWrite)
        .unit("months")
        .limits(0.0, 12.0),
    VariableDescriptor::new(TEMPERATURES, "temperatures", "Temperature sensors")
        .width(Bits16)
        .count(10)
        .signed()
        .scale(0.1)
        .unit("°C")
        .codec(Codec::Temperatures)
        .note("outdoor, extract, exhaust, supply, then six unnamed"),
    VariableDescriptor::new(0x3B, "co2_sensors", "CO2 sensors")
        .width(Bits16)
        .count(4)
        .unit("ppm"),
    VariableDescriptor::new(0x3C, "humidity_sensors", "Humidity sensors")
        .width(Bits16)
        .count(4)
        .unit("%"),
    unknown(0x3F, "unknown_3f", "Unknown 0x3F"),
    unknown(0x40, "unknown_40", "Unknown 0x40"),
    unknown(0x41, "unknown_41", "Unknown 0x41"),
    level(0x42, "party_level", "Party fan level"),
    unknown(0x43, "unknown_43", "Unknown 0x43"),
    unknown(0x44, "unknown_44", "Unknown 0x44"),
    level(0x45, "supply_level", "Supply fan level"),
    level(0x46, "extract_level", "Extract fan level"),
    unknown(0x47, "unknown_47", "Unknown 0x47"),
    VariableDescriptor::new(0x48, "software_version", "Software version")
        .width(Bits16)
        .scale(0.01),
    VariableDescriptor::new(0x49, "run_on_time", "Run-on time")
        .access(ReadWrite)
        .unit("s"),
    unknown(0x4A, "unknown_4a", "Unknown 0x4A"),
    unknown(0x4B, "unknown_4b", "Unknown 0x4B"),
    unknown(0x4C, "unknown_4c", "Unknown 0x4C"),
    unknown(0x4D, "unknown_4d", "Unknown 0x4D"),
    switch(0x4E, "vacation_enabled", "Vacation mode"),
    switch(0x4F, "preheat_enabled", "Preheater"),
    tenths(0x50, "preheat_temp", "Preheat temperature")
        .access(ReadWrite)
        .limits(-20.0, 20.0),
    unknown(0x51, "unknown_51", "Unknown 0x51"),
    switch(0x52, "week_offset_enabled", "Week offset"),
    VariableDescriptor::new(QUIET_MINUTES_REMAINING, "quiet_minutes_remaining", "Quiet time left")
        .width(Bits16)
        .unit("min"),
    VariableDescriptor::new(0x55, "quiet_enabled", "Quiet mode")
        .access(WriteOnly)
        .limits(0.0, 1.0),
    VariableDescriptor::new(0x56, "quiet_duration", "Quiet duration")
        .access(ReadWrite)
        .unit("min"),
    level(0x57, "quiet_level", "Quiet fan level"),
    unknown(0x58, "unknown_58", "Unknown 0x58").count(26),
    unknown(0x59, "unknown_59", "Unknown 0x59").count(26),
    unknown(0x5A, "unknown_5a", "Unknown 0x5A").count(26),
    unknown(0x5B, "unknown_5b", "Unknown 0x5B").count(26),
    unknown(0x5C, "unknown_5c", "Unknown 0x5C").count(26),
    unknown(0x5D, "unknown_5d", "Unknown 0x5D").count(26),
    unknown(0x5E, "unknown_5e", "Unknown 0x5E").count(26),
    unknown(0x5F, "unknown_5f", "Unknown 0x5F"),
    VariableDescriptor::new(0x60, "bypass2_temp", "Bypass 2 temperature")
        .access(ReadWrite)
        .unit("°C"),
    unknown(0x61, "unknown_61", "Unknown 0x61").count(3),
    unknown(0x62, "unknown_62", "Unknown 0x62").count(3),
    unknown(0x63, "unknown_63", "Unknown 0x63").count(3),
    unknown(0x64, "unknown_64", "Unknown 0x64").count(3),
    unknown(0x65, "unknown_65", "Unknown 0x65").width(Bits16),
    unknown(0x66, "unknown_66", "Unknown 0x66").width(Bits16),
    unknown(0x67, "unknown_67", "Unknown 0x67").width(Bits32),
];

/// Find the descriptor for a variable index.
pub fn lookup(index: u8) -> Option<&'static VariableDescriptor> {
    VARIABLES
        .binary_search_by_key(&index, |v| v.index)
        .ok()
        .map(|i| &VARIABLES[i])
}

/// Find the descriptor for a state store key.
pub fn by_name(name: &str) -> Option<&'static VariableDescriptor> {
    VARIABLES.iter().find(|v| v.name == name)
}
