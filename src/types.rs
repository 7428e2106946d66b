//! This module defines range-checked types for fan levels, weekdays and
//! calendar days, meant to simplify correct usage of the API.

use snafu::{ensure, OptionExt, Snafu};

use core::convert::{TryFrom, TryInto};
use core::fmt;
use core::ops::Deref;

/// Error type for this module
#[derive(Debug, Snafu, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The value isn't a valid fan level.
    #[snafu(display("Invalid fan level"))]
    InvalidLevel,
    /// The value isn't a valid weekday index.
    #[snafu(display("Invalid weekday"))]
    InvalidWeekday,
}

const fn invalid_level() -> InvalidLevelSnafu {
    InvalidLevelSnafu
}

const fn invalid_weekday() -> InvalidWeekdaySnafu {
    InvalidWeekdaySnafu
}

/// Highest fan level understood by the device.
pub const MAX_LEVEL: u8 = 4;

/// Level is a range-checked [0, 4] integer, representing a fan level.
///
/// Level 0 switches the ventilation off, 4 is the maximum.
///
/// ## Example
/// ```
/// use helios_proto::Level;
/// use std::convert::TryInto;
/// let level = Level::new(2).unwrap();
/// let level: Level = 2u8.try_into().unwrap();
/// assert!(Level::new(5).is_err());
/// ```
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash, Default)]
#[repr(transparent)]
pub struct Level(u8);

/// Create a new [`Level`], panics if it is out of range.
pub const fn level(l: u8) -> Level {
    if l <= MAX_LEVEL {
        return Level(l);
    }
    panic!("Invalid fan level.")
}

impl Level {
    /// Create a new level, checking that it is in \[0, 4\].
    /// # Errors
    /// Returns [`Error::InvalidLevel`] if `level` is out of range.
    pub fn new(level: impl TryInto<u8>) -> Result<Self, Error> {
        let level = level.try_into().ok().with_context(invalid_level)?;
        ensure!(level <= MAX_LEVEL, invalid_level());
        Ok(Self(level))
    }
}

impl Deref for Level {
    type Target = u8;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PartialEq<u8> for Level {
    fn eq(&self, other: &u8) -> bool {
        self.0 == *other
    }
}

impl TryFrom<u8> for Level {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Level> for u8 {
    fn from(level: Level) -> Self {
        level.0
    }
}

#[cfg(test)]
mod level_tests {
    use super::{level, Level};

    #[test]
    fn test_valid_levels() {
        for n in 0..=4u8 {
            let l = Level::new(n).unwrap();
            assert_eq!(*l, n);
            assert_eq!(l, level(n));
        }
    }

    #[test]
    fn test_invalid_levels() {
        assert!(Level::new(5).is_err());
        assert!(Level::new(255).is_err());
        assert!(Level::new(-1).is_err());
        assert!(Level::new(300).is_err());
    }
}

/// `Weekday` is a range-checked \[0, 6\] day index, Monday first.
///
/// The device keeps one calendar variable per weekday, at indices 0x00 (Monday)
/// to 0x06 (Sunday).
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct Weekday(u8);

const WEEKDAY_NAMES: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

impl Weekday {
    /// All weekdays, Monday first.
    pub const ALL: [Weekday; 7] = [
        Weekday(0),
        Weekday(1),
        Weekday(2),
        Weekday(3),
        Weekday(4),
        Weekday(5),
        Weekday(6),
    ];

    /// Create a new `Weekday`, checking that it is in \[0, 6\].
    /// # Errors
    /// Returns [`Error::InvalidWeekday`] if `day` is out of range.
    pub fn new(day: impl TryInto<u8>) -> Result<Self, Error> {
        let day = day.try_into().ok().with_context(invalid_weekday)?;
        ensure!(day <= 6, invalid_weekday());
        Ok(Self(day))
    }

    /// The calendar variable index holding this day's schedule.
    pub const fn calendar_variable(self) -> u8 {
        self.0
    }

    /// Map a calendar variable index back to its weekday.
    pub fn from_calendar_variable(index: u8) -> Option<Self> {
        Self::new(index).ok()
    }

    /// Three letter lowercase name, "mon" to "sun".
    pub const fn short_name(self) -> &'static str {
        WEEKDAY_NAMES[self.0 as usize]
    }
}

impl Deref for Weekday {
    type Target = u8;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Number of half-hour slots in one calendar day.
pub const SLOTS_PER_DAY: usize = 48;

/// One weekday's ventilation schedule: a fan level for every half hour.
///
/// Slot `i` covers `i / 2` o'clock, minutes `:00-:29` for even `i` and
/// `:30-:59` for odd `i`.
#[derive(PartialEq, Eq, Clone, Copy, Hash)]
pub struct CalendarDay([Level; SLOTS_PER_DAY]);

impl CalendarDay {
    /// A day with every slot at `level`.
    pub const fn uniform(level: Level) -> Self {
        Self([level; SLOTS_PER_DAY])
    }

    /// Build a day from 48 raw levels.
    ///
    /// Fails if `levels` doesn't hold exactly 48 entries, or names the
    /// first slot holding a level outside \[0, 4\].
    pub fn from_levels(levels: &[u8]) -> Result<Self, CalendarError> {
        if levels.len() != SLOTS_PER_DAY {
            return Err(CalendarError::WrongLength(levels.len()));
        }
        let mut slots = [Level::default(); SLOTS_PER_DAY];
        for (slot, (dst, raw)) in slots.iter_mut().zip(levels).enumerate() {
            *dst = Level::new(*raw).map_err(|_| CalendarError::InvalidLevel {
                slot,
                level: *raw,
            })?;
        }
        Ok(Self(slots))
    }

    pub(crate) const fn from_slots(slots: [Level; SLOTS_PER_DAY]) -> Self {
        Self(slots)
    }

    /// The slots as plain integers.
    pub fn levels(&self) -> [u8; SLOTS_PER_DAY] {
        let mut out = [0; SLOTS_PER_DAY];
        for (dst, l) in out.iter_mut().zip(self.0.iter()) {
            *dst = **l;
        }
        out
    }

    pub fn slots(&self) -> &[Level; SLOTS_PER_DAY] {
        &self.0
    }

    /// Level at `hour:minute`, `None` if the time is invalid.
    pub fn level_at(&self, hour: u8, minute: u8) -> Option<Level> {
        if hour > 23 || minute > 59 {
            return None;
        }
        let slot = hour as usize * 2 + usize::from(minute >= 30);
        Some(self.0[slot])
    }
}

impl Default for CalendarDay {
    fn default() -> Self {
        Self::uniform(Level::default())
    }
}

impl fmt::Debug for CalendarDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // one digit per slot, grouped per hour
        for (i, l) in self.0.iter().enumerate() {
            if i > 0 && i % 2 == 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", **l)?;
        }
        Ok(())
    }
}

/// Reason a raw level array was not accepted as a [`CalendarDay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarError {
    /// The array didn't hold exactly 48 slots.
    WrongLength(usize),
    /// The slot held a level outside \[0, 4\].
    InvalidLevel { slot: usize, level: u8 },
}

#[cfg(test)]
mod calendar_tests {
    use super::*;

    #[test]
    fn test_weekday() {
        assert_eq!(Weekday::new(0).unwrap().short_name(), "mon");
        assert_eq!(Weekday::new(6).unwrap().to_string(), "sun");
        assert!(Weekday::new(7).is_err());
        assert_eq!(Weekday::from_calendar_variable(0x03), Weekday::new(3).ok());
        assert_eq!(Weekday::from_calendar_variable(0x07), None);
    }

    #[test]
    fn test_calendar_from_levels() {
        let levels: Vec<u8> = (0..48).map(|i| (i % 5) as u8).collect();
        let day = CalendarDay::from_levels(&levels).unwrap();
        assert_eq!(day.levels().to_vec(), levels);

        assert_eq!(
            CalendarDay::from_levels(&levels[..47]),
            Err(CalendarError::WrongLength(47))
        );

        let mut bad = levels.clone();
        bad[17] = 5;
        assert_eq!(
            CalendarDay::from_levels(&bad),
            Err(CalendarError::InvalidLevel { slot: 17, level: 5 })
        );
    }

    #[test]
    fn test_level_at() {
        let mut levels = [1u8; 48];
        levels[15] = 3; // 07:30-07:59
        let day = CalendarDay::from_levels(&levels).unwrap();
        assert_eq!(day.level_at(7, 29), Some(level(1)));
        assert_eq!(day.level_at(7, 30), Some(level(3)));
        assert_eq!(day.level_at(24, 0), None);
    }
}
