//! This module defines range-checked types for the console's packed date and
//! time stamps, and the scaled measurement type used by the record codecs.

use snafu::{ensure, Snafu};

use core::cmp::Ordering;
use core::fmt;

/// Error type for this module
#[derive(Debug, Snafu, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The value isn't a date the console can store.
    #[snafu(display("Invalid date {year}-{month:02}-{day:02}"))]
    InvalidDate { year: u16, month: u8, day: u8 },
    /// The value isn't a valid time of day.
    #[snafu(display("Invalid time {hour:02}:{minute:02}"))]
    InvalidTime { hour: u8, minute: u8 },
}

/// Raw datestamp value marking an unused archive slot.
pub(crate) const BLANK_DATESTAMP: u16 = 0xFFFF;

/// Calendar date in the console's packed two-byte encoding:
/// `day + month * 32 + (year - 2000) * 512`.
///
/// ## Example
/// ```
/// use wxconsole_proto::Datestamp;
/// let date = Datestamp::new(2003, 6, 12).unwrap();
/// assert_eq!(date.to_raw(), 12 + 6 * 32 + 3 * 512);
/// ```
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
pub struct Datestamp {
    // field order gives chronological ordering
    year: u16,
    month: u8,
    day: u8,
}

impl Datestamp {
    /// Create a new date, checking that it is representable in the packed
    /// encoding (years 2000 through 2127).
    /// # Errors
    /// Returns [`Error::InvalidDate`] if any field is out of range.
    pub fn new(year: u16, month: u8, day: u8) -> Result<Self, Error> {
        ensure!(
            (2000..=2127).contains(&year) && (1..=12).contains(&month) && (1..=31).contains(&day),
            InvalidDateSnafu { year, month, day }
        );
        Ok(Self { year, month, day })
    }

    /// Unpack a raw datestamp.
    /// # Errors
    /// Returns [`Error::InvalidDate`] for blank or corrupt stamps.
    pub fn from_raw(raw: u16) -> Result<Self, Error> {
        let day = (raw & 0x1F) as u8;
        let month = ((raw >> 5) & 0x0F) as u8;
        let year = 2000 + (raw >> 9);
        Self::new(year, month, day)
    }

    pub const fn to_raw(self) -> u16 {
        self.day as u16 + self.month as u16 * 32 + (self.year - 2000) * 512
    }

    pub const fn year(self) -> u16 {
        self.year
    }

    pub const fn month(self) -> u8 {
        self.month
    }

    pub const fn day(self) -> u8 {
        self.day
    }
}

impl fmt::Display for Datestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Time of day in the console's packed encoding: `hour * 100 + minute`.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
pub struct Timestamp {
    hour: u8,
    minute: u8,
}

impl Timestamp {
    /// # Errors
    /// Returns [`Error::InvalidTime`] unless `hour < 24` and `minute < 60`.
    pub fn new(hour: u8, minute: u8) -> Result<Self, Error> {
        ensure!(hour < 24 && minute < 60, InvalidTimeSnafu { hour, minute });
        Ok(Self { hour, minute })
    }

    /// Unpack a raw timestamp.
    /// # Errors
    /// Returns [`Error::InvalidTime`] if the value doesn't decode to a valid time.
    pub fn from_raw(raw: u16) -> Result<Self, Error> {
        let hour = u8::try_from(raw / 100).unwrap_or(u8::MAX);
        Self::new(hour, (raw % 100) as u8)
    }

    pub const fn to_raw(self) -> u16 {
        self.hour as u16 * 100 + self.minute as u16
    }

    pub const fn hour(self) -> u8 {
        self.hour
    }

    pub const fn minute(self) -> u8 {
        self.minute
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Date and time of an archive record. Used both as the key of downloaded
/// records and as the download watermark.
///
/// Ordering is chronological: by date, then by time within the same date.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
pub struct ArchiveStamp {
    pub date: Datestamp,
    pub time: Timestamp,
}

impl ArchiveStamp {
    pub const fn new(date: Datestamp, time: Timestamp) -> Self {
        Self { date, time }
    }

    /// Decode the four wire bytes (datestamp then timestamp, high byte first).
    /// # Errors
    /// Returns an error for blank or corrupt stamps.
    pub fn from_wire(bytes: [u8; 4]) -> Result<Self, Error> {
        let date = Datestamp::from_raw(u16::from_be_bytes([bytes[0], bytes[1]]))?;
        let time = Timestamp::from_raw(u16::from_be_bytes([bytes[2], bytes[3]]))?;
        Ok(Self { date, time })
    }

    /// The four wire bytes sent in the dump-after-date sub-frame.
    pub fn to_wire(self) -> [u8; 4] {
        let d = self.date.to_raw().to_be_bytes();
        let t = self.time.to_raw().to_be_bytes();
        [d[0], d[1], t[0], t[1]]
    }

    /// True if `self` is strictly later than `other`: a later date, or the
    /// same date and a later time.
    pub fn is_newer_than(&self, other: &Self) -> bool {
        self > other
    }
}

impl PartialOrd for ArchiveStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ArchiveStamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.date
            .cmp(&other.date)
            .then_with(|| self.time.cmp(&other.time))
    }
}

impl fmt::Display for ArchiveStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date, self.time)
    }
}


/// A scaled reading decoded from a record field.
///
/// The raw integer is kept as received. [`value()`](Self::value) always
/// returns the scaled number, including for sentinel values, so callers must
/// check [`is_set()`](Self::is_set) to tell a real reading from a dashed one.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Measurement {
    raw: i32,
    divisor: u16,
    offset: i32,
    sentinel: Option<i32>,
}

impl Measurement {
    /// A reading of `raw / divisor`.
    pub const fn scaled(raw: i32, divisor: u16) -> Self {
        Self {
            raw,
            divisor,
            offset: 0,
            sentinel: None,
        }
    }

    /// A reading whose raw value carries a fixed offset, e.g. one-byte
    /// temperatures stored as `degrees + 90`.
    pub const fn offset(raw: i32, offset: i32) -> Self {
        Self {
            raw,
            divisor: 1,
            offset,
            sentinel: None,
        }
    }

    /// Mark `sentinel` as the "sensor absent" raw value.
    pub const fn with_sentinel(mut self, sentinel: i32) -> Self {
        self.sentinel = Some(sentinel);
        self
    }

    /// True unless the raw value equals the sentinel.
    pub fn is_set(&self) -> bool {
        self.sentinel != Some(self.raw)
    }

    /// The raw integer as received.
    pub const fn raw(&self) -> i32 {
        self.raw
    }

    /// The scaled engineering value.
    pub fn value(&self) -> f64 {
        f64::from(self.raw - self.offset) / f64::from(self.divisor)
    }

    /// The scaled value, or `None` if the reading is dashed.
    pub fn get(&self) -> Option<f64> {
        if self.is_set() {
            Some(self.value())
        } else {
            None
        }
    }
}
