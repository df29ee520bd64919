//! Decoders for the console's fixed-layout binary records.
//!
//! Every decoder is a pure function of its input buffer. Offsets are fixed by
//! the console firmware. Two-byte fields are reassembled high byte first.
//! Dashed (absent sensor) values keep their raw sentinel, see
//! [`Measurement::is_set`].

use snafu::{ensure, ResultExt, Snafu};

use crate::nom_parser;
use crate::types::{self, ArchiveStamp, Datestamp, Measurement, Timestamp};

/// Error type for this module
#[derive(Debug, Snafu, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The buffer is shorter than the record layout.
    #[snafu(display("Truncated frame: expected {expected} bytes, got {actual}"))]
    Truncated { expected: usize, actual: usize },
    /// A LOOP packet that doesn't start with "LOO".
    #[snafu(display("Missing LOOP signature"))]
    Signature,
    /// Archive record with an unusable date/time stamp.
    #[snafu(display("Invalid archive stamp: {source}"))]
    Stamp { source: types::Error },
    /// A text response that doesn't have the expected shape.
    #[snafu(display("Unparseable text response"))]
    InvalidText,
}

/// Body length of a LOOP packet, CRC excluded.
pub const LOOP_LEN: usize = 97;
/// Length of one archive record (revision B).
pub const ARCHIVE_LEN: usize = 52;
/// Body length of the HILOWS block, CRC excluded.
pub const EXTREMES_LEN: usize = 436;
/// EEPROM address of the alarm threshold block.
pub const ALARM_THRESHOLDS_ADDRESS: u16 = 0x52;
/// Length of the alarm threshold block.
pub const ALARM_THRESHOLDS_LEN: usize = 94;

const DASH_I16: i32 = 0x7FFF;
const DASH_HIGH_I16: i32 = -0x8000;
const DASH_U8: i32 = 0xFF;
const DASH_U16: i32 = 0xFFFF;

/// Bounds-checked view of a record buffer.
struct Fields<'a>(&'a [u8]);

impl<'a> Fields<'a> {
    fn new(buf: &'a [u8], expected: usize) -> Result<Self, Error> {
        ensure!(
            buf.len() >= expected,
            TruncatedSnafu {
                expected,
                actual: buf.len()
            }
        );
        Ok(Self(&buf[..expected]))
    }

    fn u8(&self, offset: usize) -> u8 {
        self.0[offset]
    }

    fn i16(&self, offset: usize) -> i16 {
        i16::from_be_bytes([self.0[offset], self.0[offset + 1]])
    }

    fn u16(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.0[offset], self.0[offset + 1]])
    }

    /// Signed 16-bit value in tenths, dashed at 0x7FFF.
    fn tenths(&self, offset: usize) -> Measurement {
        Measurement::scaled(self.i16(offset).into(), 10).with_sentinel(DASH_I16)
    }

    /// Like `tenths`, for "high" fields which are dashed at 0x8000.
    fn tenths_high(&self, offset: usize) -> Measurement {
        Measurement::scaled(self.i16(offset).into(), 10).with_sentinel(DASH_HIGH_I16)
    }

    fn scaled_i16(&self, offset: usize, divisor: u16, sentinel: i32) -> Measurement {
        Measurement::scaled(self.i16(offset).into(), divisor).with_sentinel(sentinel)
    }

    fn scaled_u16(&self, offset: usize, divisor: u16) -> Measurement {
        Measurement::scaled(self.u16(offset).into(), divisor).with_sentinel(DASH_U16)
    }

    fn byte(&self, offset: usize, divisor: u16) -> Measurement {
        Measurement::scaled(self.u8(offset).into(), divisor).with_sentinel(DASH_U8)
    }

    /// One-byte temperature stored as `degrees + offset`.
    fn byte_temp(&self, offset: usize, bias: i32) -> Measurement {
        Measurement::offset(self.u8(offset).into(), bias).with_sentinel(DASH_U8)
    }

    fn bytes<const N: usize>(&self, offset: usize, divisor: u16) -> [Measurement; N] {
        let mut out = [Measurement::scaled(0, 1); N];
        for (i, m) in out.iter_mut().enumerate() {
            *m = self.byte(offset + i, divisor);
        }
        out
    }

    fn byte_temps<const N: usize>(&self, offset: usize, bias: i32) -> [Measurement; N] {
        let mut out = [Measurement::scaled(0, 1); N];
        for (i, m) in out.iter_mut().enumerate() {
            *m = self.byte_temp(offset + i, bias);
        }
        out
    }

    fn time(&self, offset: usize) -> Option<Timestamp> {
        Timestamp::from_raw(self.u16(offset)).ok()
    }
}

/// A decoded console record.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Loop(LoopRecord),
    Archive(ArchiveRecord),
    Extremes(ExtremesRecord),
    AlarmThresholds(AlarmThresholds),
    Diagnostics(Diagnostics),
    Version(String),
    /// EEPROM contents without a dedicated decoder.
    Eeprom { offset: u16, data: Vec<u8> },
}

/// Current conditions, from the `LOOP` command.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopRecord {
    /// Barometric trend as a signed byte. `'P'` marks a packet without trend.
    pub bar_trend: i8,
    pub packet_type: u8,
    /// Archive memory position of the next record to be written.
    pub next_record: u16,
    /// inHg
    pub barometer: Measurement,
    /// °F
    pub inside_temperature: Measurement,
    /// %
    pub inside_humidity: Measurement,
    /// °F
    pub outside_temperature: Measurement,
    /// mph
    pub wind_speed: Measurement,
    /// mph
    pub wind_speed_10min: Measurement,
    /// Degrees; dashed at zero.
    pub wind_direction: Measurement,
    pub extra_temperatures: [Measurement; 7],
    pub soil_temperatures: [Measurement; 4],
    pub leaf_temperatures: [Measurement; 4],
    pub outside_humidity: Measurement,
    pub extra_humidities: [Measurement; 7],
    /// in/h
    pub rain_rate: Measurement,
    pub uv_index: Measurement,
    /// W/m²
    pub solar_radiation: Measurement,
    /// in
    pub storm_rain: Measurement,
    pub storm_start_raw: u16,
    pub day_rain: Measurement,
    pub month_rain: Measurement,
    pub year_rain: Measurement,
    pub day_et: Measurement,
    pub month_et: Measurement,
    pub year_et: Measurement,
    pub soil_moistures: [Measurement; 4],
    pub leaf_wetnesses: [Measurement; 4],
    pub inside_alarms: u8,
    pub rain_alarms: u8,
    pub outside_alarms: u16,
    pub extra_alarms: [u8; 8],
    pub soil_leaf_alarms: [u8; 4],
    pub transmitter_battery: u8,
    pub console_battery_raw: u16,
    pub forecast_icons: u8,
    pub forecast_rule: u8,
    pub sunrise: Option<Timestamp>,
    pub sunset: Option<Timestamp>,
}

impl LoopRecord {
    /// Decode the LOOP packet body (CRC excluded).
    /// # Errors
    /// [`Error::Truncated`] for short buffers, [`Error::Signature`] if the
    /// packet doesn't start with `LOO`.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        let f = Fields::new(buf, LOOP_LEN)?;
        ensure!(&f.0[..3] == b"LOO", SignatureSnafu);

        let mut extra_alarms = [0u8; 8];
        extra_alarms.copy_from_slice(&f.0[74..82]);
        let mut soil_leaf_alarms = [0u8; 4];
        soil_leaf_alarms.copy_from_slice(&f.0[82..86]);

        Ok(Self {
            bar_trend: f.u8(3) as i8,
            packet_type: f.u8(4),
            next_record: f.u16(5),
            barometer: f.scaled_i16(7, 1000, 0),
            inside_temperature: f.tenths(9),
            inside_humidity: f.byte(11, 1),
            outside_temperature: f.tenths(12),
            wind_speed: f.byte(14, 1),
            wind_speed_10min: f.byte(15, 1),
            wind_direction: f.scaled_i16(16, 1, 0),
            extra_temperatures: f.byte_temps(18, 90),
            soil_temperatures: f.byte_temps(25, 90),
            leaf_temperatures: f.byte_temps(29, 90),
            outside_humidity: f.byte(33, 1),
            extra_humidities: f.bytes(34, 1),
            rain_rate: f.scaled_u16(41, 100),
            uv_index: f.byte(43, 10),
            solar_radiation: f.scaled_i16(44, 1, DASH_I16),
            storm_rain: f.scaled_u16(46, 100),
            storm_start_raw: f.u16(48),
            day_rain: f.scaled_u16(50, 100),
            month_rain: f.scaled_u16(52, 100),
            year_rain: f.scaled_u16(54, 100),
            day_et: f.scaled_u16(56, 1000),
            month_et: f.scaled_u16(58, 100),
            year_et: f.scaled_u16(60, 100),
            soil_moistures: f.bytes(62, 1),
            leaf_wetnesses: f.bytes(66, 1),
            inside_alarms: f.u8(70),
            rain_alarms: f.u8(71),
            outside_alarms: f.u16(72),
            extra_alarms,
            soil_leaf_alarms,
            transmitter_battery: f.u8(86),
            console_battery_raw: f.u16(87),
            forecast_icons: f.u8(89),
            forecast_rule: f.u8(90),
            sunrise: f.time(91),
            sunset: f.time(93),
        })
    }

    /// Start date of the current storm, `None` if no storm is in progress.
    pub fn storm_start(&self) -> Option<Datestamp> {
        if self.storm_start_raw as i32 == DASH_U16 {
            None
        } else {
            Datestamp::from_raw(self.storm_start_raw).ok()
        }
    }

    /// Console battery voltage in volts.
    pub fn console_battery_volts(&self) -> f64 {
        f64::from(self.console_battery_raw) * 300.0 / 512.0 / 100.0
    }
}

/// One historical record from the archive memory.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveRecord {
    pub stamp: ArchiveStamp,
    pub outside_temperature: Measurement,
    pub high_outside_temperature: Measurement,
    pub low_outside_temperature: Measurement,
    /// in
    pub rainfall: Measurement,
    /// in/h
    pub high_rain_rate: Measurement,
    pub barometer: Measurement,
    pub solar_radiation: Measurement,
    pub wind_samples: u16,
    pub inside_temperature: Measurement,
    pub inside_humidity: Measurement,
    pub outside_humidity: Measurement,
    pub average_wind_speed: Measurement,
    pub high_wind_speed: Measurement,
    /// Compass point 0..=15, dashed at 255.
    pub high_wind_direction: Measurement,
    pub prevailing_wind_direction: Measurement,
    pub average_uv_index: Measurement,
    pub et: Measurement,
    pub high_solar_radiation: Measurement,
    pub high_uv_index: Measurement,
    pub forecast_rule: u8,
    pub leaf_temperatures: [Measurement; 2],
    pub leaf_wetnesses: [Measurement; 2],
    pub soil_temperatures: [Measurement; 4],
    pub record_type: u8,
    pub extra_humidities: [Measurement; 2],
    pub extra_temperatures: [Measurement; 3],
    pub soil_moistures: [Measurement; 4],
}

impl ArchiveRecord {
    /// Decode one 52-byte archive record.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        let f = Fields::new(buf, ARCHIVE_LEN)?;
        let stamp = archive_stamp(f.0).context(StampSnafu)?;
        Ok(Self {
            stamp,
            outside_temperature: f.tenths(4),
            high_outside_temperature: f.tenths_high(6),
            low_outside_temperature: f.tenths(8),
            rainfall: f.scaled_u16(10, 100),
            high_rain_rate: f.scaled_u16(12, 100),
            barometer: f.scaled_i16(14, 1000, 0),
            solar_radiation: f.scaled_i16(16, 1, DASH_I16),
            wind_samples: f.u16(18),
            inside_temperature: f.tenths(20),
            inside_humidity: f.byte(22, 1),
            outside_humidity: f.byte(23, 1),
            average_wind_speed: f.byte(24, 1),
            high_wind_speed: f.byte(25, 1),
            high_wind_direction: f.byte(26, 1),
            prevailing_wind_direction: f.byte(27, 1),
            average_uv_index: f.byte(28, 10),
            et: f.byte(29, 1000),
            high_solar_radiation: f.scaled_i16(30, 1, DASH_I16),
            high_uv_index: f.byte(32, 10),
            forecast_rule: f.u8(33),
            leaf_temperatures: f.byte_temps(34, 90),
            leaf_wetnesses: f.bytes(36, 1),
            soil_temperatures: f.byte_temps(38, 90),
            record_type: f.u8(42),
            extra_humidities: f.bytes(43, 1),
            extra_temperatures: f.byte_temps(45, 90),
            soil_moistures: f.bytes(48, 1),
        })
    }
}

/// Stamp of an archive record, without decoding the rest.
pub(crate) fn archive_stamp(record: &[u8]) -> Result<ArchiveStamp, types::Error> {
    ArchiveStamp::from_wire([record[0], record[1], record[2], record[3]])
}

/// Day, month and year lows and highs of one sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct HighLow {
    pub day_low: Measurement,
    pub day_low_time: Option<Timestamp>,
    pub day_high: Measurement,
    pub day_high_time: Option<Timestamp>,
    pub month_low: Measurement,
    pub month_high: Measurement,
    pub year_low: Measurement,
    pub year_high: Measurement,
}

/// Day, month and year peak of a sensor that only tracks one direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Peak {
    pub day: Measurement,
    pub day_time: Option<Timestamp>,
    pub month: Measurement,
    pub year: Measurement,
}

/// Extremes from the `HILOWS` command.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtremesRecord {
    pub barometer: HighLow,
    pub wind_speed: Peak,
    pub inside_temperature: HighLow,
    pub inside_humidity: HighLow,
    pub outside_temperature: HighLow,
    pub dew_point: HighLow,
    /// Lowest wind chill.
    pub wind_chill: Peak,
    /// Highest heat index.
    pub heat_index: Peak,
    pub thsw_index: Peak,
    pub solar_radiation: Peak,
    pub uv_index: Peak,
    pub rain_rate: Peak,
    pub rain_rate_hour_high: Measurement,
}

impl ExtremesRecord {
    /// Decode the 436-byte HILOWS body (CRC excluded).
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        let f = Fields::new(buf, EXTREMES_LEN)?;
        let baro = |o| f.scaled_i16(o, 1000, 0);
        let whole = |o, sentinel| f.scaled_i16(o, 1, sentinel);

        Ok(Self {
            barometer: HighLow {
                day_low: baro(0),
                day_high: baro(2),
                month_low: baro(4),
                month_high: baro(6),
                year_low: baro(8),
                year_high: baro(10),
                day_low_time: f.time(12),
                day_high_time: f.time(14),
            },
            wind_speed: Peak {
                day: f.byte(16, 1),
                day_time: f.time(17),
                month: f.byte(19, 1),
                year: f.byte(20, 1),
            },
            inside_temperature: HighLow {
                day_high: f.tenths_high(21),
                day_low: f.tenths(23),
                day_high_time: f.time(25),
                day_low_time: f.time(27),
                month_low: f.tenths(29),
                month_high: f.tenths_high(31),
                year_low: f.tenths(33),
                year_high: f.tenths_high(35),
            },
            inside_humidity: HighLow {
                day_high: f.byte(37, 1),
                day_low: f.byte(38, 1),
                day_high_time: f.time(39),
                day_low_time: f.time(41),
                month_high: f.byte(43, 1),
                month_low: f.byte(44, 1),
                year_high: f.byte(45, 1),
                year_low: f.byte(46, 1),
            },
            outside_temperature: HighLow {
                day_low: f.tenths(47),
                day_high: f.tenths_high(49),
                day_low_time: f.time(51),
                day_high_time: f.time(53),
                month_high: f.tenths_high(55),
                month_low: f.tenths(57),
                year_high: f.tenths_high(59),
                year_low: f.tenths(61),
            },
            dew_point: HighLow {
                day_low: whole(63, DASH_I16),
                day_high: whole(65, DASH_HIGH_I16),
                day_low_time: f.time(67),
                day_high_time: f.time(69),
                month_high: whole(71, DASH_HIGH_I16),
                month_low: whole(73, DASH_I16),
                year_high: whole(75, DASH_HIGH_I16),
                year_low: whole(77, DASH_I16),
            },
            wind_chill: Peak {
                day: whole(79, DASH_I16),
                day_time: f.time(81),
                month: whole(83, DASH_I16),
                year: whole(85, DASH_I16),
            },
            heat_index: Peak {
                day: whole(87, DASH_HIGH_I16),
                day_time: f.time(89),
                month: whole(91, DASH_HIGH_I16),
                year: whole(93, DASH_HIGH_I16),
            },
            thsw_index: Peak {
                day: whole(95, DASH_HIGH_I16),
                day_time: f.time(97),
                month: whole(99, DASH_HIGH_I16),
                year: whole(101, DASH_HIGH_I16),
            },
            solar_radiation: Peak {
                day: whole(103, DASH_I16),
                day_time: f.time(105),
                month: whole(107, DASH_I16),
                year: whole(109, DASH_I16),
            },
            uv_index: Peak {
                day: f.byte(111, 10),
                day_time: f.time(112),
                month: f.byte(114, 10),
                year: f.byte(115, 10),
            },
            rain_rate: Peak {
                day: f.scaled_u16(116, 100),
                day_time: f.time(118),
                month: f.scaled_u16(122, 100),
                year: f.scaled_u16(124, 100),
            },
            rain_rate_hour_high: f.scaled_u16(120, 100),
        })
    }
}

/// Alarm thresholds stored in the console EEPROM. Unset alarms read as
/// dashed measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmThresholds {
    /// inHg per three hours
    pub barometer_rise: Measurement,
    pub barometer_fall: Measurement,
    pub time_alarm: Option<Timestamp>,
    pub low_inside_temperature: Measurement,
    pub high_inside_temperature: Measurement,
    pub low_outside_temperature: Measurement,
    pub high_outside_temperature: Measurement,
    pub low_extra_temperatures: [Measurement; 7],
    pub high_extra_temperatures: [Measurement; 7],
    pub low_inside_humidity: Measurement,
    pub high_inside_humidity: Measurement,
    pub low_outside_humidity: Measurement,
    pub high_outside_humidity: Measurement,
    pub low_dew_point: Measurement,
    pub high_dew_point: Measurement,
    pub wind_chill: Measurement,
    pub heat_index: Measurement,
    pub thsw_index: Measurement,
    pub wind_speed: Measurement,
    pub wind_speed_10min: Measurement,
    pub high_uv_index: Measurement,
    pub solar_radiation: Measurement,
    pub rain_rate: Measurement,
    pub flash_flood: Measurement,
    pub rain_24h: Measurement,
    pub storm_rain: Measurement,
    pub day_et: Measurement,
}

impl AlarmThresholds {
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        let f = Fields::new(buf, ALARM_THRESHOLDS_LEN)?;
        Ok(Self {
            barometer_rise: f.byte(0, 1000),
            barometer_fall: f.byte(1, 1000),
            time_alarm: f.time(2),
            low_inside_temperature: f.byte_temp(6, 90),
            high_inside_temperature: f.byte_temp(7, 90),
            low_outside_temperature: f.byte_temp(8, 90),
            high_outside_temperature: f.byte_temp(9, 90),
            low_extra_temperatures: f.byte_temps(10, 90),
            high_extra_temperatures: f.byte_temps(25, 90),
            low_inside_humidity: f.byte(40, 1),
            high_inside_humidity: f.byte(41, 1),
            low_outside_humidity: f.byte(42, 1),
            high_outside_humidity: f.byte(50, 1),
            low_dew_point: f.byte_temp(58, 120),
            high_dew_point: f.byte_temp(59, 120),
            wind_chill: f.byte_temp(60, 120),
            heat_index: f.byte_temp(61, 90),
            thsw_index: f.byte_temp(62, 90),
            wind_speed: f.byte(63, 1),
            wind_speed_10min: f.byte(64, 1),
            high_uv_index: f.byte(65, 10),
            solar_radiation: f.scaled_u16(83, 1),
            rain_rate: f.scaled_u16(85, 100),
            flash_flood: f.scaled_u16(87, 100),
            rain_24h: f.scaled_u16(89, 100),
            storm_rain: f.scaled_u16(91, 100),
            day_et: f.byte(93, 1000),
        })
    }
}

/// Link statistics from the `RXCHECK` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diagnostics {
    pub total_packets: u32,
    pub missed_packets: u32,
    pub resyncs: u32,
    pub max_in_row: u32,
    pub crc_errors: u32,
}

impl Diagnostics {
    /// Parse the counter line that follows the OK banner.
    pub fn parse(line: &[u8]) -> Result<Self, Error> {
        let [total_packets, missed_packets, resyncs, max_in_row, crc_errors] =
            nom_parser::counters::<5>(line).ok_or(Error::InvalidText)?;
        Ok(Self {
            total_packets,
            missed_packets,
            resyncs,
            max_in_row,
            crc_errors,
        })
    }
}

/// Firmware date string from the `VERS` command.
pub fn parse_version(line: &[u8]) -> Result<String, Error> {
    std::str::from_utf8(line)
        .map(|s| s.trim().to_string())
        .map_err(|_| Error::InvalidText)
}
