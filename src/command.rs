//! Static per-command protocol metadata, and the [`Command`] request type
//! that producers put on the [`CommandQueue`](crate::CommandQueue).

use arrayvec::ArrayVec;
use core::fmt::{self, Write as _};

use crate::types::ArchiveStamp;

/// Identifies one entry of the command catalog.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CommandId {
    Wakeup,
    Diagnostics,
    Version,
    CurrentConditions,
    Extremes,
    ArchiveDump,
    ArchiveDumpAfter,
    /// The date/time sub-frame sent after `DMPAFT` is acknowledged.
    ArchiveDumpAfterPayload,
    EepromRead,
    EepromWrite,
    LampsOn,
    LampsOff,
    Ack,
    Nak,
    Cancel,
}

/// Protocol description of one console command.
#[derive(Debug, PartialEq, Eq)]
pub struct ConsoleCommand {
    pub id: CommandId,
    /// Wire text. Parameterized commands get their arguments appended.
    pub text: &'static str,
    /// The response starts with `\n\rOK\n\r`.
    pub ok_banner: bool,
    /// The response ends with `\n\r`.
    pub eol_banner: bool,
    /// The console answers with ACK before any payload.
    pub ack: bool,
    /// The payload ends with a CRC16.
    pub crc: bool,
    /// Payload bytes after the ACK, CRC included. Zero when the size is
    /// decided by a banner or by the command's parameters.
    pub response_size: usize,
}

/// Length of a LOOP packet including its CRC.
pub const LOOP_RESPONSE_SIZE: usize = 99;
/// Length of the HILOWS block including its CRC.
pub const HILOWS_RESPONSE_SIZE: usize = 438;
/// Length of one archive dump page including its CRC.
pub const ARCHIVE_PAGE_SIZE: usize = 267;
/// Length of the dump-after-date header: page count, first offset, CRC.
pub const DUMP_HEADER_SIZE: usize = 6;

macro_rules! entry {
    ($id:ident, $text:expr, ok: $ok:expr, eol: $eol:expr, ack: $ack:expr, crc: $crc:expr, size: $size:expr) => {
        ConsoleCommand {
            id: CommandId::$id,
            text: $text,
            ok_banner: $ok,
            eol_banner: $eol,
            ack: $ack,
            crc: $crc,
            response_size: $size,
        }
    };
}

/// The command catalog, indexed by `CommandId as usize`.
static CATALOG: [ConsoleCommand; 15] = [
    entry!(Wakeup, "\n", ok: false, eol: true, ack: false, crc: false, size: 2),
    entry!(Diagnostics, "RXCHECK\n", ok: true, eol: true, ack: false, crc: false, size: 0),
    entry!(Version, "VERS\n", ok: true, eol: true, ack: false, crc: false, size: 0),
    entry!(CurrentConditions, "LOOP 1\n", ok: false, eol: false, ack: true, crc: true, size: LOOP_RESPONSE_SIZE),
    entry!(Extremes, "HILOWS\n", ok: false, eol: false, ack: true, crc: true, size: HILOWS_RESPONSE_SIZE),
    entry!(ArchiveDump, "DMP\n", ok: false, eol: false, ack: true, crc: true, size: ARCHIVE_PAGE_SIZE),
    entry!(ArchiveDumpAfter, "DMPAFT\n", ok: false, eol: false, ack: true, crc: false, size: 0),
    entry!(ArchiveDumpAfterPayload, "", ok: false, eol: false, ack: true, crc: true, size: DUMP_HEADER_SIZE),
    entry!(EepromRead, "EEBRD", ok: false, eol: false, ack: true, crc: true, size: 0),
    entry!(EepromWrite, "EEBWR", ok: false, eol: false, ack: true, crc: false, size: 0),
    entry!(LampsOn, "LAMPS 1\n", ok: true, eol: false, ack: false, crc: false, size: 0),
    entry!(LampsOff, "LAMPS 0\n", ok: true, eol: false, ack: false, crc: false, size: 0),
    entry!(Ack, "\x06", ok: false, eol: false, ack: false, crc: false, size: 0),
    entry!(Nak, "\x21", ok: false, eol: false, ack: false, crc: false, size: 0),
    entry!(Cancel, "\x1b", ok: false, eol: false, ack: false, crc: false, size: 0),
];

impl CommandId {
    /// Look up the catalog entry.
    pub fn descriptor(self) -> &'static ConsoleCommand {
        &CATALOG[self as usize]
    }

    /// Single control bytes are sent as-is, without waking the console.
    pub fn is_control(self) -> bool {
        matches!(self, Self::Ack | Self::Nak | Self::Cancel)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// "EEBWR FFFF FFFF\n" is the longest command line
pub(crate) type WireText = ArrayVec<u8, 24>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Params {
    None,
    EepromRead { offset: u16, count: u16 },
    EepromWrite { offset: u16, data: Vec<u8> },
    After(ArchiveStamp),
}

/// One queued request for the console.
///
/// Build commands with the named constructors, e.g. [`Command::current_conditions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    id: CommandId,
    params: Params,
}

impl Command {
    const fn simple(id: CommandId) -> Self {
        Self {
            id,
            params: Params::None,
        }
    }

    pub const fn wakeup() -> Self {
        Self::simple(CommandId::Wakeup)
    }

    pub const fn diagnostics() -> Self {
        Self::simple(CommandId::Diagnostics)
    }

    pub const fn version() -> Self {
        Self::simple(CommandId::Version)
    }

    pub const fn current_conditions() -> Self {
        Self::simple(CommandId::CurrentConditions)
    }

    pub const fn extremes() -> Self {
        Self::simple(CommandId::Extremes)
    }

    /// Download the whole archive memory.
    pub const fn archive_dump() -> Self {
        Self::simple(CommandId::ArchiveDump)
    }

    /// Download archive records strictly newer than `watermark`.
    pub const fn archive_dump_after(watermark: ArchiveStamp) -> Self {
        Self {
            id: CommandId::ArchiveDumpAfter,
            params: Params::After(watermark),
        }
    }

    pub const fn eeprom_read(offset: u16, count: u16) -> Self {
        Self {
            id: CommandId::EepromRead,
            params: Params::EepromRead { offset, count },
        }
    }

    pub fn eeprom_write(offset: u16, data: &[u8]) -> Self {
        Self {
            id: CommandId::EepromWrite,
            params: Params::EepromWrite {
                offset,
                data: data.to_vec(),
            },
        }
    }

    pub const fn lamps(on: bool) -> Self {
        Self::simple(if on {
            CommandId::LampsOn
        } else {
            CommandId::LampsOff
        })
    }

    pub const fn ack() -> Self {
        Self::simple(CommandId::Ack)
    }

    pub const fn nak() -> Self {
        Self::simple(CommandId::Nak)
    }

    pub const fn cancel() -> Self {
        Self::simple(CommandId::Cancel)
    }

    pub const fn id(&self) -> CommandId {
        self.id
    }

    pub fn descriptor(&self) -> &'static ConsoleCommand {
        self.id.descriptor()
    }

    /// EEPROM offset for EEPROM commands.
    pub fn eeprom_offset(&self) -> Option<u16> {
        match self.params {
            Params::EepromRead { offset, .. } | Params::EepromWrite { offset, .. } => Some(offset),
            _ => None,
        }
    }

    /// Bytes to write after the console acknowledges an EEPROM write.
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.params {
            Params::EepromWrite { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Watermark of a dump-after-date request.
    pub fn watermark(&self) -> Option<ArchiveStamp> {
        match self.params {
            Params::After(stamp) => Some(stamp),
            _ => None,
        }
    }

    /// Expected payload bytes after the ACK, CRC included.
    pub fn response_size(&self) -> usize {
        match self.params {
            Params::EepromRead { count, .. } => count as usize + 2,
            _ => self.descriptor().response_size,
        }
    }

    /// The bytes to transmit for this command.
    pub(crate) fn wire_bytes(&self) -> WireText {
        let mut text = WireText::new();
        // the buffer fits every rendered command
        let _ = text.try_extend_from_slice(self.descriptor().text.as_bytes());
        let mut w = WireWriter(&mut text);
        let _ = match &self.params {
            Params::EepromRead { offset, count } => write!(w, " {:X} {:X}\n", offset, count),
            Params::EepromWrite { offset, data } => write!(w, " {:X} {:X}\n", offset, data.len()),
            _ => Ok(()),
        };
        text
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.params {
            Params::None => write!(f, "{}", self.id),
            Params::EepromRead { offset, count } => {
                write!(f, "{}({:#X}, {})", self.id, offset, count)
            }
            Params::EepromWrite { offset, data } => {
                write!(f, "{}({:#X}, {} bytes)", self.id, offset, data.len())
            }
            Params::After(stamp) => write!(f, "{}({})", self.id, stamp),
        }
    }
}

struct WireWriter<'a>(&'a mut WireText);

impl fmt::Write for WireWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0
            .try_extend_from_slice(s.as_bytes())
            .map_err(|_| fmt::Error)
    }
}
