//! Protocol engine for weather consoles on a slow, half-duplex serial link.
//!
//! The crate is split in a sans-io core and a thin threaded shell:
//!
//! * [`Protocol`] is the link state machine. It is fed commands, received
//!   bytes and timer expiries, and tells the caller what to transmit, when
//!   to arm timers and which validated frames to hand on.
//! * [`Driver`] owns a [`Link`] and runs the state machine for every
//!   command taken from a [`CommandQueue`].
//! * [`Dispatcher`] decodes validated frames into [`Record`]s and passes them
//!   to [`RecordSink`]s.
//! * [`Station`] wires it all together with the periodic [`Poller`]s.
//!
//! # Example
//!
//! ```no_run
//! use wxconsole_proto::{Command, LinkSpec, Record, Station, StationConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let link = "tcp:192.168.1.20:22222".parse::<LinkSpec>()?.open()?;
//! let station = Station::start(link, StationConfig::default(), |record: &Record| {
//!     if let Record::Loop(conditions) = record {
//!         println!("{:?}", conditions.outside_temperature.get());
//!     }
//! })?;
//! station.queue().enqueue(Command::lamps(true));
//! station.shutdown();
//! # Ok(()) }
//! ```

mod buffer;
pub mod command;
pub mod crc;
pub mod dispatch;
pub mod driver;
pub mod link;
mod nom_parser;
pub mod poller;
pub mod protocol;
pub mod queue;
pub mod records;
pub mod station;
pub mod types;

pub use command::{Command, CommandId, ConsoleCommand};
pub use dispatch::{Dispatcher, RecordSink};
pub use driver::Driver;
pub use link::{Link, LinkSpec};
pub use poller::{PollConfig, PollControl, Poller, Watermark};
pub use protocol::{Action, Frame, Protocol, ProtocolConfig, State};
pub use queue::CommandQueue;
pub use records::Record;
pub use station::{Station, StationConfig};
pub use types::{ArchiveStamp, Datestamp, Measurement, Timestamp};

pub(crate) mod ascii {
    pub const ACK: u8 = 0x06;
    pub const NAK: u8 = 0x21;
    pub const CANCEL: u8 = 0x1B;
}
