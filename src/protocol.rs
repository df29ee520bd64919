//! Sans-io state machine for the console link.
//!
//! See [`Protocol`] for details.

use log::{debug, error, info, warn};
use snafu::Snafu;
use std::collections::VecDeque;
use std::time::Duration;

use crate::ascii::{ACK, CANCEL};
use crate::buffer::Buffer;
use crate::command::{Command, CommandId, ARCHIVE_PAGE_SIZE, DUMP_HEADER_SIZE};
use crate::crc;
use crate::nom_parser::{self, ResponseToken};
use crate::records::{self, ARCHIVE_LEN};
use crate::types::{ArchiveStamp, BLANK_DATESTAMP};

/// Archive records per dump page.
pub const RECORDS_PER_PAGE: usize = 5;
/// Pages in the archive memory, all sent by a plain `DMP`.
pub const ARCHIVE_PAGES: u16 = 512;

/// Timing and retry settings of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// How long to wait for the `\n\r` reply to a wakeup line.
    pub wakeup_timeout: Duration,
    /// Wakeup lines sent before giving up and resetting the link.
    pub wakeup_attempts: u8,
    /// Deadline for a complete response after the command was sent.
    pub response_timeout: Duration,
    /// Deadline for each archive page during a download.
    pub page_timeout: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            wakeup_timeout: Duration::from_millis(1200),
            wakeup_attempts: 4,
            response_timeout: Duration::from_secs(5),
            page_timeout: Duration::from_secs(10),
        }
    }
}

impl ProtocolConfig {
    pub fn with_wakeup_timeout(mut self, timeout: Duration) -> Self {
        self.wakeup_timeout = timeout;
        self
    }

    pub fn with_wakeup_attempts(mut self, attempts: u8) -> Self {
        self.wakeup_attempts = attempts.max(1);
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }
}

/// Ways a command cycle can fail. These are reported through
/// [`Action::Completed`] and logged; they never reach producers.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// The link failed to read or write.
    #[snafu(display("Transport failure: {source}"))]
    Transport { source: std::io::Error },
    /// The console didn't answer in time.
    #[snafu(display("Timed out waiting for {stage}"))]
    ProtocolTimeout { stage: &'static str },
    /// A response failed its CRC check and was dropped.
    #[snafu(display("CRC mismatch in response to {command}"))]
    ChecksumMismatch { command: CommandId },
    /// The response didn't have the expected shape.
    #[snafu(display("Malformed response to {command}: {reason}"))]
    MalformedFrame {
        command: CommandId,
        reason: &'static str,
    },
    /// An archive download was cancelled part way.
    #[snafu(display("Archive download aborted: {reason}"))]
    BulkTransferAborted { reason: &'static str },
}

/// Externally visible link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    AwaitingWakeupAck,
    Sending,
    AwaitingResponse,
    AwaitingArchiveLength,
    ReceivingArchivePages,
}

/// A validated response, ready for decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: CommandId,
    /// Start address for EEPROM reads.
    pub eeprom_offset: Option<u16>,
    /// Payload with ACK, banners and CRC removed. For archive downloads,
    /// a single archive record.
    pub data: Vec<u8>,
}

/// Something the caller has to do on behalf of the state machine.
#[derive(Debug)]
pub enum Action {
    /// Write these bytes to the link, then call [`Protocol::data_sent`].
    Transmit(Vec<u8>),
    /// Replace the active deadline; call [`Protocol::timeout`] when it expires.
    ArmTimer(Duration),
    CancelTimer,
    /// Close and reopen the physical link.
    ResetLink,
    /// Hand a validated frame to the dispatcher.
    Deliver(Frame),
    /// Stop the periodic producers for the duration of a download.
    PausePolling,
    ResumePolling,
    /// The current command is done; the machine is idle again.
    Completed(Result<(), Error>),
}

#[derive(Debug)]
struct Session {
    pages_left: u16,
    first_page_offset: usize,
    first_page: bool,
    watermark: Option<ArchiveStamp>,
    accepted: usize,
}

#[derive(Debug)]
enum Phase {
    Idle,
    Wakeup { attempts: u8 },
    Sending,
    Response { payload_sent: bool },
    ArchiveLength,
    ArchivePages(Session),
}

enum Parsed {
    NeedData,
    Payload(Vec<u8>),
    Nak,
    Invalid,
}

impl From<ResponseToken<'_>> for Parsed {
    fn from(token: ResponseToken<'_>) -> Self {
        match token {
            ResponseToken::Payload(p) => Parsed::Payload(p.to_vec()),
            ResponseToken::Nak => Parsed::Nak,
            ResponseToken::NeedData => Parsed::NeedData,
            ResponseToken::InvalidDataReceived => Parsed::Invalid,
        }
    }
}

/// The console link protocol, without any I/O.
///
/// Feed it one [`Command`] at a time with [`start()`](Self::start), pass on
/// received bytes with [`receive_data()`](Self::receive_data) and expired
/// deadlines with [`timeout()`](Self::timeout), and carry out the
/// [`Action`]s returned by [`poll_action()`](Self::poll_action) until an
/// [`Action::Completed`] comes out.
///
/// # Example
///
/// ```
/// use wxconsole_proto::{Action, Command, Protocol, ProtocolConfig, State};
///
/// let mut proto = Protocol::new(ProtocolConfig::default());
/// proto.start(Command::lamps(true));
/// assert!(matches!(proto.poll_action(), Some(Action::Transmit(b)) if b == b"\n"));
/// assert!(matches!(proto.poll_action(), Some(Action::ArmTimer(_))));
///
/// proto.receive_data(b"\n\r");
/// assert_eq!(proto.state(), State::Sending);
/// ```
#[derive(Debug)]
pub struct Protocol {
    config: ProtocolConfig,
    phase: Phase,
    command: Option<Command>,
    frame: Buffer,
    actions: VecDeque<Action>,
    wakeup_retries: u8,
}

impl Protocol {
    pub fn new(config: ProtocolConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            command: None,
            frame: Buffer::new(),
            actions: VecDeque::new(),
            wakeup_retries: 0,
        }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        match self.phase {
            Phase::Idle => State::Idle,
            Phase::Wakeup { .. } => State::AwaitingWakeupAck,
            Phase::Sending => State::Sending,
            Phase::Response { .. } => State::AwaitingResponse,
            Phase::ArchiveLength => State::AwaitingArchiveLength,
            Phase::ArchivePages(_) => State::ReceivingArchivePages,
        }
    }

    /// The command in flight.
    pub fn current(&self) -> Option<&Command> {
        self.command.as_ref()
    }

    /// Wakeup lines resent for the current command.
    pub fn wakeup_retries(&self) -> u8 {
        self.wakeup_retries
    }

    /// Next action for the caller, in the order they were produced.
    pub fn poll_action(&mut self) -> Option<Action> {
        self.actions.pop_front()
    }

    /// Begin servicing `command`. A command still in flight is failed first.
    pub fn start(&mut self, command: Command) {
        if let Some(previous) = self.command.as_ref().map(Command::id) {
            warn!("Starting {} while {} is in flight", command, previous);
            self.abort_with(Error::MalformedFrame {
                command: previous,
                reason: "superseded",
            });
        }
        debug!("Starting {}", command);
        self.frame.clear();
        self.wakeup_retries = 0;

        if command.id().is_control() {
            self.transmit(command.wire_bytes().to_vec());
            self.command = Some(command);
            self.finish(Ok(()));
            return;
        }

        self.command = Some(command);
        self.send_wakeup();
        self.phase = Phase::Wakeup { attempts: 1 };
    }

    /// Feed bytes received from the link.
    pub fn receive_data(&mut self, data: &[u8]) {
        match self.phase {
            Phase::Idle | Phase::Sending => {
                debug!("Ignoring {} stray bytes", data.len());
            }
            Phase::Wakeup { .. } => {
                self.frame.write(data);
                self.check_wakeup();
            }
            Phase::Response { payload_sent } => {
                self.frame.write(data);
                self.check_response(payload_sent);
            }
            Phase::ArchiveLength => {
                self.frame.write(data);
                self.check_archive_header();
            }
            Phase::ArchivePages(_) => {
                self.frame.write(data);
                self.check_archive_pages();
            }
        }
    }

    /// Signals that the last [`Action::Transmit`] went out on the link.
    pub fn data_sent(&mut self) {
        if let Phase::Sending = self.phase {
            self.arm(self.config.response_timeout);
            self.phase = Phase::Response {
                payload_sent: false,
            };
        }
    }

    /// Signals that the deadline of the last [`Action::ArmTimer`] expired.
    pub fn timeout(&mut self) {
        match self.phase {
            Phase::Wakeup { attempts } if attempts < self.config.wakeup_attempts => {
                warn!("No wakeup reply, retrying ({}/{})", attempts + 1, self.config.wakeup_attempts);
                self.wakeup_retries += 1;
                self.frame.clear();
                self.send_wakeup();
                self.phase = Phase::Wakeup {
                    attempts: attempts + 1,
                };
            }
            Phase::Wakeup { attempts } => {
                error!("Console didn't wake up after {} attempts, resetting link", attempts);
                self.actions.push_back(Action::ResetLink);
                self.finish(ProtocolTimeoutSnafu { stage: "wakeup" }.fail());
            }
            Phase::Response { .. } => {
                warn!("Response timeout");
                self.finish(ProtocolTimeoutSnafu { stage: "response" }.fail());
            }
            Phase::ArchiveLength => {
                warn!("Archive header timeout");
                self.finish(ProtocolTimeoutSnafu { stage: "archive header" }.fail());
            }
            Phase::ArchivePages(_) => {
                warn!("Archive page timeout");
                self.actions.push_back(Action::ResumePolling);
                self.finish(ProtocolTimeoutSnafu { stage: "archive page" }.fail());
            }
            Phase::Idle | Phase::Sending => {}
        }
    }

    /// Fail the command in flight, e.g. after a transport error.
    pub fn abort(&mut self, source: std::io::Error) {
        self.abort_with(Error::Transport { source });
    }

    fn abort_with(&mut self, error: Error) {
        if let Phase::ArchivePages(_) = self.phase {
            self.actions.push_back(Action::ResumePolling);
        }
        if self.command.is_some() {
            self.finish(Err(error));
        }
    }

    fn check_wakeup(&mut self) {
        if let ResponseToken::Payload(_) = nom_parser::parse_wakeup(self.frame.as_ref()) {
            debug!("Console awake after {} retries", self.wakeup_retries);
            self.frame.clear();
            self.actions.push_back(Action::CancelTimer);
            let command = match &self.command {
                Some(command) => command,
                None => return,
            };
            if command.id() == CommandId::Wakeup {
                self.finish(Ok(()));
            } else {
                let bytes = command.wire_bytes().to_vec();
                self.transmit(bytes);
                self.phase = Phase::Sending;
            }
        }
    }

    fn parse_frame(&self, command: &Command, payload_sent: bool) -> Parsed {
        let desc = command.descriptor();
        let buf = self.frame.as_ref();
        if desc.ack {
            let size = match command.id() {
                CommandId::ArchiveDump | CommandId::ArchiveDumpAfter | CommandId::EepromWrite => 0,
                _ if payload_sent => 0,
                _ => command.response_size(),
            };
            nom_parser::parse_ack_payload(buf, size).into()
        } else if desc.ok_banner {
            nom_parser::parse_ok_response(buf, desc.eol_banner).into()
        } else {
            Parsed::Payload(Vec::new())
        }
    }

    fn check_response(&mut self, payload_sent: bool) {
        let command = match self.command.take() {
            Some(command) => command,
            None => return,
        };
        let parsed = self.parse_frame(&command, payload_sent);
        let id = command.id();
        self.command = Some(command);

        let payload = match parsed {
            Parsed::NeedData => return,
            Parsed::Payload(payload) => payload,
            Parsed::Nak => {
                warn!("{} rejected by console", id);
                return self.finish(MalformedFrameSnafu { command: id, reason: "NAK" }.fail());
            }
            Parsed::Invalid => {
                warn!("Unexpected response to {}: {:02X?}", id, self.frame.as_ref());
                return self.finish(
                    MalformedFrameSnafu {
                        command: id,
                        reason: "unexpected bytes",
                    }
                    .fail(),
                );
            }
        };

        match id {
            CommandId::ArchiveDumpAfter => self.send_watermark(),
            CommandId::ArchiveDump => {
                // page data may follow the ACK in the same read
                self.frame.consume(1);
                self.begin_session(ARCHIVE_PAGES, 0, None);
                self.check_archive_pages();
            }
            CommandId::EepromWrite if !payload_sent => self.send_eeprom_payload(),
            _ => self.accept(id, payload),
        }
    }

    fn accept(&mut self, id: CommandId, mut payload: Vec<u8>) {
        if id.descriptor().crc {
            if !crc::verify(&payload) {
                warn!("CRC mismatch in response to {}, dropping frame", id);
                return self.finish(ChecksumMismatchSnafu { command: id }.fail());
            }
            payload.truncate(payload.len() - 2);
        }
        if !payload.is_empty() {
            let eeprom_offset = self.command.as_ref().and_then(Command::eeprom_offset);
            self.actions.push_back(Action::Deliver(Frame {
                command: id,
                eeprom_offset,
                data: payload,
            }));
        }
        self.finish(Ok(()));
    }

    fn send_eeprom_payload(&mut self) {
        let mut data = match self.command.as_ref().and_then(Command::payload) {
            Some(data) => data.to_vec(),
            None => Vec::new(),
        };
        crc::append_crc(&mut data);
        self.frame.clear();
        self.transmit(data);
        self.arm(self.config.response_timeout);
        self.phase = Phase::Response { payload_sent: true };
    }

    fn send_watermark(&mut self) {
        let watermark = self.command.as_ref().and_then(Command::watermark);
        let mut data = match watermark {
            Some(stamp) => stamp.to_wire().to_vec(),
            None => vec![0; 4],
        };
        crc::append_crc(&mut data);
        debug!("Requesting archive records after {:?}", watermark);
        self.frame.clear();
        self.transmit(data);
        self.arm(self.config.response_timeout);
        self.phase = Phase::ArchiveLength;
    }

    fn check_archive_header(&mut self) {
        let header = match nom_parser::parse_ack_payload(self.frame.as_ref(), DUMP_HEADER_SIZE) {
            ResponseToken::NeedData => return,
            ResponseToken::Payload(p) => p.to_vec(),
            ResponseToken::Nak => {
                warn!("Console rejected the archive date");
                return self.finish(
                    BulkTransferAbortedSnafu {
                        reason: "date rejected",
                    }
                    .fail(),
                );
            }
            ResponseToken::InvalidDataReceived => {
                self.transmit(vec![CANCEL]);
                return self.finish(
                    MalformedFrameSnafu {
                        command: CommandId::ArchiveDumpAfterPayload,
                        reason: "unexpected bytes",
                    }
                    .fail(),
                );
            }
        };

        if !crc::verify(&header) {
            error!("CRC mismatch in archive header, cancelling download");
            self.transmit(vec![CANCEL]);
            return self.finish(
                BulkTransferAbortedSnafu {
                    reason: "header CRC mismatch",
                }
                .fail(),
            );
        }

        match nom_parser::dump_header(&header) {
            Some((0, _)) => {
                info!("No new archive records");
                self.transmit(vec![CANCEL]);
                self.finish(Ok(()));
            }
            Some((pages, offset)) => {
                info!("Downloading {} archive pages, first record {}", pages, offset);
                let watermark = self.command.as_ref().and_then(Command::watermark);
                self.frame.clear();
                self.transmit(vec![ACK]);
                self.begin_session(pages, offset as usize, watermark);
            }
            None => self.finish(
                MalformedFrameSnafu {
                    command: CommandId::ArchiveDumpAfterPayload,
                    reason: "short header",
                }
                .fail(),
            ),
        }
    }

    fn begin_session(&mut self, pages: u16, first_page_offset: usize, watermark: Option<ArchiveStamp>) {
        self.actions.push_back(Action::PausePolling);
        self.arm(self.config.page_timeout);
        self.phase = Phase::ArchivePages(Session {
            pages_left: pages,
            first_page_offset,
            first_page: true,
            watermark,
            accepted: 0,
        });
    }

    fn check_archive_pages(&mut self) {
        let id = match &self.command {
            Some(command) => command.id(),
            None => return,
        };
        let mut session = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::ArchivePages(session) => session,
            other => {
                self.phase = other;
                return;
            }
        };

        while self.frame.len() >= ARCHIVE_PAGE_SIZE {
            let page = self.frame.as_ref()[..ARCHIVE_PAGE_SIZE].to_vec();
            self.frame.consume(ARCHIVE_PAGE_SIZE);

            if !crc::verify(&page) {
                error!("CRC mismatch in archive page, cancelling download");
                self.transmit(vec![CANCEL]);
                self.actions.push_back(Action::ResumePolling);
                return self.finish(
                    BulkTransferAbortedSnafu {
                        reason: "page CRC mismatch",
                    }
                    .fail(),
                );
            }

            let skip = if session.first_page {
                session.first_page_offset
            } else {
                0
            };
            session.first_page = false;

            for slot in skip..RECORDS_PER_PAGE {
                let start = 1 + slot * ARCHIVE_LEN;
                let record = &page[start..start + ARCHIVE_LEN];
                let raw_date = u16::from_be_bytes([record[0], record[1]]);
                if raw_date == BLANK_DATESTAMP || raw_date == 0 {
                    debug!("Skipping blank archive slot {}", slot);
                    continue;
                }
                let stamp = match records::archive_stamp(record) {
                    Ok(stamp) => stamp,
                    Err(e) => {
                        warn!("Skipping archive slot {}: {}", slot, e);
                        continue;
                    }
                };
                if session.watermark.map_or(true, |w| stamp.is_newer_than(&w)) {
                    session.accepted += 1;
                    self.actions.push_back(Action::Deliver(Frame {
                        command: id,
                        eeprom_offset: None,
                        data: record.to_vec(),
                    }));
                } else {
                    debug!("Skipping archive record {}, already stored", stamp);
                }
            }

            self.transmit(vec![ACK]);
            session.pages_left = session.pages_left.saturating_sub(1);
            if session.pages_left == 0 {
                info!("Archive download done, {} new records", session.accepted);
                self.actions.push_back(Action::ResumePolling);
                return self.finish(Ok(()));
            }
            self.arm(self.config.page_timeout);
        }

        self.phase = Phase::ArchivePages(session);
    }

    fn send_wakeup(&mut self) {
        self.transmit(Command::wakeup().wire_bytes().to_vec());
        self.arm(self.config.wakeup_timeout);
    }

    fn transmit(&mut self, data: Vec<u8>) {
        self.actions.push_back(Action::Transmit(data));
    }

    fn arm(&mut self, timeout: Duration) {
        self.actions.push_back(Action::ArmTimer(timeout));
    }

    fn finish(&mut self, result: Result<(), Error>) {
        match &result {
            Ok(()) => debug!("Completed {:?}", self.command.as_ref().map(Command::id)),
            Err(e) => warn!("Failed {:?}: {}", self.command.as_ref().map(Command::id), e),
        }
        self.actions.push_back(Action::CancelTimer);
        self.actions.push_back(Action::Completed(result));
        self.phase = Phase::Idle;
        self.command = None;
        self.frame.clear();
    }
}
