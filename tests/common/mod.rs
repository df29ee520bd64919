#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{Error, ErrorKind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use wxconsole_proto::crc;
use wxconsole_proto::{ArchiveStamp, Link};

const ACK: u8 = 0x06;
const NAK: u8 = 0x21;
const CANCEL: u8 = 0x1B;

pub const LOOP_LEN: usize = 97;
pub const ARCHIVE_LEN: usize = 52;
const EEPROM_SIZE: usize = 4096;

/// LOOP body with the given barometer (thousandths) and outside temperature
/// (tenths), all other fields zero.
pub fn loop_body(barometer: i16, outside_temperature: i16) -> Vec<u8> {
    let mut body = vec![0; LOOP_LEN];
    body[..3].copy_from_slice(b"LOO");
    body[7..9].copy_from_slice(&barometer.to_be_bytes());
    body[12..14].copy_from_slice(&outside_temperature.to_be_bytes());
    body[95..97].copy_from_slice(b"\n\r");
    body
}

pub fn archive_record(stamp: ArchiveStamp, outside_temperature: i16) -> Vec<u8> {
    let mut record = vec![0; ARCHIVE_LEN];
    record[..4].copy_from_slice(&stamp.to_wire());
    record[4..6].copy_from_slice(&outside_temperature.to_be_bytes());
    record
}

fn with_crc(mut data: Vec<u8>) -> Vec<u8> {
    crc::append_crc(&mut data);
    data
}

enum Mode {
    Line,
    DumpDate,
    Paging(VecDeque<Vec<u8>>),
    EepromPayload { offset: usize, len: usize },
}

/// What the simulated console has seen.
#[derive(Default, Debug, Clone)]
pub struct ConsoleLog {
    pub wakeups: usize,
    pub resets: usize,
    pub lines: Vec<String>,
    pub acks: usize,
    pub cancels: usize,
    pub pages_sent: usize,
}

struct ConsoleState {
    rx: VecDeque<u8>,
    input: Vec<u8>,
    mode: Mode,
    log: ConsoleLog,
    asleep: bool,
    corrupt_header: bool,
    loop_body: Vec<u8>,
    archive: Vec<Vec<u8>>,
    eeprom: Vec<u8>,
}

/// A weather console answering over an in-memory link.
pub struct SimConsole {
    state: Mutex<ConsoleState>,
    rx_available: Condvar,
}

impl SimConsole {
    pub fn new() -> Arc<SimConsole> {
        Arc::new(SimConsole {
            state: Mutex::new(ConsoleState {
                rx: VecDeque::new(),
                input: Vec::new(),
                mode: Mode::Line,
                log: ConsoleLog::default(),
                asleep: false,
                corrupt_header: false,
                loop_body: loop_body(30124, 725),
                archive: Vec::new(),
                eeprom: vec![0xFF; EEPROM_SIZE],
            }),
            rx_available: Condvar::new(),
        })
    }

    pub fn link(self: &Arc<Self>) -> ConsoleLink {
        ConsoleLink {
            console: Arc::clone(self),
            timeout: Duration::from_secs(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, ConsoleState> {
        self.state.lock().unwrap()
    }

    /// Stop answering wakeup lines.
    pub fn set_asleep(&self, asleep: bool) {
        self.state().asleep = asleep;
    }

    pub fn set_corrupt_header(&self, corrupt: bool) {
        self.state().corrupt_header = corrupt;
    }

    pub fn set_loop_body(&self, body: Vec<u8>) {
        self.state().loop_body = body;
    }

    /// Archive records, oldest first.
    pub fn set_archive(&self, records: Vec<Vec<u8>>) {
        self.state().archive = records;
    }

    pub fn write_eeprom(&self, offset: usize, data: &[u8]) {
        self.state().eeprom[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn eeprom(&self, offset: usize, len: usize) -> Vec<u8> {
        self.state().eeprom[offset..offset + len].to_vec()
    }

    pub fn log(&self) -> ConsoleLog {
        self.state().log.clone()
    }
}

impl ConsoleState {
    fn reply(&mut self, data: &[u8]) {
        self.rx.extend(data.iter().copied());
    }

    fn receive(&mut self, byte: u8) {
        self.input.push(byte);
        match self.mode {
            Mode::Line => {
                if self.input == [ACK] {
                    self.log.acks += 1;
                    self.input.clear();
                } else if self.input == [CANCEL] {
                    self.log.cancels += 1;
                    self.input.clear();
                } else if byte == b'\n' {
                    let line = String::from_utf8_lossy(&self.input[..self.input.len() - 1])
                        .into_owned();
                    self.input.clear();
                    self.handle_line(line);
                }
            }
            Mode::DumpDate => {
                if self.input.len() == 6 {
                    let date = std::mem::take(&mut self.input);
                    self.handle_dump_date(&date);
                }
            }
            Mode::Paging(_) => {
                let byte = self.input.remove(0);
                self.handle_page_reply(byte);
            }
            Mode::EepromPayload { offset, len } => {
                if self.input.len() == len + 2 {
                    let data = std::mem::take(&mut self.input);
                    self.mode = Mode::Line;
                    if crc::verify(&data) {
                        self.eeprom[offset..offset + len].copy_from_slice(&data[..len]);
                        self.reply(&[ACK]);
                    } else {
                        self.reply(&[NAK]);
                    }
                }
            }
        }
    }

    fn handle_line(&mut self, line: String) {
        if line.is_empty() {
            self.log.wakeups += 1;
            if !self.asleep {
                self.reply(b"\n\r");
            }
            return;
        }
        self.log.lines.push(line.clone());
        let mut words = line.split_whitespace();
        match words.next() {
            Some("LOOP") => {
                let packet = with_crc(self.loop_body.clone());
                self.reply(&[ACK]);
                self.reply(&packet);
            }
            Some("HILOWS") => {
                let packet = with_crc(vec![0; 436]);
                self.reply(&[ACK]);
                self.reply(&packet);
            }
            Some("VERS") => self.reply(b"\n\rOK\n\rApr 24 2002\n\r"),
            Some("RXCHECK") => self.reply(b"\n\rOK\n\r 21629 15 0 3204 128\n\r"),
            Some("LAMPS") => self.reply(b"\n\rOK\n\r"),
            Some("DMPAFT") => {
                self.reply(&[ACK]);
                self.mode = Mode::DumpDate;
            }
            Some("EEBRD") => {
                let offset = hex_arg(words.next());
                let len = hex_arg(words.next());
                let data = with_crc(self.eeprom[offset..offset + len].to_vec());
                self.reply(&[ACK]);
                self.reply(&data);
            }
            Some("EEBWR") => {
                let offset = hex_arg(words.next());
                let len = hex_arg(words.next());
                self.reply(&[ACK]);
                self.mode = Mode::EepromPayload { offset, len };
            }
            _ => self.reply(&[NAK]),
        }
    }

    fn handle_dump_date(&mut self, date: &[u8]) {
        if !crc::verify(date) {
            self.mode = Mode::Line;
            return self.reply(&[NAK]);
        }
        let stamp = ArchiveStamp::from_wire([date[0], date[1], date[2], date[3]]).ok();
        let first_new = self.archive.iter().position(|record| {
            let record_stamp =
                ArchiveStamp::from_wire([record[0], record[1], record[2], record[3]]).unwrap();
            stamp.map_or(true, |s| record_stamp.is_newer_than(&s))
        });

        let mut pages = VecDeque::new();
        let mut offset = 0;
        if let Some(first) = first_new {
            offset = first % 5;
            let start = first - offset;
            for (seq, chunk) in self.archive[start..].chunks(5).enumerate() {
                let mut page = vec![seq as u8];
                for slot in 0..5 {
                    match chunk.get(slot) {
                        Some(record) => page.extend_from_slice(record),
                        None => page.extend_from_slice(&[0xFF; ARCHIVE_LEN]),
                    }
                }
                page.extend_from_slice(&[0; 4]);
                pages.push_back(with_crc(page));
            }
        }

        let mut header = (pages.len() as u16).to_be_bytes().to_vec();
        header.extend_from_slice(&(offset as u16).to_be_bytes());
        let mut header = with_crc(header);
        if self.corrupt_header {
            header[5] ^= 0xFF;
        }
        self.reply(&[ACK]);
        self.reply(&header);
        self.mode = Mode::Paging(pages);
    }

    fn handle_page_reply(&mut self, byte: u8) {
        let pages = match &mut self.mode {
            Mode::Paging(pages) => pages,
            _ => return,
        };
        match byte {
            ACK => {
                self.log.acks += 1;
                match pages.pop_front() {
                    Some(page) => {
                        self.log.pages_sent += 1;
                        self.reply(&page);
                    }
                    None => self.mode = Mode::Line,
                }
            }
            CANCEL => {
                self.log.cancels += 1;
                self.mode = Mode::Line;
            }
            _ => self.mode = Mode::Line,
        }
    }
}

fn hex_arg(arg: Option<&str>) -> usize {
    usize::from_str_radix(arg.unwrap_or("0"), 16).unwrap()
}

/// The host side of the simulated serial line.
pub struct ConsoleLink {
    console: Arc<SimConsole>,
    pub timeout: Duration,
}

impl std::io::Read for ConsoleLink {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.console.state.lock().unwrap();
        if state.rx.is_empty() {
            state = self
                .console
                .rx_available
                .wait_timeout(state, self.timeout)
                .expect("Mutex lock failed")
                .0;
            if state.rx.is_empty() {
                return Err(Error::new(ErrorKind::TimedOut, "console silent"));
            }
        }
        let len = buf.len().min(state.rx.len());
        for (dst, src) in buf.iter_mut().zip(state.rx.drain(..len)) {
            *dst = src;
        }
        Ok(len)
    }
}

impl std::io::Write for ConsoleLink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self.console.state.lock().unwrap();
        for byte in buf {
            state.receive(*byte);
        }
        drop(state);
        self.console.rx_available.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Link for ConsoleLink {
    fn set_read_timeout(&mut self, timeout: Duration) -> std::io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn reset(&mut self) -> std::io::Result<()> {
        let mut state = self.console.state.lock().unwrap();
        state.log.resets += 1;
        state.rx.clear();
        state.input.clear();
        state.mode = Mode::Line;
        Ok(())
    }

    fn clear_input(&mut self) -> std::io::Result<()> {
        self.console.state.lock().unwrap().rx.clear();
        Ok(())
    }
}
