//! Routing of validated frames to record decoders and consumers.

use log::{debug, warn};

use crate::command::CommandId;
use crate::protocol::Frame;
use crate::records::{
    self, AlarmThresholds, ArchiveRecord, Diagnostics, ExtremesRecord, LoopRecord, Record,
    ALARM_THRESHOLDS_ADDRESS, ALARM_THRESHOLDS_LEN,
};

/// Consumer of decoded records.
///
/// Sinks run on the link thread, in the order they were added, and must not
/// block for long.
pub trait RecordSink: Send {
    fn record_decoded(&mut self, record: &Record);
}

impl<F> RecordSink for F
where
    F: FnMut(&Record) + Send,
{
    fn record_decoded(&mut self, record: &Record) {
        self(record)
    }
}

/// Decodes frames according to the command that produced them.
#[derive(Default)]
pub struct Dispatcher {
    sinks: Vec<Box<dyn RecordSink>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&mut self, sink: impl RecordSink + 'static) {
        self.sinks.push(Box::new(sink));
    }

    /// Decode a frame without notifying anybody.
    ///
    /// Returns `Ok(None)` for commands that have no record type.
    pub fn decode(frame: &Frame) -> Result<Option<Record>, records::Error> {
        let record = match frame.command {
            CommandId::CurrentConditions => Record::Loop(LoopRecord::decode(&frame.data)?),
            CommandId::ArchiveDump | CommandId::ArchiveDumpAfter => {
                Record::Archive(ArchiveRecord::decode(&frame.data)?)
            }
            CommandId::Extremes => Record::Extremes(ExtremesRecord::decode(&frame.data)?),
            CommandId::EepromRead => match frame.eeprom_offset {
                Some(ALARM_THRESHOLDS_ADDRESS) if frame.data.len() == ALARM_THRESHOLDS_LEN => {
                    Record::AlarmThresholds(AlarmThresholds::decode(&frame.data)?)
                }
                offset => Record::Eeprom {
                    offset: offset.unwrap_or(0),
                    data: frame.data.clone(),
                },
            },
            CommandId::Diagnostics => Record::Diagnostics(Diagnostics::parse(&frame.data)?),
            CommandId::Version => Record::Version(records::parse_version(&frame.data)?),
            _ => return Ok(None),
        };
        Ok(Some(record))
    }

    /// Decode `frame` and hand the record to every sink.
    ///
    /// Frames that fail to decode are logged and dropped.
    pub fn dispatch(&mut self, frame: &Frame) -> Option<Record> {
        let record = match Self::decode(frame) {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("No decoder for {} response", frame.command);
                return None;
            }
            Err(e) => {
                warn!("Dropping {} response: {}", frame.command, e);
                return None;
            }
        };
        for sink in self.sinks.iter_mut() {
            sink.record_decoded(&record);
        }
        Some(record)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::tests::{archive_body, loop_body};
    use crate::types::{ArchiveStamp, Datestamp, Timestamp};
    use std::sync::{Arc, Mutex};

    fn frame(command: CommandId, data: Vec<u8>) -> Frame {
        Frame {
            command,
            eeprom_offset: None,
            data,
        }
    }

    #[test]
    fn test_routing() {
        let rec = Dispatcher::decode(&frame(CommandId::CurrentConditions, loop_body().0));
        assert!(matches!(rec, Ok(Some(Record::Loop(_)))));

        let stamp = ArchiveStamp::new(
            Datestamp::new(2021, 3, 4).unwrap(),
            Timestamp::new(5, 10).unwrap(),
        );
        let rec = Dispatcher::decode(&frame(CommandId::ArchiveDumpAfter, archive_body(stamp).0));
        match rec {
            Ok(Some(Record::Archive(a))) => assert_eq!(a.stamp, stamp),
            other => panic!("unexpected {:?}", other),
        }

        let rec = Dispatcher::decode(&frame(CommandId::Version, b"Apr 24 2002".to_vec()));
        assert_eq!(rec, Ok(Some(Record::Version("Apr 24 2002".into()))));

        let rec = Dispatcher::decode(&frame(CommandId::LampsOn, Vec::new()));
        assert_eq!(rec, Ok(None));
    }

    #[test]
    fn test_eeprom_routing() {
        let mut thresholds = frame(CommandId::EepromRead, vec![0xFF; ALARM_THRESHOLDS_LEN]);
        thresholds.eeprom_offset = Some(ALARM_THRESHOLDS_ADDRESS);
        assert!(matches!(
            Dispatcher::decode(&thresholds),
            Ok(Some(Record::AlarmThresholds(_)))
        ));

        let mut other = frame(CommandId::EepromRead, vec![1, 2]);
        other.eeprom_offset = Some(0x2B);
        assert_eq!(
            Dispatcher::decode(&other),
            Ok(Some(Record::Eeprom {
                offset: 0x2B,
                data: vec![1, 2]
            }))
        );
    }

    #[test]
    fn test_sinks_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        for n in 0..3 {
            let seen = Arc::clone(&seen);
            dispatcher.add_sink(move |_: &Record| seen.lock().unwrap().push(n));
        }
        assert!(dispatcher
            .dispatch(&frame(CommandId::CurrentConditions, loop_body().0))
            .is_some());
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_undecodable_frames_dropped() {
        let seen = Arc::new(Mutex::new(0));
        let mut dispatcher = Dispatcher::new();
        let counter = Arc::clone(&seen);
        dispatcher.add_sink(move |_: &Record| *counter.lock().unwrap() += 1);

        let mut body = loop_body();
        body.0[0] = b'X';
        assert!(dispatcher
            .dispatch(&frame(CommandId::CurrentConditions, body.0))
            .is_none());
        assert!(dispatcher
            .dispatch(&frame(CommandId::Extremes, vec![0; 10]))
            .is_none());
        assert_eq!(*seen.lock().unwrap(), 0);
    }
}
