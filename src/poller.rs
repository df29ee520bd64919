//! Periodic command producers.

use log::{debug, trace};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::command::Command;
use crate::queue::CommandQueue;
use crate::records::Record;
use crate::types::ArchiveStamp;

/// Poll intervals of the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// LOOP, current conditions.
    pub current: Duration,
    /// HILOWS, daily/monthly/yearly extremes.
    pub extremes: Duration,
    /// DMPAFT, new archive records.
    pub archive: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            current: Duration::from_secs(2),
            extremes: Duration::from_secs(3600),
            archive: Duration::from_secs(300),
        }
    }
}

/// Shared switch that suspends all pollers, set by the driver while an
/// archive download holds the link.
#[derive(Debug, Clone, Default)]
pub struct PollControl(Arc<AtomicBool>);

impl PollControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Stamp of the newest archive record stored so far.
///
/// The archive poller builds its dump requests from it and
/// [`sink()`](Self::sink) moves it forward as records come in.
#[derive(Debug, Clone, Default)]
pub struct Watermark(Arc<Mutex<Option<ArchiveStamp>>>);

impl Watermark {
    pub fn new(initial: Option<ArchiveStamp>) -> Self {
        Self(Arc::new(Mutex::new(initial)))
    }

    pub fn get(&self) -> Option<ArchiveStamp> {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move the watermark to `stamp` if it is newer.
    pub fn advance(&self, stamp: ArchiveStamp) {
        let mut current = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if current.map_or(true, |c| stamp.is_newer_than(&c)) {
            *current = Some(stamp);
        }
    }

    /// Record sink advancing the watermark on every archive record.
    pub fn sink(&self) -> impl FnMut(&Record) + Send + 'static {
        let watermark = self.clone();
        move |record: &Record| {
            if let Record::Archive(archive) = record {
                watermark.advance(archive.stamp);
            }
        }
    }

    /// The dump command for everything after the watermark.
    pub fn command(&self) -> Command {
        match self.get() {
            Some(stamp) => Command::archive_dump_after(stamp),
            None => Command::archive_dump(),
        }
    }
}

/// Thread enqueueing a command at a fixed interval.
///
/// A tick is skipped while polling is paused, or while a command of the same
/// kind is still queued or in flight. The first command is produced right
/// away. Dropping the poller stops the thread.
#[derive(Debug)]
pub struct Poller {
    name: String,
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Poller {
    pub fn spawn<F>(
        name: &str,
        interval: Duration,
        queue: Arc<CommandQueue>,
        control: PollControl,
        mut make_command: F,
    ) -> io::Result<Self>
    where
        F: FnMut() -> Command + Send + 'static,
    {
        let (stop, stopped) = mpsc::channel::<()>();
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(format!("poll-{}", name))
            .spawn(move || loop {
                if control.is_paused() {
                    trace!("{}: paused", thread_name);
                } else {
                    let command = make_command();
                    if queue.is_outstanding(command.id()) {
                        debug!("{}: {} still outstanding, skipping", thread_name, command.id());
                    } else {
                        queue.enqueue(command);
                    }
                }
                if stopped.recv_timeout(interval) != Err(RecvTimeoutError::Timeout) {
                    break;
                }
            })?;
        Ok(Self {
            name: name.to_string(),
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.shutdown();
    }
}
