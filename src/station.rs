//! A fully wired console client: driver thread plus pollers.

use log::info;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::command::Command;
use crate::dispatch::{Dispatcher, RecordSink};
use crate::driver::Driver;
use crate::link::Link;
use crate::poller::{PollConfig, PollControl, Poller, Watermark};
use crate::protocol::ProtocolConfig;
use crate::queue::CommandQueue;
use crate::types::ArchiveStamp;

/// Settings for [`Station::start`].
#[derive(Debug, Clone, Default)]
pub struct StationConfig {
    pub protocol: ProtocolConfig,
    /// Poll intervals. A zero interval disables that poller.
    pub poll: PollConfig,
    /// Newest archive record already stored, if any. Without it the first
    /// archive poll downloads the whole archive memory.
    pub watermark: Option<ArchiveStamp>,
}

/// Running console client.
///
/// Shuts down on drop; [`shutdown()`](Self::shutdown) does the same
/// explicitly.
pub struct Station {
    queue: Arc<CommandQueue>,
    control: PollControl,
    watermark: Watermark,
    pollers: Vec<Poller>,
    driver: Option<JoinHandle<()>>,
}

impl Station {
    /// Start servicing the console on `link`, feeding decoded records to
    /// `sink`.
    pub fn start<L>(link: L, config: StationConfig, sink: impl RecordSink + 'static) -> io::Result<Self>
    where
        L: Link + 'static,
    {
        let mut dispatcher = Dispatcher::new();
        dispatcher.add_sink(sink);
        Self::start_with(link, config, dispatcher)
    }

    /// Like [`start`](Self::start), with a ready-made dispatcher.
    pub fn start_with<L>(link: L, config: StationConfig, mut dispatcher: Dispatcher) -> io::Result<Self>
    where
        L: Link + 'static,
    {
        let queue = Arc::new(CommandQueue::new());
        let control = PollControl::new();
        let watermark = Watermark::new(config.watermark);
        dispatcher.add_sink(watermark.sink());

        let driver = Driver::new(
            link,
            config.protocol,
            Arc::clone(&queue),
            dispatcher,
            control.clone(),
        );
        let driver = thread::Builder::new()
            .name("wx-link".into())
            .spawn(move || {
                driver.run();
            })?;

        let mut station = Self {
            queue,
            control,
            watermark,
            pollers: Vec::new(),
            driver: Some(driver),
        };
        station.add_poller("current", config.poll.current, Command::current_conditions)?;
        station.add_poller("extremes", config.poll.extremes, Command::extremes)?;
        let watermark = station.watermark.clone();
        station.add_poller("archive", config.poll.archive, move || watermark.command())?;
        info!("Station started with {} pollers", station.pollers.len());
        Ok(station)
    }

    fn add_poller<F>(&mut self, name: &str, interval: Duration, make_command: F) -> io::Result<()>
    where
        F: FnMut() -> Command + Send + 'static,
    {
        if interval.is_zero() {
            return Ok(());
        }
        let poller = Poller::spawn(
            name,
            interval,
            Arc::clone(&self.queue),
            self.control.clone(),
            make_command,
        )?;
        self.pollers.push(poller);
        Ok(())
    }

    /// Queue for ad hoc commands.
    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    pub fn poll_control(&self) -> &PollControl {
        &self.control
    }

    pub fn watermark(&self) -> &Watermark {
        &self.watermark
    }

    /// Stop the pollers, let the command in flight finish and stop the
    /// driver.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        for poller in self.pollers.drain(..) {
            poller.stop();
        }
        self.queue.close();
        if let Some(driver) = self.driver.take() {
            let _ = driver.join();
            info!("Station stopped");
        }
    }
}

impl Drop for Station {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{ErrorKind, Read, Write};

    /// Console that never answers.
    struct DeadLink(Duration);

    impl Read for DeadLink {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            thread::sleep(self.0);
            Err(io::Error::new(ErrorKind::TimedOut, "timeout"))
        }
    }

    impl Write for DeadLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Link for DeadLink {
        fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
            self.0 = timeout;
            Ok(())
        }

        fn reset(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn clear_input(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_disabled_pollers_and_shutdown() {
        let config = StationConfig {
            protocol: ProtocolConfig::default().with_wakeup_timeout(Duration::from_millis(2)),
            poll: PollConfig {
                current: Duration::from_millis(10),
                extremes: Duration::ZERO,
                archive: Duration::ZERO,
            },
            watermark: None,
        };
        let station = Station::start(DeadLink(Duration::ZERO), config, |_: &crate::Record| {}).unwrap();
        assert_eq!(station.pollers.len(), 1);
        assert!(station.watermark().get().is_none());
        thread::sleep(Duration::from_millis(30));
        station.shutdown();
    }
}
