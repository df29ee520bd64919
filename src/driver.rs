//! Blocking I/O shell around [`Protocol`].

use log::{error, info, trace, warn};
use std::io::{self, ErrorKind};
use std::sync::Arc;
use std::time::Instant;

use crate::command::Command;
use crate::dispatch::Dispatcher;
use crate::link::Link;
use crate::poller::PollControl;
use crate::protocol::{self, Action, Protocol, ProtocolConfig, State};
use crate::queue::CommandQueue;

const READ_CHUNK: usize = 512;

/// Owns the link and services the command queue, one command at a time.
///
/// There is a single deadline at any moment; every read is bounded by it and
/// its expiry is reported to the protocol as a timeout.
pub struct Driver<L: Link> {
    link: L,
    protocol: Protocol,
    queue: Arc<CommandQueue>,
    dispatcher: Dispatcher,
    control: PollControl,
    deadline: Option<Instant>,
}

impl<L: Link> Driver<L> {
    pub fn new(
        link: L,
        config: ProtocolConfig,
        queue: Arc<CommandQueue>,
        dispatcher: Dispatcher,
        control: PollControl,
    ) -> Self {
        Self {
            link,
            protocol: Protocol::new(config),
            queue,
            dispatcher,
            control,
            deadline: None,
        }
    }

    pub fn state(&self) -> State {
        self.protocol.state()
    }

    /// Service commands until the queue is closed, then hand back the link.
    pub fn run(mut self) -> L {
        info!("Link driver started");
        while let Some(command) = self.queue.dequeue() {
            let _ = self.service(command);
        }
        info!("Command queue closed, link driver exiting");
        self.link
    }

    /// Run one command to completion and release it from the queue.
    pub fn service(&mut self, command: Command) -> Result<(), protocol::Error> {
        // leftovers from an aborted exchange must not answer the wakeup
        if let Err(e) = self.link.clear_input() {
            warn!("Failed to clear link input: {}", e);
        }
        self.protocol.start(command);
        let result = loop {
            if let Some(result) = self.run_actions() {
                break result;
            }
            self.receive();
        };
        self.deadline = None;
        self.queue.complete();
        result
    }

    fn run_actions(&mut self) -> Option<Result<(), protocol::Error>> {
        while let Some(action) = self.protocol.poll_action() {
            match action {
                Action::Transmit(data) => {
                    trace!("Sending {:02X?}", data);
                    match self.send(&data) {
                        Ok(()) => self.protocol.data_sent(),
                        Err(e) => self.transport_error(e),
                    }
                }
                Action::ArmTimer(timeout) => self.deadline = Some(Instant::now() + timeout),
                Action::CancelTimer => self.deadline = None,
                Action::ResetLink => {
                    if let Err(e) = self.link.reset() {
                        error!("Link reset failed: {}", e);
                    }
                }
                Action::Deliver(frame) => {
                    self.dispatcher.dispatch(&frame);
                }
                Action::PausePolling => self.control.pause(),
                Action::ResumePolling => self.control.resume(),
                Action::Completed(result) => return Some(result),
            }
        }
        None
    }

    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.link.write_all(data)?;
        self.link.flush()
    }

    fn receive(&mut self) {
        let deadline = match self.deadline {
            Some(deadline) => deadline,
            None => {
                warn!("No deadline armed in state {:?}", self.protocol.state());
                return self
                    .protocol
                    .abort(io::Error::new(ErrorKind::Other, "protocol stalled"));
            }
        };
        let now = Instant::now();
        if now >= deadline {
            self.deadline = None;
            return self.protocol.timeout();
        }
        if let Err(e) = self.link.set_read_timeout(deadline - now) {
            return self.transport_error(e);
        }

        let mut buf = [0u8; READ_CHUNK];
        match self.link.read(&mut buf) {
            Ok(0) => self.transport_error(io::Error::new(ErrorKind::UnexpectedEof, "link closed")),
            Ok(len) => {
                trace!("Received {:02X?}", &buf[..len]);
                self.protocol.receive_data(&buf[..len]);
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
            Err(e) => self.transport_error(e),
        }
    }

    fn transport_error(&mut self, e: io::Error) {
        error!("Link error: {}", e);
        if let Err(e) = self.link.reset() {
            error!("Link reset failed: {}", e);
        }
        self.deadline = None;
        self.protocol.abort(e);
    }
}
