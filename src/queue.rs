//! Thread-safe FIFO of pending commands, with a "current command" slot.
//!
//! Any number of producers [`enqueue`](CommandQueue::enqueue); exactly one
//! consumer, the driver thread, takes commands with
//! [`dequeue`](CommandQueue::dequeue) and releases them with
//! [`complete`](CommandQueue::complete).

use log::debug;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::command::{Command, CommandId};

type Observer = Box<dyn Fn(Option<&Command>) + Send>;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Command>,
    current: Option<Command>,
    closed: bool,
}

/// FIFO of commands waiting for the link.
#[derive(Default)]
pub struct CommandQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    observers: Mutex<Vec<Observer>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer of the current command. It is called with
    /// `Some(cmd)` when the driver takes a command and with `None` when the
    /// command completes, on the driver thread and in that order.
    pub fn subscribe(&self, observer: impl Fn(Option<&Command>) + Send + 'static) {
        lock(&self.observers).push(Box::new(observer));
    }

    /// Append a command and wake the consumer.
    pub fn enqueue(&self, command: Command) {
        let mut state = lock(&self.state);
        if state.closed {
            debug!("Queue closed, dropping {}", command);
            return;
        }
        debug!("Enqueued {}", command);
        state.pending.push_back(command);
        drop(state);
        self.available.notify_one();
    }

    /// Block until a command is available, make it the current command and
    /// notify observers. Returns `None` once the queue has been closed.
    pub fn dequeue(&self) -> Option<Command> {
        let mut state = lock(&self.state);
        let command = loop {
            if state.closed {
                return None;
            }
            if let Some(command) = state.pending.pop_front() {
                break command;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        };
        state.current = Some(command.clone());
        drop(state);
        self.notify(Some(&command));
        Some(command)
    }

    /// Clear the current command and notify observers with `None`.
    pub fn complete(&self) {
        lock(&self.state).current = None;
        self.notify(None);
    }

    /// Stop accepting commands and wake a blocked consumer.
    pub fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        state.pending.clear();
        drop(state);
        self.available.notify_all();
    }

    /// The command the driver is servicing, if any.
    pub fn current(&self) -> Option<Command> {
        lock(&self.state).current.clone()
    }

    /// True if a command of kind `id` is waiting or in flight.
    pub fn is_outstanding(&self, id: CommandId) -> bool {
        let state = lock(&self.state);
        state.current.as_ref().map(Command::id) == Some(id)
            || state.pending.iter().any(|c| c.id() == id)
    }

    pub fn len(&self) -> usize {
        lock(&self.state).pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(&self, current: Option<&Command>) {
        for observer in lock(&self.observers).iter() {
            observer(current);
        }
    }
}

// A panicking observer must not wedge the link.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = CommandQueue::new();
        queue.enqueue(Command::current_conditions());
        queue.enqueue(Command::extremes());
        queue.enqueue(Command::version());
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.dequeue().unwrap().id(), CommandId::CurrentConditions);
        queue.complete();
        assert_eq!(queue.dequeue().unwrap().id(), CommandId::Extremes);
        queue.complete();
        assert_eq!(queue.dequeue().unwrap().id(), CommandId::Version);
        queue.complete();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_current_slot() {
        let queue = CommandQueue::new();
        assert_eq!(queue.current(), None);
        queue.enqueue(Command::extremes());
        assert!(queue.is_outstanding(CommandId::Extremes));
        let cmd = queue.dequeue().unwrap();
        assert_eq!(queue.current(), Some(cmd));
        assert!(queue.is_outstanding(CommandId::Extremes));
        assert!(!queue.is_outstanding(CommandId::CurrentConditions));
        queue.complete();
        assert_eq!(queue.current(), None);
        assert!(!queue.is_outstanding(CommandId::Extremes));
    }

    #[test]
    fn test_observers_in_order() {
        let queue = CommandQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        queue.subscribe(move |cmd| log.lock().unwrap().push(cmd.map(Command::id)));

        queue.enqueue(Command::version());
        queue.enqueue(Command::diagnostics());
        for _ in 0..2 {
            queue.dequeue().unwrap();
            queue.complete();
        }
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Some(CommandId::Version),
                None,
                Some(CommandId::Diagnostics),
                None
            ]
        );
    }

    #[test]
    fn test_dequeue_blocks_until_enqueue() {
        let queue = Arc::new(CommandQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue().map(|c| c.id()))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!consumer.is_finished());
        queue.enqueue(Command::lamps(true));
        assert_eq!(consumer.join().unwrap(), Some(CommandId::LampsOn));
    }

    #[test]
    fn test_close_wakes_consumer() {
        let queue = Arc::new(CommandQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue())
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(consumer.join().unwrap(), None);
        queue.enqueue(Command::version());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fifo_per_producer_under_contention() {
        let queue = Arc::new(CommandQueue::new());
        let producers: Vec<_> = (0..4u16)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for n in 0..50u16 {
                        queue.enqueue(Command::eeprom_read(p, n));
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        // each producer's commands come out in the order they went in
        let mut next = [0u16; 4];
        for _ in 0..200 {
            let cmd = queue.dequeue().unwrap();
            let producer = cmd.eeprom_offset().unwrap() as usize;
            let count = cmd.response_size() as u16 - 2;
            assert_eq!(count, next[producer]);
            next[producer] += 1;
            queue.complete();
        }
        assert_eq!(next, [50; 4]);
    }
}
