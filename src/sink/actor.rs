//! Writer actor with a dedicated thread and MPSC channel.
//!
//! Single-writer pattern: one thread owns the output, processes commands via MPSC.
//! Events are buffered and written as JSON lines when the buffer reaches the
//! batch size or the flush interval elapses.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::event::Event;
use crate::sink::SinkError;

/// Idle wait when nothing is buffered.
const IDLE_WAIT: Duration = Duration::from_secs(60);

// =============================================================================
// Commands
// =============================================================================

/// Commands sent to the writer actor.
#[derive(Debug)]
pub enum Command {
    /// Buffer an event for writing.
    Publish(Event),
    /// Flush and stop.
    Shutdown,
}

// =============================================================================
// Buffer
// =============================================================================

/// Buffer for batched writes with time-based and size-based flushing.
struct BatchBuffer<T> {
    items: Vec<T>,
    last_flush: Instant,
    max_items: usize,
    max_age: Duration,
}

impl<T> BatchBuffer<T> {
    fn new(max_items: usize, max_age: Duration) -> Self {
        Self {
            items: Vec::with_capacity(max_items),
            last_flush: Instant::now(),
            max_items,
            max_age,
        }
    }

    fn push(&mut self, item: T) {
        // Reset flush timer on first item to avoid treating long-idle buffers as overdue
        if self.items.is_empty() {
            self.last_flush = Instant::now();
        }
        self.items.push(item);
    }

    fn should_flush(&self) -> bool {
        self.items.len() >= self.max_items
            || (!self.items.is_empty() && self.last_flush.elapsed() >= self.max_age)
    }

    fn deadline(&self, now: Instant) -> Instant {
        if self.items.is_empty() {
            now + IDLE_WAIT
        } else {
            self.last_flush + self.max_age
        }
    }

    fn take(&mut self) -> Vec<T> {
        self.last_flush = Instant::now();
        std::mem::take(&mut self.items)
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// =============================================================================
// Actor
// =============================================================================

/// JSON-lines writer actor.
pub struct SinkActor {
    out: Box<dyn Write + Send>,
    rx: Receiver<Command>,
    buffer: BatchBuffer<Event>,
    written: Arc<AtomicU64>,
}

impl SinkActor {
    /// Spawn the writer actor thread.
    ///
    /// Returns the thread handle and the command sender.
    pub fn spawn(
        out: Box<dyn Write + Send>,
        channel_capacity: usize,
        batch_size: usize,
        flush_interval: Duration,
        written: Arc<AtomicU64>,
    ) -> Result<(JoinHandle<()>, SyncSender<Command>), SinkError> {
        let (tx, rx) = mpsc::sync_channel(channel_capacity);

        let mut actor = SinkActor {
            out,
            rx,
            buffer: BatchBuffer::new(batch_size.max(1), flush_interval),
            written,
        };
        let handle = thread::Builder::new()
            .name("promtap-sink".to_string())
            .spawn(move || actor.run())?;

        Ok((handle, tx))
    }

    fn run(&mut self) {
        tracing::debug!("SinkActor started");

        loop {
            let timeout = self
                .buffer
                .deadline(Instant::now())
                .saturating_duration_since(Instant::now());

            match self.rx.recv_timeout(timeout) {
                Ok(cmd) => {
                    if self.handle_command(cmd) {
                        break; // Shutdown requested
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    // Flush overdue
                }
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::debug!("Sink channel disconnected, shutting down");
                    self.flush();
                    break;
                }
            }

            if self.buffer.should_flush() {
                self.flush();
            }
        }

        tracing::debug!(
            written = self.written.load(Ordering::Relaxed),
            "SinkActor stopped"
        );
    }

    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Publish(event) => {
                self.buffer.push(event);
            }
            Command::Shutdown => {
                self.flush();
                return true;
            }
        }
        false
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let events = self.buffer.take();
        match self.write_batch(&events) {
            Ok(()) => {
                self.written
                    .fetch_add(events.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(error = %e, count = events.len(), "Event batch write failed");
            }
        }
    }

    fn write_batch(&mut self, events: &[Event]) -> Result<(), SinkError> {
        for event in events {
            serde_json::to_writer(&mut self.out, event)?;
            self.out.write_all(b"\n")?;
        }
        self.out.flush()?;
        Ok(())
    }
}
