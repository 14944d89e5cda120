//! Publish facade over the writer actor.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};

use crate::event::Event;
use crate::sink::SinkError;
use crate::sink::actor::Command;

/// Downstream publish target for normalized events.
///
/// Shared by every task of a round, so implementations must be thread-safe.
pub trait Sink: Send + Sync + 'static {
    /// Hand one event downstream. Fire-and-forget.
    fn publish(&self, event: Event);

    /// Release the sink. Calling it more than once must be harmless.
    fn close(&self);
}

/// Non-blocking event writer.
///
/// Uses `try_send` - events are dropped if the channel is full or the
/// writer is closed.
#[derive(Clone)]
pub struct EventWriter {
    tx: SyncSender<Command>,
    closed: Arc<AtomicBool>,
    published: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    written: Arc<AtomicU64>,
}

impl std::fmt::Debug for EventWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWriter")
            .field("closed", &self.is_closed())
            .field("published", &self.published())
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl EventWriter {
    pub(crate) fn new(tx: SyncSender<Command>, written: Arc<AtomicU64>) -> Self {
        Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
            published: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
            written,
        }
    }

    /// Events accepted into the channel.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Events dropped because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Events the actor has written out.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Whether [`Sink::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Publish, reporting why an event was not accepted.
    pub fn try_publish(&self, event: Event) -> Result<(), SinkError> {
        if self.is_closed() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(SinkError::ChannelSend);
        }
        match self.tx.try_send(Command::Publish(event)) {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Sink channel full, dropping event");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(SinkError::ChannelSend)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(SinkError::ChannelSend)
            }
        }
    }
}

impl Sink for EventWriter {
    fn publish(&self, event: Event) {
        let _ = self.try_publish(event);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Blocking send: shutdown must not be lost to a full channel.
        if self.tx.send(Command::Shutdown).is_err() {
            tracing::debug!("Sink actor already stopped");
        }
    }
}
