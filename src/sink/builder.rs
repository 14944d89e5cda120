//! Sink builder and handles.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_CHANNEL_CAPACITY, DEFAULT_FLUSH_INTERVAL, OutputConfig,
};
use crate::sink::actor::SinkActor;
use crate::sink::{EventWriter, Sink, SinkError};

/// Where the actor writes JSON lines.
enum Target {
    Stdout,
    File(PathBuf),
    Writer(Box<dyn Write + Send>),
}

/// Builder for constructing the event sink.
pub struct SinkBuilder {
    target: Target,
    channel_capacity: usize,
    batch_size: usize,
    flush_interval: Duration,
}

impl Default for SinkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkBuilder {
    /// Create a builder writing to stdout.
    pub fn new() -> Self {
        Self {
            target: Target::Stdout,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }

    /// Create a builder from the `output` configuration section.
    pub fn from_config(config: &OutputConfig) -> Self {
        let builder = Self::new()
            .channel_capacity(config.channel_capacity)
            .batch_size(config.batch_size)
            .flush_interval(config.flush_interval);
        match &config.path {
            Some(path) => builder.path(path),
            None => builder,
        }
    }

    /// Append JSON lines to a file instead of stdout.
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.target = Target::File(path.into());
        self
    }

    /// Write JSON lines to an arbitrary writer.
    pub fn writer(mut self, writer: impl Write + Send + 'static) -> Self {
        self.target = Target::Writer(Box::new(writer));
        self
    }

    /// Set the channel capacity between publishers and the actor.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set the number of buffered events that triggers a flush.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the maximum time an event stays buffered.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Open the output and spawn the writer actor.
    pub fn build(self) -> Result<SinkHandles, SinkError> {
        let out: Box<dyn Write + Send> = match self.target {
            Target::Stdout => Box::new(BufWriter::new(std::io::stdout())),
            Target::File(path) => {
                // Create parent directory if it doesn't exist
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                    && !parent.exists()
                {
                    std::fs::create_dir_all(parent)?;
                }
                let file = OpenOptions::new().create(true).append(true).open(&path)?;
                tracing::info!(path = %path.display(), "Writing events to file");
                Box::new(BufWriter::new(file))
            }
            Target::Writer(writer) => writer,
        };

        let written = Arc::new(AtomicU64::new(0));
        let (actor, tx) = SinkActor::spawn(
            out,
            self.channel_capacity,
            self.batch_size,
            self.flush_interval,
            Arc::clone(&written),
        )?;

        Ok(SinkHandles {
            writer: EventWriter::new(tx, written),
            actor: Some(actor),
        })
    }
}

/// Handles to the running sink.
pub struct SinkHandles {
    /// Publish facade, cheap to clone.
    pub writer: EventWriter,
    actor: Option<JoinHandle<()>>,
}

impl SinkHandles {
    /// Close the writer and wait for the actor to drain.
    pub fn join(mut self) -> Result<(), SinkError> {
        self.writer.close();
        if let Some(handle) = self.actor.take() {
            handle
                .join()
                .map_err(|_| SinkError::Internal("Failed to join sink actor thread".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for SinkHandles {
    fn drop(&mut self) {
        if let Some(handle) = self.actor.take() {
            self.writer.close();
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventValue};
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// In-memory output shared with the test after the actor exits.
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn event(field: &str, value: f64) -> Event {
        Event {
            timestamp: None,
            kind: "promtap".to_string(),
            labels: None,
            field: field.to_string(),
            value: EventValue::Number(value),
        }
    }

    #[test]
    fn test_file_sink_writes_json_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("events.jsonl");

        let handles = SinkBuilder::new()
            .path(&path)
            .batch_size(2)
            .build()
            .unwrap();
        let writer = handles.writer.clone();
        for i in 0..5 {
            writer.publish(event("up", f64::from(i)));
        }
        handles.join().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0]["up"], 0.0);
        assert_eq!(lines[4]["up"], 4.0);
        assert_eq!(lines[4]["type"], "promtap");
        assert_eq!(writer.written(), 5);
    }

    #[test]
    fn test_file_sink_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        for round in 0..2 {
            let handles = SinkBuilder::new().path(&path).build().unwrap();
            handles.writer.publish(event("round", f64::from(round)));
            handles.join().unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_writer_sink_receives_json_lines() {
        let buffer = SharedBuffer::default();
        let handles = SinkBuilder::new()
            .writer(buffer.clone())
            .batch_size(3)
            .build()
            .unwrap();
        let writer = handles.writer.clone();
        writer.publish(event("up", 1.0));
        writer.publish(event("load", 0.5));
        handles.join().unwrap();

        let content = buffer.contents();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["up"], 1.0);
        assert_eq!(lines[1]["load"], 0.5);
        assert_eq!(writer.written(), 2);
    }

    #[test]
    fn test_close_before_join_is_harmless() {
        let buffer = SharedBuffer::default();

        let handles = SinkBuilder::new().writer(buffer.clone()).build().unwrap();
        handles.writer.publish(event("up", 1.0));
        handles.writer.close();
        handles.writer.close();
        handles.join().unwrap();

        assert_eq!(buffer.contents().lines().count(), 1);
    }

    #[test]
    fn test_from_config() {
        let dir = tempdir().unwrap();
        let config = OutputConfig {
            path: Some(dir.path().join("cfg.jsonl").display().to_string()),
            channel_capacity: 8,
            batch_size: 1,
            flush_interval: Duration::from_millis(10),
        };
        let handles = SinkBuilder::from_config(&config).build().unwrap();
        handles.writer.publish(event("up", 1.0));
        handles.join().unwrap();
        assert!(dir.path().join("cfg.jsonl").exists());
    }
}
