//! Logging setup.
//!
//! Records go to an optional log file (no ANSI colours) and to an in-memory
//! ring that the log-viewer overlay reads. `TERMWM_LOG` overrides the
//! configured level with any `EnvFilter` directive.

use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter};

/// Environment variable holding a filter directive
pub const LOG_ENV: &str = "TERMWM_LOG";
/// Records kept for the log viewer
pub const LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: Level,
    pub target: String,
    pub message: String,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>5} {}: {}", self.level, self.target, self.message)
    }
}

/// Shared ring of the most recent records
#[derive(Clone)]
pub struct LogBuffer {
    records: Arc<Mutex<VecDeque<LogRecord>>>,
    capacity: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(LOG_CAPACITY)
    }
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(LOG_CAPACITY)))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, record: LogRecord) {
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }

    /// Up to `count` records, oldest first, ending `scroll` records before
    /// the newest one.
    pub fn tail(&self, count: usize, scroll: usize) -> Vec<LogRecord> {
        let records = self.records.lock();
        let end = records.len().saturating_sub(scroll);
        let start = end.saturating_sub(count);
        records.range(start..end).cloned().collect()
    }
}

/// Layer copying every enabled event into a [`LogBuffer`]
pub struct LogCapture {
    buffer: LogBuffer,
}

impl LogCapture {
    pub fn new(buffer: LogBuffer) -> Self {
        Self { buffer }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let meta = event.metadata();
        self.buffer.push(LogRecord {
            level: *meta.level(),
            target: meta.target().to_string(),
            message: visitor.finish(),
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            self.message + &self.fields
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Install the global subscriber. Returns the ring the log viewer reads.
pub fn init(path: Option<&Path>, level: &str) -> anyhow::Result<LogBuffer> {
    let buffer = LogBuffer::default();
    let filter = match EnvFilter::try_from_env(LOG_ENV) {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("invalid log level {:?}", level))?,
    };

    let file_layer = match path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening {}", path.display()))?;
            Some(
                tracing_fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(LogCapture::new(buffer.clone()))
        .try_init()
        .context("a tracing subscriber is already installed")?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{info, warn};

    fn record(n: usize) -> LogRecord {
        LogRecord {
            level: Level::INFO,
            target: "termwm".into(),
            message: format!("line {}", n),
        }
    }

    #[test]
    fn test_ring_drops_oldest() {
        let buffer = LogBuffer::new(3);
        for n in 0..5 {
            buffer.push(record(n));
        }
        assert_eq!(buffer.len(), 3);
        let messages: Vec<_> = buffer.tail(10, 0).into_iter().map(|r| r.message).collect();
        assert_eq!(messages, vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_tail_scrolls_back() {
        let buffer = LogBuffer::new(10);
        for n in 0..6 {
            buffer.push(record(n));
        }
        let messages: Vec<_> = buffer.tail(2, 1).into_iter().map(|r| r.message).collect();
        assert_eq!(messages, vec!["line 3", "line 4"]);
        assert!(buffer.tail(2, 50).is_empty());
        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_capture_layer_formats_fields() {
        let buffer = LogBuffer::new(10);
        let subscriber = tracing_subscriber::registry().with(LogCapture::new(buffer.clone()));
        tracing::subscriber::with_default(subscriber, || {
            info!(window = "w1", "window opened");
            warn!(cols = 80u16, "resize failed");
        });

        let records = buffer.tail(10, 0);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "window opened window=w1");
        assert_eq!(records[1].level, Level::WARN);
        assert_eq!(records[1].message, "resize failed cols=80");
        assert!(records[1].to_string().contains("WARN"));
    }
}
