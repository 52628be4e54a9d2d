use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::models::Order;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Append-only destination for run records.
pub trait LogSink: Send {
    fn append(&mut self, line: &str) -> std::io::Result<()>;
}

/// Sink appending to a flat file, flushed per line so a killed run keeps its
/// records.
pub struct FileSink {
    writer: BufWriter<File>,
}

impl FileSink {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl LogSink for FileSink {
    fn append(&mut self, line: &str) -> std::io::Result<()> {
        writeln!(self.writer, "{line}")?;
        self.writer.flush()
    }
}

/// In-memory sink for tests; `lines_handle` stays readable after the sink
/// moves into a `RunLog`.
#[derive(Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn lines_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.lines)
    }
}

impl LogSink for MemorySink {
    fn append(&mut self, line: &str) -> std::io::Result<()> {
        self.lines.lock().unwrap().push(line.to_string());
        Ok(())
    }
}

/// Shared run log; appends from all bots are serialized through one mutex.
pub struct RunLog {
    sink: Mutex<Box<dyn LogSink>>,
}

impl RunLog {
    pub fn new(sink: Box<dyn LogSink>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    /// Records one accepted order:
    /// `timestamp,instrument,open|close,long|short,price`.
    pub fn record_order(&self, order: &Order) -> std::io::Result<()> {
        let line = format!(
            "{},{},{},{},{}",
            order.timestamp.format(TIMESTAMP_FORMAT),
            order.instrument,
            order.offset.as_str(),
            order.direction.as_str(),
            order.price,
        );
        self.sink.lock().unwrap().append(&line)
    }

    /// Records one end-of-run line per instrument.
    pub fn record_summary(&self, instrument: &str, balance: f64, points: f64) -> std::io::Result<()> {
        let line = format!("{instrument}-balance:{balance}-profit:{points}");
        info!("{line}");
        self.sink.lock().unwrap().append(&line)
    }
}
