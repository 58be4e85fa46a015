//! Command latency trace.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use crossbeam_queue::SegQueue;

/// CSV header of a saved trace.
pub const TRACE_HEADER: &str = "io_type,start,end,latency";

/// One timed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    /// Operation label
    pub io_type: String,
    /// Start time
    pub start: Instant,
    /// End time
    pub end: Instant,
}

/// Collects timed operations from any thread.
///
/// Times are written as nanoseconds since the recorder's epoch.
#[derive(Debug)]
pub struct LatencyRecorder {
    epoch: Instant,
    events: SegQueue<TraceEvent>,
}

impl LatencyRecorder {
    /// A recorder whose epoch is now.
    pub fn new() -> Self {
        Self::with_epoch(Instant::now())
    }

    /// A recorder with an explicit epoch.
    pub fn with_epoch(epoch: Instant) -> Self {
        Self {
            epoch,
            events: SegQueue::new(),
        }
    }

    /// The epoch.
    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Record one operation.
    pub fn record(&self, io_type: impl Into<String>, start: Instant, end: Instant) {
        self.events.push(TraceEvent {
            io_type: io_type.into(),
            start,
            end,
        });
    }

    /// Run `f` and record how long it took.
    pub fn time<R>(&self, io_type: impl Into<String>, f: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let out = f();
        self.record(io_type, start, Instant::now());
        out
    }

    /// Number of recorded operations.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drain the recorded operations, sorted by start time.
    pub fn drain(&self) -> Vec<TraceEvent> {
        let mut events = Vec::with_capacity(self.events.len());
        while let Some(event) = self.events.pop() {
            events.push(event);
        }
        events.sort_by_key(|e| e.start);
        events
    }

    /// Drain into `out` as CSV; returns the number of rows.
    pub fn write_csv<W: Write>(&self, mut out: W) -> io::Result<usize> {
        let events = self.drain();
        writeln!(out, "{TRACE_HEADER}")?;
        for event in &events {
            let start = event.start.saturating_duration_since(self.epoch).as_nanos();
            let end = event.end.saturating_duration_since(self.epoch).as_nanos();
            writeln!(
                out,
                "{},{},{},{}",
                event.io_type,
                start,
                end,
                end.saturating_sub(start)
            )?;
        }
        out.flush()?;
        Ok(events.len())
    }

    /// Drain into a CSV file.
    pub fn save(&self, path: impl AsRef<Path>) -> io::Result<usize> {
        let file = File::create(path)?;
        self.write_csv(BufWriter::new(file))
    }
}

impl Default for LatencyRecorder {
    fn default() -> Self {
        Self::new()
    }
}
