//! Observable bitmap engine events

use std::fmt;

use super::logger::Severity;

/// Observable events of the bitmap engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Configuration
    /// Index configuration validated
    ConfigLoaded,
    /// Bitmap index defined for a field
    IndexDefined,

    // Compression state
    /// Entry consolidated into packed buffers
    EntryConsolidated,
    /// Entry expanded into standalone leaves
    EntryExpanded,
    /// Mid segment dropped after its last bit was cleared
    MidDropped,
    /// Entry removed after its last bit was cleared
    EntryDropped,

    // Iteration
    /// Iterator opened
    IteratorOpened,
    /// Iterator closed or exhausted
    IteratorClosed,
    /// Writer had to wait for open iterators
    WriterBlocked,

    // Parallel iteration
    /// Parallel worker started
    WorkerStarted,
    /// Parallel worker finished
    WorkerFinished,

    // Persistence
    /// Snapshot of changed segments written
    SnapshotWritten,
    /// Snapshot applied
    SnapshotRestored,

    /// Corrupted bitmap data detected (FATAL)
    CorruptionDetected,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::IndexDefined => "INDEX_DEFINED",
            Event::EntryConsolidated => "ENTRY_CONSOLIDATED",
            Event::EntryExpanded => "ENTRY_EXPANDED",
            Event::MidDropped => "MID_SEGMENT_DROPPED",
            Event::EntryDropped => "ENTRY_DROPPED",
            Event::IteratorOpened => "ITERATOR_OPENED",
            Event::IteratorClosed => "ITERATOR_CLOSED",
            Event::WriterBlocked => "WRITER_BLOCKED_ON_READERS",
            Event::WorkerStarted => "PARALLEL_WORKER_STARTED",
            Event::WorkerFinished => "PARALLEL_WORKER_FINISHED",
            Event::SnapshotWritten => "SNAPSHOT_WRITTEN",
            Event::SnapshotRestored => "SNAPSHOT_RESTORED",
            Event::CorruptionDetected => "BITMAP_CORRUPTION_DETECTED",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::CorruptionDetected => Severity::Fatal,
            Event::WriterBlocked => Severity::Warn,
            Event::ConfigLoaded | Event::IndexDefined | Event::SnapshotWritten | Event::SnapshotRestored => {
                Severity::Info
            }
            _ => Severity::Trace,
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::CorruptionDetected)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
