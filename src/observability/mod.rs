//! Observability for the bitmap engine
//!
//! - Structured JSON logging with a process-wide minimum severity
//! - Typed lifecycle events
//! - Relaxed atomic counters
//!
//! Observability never changes engine behavior; a failed log write is
//! ignored.
//!
//! # Usage
//!
//! ```ignore
//! use bitdex::observability::{log_event_with_fields, BitmapMetrics, Event, ObservationScope};
//!
//! log_event_with_fields(Event::IndexDefined, &[("field", "color")]);
//!
//! let metrics = BitmapMetrics::new();
//! metrics.increment_bits_set();
//!
//! let scope = ObservationScope::new("INDEX_COMPRESS");
//! // ... do work ...
//! scope.complete();
//! ```

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{BitmapMetrics, MetricsSnapshot};
pub use scope::ObservationScope;

/// Log a lifecycle event at its own severity
pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event() {
        log_event(Event::IteratorOpened);
        log_event(Event::IteratorClosed);
    }

    #[test]
    fn test_log_event_with_fields() {
        log_event_with_fields(Event::MidDropped, &[("top", "4"), ("field", "color")]);
    }
}
