//! Begin/complete logging for whole-index operations
//!
//! - `{name}_BEGIN` on creation
//! - `{name}_COMPLETE` on `complete()`, with the elapsed time
//! - `{name}_FAILED` on `fail()`
//! - `{name}_INCOMPLETE` on drop without either

use std::cell::Cell;
use std::time::Instant;

use super::logger::Logger;

/// Logs the lifecycle of one operation
pub struct ObservationScope<'a> {
    name: &'a str,
    completed: Cell<bool>,
    fields: Vec<(&'a str, String)>,
    started: Instant,
}

impl<'a> ObservationScope<'a> {
    /// Create a scope; logs `{name}_BEGIN`
    pub fn new(name: &'a str) -> Self {
        Self::with_fields(name, &[])
    }

    /// Create a scope whose fields are repeated on every line it logs
    pub fn with_fields(name: &'a str, fields: &[(&'a str, &str)]) -> Self {
        Logger::info(&format!("{}_BEGIN", name), fields);
        Self {
            name,
            completed: Cell::new(false),
            fields: fields.iter().map(|(k, v)| (*k, v.to_string())).collect(),
            started: Instant::now(),
        }
    }

    /// Logs `{name}_COMPLETE`
    pub fn complete(self) {
        self.complete_with_fields(&[]);
    }

    /// Logs `{name}_COMPLETE` with extra fields
    pub fn complete_with_fields(self, extra: &[(&str, &str)]) {
        self.completed.set(true);
        let elapsed = self.started.elapsed().as_micros().to_string();
        let mut fields: Vec<(&str, &str)> = self.fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        fields.extend(extra.iter().copied());
        fields.push(("elapsed_us", elapsed.as_str()));
        Logger::info(&format!("{}_COMPLETE", self.name), &fields);
    }

    /// Logs `{name}_FAILED` at ERROR level
    pub fn fail(self, reason: &str) {
        self.completed.set(true);
        let mut fields: Vec<(&str, &str)> = self.fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        fields.push(("reason", reason));
        Logger::error(&format!("{}_FAILED", self.name), &fields);
    }

    /// Logs `{name}_FAILED` at FATAL level
    pub fn fail_fatal(self, reason: &str) {
        self.completed.set(true);
        Logger::fatal(&format!("{}_FAILED", self.name), &[("reason", reason)]);
    }

    /// Whether `complete` or `fail` was called
    pub fn is_completed(&self) -> bool {
        self.completed.get()
    }
}

impl Drop for ObservationScope<'_> {
    fn drop(&mut self) {
        if !self.completed.get() {
            Logger::warn(
                &format!("{}_INCOMPLETE", self.name),
                &[("reason", "scope dropped without completion")],
            );
        }
    }
}
