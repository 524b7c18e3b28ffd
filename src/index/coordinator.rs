//! Reader/writer coordination
//!
//! Iterators do not hold the index lock while they are being drained.
//! Instead each open iterator holds a `ReadToken`; structural mutation
//! waits until every token is released.
//!
//! # Invariants
//!
//! - A writer proceeds only when the reader count is zero
//! - At most one writer is inside the gate at a time
//! - New readers wait while a writer is inside the gate
//! - Releasing a token twice has no effect

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct GateState {
    readers: usize,
    writer: bool,
}

#[derive(Debug, Default)]
struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Gate {
    fn release_reader(&self) {
        let mut state = self.state.lock();
        state.readers -= 1;
        if state.readers == 0 {
            self.changed.notify_all();
        }
    }
}

/// Gate shared by every index of one manager
#[derive(Debug, Clone, Default)]
pub struct AccessCoordinator {
    gate: Arc<Gate>,
}

impl AccessCoordinator {
    /// Creates an open gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reader. Waits while a writer is inside the gate.
    pub fn read(&self) -> ReadToken {
        let mut state = self.gate.state.lock();
        while state.writer {
            self.gate.changed.wait(&mut state);
        }
        state.readers += 1;
        ReadToken {
            gate: Some(Arc::clone(&self.gate)),
        }
    }

    /// Enter as the writer, waiting for every reader to leave
    pub fn write(&self) -> WriteGuard<'_> {
        let mut state = self.gate.state.lock();
        let mut waited = false;
        while state.writer || state.readers > 0 {
            waited = true;
            self.gate.changed.wait(&mut state);
        }
        state.writer = true;
        WriteGuard {
            gate: &self.gate,
            waited,
        }
    }

    /// Enter as the writer, giving up after `timeout`
    pub fn write_timeout(&self, timeout: Duration) -> Option<WriteGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.gate.state.lock();
        let mut waited = false;
        while state.writer || state.readers > 0 {
            waited = true;
            if self.gate.changed.wait_until(&mut state, deadline).timed_out()
                && (state.writer || state.readers > 0)
            {
                return None;
            }
        }
        state.writer = true;
        Some(WriteGuard {
            gate: &self.gate,
            waited,
        })
    }

    /// Enter as the writer only if nobody is inside the gate
    pub fn try_write(&self) -> Option<WriteGuard<'_>> {
        let mut state = self.gate.state.lock();
        if state.writer || state.readers > 0 {
            return None;
        }
        state.writer = true;
        Some(WriteGuard {
            gate: &self.gate,
            waited: false,
        })
    }

    /// Number of live read tokens
    pub fn active_readers(&self) -> usize {
        self.gate.state.lock().readers
    }
}

/// Proof that a reader is registered. Clones count as separate readers.
#[derive(Debug)]
pub struct ReadToken {
    gate: Option<Arc<Gate>>,
}

impl ReadToken {
    /// Release the token. Later calls and the eventual drop are no-ops.
    pub fn release(&mut self) {
        if let Some(gate) = self.gate.take() {
            gate.release_reader();
        }
    }

    /// Whether the token still counts as a reader
    pub fn is_active(&self) -> bool {
        self.gate.is_some()
    }
}

impl Clone for ReadToken {
    fn clone(&self) -> Self {
        let gate = self.gate.as_ref().map(|gate| {
            gate.state.lock().readers += 1;
            Arc::clone(gate)
        });
        ReadToken { gate }
    }
}

impl Drop for ReadToken {
    fn drop(&mut self) {
        self.release();
    }
}

/// Exclusive writer access; leaving the scope reopens the gate
#[derive(Debug)]
pub struct WriteGuard<'a> {
    gate: &'a Gate,
    waited: bool,
}

impl WriteGuard<'_> {
    /// Whether entering had to wait for readers or another writer
    pub fn waited(&self) -> bool {
        self.waited
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        state.writer = false;
        self.gate.changed.notify_all();
    }
}
