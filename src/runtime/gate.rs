//! Counting gate bounding concurrent record-phase subprocesses.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::{PerfscopeError, PerfscopeResult};

#[derive(Debug)]
pub struct RecordGate {
    limit: usize,
    in_use: Mutex<usize>,
    freed: Condvar,
}

impl RecordGate {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            in_use: Mutex::new(0),
            freed: Condvar::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_use(&self) -> usize {
        *self.lock()
    }

    /// Takes a slot, waiting at most `wait` for one to free up.
    ///
    /// A zero `wait` fails immediately when the gate is saturated.
    pub fn acquire(&self, wait: Duration) -> PerfscopeResult<RecordPermit<'_>> {
        let deadline = Instant::now() + wait;
        let mut in_use = self.lock();
        while *in_use >= self.limit {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!("record gate saturated ({} of {})", *in_use, self.limit);
                return Err(PerfscopeError::ResourceExhausted { limit: self.limit });
            }
            in_use = match self.freed.wait_timeout(in_use, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        *in_use += 1;
        Ok(RecordPermit { gate: self })
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.in_use.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Slot held for the lifetime of one record phase.
#[derive(Debug)]
pub struct RecordPermit<'a> {
    gate: &'a RecordGate,
}

impl Drop for RecordPermit<'_> {
    fn drop(&mut self) {
        let mut in_use = self.gate.lock();
        *in_use = in_use.saturating_sub(1);
        drop(in_use);
        self.gate.freed.notify_one();
    }
}
