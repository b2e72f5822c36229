//! Bounded retry policy.
//!
//! Every retry loop in the device protocols goes through [`Retry`] so the
//! attempt budget is a named value rather than a loop counter buried in the
//! protocol code.

use crate::tracing::prelude::*;

/// A fixed attempt budget with an optional recovery action between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    attempts: usize,
    label: &'static str,
}

impl Retry {
    pub const fn new(label: &'static str, attempts: usize) -> Self {
        Self { attempts, label }
    }

    pub const fn attempts(&self) -> usize {
        self.attempts
    }

    /// Run `op` until it produces a value or the budget is spent.
    ///
    /// `op` receives the zero-based attempt number. `Ok(None)` is a failed
    /// attempt; `Err` aborts immediately without consuming further attempts.
    pub fn run<T, E>(
        &self,
        mut op: impl FnMut(usize) -> Result<Option<T>, E>,
    ) -> Result<Option<T>, E> {
        self.run_with(&mut (), |_, attempt| op(attempt), |_, _| Ok(()))
    }

    /// Like [`Retry::run`], calling `between` after each failed attempt that
    /// is followed by another one. Both closures get `state`, typically the
    /// device handle they share.
    pub fn run_with<S: ?Sized, T, E>(
        &self,
        state: &mut S,
        mut op: impl FnMut(&mut S, usize) -> Result<Option<T>, E>,
        mut between: impl FnMut(&mut S, usize) -> Result<(), E>,
    ) -> Result<Option<T>, E> {
        for attempt in 0..self.attempts {
            if attempt > 0 {
                between(state, attempt)?;
            }

            if let Some(value) = op(state, attempt)? {
                if attempt > 0 {
                    debug!(op = self.label, attempt = attempt + 1, "Succeeded after retry");
                }
                return Ok(Some(value));
            }

            trace!(
                op = self.label,
                attempt = attempt + 1,
                of = self.attempts,
                "Attempt failed"
            );
        }

        debug!(op = self.label, attempts = self.attempts, "Retry budget exhausted");
        Ok(None)
    }
}
