//! Cooperative cancellation for long-running country simulations.
//!
//! An [`Interrupt`] combines an operator abort flag with an optional
//! wall-clock deadline. Clones share the same flag, so the binary can hold
//! one copy for its Ctrl-C handler while every country task polls another.
//! Hot loops call [`Interrupt::check`] once per top-level actor.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::CoreError;

/// Shared abort flag plus deadline.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    aborted: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Interrupt {
    /// An interrupt that only fires on [`abort`](Self::abort).
    pub fn new() -> Self {
        Self::default()
    }

    /// Also fire once `limit` has elapsed from now.
    #[must_use]
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.deadline = Instant::now().checked_add(limit);
        self
    }

    /// Request cancellation of every holder.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    /// Whether an abort was requested.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Whether the deadline has passed.
    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Return [`CoreError::Cancelled`] if aborted or past the deadline.
    pub fn check(&self) -> Result<(), CoreError> {
        if self.is_aborted() || self.deadline_passed() {
            return Err(CoreError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_interrupt_passes() {
        assert!(Interrupt::new().check().is_ok());
    }

    #[test]
    fn abort_is_shared_between_clones() {
        let a = Interrupt::new();
        let b = a.clone();
        a.abort();
        assert!(b.is_aborted());
        assert!(matches!(b.check(), Err(CoreError::Cancelled)));
    }

    #[test]
    fn zero_timeout_fires_immediately() {
        let interrupt = Interrupt::new().with_timeout(Duration::ZERO);
        assert!(interrupt.deadline_passed());
        assert!(interrupt.check().is_err());
    }

    #[test]
    fn long_timeout_does_not_fire() {
        let interrupt = Interrupt::new().with_timeout(Duration::from_secs(3600));
        assert!(interrupt.check().is_ok());
    }
}
