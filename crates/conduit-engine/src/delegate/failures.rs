//! Retry backoff for failed generation
//!
//! A shape whose generation failed is not retried until its backoff expires.
//! The delay starts at the configured base and doubles per consecutive
//! failure up to the configured ceiling. Success clears the record.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::invoke::InterfaceShape;

#[derive(Debug, Clone, Copy)]
struct Failure {
    attempts: u32,
    retry_at: Instant,
}

/// Per-shape generation failure record
#[derive(Debug)]
pub struct FailureLedger {
    entries: Mutex<FxHashMap<InterfaceShape, Failure>>,
    base: Duration,
    max: Duration,
}

impl FailureLedger {
    /// Ledger with the given initial delay and ceiling
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
            base,
            max: max.max(base),
        }
    }

    /// Whether generation may be attempted for `shape` now
    pub fn should_attempt(&self, shape: &InterfaceShape) -> bool {
        match self.entries.lock().get(shape) {
            Some(f) => Instant::now() >= f.retry_at,
            None => true,
        }
    }

    /// Record a failure; returns the consecutive failure count.
    ///
    /// The first failure of a shape is logged at warn, repeats at debug.
    pub fn record_failure(&self, shape: &InterfaceShape, reason: &dyn fmt::Display) -> u32 {
        let mut entries = self.entries.lock();
        let attempts = entries.get(shape).map(|f| f.attempts).unwrap_or(0) + 1;
        let delay = self.delay_for(attempts);
        entries.insert(
            shape.clone(),
            Failure {
                attempts,
                retry_at: Instant::now() + delay,
            },
        );
        drop(entries);

        if attempts == 1 {
            warn!(
                interface = shape.name(),
                retry_in_ms = delay.as_millis() as u64,
                "generated dispatch failed, falling back to reflective: {}",
                reason
            );
        } else {
            debug!(
                interface = shape.name(),
                attempts,
                retry_in_ms = delay.as_millis() as u64,
                "generated dispatch failed again: {}",
                reason
            );
        }
        attempts
    }

    /// Forget failures of `shape`
    pub fn record_success(&self, shape: &InterfaceShape) {
        let removed = self.entries.lock().remove(shape);
        if let Some(f) = removed {
            debug!(interface = shape.name(), after = f.attempts, "generated dispatch recovered");
        }
    }

    /// Consecutive failures recorded for `shape`
    pub fn attempts(&self, shape: &InterfaceShape) -> u32 {
        self.entries.lock().get(shape).map(|f| f.attempts).unwrap_or(0)
    }

    /// Time until `shape` may be retried; zero when it may be retried now
    pub fn retry_in(&self, shape: &InterfaceShape) -> Option<Duration> {
        self.entries
            .lock()
            .get(shape)
            .map(|f| f.retry_at.saturating_duration_since(Instant::now()))
    }

    fn delay_for(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::InterfaceBuilder;
    use conduit_sdk::ValueType;

    fn shape() -> InterfaceShape {
        let iface = InterfaceBuilder::new("Flaky")
            .method("f", &[], ValueType::I32)
            .build()
            .unwrap();
        InterfaceShape::of(&iface)
    }

    #[test]
    fn test_backoff_doubles_to_ceiling() {
        let ledger = FailureLedger::new(Duration::from_millis(10), Duration::from_millis(35));
        assert_eq!(ledger.delay_for(1), Duration::from_millis(10));
        assert_eq!(ledger.delay_for(2), Duration::from_millis(20));
        assert_eq!(ledger.delay_for(3), Duration::from_millis(35));
        assert_eq!(ledger.delay_for(40), Duration::from_millis(35));
    }

    #[test]
    fn test_window_blocks_then_clears() {
        let ledger = FailureLedger::new(Duration::from_secs(60), Duration::from_secs(60));
        let shape = shape();
        assert!(ledger.should_attempt(&shape));
        assert_eq!(ledger.record_failure(&shape, &"boom"), 1);
        assert!(!ledger.should_attempt(&shape));
        assert!(ledger.retry_in(&shape).unwrap() > Duration::from_secs(50));
        ledger.record_success(&shape);
        assert!(ledger.should_attempt(&shape));
        assert_eq!(ledger.attempts(&shape), 0);
    }

    #[test]
    fn test_zero_backoff_retries_immediately() {
        let ledger = FailureLedger::new(Duration::ZERO, Duration::ZERO);
        let shape = shape();
        ledger.record_failure(&shape, &"boom");
        ledger.record_failure(&shape, &"boom");
        assert_eq!(ledger.attempts(&shape), 2);
        assert!(ledger.should_attempt(&shape));
    }
}
