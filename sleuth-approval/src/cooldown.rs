use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Result of a cooldown check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownStatus {
    pub allowed: bool,
    pub remaining_ms: u64,
}

/// Per-process record of critical-risk mutation times, keyed by operation.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    last_critical: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a critical-risk mutation of `operation` happened now.
    pub fn record(&self, operation: &str) {
        self.last_critical
            .lock()
            .expect("cooldown lock")
            .insert(operation.to_string(), Utc::now());
    }

    /// Check whether `operation` is outside its cooldown window.
    pub fn check_cooldown(&self, operation: &str, cooldown_ms: u64) -> CooldownStatus {
        let guard = self.last_critical.lock().expect("cooldown lock");
        let Some(last) = guard.get(operation) else {
            return CooldownStatus {
                allowed: true,
                remaining_ms: 0,
            };
        };
        let elapsed_ms = Utc::now()
            .signed_duration_since(*last)
            .num_milliseconds()
            .max(0) as u64;
        if elapsed_ms >= cooldown_ms {
            CooldownStatus {
                allowed: true,
                remaining_ms: 0,
            }
        } else {
            CooldownStatus {
                allowed: false,
                remaining_ms: cooldown_ms - elapsed_ms,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_operation_is_allowed() {
        let tracker = CooldownTracker::new();
        let status = tracker.check_cooldown("delete-pod", 60_000);
        assert!(status.allowed);
        assert_eq!(status.remaining_ms, 0);
    }

    #[test]
    fn recent_critical_mutation_blocks_until_window_passes() {
        let tracker = CooldownTracker::new();
        tracker.record("delete-pod");

        let status = tracker.check_cooldown("delete-pod", 60_000);
        assert!(!status.allowed);
        assert!(status.remaining_ms > 0 && status.remaining_ms <= 60_000);

        // A different operation is unaffected.
        assert!(tracker.check_cooldown("terminate-instance", 60_000).allowed);

        // A zero-length window never blocks.
        assert!(tracker.check_cooldown("delete-pod", 0).allowed);
    }
}
