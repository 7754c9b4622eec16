//! Per-application deploy guard
//!
//! An in-process map from application key to the deploy attempt that
//! currently holds it. Overlapping deploys for the same application
//! fail fast instead of interleaving engine mutations. The mutex is
//! held only for the acquire/release check, never across an external
//! call. State is process-local by design: a restart implies no
//! deploys were genuinely in flight.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Opaque proof of which deploy attempt holds the lock
///
/// Release only clears the entry when the token still matches, so a
/// stale release from a superseded attempt cannot clear a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployToken(Uuid);

struct InFlight {
    token: DeployToken,
    acquired_at: Instant,
}

/// Guard against concurrent deploys of the same application
pub struct DeployGuard {
    enabled: bool,
    in_flight: Mutex<HashMap<String, InFlight>>,
}

impl DeployGuard {
    /// When disabled, acquisition always succeeds and release is a
    /// no-op; callers accept the interleaving risk
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// `None` iff another deploy for the same key currently holds it
    pub fn try_acquire(&self, key: &str) -> Option<DeployToken> {
        let token = DeployToken(Uuid::new_v4());
        if !self.enabled {
            return Some(token);
        }
        let mut in_flight = self.in_flight.lock();
        if in_flight.contains_key(key) {
            return None;
        }
        in_flight.insert(
            key.to_string(),
            InFlight {
                token,
                acquired_at: Instant::now(),
            },
        );
        Some(token)
    }

    /// No-op unless the caller's token still matches the held one
    pub fn release(&self, key: &str, token: DeployToken) {
        if !self.enabled {
            return;
        }
        let mut in_flight = self.in_flight.lock();
        if let Some(entry) = in_flight.get(key) {
            if entry.token == token {
                debug!(
                    key,
                    held_ms = entry.acquired_at.elapsed().as_millis() as u64,
                    "deploy guard released"
                );
                in_flight.remove(key);
            }
        }
    }

    pub fn is_busy(&self, key: &str) -> bool {
        self.enabled && self.in_flight.lock().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let guard = DeployGuard::new(true);
        let token = guard.try_acquire("7:42").unwrap();
        assert!(guard.try_acquire("7:42").is_none());
        guard.release("7:42", token);
        assert!(guard.try_acquire("7:42").is_some());
    }

    #[test]
    fn test_distinct_keys_are_independent() {
        let guard = DeployGuard::new(true);
        assert!(guard.try_acquire("7:42").is_some());
        assert!(guard.try_acquire("7:43").is_some());
    }

    #[test]
    fn test_stale_release_does_not_clear_newer_attempt() {
        let guard = DeployGuard::new(true);
        let stale = guard.try_acquire("7:42").unwrap();
        guard.release("7:42", stale);

        let current = guard.try_acquire("7:42").unwrap();
        // A delayed retry of the earlier release arrives now
        guard.release("7:42", stale);
        assert!(guard.is_busy("7:42"));

        guard.release("7:42", current);
        assert!(!guard.is_busy("7:42"));
    }

    #[test]
    fn test_disabled_guard_always_acquires() {
        let guard = DeployGuard::new(false);
        let first = guard.try_acquire("7:42").unwrap();
        let second = guard.try_acquire("7:42").unwrap();
        assert_ne!(first, second);
        guard.release("7:42", first);
        assert!(!guard.is_busy("7:42"));
    }
}
