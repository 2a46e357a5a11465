//! Single-flight guard keyed by instance identifier.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Tracks instances with an active resize.
///
/// Clones share the same underlying set, so one registry can be handed to
/// several orchestrators that must not race on the same instance.
#[derive(Clone, Debug, Default)]
pub struct FlightRegistry {
    active: Arc<Mutex<HashSet<String>>>,
}

impl FlightRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `instance_id`, returning `None` when it is already claimed.
    #[must_use]
    pub fn try_acquire(&self, instance_id: &str) -> Option<FlightGuard> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(instance_id.to_owned()) {
            return None;
        }
        Some(FlightGuard {
            registry: Arc::clone(&self.active),
            instance_id: instance_id.to_owned(),
        })
    }

    /// Returns `true` while a guard for `instance_id` is alive.
    #[must_use]
    pub fn is_active(&self, instance_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(instance_id)
    }
}

/// Releases its instance claim when dropped.
#[derive(Debug)]
pub struct FlightGuard {
    registry: Arc<Mutex<HashSet<String>>>,
    instance_id: String,
}

impl FlightGuard {
    /// Instance held by this guard.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.instance_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_for_same_instance_is_refused() {
        let registry = FlightRegistry::new();
        let guard = registry.try_acquire("i-1");

        assert!(guard.is_some());
        assert!(registry.try_acquire("i-1").is_none());
        assert!(registry.try_acquire("i-2").is_some());
    }

    #[test]
    fn dropping_guard_releases_instance() {
        let registry = FlightRegistry::new();
        let guard = registry.try_acquire("i-1");
        assert!(registry.is_active("i-1"));

        drop(guard);

        assert!(!registry.is_active("i-1"));
        assert!(registry.try_acquire("i-1").is_some());
    }

    #[test]
    fn clones_share_claims() {
        let registry = FlightRegistry::new();
        let shared = registry.clone();
        let _guard = registry.try_acquire("i-1");

        assert!(shared.try_acquire("i-1").is_none());
    }
}
