use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Admits at most one in-flight task per key (an IP address).
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    active: Arc<Mutex<HashSet<String>>>,
}

/// Holds a key's slot; dropping it frees the slot, whatever the task outcome.
#[derive(Debug)]
pub struct FlightGuard {
    key: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl SingleFlight {
    /// `None` when a task for `key` is already running.
    pub fn try_acquire(&self, key: &str) -> Option<FlightGuard> {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if !active.insert(key.to_string()) {
            return None;
        }
        Some(FlightGuard {
            key: key.to_string(),
            active: self.active.clone(),
        })
    }

    pub fn active(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

impl FlightGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_for_same_key_is_rejected() {
        let flights = SingleFlight::default();
        let guard = flights.try_acquire("10.0.0.1").unwrap();

        assert!(flights.try_acquire("10.0.0.1").is_none());
        assert_eq!(flights.active(), vec!["10.0.0.1"]);
        assert!(flights.try_acquire("10.0.0.2").is_some());

        drop(guard);
        assert!(flights.active().is_empty());
        assert!(flights.try_acquire("10.0.0.1").is_some());
    }
}
