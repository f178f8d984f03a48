use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Keyed, time-limited mutual exclusion for multi-step operations.
///
/// A lock expires on its own after the given time to live, so a holder that
/// crashes mid-operation can never wedge the key forever.
#[derive(Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Instant>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to take the lock for a key. Returns false while another
    /// holder's lock is still live.
    pub fn acquire(&self, key: &str, ttl: Duration) -> bool {
        let mut locks = self.locks.lock();
        let now = Instant::now();

        let held = locks.get(key).map(|expiry| *expiry > now).unwrap_or(false);

        if held {
            return false;
        }

        locks.insert(key.to_string(), now + ttl);
        true
    }

    /// Releases a key. Releasing a key that isn't held does nothing.
    pub fn release(&self, key: &str) {
        self.locks.lock().remove(key);
    }
}
