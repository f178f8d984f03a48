use std::fmt::{self, Display};

use crossbeam::atomic::AtomicCell;
use rand::{distributions::Alphanumeric, thread_rng, Rng};

static CONNECTION_COUNTER: AtomicCell<u64> = AtomicCell::new(1);

/// Identifies a single realtime connection for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new, process-unique id.
    pub fn new() -> Self {
        Self(CONNECTION_COUNTER.fetch_add(1))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub fn random_string(length: usize) -> String {
    let mut rng = thread_rng();

    std::iter::repeat(())
        .map(|_| rng.sample(Alphanumeric) as char)
        .take(length)
        .collect()
}

/// Generates a 6 digit room code, used by players to join a room.
pub fn random_room_code() -> String {
    let mut rng = thread_rng();
    rng.gen_range(100_000..1_000_000u32).to_string()
}

/// Discards client supplied avatar values that only resolve on the device
/// they came from, such as wxfile:// paths and temporary cache urls.
pub fn normalize_avatar(avatar: Option<&str>) -> Option<String> {
    let value = avatar.unwrap_or_default().trim();

    if value.is_empty()
        || value.starts_with("wxfile://")
        || value.starts_with("http://tmp")
        || value.starts_with("https://tmp")
    {
        return None;
    }

    Some(value.to_string())
}
