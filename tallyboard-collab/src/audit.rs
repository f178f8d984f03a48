use log::warn;
use tokio::sync::mpsc;

use crate::{NewSecurityEvent, SharedDatabase};

/// Event kind recorded when a duplicate login displaces a connection
pub const KIND_DUPLICATE_LOGIN_KICK: &str = "duplicate-login-kick";

const AUDIT_QUEUE_SIZE: usize = 256;

/// Fire-and-forget sink for security events.
///
/// Writes happen on a background task so callers never wait on, or fail
/// because of, the audit trail.
pub struct AuditLog {
    sender: mpsc::Sender<NewSecurityEvent>,
}

impl AuditLog {
    /// Creates the log and spawns its drain task. Must be called within a
    /// tokio runtime.
    pub fn new(db: SharedDatabase) -> Self {
        let (sender, mut receiver) = mpsc::channel::<NewSecurityEvent>(AUDIT_QUEUE_SIZE);

        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if let Err(e) = db.create_security_event(event.clone()).await {
                    warn!("Failed to record security event {}: {e}", event.kind);
                }
            }
        });

        Self { sender }
    }

    /// Queues a security event. Drops the event with a warning if the queue
    /// is full.
    pub fn record(&self, event: NewSecurityEvent) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("Dropped security event: {e}");
        }
    }
}
