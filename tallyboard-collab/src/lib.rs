mod audit;
mod auth;
mod db;
mod events;
mod identity;
mod ledger;
mod locks;
mod rooms;
mod sessions;
mod settlement;
mod util;

use std::sync::Arc;

pub use audit::*;
pub use auth::*;
pub use db::*;
pub use events::*;
pub use identity::*;
pub use ledger::*;
pub use locks::*;
pub use rooms::*;
pub use sessions::*;
pub use settlement::*;
pub use util::ConnectionId;

use crossbeam::channel::unbounded;

/// The tallyboard collab system, facilitating rooms, scorekeeping, and
/// authentication.
pub struct Collab {
    context: CollabContext,
    events: EventReceiver,

    pub auth: Auth,
    pub rooms: RoomManager,
    pub ledger: Ledger,
}

/// A type passed to various components of the collab system, to access state,
/// emit events, and dispatch actions.
#[derive(Clone)]
pub struct CollabContext {
    pub database: SharedDatabase,
    pub sessions: Arc<SessionRegistry>,
    pub locks: Arc<LockManager>,
    pub audit: Arc<AuditLog>,
    pub events: EventSender,
}

impl CollabContext {
    /// Emits a collab event. Failures only happen when no receiver exists,
    /// which means nothing is listening anyway.
    pub fn emit(&self, event: CollabEvent) {
        let _ = self.events.send(event);
    }
}

impl Collab {
    /// Creates the collab system. Must be called within a tokio runtime,
    /// because the audit log spawns its drain task.
    pub fn new(database: SharedDatabase, identity: Arc<dyn IdentityProvider>) -> Self {
        let (sender, receiver) = unbounded();

        let context = CollabContext {
            database: database.clone(),
            sessions: Arc::new(SessionRegistry::new()),
            locks: Arc::new(LockManager::new()),
            audit: Arc::new(AuditLog::new(database.clone())),
            events: sender,
        };

        let auth = Auth::new(database, identity);
        let rooms = RoomManager::new(&context);
        let ledger = Ledger::new(&context);

        Self {
            context,
            events: receiver,
            auth,
            rooms,
            ledger,
        }
    }

    /// The receiver end of the collab's event stream
    pub fn listen(&self) -> EventReceiver {
        self.events.clone()
    }

    pub fn context(&self) -> &CollabContext {
        &self.context
    }
}
