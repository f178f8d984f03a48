use crossbeam::channel::{Receiver, Sender};

use crate::{ConnectionId, PlayerData, PrimaryKey, RoomData, TransactionData};

pub type EventSender = Sender<CollabEvent>;
pub type EventReceiver = Receiver<CollabEvent>;

/// Events emitted by the collab, consumed by the realtime gateway
#[derive(Debug)]
pub enum CollabEvent {
    /// The player roster of a room changed in any way
    PlayersUpdated {
        room_id: PrimaryKey,
        players: Vec<PlayerData>,
    },
    /// A room's metadata or lifecycle state changed
    RoomUpdated {
        room_id: PrimaryKey,
        room: RoomData,
    },
    /// A transfer was committed, with the roster snapshot after it applied
    TransactionUpdated {
        room_id: PrimaryKey,
        transaction: TransactionData,
        players: Vec<PlayerData>,
    },
    /// A connection was displaced by a newer login of the same user
    ForcedKick {
        connection_id: ConnectionId,
        user_id: PrimaryKey,
        room_id: PrimaryKey,
    },
    /// The gateway should close this connection
    ForceDisconnect { connection_id: ConnectionId },
    /// A join was attempted against a room that no longer runs
    RoomDissolved {
        connection_id: ConnectionId,
        room_id: PrimaryKey,
    },
}
