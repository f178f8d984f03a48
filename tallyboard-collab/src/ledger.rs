use thiserror::Error;

use crate::{
    CollabContext, CollabEvent, DatabaseError, NewTransaction, PlayerData, PrimaryKey,
    TransactionData, UpdatedPlayer,
};

/// Records point transfers between players and keeps balances in step with
/// the transaction history.
pub struct Ledger {
    context: CollabContext,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Amount must be a positive integer")]
    InvalidAmount,
    #[error("Amount or resulting balance does not fit the ledger range")]
    AmountOutOfRange,
    #[error("A player cannot transfer points to themselves")]
    SamePlayer,
    #[error("Player does not belong to this room")]
    PlayerNotInRoom,
    #[error("Room is finished")]
    RoomFinished,
    #[error(transparent)]
    Db(#[from] DatabaseError),
}

/// A requested point transfer, validated by [Ledger::commit]
#[derive(Debug)]
pub struct NewTransfer {
    pub room_id: PrimaryKey,
    pub from_player_id: PrimaryKey,
    pub to_player_id: PrimaryKey,
    /// Taken as i64 so out of range requests fail validation instead of
    /// failing deserialization
    pub amount: i64,
    pub description: Option<String>,
}

impl Ledger {
    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Validates and records a transfer, returning the transaction and the
    /// roster with updated balances.
    ///
    /// All checks happen before any write, so a rejected transfer leaves the
    /// room untouched.
    pub async fn commit(
        &self,
        transfer: NewTransfer,
    ) -> Result<(TransactionData, Vec<PlayerData>), LedgerError> {
        if transfer.amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        if transfer.amount > i32::MAX as i64 {
            return Err(LedgerError::AmountOutOfRange);
        }

        if transfer.from_player_id == transfer.to_player_id {
            return Err(LedgerError::SamePlayer);
        }

        let db = &self.context.database;
        let room = db.room_by_id(transfer.room_id).await?;

        if room.status.is_finished() {
            return Err(LedgerError::RoomFinished);
        }

        let from = db.player_by_id(transfer.from_player_id).await?;
        let to = db.player_by_id(transfer.to_player_id).await?;

        if from.room_id != room.id || to.room_id != room.id {
            return Err(LedgerError::PlayerNotInRoom);
        }

        let from_balance = from.balance as i64 - transfer.amount;
        let to_balance = to.balance as i64 + transfer.amount;

        let in_range = |balance: i64| balance >= i32::MIN as i64 && balance <= i32::MAX as i64;

        if !in_range(from_balance) || !in_range(to_balance) {
            return Err(LedgerError::AmountOutOfRange);
        }

        let transaction = db
            .create_transaction(NewTransaction {
                room_id: room.id,
                from_player_id: from.id,
                to_player_id: to.id,
                amount: transfer.amount as i32,
                description: transfer.description,
            })
            .await?;

        // Two separate single-row writes. A transfer racing another on the
        // same player can lose an update, the transaction log stays the
        // source of truth either way.
        db.update_player(UpdatedPlayer {
            id: from.id,
            balance: Some(from_balance as i32),
            ..Default::default()
        })
        .await?;

        db.update_player(UpdatedPlayer {
            id: to.id,
            balance: Some(to_balance as i32),
            ..Default::default()
        })
        .await?;

        let players = db.players_in_room(room.id).await?;

        Ok((transaction, players))
    }

    /// Transaction history of a room, newest first
    pub async fn transactions(
        &self,
        room_id: PrimaryKey,
    ) -> Result<Vec<TransactionData>, DatabaseError> {
        self.context.database.transactions_in_room(room_id).await
    }

    /// Pushes a committed transaction to everyone in the room
    pub async fn broadcast_committed(
        &self,
        room_id: PrimaryKey,
        transaction_id: PrimaryKey,
    ) -> Result<(), DatabaseError> {
        let db = &self.context.database;

        let transaction = db.transaction_by_id(transaction_id).await?;
        let players = db.players_in_room(room_id).await?;

        self.context.emit(CollabEvent::TransactionUpdated {
            room_id,
            transaction,
            players,
        });

        Ok(())
    }
}
