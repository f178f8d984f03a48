use axum::{debug_handler, extract::State, routing::post, Json};
use tallyboard_collab::NewTransfer;

use crate::{
    auth::Session,
    context::ServerContext,
    errors::ServerResult,
    schemas::{NewTransactionSchema, ValidatedJson},
    serialized::{ToSerialized, TransactionCommitted},
    Router,
};

#[debug_handler(state = ServerContext)]
async fn create_transaction(
    _session: Session,
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<NewTransactionSchema>,
) -> ServerResult<Json<TransactionCommitted>> {
    let (transaction, players) = context
        .collab
        .ledger
        .commit(NewTransfer {
            room_id: body.room_id,
            from_player_id: body.from_player_id,
            to_player_id: body.to_player_id,
            amount: body.amount,
            description: body.description,
        })
        .await?;

    Ok(Json(TransactionCommitted {
        transaction: transaction.to_serialized(),
        players: players.to_serialized(),
    }))
}

pub fn router() -> Router {
    Router::new().route("/", post(create_transaction))
}
