use axum::{
    debug_handler,
    extract::{Path, State},
    routing::{get, post},
    Json,
};
use tallyboard_collab::{CreateRoom, JoinByCode, NewMockPlayer};

use crate::{
    auth::Session,
    context::ServerContext,
    errors::ServerResult,
    schemas::{JoinRoomSchema, NewMockPlayerSchema, NewRoomSchema, ValidatedJson},
    serialized::{RoomDetails, SettlementInstruction, ToSerialized, Transaction},
    Router,
};

#[debug_handler(state = ServerContext)]
async fn create_room(
    session: Session,
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<NewRoomSchema>,
) -> ServerResult<Json<RoomDetails>> {
    let (room, players) = context
        .collab
        .rooms
        .create_room(CreateRoom {
            user_id: session.user().id,
            name: body.name,
            password: body.password,
            max_players: body.max_players,
        })
        .await?;

    Ok(Json(RoomDetails::new(&room, &players)))
}

#[debug_handler(state = ServerContext)]
async fn join_room(
    session: Session,
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<JoinRoomSchema>,
) -> ServerResult<Json<RoomDetails>> {
    let (room, players) = context
        .collab
        .rooms
        .join_by_code(JoinByCode {
            user_id: session.user().id,
            code: body.code,
            password: body.password,
        })
        .await?;

    Ok(Json(RoomDetails::new(&room, &players)))
}

#[debug_handler(state = ServerContext)]
async fn room(
    _session: Session,
    State(context): State<ServerContext>,
    Path(room_id): Path<i32>,
) -> ServerResult<Json<RoomDetails>> {
    let (room, players) = context.collab.rooms.room_with_players(room_id).await?;

    Ok(Json(RoomDetails::new(&room, &players)))
}

#[debug_handler(state = ServerContext)]
async fn add_mock_player(
    _session: Session,
    State(context): State<ServerContext>,
    Path(room_id): Path<i32>,
    ValidatedJson(body): ValidatedJson<NewMockPlayerSchema>,
) -> ServerResult<Json<RoomDetails>> {
    let (_, players) = context
        .collab
        .rooms
        .add_mock_player(NewMockPlayer {
            room_id,
            nickname: body.nickname,
            avatar: body.avatar,
        })
        .await?;

    let (room, _) = context.collab.rooms.room_with_players(room_id).await?;

    Ok(Json(RoomDetails::new(&room, &players)))
}

#[debug_handler(state = ServerContext)]
async fn settlement(
    _session: Session,
    State(context): State<ServerContext>,
    Path(room_id): Path<i32>,
) -> ServerResult<Json<Vec<SettlementInstruction>>> {
    let instructions = context.collab.rooms.settlement(room_id).await?;

    Ok(Json(instructions.to_serialized()))
}

#[debug_handler(state = ServerContext)]
async fn transactions(
    _session: Session,
    State(context): State<ServerContext>,
    Path(room_id): Path<i32>,
) -> ServerResult<Json<Vec<Transaction>>> {
    let transactions = context.collab.ledger.transactions(room_id).await?;

    Ok(Json(transactions.to_serialized()))
}

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_room))
        .route("/join", post(join_room))
        .route("/:id", get(room))
        .route("/:id/players", post(add_mock_player))
        .route("/:id/settlement", get(settlement))
        .route("/:id/transactions", get(transactions))
}
