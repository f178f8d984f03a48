use std::sync::Arc;
use std::time::Duration;

use tallyboard_collab::{
    Collab, CollabEvent, ConnectionId, LoginProfile, MemoryDatabase, MockIdentity, NewMockPlayer,
    NewTransfer, CreateRoom, JoinByCode, LedgerError, PlayerData, PrimaryKey, RoomError,
    RoomStatus, SessionData, KIND_DUPLICATE_LOGIN_KICK,
};

fn setup() -> (Collab, Arc<MemoryDatabase>) {
    let database = Arc::new(MemoryDatabase::new());
    let collab = Collab::new(database.clone(), Arc::new(MockIdentity));

    (collab, database)
}

async fn login(collab: &Collab, name: &str) -> SessionData {
    collab
        .auth
        .login(
            name,
            LoginProfile {
                nickname: name.to_string(),
                avatar: None,
            },
        )
        .await
        .unwrap()
}

async fn create_room(collab: &Collab, owner: &SessionData) -> tallyboard_collab::RoomData {
    let (room, _) = collab
        .rooms
        .create_room(CreateRoom {
            user_id: owner.user.id,
            name: "test table".to_string(),
            password: None,
            max_players: Some(8),
        })
        .await
        .unwrap();

    room
}

async fn join(collab: &Collab, room_code: &str, user: &SessionData) -> Vec<PlayerData> {
    let (_, players) = collab
        .rooms
        .join_by_code(JoinByCode {
            user_id: user.user.id,
            code: room_code.to_string(),
            password: None,
        })
        .await
        .unwrap();

    players
}

fn player_of(players: &[PlayerData], user_id: PrimaryKey) -> &PlayerData {
    players
        .iter()
        .find(|p| p.user_id == Some(user_id))
        .unwrap()
}

#[tokio::test]
async fn test_balances_stay_zero_sum() {
    let (collab, _) = setup();

    let alice = login(&collab, "alice").await;
    let bob = login(&collab, "bob").await;

    let room = create_room(&collab, &alice).await;
    let players = join(&collab, &room.code, &bob).await;

    let alice_player = player_of(&players, alice.user.id).id;
    let bob_player = player_of(&players, bob.user.id).id;

    for (from, to, amount) in [(alice_player, bob_player, 30), (bob_player, alice_player, 12)] {
        collab
            .ledger
            .commit(NewTransfer {
                room_id: room.id,
                from_player_id: from,
                to_player_id: to,
                amount,
                description: None,
            })
            .await
            .unwrap();
    }

    let (_, players) = collab.rooms.room_with_players(room.id).await.unwrap();
    let sum: i64 = players.iter().map(|p| p.balance as i64).sum();

    assert_eq!(sum, 0);
    assert_eq!(player_of(&players, alice.user.id).balance, -18);
    assert_eq!(player_of(&players, bob.user.id).balance, 18);
}

#[tokio::test]
async fn test_duplicate_login_kicks_older_connection() {
    let (collab, database) = setup();

    let alice = login(&collab, "alice").await;
    let room = create_room(&collab, &alice).await;

    let first = ConnectionId::new();
    let second = ConnectionId::new();

    let events = collab.listen();

    collab
        .rooms
        .join_connected(room.id, alice.user.id, first)
        .await
        .unwrap();

    collab
        .rooms
        .join_connected(room.id, alice.user.id, second)
        .await
        .unwrap();

    let events: Vec<_> = events.try_iter().collect();

    assert!(events.iter().any(|e| matches!(
        e,
        CollabEvent::ForcedKick { connection_id, .. } if *connection_id == first
    )));

    assert!(events.iter().any(|e| matches!(
        e,
        CollabEvent::ForceDisconnect { connection_id } if *connection_id == first
    )));

    // The newer connection stays registered
    assert_eq!(
        collab.rooms.connection_user(second),
        Some((alice.user.id, room.id))
    );
    assert_eq!(collab.rooms.connection_user(first), None);

    // The kick ends up in the audit trail asynchronously
    tokio::time::sleep(Duration::from_millis(50)).await;

    let recorded = database.security_events();

    assert!(recorded
        .iter()
        .any(|e| e.kind == KIND_DUPLICATE_LOGIN_KICK && e.user_id == Some(alice.user.id)));
}

#[tokio::test]
async fn test_request_join_evicts_live_connection_so_a_retry_succeeds() {
    let (collab, database) = setup();

    let alice = login(&collab, "alice").await;
    let room = create_room(&collab, &alice).await;

    let stale = ConnectionId::new();

    collab
        .rooms
        .join_connected(room.id, alice.user.id, stale)
        .await
        .unwrap();

    let events = collab.listen();

    let result = collab
        .rooms
        .join_by_code(JoinByCode {
            user_id: alice.user.id,
            code: room.code.clone(),
            password: None,
        })
        .await;

    assert!(matches!(result, Err(RoomError::DuplicateSession)));

    // The live connection was evicted, not just refused
    assert_eq!(collab.rooms.connection_user(stale), None);

    let events: Vec<_> = events.try_iter().collect();

    assert!(events.iter().any(|e| matches!(
        e,
        CollabEvent::ForceDisconnect { connection_id } if *connection_id == stale
    )));

    tokio::time::sleep(Duration::from_millis(50)).await;

    let recorded = database.security_events();

    assert!(recorded
        .iter()
        .any(|e| e.kind == KIND_DUPLICATE_LOGIN_KICK && e.user_id == Some(alice.user.id)));

    // The slot is vacated, so the retry goes through
    join(&collab, &room.code, &alice).await;
}

#[tokio::test]
async fn test_ownership_passes_to_earliest_remaining_player() {
    let (collab, _) = setup();

    let alice = login(&collab, "alice").await;
    let bob = login(&collab, "bob").await;
    let carol = login(&collab, "carol").await;

    let room = create_room(&collab, &alice).await;
    join(&collab, &room.code, &bob).await;
    join(&collab, &room.code, &carol).await;

    collab.rooms.exit_room(room.id, alice.user.id).await.unwrap();

    let (room, players) = collab.rooms.room_with_players(room.id).await.unwrap();

    assert_eq!(room.owner_id, Some(bob.user.id));
    assert!(players.iter().all(|p| p.user_id != Some(alice.user.id)));
}

#[tokio::test]
async fn test_room_dissolves_when_last_player_exits() {
    let (collab, _) = setup();

    let alice = login(&collab, "alice").await;
    let room = create_room(&collab, &alice).await;

    collab.rooms.exit_room(room.id, alice.user.id).await.unwrap();

    let (room, _) = collab.rooms.room_with_players(room.id).await.unwrap();

    assert_eq!(room.status, RoomStatus::Finished);
    assert_eq!(room.owner_id, None);
}

#[tokio::test]
async fn test_dissolved_room_rejects_rejoin_with_signal() {
    let (collab, _) = setup();

    let alice = login(&collab, "alice").await;
    let bob = login(&collab, "bob").await;

    let room = create_room(&collab, &alice).await;
    collab.rooms.exit_room(room.id, alice.user.id).await.unwrap();

    let events = collab.listen();
    let connection = ConnectionId::new();

    let result = collab
        .rooms
        .join_connected(room.id, bob.user.id, connection)
        .await;

    assert!(matches!(result, Err(RoomError::RoomFinished)));

    let signalled = events.try_iter().any(|e| {
        matches!(
            e,
            CollabEvent::RoomDissolved { connection_id, .. } if connection_id == connection
        )
    });

    assert!(signalled);
}

#[tokio::test]
async fn test_exit_keeps_players_referenced_by_transactions() {
    let (collab, _) = setup();

    let alice = login(&collab, "alice").await;
    let bob = login(&collab, "bob").await;

    let room = create_room(&collab, &alice).await;
    let players = join(&collab, &room.code, &bob).await;

    collab
        .ledger
        .commit(NewTransfer {
            room_id: room.id,
            from_player_id: player_of(&players, alice.user.id).id,
            to_player_id: player_of(&players, bob.user.id).id,
            amount: 5,
            description: None,
        })
        .await
        .unwrap();

    collab.rooms.exit_room(room.id, alice.user.id).await.unwrap();

    let (_, players) = collab.rooms.room_with_players(room.id).await.unwrap();
    let alice_player = player_of(&players, alice.user.id);

    // The row survives for history, but offline
    assert!(!alice_player.is_online);
}

#[tokio::test]
async fn test_disconnect_marks_offline_without_succession() {
    let (collab, _) = setup();

    let alice = login(&collab, "alice").await;
    let bob = login(&collab, "bob").await;

    let room = create_room(&collab, &alice).await;
    join(&collab, &room.code, &bob).await;

    let connection = ConnectionId::new();

    collab
        .rooms
        .join_connected(room.id, alice.user.id, connection)
        .await
        .unwrap();

    collab.rooms.handle_disconnect(connection).await.unwrap();

    let (room, players) = collab.rooms.room_with_players(room.id).await.unwrap();

    assert_eq!(room.owner_id, Some(alice.user.id));
    assert!(!player_of(&players, alice.user.id).is_online);
    assert_eq!(room.status, RoomStatus::Active);
}

#[tokio::test]
async fn test_room_dissolves_when_last_connection_drops() {
    let (collab, _) = setup();

    let alice = login(&collab, "alice").await;
    let room = create_room(&collab, &alice).await;

    let connection = ConnectionId::new();

    collab
        .rooms
        .join_connected(room.id, alice.user.id, connection)
        .await
        .unwrap();

    collab.rooms.handle_disconnect(connection).await.unwrap();

    let (room, _) = collab.rooms.room_with_players(room.id).await.unwrap();

    assert_eq!(room.status, RoomStatus::Finished);
}

#[tokio::test]
async fn test_join_is_rejected_while_lock_is_held() {
    let (collab, _) = setup();

    let alice = login(&collab, "alice").await;
    let bob = login(&collab, "bob").await;

    let room = create_room(&collab, &alice).await;

    let key = format!("join:{}:{}", bob.user.id, room.id);
    collab.context().locks.acquire(&key, Duration::from_secs(5));

    let result = collab
        .rooms
        .join_by_code(JoinByCode {
            user_id: bob.user.id,
            code: room.code.clone(),
            password: None,
        })
        .await;

    assert!(matches!(result, Err(RoomError::Busy)));

    collab.context().locks.release(&key);
    join(&collab, &room.code, &bob).await;
}

#[tokio::test]
async fn test_full_room_rejects_new_members() {
    let (collab, _) = setup();

    let alice = login(&collab, "alice").await;
    let bob = login(&collab, "bob").await;
    let carol = login(&collab, "carol").await;

    let (room, _) = collab
        .rooms
        .create_room(CreateRoom {
            user_id: alice.user.id,
            name: "tiny".to_string(),
            password: None,
            max_players: Some(2),
        })
        .await
        .unwrap();

    join(&collab, &room.code, &bob).await;

    let result = collab
        .rooms
        .join_by_code(JoinByCode {
            user_id: carol.user.id,
            code: room.code.clone(),
            password: None,
        })
        .await;

    assert!(matches!(result, Err(RoomError::RoomFull)));

    // A returning member is not bounced by the capacity check
    collab.rooms.leave_room(room.id, bob.user.id).await.unwrap();
    join(&collab, &room.code, &bob).await;
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let (collab, _) = setup();

    let alice = login(&collab, "alice").await;
    let bob = login(&collab, "bob").await;

    let (room, _) = collab
        .rooms
        .create_room(CreateRoom {
            user_id: alice.user.id,
            name: "secret".to_string(),
            password: Some("123456".to_string()),
            max_players: None,
        })
        .await
        .unwrap();

    let result = collab
        .rooms
        .join_by_code(JoinByCode {
            user_id: bob.user.id,
            code: room.code.clone(),
            password: Some("654321".to_string()),
        })
        .await;

    assert!(matches!(result, Err(RoomError::WrongPassword)));

    collab
        .rooms
        .join_by_code(JoinByCode {
            user_id: bob.user.id,
            code: room.code.clone(),
            password: Some("123456".to_string()),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_transfer_validation_happens_before_any_write() {
    let (collab, _) = setup();

    let alice = login(&collab, "alice").await;
    let bob = login(&collab, "bob").await;

    let room = create_room(&collab, &alice).await;
    let players = join(&collab, &room.code, &bob).await;

    let alice_player = player_of(&players, alice.user.id).id;
    let bob_player = player_of(&players, bob.user.id).id;

    let cases = [
        (alice_player, bob_player, 0, "zero amount"),
        (alice_player, bob_player, -5, "negative amount"),
        (alice_player, alice_player, 10, "self transfer"),
        (alice_player, bob_player, i32::MAX as i64 + 1, "oversized amount"),
    ];

    for (from, to, amount, label) in cases {
        let result = collab
            .ledger
            .commit(NewTransfer {
                room_id: room.id,
                from_player_id: from,
                to_player_id: to,
                amount,
                description: None,
            })
            .await;

        assert!(result.is_err(), "{label} should be rejected");
    }

    let (_, players) = collab.rooms.room_with_players(room.id).await.unwrap();

    assert!(players.iter().all(|p| p.balance == 0));
    assert!(collab.ledger.transactions(room.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_transfer_rejects_balance_overflow() {
    let (collab, _) = setup();

    let alice = login(&collab, "alice").await;
    let bob = login(&collab, "bob").await;

    let room = create_room(&collab, &alice).await;
    let players = join(&collab, &room.code, &bob).await;

    let alice_player = player_of(&players, alice.user.id).id;
    let bob_player = player_of(&players, bob.user.id).id;

    collab
        .ledger
        .commit(NewTransfer {
            room_id: room.id,
            from_player_id: alice_player,
            to_player_id: bob_player,
            amount: i32::MAX as i64,
            description: None,
        })
        .await
        .unwrap();

    // One more point would push both balances out of range
    let result = collab
        .ledger
        .commit(NewTransfer {
            room_id: room.id,
            from_player_id: alice_player,
            to_player_id: bob_player,
            amount: 1,
            description: None,
        })
        .await;

    assert!(matches!(result, Err(LedgerError::AmountOutOfRange)));

    let (_, players) = collab.rooms.room_with_players(room.id).await.unwrap();

    assert_eq!(player_of(&players, bob.user.id).balance, i32::MAX);
}

#[tokio::test]
async fn test_finished_room_freezes_the_ledger() {
    let (collab, _) = setup();

    let alice = login(&collab, "alice").await;
    let bob = login(&collab, "bob").await;

    let room = create_room(&collab, &alice).await;
    let players = join(&collab, &room.code, &bob).await;

    let alice_player = player_of(&players, alice.user.id).id;
    let bob_player = player_of(&players, bob.user.id).id;

    collab.rooms.exit_room(room.id, alice.user.id).await.unwrap();
    collab.rooms.exit_room(room.id, bob.user.id).await.unwrap();

    let result = collab
        .ledger
        .commit(NewTransfer {
            room_id: room.id,
            from_player_id: alice_player,
            to_player_id: bob_player,
            amount: 10,
            description: None,
        })
        .await;

    assert!(matches!(result, Err(LedgerError::RoomFinished)));
}

#[tokio::test]
async fn test_settlement_pairs_debtors_with_creditors() {
    let (collab, _) = setup();

    let alice = login(&collab, "alice").await;
    let bob = login(&collab, "bob").await;
    let carol = login(&collab, "carol").await;

    let room = create_room(&collab, &alice).await;
    join(&collab, &room.code, &bob).await;
    let players = join(&collab, &room.code, &carol).await;

    let alice_player = player_of(&players, alice.user.id).id;
    let bob_player = player_of(&players, bob.user.id).id;
    let carol_player = player_of(&players, carol.user.id).id;

    // Leaves alice at +50, bob at -30, carol at -20
    for (from, amount) in [(bob_player, 30), (carol_player, 20)] {
        collab
            .ledger
            .commit(NewTransfer {
                room_id: room.id,
                from_player_id: from,
                to_player_id: alice_player,
                amount,
                description: None,
            })
            .await
            .unwrap();
    }

    let instructions = collab.rooms.settlement(room.id).await.unwrap();

    let pairs: Vec<_> = instructions
        .iter()
        .map(|i| (i.from_player_id, i.to_player_id, i.amount))
        .collect();

    assert_eq!(
        pairs,
        vec![(bob_player, alice_player, 30), (carol_player, alice_player, 20)]
    );
}

#[tokio::test]
async fn test_mock_players_join_the_roster_and_ledger() {
    let (collab, _) = setup();

    let alice = login(&collab, "alice").await;
    let room = create_room(&collab, &alice).await;

    let (mock, players) = collab
        .rooms
        .add_mock_player(NewMockPlayer {
            room_id: room.id,
            nickname: "guest".to_string(),
            avatar: None,
        })
        .await
        .unwrap();

    assert_eq!(players.len(), 2);
    assert_eq!(mock.user_id, None);

    let alice_player = player_of(&players, alice.user.id).id;

    collab
        .ledger
        .commit(NewTransfer {
            room_id: room.id,
            from_player_id: mock.id,
            to_player_id: alice_player,
            amount: 7,
            description: Some("round one".to_string()),
        })
        .await
        .unwrap();

    let (_, players) = collab.rooms.room_with_players(room.id).await.unwrap();
    let mock_player = players.iter().find(|p| p.id == mock.id).unwrap();

    assert_eq!(mock_player.balance, -7);
}

#[tokio::test]
async fn test_mock_player_avatars_are_normalized() {
    let (collab, _) = setup();

    let alice = login(&collab, "alice").await;
    let room = create_room(&collab, &alice).await;

    let (mock, _) = collab
        .rooms
        .add_mock_player(NewMockPlayer {
            room_id: room.id,
            nickname: "guest".to_string(),
            avatar: Some("wxfile://tmp/avatar.png".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(mock.avatar, None);

    let (kept, _) = collab
        .rooms
        .add_mock_player(NewMockPlayer {
            room_id: room.id,
            nickname: "guest two".to_string(),
            avatar: Some("https://cdn.example.com/a.png".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(kept.avatar, Some("https://cdn.example.com/a.png".to_string()));
}

#[tokio::test]
async fn test_mock_players_do_not_hold_a_room_open() {
    let (collab, _) = setup();

    let alice = login(&collab, "alice").await;
    let room = create_room(&collab, &alice).await;

    collab
        .rooms
        .add_mock_player(NewMockPlayer {
            room_id: room.id,
            nickname: "guest".to_string(),
            avatar: None,
        })
        .await
        .unwrap();

    collab.rooms.exit_room(room.id, alice.user.id).await.unwrap();

    let (room, _) = collab.rooms.room_with_players(room.id).await.unwrap();

    assert_eq!(room.status, RoomStatus::Finished);
}

#[tokio::test]
async fn test_login_refreshes_profile_and_keeps_account() {
    let (collab, _) = setup();

    let first = login(&collab, "alice").await;

    let second = collab
        .auth
        .login(
            "alice",
            LoginProfile {
                nickname: "alice v2".to_string(),
                avatar: Some("wxfile://local.png".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(first.user.id, second.user.id);
    assert_eq!(second.user.nickname, "alice v2");
    // Device local avatar references are discarded
    assert_eq!(second.user.avatar, None);
    assert_ne!(first.token, second.token);
}
