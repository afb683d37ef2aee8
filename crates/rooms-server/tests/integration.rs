use std::time::Duration;

use serde_json::{Value, json};
use tokio::net::TcpListener;

// ── Harness ─────────────────────────────────────────────────────────────

/// Spin up a server on a random port, return the base URL.
async fn start_server() -> String {
    let (app, _state) = rooms_server::build_app();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start.
    tokio::time::sleep(Duration::from_millis(50)).await;

    format!("http://127.0.0.1:{}", port)
}

/// Create a session, return (token, userId).
async fn login(base: &str, username: &str) -> (String, i64) {
    let resp: Value = reqwest::Client::new()
        .post(format!("{}/auth/login", base))
        .json(&json!({ "username": username }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["ok"], true, "login failed: {resp}");
    (
        resp["token"].as_str().unwrap().to_string(),
        resp["userId"].as_i64().unwrap(),
    )
}

/// POST a JSON body with a bearer token, return the parsed response.
async fn post(base: &str, token: &str, path: &str, body: Value) -> Value {
    reqwest::Client::new()
        .post(format!("{}{}", base, path))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

/// POST and assert the operation succeeded.
async fn post_ok(base: &str, token: &str, path: &str, body: Value) -> Value {
    let resp = post(base, token, path, body).await;
    assert_eq!(resp["ok"], true, "expected ok on {path}: {resp}");
    resp
}

/// POST and assert a specific error identifier.
async fn post_err(base: &str, token: &str, path: &str, body: Value, error: &str) {
    let resp = post(base, token, path, body).await;
    assert_eq!(resp["ok"], false, "expected {error} on {path}: {resp}");
    assert_eq!(resp["error"].as_str(), Some(error), "on {path}: {resp}");
}

/// Incremental reader over one live event stream.
struct EventReader {
    response: reqwest::Response,
    buffer: String,
}

impl EventReader {
    async fn open(base: &str, token: &str, game: &str, code: &str) -> EventReader {
        let response = reqwest::Client::new()
            .get(format!("{}/stream/{}/{}?token={}", base, game, code, token))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success(), "stream refused");
        EventReader {
            response,
            buffer: String::new(),
        }
    }

    /// Payload of the next `state` event, skipping heartbeat comments.
    async fn next_state(&mut self, timeout: Duration) -> Value {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            while let Some(pos) = self.buffer.find("\n\n") {
                let frame = self.buffer[..pos].to_string();
                self.buffer.drain(..pos + 2);

                let mut name = None;
                let mut data = String::new();
                for line in frame.lines() {
                    if let Some(rest) = line.strip_prefix("event:") {
                        name = Some(rest.trim().to_string());
                    } else if let Some(rest) = line.strip_prefix("data:") {
                        data.push_str(rest.trim_start());
                    }
                }
                if name.as_deref() == Some("state") {
                    return serde_json::from_str(&data).unwrap();
                }
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                panic!("timed out waiting for a state event");
            }
            match tokio::time::timeout(remaining, self.response.chunk())
                .await
                .expect("timed out waiting for a state event")
                .unwrap()
            {
                Some(bytes) => self.buffer.push_str(&String::from_utf8_lossy(&bytes)),
                None => panic!("event stream closed by the server"),
            }
        }
    }
}

/// Consume state events until one satisfies `pred`.
async fn wait_for_state(
    reader: &mut EventReader,
    timeout: Duration,
    pred: impl Fn(&Value) -> bool,
) -> Value {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            panic!("timed out waiting for a matching state");
        }
        let state = reader.next_state(remaining).await;
        if pred(&state) {
            return state;
        }
    }
}

// ── Auth & generic surface ──────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let base = start_server().await;
    let resp = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(resp, "ok");
}

#[tokio::test]
async fn test_login_validates_username_length() {
    let base = start_server().await;

    let resp: Value = reqwest::Client::new()
        .post(format!("{}/auth/login", base))
        .json(&json!({ "username": "   " }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["error"].as_str(), Some("username_length"));

    let resp: Value = reqwest::Client::new()
        .post(format!("{}/auth/login", base))
        .json(&json!({ "username": "a".repeat(17) }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["error"].as_str(), Some("username_length"));
}

#[tokio::test]
async fn test_operations_require_a_session() {
    let base = start_server().await;

    let resp: Value = reqwest::Client::new()
        .post(format!("{}/create/bingo", base))
        .json(&json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["error"].as_str(), Some("unauthorized"));

    post_err(&base, "bogus-token", "/create/gomoku", json!({}), "unauthorized").await;

    let resp = reqwest::Client::new()
        .get(format!("{}/stream/bingo/AAAAAA", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_malformed_and_oversized_bodies() {
    let base = start_server().await;
    let (token, _) = login(&base, "alice").await;

    let resp: Value = reqwest::Client::new()
        .post(format!("{}/create/bingo", base))
        .bearer_auth(&token)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["error"].as_str(), Some("invalid_json"));

    let huge = format!("{{\"size\": 5, \"pad\": \"{}\"}}", "x".repeat(64 * 1024));
    let resp: Value = reqwest::Client::new()
        .post(format!("{}/create/bingo", base))
        .bearer_auth(&token)
        .header("content-type", "application/json")
        .body(huge)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["error"].as_str(), Some("body_too_large"));
}

// ── Bingo ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_bingo_create_and_join() {
    let base = start_server().await;
    let (alice, alice_id) = login(&base, "alice").await;
    let (bob, bob_id) = login(&base, "bob").await;

    post_err(&base, &alice, "/create/bingo", json!({ "size": 4 }), "invalid_size").await;
    post_err(&base, &alice, "/create/bingo", json!({ "size": 11 }), "invalid_size").await;

    let resp = post_ok(&base, &alice, "/create/bingo", json!({ "size": 5 })).await;
    let code = resp["code"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 6);
    assert!(code.bytes().all(|b| b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789".contains(&b)));

    post_err(&base, &bob, "/bingo/ZZZZZZ/join", json!({}), "room_not_found").await;

    // Codes are case-insensitive on the wire.
    let resp = post_ok(&base, &bob, &format!("/bingo/{}/join", code.to_lowercase()), json!({})).await;
    let room = &resp["room"];
    assert_eq!(room["code"].as_str(), Some(code.as_str()));
    assert_eq!(room["hostUserId"].as_i64(), Some(alice_id));
    assert_eq!(room["status"], "lobby");
    let players = room["players"].as_array().unwrap();
    assert_eq!(players.len(), 2);
    assert_eq!(players[1]["userId"].as_i64(), Some(bob_id));

    // The joiner's board is a permutation of 1..=25.
    let board = resp["board"].as_array().unwrap();
    let mut numbers: Vec<i64> = board
        .iter()
        .flat_map(|row| row.as_array().unwrap().iter().map(|v| v.as_i64().unwrap()))
        .collect();
    numbers.sort_unstable();
    assert_eq!(numbers, (1..=25).collect::<Vec<i64>>());

    // Rejoining is idempotent: same membership, same snapshot.
    let again = post_ok(&base, &bob, &format!("/bingo/{}/join", code), json!({})).await;
    assert_eq!(again["room"], resp["room"]);
}

#[tokio::test]
async fn test_bingo_solo_vs_bot() {
    let base = start_server().await;
    let (alice, alice_id) = login(&base, "alice").await;

    let resp = post_ok(
        &base,
        &alice,
        "/create/bingo",
        json!({ "size": 5, "vsComputer": true }),
    )
    .await;
    let code = resp["code"].as_str().unwrap().to_string();

    // The bot already holds a seat.
    let resp = post_ok(&base, &alice, &format!("/bingo/{}/join", code), json!({})).await;
    let players = resp["room"]["players"].as_array().unwrap();
    assert_eq!(players.len(), 2);
    assert_eq!(players[1]["isBot"], true);
    assert_eq!(players[1]["userId"].as_i64(), Some(-1));

    post_err(&base, &alice, &format!("/bingo/{}/draw", code), json!({ "number": 7 }), "not_playing")
        .await;
    post_err(
        &base,
        &alice,
        &format!("/bingo/{}/start", code),
        json!({ "drawTimeoutSeconds": 4 }),
        "invalid_draw_timeout_seconds",
    )
    .await;

    post_ok(
        &base,
        &alice,
        &format!("/bingo/{}/start", code),
        json!({ "drawTimeoutSeconds": 10 }),
    )
    .await;

    let mut reader = EventReader::open(&base, &alice, "bingo", &code).await;
    let state = reader.next_state(Duration::from_secs(2)).await;
    assert_eq!(state["status"], "playing");
    assert_eq!(
        state["turnOrder"],
        json!([alice_id, -1]),
        "host first, bot second"
    );
    assert_eq!(state["turnUserId"].as_i64(), Some(alice_id));
    assert!(state["turnEndsAt"].is_null(), "no deadline on human turns");

    let resp = post_ok(&base, &alice, &format!("/bingo/{}/draw", code), json!({ "number": 7 })).await;
    assert_eq!(resp["number"].as_i64(), Some(7));

    // The bot answers within roughly 1.2 s.
    let state = wait_for_state(&mut reader, Duration::from_secs(5), |s| {
        s["lastDrawReason"].as_str() == Some("bot_pick")
    })
    .await;
    let bot_number = state["lastNumber"].as_i64().unwrap();
    assert!((1..=25).contains(&bot_number));
    assert_ne!(bot_number, 7);
    assert_eq!(state["lastDrawByUserId"].as_i64(), Some(-1));
    assert_eq!(state["turnUserId"].as_i64(), Some(alice_id));
    let called = state["calledNumbers"].as_array().unwrap();
    assert_eq!(called.len(), 2);
}

#[tokio::test]
async fn test_bingo_bot_yields_seat_to_second_human() {
    let base = start_server().await;
    let (alice, _) = login(&base, "alice").await;
    let (bob, _) = login(&base, "bob").await;

    let resp = post_ok(
        &base,
        &alice,
        "/create/bingo",
        json!({ "size": 5, "vsComputer": true }),
    )
    .await;
    let code = resp["code"].as_str().unwrap().to_string();

    let resp = post_ok(&base, &bob, &format!("/bingo/{}/join", code), json!({})).await;
    let players = resp["room"]["players"].as_array().unwrap();
    assert_eq!(players.len(), 2);
    assert!(players.iter().all(|p| p["isBot"] == false));
}

#[tokio::test]
async fn test_bingo_draw_validation() {
    let base = start_server().await;
    let (alice, _) = login(&base, "alice").await;
    let (bob, _) = login(&base, "bob").await;
    let (carol, _) = login(&base, "carol").await;

    let resp = post_ok(&base, &alice, "/create/bingo", json!({ "size": 5 })).await;
    let code = resp["code"].as_str().unwrap().to_string();
    post_ok(&base, &bob, &format!("/bingo/{}/join", code), json!({})).await;

    post_err(&base, &bob, &format!("/bingo/{}/start", code), json!({}), "host_only").await;
    post_ok(&base, &alice, &format!("/bingo/{}/start", code), json!({})).await;
    post_err(&base, &alice, &format!("/bingo/{}/start", code), json!({}), "room_not_joinable")
        .await;
    post_err(&base, &carol, &format!("/bingo/{}/join", code), json!({}), "room_not_joinable")
        .await;

    post_err(&base, &carol, &format!("/bingo/{}/draw", code), json!({ "number": 3 }), "not_in_room")
        .await;
    post_err(&base, &bob, &format!("/bingo/{}/draw", code), json!({ "number": 3 }), "not_your_turn")
        .await;
    post_err(&base, &alice, &format!("/bingo/{}/draw", code), json!({ "number": 0 }), "invalid_number")
        .await;
    post_err(
        &base,
        &alice,
        &format!("/bingo/{}/draw", code),
        json!({ "number": 26 }),
        "invalid_number",
    )
    .await;

    post_ok(&base, &alice, &format!("/bingo/{}/draw", code), json!({ "number": 3 })).await;
    post_err(
        &base,
        &bob,
        &format!("/bingo/{}/draw", code),
        json!({ "number": 3 }),
        "number_already_called",
    )
    .await;
    post_err(&base, &alice, &format!("/bingo/{}/draw", code), json!({ "number": 4 }), "not_your_turn")
        .await;
}

#[tokio::test]
async fn test_bingo_plays_to_completion() {
    let base = start_server().await;
    let (alice, _) = login(&base, "alice").await;
    let (bob, _) = login(&base, "bob").await;

    let resp = post_ok(&base, &alice, "/create/bingo", json!({ "size": 5 })).await;
    let code = resp["code"].as_str().unwrap().to_string();
    post_ok(&base, &bob, &format!("/bingo/{}/join", code), json!({})).await;
    post_ok(&base, &alice, &format!("/bingo/{}/start", code), json!({})).await;

    // Call every number in turn until someone reaches five lines; with the
    // full range called every line completes, so the game must end early.
    let tokens = [&alice, &bob];
    let mut number = 1i64;
    let mut game_over = false;
    'draws: while number <= 25 {
        for token in tokens {
            let resp = post(
                &base,
                token,
                &format!("/bingo/{}/draw", code),
                json!({ "number": number }),
            )
            .await;
            if resp["ok"] == true {
                number += 1;
                continue 'draws;
            }
            match resp["error"].as_str() {
                Some("not_your_turn") => continue,
                Some("not_playing") => {
                    game_over = true;
                    break 'draws;
                }
                other => panic!("unexpected draw failure: {:?}", other),
            }
        }
        panic!("neither player could draw {number}");
    }
    assert!(game_over, "game should end before the numbers run out");

    let resp = post_ok(&base, &alice, &format!("/bingo/{}/join", code), json!({})).await;
    let room = &resp["room"];
    assert_eq!(room["status"], "ended");
    assert!(room["turnUserId"].is_null());
    let winners = room["winners"].as_array().unwrap();
    assert!(!winners.is_empty());
    for winner in winners {
        assert!(winner["lines"].as_u64().unwrap() >= 5);
    }
}

#[tokio::test]
async fn test_bingo_host_transfer_and_garbage_collection() {
    let base = start_server().await;
    let (alice, _) = login(&base, "alice").await;
    let (bob, bob_id) = login(&base, "bob").await;

    let resp = post_ok(&base, &alice, "/create/bingo", json!({ "size": 5 })).await;
    let code = resp["code"].as_str().unwrap().to_string();
    post_ok(&base, &bob, &format!("/bingo/{}/join", code), json!({})).await;

    post_ok(&base, &alice, &format!("/bingo/{}/leave", code), json!({})).await;
    let resp = post_ok(&base, &bob, &format!("/bingo/{}/join", code), json!({})).await;
    assert_eq!(resp["room"]["hostUserId"].as_i64(), Some(bob_id));

    // Last human out destroys the room.
    post_ok(&base, &bob, &format!("/bingo/{}/leave", code), json!({})).await;
    post_err(&base, &bob, &format!("/bingo/{}/join", code), json!({}), "room_not_found").await;
    post_err(&base, &bob, &format!("/bingo/{}/leave", code), json!({}), "room_not_found").await;
}

#[tokio::test]
async fn test_bingo_solo_bot_room_dies_with_its_human() {
    let base = start_server().await;
    let (alice, _) = login(&base, "alice").await;

    let resp = post_ok(
        &base,
        &alice,
        "/create/bingo",
        json!({ "size": 5, "vsComputer": true }),
    )
    .await;
    let code = resp["code"].as_str().unwrap().to_string();

    post_ok(&base, &alice, &format!("/bingo/{}/leave", code), json!({})).await;
    post_err(&base, &alice, &format!("/bingo/{}/join", code), json!({}), "room_not_found").await;
}

// ── Croc ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_croc_full_game() {
    let base = start_server().await;
    let (alice, alice_id) = login(&base, "alice").await;
    let (bob, bob_id) = login(&base, "bob").await;

    post_err(
        &base,
        &alice,
        "/create/croc",
        json!({ "toothCountPerJaw": 7 }),
        "invalid_tooth_count_per_jaw",
    )
    .await;

    let resp = post_ok(&base, &alice, "/create/croc", json!({ "toothCountPerJaw": 8 })).await;
    let code = resp["code"].as_str().unwrap().to_string();

    post_err(&base, &alice, &format!("/croc/{}/start", code), json!({}), "need_two_players").await;
    post_ok(&base, &bob, &format!("/croc/{}/join", code), json!({})).await;
    post_err(&base, &bob, &format!("/croc/{}/start", code), json!({}), "host_only").await;
    post_err(&base, &alice, &format!("/croc/{}/pick", code), json!({ "tooth": 1 }), "not_playing")
        .await;

    post_ok(&base, &alice, &format!("/croc/{}/start", code), json!({})).await;

    post_err(&base, &alice, &format!("/croc/{}/pick", code), json!({ "tooth": 0 }), "invalid_tooth")
        .await;
    post_err(&base, &alice, &format!("/croc/{}/pick", code), json!({ "tooth": 17 }), "invalid_tooth")
        .await;
    post_err(&base, &bob, &format!("/croc/{}/pick", code), json!({ "tooth": 1 }), "not_your_turn")
        .await;

    // Alternate through the teeth until the trap snaps.
    let players = [(&alice, alice_id), (&bob, bob_id)];
    let mut picker = 0usize;
    let mut trap_tooth = None;
    let mut repeat_checked = false;
    for tooth in 1..=16i64 {
        let (token, id) = players[picker % 2];
        let resp = post_ok(&base, token, &format!("/croc/{}/pick", code), json!({ "tooth": tooth }))
            .await;
        if resp["trap"] == true {
            trap_tooth = Some((tooth, id));
            break;
        }
        if !repeat_checked {
            // The turn has passed; the same tooth is now off-limits.
            let (other, _) = players[(picker + 1) % 2];
            post_err(
                &base,
                other,
                &format!("/croc/{}/pick", code),
                json!({ "tooth": tooth }),
                "already_selected",
            )
            .await;
            repeat_checked = true;
        }
        picker += 1;
    }

    let (tooth, loser_id) = trap_tooth.expect("the trap must be within the tooth range");
    let winner_id = if loser_id == alice_id { bob_id } else { alice_id };

    let resp = post_ok(&base, &alice, &format!("/croc/{}/join", code), json!({})).await;
    let room = &resp["room"];
    assert_eq!(room["status"], "ended");
    assert_eq!(room["trapTooth"].as_i64(), Some(tooth));
    assert_eq!(room["loserUserId"].as_i64(), Some(loser_id));
    assert_eq!(room["winnerUserId"].as_i64(), Some(winner_id));
    assert_eq!(room["lastPickedTooth"].as_i64(), Some(tooth));
    let loser = room["players"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["userId"].as_i64() == Some(loser_id))
        .unwrap();
    assert_eq!(loser["alive"], false);

    post_err(&base, &alice, &format!("/croc/{}/pick", code), json!({ "tooth": 1 }), "not_playing")
        .await;
}

#[tokio::test]
async fn test_croc_hides_the_trap_while_playing() {
    let base = start_server().await;
    let (alice, _) = login(&base, "alice").await;
    let (bob, _) = login(&base, "bob").await;

    let resp = post_ok(&base, &alice, "/create/croc", json!({ "toothCountPerJaw": 10 })).await;
    let code = resp["code"].as_str().unwrap().to_string();
    post_ok(&base, &bob, &format!("/croc/{}/join", code), json!({})).await;
    post_ok(&base, &alice, &format!("/croc/{}/start", code), json!({})).await;

    let resp = post_ok(&base, &alice, &format!("/croc/{}/join", code), json!({})).await;
    assert_eq!(resp["room"]["status"], "playing");
    assert!(resp["room"]["trapTooth"].is_null());
}

#[tokio::test]
async fn test_croc_join_after_start_rejected() {
    let base = start_server().await;
    let (alice, _) = login(&base, "alice").await;
    let (bob, _) = login(&base, "bob").await;
    let (carol, _) = login(&base, "carol").await;

    let resp = post_ok(&base, &alice, "/create/croc", json!({})).await;
    let code = resp["code"].as_str().unwrap().to_string();
    post_ok(&base, &bob, &format!("/croc/{}/join", code), json!({})).await;
    post_ok(&base, &alice, &format!("/croc/{}/start", code), json!({})).await;

    post_err(&base, &carol, &format!("/croc/{}/join", code), json!({}), "room_not_joinable").await;
}

// ── Memory ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_memory_pick_validation() {
    let base = start_server().await;
    let (alice, _) = login(&base, "alice").await;
    let (bob, _) = login(&base, "bob").await;

    post_err(
        &base,
        &alice,
        "/create/memory",
        json!({ "cardCount": 25 }),
        "invalid_card_count",
    )
    .await;

    let resp = post_ok(&base, &alice, "/create/memory", json!({ "cardCount": 20 })).await;
    let code = resp["code"].as_str().unwrap().to_string();
    post_ok(&base, &bob, &format!("/memory/{}/join", code), json!({})).await;

    post_err(&base, &alice, &format!("/memory/{}/pick", code), json!({ "index": 0 }), "not_playing")
        .await;
    post_ok(&base, &alice, &format!("/memory/{}/start", code), json!({})).await;

    post_err(&base, &bob, &format!("/memory/{}/pick", code), json!({ "index": 0 }), "not_your_turn")
        .await;
    post_err(
        &base,
        &alice,
        &format!("/memory/{}/pick", code),
        json!({ "index": 20 }),
        "invalid_index",
    )
    .await;
    post_err(
        &base,
        &alice,
        &format!("/memory/{}/pick", code),
        json!({ "index": -1 }),
        "invalid_index",
    )
    .await;

    post_ok(&base, &alice, &format!("/memory/{}/pick", code), json!({ "index": 0 })).await;
    post_err(
        &base,
        &alice,
        &format!("/memory/{}/pick", code),
        json!({ "index": 0 }),
        "already_revealed",
    )
    .await;
}

#[tokio::test]
async fn test_memory_solo_game_plays_to_completion() {
    let base = start_server().await;
    let (alice, alice_id) = login(&base, "alice").await;

    let resp = post_ok(&base, &alice, "/create/memory", json!({ "cardCount": 20 })).await;
    let code = resp["code"].as_str().unwrap().to_string();
    post_ok(&base, &alice, &format!("/memory/{}/start", code), json!({})).await;

    let mut reader = EventReader::open(&base, &alice, "memory", &code).await;
    let state = reader.next_state(Duration::from_secs(2)).await;
    let cards = state["cards"].as_array().unwrap();
    assert_eq!(cards.len(), 20);
    assert!(cards.iter().all(|c| c["visible"] == false));
    assert!(cards.iter().all(|c| c["countryKey"].is_null()));

    let pick = |index: usize| {
        let base = base.clone();
        let alice = alice.clone();
        let code = code.clone();
        async move {
            post_ok(&base, &alice, &format!("/memory/{}/pick", code), json!({ "index": index }))
                .await
        }
    };

    let mut keys: Vec<Option<String>> = vec![None; 20];
    let mut matched = vec![false; 20];
    let mut resolved_mismatches = 0u32;

    loop {
        let known_pair = (0..20).find_map(|i| {
            if matched[i] {
                return None;
            }
            let key = keys[i].as_ref()?;
            ((i + 1)..20)
                .find(|&j| !matched[j] && keys[j].as_ref() == Some(key))
                .map(|j| (i, j))
        });

        let (first, second) = match known_pair {
            Some(pair) => pair,
            None => {
                let mut unknown = (0..20).filter(|&i| !matched[i] && keys[i].is_none());
                match (unknown.next(), unknown.next()) {
                    (Some(i), Some(j)) => (i, j),
                    _ => panic!("probing should always leave unknown cards in pairs"),
                }
            }
        };

        let resp = pick(first).await;
        assert!(resp.get("matched").is_none(), "single reveal reports nothing");
        let state = wait_for_state(&mut reader, Duration::from_secs(2), |s| {
            s["cards"][first]["visible"] == true
        })
        .await;
        keys[first] = Some(state["cards"][first]["countryKey"].as_str().unwrap().to_string());

        let resp = pick(second).await;
        if resp["matched"] == true {
            matched[first] = true;
            matched[second] = true;
            keys[second] = keys[first].clone();
            wait_for_state(&mut reader, Duration::from_secs(2), |s| {
                s["cards"][second]["matched"] == true
            })
            .await;
            if resp["ended"] == true {
                break;
            }
        } else {
            assert_eq!(resp["matched"], false);
            let state = wait_for_state(&mut reader, Duration::from_secs(2), |s| {
                s["resolving"] == true
            })
            .await;
            assert_eq!(state["cards"][first]["visible"], true);
            assert_eq!(state["cards"][second]["visible"], true);
            keys[second] =
                Some(state["cards"][second]["countryKey"].as_str().unwrap().to_string());

            // The mismatch hides itself after the resolution delay; solo
            // play hands the turn straight back.
            let state = wait_for_state(&mut reader, Duration::from_secs(3), |s| {
                s["resolving"] == false && s["revealedIndices"].as_array().unwrap().is_empty()
            })
            .await;
            assert_eq!(state["cards"][first]["visible"], false);
            assert_eq!(state["turnUserId"].as_i64(), Some(alice_id));
            resolved_mismatches += 1;
        }
    }

    assert!(resolved_mismatches > 0, "a 20-card probe practically always mismatches");

    let resp = post_ok(&base, &alice, &format!("/memory/{}/join", code), json!({})).await;
    let room = &resp["room"];
    assert_eq!(room["status"], "ended");
    assert_eq!(room["matchedCount"].as_u64(), Some(10));
    assert!(room["cards"].as_array().unwrap().iter().all(|c| c["matched"] == true));
    let winners = room["winners"].as_array().unwrap();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0]["userId"].as_i64(), Some(alice_id));
    assert_eq!(winners[0]["score"].as_u64(), Some(10));

    post_err(&base, &alice, &format!("/memory/{}/pick", code), json!({ "index": 0 }), "not_playing")
        .await;
}

#[tokio::test]
async fn test_memory_mismatch_passes_the_turn() {
    let base = start_server().await;
    let (alice, _) = login(&base, "alice").await;
    let (bob, bob_id) = login(&base, "bob").await;

    let resp = post_ok(&base, &alice, "/create/memory", json!({ "cardCount": 20 })).await;
    let code = resp["code"].as_str().unwrap().to_string();
    post_ok(&base, &bob, &format!("/memory/{}/join", code), json!({})).await;
    post_ok(&base, &alice, &format!("/memory/{}/start", code), json!({})).await;

    let mut reader = EventReader::open(&base, &alice, "memory", &code).await;

    // Probe pairs until one mismatches; accidental matches keep the turn.
    let mut index = 0usize;
    loop {
        assert!(index + 1 < 20, "ran out of cards without a mismatch");
        post_ok(&base, &alice, &format!("/memory/{}/pick", code), json!({ "index": index })).await;
        let resp =
            post_ok(&base, &alice, &format!("/memory/{}/pick", code), json!({ "index": index + 1 }))
                .await;
        if resp["matched"] == false {
            break;
        }
        assert_eq!(resp["matched"], true);
        index += 2;
    }

    // While the mismatch resolves, further picks are locked out.
    post_err(&base, &alice, &format!("/memory/{}/pick", code), json!({ "index": 19 }), "resolving")
        .await;

    let state = wait_for_state(&mut reader, Duration::from_secs(3), |s| {
        s["resolving"] == false && s["turnUserId"].as_i64() == Some(bob_id)
    })
    .await;
    assert!(state["revealedIndices"].as_array().unwrap().is_empty());

    post_err(
        &base,
        &alice,
        &format!("/memory/{}/pick", code),
        json!({ "index": index }),
        "not_your_turn",
    )
    .await;
    // The mismatched card is hidden again and free for bob to flip.
    post_ok(&base, &bob, &format!("/memory/{}/pick", code), json!({ "index": index })).await;
}

// ── Gomoku ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_gomoku_five_in_a_row() {
    let base = start_server().await;
    let (alice, alice_id) = login(&base, "alice").await;
    let (bob, _) = login(&base, "bob").await;
    let (carol, _) = login(&base, "carol").await;

    let resp = post_ok(&base, &alice, "/create/gomoku", json!({})).await;
    let code = resp["code"].as_str().unwrap().to_string();

    post_err(&base, &alice, &format!("/gomoku/{}/start", code), json!({}), "need_two_players")
        .await;
    post_ok(&base, &bob, &format!("/gomoku/{}/join", code), json!({})).await;
    post_err(&base, &carol, &format!("/gomoku/{}/join", code), json!({}), "room_full").await;
    post_err(&base, &alice, &format!("/gomoku/{}/move", code), json!({ "index": 0 }), "not_playing")
        .await;

    post_ok(&base, &alice, &format!("/gomoku/{}/start", code), json!({})).await;

    let resp = post_ok(&base, &alice, &format!("/gomoku/{}/join", code), json!({})).await;
    let players = resp["room"]["players"].as_array().unwrap();
    assert_eq!(players[0]["stone"], "B");
    assert_eq!(players[1]["stone"], "W");
    assert_eq!(resp["room"]["turnUserId"].as_i64(), Some(alice_id));

    post_err(&base, &bob, &format!("/gomoku/{}/move", code), json!({ "index": 0 }), "not_your_turn")
        .await;
    post_err(
        &base,
        &alice,
        &format!("/gomoku/{}/move", code),
        json!({ "index": 225 }),
        "invalid_index",
    )
    .await;

    post_ok(&base, &alice, &format!("/gomoku/{}/move", code), json!({ "index": 112 })).await;
    post_err(&base, &bob, &format!("/gomoku/{}/move", code), json!({ "index": 112 }), "occupied")
        .await;

    // Black walks the row 112..=116 while white wastes moves on the edge.
    for (black, white) in [(113, 0), (114, 1), (115, 2)] {
        post_ok(&base, &bob, &format!("/gomoku/{}/move", code), json!({ "index": white })).await;
        post_ok(&base, &alice, &format!("/gomoku/{}/move", code), json!({ "index": black })).await;
    }
    post_ok(&base, &bob, &format!("/gomoku/{}/move", code), json!({ "index": 3 })).await;
    let resp = post_ok(&base, &alice, &format!("/gomoku/{}/move", code), json!({ "index": 116 }))
        .await;
    assert_eq!(resp["ended"], true);
    assert!(resp.get("draw").is_none());

    let resp = post_ok(&base, &alice, &format!("/gomoku/{}/join", code), json!({})).await;
    let room = &resp["room"];
    assert_eq!(room["status"], "ended");
    assert_eq!(room["winnerUserId"].as_i64(), Some(alice_id));
    assert_eq!(room["winnerStone"], "B");
    assert_eq!(room["lastMoveIndex"].as_u64(), Some(116));
    assert_eq!(room["board"][116], "B");

    post_err(&base, &bob, &format!("/gomoku/{}/move", code), json!({ "index": 4 }), "not_playing")
        .await;
}

#[tokio::test]
async fn test_gomoku_departure_forfeits() {
    let base = start_server().await;
    let (alice, alice_id) = login(&base, "alice").await;
    let (bob, _) = login(&base, "bob").await;

    let resp = post_ok(&base, &alice, "/create/gomoku", json!({})).await;
    let code = resp["code"].as_str().unwrap().to_string();
    post_ok(&base, &bob, &format!("/gomoku/{}/join", code), json!({})).await;
    post_ok(&base, &alice, &format!("/gomoku/{}/start", code), json!({})).await;
    post_ok(&base, &alice, &format!("/gomoku/{}/move", code), json!({ "index": 0 })).await;

    post_ok(&base, &bob, &format!("/gomoku/{}/leave", code), json!({})).await;

    let resp = post_ok(&base, &alice, &format!("/gomoku/{}/join", code), json!({})).await;
    let room = &resp["room"];
    assert_eq!(room["status"], "ended");
    assert_eq!(room["winnerUserId"].as_i64(), Some(alice_id));
    assert_eq!(room["winnerStone"], "B");
}

// ── Streams & presence ──────────────────────────────────────────────────

#[tokio::test]
async fn test_stream_rejects_unknown_games_and_outsiders() {
    let base = start_server().await;
    let (alice, _) = login(&base, "alice").await;
    let (mallory, _) = login(&base, "mallory").await;

    let resp = post_ok(&base, &alice, "/create/gomoku", json!({})).await;
    let code = resp["code"].as_str().unwrap().to_string();

    let resp = reqwest::Client::new()
        .get(format!("{}/stream/chess/{}?token={}", base, code, alice))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = reqwest::Client::new()
        .get(format!("{}/stream/gomoku/{}?token={}", base, code, mallory))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"].as_str(), Some("not_in_room"));
}

#[tokio::test]
async fn test_presence_follows_stream_lifecycles() {
    let base = start_server().await;
    let (alice, alice_id) = login(&base, "alice").await;
    let (bob, bob_id) = login(&base, "bob").await;

    let resp = post_ok(&base, &alice, "/create/bingo", json!({ "size": 5 })).await;
    let code = resp["code"].as_str().unwrap().to_string();
    post_ok(&base, &bob, &format!("/bingo/{}/join", code), json!({})).await;

    let online = |state: &Value, id: i64| -> bool {
        state["players"]
            .as_array()
            .unwrap()
            .iter()
            .find(|p| p["userId"].as_i64() == Some(id))
            .map(|p| p["online"] == true)
            .unwrap_or(false)
    };

    let mut alice_reader = EventReader::open(&base, &alice, "bingo", &code).await;
    let state = alice_reader.next_state(Duration::from_secs(2)).await;
    assert!(online(&state, alice_id));
    assert!(!online(&state, bob_id));

    let bob_reader = EventReader::open(&base, &bob, "bingo", &code).await;
    let state = wait_for_state(&mut alice_reader, Duration::from_secs(2), |s| online(s, bob_id))
        .await;
    assert!(online(&state, alice_id));

    // Closing bob's stream drops him offline for everyone else.
    drop(bob_reader);
    wait_for_state(&mut alice_reader, Duration::from_secs(5), |s| !online(s, bob_id)).await;
}
