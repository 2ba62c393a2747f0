//! End-to-end tests of the scenario routes through the axum router.

mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use serde_json::{json, Value};
use sprachwelt_core::ports::PortError;
use uuid::Uuid;

#[tokio::test]
async fn health_is_public_but_scenarios_need_a_user() {
    let app = TestApp::new();

    let (status, body) = app.json(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = app.json(Method::GET, "/scenarios", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let (status, _) = app
        .send(Method::POST, "/scenarios/cafe/start", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn catalogue_filters_by_difficulty() {
    let app = TestApp::new();
    let user = Some(Uuid::new_v4());

    let (status, body) = app.json(Method::GET, "/scenarios", user, None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["bahnhof", "cafe"]);

    let (_, body) = app
        .json(Method::GET, "/scenarios?difficulty=a2", user, None)
        .await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["id"], "bahnhof");

    let (status, body) = app
        .json(Method::GET, "/scenarios?difficulty=expert", user, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_input");
}

#[tokio::test]
async fn start_returns_the_greeting_and_character() {
    let app = TestApp::new();
    let (status, body) = app
        .json(Method::POST, "/scenarios/cafe/start", Some(Uuid::new_v4()), None)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["greeting"], "Guten Morgen! Was darf ich Ihnen bringen?");
    assert_eq!(body["character"]["name"], "Anna");
    assert_eq!(body["character"]["role"], "Kellnerin");
    assert_eq!(body["character"]["voice_id"], "de_DE-eva_k-x_low");

    let (status, body) = app
        .json(Method::POST, "/scenarios/nope/start", Some(Uuid::new_v4()), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "unknown_scenario");
}

#[tokio::test]
async fn a_turn_completes_objectives_and_reports_grammar() {
    let app = TestApp::new();
    let user = Uuid::new_v4();
    let state_id = app.start_cafe(user).await;

    app.llm.push_reply("Gerne, einen Tee für Sie");
    let (status, body) = app
        .json(
            Method::POST,
            &format!("/scenarios/state/{state_id}/turn"),
            Some(user),
            Some(json!({ "utterance": "Ich möchten einen Tee" })),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["reply"], "Gerne, einen Tee für Sie.");
    assert_eq!(body["completed_objective_ids"], json!(["order_drink"]));
    assert_eq!(body["grammar_feedback"]["corrected"], "Ich möchte einen Tee");
    assert_eq!(body["scenario_complete"], false);
    assert_eq!(body["score"], 20);

    let (status, body) = app
        .json(
            Method::GET,
            &format!("/scenarios/state/{state_id}"),
            Some(user),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let roles: Vec<&str> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, vec!["character", "user", "character"]);
    assert_eq!(body["status"], "active");

    let (_, stats) = app.json(Method::GET, "/stats", Some(user), None).await;
    assert_eq!(stats["total_xp"], 10);
    assert_eq!(stats["grammar_errors_fixed"], 1);
    assert_eq!(stats["words_learned"], 1);
}

#[tokio::test]
async fn completing_every_objective_finishes_the_scenario() {
    let app = TestApp::new();
    let user = Uuid::new_v4();
    let state_id = app.start_cafe(user).await;
    let uri = format!("/scenarios/state/{state_id}/turn");

    let (_, first) = app
        .json(Method::POST, &uri, Some(user), Some(json!({ "utterance": "Einen Kaffee bitte" })))
        .await;
    assert_eq!(first["scenario_complete"], false);

    let (status, last) = app
        .json(Method::POST, &uri, Some(user), Some(json!({ "utterance": "Danke schön" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(last["scenario_complete"], true);
    assert_eq!(last["score"], 40);

    let (_, stats) = app.json(Method::GET, "/stats", Some(user), None).await;
    // 2 objectives x 10 XP + 100 scenario XP + 50 bonus for a perfect score.
    assert_eq!(stats["total_xp"], 170);
    assert_eq!(stats["scenarios_completed"], 1);
    assert_eq!(stats["current_streak"], 1);
    assert_eq!(stats["achievements"], json!(["first_scenario"]));

    let (status, body) = app
        .json(Method::POST, &uri, Some(user), Some(json!({ "utterance": "Hallo?" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "state_frozen");
}

#[tokio::test]
async fn llm_failure_leaves_the_transcript_untouched() {
    let app = TestApp::new();
    let user = Uuid::new_v4();
    let state_id = app.start_cafe(user).await;

    app.llm
        .push_failure(PortError::Unavailable("connection refused".into()));
    let (status, body) = app
        .json(
            Method::POST,
            &format!("/scenarios/state/{state_id}/turn"),
            Some(user),
            Some(json!({ "utterance": "Einen Kaffee bitte" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "llm_unavailable");

    let (_, state) = app
        .json(Method::GET, &format!("/scenarios/state/{state_id}"), Some(user), None)
        .await;
    assert_eq!(state["messages"].as_array().unwrap().len(), 1);
    assert_eq!(state["score"], 0);
}

#[tokio::test]
async fn invalid_utterances_are_rejected() {
    let app = TestApp::new();
    let user = Uuid::new_v4();
    let state_id = app.start_cafe(user).await;
    let uri = format!("/scenarios/state/{state_id}/turn");

    let (status, body) = app
        .json(Method::POST, &uri, Some(user), Some(json!({ "utterance": "   " })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_utterance");

    let long = "a".repeat(501);
    let (status, _) = app
        .json(Method::POST, &uri, Some(user), Some(json!({ "utterance": long })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn other_users_cannot_touch_a_state() {
    let app = TestApp::new();
    let owner = Uuid::new_v4();
    let intruder = Some(Uuid::new_v4());
    let state_id = app.start_cafe(owner).await;

    let (status, body) = app
        .json(Method::GET, &format!("/scenarios/state/{state_id}"), intruder, None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");

    let (status, _) = app
        .json(
            Method::POST,
            &format!("/scenarios/state/{state_id}/turn"),
            intruder,
            Some(json!({ "utterance": "Einen Kaffee" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .json(
            Method::GET,
            &format!("/scenarios/state/{}", Uuid::new_v4()),
            Some(owner),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "unknown_state");
}

#[tokio::test]
async fn abandon_freezes_the_state() {
    let app = TestApp::new();
    let user = Uuid::new_v4();
    let state_id = app.start_cafe(user).await;

    let (status, body) = app
        .json(
            Method::POST,
            &format!("/scenarios/state/{state_id}/abandon"),
            Some(user),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "abandoned" }));

    let (status, body) = app
        .json(
            Method::POST,
            &format!("/scenarios/state/{state_id}/abandon"),
            Some(user),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "state_frozen");
}

#[tokio::test]
async fn ending_early_completes_without_the_scenario_xp() {
    let app = TestApp::new();
    let user = Uuid::new_v4();

    for _ in 0..3 {
        let state_id = app.start_cafe(user).await;
        let (status, body) = app
            .json(
                Method::POST,
                &format!("/scenarios/state/{state_id}/complete"),
                Some(user),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
    }

    let (_, stats) = app.json(Method::GET, "/stats", Some(user), None).await;
    assert_eq!(stats["total_xp"], 0);
    assert_eq!(stats["scenarios_completed"], 0);
    assert_eq!(stats["achievements"], json!([]));
}

/// The JSON payloads of every `data:` line in an event-stream body.
fn sse_frames(body: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(body)
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim_start()).unwrap())
        .collect()
}

#[tokio::test]
async fn streaming_turn_sends_deltas_then_the_summary() {
    let app = TestApp::new();
    let user = Uuid::new_v4();
    let state_id = app.start_cafe(user).await;

    app.llm.push_reply("Ein Kaffee kommt sofort");
    let (status, body) = app
        .send(
            Method::POST,
            &format!("/scenarios/state/{state_id}/turn/stream"),
            Some(user),
            Some(json!({ "utterance": "Einen Kaffee bitte" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let frames = sse_frames(&body);
    let (done, deltas) = frames.split_last().unwrap();
    let reply: String = deltas
        .iter()
        .map(|f| f["delta"].as_str().unwrap())
        .collect();
    assert_eq!(reply, "Ein Kaffee kommt sofort.");
    assert_eq!(done["completed_objective_ids"], json!(["order_drink"]));
    assert_eq!(done["score"], 20);
    assert!(done.get("reply").is_none());

    let (_, state) = app
        .json(Method::GET, &format!("/scenarios/state/{state_id}"), Some(user), None)
        .await;
    assert_eq!(state["messages"][2]["content"], "Ein Kaffee kommt sofort.");
}

#[tokio::test]
async fn streaming_errors_before_the_first_delta_are_plain_responses() {
    let app = TestApp::new();
    let user = Uuid::new_v4();
    let state_id = app.start_cafe(user).await;

    app.llm.push_failure(PortError::Timeout("30s".into()));
    let (status, body) = app
        .json(
            Method::POST,
            &format!("/scenarios/state/{state_id}/turn/stream"),
            Some(user),
            Some(json!({ "utterance": "Einen Kaffee bitte" })),
        )
        .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"]["code"], "llm_timeout");
}
