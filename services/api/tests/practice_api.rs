//! Reviews, vocabulary, quizzes, grammar, speech and content routes.

mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn enrolling_twice_creates_cards_once() {
    let app = TestApp::new();
    let user = Some(Uuid::new_v4());

    let (status, body) = app
        .json(Method::POST, "/vocab/essen/enroll", user, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cards_created"], 3);
    assert_eq!(body["cards_existing"], 0);
    assert_eq!(body["words_learned"], 3);

    let (_, again) = app
        .json(Method::POST, "/vocab/essen/enroll", user, None)
        .await;
    assert_eq!(again["cards_created"], 0);
    assert_eq!(again["cards_existing"], 3);
    assert_eq!(again["words_learned"], 3);

    let (status, body) = app
        .json(Method::POST, "/vocab/missing/enroll", user, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "unknown_content");
}

#[tokio::test]
async fn due_cards_can_be_graded_and_deleted() {
    let app = TestApp::new();
    let user = Some(Uuid::new_v4());
    app.json(Method::POST, "/vocab/essen/enroll", user, None).await;

    let (status, due) = app.json(Method::GET, "/reviews/due", user, None).await;
    assert_eq!(status, StatusCode::OK);
    let cards = due.as_array().unwrap();
    assert_eq!(cards.len(), 3);
    let card_id = cards[0]["card_id"].as_str().unwrap().to_string();

    let (status, body) = app
        .json(
            Method::POST,
            &format!("/reviews/{card_id}/grade"),
            user,
            Some(json!({ "quality": 9 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_grade");

    for quality in [-1, 256, i64::MAX] {
        let (status, body) = app
            .json(
                Method::POST,
                &format!("/reviews/{card_id}/grade"),
                user,
                Some(json!({ "quality": quality })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "quality={quality}");
        assert_eq!(body["error"]["code"], "invalid_grade", "quality={quality}");
    }

    let (status, graded) = app
        .json(
            Method::POST,
            &format!("/reviews/{card_id}/grade"),
            user,
            Some(json!({ "quality": 4 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(graded["repetitions"], 1);
    assert_eq!(graded["interval_days"], 1);
    assert_eq!(graded["easiness_factor"], 2.5);

    let (_, due) = app.json(Method::GET, "/reviews/due", user, None).await;
    assert_eq!(due.as_array().unwrap().len(), 2);

    let (status, _) = app
        .send(
            Method::DELETE,
            &format!("/reviews/{card_id}"),
            Some(Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(Method::DELETE, &format!("/reviews/{card_id}"), user, None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app
        .json(
            Method::POST,
            &format!("/reviews/{card_id}/grade"),
            user,
            Some(json!({ "quality": 4 })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "unknown_card");
}

#[tokio::test]
async fn due_limit_is_bounded() {
    let app = TestApp::new();
    let user = Some(Uuid::new_v4());
    app.json(Method::POST, "/vocab/essen/enroll", user, None).await;

    let (_, due) = app
        .json(Method::GET, "/reviews/due?limit=2", user, None)
        .await;
    assert_eq!(due.as_array().unwrap().len(), 2);

    for limit in ["0", "101"] {
        let (status, _) = app
            .json(Method::GET, &format!("/reviews/due?limit={limit}"), user, None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "limit={limit}");
    }
}

#[tokio::test]
async fn perfect_quiz_awards_full_xp_and_an_achievement() {
    let app = TestApp::new();
    let user = Some(Uuid::new_v4());

    let (status, result) = app
        .json(
            Method::POST,
            "/quizzes/artikel/submit",
            user,
            Some(json!({ "answers": [0, 1, 2] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["correct"], 3);
    assert_eq!(result["perfect"], true);
    assert_eq!(result["xp_awarded"], 30);

    let (_, partial) = app
        .json(
            Method::POST,
            "/quizzes/artikel/submit",
            user,
            Some(json!({ "answers": [0, 0, 0] })),
        )
        .await;
    assert_eq!(partial["correct"], 1);
    assert_eq!(partial["xp_awarded"], 10);

    let (_, stats) = app.json(Method::GET, "/stats", user, None).await;
    assert_eq!(stats["total_xp"], 40);
    assert_eq!(stats["quizzes_completed"], 2);
    assert_eq!(stats["perfect_quizzes"], 1);
    assert_eq!(stats["current_streak"], 1);
    assert_eq!(stats["achievements"], json!(["first_perfect_quiz"]));

    let (status, _) = app
        .json(
            Method::POST,
            "/quizzes/artikel/submit",
            user,
            Some(json!({ "answers": [0] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn grammar_check_reports_and_files_corrections() {
    let app = TestApp::new();
    let user = Some(Uuid::new_v4());

    let (status, body) = app
        .json(
            Method::POST,
            "/grammar/check",
            user,
            Some(json!({ "text": "Ich möchten einen Tee" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["has_correction"], true);
    assert_eq!(body["corrected"], "Ich möchte einen Tee");

    let (_, clean) = app
        .json(
            Method::POST,
            "/grammar/check",
            user,
            Some(json!({ "text": "Ich möchte einen Tee" })),
        )
        .await;
    assert_eq!(clean["has_correction"], false);
    assert!(clean["corrected"].is_null());

    let (status, _) = app
        .json(Method::POST, "/grammar/check", user, Some(json!({ "text": " " })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, stats) = app.json(Method::GET, "/stats", user, None).await;
    assert_eq!(stats["grammar_checks"], 2);
    assert_eq!(stats["grammar_errors_fixed"], 1);

    let (_, due) = app.json(Method::GET, "/reviews/due", user, None).await;
    assert_eq!(due[0]["card_type"], "grammar");
    assert_eq!(due[0]["content"], "Ich möchte einen Tee");
}

#[tokio::test]
async fn tts_returns_wav_audio() {
    let app = TestApp::new();
    let user = Some(Uuid::new_v4());

    let (status, bytes) = app
        .send(
            Method::POST,
            "/tts",
            user,
            Some(json!({ "text": "Guten Morgen!" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&bytes[..4], b"RIFF");
    let reader = hound::WavReader::new(std::io::Cursor::new(bytes)).unwrap();
    assert_eq!(reader.spec().channels, 1);

    let (status, body) = app
        .json(Method::POST, "/tts", user, Some(json!({ "text": "" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_input");

    let (status, health) = app.json(Method::GET, "/tts/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["available"], true);
}

#[tokio::test]
async fn chapters_list_the_learning_path() {
    let app = TestApp::new();
    let user = Some(Uuid::new_v4());

    let (status, chapters) = app.json(Method::GET, "/chapters", user, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chapters[0]["id"], "ankommen");
    assert_eq!(chapters[0]["locations"][0]["scenario_ids"], json!(["cafe"]));

    let (status, _) = app
        .json(Method::GET, "/chapters/ankommen", user, None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .json(Method::GET, "/chapters/nirgendwo", user, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "unknown_content");
}
