//! Shared fixtures for the service integration tests: a scripted LLM, a fake
//! synthesizer and a content directory written to a temp dir.

#![allow(dead_code)]

use api_lib::adapters::load_content;
use api_lib::config::Config;
use api_lib::web::{
    self,
    middleware::USER_ID_HEADER,
    state::{AppState, Repositories},
};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use sprachwelt_core::ports::{
    ChatMessage, ChatOptions, LlmService, PortError, PortResult, TextStream, TextToSpeechService,
};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

pub const CAFE: &str = r#"{
    "id": "cafe",
    "name": "Im Café",
    "difficulty": "A1",
    "category": "food",
    "context": "Ein kleines Café in Berlin.",
    "characters": [{
        "id": "anna", "name": "Anna", "role": "Kellnerin",
        "personality": "freundlich", "voice_id": "de_DE-eva_k-x_low",
        "greeting": "Guten Morgen! Was darf ich Ihnen bringen?"
    }],
    "objectives": [
        { "id": "order_drink", "description": "Bestelle ein Getränk",
          "keywords": ["Kaffee", "Tee"], "xp_reward": 10 },
        { "id": "thank", "description": "Bedanke dich",
          "keywords": ["danke"], "xp_reward": 10 }
    ],
    "xp_reward": 100,
    "bonus_xp": 50
}"#;

pub const BAHNHOF: &str = r#"{
    "id": "bahnhof",
    "name": "Am Bahnhof",
    "difficulty": "A2",
    "category": "travel",
    "characters": [{
        "id": "ines", "name": "Ines", "role": "Schalterbeamtin",
        "personality": "sachlich", "greeting": "Guten Tag, wohin möchten Sie?"
    }],
    "objectives": [
        { "id": "ticket", "description": "Kaufe eine Fahrkarte", "keywords": ["Fahrkarte"] }
    ],
    "xp_reward": 80
}"#;

pub const VOCAB: &str = r#"{
    "id": "essen",
    "title": "Essen",
    "difficulty": "A1",
    "words": [
        { "word": "Kaffee", "translation": "coffee" },
        { "word": "Tee", "translation": "tea" },
        { "word": "Wasser", "translation": "water" }
    ]
}"#;

pub const QUIZ: &str = r#"{
    "id": "artikel",
    "title": "Artikel",
    "xp_reward": 30,
    "questions": [
        { "prompt": "___ Kaffee", "options": ["der", "die", "das"], "answer_index": 0 },
        { "prompt": "___ Rechnung", "options": ["der", "die", "das"], "answer_index": 1 },
        { "prompt": "___ Wasser", "options": ["der", "die", "das"], "answer_index": 2 }
    ]
}"#;

pub const CHAPTER: &str = r#"{
    "id": "ankommen",
    "title": "Ankommen",
    "order": 1,
    "locations": [{ "id": "markt", "name": "Markt", "scenario_ids": ["cafe"] }]
}"#;

//=========================================================================================
// Doubles
//=========================================================================================

/// Replies from a queue; an empty queue answers "Ja."
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<PortResult<String>>>,
}

impl ScriptedLlm {
    pub fn push_reply(&self, reply: &str) {
        self.replies.lock().unwrap().push_back(Ok(reply.to_string()));
    }

    pub fn push_failure(&self, err: PortError) {
        self.replies.lock().unwrap().push_back(Err(err));
    }
}

#[async_trait]
impl LlmService for ScriptedLlm {
    async fn chat_stream(
        &self,
        _messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> PortResult<TextStream> {
        let next = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("Ja.".to_string()));
        let text = next?;
        let deltas: Vec<PortResult<String>> =
            text.split_inclusive(' ').map(|d| Ok(d.to_string())).collect();
        Ok(Box::pin(futures::stream::iter(deltas)))
    }
}

/// Returns a short silent mono 16-bit WAV.
pub struct FakeTts;

pub fn silent_wav() -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for _ in 0..160 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

#[async_trait]
impl TextToSpeechService for FakeTts {
    async fn synthesize(&self, text: &str, _voice_id: Option<&str>) -> PortResult<Vec<u8>> {
        if text.trim().is_empty() {
            return Err(PortError::InvalidInput("text is empty".into()));
        }
        Ok(silent_wav())
    }

    async fn is_available(&self) -> bool {
        true
    }
}

//=========================================================================================
// Harness
//=========================================================================================

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub llm: Arc<ScriptedLlm>,
    _content: tempfile::TempDir,
}

pub fn write_content(dir: &std::path::Path) {
    let files = [
        ("scenarios/cafe.json", CAFE),
        ("scenarios/bahnhof.json", BAHNHOF),
        ("vocab_sets/essen.json", VOCAB),
        ("quizzes/artikel.json", QUIZ),
        ("chapters/ankommen.json", CHAPTER),
    ];
    for (path, body) in files {
        let path = dir.join(path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }
}

impl TestApp {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        write_content(dir.path());
        let content = Arc::new(load_content(dir.path()).unwrap());

        let config = Arc::new(Config::from_lookup(|_| None).unwrap());
        let llm = Arc::new(ScriptedLlm::default());
        let state = Arc::new(
            AppState::new(
                config,
                content,
                llm.clone(),
                Arc::new(FakeTts),
                Repositories::in_memory(),
            )
            .unwrap(),
        );
        let router = web::router(state.clone()).unwrap();
        Self {
            router,
            state,
            llm,
            _content: dir,
        }
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        user: Option<Uuid>,
        body: Option<Value>,
    ) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_ID_HEADER, user.to_string());
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    /// Sends a request and parses the JSON response.
    pub async fn json(
        &self,
        method: Method,
        uri: &str,
        user: Option<Uuid>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, bytes) = self.send(method, uri, user, body).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Starts the café scenario and returns the state id.
    pub async fn start_cafe(&self, user: Uuid) -> Uuid {
        let (status, body) = self
            .json(Method::POST, "/scenarios/cafe/start", Some(user), None)
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["state_id"].as_str().unwrap().parse().unwrap()
    }
}
