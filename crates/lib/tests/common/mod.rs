//! Shared test helpers: a mock Telegram Bot API, recording fakes, temp files.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use logrelay::channels::{ChannelError, ChannelHandle};
use logrelay::inject::{InjectionError, Injector};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TOKEN: &str = "test-token";
/// Chat id the mock API refuses to deliver to.
pub const UNREACHABLE_CHAT: i64 = 404;

#[derive(Clone, Default)]
struct BotState {
    updates: Arc<Mutex<Vec<Value>>>,
    sent: Arc<Mutex<Vec<(i64, String)>>>,
    polls: Arc<AtomicUsize>,
    offsets: Arc<Mutex<Vec<Option<i64>>>>,
    failing_polls: Arc<AtomicUsize>,
    stall_sends: Arc<AtomicBool>,
}

/// In-process Bot API serving getMe, getUpdates and sendMessage for [`TOKEN`].
pub struct MockBot {
    pub base: String,
    state: BotState,
}

impl MockBot {
    pub async fn start() -> Self {
        let state = BotState::default();
        let app = Router::new()
            .route(&format!("/bot{}/getMe", TOKEN), get(get_me))
            .route(&format!("/bot{}/getUpdates", TOKEN), get(get_updates))
            .route(&format!("/bot{}/sendMessage", TOKEN), post(send_message))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock bot api");
        let addr = listener.local_addr().expect("local_addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            base: format!("http://{}", addr),
            state,
        }
    }

    /// Queue a text message update.
    pub fn push_text(&self, update_id: i64, sender: i64, chat: i64, text: &str) {
        self.push_update(json!({
            "update_id": update_id,
            "message": {
                "from": { "id": sender, "is_bot": false, "username": format!("user{}", sender) },
                "chat": { "id": chat, "type": "private" },
                "text": text
            }
        }));
    }

    pub fn push_update(&self, update: Value) {
        self.state.updates.lock().unwrap().push(update);
    }

    pub fn sent(&self) -> Vec<(i64, String)> {
        self.state.sent.lock().unwrap().clone()
    }

    pub fn polls(&self) -> usize {
        self.state.polls.load(Ordering::SeqCst)
    }

    /// Offset parameter of every getUpdates call so far.
    pub fn offsets(&self) -> Vec<Option<i64>> {
        self.state.offsets.lock().unwrap().clone()
    }

    /// Answer the next `n` getUpdates calls with HTTP 500.
    pub fn fail_next_polls(&self, n: usize) {
        self.state.failing_polls.store(n, Ordering::SeqCst);
    }

    /// Accept sendMessage requests but never answer them.
    pub fn stall_sends(&self) {
        self.state.stall_sends.store(true, Ordering::SeqCst);
    }
}

async fn get_me() -> Json<Value> {
    Json(json!({ "ok": true, "result": { "id": 1, "is_bot": true, "username": "relay_bot" } }))
}

async fn get_updates(
    State(state): State<BotState>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    state.polls.fetch_add(1, Ordering::SeqCst);
    let requested = query.get("offset").and_then(|s| s.parse::<i64>().ok());
    state.offsets.lock().unwrap().push(requested);
    let failing = state
        .failing_polls
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "ok": false, "error_code": 500, "description": "Internal Server Error" })),
        );
    }
    let offset = requested.unwrap_or(0);
    for _ in 0..10 {
        let ready: Vec<Value> = state
            .updates
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u["update_id"].as_i64().unwrap_or(0) >= offset)
            .cloned()
            .collect();
        if !ready.is_empty() {
            return (StatusCode::OK, Json(json!({ "ok": true, "result": ready })));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    (StatusCode::OK, Json(json!({ "ok": true, "result": [] })))
}

async fn send_message(
    State(state): State<BotState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if state.stall_sends.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
    let chat_id = body["chat_id"].as_i64().unwrap_or_default();
    if chat_id == UNREACHABLE_CHAT {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "error_code": 400, "description": "Bad Request: chat not found" })),
        );
    }
    let text = body["text"].as_str().unwrap_or_default().to_string();
    state.sent.lock().unwrap().push((chat_id, text));
    (
        StatusCode::OK,
        Json(json!({ "ok": true, "result": { "message_id": 1, "chat": { "id": chat_id } } })),
    )
}

/// Channel fake that records every send; chats in `failing` get an error.
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<(i64, String)>>,
    failing: HashSet<i64>,
}

impl RecordingChannel {
    pub fn failing(chats: impl IntoIterator<Item = i64>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: chats.into_iter().collect(),
        }
    }

    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelHandle for RecordingChannel {
    fn id(&self) -> &str {
        "recording"
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ChannelError> {
        if self.failing.contains(&chat_id) {
            return Err(ChannelError::Rejected {
                method: "sendMessage",
                description: "Bad Request: chat not found".to_string(),
            });
        }
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}

/// One recorded injection.
#[derive(Debug, Clone)]
pub struct Injection {
    pub session: String,
    pub command: String,
    pub at: tokio::time::Instant,
}

/// Injector fake that records calls and optionally fails every one.
#[derive(Default)]
pub struct RecordingInjector {
    calls: Mutex<Vec<Injection>>,
    fail: bool,
}

impl RecordingInjector {
    pub fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<Injection> {
        self.calls.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.command).collect()
    }
}

#[async_trait]
impl Injector for RecordingInjector {
    async fn inject(&self, session: &str, command: &str) -> Result<(), InjectionError> {
        self.calls.lock().unwrap().push(Injection {
            session: session.to_string(),
            command: command.to_string(),
            at: tokio::time::Instant::now(),
        });
        if self.fail {
            return Err(InjectionError::Failed {
                program: "screen".to_string(),
                status: "exit status: 1".to_string(),
                output: "No screen session found.".to_string(),
            });
        }
        Ok(())
    }
}

/// Fresh temp directory for one test.
pub fn temp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

/// Poll `cond` every 10ms for up to 5s.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
