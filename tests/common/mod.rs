#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use notedrop::{app, build_state, AppConfig};

pub const TEST_BOT_TOKEN: &str = "123:abc";

/// In-process stand-in for the Telegram Bot API. Records outbound calls and
/// can be flipped into failure modes per call family.
#[derive(Clone)]
pub struct TelegramMock {
    pub sent: Arc<Mutex<Vec<Value>>>,
    pub get_file_calls: Arc<Mutex<Vec<String>>>,
    pub file_path: Arc<Mutex<String>>,
    pub file_bytes: Arc<Mutex<Vec<u8>>>,
    pub fail_send: Arc<AtomicBool>,
    pub fail_get_file: Arc<AtomicBool>,
    pub fail_download: Arc<AtomicBool>,
}

impl Default for TelegramMock {
    fn default() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            get_file_calls: Arc::new(Mutex::new(Vec::new())),
            file_path: Arc::new(Mutex::new("photos/file_7.jpg".to_string())),
            file_bytes: Arc::new(Mutex::new(vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10])),
            fail_send: Arc::new(AtomicBool::new(false)),
            fail_get_file: Arc::new(AtomicBool::new(false)),
            fail_download: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl TelegramMock {
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|body| body.get("text").and_then(Value::as_str).map(String::from))
            .collect()
    }
}

async fn telegram_send(
    State(mock): State<TelegramMock>,
    Json(body): Json<Value>,
) -> axum::response::Response {
    if mock.fail_send.load(Ordering::Relaxed) {
        return (
            StatusCode::BAD_GATEWAY,
            Json(json!({"ok": false, "description": "mock send failure"})),
        )
            .into_response();
    }
    mock.sent.lock().unwrap().push(body);
    Json(json!({"ok": true, "result": {"message_id": 1}})).into_response()
}

#[derive(serde::Deserialize)]
struct GetFileQuery {
    file_id: String,
}

async fn telegram_get_file(
    State(mock): State<TelegramMock>,
    Query(query): Query<GetFileQuery>,
) -> axum::response::Response {
    mock.get_file_calls.lock().unwrap().push(query.file_id.clone());
    if mock.fail_get_file.load(Ordering::Relaxed) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"ok": false, "description": "mock getFile failure"})),
        )
            .into_response();
    }
    let file_path = mock.file_path.lock().unwrap().clone();
    Json(json!({"ok": true, "result": {"file_id": query.file_id, "file_path": file_path}}))
        .into_response()
}

async fn telegram_download(State(mock): State<TelegramMock>) -> axum::response::Response {
    if mock.fail_download.load(Ordering::Relaxed) {
        return (StatusCode::NOT_FOUND, "mock download failure").into_response();
    }
    mock.file_bytes.lock().unwrap().clone().into_response()
}

pub async fn start_mock_telegram() -> (String, TelegramMock, JoinHandle<()>) {
    let mock = TelegramMock::default();
    let router = Router::new()
        .route("/:bot/sendMessage", post(telegram_send))
        .route("/:bot/getFile", get(telegram_get_file))
        .route("/file/:bot/*path", get(telegram_download))
        .with_state(mock.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{}", addr), mock, handle)
}

/// What the Gemini stand-in answers with.
#[derive(Clone)]
pub enum GeminiReply {
    /// Embed this JSON object as the candidate text (the contract shape).
    Classification(Value),
    /// Arbitrary candidate text, e.g. prose or fenced JSON.
    RawText(String),
    /// Fail the HTTP call outright.
    Failure(u16),
}

#[derive(Clone)]
pub struct GeminiMock {
    pub requests: Arc<Mutex<Vec<Value>>>,
    pub reply: Arc<Mutex<GeminiReply>>,
}

impl Default for GeminiMock {
    fn default() -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            reply: Arc::new(Mutex::new(GeminiReply::Classification(json!({
                "title": "測試標題",
                "summary": "測試摘要",
                "tags": ["生活"]
            })))),
        }
    }
}

impl GeminiMock {
    pub fn set_reply(&self, reply: GeminiReply) {
        *self.reply.lock().unwrap() = reply;
    }
}

async fn gemini_generate(
    State(mock): State<GeminiMock>,
    Json(body): Json<Value>,
) -> axum::response::Response {
    mock.requests.lock().unwrap().push(body);
    let reply = mock.reply.lock().unwrap().clone();
    let text = match reply {
        GeminiReply::Classification(value) => serde_json::to_string(&value).unwrap(),
        GeminiReply::RawText(text) => text,
        GeminiReply::Failure(status) => {
            return (
                StatusCode::from_u16(status).unwrap(),
                Json(json!({"error": {"message": "mock backend failure"}})),
            )
                .into_response();
        }
    };
    Json(json!({"candidates": [{"content": {"parts": [{"text": text}]}}]})).into_response()
}

pub async fn start_mock_gemini() -> (String, GeminiMock, JoinHandle<()>) {
    let mock = GeminiMock::default();
    let router = Router::new()
        .route("/v1beta/models/:model", post(gemini_generate))
        .with_state(mock.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{}", addr), mock, handle)
}

#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub key: String,
    pub content_type: String,
    pub byte_len: usize,
}

/// In-process stand-in for Supabase: a notes table with the PostgREST
/// filters the service relies on, plus the storage upload endpoint.
#[derive(Clone)]
pub struct SupabaseMock {
    pub notes: Arc<Mutex<Vec<Value>>>,
    pub uploads: Arc<Mutex<Vec<UploadRecord>>>,
    pub fail_inserts: Arc<AtomicBool>,
    pub fail_uploads: Arc<AtomicBool>,
    pub fail_lists: Arc<AtomicBool>,
}

impl Default for SupabaseMock {
    fn default() -> Self {
        Self {
            notes: Arc::new(Mutex::new(Vec::new())),
            uploads: Arc::new(Mutex::new(Vec::new())),
            fail_inserts: Arc::new(AtomicBool::new(false)),
            fail_uploads: Arc::new(AtomicBool::new(false)),
            fail_lists: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl SupabaseMock {
    pub fn note_count(&self) -> usize {
        self.notes.lock().unwrap().len()
    }

    pub fn last_note(&self) -> Value {
        self.notes.lock().unwrap().last().cloned().expect("no note inserted")
    }

    pub fn seed_note(&self, note: Value) {
        self.notes.lock().unwrap().push(note);
    }
}

async fn supabase_insert(
    State(mock): State<SupabaseMock>,
    Json(body): Json<Value>,
) -> axum::response::Response {
    if mock.fail_inserts.load(Ordering::Relaxed) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"message": "mock insert failure"})),
        )
            .into_response();
    }
    mock.notes.lock().unwrap().push(body);
    StatusCode::CREATED.into_response()
}

async fn supabase_list(
    State(mock): State<SupabaseMock>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    if mock.fail_lists.load(Ordering::Relaxed) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"message": "mock query failure"})),
        )
            .into_response();
    }
    let mut rows = mock.notes.lock().unwrap().clone();

    if let Some(or) = params.get("or") {
        if let Some(needle) = or.split(".ilike.*").nth(1).and_then(|rest| rest.split('*').next()) {
            let needle = needle.to_lowercase();
            rows.retain(|row| {
                ["title", "summary", "raw_text"].iter().any(|field| {
                    row.get(*field)
                        .and_then(Value::as_str)
                        .map(|s| s.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
            });
        }
    }
    if let Some(tags) = params.get("tags") {
        if let Some(tag) = tags.strip_prefix("cs.{").and_then(|rest| rest.strip_suffix('}')) {
            rows.retain(|row| {
                row.get("tags")
                    .and_then(Value::as_array)
                    .map(|arr| arr.iter().any(|t| t.as_str() == Some(tag)))
                    .unwrap_or(false)
            });
        }
    }

    rows.sort_by(|a, b| {
        let a_key = a.get("created_at").and_then(Value::as_str).unwrap_or("");
        let b_key = b.get("created_at").and_then(Value::as_str).unwrap_or("");
        b_key.cmp(a_key)
    });
    let limit = params
        .get("limit")
        .and_then(|l| l.parse::<usize>().ok())
        .unwrap_or(50);
    rows.truncate(limit);
    Json(Value::Array(rows)).into_response()
}

async fn supabase_upload(
    State(mock): State<SupabaseMock>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    if mock.fail_uploads.load(Ordering::Relaxed) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"message": "mock upload failure"})),
        )
            .into_response();
    }
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    mock.uploads.lock().unwrap().push(UploadRecord {
        key: key.clone(),
        content_type,
        byte_len: body.len(),
    });
    Json(json!({"Key": format!("assets/{}", key)})).into_response()
}

pub async fn start_mock_supabase() -> (String, SupabaseMock, JoinHandle<()>) {
    let mock = SupabaseMock::default();
    let router = Router::new()
        .route("/rest/v1/notes", post(supabase_insert).get(supabase_list))
        .route("/storage/v1/object/assets/*key", post(supabase_upload))
        .with_state(mock.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{}", addr), mock, handle)
}

/// The app under test plus its three mocked upstreams.
pub struct TestHarness {
    pub base_url: String,
    pub telegram: TelegramMock,
    pub gemini: GeminiMock,
    pub supabase: SupabaseMock,
    handles: Vec<JoinHandle<()>>,
}

impl TestHarness {
    pub async fn post_update(&self, update: &Value) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{}/api/webhook", self.base_url))
            .json(update)
            .send()
            .await
            .unwrap()
    }
}

pub async fn spawn_harness() -> TestHarness {
    spawn_harness_with(|config| config).await
}

pub async fn spawn_harness_with<F>(customize: F) -> TestHarness
where
    F: FnOnce(AppConfig) -> AppConfig,
{
    let (telegram_url, telegram, telegram_handle) = start_mock_telegram().await;
    let (gemini_url, gemini, gemini_handle) = start_mock_gemini().await;
    let (supabase_url, supabase, supabase_handle) = start_mock_supabase().await;

    let config = customize(AppConfig {
        telegram_token: TEST_BOT_TOKEN.to_string(),
        telegram_api_base: telegram_url,
        webhook_secret: None,
        gemini_api_key: "test-key".to_string(),
        gemini_api_base: gemini_url,
        gemini_model: "gemini-1.5-flash".to_string(),
        supabase_url,
        supabase_service_key: "service-role".to_string(),
        tag_vocabulary: notedrop::classify::default_tag_vocabulary(),
        telegram_timeout_ms: 2000,
        gemini_timeout_ms: 2000,
        supabase_timeout_ms: 2000,
        max_request_bytes: None,
    });

    let state = build_state(&config);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = app(state);
    let app_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestHarness {
        base_url: format!("http://{}", addr),
        telegram,
        gemini,
        supabase,
        handles: vec![telegram_handle, gemini_handle, supabase_handle, app_handle],
    }
}
