//! End-to-end tests against an in-process mock backend.
//!
//! The mock speaks the same HTTP surface as the real corpus backend (chat,
//! documents, chunked upload, sessions) and records what it receives, so
//! these tests exercise the real `reqwest` transport, multipart encoding,
//! retry timing and the composition in [`App`].

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use corpus_chat::app::App;
use corpus_chat::chat::{PipelineState, SubmitOutcome};
use corpus_chat::config::Config;
use corpus_chat::error::ErrorKind;
use corpus_chat::knowledge::{Notifier, RemoveOutcome};
use corpus_chat::models::{Author, Session};
use corpus_chat::progress::NoProgress;
use corpus_chat::upload::UploadFile;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// ─── Mock Backend ───────────────────────────────────────────────────

#[derive(Default)]
struct Backend {
    documents: Vec<Value>,
    sessions: Vec<Value>,
    /// Rate-limit this many chat requests before answering.
    throttle_chat: u32,
    fail_chat: bool,
    /// Reject the upload chunk with this index.
    fail_chunk: Option<usize>,
    chat_bodies: Vec<Value>,
    /// (document ids, question) for each comparison.
    comparisons: Vec<(Vec<String>, String)>,
    auth_headers: Vec<String>,
    /// (chunk, chunks, bytes) for each chunk received.
    chunks: Vec<(usize, usize, usize)>,
    list_calls: usize,
}

type Shared = Arc<Mutex<Backend>>;

fn record_auth(backend: &mut Backend, headers: &HeaderMap) {
    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        backend.auth_headers.push(value.to_string());
    }
}

async fn handle_chat(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut backend = state.lock().unwrap();
    record_auth(&mut backend, &headers);
    backend.chat_bodies.push(body.clone());

    if backend.throttle_chat > 0 {
        backend.throttle_chat -= 1;
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"detail": "Too many requests"})),
        )
            .into_response();
    }
    if backend.fail_chat {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "model unavailable"})),
        )
            .into_response();
    }

    let content = body["content"].as_str().unwrap_or_default();
    let session_id = body["session_id"].as_str().unwrap_or("sess-1").to_string();
    Json(json!({
        "content": format!("You asked: {}", content),
        "sources": [{
            "document_id": "doc-1",
            "title": "Lease",
            "snippet": "Pets are allowed with a deposit.",
            "relevance_score": 0.87
        }],
        "session_id": session_id
    }))
    .into_response()
}

async fn handle_list_documents(State(state): State<Shared>) -> Json<Value> {
    let mut backend = state.lock().unwrap();
    backend.list_calls += 1;
    Json(Value::Array(backend.documents.clone()))
}

async fn handle_get_document(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let backend = state.lock().unwrap();
    match backend.documents.iter().find(|d| d["id"] == id.as_str()) {
        Some(doc) => Json(doc.clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "Document not found"})),
        )
            .into_response(),
    }
}

async fn handle_compare(
    State(state): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
    Json(ids): Json<Vec<String>>,
) -> Json<Value> {
    let question = params.get("question").cloned().unwrap_or_default();
    let analysis = format!("{} documents compared on: {}", ids.len(), question);
    state.lock().unwrap().comparisons.push((ids, question));
    Json(json!({"analysis": analysis}))
}

async fn handle_delete_document(
    State(state): State<Shared>,
    Path(id): Path<String>,
) -> Response {
    let mut backend = state.lock().unwrap();
    let before = backend.documents.len();
    backend.documents.retain(|d| d["id"] != id.as_str());
    if backend.documents.len() == before {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "Document not found"})),
        )
            .into_response();
    }
    Json(json!({"message": "Document deleted successfully"})).into_response()
}

async fn handle_preview(Path(id): Path<String>) -> Response {
    if id == "doc-pdf" {
        (
            [("content-type", "application/pdf")],
            b"%PDF-1.4 test".to_vec(),
        )
            .into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "Preview only available for PDF documents"})),
        )
            .into_response()
    }
}

async fn handle_upload_chunk(State(state): State<Shared>, mut multipart: Multipart) -> Response {
    let mut chunk = None;
    let mut chunks = None;
    let mut file_name = None;
    let mut size = 0;

    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                file_name = field.file_name().map(str::to_string);
                size = field.bytes().await.unwrap().len();
            }
            "chunk" => chunk = field.text().await.unwrap().parse::<usize>().ok(),
            "chunks" => chunks = field.text().await.unwrap().parse::<usize>().ok(),
            _ => {}
        }
    }

    let (Some(chunk), Some(chunks)) = (chunk, chunks) else {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"detail": "missing chunk fields"})),
        )
            .into_response();
    };

    let mut backend = state.lock().unwrap();
    backend.chunks.push((chunk, chunks, size));
    if backend.fail_chunk == Some(chunk) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": "disk full"})),
        )
            .into_response();
    }
    if chunk + 1 == chunks {
        let title = file_name.unwrap_or_else(|| "upload".to_string());
        let id = format!("doc-{}", backend.documents.len() + 1);
        backend.documents.push(json!({
            "id": id,
            "title": title,
            "type": "text/plain",
            "created_at": "2024-06-03T09:00:00",
            "content": "uploaded"
        }));
    }
    Json(json!({"message": "Chunk received"})).into_response()
}

async fn handle_list_sessions(State(state): State<Shared>) -> Json<Value> {
    Json(Value::Array(state.lock().unwrap().sessions.clone()))
}

async fn handle_delete_session(
    State(state): State<Shared>,
    Path(id): Path<String>,
) -> StatusCode {
    let mut backend = state.lock().unwrap();
    let before = backend.sessions.len();
    backend.sessions.retain(|s| s["id"] != id.as_str());
    if backend.sessions.len() == before {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    }
}

async fn spawn_backend(backend: Backend) -> (String, Shared) {
    let state: Shared = Arc::new(Mutex::new(backend));
    let router = Router::new()
        .route("/api/v1/chat/message", post(handle_chat))
        .route("/api/v1/chat/documents/compare", post(handle_compare))
        .route("/api/v1/chat/sessions", get(handle_list_sessions))
        .route("/api/v1/chat/sessions/{id}", delete(handle_delete_session))
        .route("/api/v1/documents/", get(handle_list_documents))
        .route(
            "/api/v1/documents/{id}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/api/v1/documents/preview/{id}", get(handle_preview))
        .route("/api/v1/documents/upload/chunk", post(handle_upload_chunk))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    (format!("http://{}", addr), state)
}

// ─── Helpers ────────────────────────────────────────────────────────

#[derive(Default)]
struct CollectingNotifier {
    alerts: Mutex<Vec<String>>,
}

impl Notifier for CollectingNotifier {
    fn alert(&self, message: &str) {
        self.alerts.lock().unwrap().push(message.to_string());
    }
}

fn test_config(base_url: &str, chunk_size: usize) -> Config {
    let config_content = format!(
        r#"
[api]
base_url = "{}"
timeout_secs = 5
bearer_token = "secret-token"
token_env = "CORPUS_CHAT_INTEGRATION_TOKEN_UNSET"

[retry]
max_attempts = 3
base_delay_ms = 10

[upload]
chunk_size = {}
"#,
        base_url, chunk_size
    );
    toml::from_str(&config_content).unwrap()
}

fn test_app(base_url: &str, chunk_size: usize) -> (App, Arc<CollectingNotifier>) {
    let notifier = Arc::new(CollectingNotifier::default());
    let app = App::from_config(
        &test_config(base_url, chunk_size),
        Session::new(),
        notifier.clone(),
        Arc::new(NoProgress),
    )
    .unwrap();
    (app, notifier)
}

fn doc(id: &str, title: &str, mime: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "type": mime,
        "created_at": "2024-06-01T12:00:00Z",
        "content": format!("{} body", title)
    })
}

// ─── Tests ──────────────────────────────────────────────────────────

/// Rate limiting is absorbed, the session id is adopted from the first
/// reply and sent with the next message.
#[tokio::test]
async fn test_chat_round_trip_through_rate_limit() {
    let (base_url, state) = spawn_backend(Backend {
        throttle_chat: 2,
        ..Default::default()
    })
    .await;
    let (app, _) = test_app(&base_url, 1024);

    let outcome = app.chat.submit("Can I keep a cat?").await;
    let SubmitOutcome::Replied(reply) = outcome else {
        panic!("expected a reply, got {:?}", outcome);
    };
    assert_eq!(reply.content, "You asked: Can I keep a cat?");
    assert_eq!(reply.sources.len(), 1);
    assert_eq!(reply.sources[0].title, "Lease");
    assert_eq!(app.chat.session().id(), Some("sess-1"));

    app.chat.submit("And a dog?").await;

    let backend = state.lock().unwrap();
    assert_eq!(backend.chat_bodies.len(), 4, "two throttled, two answered");
    assert_eq!(backend.chat_bodies[0]["session_id"], Value::Null);
    assert_eq!(backend.chat_bodies[3]["session_id"], "sess-1");
    assert!(backend
        .auth_headers
        .iter()
        .all(|h| h == "Bearer secret-token"));
    drop(backend);

    let authors: Vec<Author> = app.chat.messages().iter().map(|m| m.author).collect();
    assert_eq!(
        authors,
        vec![
            Author::Assistant,
            Author::User,
            Author::Assistant,
            Author::User,
            Author::Assistant
        ]
    );
}

#[tokio::test]
async fn test_chat_rate_limit_exhausted_shows_apology() {
    let (base_url, state) = spawn_backend(Backend {
        throttle_chat: 10,
        ..Default::default()
    })
    .await;
    let (app, _) = test_app(&base_url, 1024);

    let outcome = app.chat.submit("hello").await;
    let SubmitOutcome::Failed(message) = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert_eq!(message.author, Author::Error);
    assert!(message.content.contains("Sorry"));
    assert_eq!(app.chat.state(), PipelineState::Idle);
    assert_eq!(state.lock().unwrap().chat_bodies.len(), 3);
}

#[tokio::test]
async fn test_chat_server_error_is_not_retried() {
    let (base_url, state) = spawn_backend(Backend {
        fail_chat: true,
        ..Default::default()
    })
    .await;
    let (app, _) = test_app(&base_url, 1024);

    let outcome = app.chat.submit("hello").await;
    assert!(matches!(outcome, SubmitOutcome::Failed(_)));
    assert_eq!(state.lock().unwrap().chat_bodies.len(), 1);
    // The user message stays in the history.
    assert_eq!(app.chat.messages().len(), 3);
}

#[tokio::test]
async fn test_documents_select_preview_and_delete() {
    let (base_url, state) = spawn_backend(Backend {
        documents: vec![
            doc("doc-1", "Lease", "text/plain"),
            doc("doc-pdf", "Insurance", "application/pdf"),
        ],
        ..Default::default()
    })
    .await;
    let (app, notifier) = test_app(&base_url, 1024);

    app.knowledge.fetch().await.unwrap();
    assert_eq!(app.knowledge.documents().len(), 2);
    assert!(!app.knowledge.is_loading());

    app.knowledge.select("doc-1");
    let preview = app.preview.current().unwrap();
    assert_eq!(preview.title, "Lease");
    assert_eq!(preview.content.as_deref(), Some("Lease body"));

    let bytes = app.knowledge.preview_bytes("doc-pdf").await.unwrap();
    assert!(bytes.starts_with(b"%PDF"));
    let err = app.knowledge.preview_bytes("doc-1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Client);

    assert_eq!(app.knowledge.remove("doc-1").await, RemoveOutcome::Removed);
    assert_eq!(app.knowledge.selection(), None);
    assert!(app.preview.current().is_none());
    let ids: Vec<String> = app.knowledge.documents().into_iter().map(|d| d.id).collect();
    assert_eq!(ids, vec!["doc-pdf".to_string()]);
    assert_eq!(state.lock().unwrap().list_calls, 2);

    // Deleting something that is gone leaves the set alone and alerts.
    let outcome = app.knowledge.remove("doc-1").await;
    assert!(matches!(outcome, RemoveOutcome::Failed(_)));
    assert_eq!(app.knowledge.documents().len(), 1);
    assert_eq!(
        notifier.alerts.lock().unwrap().clone(),
        vec!["Failed to delete document: Document not found".to_string()]
    );
}

#[tokio::test]
async fn test_get_and_compare_documents() {
    let (base_url, state) = spawn_backend(Backend {
        documents: vec![
            doc("lease#2024", "Lease", "text/plain"),
            doc("doc-pdf", "Insurance", "application/pdf"),
        ],
        ..Default::default()
    })
    .await;
    let (app, _) = test_app(&base_url, 1024);

    // A reserved character in the id must reach the server intact.
    let lease = app.knowledge.get("lease#2024").await.unwrap();
    assert_eq!(lease.title, "Lease");
    assert!(app.knowledge.documents().is_empty());

    let err = app.knowledge.get("lease").await.unwrap_err();
    assert_eq!(err.status(), Some(404));

    let ids = vec!["lease#2024".to_string(), "doc-pdf".to_string()];
    let analysis = app
        .knowledge
        .compare(&ids, "Are pets covered?")
        .await
        .unwrap();
    assert_eq!(analysis, "2 documents compared on: Are pets covered?");
    assert_eq!(
        state.lock().unwrap().comparisons,
        vec![(ids, "Are pets covered?".to_string())]
    );
}

#[tokio::test]
async fn test_debounced_input_sends_only_latest_text() {
    let (base_url, state) = spawn_backend(Backend::default()).await;
    let (app, _) = test_app(&base_url, 1024);

    let mut input = app.debounced_input();
    input.schedule("Can I");
    input.schedule("Can I keep a cat?");
    assert!(input.is_pending());

    let outcome = input.flush().await.unwrap();
    assert_eq!(
        outcome.message().map(|m| m.content.clone()),
        Some("You asked: Can I keep a cat?".to_string())
    );
    assert_eq!(state.lock().unwrap().chat_bodies.len(), 1);
}

#[tokio::test]
async fn test_chunked_upload_refreshes_documents() {
    let (base_url, state) = spawn_backend(Backend::default()).await;
    let (app, _) = test_app(&base_url, 4);

    let file = UploadFile::new("notes.txt", "text/plain", b"0123456789".to_vec());
    let report = app.uploads.upload(&file).await.unwrap();

    assert_eq!(report.total_chunks, 3);
    assert!(report.refreshed);
    assert!(!app.uploads.is_active());
    assert_eq!(
        state.lock().unwrap().chunks,
        vec![(0, 3, 4), (1, 3, 4), (2, 3, 2)]
    );

    let documents = app.knowledge.documents();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].title, "notes.txt");
}

#[tokio::test]
async fn test_chunked_upload_aborts_on_failed_chunk() {
    let (base_url, state) = spawn_backend(Backend {
        fail_chunk: Some(1),
        ..Default::default()
    })
    .await;
    let (app, _) = test_app(&base_url, 4);

    let file = UploadFile::new("notes.txt", "text/plain", b"0123456789".to_vec());
    let err = app.uploads.upload(&file).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Server);
    assert_eq!(err.detail(), Some("disk full"));
    assert!(!app.uploads.is_active());

    let backend = state.lock().unwrap();
    let indexes: Vec<usize> = backend.chunks.iter().map(|c| c.0).collect();
    assert_eq!(indexes, vec![0, 1]);
    assert_eq!(backend.list_calls, 0, "no refresh after an aborted upload");
}

#[tokio::test]
async fn test_upload_from_disk() {
    let (base_url, state) = spawn_backend(Backend::default()).await;
    let (app, _) = test_app(&base_url, 1024 * 1024);

    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("report.md");
    std::fs::write(&path, "# Quarterly report\n").unwrap();

    let file = UploadFile::from_path(&path).await.unwrap();
    let report = app.uploads.upload(&file).await.unwrap();

    assert_eq!(report.total_chunks, 1);
    assert_eq!(state.lock().unwrap().chunks.len(), 1);
    assert_eq!(app.knowledge.documents()[0].title, "report.md");
}

#[tokio::test]
async fn test_sessions_list_and_delete() {
    let (base_url, state) = spawn_backend(Backend {
        sessions: vec![
            json!({"id": "s-2", "title": "Taxes", "updated_at": "2024-06-02T08:00:00", "messages": []}),
            json!({"id": "s-1", "title": "New Chat", "messages": []}),
        ],
        ..Default::default()
    })
    .await;
    let (app, _) = test_app(&base_url, 1024);

    let sessions = app.sessions.list(0, 20).await.unwrap();
    assert_eq!(sessions.len(), 2);
    assert!(sessions[0].updated_at.is_some());
    assert!(sessions[1].updated_at.is_none());

    app.sessions.delete("s-2").await.unwrap();
    assert_eq!(state.lock().unwrap().sessions.len(), 1);

    let err = app.sessions.delete("s-2").await.unwrap_err();
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn test_unreachable_backend_is_a_network_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let (app, _) = test_app(&format!("http://127.0.0.1:{}", port), 1024);

    let err = app.knowledge.fetch().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(app
        .knowledge
        .error()
        .unwrap()
        .starts_with("Failed to load documents:"));
}
