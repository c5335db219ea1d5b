//! In-process mock of the Memos API used by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use memos_client::models::extract_tags;
use memos_client::{ClientConfig, ClientConfigBuilder};
use regex::Regex;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

pub const USERNAME: &str = "alice";
pub const PASSWORD: &str = "secret";
pub const STATIC_TOKEN: &str = "static-token";
const TIMESTAMP: &str = "2024-05-01T12:00:00Z";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
pub struct MockInner {
    pub login_attempts: AtomicUsize,
    pub logins: AtomicUsize,
    /// Number of upcoming login requests answered with 503.
    pub fail_logins: AtomicUsize,
    /// Issue sessions that expire within the client's refresh margin.
    pub short_sessions: AtomicBool,
    pub unauthorized: AtomicUsize,
    pub sign_outs: AtomicUsize,
    pub valid_token: Mutex<String>,
    /// Issue the session token only through the session cookie.
    pub cookie_only: AtomicBool,
    /// Reject every authenticated request with 401.
    pub reject_all: AtomicBool,
    /// Number of upcoming memo GET/POST requests answered with 503.
    pub fail_next: AtomicUsize,
    pub memo_gets: AtomicUsize,
    pub memo_creates: AtomicUsize,
    /// Answer memo attachment updates with 500.
    pub fail_attachment_links: AtomicBool,
    pub rejected_contents: Mutex<HashSet<String>>,
    pub memos: Mutex<BTreeMap<String, Value>>,
    pub attachments: Mutex<BTreeMap<String, Value>>,
    pub next_id: AtomicUsize,
    pub uploaded_bytes: AtomicUsize,
    pub download_requests: Mutex<Vec<HashMap<String, String>>>,
}

#[derive(Clone, Default)]
pub struct MockState(pub Arc<MockInner>);

impl std::ops::Deref for MockState {
    type Target = MockInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MockState {
    /// Invalidate the current session so the next request gets a 401.
    pub fn revoke_sessions(&self) {
        *self.valid_token.lock().unwrap() = "revoked".to_string();
    }

    pub fn reject_content(&self, content: &str) {
        self.rejected_contents
            .lock()
            .unwrap()
            .insert(content.to_string());
    }

    pub fn insert_memo(&self, id: &str, content: &str) {
        self.memos
            .lock()
            .unwrap()
            .insert(id.to_string(), memo_json(id, content, "PRIVATE"));
    }
}

pub struct MockServer {
    pub base_url: String,
    pub state: MockState,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        init_tracing();
        let state = MockState::default();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = router(state.clone());
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Self {
            base_url: format!("http://{addr}"),
            state,
            handle,
        }
    }

    /// Config that logs in with username/password and uses fast backoff.
    pub fn password_config(&self) -> ClientConfigBuilder {
        ClientConfig::builder(&self.base_url)
            .password(USERNAME, PASSWORD)
            .timeout(Duration::from_secs(5))
            .backoff(Duration::from_millis(5), 2.0, Duration::from_millis(20))
    }

    /// Config with a fixed access token the server accepts.
    pub fn token_config(&self) -> ClientConfigBuilder {
        *self.state.valid_token.lock().unwrap() = STATIC_TOKEN.to_string();
        ClientConfig::builder(&self.base_url)
            .access_token(STATIC_TOKEN)
            .timeout(Duration::from_secs(5))
            .backoff(Duration::from_millis(5), 2.0, Duration::from_millis(20))
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn router(state: MockState) -> Router {
    Router::new()
        .route("/api/v1/auth/sessions", post(login))
        .route(
            "/api/v1/auth/sessions/current",
            get(current_session).delete(delete_session),
        )
        .route("/api/v1/memos", get(search_memos).post(create_memo))
        .route(
            "/api/v1/memos/{id}",
            get(get_memo).patch(update_memo).delete(delete_memo),
        )
        .route(
            "/api/v1/memos/{id}/attachments",
            patch(set_memo_attachments).get(list_memo_attachments),
        )
        .route(
            "/api/v1/attachments",
            post(upload_attachment).get(list_attachments),
        )
        .route(
            "/api/v1/attachments/{id}",
            get(get_attachment).delete(delete_attachment),
        )
        .route("/api/v1/users/{id}", get(get_user))
        .route("/file/attachments/{id}/{filename}", get(download_file))
        .layer(DefaultBodyLimit::max(128 * 1024 * 1024))
        .with_state(state)
}

pub fn memo_json(id: &str, content: &str, visibility: &str) -> Value {
    let mut tags: Vec<String> = extract_tags(content).into_iter().collect();
    tags.sort();
    json!({
        "name": format!("memos/{id}"),
        "state": "NORMAL",
        "creator": "users/1",
        "createTime": TIMESTAMP,
        "updateTime": TIMESTAMP,
        "displayTime": TIMESTAMP,
        "content": content,
        "snippet": content.chars().take(64).collect::<String>(),
        "visibility": visibility,
        "tags": tags,
        "pinned": false,
        "attachments": [],
    })
}

pub fn user_json(id: &str) -> Value {
    json!({
        "name": format!("users/{id}"),
        "username": USERNAME,
        "email": "alice@example.com",
        "nickname": "Alice",
        "role": "HOST",
        "createTime": TIMESTAMP,
        "updateTime": TIMESTAMP,
    })
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "code": status.as_u16(), "message": message }))).into_response()
}

fn authorize(state: &MockState, headers: &HeaderMap) -> Result<(), Response> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let valid = state.valid_token.lock().unwrap().clone();
    if state.reject_all.load(Ordering::SeqCst) || valid.is_empty() || presented != Some(valid.as_str()) {
        state.unauthorized.fetch_add(1, Ordering::SeqCst);
        return Err(error_response(StatusCode::UNAUTHORIZED, "unauthenticated"));
    }
    Ok(())
}

fn take_failure(state: &MockState) -> bool {
    take_one(&state.fail_next)
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
            remaining.checked_sub(1)
        })
        .is_ok()
}

async fn login(State(state): State<MockState>, Json(body): Json<Value>) -> Response {
    state.login_attempts.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    if take_one(&state.fail_logins) {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "login unavailable");
    }

    let credentials = &body["passwordCredentials"];
    if credentials["username"] != USERNAME || credentials["password"] != PASSWORD {
        return error_response(StatusCode::UNAUTHORIZED, "incorrect login credentials");
    }

    let count = state.logins.fetch_add(1, Ordering::SeqCst) + 1;
    let token = format!("session-{count}");
    *state.valid_token.lock().unwrap() = token.clone();

    if state.cookie_only.load(Ordering::SeqCst) {
        let cookie = format!("memos.access-token={token}; Path=/; HttpOnly");
        return (
            [(header::SET_COOKIE, cookie)],
            Json(json!({ "user": user_json("1"), "lastAccessedAt": TIMESTAMP })),
        )
            .into_response();
    }
    if state.short_sessions.load(Ordering::SeqCst) {
        let expires_at = (chrono::Utc::now() + chrono::Duration::seconds(30)).to_rfc3339();
        return Json(json!({
            "user": user_json("1"),
            "accessToken": token,
            "expiresAt": expires_at,
        }))
        .into_response();
    }
    Json(json!({ "user": user_json("1"), "accessToken": token })).into_response()
}

async fn current_session(State(state): State<MockState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    Json(json!({ "user": user_json("1"), "lastAccessedAt": TIMESTAMP })).into_response()
}

async fn delete_session(State(state): State<MockState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    state.sign_outs.fetch_add(1, Ordering::SeqCst);
    state.valid_token.lock().unwrap().clear();
    Json(json!({})).into_response()
}

fn tag_filter() -> Regex {
    Regex::new(r#"tags\.any\("([^"]+)"\)"#).unwrap()
}

async fn search_memos(
    State(state): State<MockState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    if take_failure(&state) {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "try again");
    }

    let wanted: Vec<String> = params
        .get("filter")
        .map(|filter| {
            tag_filter()
                .captures_iter(filter)
                .map(|capture| capture[1].to_string())
                .collect()
        })
        .unwrap_or_default();
    let memos: Vec<Value> = state
        .memos
        .lock()
        .unwrap()
        .values()
        .filter(|memo| {
            wanted.is_empty()
                || memo["tags"]
                    .as_array()
                    .is_some_and(|tags| tags.iter().any(|tag| wanted.iter().any(|w| tag == w.as_str())))
        })
        .cloned()
        .collect();
    Json(json!({ "memos": memos, "nextPageToken": "" })).into_response()
}

async fn create_memo(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    state.memo_creates.fetch_add(1, Ordering::SeqCst);
    if take_failure(&state) {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "try again");
    }

    let content = body["memo"]["content"].as_str().unwrap_or_default().to_string();
    if state.rejected_contents.lock().unwrap().contains(&content) {
        return error_response(StatusCode::BAD_REQUEST, "content rejected");
    }
    let visibility = body["memo"]["visibility"].as_str().unwrap_or("PRIVATE");
    let id = body["memoId"].as_str().map_or_else(
        || format!("m{}", state.next_id.fetch_add(1, Ordering::SeqCst) + 1),
        str::to_string,
    );
    let memo = memo_json(&id, &content, visibility);
    state.memos.lock().unwrap().insert(id, memo.clone());
    Json(memo).into_response()
}

async fn get_memo(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    state.memo_gets.fetch_add(1, Ordering::SeqCst);
    if take_failure(&state) {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "try again");
    }

    match id.as_str() {
        "slow" => {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Json(memo_json("slow", "late", "PRIVATE")).into_response()
        }
        "weird" => Json(memo_json("weird", "odd", "WEIRD")).into_response(),
        _ => match state.memos.lock().unwrap().get(&id) {
            Some(memo) => Json(memo.clone()).into_response(),
            None => error_response(StatusCode::NOT_FOUND, "memo not found"),
        },
    }
}

async fn update_memo(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    let mut memos = state.memos.lock().unwrap();
    let Some(memo) = memos.get_mut(&id) else {
        return error_response(StatusCode::NOT_FOUND, "memo not found");
    };
    let paths = body["updateMask"]["paths"].as_array().cloned().unwrap_or_default();
    for path in paths.iter().filter_map(Value::as_str) {
        match path {
            "content" => {
                let content = body["memo"]["content"].as_str().unwrap_or_default();
                let visibility = memo["visibility"].as_str().unwrap_or("PRIVATE").to_string();
                let pinned = memo["pinned"].clone();
                *memo = memo_json(&id, content, &visibility);
                memo["pinned"] = pinned;
            }
            "display_time" => memo["displayTime"] = body["memo"]["displayTime"].clone(),
            other => memo[other] = body["memo"][other].clone(),
        }
    }
    Json(memo.clone()).into_response()
}

async fn delete_memo(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    match state.memos.lock().unwrap().remove(&id) {
        Some(_) => Json(json!({})).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "memo not found"),
    }
}

async fn set_memo_attachments(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    if state.fail_attachment_links.load(Ordering::SeqCst) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "attachment update failed");
    }
    let names: Vec<Value> = body["attachments"]
        .as_array()
        .map(|items| items.iter().map(|item| item["name"].clone()).collect())
        .unwrap_or_default();

    let mut attachments = state.attachments.lock().unwrap();
    for name in names.iter().filter_map(Value::as_str) {
        if let Some(attachment) = attachments.get_mut(name.trim_start_matches("attachments/")) {
            attachment["memo"] = json!(format!("memos/{id}"));
        }
    }
    match state.memos.lock().unwrap().get_mut(&id) {
        Some(memo) => {
            memo["attachments"] = Value::Array(
                names.into_iter().map(|name| json!({ "name": name })).collect(),
            );
            Json(json!({})).into_response()
        }
        None => error_response(StatusCode::NOT_FOUND, "memo not found"),
    }
}

async fn list_memo_attachments(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    let memo_name = format!("memos/{id}");
    let attachments: Vec<Value> = state
        .attachments
        .lock()
        .unwrap()
        .values()
        .filter(|attachment| attachment["memo"] == memo_name.as_str())
        .cloned()
        .collect();
    Json(json!({ "attachments": attachments })).into_response()
}

async fn upload_attachment(
    State(state): State<MockState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }

    let mut filename = String::new();
    let mut mime_type = String::new();
    let mut size = 0_usize;
    while let Ok(Some(mut field)) = multipart.next_field().await {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                while let Ok(Some(chunk)) = field.chunk().await {
                    size += chunk.len();
                }
            }
            Some("filename") => filename = field.text().await.unwrap_or_default(),
            Some("type") => mime_type = field.text().await.unwrap_or_default(),
            _ => {}
        }
    }
    state.uploaded_bytes.store(size, Ordering::SeqCst);

    let id = format!("a{}", state.next_id.fetch_add(1, Ordering::SeqCst) + 1);
    let attachment = json!({
        "name": format!("attachments/{id}"),
        "createTime": TIMESTAMP,
        "filename": filename,
        "type": mime_type,
        "size": size.to_string(),
    });
    state
        .attachments
        .lock()
        .unwrap()
        .insert(id, attachment.clone());
    Json(attachment).into_response()
}

async fn list_attachments(State(state): State<MockState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    let attachments: Vec<Value> = state.attachments.lock().unwrap().values().cloned().collect();
    Json(json!({ "attachments": attachments })).into_response()
}

async fn get_attachment(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    match state.attachments.lock().unwrap().get(&id) {
        Some(attachment) => Json(attachment.clone()).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "attachment not found"),
    }
}

async fn delete_attachment(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    match state.attachments.lock().unwrap().remove(&id) {
        Some(_) => Json(json!({})).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "attachment not found"),
    }
}

async fn get_user(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    Json(user_json(&id)).into_response()
}

/// Serves `size` bytes of the stored attachment, each byte `b'z'`.
async fn download_file(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path((id, _filename)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    state.download_requests.lock().unwrap().push(params);
    let size = state
        .attachments
        .lock()
        .unwrap()
        .get(&id)
        .and_then(|attachment| attachment["size"].as_str().and_then(|size| size.parse().ok()));
    match size {
        Some(size) => vec![b'z'; size].into_response(),
        None => error_response(StatusCode::NOT_FOUND, "file not found"),
    }
}
