// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers: scripted fakes for every external capability and a
//! tiny mock HTTP server.

#![allow(clippy::expect_used)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::browser::{AccountDeactivator, Deactivation};
use crate::directory::{DirectoryApi, DirectoryEntry, MemberStatus, Page};
use crate::error::{Error, Result};
use crate::token::{epoch_secs, Token, TokenExchange};
use crate::BoxFuture;

/// Assert that `$expr` is an `Err` whose message contains `$substr`.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}

/// Build an unsigned JWT carrying `payload`.
pub fn fake_jwt(payload: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.signature")
}

/// Token expiring `ttl_secs` from now.
pub fn token_expiring_in(access: &str, ttl_secs: u64) -> Token {
    Token::new(access.to_owned(), format!("refresh-{access}"), epoch_secs() + ttl_secs)
}

/// HTTP client with a short timeout for talking to local fakes.
pub fn test_http() -> reqwest::Client {
    crate::http_client(Duration::from_secs(5)).expect("build test HTTP client")
}

/// A request captured by [`MockServer`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub body: String,
}

/// HTTP server answering every request with the next scripted
/// `(status, body)`; the last response repeats once the script runs out.
pub struct MockServer {
    pub addr: SocketAddr,
    calls: Arc<AtomicU32>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockServer {
    pub async fn start(responses: Vec<(u16, String)>) -> Self {
        let calls = Arc::new(AtomicU32::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let responses = Arc::new(responses);

        let app = {
            let calls = Arc::clone(&calls);
            let requests = Arc::clone(&requests);
            Router::new().fallback(move |req: Request| {
                let calls = Arc::clone(&calls);
                let requests = Arc::clone(&requests);
                let responses = Arc::clone(&responses);
                async move {
                    let (parts, body) = req.into_parts();
                    let body = axum::body::to_bytes(body, 1 << 20).await.unwrap_or_default();
                    requests.lock().push(RecordedRequest {
                        method: parts.method.to_string(),
                        path: parts.uri.path().to_owned(),
                        query: parts.uri.query().map(str::to_owned),
                        authorization: parts
                            .headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_owned),
                        body: String::from_utf8_lossy(&body).into_owned(),
                    });
                    let idx = calls.fetch_add(1, Ordering::Relaxed) as usize;
                    let (status, body) = responses
                        .get(idx)
                        .or_else(|| responses.last())
                        .cloned()
                        .unwrap_or((500, "{}".to_owned()));
                    (
                        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                        [("content-type", "application/json")],
                        body,
                    )
                }
            })
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Self { addr, calls, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

/// One scripted renewal result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renewal {
    /// A token valid for this many seconds.
    Valid(u64),
    Transient,
    Rejected,
}

/// [`TokenExchange`] that replays a script of outcomes. Successful renewals
/// are named `renewed-<n>`; the last entry repeats.
pub struct ScriptedExchange {
    script: Mutex<VecDeque<Renewal>>,
    last: Mutex<Renewal>,
    calls: AtomicU32,
}

impl ScriptedExchange {
    pub fn new(script: Vec<Renewal>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(Renewal::Transient),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    fn next(&self, current: &Token) -> Result<Token> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let step = {
            let mut last = self.last.lock();
            if let Some(step) = self.script.lock().pop_front() {
                *last = step;
            }
            *last
        };
        match step {
            Renewal::Valid(ttl) => Ok(Token {
                access_token: format!("renewed-{n}"),
                refresh_token: format!("refresh-renewed-{n}"),
                expires_at: epoch_secs() + ttl,
                fetched_at: epoch_secs(),
                location_id: current.location_id.clone(),
                company_id: current.company_id.clone(),
            }),
            Renewal::Transient => Err(Error::TransientNetwork(format!("scripted failure {n}"))),
            Renewal::Rejected => Err(Error::Auth(format!("scripted rejection {n}"))),
        }
    }
}

impl TokenExchange for ScriptedExchange {
    fn exchange<'a>(&'a self, current: &'a Token) -> BoxFuture<'a, Result<Token>> {
        let out = self.next(current);
        Box::pin(async move { out })
    }
}

/// Directory entry with a derived display name and email.
pub fn member(id: &str, status: MemberStatus) -> DirectoryEntry {
    DirectoryEntry {
        identifier: id.to_owned(),
        display_name: format!("Member {id}"),
        email: Some(format!("{id}@example.com")),
        status,
    }
}

/// Single-page [`DirectoryApi`] with an optional queue of failures served
/// before the page.
pub struct StaticDirectory {
    entries: Vec<DirectoryEntry>,
    failures: Mutex<VecDeque<Error>>,
    calls: AtomicU32,
}

impl StaticDirectory {
    pub fn new(entries: Vec<DirectoryEntry>) -> Arc<Self> {
        Arc::new(Self { entries, failures: Mutex::new(VecDeque::new()), calls: AtomicU32::new(0) })
    }

    pub fn fail_next(&self, err: Error) {
        self.failures.lock().push_back(err);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl DirectoryApi for StaticDirectory {
    fn fetch_page<'a>(
        &'a self,
        _token: &'a Token,
        _cursor: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Page>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let out = match self.failures.lock().pop_front() {
            Some(e) => Err(e),
            None => Ok(Page { entries: self.entries.clone(), next_cursor: None }),
        };
        Box::pin(async move { out })
    }
}

/// One scripted deactivation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Deactivate,
    AlreadyGone,
    Fail,
}

/// [`AccountDeactivator`] with per-target scripts. Unscripted targets
/// deactivate successfully.
#[derive(Default)]
pub struct FakeDeactivator {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    attempts: Mutex<Vec<String>>,
    delay: Mutex<Duration>,
}

impl FakeDeactivator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(self: &Arc<Self>, target: &str, steps: &[Step]) -> Arc<Self> {
        self.scripts.lock().insert(target.to_owned(), steps.iter().copied().collect());
        Arc::clone(self)
    }

    /// Make every attempt take `delay` before it resolves.
    pub fn with_delay(self: &Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.delay.lock() = delay;
        Arc::clone(self)
    }

    /// Identifiers in the order attempts were made.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().clone()
    }
}

impl AccountDeactivator for FakeDeactivator {
    fn deactivate<'a>(&'a self, target: &'a DirectoryEntry) -> BoxFuture<'a, Result<Deactivation>> {
        self.attempts.lock().push(target.identifier.clone());
        let step = self
            .scripts
            .lock()
            .get_mut(&target.identifier)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Step::Deactivate);
        let out = match step {
            Step::Deactivate => Ok(Deactivation::Deactivated),
            Step::AlreadyGone => Ok(Deactivation::AlreadyDeactivated),
            Step::Fail => Err(Error::AutomationStep {
                target: target.identifier.clone(),
                step: "deactivate".into(),
                message: "scripted failure".into(),
            }),
        };
        let delay = *self.delay.lock();
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            out
        })
    }
}

/// Page model served by [`FakeBrowser`]: which selectors currently match and
/// how clicks change that.
#[derive(Debug, Default)]
pub struct FakePage {
    /// Matching selectors and the text of the element each one finds.
    present: HashMap<String, String>,
    reveal_on_click: HashMap<String, Vec<(String, String)>>,
    hide_on_click: HashMap<String, Vec<String>>,
    /// Element id (index) to the selector that found it.
    elements: Vec<String>,
    pub navigations: Vec<String>,
    pub clicks: Vec<String>,
    pub typed: Vec<(String, String)>,
    pub sessions_opened: u32,
    pub sessions_deleted: u32,
    /// Refuse to open sessions (driver unavailable).
    pub refuse_sessions: bool,
}

impl FakePage {
    pub fn with(mut self, selector: &str, text: &str) -> Self {
        self.present.insert(selector.to_owned(), text.to_owned());
        self
    }

    /// Clicking `clicked` makes `selector` appear.
    pub fn reveal_on_click(mut self, clicked: &str, selector: &str, text: &str) -> Self {
        self.reveal_on_click
            .entry(clicked.to_owned())
            .or_default()
            .push((selector.to_owned(), text.to_owned()));
        self
    }

    /// Clicking `clicked` makes `selector` disappear.
    pub fn hide_on_click(mut self, clicked: &str, selector: &str) -> Self {
        self.hide_on_click.entry(clicked.to_owned()).or_default().push(selector.to_owned());
        self
    }

    fn lookup(&mut self, selector: &str) -> Option<String> {
        if !self.present.contains_key(selector) {
            return None;
        }
        self.elements.push(selector.to_owned());
        Some(format!("el-{}", self.elements.len() - 1))
    }

    fn selector_of(&self, element: &str) -> Option<String> {
        let idx: usize = element.strip_prefix("el-")?.parse().ok()?;
        self.elements.get(idx).cloned()
    }
}

type PageState = Arc<Mutex<FakePage>>;

/// In-process W3C WebDriver server backed by a [`FakePage`].
pub struct FakeBrowser {
    pub addr: SocketAddr,
    page: PageState,
}

impl FakeBrowser {
    pub async fn start(page: FakePage) -> Self {
        let page = Arc::new(Mutex::new(page));
        let app = Router::new()
            .route("/session", post(fake_new_session))
            .route("/session/{sid}", axum::routing::delete(fake_delete_session))
            .route("/session/{sid}/url", post(fake_navigate))
            .route("/session/{sid}/element", post(fake_find))
            .route("/session/{sid}/elements", post(fake_find_all))
            .route("/session/{sid}/element/{eid}/element", post(fake_find_within))
            .route("/session/{sid}/element/{eid}/click", post(fake_click))
            .route("/session/{sid}/element/{eid}/value", post(fake_send_keys))
            .route("/session/{sid}/element/{eid}/text", get(fake_text))
            .with_state(Arc::clone(&page));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake browser");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Self { addr, page }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Inspect the page state.
    pub fn page(&self) -> parking_lot::MutexGuard<'_, FakePage> {
        self.page.lock()
    }
}

fn w3c_ok(value: Value) -> Response {
    Json(json!({ "value": value })).into_response()
}

fn w3c_no_such_element(selector: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "value": {
            "error": "no such element",
            "message": format!("no element matches {selector}"),
        }})),
    )
        .into_response()
}

fn element_json(id: &str) -> Value {
    json!({ "element-6066-11e4-a52e-4f735466cecf": id })
}

fn css_of(body: &Value) -> String {
    body.get("value").and_then(Value::as_str).unwrap_or_default().to_owned()
}

async fn fake_new_session(State(page): State<PageState>) -> Response {
    let mut page = page.lock();
    if page.refuse_sessions {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "value": { "error": "session not created", "message": "no browser" } })),
        )
            .into_response();
    }
    page.sessions_opened += 1;
    w3c_ok(json!({ "sessionId": format!("sess-{}", page.sessions_opened), "capabilities": {} }))
}

async fn fake_delete_session(State(page): State<PageState>) -> Response {
    page.lock().sessions_deleted += 1;
    w3c_ok(Value::Null)
}

async fn fake_navigate(State(page): State<PageState>, Json(body): Json<Value>) -> Response {
    let url = body.get("url").and_then(Value::as_str).unwrap_or_default().to_owned();
    page.lock().navigations.push(url);
    w3c_ok(Value::Null)
}

async fn fake_find(State(page): State<PageState>, Json(body): Json<Value>) -> Response {
    let css = css_of(&body);
    match page.lock().lookup(&css) {
        Some(id) => w3c_ok(element_json(&id)),
        None => w3c_no_such_element(&css),
    }
}

async fn fake_find_within(
    State(page): State<PageState>,
    Path((_sid, _parent)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let css = css_of(&body);
    match page.lock().lookup(&css) {
        Some(id) => w3c_ok(element_json(&id)),
        None => w3c_no_such_element(&css),
    }
}

async fn fake_find_all(State(page): State<PageState>, Json(body): Json<Value>) -> Response {
    let css = css_of(&body);
    let found: Vec<Value> = page.lock().lookup(&css).iter().map(|id| element_json(id)).collect();
    w3c_ok(Value::Array(found))
}

async fn fake_click(
    State(page): State<PageState>,
    Path((_sid, eid)): Path<(String, String)>,
) -> Response {
    let mut page = page.lock();
    let Some(selector) = page.selector_of(&eid) else {
        return w3c_no_such_element(&eid);
    };
    page.clicks.push(selector.clone());
    if let Some(hidden) = page.hide_on_click.get(&selector).cloned() {
        for s in hidden {
            page.present.remove(&s);
        }
    }
    if let Some(revealed) = page.reveal_on_click.get(&selector).cloned() {
        page.present.extend(revealed);
    }
    w3c_ok(Value::Null)
}

async fn fake_send_keys(
    State(page): State<PageState>,
    Path((_sid, eid)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let mut page = page.lock();
    let selector = page.selector_of(&eid).unwrap_or_default();
    let text = body.get("text").and_then(Value::as_str).unwrap_or_default().to_owned();
    page.typed.push((selector, text));
    w3c_ok(Value::Null)
}

async fn fake_text(
    State(page): State<PageState>,
    Path((_sid, eid)): Path<(String, String)>,
) -> Response {
    let page = page.lock();
    let text = page.selector_of(&eid).and_then(|s| page.present.get(&s).cloned());
    w3c_ok(Value::String(text.unwrap_or_default()))
}
