// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Minimal W3C WebDriver client (chromedriver, geckodriver, Selenium grid).
//!
//! Covers only what offboarding needs: sessions, navigation, element lookup,
//! click, typing, and text.

use std::time::Duration;

use serde_json::{json, Value};

/// W3C element reference key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Handle to a WebDriver server.
#[derive(Clone)]
pub struct WebDriver {
    http: reqwest::Client,
    base_url: String,
}

/// Opaque element id within a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element(pub String);

impl WebDriver {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url: base_url.trim_end_matches('/').to_owned() }
    }

    /// Start a browser session. The returned [`Session`] must be closed;
    /// dropping it unclosed fires a best-effort delete in the background.
    pub async fn new_session(&self, capabilities: &Value) -> anyhow::Result<Session> {
        let resp = self
            .http
            .post(format!("{}/session", self.base_url))
            .json(&json!({ "capabilities": capabilities }))
            .send()
            .await?;
        let value = unwrap_value(resp).await?;
        let id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("webdriver returned no sessionId"))?
            .to_owned();
        tracing::debug!(session = %id, "webdriver session opened");
        Ok(Session { http: self.http.clone(), base_url: self.base_url.clone(), id, closed: false })
    }
}

/// A live browser session.
pub struct Session {
    http: reqwest::Client,
    base_url: String,
    id: String,
    closed: bool,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn url(&self, path: &str) -> String {
        format!("{}/session/{}{path}", self.base_url, self.id)
    }

    async fn post(&self, path: &str, body: Value) -> anyhow::Result<Value> {
        let resp = self.http.post(self.url(path)).json(&body).send().await?;
        unwrap_value(resp).await
    }

    pub async fn navigate(&self, url: &str) -> anyhow::Result<()> {
        self.post("/url", json!({ "url": url })).await?;
        Ok(())
    }

    /// First element matching `css`, or `None` if there is none.
    pub async fn find(&self, css: &str) -> anyhow::Result<Option<Element>> {
        element_or_none(self.post("/element", locator(css)).await)
    }

    /// First element matching `css` inside `parent`.
    pub async fn find_within(&self, parent: &Element, css: &str) -> anyhow::Result<Option<Element>> {
        element_or_none(self.post(&format!("/element/{}/element", parent.0), locator(css)).await)
    }

    pub async fn find_all(&self, css: &str) -> anyhow::Result<Vec<Element>> {
        let value = self.post("/elements", locator(css)).await?;
        Ok(value
            .as_array()
            .map(|items| items.iter().filter_map(element_id).collect())
            .unwrap_or_default())
    }

    /// Poll for `css` until it appears or `timeout` elapses.
    pub async fn wait_for(&self, css: &str, timeout: Duration) -> anyhow::Result<Element> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(el) = self.find(css).await? {
                return Ok(el);
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("timed out after {timeout:?} waiting for {css:?}");
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    pub async fn click(&self, el: &Element) -> anyhow::Result<()> {
        self.post(&format!("/element/{}/click", el.0), json!({})).await?;
        Ok(())
    }

    pub async fn send_keys(&self, el: &Element, text: &str) -> anyhow::Result<()> {
        self.post(&format!("/element/{}/value", el.0), json!({ "text": text })).await?;
        Ok(())
    }

    pub async fn text(&self, el: &Element) -> anyhow::Result<String> {
        let resp = self.http.get(self.url(&format!("/element/{}/text", el.0))).send().await?;
        let value = unwrap_value(resp).await?;
        Ok(value.as_str().unwrap_or_default().to_owned())
    }

    /// End the session and release the browser.
    pub async fn close(mut self) -> anyhow::Result<()> {
        self.closed = true;
        let resp = self.http.delete(format!("{}/session/{}", self.base_url, self.id)).send().await?;
        unwrap_value(resp).await?;
        tracing::debug!(session = %self.id, "webdriver session closed");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(session = %self.id, "webdriver session leaked (no runtime)");
            return;
        };
        let http = self.http.clone();
        let url = format!("{}/session/{}", self.base_url, self.id);
        let id = self.id.clone();
        handle.spawn(async move {
            if let Err(e) = http.delete(&url).send().await {
                tracing::warn!(session = %id, err = %e, "failed to delete dropped webdriver session");
            }
        });
    }
}

fn locator(css: &str) -> Value {
    json!({ "using": "css selector", "value": css })
}

fn element_id(v: &Value) -> Option<Element> {
    v.get(ELEMENT_KEY).and_then(Value::as_str).map(|s| Element(s.to_owned()))
}

fn element_or_none(result: anyhow::Result<Value>) -> anyhow::Result<Option<Element>> {
    match result {
        Ok(v) => Ok(element_id(&v)),
        Err(e) if e.downcast_ref::<NoSuchElement>().is_some() => Ok(None),
        Err(e) => Err(e),
    }
}

/// The W3C `no such element` error, distinguished so lookups can return `None`.
#[derive(Debug)]
struct NoSuchElement(String);

impl std::fmt::Display for NoSuchElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no such element: {}", self.0)
    }
}

impl std::error::Error for NoSuchElement {}

/// Extract `value` from a WebDriver response, turning W3C errors into `Err`.
async fn unwrap_value(resp: reqwest::Response) -> anyhow::Result<Value> {
    let status = resp.status();
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    let value = body.get("value").cloned().unwrap_or(Value::Null);
    if status.is_success() {
        return Ok(value);
    }
    let error = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
    let message = value.get("message").and_then(Value::as_str).unwrap_or_default();
    if error == "no such element" {
        return Err(NoSuchElement(message.to_owned()).into());
    }
    anyhow::bail!("webdriver {status}: {error}: {message}")
}
