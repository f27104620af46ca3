// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `offboard` binary as a subprocess against an in-process
//! identity provider and directory API ([`Upstream`]).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::{Child, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Resolve the path to the compiled `offboard` binary.
pub fn offboard_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("offboard")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

// -- Upstream -----------------------------------------------------------------

#[derive(Default)]
struct UpstreamState {
    users: Mutex<Vec<Value>>,
    issued: AtomicU32,
    reject_refresh: AtomicBool,
    grants: Mutex<Vec<String>>,
}

/// Fake token endpoint (`POST /oauth/token`) and users API (`GET /users/`).
///
/// Issued tokens are `access-<n>` / `refresh-<n>`; the users API only
/// accepts access tokens this server issued.
pub struct Upstream {
    pub addr: SocketAddr,
    state: Arc<UpstreamState>,
}

impl Upstream {
    pub async fn start(users: Vec<Value>) -> anyhow::Result<Self> {
        let state = Arc::new(UpstreamState { users: Mutex::new(users), ..Default::default() });
        let app = Router::new()
            .route("/oauth/token", post(issue_token))
            .route("/users/", get(list_users))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Ok(Self { addr, state })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Tokens issued so far.
    pub fn issued(&self) -> u32 {
        self.state.issued.load(Ordering::Relaxed)
    }

    /// Raw form bodies of every token request.
    pub fn grants(&self) -> Vec<String> {
        self.state.grants.lock().clone()
    }

    /// Answer every token request with `401 invalid_grant`.
    pub fn reject_refresh(&self) {
        self.state.reject_refresh.store(true, Ordering::Relaxed);
    }
}

async fn issue_token(State(s): State<Arc<UpstreamState>>, body: String) -> Response {
    s.grants.lock().push(body);
    if s.reject_refresh.load(Ordering::Relaxed) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid_grant" }))).into_response();
    }
    let n = s.issued.fetch_add(1, Ordering::Relaxed) + 1;
    Json(json!({
        "access_token": format!("access-{n}"),
        "refresh_token": format!("refresh-{n}"),
        "expires_in": 86399,
        "locationId": "loc-1",
    }))
    .into_response()
}

async fn list_users(State(s): State<Arc<UpstreamState>>, headers: HeaderMap) -> Response {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Bearer access-"));
    if !authorized {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Invalid JWT" }))).into_response();
    }
    Json(json!({ "users": s.users.lock().clone() })).into_response()
}

/// A user record as the directory API returns it.
pub fn user(id: &str, first: &str, email: &str) -> Value {
    json!({ "id": id, "firstName": first, "lastName": "Test", "email": email })
}

// -- Workspace ----------------------------------------------------------------

/// Ambient settings that would override the flags under test.
const CLEARED_ENV: [&str; 7] = [
    "GHL_CLIENT_ID",
    "GHL_CLIENT_SECRET",
    "GHL_REFRESH_TOKEN",
    "GHL_LOCATION_ID",
    "GHL_LOGIN_EMAIL",
    "GHL_LOGIN_PASSWORD",
    "OFFBOARD_REMOVAL_LIST",
];

/// Scratch directory plus the flags pointing `offboard` at an [`Upstream`].
pub struct Workspace {
    dir: tempfile::TempDir,
    token_url: String,
    api_base: String,
}

impl Workspace {
    pub fn new(upstream: &Upstream) -> anyhow::Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
            token_url: upstream.url("/oauth/token"),
            api_base: upstream.url(""),
        })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn token_file(&self) -> PathBuf {
        self.path("tokens.json")
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            "--client-id".into(),
            "client-1".into(),
            "--client-secret".into(),
            "secret-1".into(),
            "--token-file".into(),
            self.token_file().display().to_string(),
            "--token-url".into(),
            self.token_url.clone(),
            "--api-base".into(),
            self.api_base.clone(),
            "--location-id".into(),
            "loc-1".into(),
            "--log-level".into(),
            "warn".into(),
        ]
    }

    fn command(&self, binary: &Path) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(binary);
        cmd.current_dir(self.dir.path());
        for key in CLEARED_ENV {
            cmd.env_remove(key);
        }
        cmd
    }

    /// Run `offboard <global flags> <args>` to completion.
    pub async fn run(&self, args: &[&str]) -> anyhow::Result<std::process::Output> {
        let mut full = self.base_args();
        full.extend(args.iter().map(|a| (*a).to_owned()));
        self.run_raw(&full).await
    }

    /// Run `offboard` with exactly `args` (no global flags).
    pub async fn run_raw<S: AsRef<std::ffi::OsStr>>(
        &self,
        args: &[S],
    ) -> anyhow::Result<std::process::Output> {
        ensure_crypto();
        let binary = offboard_binary();
        anyhow::ensure!(binary.exists(), "offboard binary not found at {}", binary.display());

        let child = self
            .command(&binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let output = tokio::time::timeout(Duration::from_secs(30), child.wait_with_output())
            .await
            .map_err(|_| anyhow::anyhow!("offboard did not exit within 30s"))??;
        Ok(output)
    }

    /// Spawn the daemon on a free port.
    pub fn spawn_daemon(&self, extra: &[&str]) -> anyhow::Result<OffboardProcess> {
        ensure_crypto();
        let binary = offboard_binary();
        anyhow::ensure!(binary.exists(), "offboard binary not found at {}", binary.display());

        let port = free_port()?;
        let mut args = self.base_args();
        args.extend(["daemon".into(), "--host".into(), "127.0.0.1".into()]);
        args.extend(["--port".into(), port.to_string()]);
        args.extend(extra.iter().map(|a| (*a).to_owned()));

        let mut cmd = std::process::Command::new(&binary);
        cmd.current_dir(self.dir.path());
        for key in CLEARED_ENV {
            cmd.env_remove(key);
        }
        let child = cmd.args(&args).stdout(Stdio::null()).stderr(Stdio::null()).spawn()?;
        Ok(OffboardProcess { child, port })
    }
}

// -- Daemon process -----------------------------------------------------------

/// A running `offboard daemon` that is killed on drop.
pub struct OffboardProcess {
    child: Child,
    port: u16,
}

impl OffboardProcess {
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Poll health until the HTTP API answers.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let client = reqwest::Client::new();
        let url = format!("{}/api/v1/health", self.base_url());
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("offboard did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Poll health until `status` is `running` (a valid token is held).
    pub async fn wait_token(&self, timeout: Duration) -> anyhow::Result<Value> {
        let client = reqwest::Client::new();
        let url = format!("{}/api/v1/health", self.base_url());
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("offboard never obtained a token within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if let Ok(body) = resp.json::<Value>().await {
                    if body["status"] == "running" {
                        return Ok(body);
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Send SIGTERM.
    pub fn terminate(&self) -> anyhow::Result<()> {
        let pid = nix::unistd::Pid::from_raw(i32::try_from(self.child.id())?);
        nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM)?;
        Ok(())
    }

    /// Wait for the process to exit within `timeout`.
    pub async fn wait_exit(
        &mut self,
        timeout: Duration,
    ) -> anyhow::Result<std::process::ExitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("offboard did not exit within {timeout:?}");
            }
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for OffboardProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
