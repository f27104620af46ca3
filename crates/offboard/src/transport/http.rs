// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the daemon.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::AppState;
use crate::error::Error;
use crate::token::epoch_secs;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `running`, or `token_expired` while no valid token is held.
    pub status: String,
    pub token_expires_in_secs: u64,
    pub token_renewals: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory_fetched_at: Option<u64>,
    pub offboarding_enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct UsersResponse {
    pub fetched_at: u64,
    pub count: usize,
    pub users: Vec<crate::directory::DirectoryEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UsersQuery {
    /// Fetch a fresh listing instead of serving the cached one.
    #[serde(default)]
    pub refresh: bool,
}

/// Error envelope with a machine-readable code.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    let body = ErrorResponse { error: ErrorBody { code: code.to_owned(), message: message.into() } };
    (status, Json(body)).into_response()
}

fn status_for(e: &Error) -> StatusCode {
    match e {
        Error::RunInProgress { .. } => StatusCode::CONFLICT,
        Error::Auth(_) | Error::TokenExpired => StatusCode::SERVICE_UNAVAILABLE,
        Error::TransientNetwork(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn from_error(e: &Error) -> Response {
    error_response(status_for(e), e.code(), e.to_string())
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let now = epoch_secs();
    let expires_at = s.tokens.expires_at();
    let status = if expires_at > now { "running" } else { "token_expired" };
    Json(HealthResponse {
        status: status.to_owned(),
        token_expires_in_secs: expires_at.saturating_sub(now),
        token_renewals: s.tokens.generation(),
        location_id: s.tokens.location_id(),
        directory_fetched_at: s.directory.read().as_ref().map(|d| d.fetched_at),
        offboarding_enabled: s.pipeline.is_some(),
    })
}

/// `GET /api/v1/users`: last directory snapshot, or a fresh one with
/// `?refresh=true`.
pub async fn list_users(
    State(s): State<Arc<AppState>>,
    Query(q): Query<UsersQuery>,
) -> Response {
    let cached = s.directory.read().is_some();
    if q.refresh || !cached {
        match s.fetcher.fetch_all().await {
            Ok(users) => s.store_directory(epoch_secs(), users),
            Err(e) => {
                warn!(err = %e, "directory fetch failed");
                return from_error(&e);
            }
        }
    }
    let snapshot = s.directory.read().clone();
    match snapshot {
        Some(d) => Json(UsersResponse { fetched_at: d.fetched_at, count: d.users.len(), users: d.users })
            .into_response(),
        None => error_response(StatusCode::SERVICE_UNAVAILABLE, "NO_DIRECTORY", "no directory snapshot yet"),
    }
}

/// `POST /api/v1/runs`: run the offboarding pipeline once and return the
/// summary. 409 while another run is in progress.
///
/// The run lives in its own task: a client that disconnects mid-run does not
/// abort it, and its summary still lands in `runs/last`.
pub async fn trigger_run(State(s): State<Arc<AppState>>) -> Response {
    let Some(pipeline) = s.pipeline.clone() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "OFFBOARDING_DISABLED",
            "no removal list configured",
        );
    };
    let Ok(gate) = Arc::clone(&s.run_gate).try_lock_owned() else {
        return error_response(StatusCode::CONFLICT, "RUN_IN_PROGRESS", "a run is already in progress");
    };

    info!("offboarding run triggered over HTTP");
    let state = Arc::clone(&s);
    let run = tokio::spawn(async move {
        let _gate = gate;
        let result = pipeline.run_once(&state.shutdown.child_token()).await;
        if let Ok(ref summary) = result {
            *state.last_run.write() = Some(summary.clone());
        }
        result
    });
    match run.await {
        Ok(Ok(summary)) => Json(summary).into_response(),
        Ok(Err(e)) => from_error(&e),
        Err(e) => {
            warn!(err = %e, "offboarding run task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", "run task failed")
        }
    }
}

/// `GET /api/v1/runs/last`
pub async fn last_run(State(s): State<Arc<AppState>>) -> Response {
    match s.last_run.read().clone() {
        Some(summary) => Json(summary).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "NO_RUN", "no run has completed yet"),
    }
}
