// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP surface of the daemon.

pub mod http;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::directory::{DirectoryEntry, DirectoryFetcher};
use crate::pipeline::{Pipeline, RunSummary};
use crate::token::TokenReader;

/// Most recent directory listing.
#[derive(Debug, Clone, Serialize)]
pub struct DirectorySnapshot {
    pub fetched_at: u64,
    pub users: Vec<DirectoryEntry>,
}

/// Shared daemon state.
pub struct AppState {
    pub tokens: TokenReader,
    pub fetcher: Arc<DirectoryFetcher>,
    /// `None` when no removal list is configured.
    pub pipeline: Option<Arc<Pipeline>>,
    pub directory: RwLock<Option<DirectorySnapshot>>,
    pub last_run: RwLock<Option<RunSummary>>,
    /// Serializes runs triggered through this process. Owned guards move
    /// into the spawned run task.
    pub run_gate: Arc<tokio::sync::Mutex<()>>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        tokens: TokenReader,
        fetcher: Arc<DirectoryFetcher>,
        pipeline: Option<Arc<Pipeline>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            tokens,
            fetcher,
            pipeline,
            directory: RwLock::new(None),
            last_run: RwLock::new(None),
            run_gate: Arc::new(tokio::sync::Mutex::new(())),
            shutdown,
        }
    }

    pub fn store_directory(&self, fetched_at: u64, users: Vec<DirectoryEntry>) {
        *self.directory.write() = Some(DirectorySnapshot { fetched_at, users });
    }
}

/// Build the axum `Router` with all daemon routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::health))
        .route("/api/v1/users", get(http::list_users))
        .route("/api/v1/runs", post(http::trigger_run))
        .route("/api/v1/runs/last", get(http::last_run))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
