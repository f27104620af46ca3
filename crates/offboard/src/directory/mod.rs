// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace directory: paginated member listing with dedup and retry.

pub mod client;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::token::{Token, TokenReader};
use crate::BoxFuture;

pub use client::HighLevelDirectory;

/// Membership status as reported by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Deactivated,
    Unknown,
}

/// One workspace member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub identifier: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub status: MemberStatus,
}

impl DirectoryEntry {
    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }

    pub fn email_matches(&self, email: &str) -> bool {
        self.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email.trim()))
    }
}

/// One page of results plus the cursor for the next one.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub entries: Vec<DirectoryEntry>,
    pub next_cursor: Option<String>,
}

/// Paginated listing endpoint.
pub trait DirectoryApi: Send + Sync {
    fn fetch_page<'a>(
        &'a self,
        token: &'a Token,
        cursor: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Page>>;
}

/// Local retry budget for transient page failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Upper bound on pages per listing.
const MAX_PAGES: usize = 1000;

/// Reads the full directory using the current token.
pub struct DirectoryFetcher {
    api: Arc<dyn DirectoryApi>,
    tokens: TokenReader,
    retry: RetryPolicy,
}

impl DirectoryFetcher {
    pub fn new(api: Arc<dyn DirectoryApi>, tokens: TokenReader) -> Self {
        Self { api, tokens, retry: RetryPolicy::default() }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// All members, ordered by identifier, one entry per identifier.
    ///
    /// On [`Error::Auth`] or [`Error::TokenExpired`] the refresher is asked to
    /// renew and the error is returned; the same token is never retried.
    pub async fn fetch_all(&self) -> Result<Vec<DirectoryEntry>> {
        let mut by_id: BTreeMap<String, DirectoryEntry> = BTreeMap::new();
        let mut seen_cursors: HashSet<String> = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self.fetch_page_with_retry(cursor.as_deref()).await?;
            pages += 1;
            debug!(page = pages, entries = page.entries.len(), "directory page fetched");

            for entry in page.entries {
                // Later pages win: they reflect the most recent state.
                by_id.insert(entry.identifier.clone(), entry);
            }

            match page.next_cursor {
                Some(next) if seen_cursors.insert(next.clone()) => {
                    if pages >= MAX_PAGES {
                        warn!(pages, "directory page limit reached, stopping");
                        break;
                    }
                    cursor = Some(next);
                }
                Some(next) => {
                    warn!(cursor = %next, "directory returned a repeated cursor, stopping");
                    break;
                }
                None => break,
            }
        }

        info!(members = by_id.len(), pages, "directory loaded");
        Ok(by_id.into_values().collect())
    }

    /// Case-insensitive email lookup over the full directory.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<DirectoryEntry>> {
        let entries = self.fetch_all().await?;
        Ok(entries.into_iter().find(|e| e.email_matches(email)))
    }

    async fn fetch_page_with_retry(&self, cursor: Option<&str>) -> Result<Page> {
        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let token = match self.tokens.get_current() {
                Ok(t) => t,
                Err(e) => {
                    self.tokens.request_renewal();
                    return Err(e);
                }
            };
            match self.api.fetch_page(&token, cursor).await {
                Ok(page) => return Ok(page),
                Err(Error::Auth(msg)) => {
                    warn!(err = %msg, "directory rejected token, requesting renewal");
                    self.tokens.request_renewal();
                    return Err(Error::Auth(msg));
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    warn!(attempt, max = self.retry.max_attempts, err = %e, "directory page failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.retry.max_backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Write a JSON snapshot of the directory.
pub fn save_snapshot(path: &Path, entries: &[DirectoryEntry]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(entries)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
