// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OAuth token lifecycle: the shared store, the background refresher, the
//! provider exchange, and on-disk persistence.

pub mod claims;
pub mod exchange;
pub mod persist;
pub mod refresher;
pub mod store;

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub use exchange::{OAuthExchange, TokenExchange};
pub use refresher::{RefreshPolicy, Refresher};
pub use store::{token_store, TokenReader, TokenWriter};

/// An access/refresh token pair with its expiry.
///
/// Replaced as a whole on every renewal, never edited field by field.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry as epoch seconds.
    pub expires_at: u64,
    /// When this token was obtained, epoch seconds.
    #[serde(default)]
    pub fetched_at: u64,
    /// Location (sub-account) the token is scoped to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,
}

impl Token {
    /// Token with no location metadata, fetched now.
    pub fn new(access_token: String, refresh_token: String, expires_at: u64) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at,
            fetched_at: epoch_secs(),
            location_id: None,
            company_id: None,
        }
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(epoch_secs())
    }

    /// Remaining lifetime, zero once expired.
    pub fn remaining(&self) -> Duration {
        Duration::from_secs(self.expires_at.saturating_sub(epoch_secs()))
    }
}

// Secrets stay out of logs.
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("expires_at", &self.expires_at)
            .field("fetched_at", &self.fetched_at)
            .field("location_id", &self.location_id)
            .field("company_id", &self.company_id)
            .finish()
    }
}

fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}…({} chars)", secret.chars().count())
}

pub fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}
