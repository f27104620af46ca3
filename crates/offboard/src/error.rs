// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Errors surfaced by the token lifecycle, directory and offboarding layers.
///
/// Each variant maps to a propagation policy: transient conditions are
/// retried where they occur, auth failures expedite token renewal, and only
/// [`Error::FatalRenewal`] terminates the process.
#[derive(Debug)]
pub enum Error {
    /// The remote side rejected our credentials.
    Auth(String),
    /// Connect/timeout/5xx/429. Safe to retry with bounded backoff.
    TransientNetwork(String),
    /// Renewal failed too many times in a row.
    FatalRenewal { failures: u32, last: String },
    /// A browser-automation step failed for one offboarding target.
    AutomationStep { target: String, step: String, message: String },
    /// Attempted to store a token that is already expired.
    InvalidTokenState(String),
    /// The stored token is past its expiry and must not be handed out.
    TokenExpired,
    /// Another pipeline run holds the run lock.
    RunInProgress { pid: u32 },
    Config(String),
    Io(std::io::Error),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(_) => "AUTH_ERROR",
            Self::TransientNetwork(_) => "TRANSIENT_NETWORK_ERROR",
            Self::FatalRenewal { .. } => "FATAL_RENEWAL_FAILURE",
            Self::AutomationStep { .. } => "AUTOMATION_STEP_FAILURE",
            Self::InvalidTokenState(_) => "INVALID_TOKEN_STATE",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::RunInProgress { .. } => "RUN_IN_PROGRESS",
            Self::Config(_) => "CONFIG",
            Self::Io(_) => "IO",
        }
    }

    /// Whether the operation may succeed if repeated unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }

    /// Classify a reqwest transport error (no HTTP status available).
    pub fn from_transport(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self::from_status(status.as_u16(), &e.to_string());
        }
        Self::TransientNetwork(e.to_string())
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => Self::Auth(format!("HTTP {status}: {body}")),
            408 | 429 | 500..=599 => Self::TransientNetwork(format!("HTTP {status}: {body}")),
            _ => Self::Config(format!("unexpected HTTP {status}: {body}")),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth(msg) => write!(f, "auth error: {msg}"),
            Self::TransientNetwork(msg) => write!(f, "transient network error: {msg}"),
            Self::FatalRenewal { failures, last } => {
                write!(f, "token renewal failed {failures} times in a row (last: {last})")
            }
            Self::AutomationStep { target, step, message } => {
                write!(f, "automation step {step:?} failed for {target}: {message}")
            }
            Self::InvalidTokenState(msg) => write!(f, "invalid token state: {msg}"),
            Self::TokenExpired => f.write_str("token expired"),
            Self::RunInProgress { pid } => write!(f, "another run is in progress (pid {pid})"),
            Self::Config(msg) => write!(f, "config error: {msg}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Config(format!("invalid JSON: {e}"))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
