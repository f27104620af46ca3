// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background token refresher.
//!
//! Sleeps until `safety_margin` before expiry, exchanges the refresh value,
//! and swaps the new token into the store. Failures back off exponentially
//! and leave the last known-good token in place; after
//! `max_consecutive_failures` in a row the loop returns
//! [`Error::FatalRenewal`] so the process can exit.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{epoch_secs, persist, Token, TokenExchange, TokenWriter};
use crate::error::{Error, Result};

/// Timing knobs for the refresh loop.
#[derive(Debug, Clone)]
pub struct RefreshPolicy {
    /// Renew once the remaining lifetime drops below this.
    pub safety_margin: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Consecutive failures after which renewal is declared fatal.
    pub max_consecutive_failures: u32,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            safety_margin: Duration::from_secs(900),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            max_consecutive_failures: 8,
        }
    }
}

/// Sole owner of the [`TokenWriter`].
pub struct Refresher {
    writer: TokenWriter,
    exchange: Arc<dyn TokenExchange>,
    policy: RefreshPolicy,
    persist_path: Option<PathBuf>,
}

impl Refresher {
    pub fn new(writer: TokenWriter, exchange: Arc<dyn TokenExchange>, policy: RefreshPolicy) -> Self {
        Self { writer, exchange, policy, persist_path: None }
    }

    /// Persist every successful renewal to `path`.
    pub fn with_persist_path(mut self, path: PathBuf) -> Self {
        self.persist_path = Some(path);
        self
    }

    /// How long to sleep before the next renewal is due.
    pub fn time_until_due(&self) -> Duration {
        let remaining = self.writer.current().expires_at.saturating_sub(epoch_secs());
        Duration::from_secs(remaining).saturating_sub(self.policy.safety_margin)
    }

    /// Run until shutdown (`Ok`) or until renewal is declared fatal (`Err`).
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            margin_secs = self.policy.safety_margin.as_secs(),
            max_failures = self.policy.max_consecutive_failures,
            "token refresher started"
        );
        let mut failures = 0u32;
        let mut backoff = self.policy.initial_backoff;
        let mut floor = Duration::ZERO;

        loop {
            if failures == 0 {
                let wait = self.time_until_due().max(floor);
                if !wait.is_zero() {
                    debug!(sleep_secs = wait.as_secs(), "sleeping until next renewal");
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.writer.renewal_requested() => {
                            info!("expedited renewal requested");
                        }
                        _ = shutdown.cancelled() => {
                            info!("shutdown, stopping token refresher");
                            return Ok(());
                        }
                    }
                }
            } else {
                let wait = jittered(backoff);
                debug!(backoff_ms = wait.as_millis() as u64, "backing off before retry");
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shutdown.cancelled() => {
                        info!("shutdown, stopping token refresher");
                        return Ok(());
                    }
                }
                backoff = (backoff * 2).min(self.policy.max_backoff);
            }

            if shutdown.is_cancelled() {
                return Ok(());
            }

            // Dropping the in-flight exchange on shutdown is safe: the store
            // is only written after a complete response.
            let result = tokio::select! {
                r = self.renew_once() => r,
                _ = shutdown.cancelled() => {
                    info!("shutdown during renewal, abandoning request");
                    return Ok(());
                }
            };

            match result {
                Ok(token) => {
                    if failures > 0 {
                        info!(after_failures = failures, "token renewal recovered");
                    }
                    failures = 0;
                    backoff = self.policy.initial_backoff;
                    floor = self.pause_after(&token);
                    info!(
                        expires_in_secs = token.expires_at.saturating_sub(epoch_secs()),
                        location = token.location_id.as_deref().unwrap_or("-"),
                        "token renewed"
                    );
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        attempt = failures,
                        max = self.policy.max_consecutive_failures,
                        code = e.code(),
                        err = %e,
                        "token renewal failed"
                    );
                    if failures >= self.policy.max_consecutive_failures {
                        error!(failures, "token renewal failed persistently, giving up");
                        return Err(Error::FatalRenewal { failures, last: e.to_string() });
                    }
                }
            }
        }
    }

    /// Minimum pause after a successful renewal. Zero unless the provider
    /// issued a token that is already inside the safety margin, in which case
    /// wait half its remaining lifetime (at least `initial_backoff`).
    fn pause_after(&self, token: &Token) -> Duration {
        let remaining = Duration::from_secs(token.expires_at.saturating_sub(epoch_secs()));
        if remaining > self.policy.safety_margin {
            return Duration::ZERO;
        }
        warn!(
            lifetime_secs = remaining.as_secs(),
            margin_secs = self.policy.safety_margin.as_secs(),
            "issued token lifetime is shorter than the safety margin"
        );
        (remaining / 2).max(self.policy.initial_backoff)
    }

    /// Perform one exchange, store the result, and persist it.
    pub async fn renew_once(&self) -> Result<Arc<Token>> {
        let current = self.writer.current();
        let token = self.exchange.exchange(&current).await?;
        self.writer.set(token)?;
        let stored = self.writer.current();

        if let Some(ref path) = self.persist_path {
            // The provider may rotate refresh values; losing one on disk means
            // the next start cannot renew, so make this loud.
            if let Err(e) = persist::save(path, &stored) {
                error!(path = %path.display(), err = %e, "failed to persist renewed token");
            }
        }
        Ok(stored)
    }
}

/// Add up to 25% random jitter.
fn jittered(base: Duration) -> Duration {
    let ms = base.as_millis() as u64;
    let extra = if ms >= 4 { rand::rng().random_range(0..=ms / 4) } else { 0 };
    Duration::from_millis(ms + extra)
}

#[cfg(test)]
#[path = "refresher_tests.rs"]
mod tests;
