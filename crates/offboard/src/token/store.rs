// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-writer, multi-reader token store.
//!
//! The current [`Token`] lives behind an `Arc` that is swapped as a whole on
//! every write, so readers never observe a half-updated pair. Only the
//! [`TokenWriter`] (owned by the refresher) can replace it; everything else
//! holds a cloneable [`TokenReader`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{watch, Notify};

use super::{epoch_secs, Token};
use crate::error::{Error, Result};

struct Shared {
    current: RwLock<Arc<Token>>,
    renew: Notify,
    generation: watch::Sender<u64>,
}

/// Create a store seeded with `initial`.
///
/// The seed may already be expired (e.g. loaded from disk after downtime);
/// readers get [`Error::TokenExpired`] until the refresher stores a fresh one.
pub fn token_store(initial: Token) -> (TokenWriter, TokenReader) {
    let (generation, _) = watch::channel(0);
    let shared = Arc::new(Shared {
        current: RwLock::new(Arc::new(initial)),
        renew: Notify::new(),
        generation,
    });
    (TokenWriter { shared: Arc::clone(&shared) }, TokenReader { shared })
}

/// Exclusive mutator handle. Deliberately not `Clone`.
pub struct TokenWriter {
    shared: Arc<Shared>,
}

impl TokenWriter {
    /// Atomically replace the stored token.
    ///
    /// Rejects tokens whose expiry is not in the future; the previous token
    /// stays in place.
    pub fn set(&self, token: Token) -> Result<()> {
        let now = epoch_secs();
        if token.is_expired_at(now) {
            return Err(Error::InvalidTokenState(format!(
                "expires_at {} is not after now ({now})",
                token.expires_at
            )));
        }
        *self.shared.current.write() = Arc::new(token);
        self.shared.generation.send_modify(|g| *g += 1);
        Ok(())
    }

    /// The stored token regardless of expiry (the refresher needs the
    /// refresh value even after the access value lapsed).
    pub fn current(&self) -> Arc<Token> {
        Arc::clone(&self.shared.current.read())
    }

    /// Wait until a reader asks for an expedited renewal.
    pub async fn renewal_requested(&self) {
        self.shared.renew.notified().await;
    }

    pub fn reader(&self) -> TokenReader {
        TokenReader { shared: Arc::clone(&self.shared) }
    }
}

/// Read-only view of the store.
#[derive(Clone)]
pub struct TokenReader {
    shared: Arc<Shared>,
}

impl TokenReader {
    /// Latest token snapshot. Never blocks on an in-flight renewal and never
    /// hands out a token past its expiry.
    pub fn get_current(&self) -> Result<Arc<Token>> {
        let token = Arc::clone(&self.shared.current.read());
        if token.is_expired() {
            return Err(Error::TokenExpired);
        }
        Ok(token)
    }

    /// Expiry of the stored token, for status reporting.
    pub fn expires_at(&self) -> u64 {
        self.shared.current.read().expires_at
    }

    /// Location the stored token is scoped to, if known.
    pub fn location_id(&self) -> Option<String> {
        self.shared.current.read().location_id.clone()
    }

    /// Ask the refresher to renew now (e.g. after the API rejected the token).
    pub fn request_renewal(&self) {
        self.shared.renew.notify_one();
    }

    /// Number of successful writes so far.
    pub fn generation(&self) -> u64 {
        *self.shared.generation.borrow()
    }

    /// Wait for a write newer than `seen`, up to `timeout`. Returns the new
    /// generation, or `None` on timeout.
    pub async fn wait_for_renewal(&self, seen: u64, timeout: Duration) -> Option<u64> {
        let mut rx = self.shared.generation.subscribe();
        let wait = rx.wait_for(|g| *g > seen);
        let renewed = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(g)) => Some(*g),
            _ => None,
        };
        renewed
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
