// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Offboard: keeps a workspace OAuth token alive and deactivates members
//! named on a removal list.

pub mod app;
pub mod browser;
pub mod config;
pub mod directory;
pub mod error;
pub mod pipeline;
pub mod test_support;
pub mod token;
pub mod transport;

use std::future::Future;
use std::pin::Pin;
use std::sync::Once;
use std::time::Duration;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Install the ring crypto provider for reqwest/rustls.
pub fn ensure_crypto_provider() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Shared HTTP client settings for every outbound call.
pub fn http_client(timeout: Duration) -> error::Result<reqwest::Client> {
    ensure_crypto_provider();
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("offboard/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| error::Error::Config(format!("build HTTP client: {e}")))
}
