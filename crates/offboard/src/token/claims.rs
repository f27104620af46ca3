// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unverified JWT claim extraction.
//!
//! Access tokens from the provider are JWTs; we only read metadata from the
//! payload (expiry, location, company). The signature is not checked; the
//! token came straight from the token endpoint over TLS.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

/// Claims we care about. Everything else in the payload is ignored.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessClaims {
    #[serde(default)]
    pub exp: Option<u64>,
    #[serde(default, rename = "authClassId")]
    pub auth_class_id: Option<String>,
    #[serde(default, rename = "companyId")]
    pub company_id: Option<String>,
}

/// Decode the payload segment of a JWT. Returns `None` for anything that is
/// not a three-segment token with a JSON payload.
pub fn decode(token: &str) -> Option<AccessClaims> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    // Some issuers pad; the URL-safe engine here does not accept padding.
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
#[path = "claims_tests.rs"]
mod tests;
