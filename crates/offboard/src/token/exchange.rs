// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Refresh-token exchange against the identity provider.

use serde::Deserialize;

use super::{claims, epoch_secs, Token};
use crate::error::{Error, Result};
use crate::BoxFuture;

/// Lifetime assumed when neither the response nor the JWT carries one.
const FALLBACK_TTL_SECS: u64 = 24 * 3600;

/// Trades the current refresh value for a new token.
pub trait TokenExchange: Send + Sync {
    fn exchange<'a>(&'a self, current: &'a Token) -> BoxFuture<'a, Result<Token>>;
}

/// Standard OAuth2 token response, plus the provider's location fields.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default, rename = "locationId")]
    location_id: Option<String>,
    #[serde(default, rename = "companyId")]
    company_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// OAuth2 `refresh_token` grant over a form-encoded POST.
pub struct OAuthExchange {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    user_type: String,
}

impl OAuthExchange {
    pub fn new(
        http: reqwest::Client,
        token_url: String,
        client_id: String,
        client_secret: String,
    ) -> Self {
        Self { http, token_url, client_id, client_secret, user_type: "Location".to_owned() }
    }

    async fn do_exchange(&self, current: &Token) -> Result<Token> {
        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", current.refresh_token.as_str()),
                ("user_type", self.user_type.as_str()),
            ])
            .send()
            .await
            .map_err(Error::from_transport)?;

        let status = resp.status();
        let body = resp.text().await.map_err(Error::from_transport)?;

        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<TokenErrorResponse>(&body) {
                if matches!(err.error.as_str(), "invalid_grant" | "invalid_client") {
                    return Err(Error::Auth(err.error_description.unwrap_or(err.error)));
                }
            }
            return Err(Error::from_status(status.as_u16(), &body));
        }

        let resp: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| Error::TransientNetwork(format!("unparseable token response: {e}")))?;
        Ok(token_from_response(resp, current))
    }
}

impl TokenExchange for OAuthExchange {
    fn exchange<'a>(&'a self, current: &'a Token) -> BoxFuture<'a, Result<Token>> {
        Box::pin(self.do_exchange(current))
    }
}

/// Build the next token. Expiry comes from `expires_in`, then the JWT `exp`,
/// then a 24h fallback; metadata falls back to the previous token.
fn token_from_response(resp: TokenResponse, previous: &Token) -> Token {
    let now = epoch_secs();
    let claims = claims::decode(&resp.access_token).unwrap_or_default();
    let expires_at = resp
        .expires_in
        .map(|s| now.saturating_add(s))
        .or(claims.exp)
        .unwrap_or(now + FALLBACK_TTL_SECS);

    Token {
        refresh_token: resp.refresh_token.unwrap_or_else(|| previous.refresh_token.clone()),
        access_token: resp.access_token,
        expires_at,
        fetched_at: now,
        location_id: resp
            .location_id
            .or(claims.auth_class_id)
            .or_else(|| previous.location_id.clone()),
        company_id: resp.company_id.or(claims.company_id).or_else(|| previous.company_id.clone()),
    }
}

#[cfg(test)]
#[path = "exchange_tests.rs"]
mod tests;
