// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for the LeadConnector users endpoint.

use serde::Deserialize;

use super::{DirectoryApi, DirectoryEntry, MemberStatus, Page};
use crate::error::{Error, Result};
use crate::token::Token;
use crate::BoxFuture;

/// API version header required by the users endpoint.
const API_VERSION: &str = "2021-07-28";

/// `GET {base}/users/` scoped to one location.
pub struct HighLevelDirectory {
    http: reqwest::Client,
    base_url: String,
    /// Overrides the location carried by the token.
    location_id: Option<String>,
    page_size: u32,
}

impl HighLevelDirectory {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url: base_url.trim_end_matches('/').to_owned(), location_id: None, page_size: 100 }
    }

    pub fn with_location(mut self, location_id: Option<String>) -> Self {
        self.location_id = location_id;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    async fn get_page(&self, token: &Token, cursor: Option<&str>) -> Result<Page> {
        let location = self
            .location_id
            .as_deref()
            .or(token.location_id.as_deref())
            .ok_or_else(|| Error::Config("location id required to list users".into()))?;

        let limit = self.page_size.to_string();
        let mut query = vec![("locationId", location), ("limit", limit.as_str())];
        if let Some(c) = cursor {
            query.push(("startAfterId", c));
        }

        let resp = self
            .http
            .get(format!("{}/users/", self.base_url))
            .bearer_auth(&token.access_token)
            .header("Version", API_VERSION)
            .header("Accept", "application/json")
            .query(&query)
            .send()
            .await
            .map_err(Error::from_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::from_status(status.as_u16(), &body));
        }
        let body: UsersResponse = resp
            .json()
            .await
            .map_err(|e| Error::TransientNetwork(format!("unparseable users response: {e}")))?;
        Ok(body.into_page())
    }
}

impl DirectoryApi for HighLevelDirectory {
    fn fetch_page<'a>(
        &'a self,
        token: &'a Token,
        cursor: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Page>> {
        Box::pin(self.get_page(token, cursor))
    }
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    #[serde(default)]
    users: Vec<RawUser>,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Meta {
    #[serde(default)]
    next_cursor: Option<String>,
    #[serde(default)]
    start_after_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUser {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    deleted: Option<bool>,
    #[serde(default)]
    status: Option<String>,
}

impl UsersResponse {
    fn into_page(self) -> Page {
        let next_cursor = if self.users.is_empty() {
            None
        } else {
            self.meta.and_then(|m| m.start_after_id.or(m.next_cursor)).filter(|c| !c.is_empty())
        };
        Page { entries: self.users.into_iter().map(RawUser::into_entry).collect(), next_cursor }
    }
}

impl RawUser {
    fn into_entry(self) -> DirectoryEntry {
        let status = member_status(self.deleted, self.status.as_deref());
        let joined = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or_default(),
            self.last_name.as_deref().unwrap_or_default()
        );
        let display_name = match joined.trim() {
            "" => self.name.unwrap_or_default(),
            name => name.to_owned(),
        };
        DirectoryEntry { identifier: self.id, display_name, email: self.email, status }
    }
}

/// Members are active unless flagged deleted or carrying an inactive status.
fn member_status(deleted: Option<bool>, status: Option<&str>) -> MemberStatus {
    if deleted == Some(true) {
        return MemberStatus::Deactivated;
    }
    match status.map(|s| s.trim().to_ascii_lowercase()) {
        None => MemberStatus::Active,
        Some(s) => match s.as_str() {
            "" | "active" | "enabled" => MemberStatus::Active,
            "inactive" | "deactivated" | "disabled" | "deleted" | "suspended" => {
                MemberStatus::Deactivated
            }
            _ => MemberStatus::Unknown,
        },
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
