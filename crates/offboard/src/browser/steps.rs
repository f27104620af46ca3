// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Browser-driven deactivation: log in, open the team page, find the
//! member, deactivate and confirm.
//!
//! Page structure changes without notice, so every selector lives in
//! [`Selectors`] and can be replaced from a JSON file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::webdriver::{Element, Session, WebDriver};
use super::{AccountDeactivator, Deactivation};
use crate::directory::DirectoryEntry;
use crate::error::{Error, Result};
use crate::token::TokenReader;
use crate::BoxFuture;

/// CSS selectors for each page element the flow touches.
///
/// `member_row` may contain `{id}`, replaced with the member identifier.
/// An empty `search_input` or `row_menu` skips that step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    pub login_email: String,
    pub login_password: String,
    pub login_submit: String,
    /// Present once the login completed.
    pub logged_in: String,
    /// Present once the team list rendered.
    pub team_ready: String,
    pub search_input: String,
    pub member_row: String,
    /// Fallback: every row, matched on the member's email text.
    pub member_rows: String,
    /// Inside a row: marks an already inactive member.
    pub deactivated_marker: String,
    pub row_menu: String,
    pub deactivate_button: String,
    pub confirm_button: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            login_email: r#"input[type="email"]"#.into(),
            login_password: r#"input[type="password"]"#.into(),
            login_submit: r#"button[type="submit"]"#.into(),
            logged_in: ".hl_header".into(),
            team_ready: ".hl_team-list, table".into(),
            search_input: r#"input[placeholder*="Search"]"#.into(),
            member_row: r#"[data-user-id="{id}"]"#.into(),
            member_rows: "tbody tr".into(),
            deactivated_marker: r#".user-inactive, [data-status="inactive"]"#.into(),
            row_menu: ".dropdown-toggle".into(),
            deactivate_button: r#"[data-action="deactivate"]"#.into(),
            confirm_button: ".modal-footer .btn-danger".into(),
        }
    }
}

impl Selectors {
    /// Load overrides from JSON; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("invalid selectors file {}: {e}", path.display())))
    }
}

/// Login and navigation settings for [`BrowserDeactivator`].
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    /// Web app root, e.g. `https://app.gohighlevel.com`.
    pub app_url: String,
    pub login_email: String,
    pub login_password: String,
    /// Location whose team page is used; falls back to the token's.
    pub location_id: Option<String>,
    /// Upper bound for each wait on the page.
    pub step_timeout: Duration,
    pub headless: bool,
}

/// [`AccountDeactivator`] driving a real browser over WebDriver. Each call
/// gets its own session, deleted on every exit path.
pub struct BrowserDeactivator {
    driver: WebDriver,
    settings: BrowserSettings,
    selectors: Selectors,
    tokens: Option<TokenReader>,
}

impl BrowserDeactivator {
    pub fn new(driver: WebDriver, settings: BrowserSettings, selectors: Selectors) -> Self {
        Self { driver, settings, selectors, tokens: None }
    }

    /// Resolve the location from the live token when none is configured.
    pub fn with_tokens(mut self, tokens: TokenReader) -> Self {
        self.tokens = Some(tokens);
        self
    }

    fn capabilities(&self) -> Value {
        let mut args = vec!["--no-sandbox", "--disable-dev-shm-usage", "--window-size=1440,900"];
        if self.settings.headless {
            args.push("--headless=new");
        }
        json!({
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": { "args": args },
            }
        })
    }

    fn team_url(&self) -> Result<String> {
        let location = self
            .settings
            .location_id
            .clone()
            .or_else(|| self.tokens.as_ref().and_then(TokenReader::location_id))
            .ok_or_else(|| Error::Config("location id required for the team page".into()))?;
        Ok(format!(
            "{}/v2/location/{location}/settings/staff/team",
            self.settings.app_url.trim_end_matches('/')
        ))
    }

    async fn run(&self, target: &DirectoryEntry) -> Result<Deactivation> {
        let team_url = self.team_url()?;
        let session = self.driver.new_session(&self.capabilities()).await.map_err(|e| {
            Error::AutomationStep {
                target: target.identifier.clone(),
                step: "open session".into(),
                message: format!("{e:#}"),
            }
        })?;
        debug!(member = %target.identifier, session = session.id(), "browser session started");

        let result = self.perform(&session, target, &team_url).await;

        let id = session.id().to_owned();
        if let Err(e) = session.close().await {
            tracing::warn!(session = %id, err = %e, "failed to close browser session");
        }
        result
    }

    async fn perform(
        &self,
        session: &Session,
        target: &DirectoryEntry,
        team_url: &str,
    ) -> Result<Deactivation> {
        let at = |step: &'static str| {
            let target = target.identifier.clone();
            move |e: anyhow::Error| Error::AutomationStep {
                target,
                step: step.into(),
                message: format!("{e:#}"),
            }
        };

        self.login(session).await.map_err(at("login"))?;
        self.open_team(session, target, team_url).await.map_err(at("open team page"))?;

        let Some(row) = self.locate_row(session, target).await.map_err(at("locate member"))? else {
            info!(member = %target.identifier, "member not listed, nothing to deactivate");
            return Ok(Deactivation::AlreadyDeactivated);
        };
        let inactive = session
            .find_within(&row, &self.selectors.deactivated_marker)
            .await
            .map_err(at("inspect member"))?;
        if inactive.is_some() {
            info!(member = %target.identifier, "member already deactivated");
            return Ok(Deactivation::AlreadyDeactivated);
        }

        self.click_deactivate(session, &row).await.map_err(at("deactivate"))?;
        self.confirm(session, target).await.map_err(at("confirm"))?;
        info!(member = %target.identifier, "member deactivated");
        Ok(Deactivation::Deactivated)
    }

    async fn login(&self, session: &Session) -> anyhow::Result<()> {
        let timeout = self.settings.step_timeout;
        session.navigate(&self.settings.app_url).await?;
        let email = session.wait_for(&self.selectors.login_email, timeout).await?;
        session.send_keys(&email, &self.settings.login_email).await?;
        let password = session.wait_for(&self.selectors.login_password, timeout).await?;
        session.send_keys(&password, &self.settings.login_password).await?;
        let submit = session.wait_for(&self.selectors.login_submit, timeout).await?;
        session.click(&submit).await?;
        session.wait_for(&self.selectors.logged_in, timeout).await?;
        Ok(())
    }

    async fn open_team(
        &self,
        session: &Session,
        target: &DirectoryEntry,
        team_url: &str,
    ) -> anyhow::Result<()> {
        session.navigate(team_url).await?;
        session.wait_for(&self.selectors.team_ready, self.settings.step_timeout).await?;
        if self.selectors.search_input.is_empty() {
            return Ok(());
        }
        if let Some(search) = session.find(&self.selectors.search_input).await? {
            let query = target.email.as_deref().unwrap_or(&target.display_name);
            session.send_keys(&search, query).await?;
        }
        Ok(())
    }

    /// The member's row, by identifier first and then by email text.
    async fn locate_row(
        &self,
        session: &Session,
        target: &DirectoryEntry,
    ) -> anyhow::Result<Option<Element>> {
        let by_id = self.selectors.member_row.replace("{id}", &target.identifier);
        if let Some(row) = session.find(&by_id).await? {
            return Ok(Some(row));
        }
        let Some(email) = target.email.as_deref() else {
            return Ok(None);
        };
        let email = email.to_ascii_lowercase();
        for row in session.find_all(&self.selectors.member_rows).await? {
            if session.text(&row).await?.to_ascii_lowercase().contains(&email) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    async fn click_deactivate(&self, session: &Session, row: &Element) -> anyhow::Result<()> {
        if !self.selectors.row_menu.is_empty() {
            if let Some(menu) = session.find_within(row, &self.selectors.row_menu).await? {
                session.click(&menu).await?;
            }
        }
        let button = session.wait_for(&self.selectors.deactivate_button, self.settings.step_timeout).await?;
        session.click(&button).await
    }

    /// Confirm the dialog, then wait until the row is gone or marked inactive.
    async fn confirm(&self, session: &Session, target: &DirectoryEntry) -> anyhow::Result<()> {
        let timeout = self.settings.step_timeout;
        let confirm = session.wait_for(&self.selectors.confirm_button, timeout).await?;
        session.click(&confirm).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.locate_row(session, target).await? {
                None => return Ok(()),
                Some(row) => {
                    if session.find_within(&row, &self.selectors.deactivated_marker).await?.is_some() {
                        return Ok(());
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("member still active {timeout:?} after confirming");
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }
}

impl AccountDeactivator for BrowserDeactivator {
    fn deactivate<'a>(&'a self, target: &'a DirectoryEntry) -> BoxFuture<'a, Result<Deactivation>> {
        Box::pin(self.run(target))
    }
}

#[cfg(test)]
#[path = "steps_tests.rs"]
mod tests;
