// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::token::RefreshPolicy;

pub const DEFAULT_TOKEN_URL: &str = "https://services.leadconnectorhq.com/oauth/token";
pub const DEFAULT_API_BASE: &str = "https://services.leadconnectorhq.com";
pub const DEFAULT_APP_URL: &str = "https://app.gohighlevel.com";

/// Keep a workspace OAuth token alive and offboard departed members.
#[derive(Debug, Parser)]
#[command(name = "offboard", version, about)]
pub struct Config {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// OAuth client id.
    #[arg(long, global = true, env = "GHL_CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth client secret.
    #[arg(long, global = true, env = "GHL_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Refresh token used when no token file exists yet.
    #[arg(long, global = true, env = "GHL_REFRESH_TOKEN", hide_env_values = true)]
    pub refresh_token: Option<String>,

    /// Where the current token is persisted.
    #[arg(long, global = true, env = "OFFBOARD_TOKEN_FILE", default_value = "tokens.json")]
    pub token_file: PathBuf,

    /// Identity provider token endpoint.
    #[arg(long, global = true, env = "OFFBOARD_TOKEN_URL", default_value = DEFAULT_TOKEN_URL)]
    pub token_url: String,

    /// Directory API base URL.
    #[arg(long, global = true, env = "OFFBOARD_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Location to manage. Defaults to the location the token is scoped to.
    #[arg(long, global = true, env = "GHL_LOCATION_ID")]
    pub location_id: Option<String>,

    /// Directory page size.
    #[arg(long, global = true, env = "OFFBOARD_PAGE_SIZE", default_value_t = 100)]
    pub page_size: u32,

    /// Renew this many seconds before the token expires.
    #[arg(long, global = true, env = "OFFBOARD_REFRESH_MARGIN_SECS", default_value_t = 900)]
    pub refresh_margin_secs: u64,

    /// Cap for the renewal backoff, in seconds.
    #[arg(long, global = true, env = "OFFBOARD_MAX_BACKOFF_SECS", default_value_t = 60)]
    pub max_backoff_secs: u64,

    /// Consecutive renewal failures before the process gives up.
    #[arg(long, global = true, env = "OFFBOARD_MAX_RENEWAL_FAILURES", default_value_t = 8)]
    pub max_renewal_failures: u32,

    /// Timeout for each outbound HTTP request, in seconds.
    #[arg(long, global = true, env = "OFFBOARD_HTTP_TIMEOUT_SECS", default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Log format (json or text).
    #[arg(long, global = true, env = "OFFBOARD_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    #[arg(long, global = true, env = "OFFBOARD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Keep the token fresh and serve the HTTP API (the default).
    Daemon(DaemonArgs),
    /// Run the offboarding pipeline once and exit.
    RunOnce(RunArgs),
    /// Renew the token once, persist it, and exit.
    Refresh,
    /// Inspect the workspace directory.
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum UsersAction {
    /// List every member.
    List {
        /// Also write the listing to a JSON file (default `users_<timestamp>.json`).
        #[arg(long, num_args = 0..=1)]
        save: Option<Option<PathBuf>>,
    },
    /// Look a member up by email.
    Find { email: String },
}

#[derive(Debug, Clone, Args)]
pub struct DaemonArgs {
    /// Host to bind on.
    #[arg(long, env = "OFFBOARD_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, env = "OFFBOARD_PORT", default_value_t = 9850)]
    pub port: u16,

    /// Directory refresh interval in seconds (0 disables polling).
    #[arg(long, env = "OFFBOARD_DIRECTORY_INTERVAL_SECS", default_value_t = 3600)]
    pub directory_interval_secs: u64,

    /// Write each directory snapshot to this file.
    #[arg(long, env = "OFFBOARD_SNAPSHOT_PATH")]
    pub snapshot_path: Option<PathBuf>,

    #[command(flatten)]
    pub run: RunArgs,
}

impl DaemonArgs {
    /// Daemon settings from env and defaults only, for a bare `offboard`.
    pub fn from_env() -> Self {
        #[derive(Parser)]
        struct Bare {
            #[command(flatten)]
            daemon: DaemonArgs,
        }
        Bare::parse_from(["offboard"]).daemon
    }

    pub fn directory_interval(&self) -> Option<Duration> {
        (self.directory_interval_secs > 0).then(|| Duration::from_secs(self.directory_interval_secs))
    }
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Removal list: text (one identifier or email per line) or JSON array.
    #[arg(long, env = "OFFBOARD_REMOVAL_LIST")]
    pub removal_list: Option<PathBuf>,

    /// Members deactivated at once.
    #[arg(long, env = "OFFBOARD_CONCURRENCY", default_value_t = 1)]
    pub concurrency: usize,

    /// Lock file preventing overlapping runs.
    #[arg(long, env = "OFFBOARD_LOCK_PATH", default_value = "run.lock")]
    pub lock_path: PathBuf,

    /// Append per-task outcomes to this JSON-lines file.
    #[arg(long, env = "OFFBOARD_OUTCOME_LOG")]
    pub outcome_log: Option<PathBuf>,

    /// Seconds between the two attempts of a task.
    #[arg(long, env = "OFFBOARD_RETRY_DELAY_SECS", default_value_t = 2)]
    pub retry_delay_secs: u64,

    /// WebDriver server (chromedriver, geckodriver, Selenium).
    #[arg(long, env = "OFFBOARD_WEBDRIVER_URL", default_value = "http://127.0.0.1:9515")]
    pub webdriver_url: String,

    /// Web app root used for login.
    #[arg(long, env = "OFFBOARD_APP_URL", default_value = DEFAULT_APP_URL)]
    pub app_url: String,

    /// Admin login for the web app.
    #[arg(long, env = "GHL_LOGIN_EMAIL")]
    pub login_email: Option<String>,

    #[arg(long, env = "GHL_LOGIN_PASSWORD", hide_env_values = true)]
    pub login_password: Option<String>,

    /// JSON file overriding page selectors.
    #[arg(long, env = "OFFBOARD_SELECTORS")]
    pub selectors: Option<PathBuf>,

    /// Upper bound for each browser wait, in seconds.
    #[arg(long, env = "OFFBOARD_STEP_TIMEOUT_SECS", default_value_t = 30)]
    pub step_timeout_secs: u64,

    /// Show the browser window.
    #[arg(long, env = "OFFBOARD_HEADED")]
    pub headed: bool,
}

impl RunArgs {
    /// `required`: a removal list and login must be present (run-once).
    /// Otherwise they are checked only when partially configured.
    pub fn validate(&self, required: bool) -> anyhow::Result<()> {
        if self.concurrency == 0 {
            anyhow::bail!("--concurrency must be at least 1");
        }
        if self.step_timeout_secs == 0 {
            anyhow::bail!("--step-timeout-secs must be positive");
        }
        if required && self.removal_list.is_none() {
            anyhow::bail!("--removal-list (OFFBOARD_REMOVAL_LIST) is required");
        }
        let needs_login = required || self.removal_list.is_some();
        if needs_login && (is_blank(&self.login_email) || is_blank(&self.login_password)) {
            anyhow::bail!("GHL_LOGIN_EMAIL and GHL_LOGIN_PASSWORD are required to deactivate members");
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl Config {
    /// A bare `offboard` runs the daemon.
    pub fn with_default_command(mut self) -> Self {
        if self.command.is_none() {
            self.command = Some(Command::Daemon(DaemonArgs::from_env()));
        }
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("invalid --log-format: {} (expected json or text)", self.log_format);
        }
        if is_blank(&self.client_id) || is_blank(&self.client_secret) {
            anyhow::bail!("GHL_CLIENT_ID and GHL_CLIENT_SECRET are required");
        }
        if self.page_size == 0 {
            anyhow::bail!("--page-size must be at least 1");
        }
        if self.refresh_margin_secs == 0 {
            anyhow::bail!("--refresh-margin-secs must be positive");
        }
        if self.max_renewal_failures == 0 {
            anyhow::bail!("--max-renewal-failures must be at least 1");
        }
        if self.http_timeout_secs == 0 {
            anyhow::bail!("--http-timeout-secs must be positive");
        }
        match &self.command {
            Some(Command::RunOnce(run)) => run.validate(true),
            Some(Command::Daemon(daemon)) => daemon.run.validate(false),
            _ => Ok(()),
        }
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            safety_margin: Duration::from_secs(self.refresh_margin_secs),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
            max_consecutive_failures: self.max_renewal_failures,
            ..RefreshPolicy::default()
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or_default()
    }

    pub fn client_secret(&self) -> &str {
        self.client_secret.as_deref().unwrap_or_default()
    }
}

fn is_blank(value: &Option<String>) -> bool {
    !value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
