// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process wiring: builds the token, directory and pipeline components from
//! [`Config`] and runs one subcommand.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::browser::{BrowserDeactivator, BrowserSettings, Selectors, WebDriver};
use crate::config::{Command, Config, DaemonArgs, RunArgs, UsersAction};
use crate::directory::{
    save_snapshot, DirectoryEntry, DirectoryFetcher, HighLevelDirectory, MemberStatus,
};
use crate::error::{Error, Result};
use crate::pipeline::{FileRemovalSource, Pipeline, PipelineOptions};
use crate::token::{epoch_secs, persist, token_store, OAuthExchange, Refresher, TokenReader};
use crate::transport::{build_router, AppState};

/// Components shared by every subcommand.
pub struct Services {
    pub http: reqwest::Client,
    pub refresher: Refresher,
    pub tokens: TokenReader,
    pub fetcher: Arc<DirectoryFetcher>,
}

impl Services {
    /// Seed the token store from disk (or the bootstrap refresh token) and
    /// build the refresher and directory client around it.
    pub fn build(config: &Config) -> Result<Self> {
        let http = crate::http_client(config.http_timeout())?;
        let seed = persist::load_or_bootstrap(&config.token_file, config.refresh_token.as_deref())?;
        let (writer, tokens) = token_store(seed);

        let exchange = Arc::new(OAuthExchange::new(
            http.clone(),
            config.token_url.clone(),
            config.client_id().to_owned(),
            config.client_secret().to_owned(),
        ));
        let refresher = Refresher::new(writer, exchange, config.refresh_policy())
            .with_persist_path(config.token_file.clone());

        let api = HighLevelDirectory::new(http.clone(), config.api_base.clone())
            .with_location(config.location_id.clone())
            .with_page_size(config.page_size);
        let fetcher = Arc::new(DirectoryFetcher::new(Arc::new(api), tokens.clone()));

        Ok(Self { http, refresher, tokens, fetcher })
    }

    /// The offboarding pipeline, or `None` without a removal list.
    pub fn pipeline(&self, config: &Config, run: &RunArgs) -> Result<Option<Pipeline>> {
        let Some(list) = run.removal_list.clone() else {
            return Ok(None);
        };
        let selectors = match run.selectors.as_deref() {
            Some(path) => Selectors::load(path)?,
            None => Selectors::default(),
        };
        let settings = BrowserSettings {
            app_url: run.app_url.clone(),
            login_email: run.login_email.clone().unwrap_or_default(),
            login_password: run.login_password.clone().unwrap_or_default(),
            location_id: config.location_id.clone(),
            step_timeout: run.step_timeout(),
            headless: !run.headed,
        };
        let driver = WebDriver::new(self.http.clone(), run.webdriver_url.clone());
        let deactivator =
            BrowserDeactivator::new(driver, settings, selectors).with_tokens(self.tokens.clone());

        let options = PipelineOptions {
            concurrency: run.concurrency,
            retry_delay: run.retry_delay(),
            lock_path: Some(run.lock_path.clone()),
            outcome_log: run.outcome_log.clone(),
            ..PipelineOptions::default()
        };
        let pipeline = Pipeline::new(
            Arc::clone(&self.fetcher),
            self.tokens.clone(),
            Arc::new(FileRemovalSource::new(list)),
            Arc::new(deactivator),
        )
        .with_options(options);
        Ok(Some(pipeline))
    }
}

/// Initialize tracing from config. Logs go to stderr so command output on
/// stdout stays machine-readable.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init(),
    };
    drop(result);
}

/// Run the configured subcommand until it finishes or `shutdown` fires.
/// Returns the process exit code.
pub async fn run(config: Config, shutdown: CancellationToken) -> anyhow::Result<i32> {
    let command = config.command.clone().unwrap_or_else(|| Command::Daemon(DaemonArgs::from_env()));
    match command {
        Command::Daemon(args) => daemon(&config, &args, shutdown).await,
        Command::RunOnce(args) => run_once(&config, &args, shutdown).await,
        Command::Refresh => refresh(&config).await,
        Command::Users { action } => users(&config, action).await,
    }
}

/// Long-running mode: refresher, directory poller and HTTP API.
async fn daemon(config: &Config, args: &DaemonArgs, shutdown: CancellationToken) -> anyhow::Result<i32> {
    let services = Services::build(config)?;
    let pipeline = services.pipeline(config, &args.run)?.map(Arc::new);
    let Services { refresher, tokens, fetcher, .. } = services;

    let state = Arc::new(AppState::new(tokens, fetcher, pipeline, shutdown.clone()));
    let mut refresher = tokio::spawn(refresher.run(shutdown.clone()));
    if let Some(interval) = args.directory_interval() {
        spawn_directory_poller(Arc::clone(&state), interval, args.snapshot_path.clone(), shutdown.clone());
    }

    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(offboarding = state.pipeline.is_some(), "offboard listening on {addr}");
    let router = build_router(state);
    let server_shutdown = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router).with_graceful_shutdown(server_shutdown.cancelled_owned()).await
    });

    // The refresher returns on shutdown, or with an error once renewal is fatal.
    tokio::select! {
        renewal = &mut refresher => {
            shutdown.cancel();
            server.await??;
            renewal??;
        }
        served = &mut server => {
            shutdown.cancel();
            refresher.await??;
            served??;
        }
    }
    info!("offboard stopped");
    Ok(0)
}

fn spawn_directory_poller(
    state: Arc<AppState>,
    interval: Duration,
    snapshot_path: Option<PathBuf>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let wait = match state.fetcher.fetch_all().await {
                Ok(users) => {
                    if let Some(ref path) = snapshot_path {
                        if let Err(e) = save_snapshot(path, &users) {
                            warn!(path = %path.display(), err = %e, "failed to write directory snapshot");
                        }
                    }
                    state.store_directory(epoch_secs(), users);
                    interval
                }
                Err(e) => {
                    warn!(code = e.code(), err = %e, "directory refresh failed");
                    interval.min(Duration::from_secs(30))
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.cancelled() => break,
            }
        }
    });
}

/// One pipeline run with a refresher alive for its duration.
async fn run_once(config: &Config, args: &RunArgs, shutdown: CancellationToken) -> anyhow::Result<i32> {
    let services = Services::build(config)?;
    let pipeline = services
        .pipeline(config, args)?
        .ok_or_else(|| Error::Config("--removal-list is required".into()))?;

    let refresher_stop = shutdown.child_token();
    let refresher = tokio::spawn(services.refresher.run(refresher_stop.clone()));
    let result = pipeline.run_once(&shutdown).await;
    refresher_stop.cancel();
    match refresher.await {
        Ok(Err(e)) => warn!(err = %e, "token refresher stopped with an error"),
        Err(e) => warn!(err = %e, "token refresher task failed"),
        Ok(Ok(())) => {}
    }

    let summary = match result {
        Ok(summary) => summary,
        Err(Error::RunInProgress { pid }) => {
            info!(pid, "another run holds the lock, skipping");
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(if summary.is_success() { 0 } else { 1 })
}

/// Renew the token once and persist it.
async fn refresh(config: &Config) -> anyhow::Result<i32> {
    let services = Services::build(config)?;
    let token = services.refresher.renew_once().await?;
    info!(
        expires_in_secs = token.expires_at.saturating_sub(epoch_secs()),
        location = token.location_id.as_deref().unwrap_or("-"),
        path = %config.token_file.display(),
        "token refreshed"
    );
    Ok(0)
}

async fn users(config: &Config, action: UsersAction) -> anyhow::Result<i32> {
    let services = Services::build(config)?;
    if services.tokens.get_current().is_err() {
        services.refresher.renew_once().await?;
    }

    match action {
        UsersAction::List { save } => {
            let users = services.fetcher.fetch_all().await?;
            for user in &users {
                println!("{}", format_row(user));
            }
            if let Some(path) = save {
                let path = path.unwrap_or_else(|| default_snapshot_path(epoch_secs()));
                save_snapshot(&path, &users)?;
                info!(path = %path.display(), count = users.len(), "directory saved");
            }
            Ok(0)
        }
        UsersAction::Find { email } => match services.fetcher.find_by_email(&email).await? {
            Some(user) => {
                println!("{}", serde_json::to_string_pretty(&user)?);
                Ok(0)
            }
            None => {
                eprintln!("no member with email {email}");
                Ok(1)
            }
        },
    }
}

/// `users_<timestamp>.json` in the working directory.
pub fn default_snapshot_path(now: u64) -> PathBuf {
    PathBuf::from(format!("users_{now}.json"))
}

/// Tab-separated listing row.
pub fn format_row(user: &DirectoryEntry) -> String {
    let status = match user.status {
        MemberStatus::Active => "active",
        MemberStatus::Deactivated => "deactivated",
        MemberStatus::Unknown => "unknown",
    };
    format!(
        "{}\t{status}\t{}\t{}",
        user.identifier,
        user.display_name,
        user.email.as_deref().unwrap_or("-")
    )
}

#[cfg(test)]
#[path = "app_tests.rs"]
mod tests;
