// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run-once offboarding pipeline.
//!
//! `Start → DirectoryLoaded → TasksComputed → TasksExecuted → Done`, or
//! `Failed` when the directory or the removal list cannot be loaded. Task
//! failures are recorded per task and never abort the run.

pub mod lock;
pub mod removal;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::browser::{AccountDeactivator, Deactivation};
use crate::directory::{DirectoryEntry, DirectoryFetcher};
use crate::error::{Error, Result};
use crate::token::{epoch_secs, TokenReader};

pub use lock::RunLock;
pub use removal::{FileRemovalSource, RemovalSource, StaticRemovalSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Start,
    DirectoryLoaded,
    TasksComputed,
    TasksExecuted,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Pending,
    Succeeded,
    Failed,
}

/// One member to deactivate in this run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffboardingTask {
    pub target: DirectoryEntry,
    pub requested_at: u64,
    pub attempts: u32,
    pub outcome: TaskOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl OffboardingTask {
    fn new(target: DirectoryEntry, requested_at: u64) -> Self {
        Self { target, requested_at, attempts: 0, outcome: TaskOutcome::Pending, detail: None }
    }

    pub fn target_identifier(&self) -> &str {
        &self.target.identifier
    }
}

/// Result of [`compute_tasks`].
#[derive(Debug, Clone, Default)]
pub struct TaskPlan {
    pub tasks: Vec<OffboardingTask>,
    /// Listed members who are already not active.
    pub already_inactive: usize,
    /// Removal keys matching no directory entry.
    pub unmatched: Vec<String>,
}

/// One task per active entry named by a removal key, in directory order.
///
/// A key names an entry by identifier or, case-insensitively, by email.
pub fn compute_tasks(entries: &[DirectoryEntry], keys: &[String], now: u64) -> TaskPlan {
    let named = |entry: &DirectoryEntry, key: &str| {
        let key = key.trim();
        entry.identifier == key || entry.email_matches(key)
    };

    let mut plan = TaskPlan::default();
    for entry in entries {
        if !keys.iter().any(|k| named(entry, k)) {
            continue;
        }
        if entry.is_active() {
            plan.tasks.push(OffboardingTask::new(entry.clone(), now));
        } else {
            debug!(member = %entry.identifier, status = ?entry.status, "listed member not active");
            plan.already_inactive += 1;
        }
    }
    plan.unmatched =
        keys.iter().filter(|k| !entries.iter().any(|e| named(e, k))).cloned().collect();
    plan
}

/// What a run did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub state: RunState,
    pub started_at: u64,
    pub finished_at: u64,
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Tasks never started because the run was cancelled.
    pub skipped: usize,
    pub already_inactive: usize,
    pub unmatched: Vec<String>,
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tasks: Vec<OffboardingTask>,
}

impl RunSummary {
    fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: RunState::Start,
            started_at: epoch_secs(),
            finished_at: 0,
            requested: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            already_inactive: 0,
            unmatched: Vec::new(),
            cancelled: false,
            error: None,
            tasks: Vec::new(),
        }
    }

    /// Finished with every requested task succeeded.
    pub fn is_success(&self) -> bool {
        self.state == RunState::Done && self.failed == 0
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Tasks executed at once.
    pub concurrency: usize,
    /// Attempts per task within one run.
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// How long to wait for the refresher after the directory rejected the token.
    pub renewal_wait: Duration,
    pub lock_path: Option<PathBuf>,
    /// JSON-lines file receiving one record per task.
    pub outcome_log: Option<PathBuf>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_attempts: 2,
            retry_delay: Duration::from_secs(2),
            renewal_wait: Duration::from_secs(30),
            lock_path: None,
            outcome_log: None,
        }
    }
}

pub struct Pipeline {
    fetcher: Arc<DirectoryFetcher>,
    tokens: TokenReader,
    removal: Arc<dyn RemovalSource>,
    deactivator: Arc<dyn AccountDeactivator>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<DirectoryFetcher>,
        tokens: TokenReader,
        removal: Arc<dyn RemovalSource>,
        deactivator: Arc<dyn AccountDeactivator>,
    ) -> Self {
        Self { fetcher, tokens, removal, deactivator, options: PipelineOptions::default() }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Execute one run.
    ///
    /// Returns `Err` only when the run could not start (run lock held or
    /// unwritable); everything after that is reported in the summary.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<RunSummary> {
        let _lock = match self.options.lock_path.as_deref() {
            Some(path) => Some(RunLock::acquire(path)?),
            None => None,
        };

        let mut run = RunSummary::start();
        info!(run_id = %run.run_id, "offboarding run started");

        let entries = match self.load_directory().await {
            Ok(entries) => entries,
            Err(e) => return Ok(fail(run, "load directory", &e)),
        };
        run.state = RunState::DirectoryLoaded;
        debug!(run_id = %run.run_id, members = entries.len(), "directory loaded");

        let keys = match self.removal.load().await {
            Ok(keys) => keys,
            Err(e) => return Ok(fail(run, "load removal list", &e)),
        };
        let plan = compute_tasks(&entries, &keys, epoch_secs());
        run.state = RunState::TasksComputed;
        run.requested = plan.tasks.len();
        run.already_inactive = plan.already_inactive;
        for key in &plan.unmatched {
            warn!(run_id = %run.run_id, key = %key, "removal key matches no member");
        }
        run.unmatched = plan.unmatched;
        info!(
            run_id = %run.run_id,
            keys = keys.len(),
            tasks = run.requested,
            already_inactive = run.already_inactive,
            "offboarding tasks computed"
        );

        run.tasks = self.execute(plan.tasks, cancel).await;
        run.state = RunState::TasksExecuted;
        for task in &run.tasks {
            match task.outcome {
                TaskOutcome::Succeeded => run.succeeded += 1,
                TaskOutcome::Failed => run.failed += 1,
                TaskOutcome::Pending => run.skipped += 1,
            }
        }
        run.cancelled = cancel.is_cancelled();

        if let Some(path) = self.options.outcome_log.as_deref() {
            if let Err(e) = append_outcomes(path, &run.run_id, &run.tasks) {
                warn!(path = %path.display(), err = %e, "failed to write outcome log");
            }
        }

        run.state = RunState::Done;
        run.finished_at = epoch_secs();
        info!(
            run_id = %run.run_id,
            requested = run.requested,
            succeeded = run.succeeded,
            failed = run.failed,
            skipped = run.skipped,
            cancelled = run.cancelled,
            "offboarding run finished"
        );
        Ok(run)
    }

    /// Fetch the directory, waiting once for a renewal if the token was
    /// rejected or had expired.
    async fn load_directory(&self) -> Result<Vec<DirectoryEntry>> {
        let seen = self.tokens.generation();
        match self.fetcher.fetch_all().await {
            Err(e @ (Error::Auth(_) | Error::TokenExpired)) => {
                warn!(err = %e, "directory needs a fresh token, waiting for renewal");
                if self.tokens.wait_for_renewal(seen, self.options.renewal_wait).await.is_none() {
                    return Err(e);
                }
                self.fetcher.fetch_all().await
            }
            other => other,
        }
    }

    async fn execute(
        &self,
        tasks: Vec<OffboardingTask>,
        cancel: &CancellationToken,
    ) -> Vec<OffboardingTask> {
        let mut done: Vec<OffboardingTask> = stream::iter(tasks)
            .map(|task| self.execute_task(task, cancel))
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;
        done.sort_by(|a, b| a.target.identifier.cmp(&b.target.identifier));
        done
    }

    async fn execute_task(
        &self,
        mut task: OffboardingTask,
        cancel: &CancellationToken,
    ) -> OffboardingTask {
        loop {
            if cancel.is_cancelled() {
                if task.attempts == 0 {
                    task.detail = Some("cancelled before start".into());
                } else {
                    task.outcome = TaskOutcome::Failed;
                }
                return task;
            }
            if task.attempts > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => continue,
                    _ = tokio::time::sleep(self.options.retry_delay) => {}
                }
            }

            task.attempts += 1;
            match self.deactivator.deactivate(&task.target).await {
                Ok(result) => {
                    task.outcome = TaskOutcome::Succeeded;
                    task.detail = match result {
                        Deactivation::Deactivated => None,
                        Deactivation::AlreadyDeactivated => Some("already deactivated".into()),
                    };
                    info!(member = %task.target.identifier, attempt = task.attempts, ?result, "offboarding task succeeded");
                    return task;
                }
                Err(e) => {
                    warn!(
                        member = %task.target.identifier,
                        attempt = task.attempts,
                        max = self.options.max_attempts,
                        code = e.code(),
                        err = %e,
                        "offboarding task attempt failed"
                    );
                    task.detail = Some(e.to_string());
                    if task.attempts >= self.options.max_attempts {
                        task.outcome = TaskOutcome::Failed;
                        return task;
                    }
                }
            }
        }
    }
}

fn fail(mut run: RunSummary, step: &str, e: &Error) -> RunSummary {
    error!(run_id = %run.run_id, step, code = e.code(), err = %e, "offboarding run failed");
    run.state = RunState::Failed;
    run.error = Some(format!("{step}: {e}"));
    run.finished_at = epoch_secs();
    run
}

#[derive(Serialize)]
struct OutcomeRecord<'a> {
    run_id: &'a Uuid,
    target: &'a str,
    display_name: &'a str,
    outcome: TaskOutcome,
    attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
    requested_at: u64,
    recorded_at: u64,
}

/// Append one JSON line per task.
fn append_outcomes(path: &Path, run_id: &Uuid, tasks: &[OffboardingTask]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let recorded_at = epoch_secs();
    for task in tasks {
        let record = OutcomeRecord {
            run_id,
            target: &task.target.identifier,
            display_name: &task.target.display_name,
            outcome: task.outcome,
            attempts: task.attempts,
            detail: task.detail.as_deref(),
            requested_at: task.requested_at,
            recorded_at,
        };
        writeln!(file, "{}", serde_json::to_string(&record)?)?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
