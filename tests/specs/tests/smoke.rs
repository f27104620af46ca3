// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `offboard` binary against a
//! fake identity provider, directory API and WebDriver server.

use std::time::Duration;

use offboard::browser::Selectors;
use offboard::test_support::{FakeBrowser, FakePage};
use offboard::token::persist;
use offboard_specs::{user, Upstream, Workspace};

const TIMEOUT: Duration = Duration::from_secs(10);

async fn upstream() -> anyhow::Result<Upstream> {
    Upstream::start(vec![
        user("u1", "Ada", "ada@example.com"),
        user("u2", "Grace", "grace@example.com"),
    ])
    .await
}

fn stdout_json(output: &std::process::Output) -> anyhow::Result<serde_json::Value> {
    Ok(serde_json::from_slice(&output.stdout)?)
}

// -- Daemon -------------------------------------------------------------------

#[tokio::test]
async fn daemon_bootstraps_token_and_reports_health() -> anyhow::Result<()> {
    let upstream = upstream().await?;
    let ws = Workspace::new(&upstream)?;
    let daemon = ws.spawn_daemon(&["--refresh-token", "boot", "--directory-interval-secs", "0"])?;
    daemon.wait_healthy(TIMEOUT).await?;

    let health = daemon.wait_token(TIMEOUT).await?;
    assert_eq!(health["location_id"], "loc-1");
    assert_eq!(health["offboarding_enabled"], false);
    assert!(health["token_renewals"].as_u64().unwrap_or_default() >= 1);
    assert!(upstream.grants()[0].contains("refresh_token=boot"));

    let saved = persist::load(&ws.token_file())?
        .ok_or_else(|| anyhow::anyhow!("token file not written"))?;
    assert_eq!(saved.refresh_token, "refresh-1");
    Ok(())
}

#[tokio::test]
async fn daemon_serves_directory() -> anyhow::Result<()> {
    let upstream = upstream().await?;
    let ws = Workspace::new(&upstream)?;
    let daemon = ws.spawn_daemon(&["--refresh-token", "boot", "--directory-interval-secs", "0"])?;
    daemon.wait_healthy(TIMEOUT).await?;
    daemon.wait_token(TIMEOUT).await?;

    let resp: serde_json::Value =
        reqwest::get(format!("{}/api/v1/users?refresh=true", daemon.base_url())).await?.json().await?;
    assert_eq!(resp["count"], 2);
    assert_eq!(resp["users"][0]["email"], "ada@example.com");
    assert_eq!(resp["users"][1]["display_name"], "Grace Test");
    Ok(())
}

#[tokio::test]
async fn daemon_stops_on_sigterm() -> anyhow::Result<()> {
    let upstream = upstream().await?;
    let ws = Workspace::new(&upstream)?;
    let mut daemon = ws.spawn_daemon(&["--refresh-token", "boot"])?;
    daemon.wait_healthy(TIMEOUT).await?;

    daemon.terminate()?;
    let status = daemon.wait_exit(TIMEOUT).await?;
    assert!(status.success(), "exit status: {status:?}");
    Ok(())
}

#[tokio::test]
async fn daemon_rejects_run_without_removal_list() -> anyhow::Result<()> {
    let upstream = upstream().await?;
    let ws = Workspace::new(&upstream)?;
    let daemon = ws.spawn_daemon(&["--refresh-token", "boot", "--directory-interval-secs", "0"])?;
    daemon.wait_healthy(TIMEOUT).await?;

    let resp = reqwest::Client::new().post(format!("{}/api/v1/runs", daemon.base_url())).send().await?;
    assert_eq!(resp.status().as_u16(), 400);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["error"]["code"], "OFFBOARDING_DISABLED");
    Ok(())
}

#[tokio::test]
async fn daemon_exits_nonzero_when_renewal_is_fatal() -> anyhow::Result<()> {
    let upstream = upstream().await?;
    upstream.reject_refresh();
    let ws = Workspace::new(&upstream)?;
    let mut daemon = ws.spawn_daemon(&[
        "--refresh-token",
        "revoked",
        "--max-renewal-failures",
        "2",
        "--max-backoff-secs",
        "1",
        "--directory-interval-secs",
        "0",
    ])?;

    let status = daemon.wait_exit(TIMEOUT).await?;
    assert_eq!(status.code(), Some(1), "exit status: {status:?}");
    assert_eq!(upstream.grants().len(), 2);
    assert!(!ws.token_file().exists());
    Ok(())
}

// -- One-shot commands --------------------------------------------------------

#[tokio::test]
async fn refresh_persists_token() -> anyhow::Result<()> {
    let upstream = upstream().await?;
    let ws = Workspace::new(&upstream)?;

    let output = ws.run(&["--refresh-token", "boot", "refresh"]).await?;
    assert_eq!(output.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let saved = persist::load(&ws.token_file())?
        .ok_or_else(|| anyhow::anyhow!("token file not written"))?;
    assert_eq!(saved.access_token, "access-1");
    assert_eq!(saved.location_id.as_deref(), Some("loc-1"));

    // Second refresh uses the persisted refresh token, not the bootstrap one.
    let output = ws.run(&["refresh"]).await?;
    assert_eq!(output.status.code(), Some(0));
    assert!(upstream.grants()[1].contains("refresh_token=refresh-1"));
    assert_eq!(upstream.issued(), 2);
    Ok(())
}

#[tokio::test]
async fn rejected_refresh_exits_nonzero() -> anyhow::Result<()> {
    let upstream = upstream().await?;
    upstream.reject_refresh();
    let ws = Workspace::new(&upstream)?;

    let output = ws.run(&["--refresh-token", "revoked", "refresh"]).await?;
    assert_eq!(output.status.code(), Some(1));
    assert!(!ws.token_file().exists());
    Ok(())
}

#[tokio::test]
async fn missing_credentials_exit_with_usage_code() -> anyhow::Result<()> {
    let upstream = upstream().await?;
    let ws = Workspace::new(&upstream)?;

    let output = ws.run_raw(&["refresh"]).await?;
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("GHL_CLIENT_ID"));
    Ok(())
}

#[tokio::test]
async fn missing_token_exits_with_usage_code() -> anyhow::Result<()> {
    let upstream = upstream().await?;
    let ws = Workspace::new(&upstream)?;

    let output = ws.run(&["refresh"]).await?;
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(upstream.issued(), 0);
    Ok(())
}

#[tokio::test]
async fn users_find_prints_member() -> anyhow::Result<()> {
    let upstream = upstream().await?;
    let ws = Workspace::new(&upstream)?;

    let output = ws.run(&["--refresh-token", "boot", "users", "find", "GRACE@example.com"]).await?;
    assert_eq!(output.status.code(), Some(0));
    let found = stdout_json(&output)?;
    assert_eq!(found["identifier"], "u2");
    assert_eq!(found["status"], "active");

    let output = ws.run(&["users", "find", "nobody@example.com"]).await?;
    assert_eq!(output.status.code(), Some(1));
    Ok(())
}

// -- Offboarding --------------------------------------------------------------

#[tokio::test]
async fn run_once_deactivates_listed_member() -> anyhow::Result<()> {
    let upstream = upstream().await?;
    let ws = Workspace::new(&upstream)?;

    let s = Selectors::default();
    let browser = FakeBrowser::start(
        FakePage::default()
            .with(&s.login_email, "")
            .with(&s.login_password, "")
            .with(&s.login_submit, "Sign in")
            .with(&s.logged_in, "")
            .with(&s.team_ready, "")
            .with(&s.search_input, "")
            .with(&s.member_row.replace("{id}", "u1"), "Ada Test ada@example.com")
            .with(&s.row_menu, "")
            .with(&s.deactivate_button, "Deactivate")
            .with(&s.confirm_button, "Yes, deactivate")
            .reveal_on_click(&s.confirm_button, &s.deactivated_marker, "Inactive"),
    )
    .await;

    let list = ws.path("leavers.txt");
    std::fs::write(&list, "# departed this week\nada@example.com\nghost@example.com\n")?;
    let outcomes = ws.path("outcomes.jsonl");
    let (list_arg, outcomes_arg, driver) =
        (list.display().to_string(), outcomes.display().to_string(), browser.url());

    let output = ws
        .run(&[
            "--refresh-token",
            "boot",
            "run-once",
            "--removal-list",
            &list_arg,
            "--outcome-log",
            &outcomes_arg,
            "--webdriver-url",
            &driver,
            "--app-url",
            "https://app.example.test",
            "--login-email",
            "admin@example.com",
            "--login-password",
            "pw",
            "--step-timeout-secs",
            "2",
        ])
        .await?;
    assert_eq!(output.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let summary = stdout_json(&output)?;
    assert_eq!(summary["state"], "done");
    assert_eq!(summary["succeeded"], 1);
    assert_eq!(summary["failed"], 0);
    assert_eq!(summary["unmatched"], serde_json::json!(["ghost@example.com"]));

    let log = std::fs::read_to_string(&outcomes)?;
    assert_eq!(log.lines().count(), 1);
    assert!(log.contains("\"u1\""));

    let page = browser.page();
    assert!(page.clicks.contains(&s.confirm_button));
    assert_eq!(
        page.navigations.last().map(String::as_str),
        Some("https://app.example.test/v2/location/loc-1/settings/staff/team")
    );
    assert_eq!(page.sessions_opened, page.sessions_deleted);
    assert!(!ws.path("run.lock").exists());
    Ok(())
}
