// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use offboard::app;
use offboard::config::Config;
use offboard::error::Error;

#[tokio::main]
async fn main() {
    let config = Config::parse().with_default_command();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    app::init_tracing(&config);

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    match app::run(config, shutdown).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("fatal: {e:#}");
            let code = match e.downcast_ref::<Error>() {
                Some(Error::Config(_)) => 2,
                _ => 1,
            };
            std::process::exit(code);
        }
    }
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM");
                shutdown.cancel();
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT");
                shutdown.cancel();
            }
        }
    });
}
