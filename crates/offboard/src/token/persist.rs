// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token persistence: load/save `tokens.json` with atomic writes.

use std::path::Path;

use super::Token;
use crate::error::{Error, Result};

/// Load the persisted token, or `None` if the file does not exist.
pub fn load(path: &Path) -> Result<Option<Token>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let token: Token = serde_json::from_str(&contents)?;
    Ok(Some(token))
}

/// Starting token for the process: the persisted one if present, otherwise
/// an already-expired placeholder around `bootstrap_refresh` so the refresher
/// performs the initial exchange immediately.
///
/// A bootstrap refresh token given explicitly wins over a persisted token
/// that has no refresh value.
pub fn load_or_bootstrap(path: &Path, bootstrap_refresh: Option<&str>) -> Result<Token> {
    match (load(path)?, bootstrap_refresh) {
        (Some(token), _) if !token.refresh_token.is_empty() => Ok(token),
        (_, Some(refresh)) if !refresh.is_empty() => {
            tracing::info!(path = %path.display(), "no persisted token, bootstrapping from refresh token");
            Ok(Token::new(String::new(), refresh.to_owned(), 0))
        }
        _ => Err(Error::Config(format!(
            "no refresh token in {} and GHL_REFRESH_TOKEN is not set",
            path.display()
        ))),
    }
}

/// Save the token atomically (write tmp + rename).
///
/// The temp name carries PID + counter so concurrent saves never share a
/// temp file.
pub fn save(path: &Path, token: &Token) -> Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(token)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;
