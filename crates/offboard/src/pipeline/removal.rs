// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authoritative list of members to offboard.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::BoxFuture;

/// Where removal keys come from. A key is a member identifier or email.
pub trait RemovalSource: Send + Sync {
    fn load(&self) -> BoxFuture<'_, Result<Vec<String>>>;
}

/// Removal list read from disk on every run.
///
/// Either a JSON array of strings, or plain text with one key per line
/// (blank lines and `#` comments ignored).
pub struct FileRemovalSource {
    path: PathBuf,
}

impl FileRemovalSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl RemovalSource for FileRemovalSource {
    fn load(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let contents = tokio::fs::read_to_string(&self.path).await?;
            parse_removal_list(&contents).map_err(|e| match e {
                Error::Config(msg) => Error::Config(format!("{}: {msg}", self.path.display())),
                other => other,
            })
        })
    }
}

/// In-memory source, for fixed lists.
pub struct StaticRemovalSource(pub Vec<String>);

impl RemovalSource for StaticRemovalSource {
    fn load(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        let keys = self.0.clone();
        Box::pin(async move { Ok(keys) })
    }
}

/// Parse a removal list, trimming keys and dropping duplicates (first wins).
pub fn parse_removal_list(contents: &str) -> Result<Vec<String>> {
    let raw: Vec<String> = if contents.trim_start().starts_with('[') {
        serde_json::from_str(contents)
            .map_err(|e| Error::Config(format!("invalid removal list: {e}")))?
    } else {
        contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_owned)
            .collect()
    };

    let mut keys: Vec<String> = Vec::with_capacity(raw.len());
    for key in raw {
        let key = key.trim();
        if !key.is_empty() && !keys.iter().any(|k| k.eq_ignore_ascii_case(key)) {
            keys.push(key.to_owned());
        }
    }
    Ok(keys)
}

#[cfg(test)]
#[path = "removal_tests.rs"]
mod tests;
