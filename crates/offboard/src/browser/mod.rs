// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Account deactivation through the workspace's admin UI.

pub mod steps;
pub mod webdriver;

use crate::directory::DirectoryEntry;
use crate::error::Result;
use crate::BoxFuture;

pub use steps::{BrowserDeactivator, BrowserSettings, Selectors};
pub use webdriver::WebDriver;

/// What a successful deactivation call found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deactivation {
    Deactivated,
    /// The member was already inactive or no longer listed; nothing changed.
    AlreadyDeactivated,
}

/// Capability to deactivate one workspace member.
///
/// Implementations must be idempotent: deactivating an inactive member
/// returns [`Deactivation::AlreadyDeactivated`], not an error.
pub trait AccountDeactivator: Send + Sync {
    fn deactivate<'a>(&'a self, target: &'a DirectoryEntry) -> BoxFuture<'a, Result<Deactivation>>;
}
