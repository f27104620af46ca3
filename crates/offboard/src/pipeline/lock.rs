// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exclusive run lock: `flock(2)` on a file holding the owner's PID.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Held for the duration of a run. The kernel drops the flock when the
/// holder exits, so a crashed run never blocks the next one.
pub struct RunLock {
    path: PathBuf,
    _file: Flock<File>,
}

impl std::fmt::Debug for RunLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLock").field("path", &self.path).finish()
    }
}

impl RunLock {
    /// Take the lock at `path`.
    ///
    /// Fails with [`Error::RunInProgress`] while another holder has the file
    /// locked, whether or not it has written its PID yet. Leftover content
    /// from a dead holder is overwritten.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        // Retry when the previous holder unlinked the file between our open
        // and our flock.
        for _ in 0..3 {
            let file =
                OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?;
            let mut locked = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(locked) => locked,
                Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                    return Err(Error::RunInProgress { pid: read_pid(path).unwrap_or_default() });
                }
                Err((_, errno)) => return Err(std::io::Error::from(errno).into()),
            };
            if !still_linked(&locked, path)? {
                debug!(path = %path.display(), "run lock was replaced while locking, retrying");
                continue;
            }
            if let Some(previous) = read_pid(path) {
                debug!(path = %path.display(), previous, "taking over run lock from exited holder");
            }
            locked.set_len(0)?;
            locked.seek(SeekFrom::Start(0))?;
            writeln!(locked, "{}", std::process::id())?;
            return Ok(Self { path: path.to_owned(), _file: locked });
        }
        Err(Error::RunInProgress { pid: read_pid(path).unwrap_or_default() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    // Unlink while the flock is still held; the field drops after this.
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), err = %e, "failed to remove run lock");
        }
    }
}

/// Whether `path` still names the file we hold open.
fn still_linked(file: &File, path: &Path) -> Result<bool> {
    let held = file.metadata()?;
    match std::fs::metadata(path) {
        Ok(on_disk) => Ok(held.dev() == on_disk.dev() && held.ino() == on_disk.ino()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
