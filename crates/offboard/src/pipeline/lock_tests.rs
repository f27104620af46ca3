// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn lock_file_holds_our_pid_and_is_removed_on_drop() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("run.lock");

    let lock = RunLock::acquire(&path)?;
    assert_eq!(read_pid(&path), Some(std::process::id()));
    assert_eq!(lock.path(), path);

    drop(lock);
    assert!(!path.exists());
    Ok(())
}

#[test]
fn live_holder_blocks_second_run() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("run.lock");

    let _held = RunLock::acquire(&path)?;
    let err = RunLock::acquire(&path).expect_err("overlapping run");
    assert!(matches!(err, Error::RunInProgress { pid } if pid == std::process::id()));
    Ok(())
}

#[yare::parameterized(
    dead_pid = { "999999999\n" },
    garbage = { "not a pid" },
    empty = { "" },
)]
fn leftover_unlocked_file_is_taken_over(contents: &str) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("run.lock");
    std::fs::write(&path, contents).expect("write leftover lock");

    let lock = RunLock::acquire(&path).expect("take over");
    assert_eq!(read_pid(lock.path()), Some(std::process::id()));
}

#[test]
fn holder_that_has_not_written_its_pid_still_blocks() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("run.lock");

    // A holder between flock and writing its PID: locked but empty.
    let file = OpenOptions::new().write(true).create(true).truncate(true).open(&path)?;
    let holder = Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, e)| e)?;

    let err = RunLock::acquire(&path).expect_err("must not steal a held lock");
    assert!(matches!(err, Error::RunInProgress { pid: 0 }));
    assert_eq!(std::fs::read_to_string(&path)?, "");

    drop(holder);
    let lock = RunLock::acquire(&path)?;
    assert_eq!(read_pid(lock.path()), Some(std::process::id()));
    Ok(())
}

#[test]
fn lock_is_reusable_after_release() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("run.lock");

    let first = RunLock::acquire(&path)?;
    drop(first);
    let second = RunLock::acquire(&path)?;
    let err = RunLock::acquire(&path).expect_err("second holder is live");
    assert!(matches!(err, Error::RunInProgress { pid } if pid == std::process::id()));
    drop(second);
    assert!(!path.exists());
    Ok(())
}

#[test]
fn creates_missing_parent_directory() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("state").join("run.lock");
    let _lock = RunLock::acquire(&path)?;
    assert!(path.exists());
    Ok(())
}
