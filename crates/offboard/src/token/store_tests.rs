// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use proptest::prelude::*;

use super::*;

fn token(access: &str, expires_at: u64) -> Token {
    Token::new(access.to_owned(), format!("refresh-{access}"), expires_at)
}

#[test]
fn get_current_returns_latest_write() {
    let now = epoch_secs();
    let (writer, reader) = token_store(token("a", now + 3600));
    assert_eq!(reader.get_current().expect("valid").access_token, "a");

    writer.set(token("b", now + 7200)).expect("set");
    assert_eq!(reader.get_current().expect("valid").access_token, "b");
    assert_eq!(reader.generation(), 1);
}

#[test]
fn set_rejects_expired_token_and_keeps_previous() {
    let now = epoch_secs();
    let (writer, reader) = token_store(token("good", now + 3600));

    let err = writer.set(token("stale", now.saturating_sub(10))).expect_err("must reject");
    assert_eq!(err.code(), "INVALID_TOKEN_STATE");
    assert_eq!(reader.get_current().expect("valid").access_token, "good");
    assert_eq!(reader.generation(), 0);
}

#[test]
fn expired_seed_is_not_handed_out() {
    let now = epoch_secs();
    let (writer, reader) = token_store(token("old", now.saturating_sub(1)));
    assert!(matches!(reader.get_current(), Err(Error::TokenExpired)));
    // The writer still sees it so the refresh value can be exchanged.
    assert_eq!(writer.current().refresh_token, "refresh-old");
}

#[tokio::test]
async fn request_renewal_wakes_writer() {
    let now = epoch_secs();
    let (writer, reader) = token_store(token("a", now + 3600));
    reader.request_renewal();
    tokio::time::timeout(Duration::from_secs(1), writer.renewal_requested())
        .await
        .expect("notification should be stored for the writer");
}

#[tokio::test]
async fn wait_for_renewal_sees_next_write() {
    let now = epoch_secs();
    let (writer, reader) = token_store(token("a", now + 3600));
    let seen = reader.generation();

    let waiter = {
        let reader = reader.clone();
        tokio::spawn(async move { reader.wait_for_renewal(seen, Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    writer.set(token("b", now + 7200)).expect("set");

    assert_eq!(waiter.await.expect("join"), Some(1));
}

#[tokio::test]
async fn wait_for_renewal_times_out() {
    let now = epoch_secs();
    let (_writer, reader) = token_store(token("a", now + 3600));
    assert_eq!(reader.wait_for_renewal(0, Duration::from_millis(20)).await, None);
}

#[tokio::test]
async fn concurrent_readers_never_see_mixed_pairs() {
    let now = epoch_secs();
    let (writer, reader) = token_store(token("0", now + 3600));

    let mut readers = Vec::new();
    for _ in 0..4 {
        let reader = reader.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..500 {
                let t = reader.get_current().expect("valid");
                assert_eq!(t.refresh_token, format!("refresh-{}", t.access_token));
                tokio::task::yield_now().await;
            }
        }));
    }
    for i in 1..200u64 {
        writer.set(token(&i.to_string(), now + 3600 + i)).expect("set");
        tokio::task::yield_now().await;
    }
    for r in readers {
        r.await.expect("reader task");
    }
}

proptest! {
    /// Whatever sequence of renewals (good or already-expired) is attempted,
    /// readers only ever see the last successfully stored token, and it is
    /// never expired.
    #[test]
    fn store_never_regresses(
        offsets in proptest::collection::vec(prop_oneof![-600i64..=0, 60i64..7200], 1..40)
    ) {
        let now = epoch_secs();
        let (writer, reader) = token_store(token("seed", now + 3600));
        let mut last_good = "seed".to_owned();

        for (i, off) in offsets.iter().enumerate() {
            let expires_at = (now as i64 + off).max(0) as u64;
            let name = format!("t{i}");
            if writer.set(token(&name, expires_at)).is_ok() {
                last_good = name;
            }
            let current = reader.get_current();
            prop_assert!(current.is_ok());
            let current = current.map(|t| t.access_token.clone()).unwrap_or_default();
            prop_assert_eq!(&current, &last_good);
        }
    }
}
