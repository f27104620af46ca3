// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::fake_jwt;

#[test]
fn decodes_location_metadata() {
    let jwt = fake_jwt(&serde_json::json!({
        "exp": 1_900_000_000u64,
        "authClassId": "loc-123",
        "companyId": "comp-9",
        "scopes": ["users.readonly"],
    }));
    let claims = decode(&jwt).expect("claims");
    assert_eq!(claims.exp, Some(1_900_000_000));
    assert_eq!(claims.auth_class_id.as_deref(), Some("loc-123"));
    assert_eq!(claims.company_id.as_deref(), Some("comp-9"));
}

#[test]
fn missing_claims_are_none() {
    let jwt = fake_jwt(&serde_json::json!({ "sub": "x" }));
    assert_eq!(decode(&jwt), Some(AccessClaims::default()));
}

#[yare::parameterized(
    opaque = { "not-a-jwt" },
    two_segments = { "aaa.bbb" },
    four_segments = { "a.b.c.d" },
    bad_base64 = { "a.!!!.c" },
)]
fn rejects_non_jwt(input: &str) {
    assert!(decode(input).is_none());
}
