//! A failed refresh rejects everyone waiting on it and ends the session.

use super::harness::{Echo, RefreshBehavior, TestHarness};
use crate::{codes, ApiError, ClientOptions};
use client_storage::{KeyValueStore, StorageKeys, TokenData};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_refresh_rejects_all_callers_identically() {
    let h = TestHarness::new().await;
    h.backend.set_delay(Duration::from_millis(20));
    h.session.set_refresh_delay(Duration::from_millis(60));
    h.session
        .set_behavior(RefreshBehavior::Fail(ApiError::new("Refresh token revoked", 401)));
    h.expire_token();

    let calls: Vec<_> = (0..3)
        .map(|i| {
            let client = h.client.clone();
            tokio::spawn(async move { client.get::<Echo>(&format!("/cards/{}", i)).await })
        })
        .collect();

    let mut errors = Vec::new();
    for call in calls {
        errors.push(call.await.unwrap().unwrap_err());
    }

    assert_eq!(errors[0].message, "Refresh token revoked");
    assert_eq!(errors[0].status, 401);
    assert_eq!(errors[0].code.as_deref(), Some(codes::REFRESH_FAILED));
    assert!(errors.iter().all(|e| *e == errors[0]));

    assert_eq!(h.session.refresh_calls(), 1);
    assert_eq!(h.session.logout_calls(), 1);
    assert_eq!(h.tokens.get_access_token().await, None);
    assert_eq!(h.tokens.get_refresh_token().await, None);
    assert!(!h.has_user_data().await);
    assert!(!h.client.is_refreshing());
}

#[tokio::test]
async fn refresh_error_code_is_preserved() {
    let h = TestHarness::new().await;
    h.session.set_behavior(RefreshBehavior::Fail(
        ApiError::new("Refresh token expired", 401).with_code("E_REFRESH"),
    ));
    h.expire_token();

    let err = h.client.get::<Echo>("/cards").await.unwrap_err();
    assert_eq!(err.code.as_deref(), Some("E_REFRESH"));
    assert_eq!(err.message, "Refresh token expired");
}

#[tokio::test]
async fn hung_refresh_times_out_and_logs_out() {
    let h = TestHarness::with_options(ClientOptions {
        refresh_timeout: Some(Duration::from_millis(50)),
        ..ClientOptions::default()
    })
    .await;
    h.session.set_behavior(RefreshBehavior::Hang);
    h.expire_token();

    let err = h.client.get::<Echo>("/cards").await.unwrap_err();

    assert_eq!(err.code.as_deref(), Some(codes::REFRESH_TIMEOUT));
    assert_eq!(err.status, 0);
    assert_eq!(h.session.logout_calls(), 1);
    assert!(!h.client.is_refreshing());
    assert_eq!(h.tokens.get_access_token().await, None);

    // A new login followed by another expiry refreshes normally.
    h.tokens
        .set_tokens(&TokenData::new("token-0").with_refresh_token("refresh-0"))
        .await
        .unwrap();
    h.session.set_behavior(RefreshBehavior::Succeed);
    let echo: Echo = h.client.get("/cards").await.unwrap();
    assert_eq!(echo.token, "token-2");
}

#[tokio::test]
async fn proactive_refresh_failure_logs_out() {
    let h = TestHarness::new().await;
    h.session
        .set_behavior(RefreshBehavior::Fail(ApiError::new("Refresh token revoked", 401)));

    let err = h.client.refresh_session().await.unwrap_err();

    assert_eq!(err.code.as_deref(), Some(codes::REFRESH_FAILED));
    assert_eq!(h.session.logout_calls(), 1);
    assert!(!h.has_user_data().await);
    assert!(!h.store.has(StorageKeys::AUTH_TOKEN).await.unwrap());
}

/// A request already in flight when the refresh failed shares that failure
/// instead of starting another refresh.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn late_unauthorized_shares_failed_refresh() {
    let h = TestHarness::new().await;
    h.backend.set_path_delay("/slow", Duration::from_millis(150));
    h.session.set_refresh_delay(Duration::from_millis(20));
    h.session
        .set_behavior(RefreshBehavior::Fail(ApiError::new("Refresh token revoked", 401)));
    h.expire_token();

    let slow = {
        let client = h.client.clone();
        tokio::spawn(async move { client.get::<Echo>("/slow").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let fast_err = h.client.get::<Echo>("/fast").await.unwrap_err();
    let slow_err = slow.await.unwrap().unwrap_err();

    assert_eq!(fast_err.code.as_deref(), Some(codes::REFRESH_FAILED));
    assert_eq!(slow_err, fast_err);
    assert_eq!(h.session.refresh_calls(), 1);
    assert_eq!(h.session.logout_calls(), 1);
    assert_eq!(h.backend.requests_to("/slow").len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn joined_proactive_refresh_shares_failure() {
    let h = TestHarness::new().await;
    h.session.set_refresh_delay(Duration::from_millis(60));
    h.session
        .set_behavior(RefreshBehavior::Fail(ApiError::new("Refresh token revoked", 401)));

    let first = {
        let client = h.client.clone();
        tokio::spawn(async move { client.refresh_session().await })
    };
    tokio::time::sleep(Duration::from_millis(15)).await;
    assert!(h.client.is_refreshing());

    let joined = h.client.refresh_session().await.unwrap_err();
    let ran = first.await.unwrap().unwrap_err();

    assert_eq!(joined, ran);
    assert_eq!(h.session.refresh_calls(), 1);
    assert_eq!(h.session.logout_calls(), 1);
}
