//! Concurrent unauthorized requests trigger exactly one refresh.

use super::harness::{Echo, TestHarness, INITIAL_TOKEN};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_unauthorized_requests_share_one_refresh() {
    let h = TestHarness::new().await;
    h.backend.set_delay(Duration::from_millis(20));
    h.session.set_refresh_delay(Duration::from_millis(50));
    h.expire_token();

    let calls: Vec<_> = (0..3)
        .map(|i| {
            let client = h.client.clone();
            tokio::spawn(async move { client.get::<Echo>(&format!("/cards/{}", i)).await })
        })
        .collect();

    for (i, call) in calls.into_iter().enumerate() {
        let echo = call.await.unwrap().unwrap();
        assert_eq!(echo.path, format!("/cards/{}", i));
        assert_eq!(echo.token, "token-1");
    }

    assert_eq!(h.session.refresh_calls(), 1);
    assert_eq!(h.session.logout_calls(), 0);
    assert!(!h.client.is_refreshing());
    assert_eq!(h.client.queued_requests(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_waiters_still_one_refresh() {
    let h = TestHarness::new().await;
    h.backend.set_delay(Duration::from_millis(10));
    h.session.set_refresh_delay(Duration::from_millis(40));
    h.expire_token();

    let calls: Vec<_> = (0..20)
        .map(|i| {
            let client = h.client.clone();
            tokio::spawn(async move { client.get::<Echo>(&format!("/items/{}", i)).await })
        })
        .collect();

    for call in calls {
        assert_eq!(call.await.unwrap().unwrap().token, "token-1");
    }
    assert_eq!(h.session.refresh_calls(), 1);
}

#[tokio::test]
async fn valid_token_never_refreshes() {
    let h = TestHarness::new().await;

    let echo: Echo = h.client.get("/profile").await.unwrap();
    assert_eq!(echo.token, INITIAL_TOKEN);
    assert_eq!(h.session.refresh_calls(), 0);
    assert_eq!(h.backend.request_count(), 1);
}

#[tokio::test]
async fn later_requests_use_refreshed_token_directly() {
    let h = TestHarness::new().await;
    h.expire_token();

    let _: Echo = h.client.get("/first").await.unwrap();
    let before = h.backend.request_count();

    let echo: Echo = h.client.get("/second").await.unwrap();
    assert_eq!(echo.token, "token-1");
    assert_eq!(h.backend.request_count(), before + 1);
    assert_eq!(h.session.refresh_calls(), 1);
}

/// A 401 for a request sent before the latest refresh finished is replayed
/// with the new token instead of starting a second refresh.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stale_unauthorized_replays_without_second_refresh() {
    let h = TestHarness::new().await;
    h.backend.set_path_delay("/slow", Duration::from_millis(150));
    h.session.set_refresh_delay(Duration::from_millis(20));
    h.expire_token();

    let slow = {
        let client = h.client.clone();
        tokio::spawn(async move { client.get::<Echo>("/slow").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let fast: Echo = h.client.get("/fast").await.unwrap();
    assert_eq!(fast.token, "token-1");
    assert!(!h.client.is_refreshing());

    let slow = slow.await.unwrap().unwrap();
    assert_eq!(slow.token, "token-1");
    assert_eq!(h.session.refresh_calls(), 1);

    let slow_requests = h.backend.requests_to("/slow");
    assert_eq!(slow_requests.len(), 2);
    assert_eq!(slow_requests[0].bearer_token(), Some(INITIAL_TOKEN));
    assert_eq!(slow_requests[1].bearer_token(), Some("token-1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn proactive_refresh_is_single_flight() {
    let h = TestHarness::new().await;
    h.session.set_refresh_delay(Duration::from_millis(60));

    let first = {
        let client = h.client.clone();
        tokio::spawn(async move { client.refresh_session().await })
    };
    tokio::time::sleep(Duration::from_millis(15)).await;
    assert!(h.client.is_refreshing());

    // The second caller waits for the running refresh instead of starting one.
    assert_eq!(h.client.refresh_session().await.unwrap(), false);
    assert_eq!(h.tokens.get_access_token().await.as_deref(), Some("token-1"));
    assert_eq!(first.await.unwrap().unwrap(), true);
    assert_eq!(h.session.refresh_calls(), 1);
    assert_eq!(h.tokens.get_access_token().await.as_deref(), Some("token-1"));
}
