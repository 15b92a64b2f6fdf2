//! Every failure reaches the caller as an `ApiError`.

use super::harness::{ok_envelope, Echo, MockBackend, TestHarness};
use crate::{
    codes, messages, ApiEnvelope, ClientOptions, HttpResponse, PreparedRequest, RequestDescriptor,
    TransportError,
};
use serde_json::{json, Value};

#[tokio::test]
async fn connection_failure_is_a_network_error() {
    let h = TestHarness::new().await;
    h.backend
        .respond_with(|_, _| Err(TransportError::Connect("connection refused".into())));

    let err = h.client.get::<Value>("/cards").await.unwrap_err();

    assert_eq!(err.status, 0);
    assert_eq!(err.message, messages::NETWORK_ERROR);
    assert!(err.is_network());
    assert_eq!(h.session.refresh_calls(), 0);
    assert_eq!(h.session.logout_calls(), 0);
}

#[tokio::test]
async fn transport_timeout_keeps_its_code() {
    let h = TestHarness::new().await;
    h.backend.respond_with(|_, _| Err(TransportError::Timeout));

    let err = h.client.get::<Value>("/cards").await.unwrap_err();

    assert_eq!(err.status, 0);
    assert_eq!(err.code.as_deref(), Some(codes::TIMEOUT));
}

#[tokio::test]
async fn server_error_keeps_server_message_and_code() {
    let h = TestHarness::new().await;
    h.backend.respond_with(|_, _| {
        Ok(HttpResponse::new(
            500,
            json!({"message": "Maintenance", "code": 503}).to_string(),
        ))
    });

    let err = h.client.get::<Value>("/cards").await.unwrap_err();

    assert_eq!(err.status, 500);
    assert_eq!(err.message, "Maintenance");
    assert_eq!(err.code.as_deref(), Some("503"));
    assert_eq!(h.session.refresh_calls(), 0);
}

#[tokio::test]
async fn html_error_page_gets_generic_message() {
    let h = TestHarness::new().await;
    h.backend
        .respond_with(|_, _| Ok(HttpResponse::new(502, "<html>Bad Gateway</html>")));

    let err = h.client.get::<Value>("/cards").await.unwrap_err();

    assert_eq!(err.status, 502);
    assert_eq!(err.message, messages::GENERIC_ERROR);
    assert_eq!(h.session.refresh_calls(), 0);
}

#[tokio::test]
async fn plain_text_expiry_notice_triggers_refresh() {
    let h = TestHarness::new().await;
    h.backend.respond_with(|request, valid| {
        if request.bearer_token() == Some(valid) {
            MockBackend::token_gated(request, valid)
        } else {
            Ok(HttpResponse::new(403, "Token Expired"))
        }
    });
    h.expire_token();

    let echo: Echo = h.client.get("/cards").await.unwrap();

    assert_eq!(echo.token, "token-1");
    assert_eq!(h.session.refresh_calls(), 1);
}

fn sign_in_required(
    request: &PreparedRequest,
    valid: &str,
) -> Result<HttpResponse, TransportError> {
    if request.bearer_token() == Some(valid) {
        MockBackend::token_gated(request, valid)
    } else {
        Ok(HttpResponse::new(
            200,
            json!({"success": false, "code": "E100", "msg": "Please sign in"}).to_string(),
        ))
    }
}

#[tokio::test]
async fn unsuccessful_envelope_refreshes_by_default() {
    let h = TestHarness::new().await;
    assert!(h.client.options().unsuccessful_envelope_requires_auth);
    h.backend.respond_with(sign_in_required);
    h.expire_token();

    let echo: Echo = h.client.get("/cards").await.unwrap();

    assert_eq!(echo.token, "token-1");
    assert_eq!(h.session.refresh_calls(), 1);
    assert_eq!(h.session.logout_calls(), 0);
}

#[tokio::test]
async fn unsuccessful_envelope_is_an_error_when_opted_out() {
    let h = TestHarness::with_options(ClientOptions {
        unsuccessful_envelope_requires_auth: false,
        ..ClientOptions::default()
    })
    .await;
    h.backend.respond_with(sign_in_required);
    h.expire_token();

    let err = h.client.get::<Echo>("/cards").await.unwrap_err();

    assert_eq!(err.status, 200);
    assert_eq!(err.message, "Please sign in");
    assert_eq!(err.code.as_deref(), Some("E100"));
    assert_eq!(h.session.refresh_calls(), 0);
}

#[tokio::test]
async fn raw_variant_returns_whole_envelope() {
    let h = TestHarness::with_options(ClientOptions {
        unsuccessful_envelope_requires_auth: false,
        ..ClientOptions::default()
    })
    .await;

    let envelope: ApiEnvelope<Echo> = h.client.get_raw("/cards").await.unwrap();
    assert!(envelope.success);
    assert_eq!(envelope.code.as_deref(), Some("0"));
    assert_eq!(envelope.text(), "ok");
    assert_eq!(envelope.data.unwrap().path, "/cards");

    h.backend.respond_with(sign_in_required);
    h.expire_token();
    let envelope: ApiEnvelope<Echo> = h.client.get_raw("/cards").await.unwrap();
    assert!(!envelope.success);
    assert_eq!(envelope.text(), "Please sign in");
}

#[tokio::test]
async fn non_json_success_body_is_unexpected_format() {
    let h = TestHarness::new().await;
    h.backend
        .respond_with(|_, _| Ok(HttpResponse::new(200, "<html>ok</html>")));

    let err = h.client.get::<Value>("/cards").await.unwrap_err();

    assert_eq!(err.status, 200);
    assert_eq!(err.code.as_deref(), Some(codes::UNEXPECTED_FORMAT));
}

#[tokio::test]
async fn execute_returns_raw_response() {
    let h = TestHarness::new().await;
    h.backend.respond_with(|_, _| Ok(HttpResponse::new(204, "")));

    let response = h
        .client
        .execute(RequestDescriptor::delete("/cards/7"))
        .await
        .unwrap();

    assert_eq!(response.status, 204);
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn missing_data_is_accepted_for_unit() {
    let h = TestHarness::new().await;
    h.backend.respond_with(|_, _| {
        Ok(HttpResponse::new(
            200,
            json!({"success": true, "code": "0", "msg": "deleted"}).to_string(),
        ))
    });

    h.client.delete::<()>("/cards/7").await.unwrap();
}

#[tokio::test]
async fn json_body_and_custom_headers_reach_transport() {
    let h = TestHarness::new().await;
    h.backend
        .respond_with(|request, _| Ok(ok_envelope(request.body.clone().unwrap_or(Value::Null))));

    let descriptor = RequestDescriptor::patch("/profile")
        .with_json(json!({"nickname": "ada"}))
        .with_header("X-Trace", "abc");
    let body: Value = h.client.request(descriptor).await.unwrap();
    assert_eq!(body, json!({"nickname": "ada"}));

    let sent = &h.backend.requests_to("/profile")[0];
    assert_eq!(sent.header("x-trace"), Some("abc"));
    assert_eq!(sent.bearer_token(), Some("token-0"));
    assert_eq!(sent.header("content-type"), Some("application/json"));
}
