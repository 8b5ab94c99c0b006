use std::time::Duration;

use stampede_http::{HttpClient, HttpRequest, HttpTransportErrorKind};
use stampede_testserver::{
    DEFAULT_API_KEY, DEFAULT_EMAIL, DEFAULT_PASSWORD, TestServer, TestServerConfig,
};

#[tokio::test]
async fn login_returns_token_json() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start server: {e}"));
    let client = HttpClient::default();

    let req = HttpRequest::post_json(
        format!("{}/auth/login", server.api_url()),
        &serde_json::json!({ "email": DEFAULT_EMAIL, "password": DEFAULT_PASSWORD }),
    )
    .unwrap_or_else(|e| panic!("{e}"));

    let res = client
        .request(req)
        .await
        .unwrap_or_else(|e| panic!("request: {e}"));
    assert_eq!(res.status, 200);

    let body: serde_json::Value =
        serde_json::from_slice(&res.body).unwrap_or_else(|e| panic!("json: {e}"));
    assert!(body.get("access_token").and_then(|v| v.as_str()).is_some());
    assert_eq!(server.stats().logins(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn non_success_statuses_are_responses_not_errors() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start server: {e}"));
    let client = HttpClient::default();

    let res = client
        .get(&format!("{}/status/503", server.base_url()))
        .await
        .unwrap_or_else(|e| panic!("request: {e}"));
    assert_eq!(res.status, 503);

    server.shutdown().await;
}

#[tokio::test]
async fn request_timeout_is_classified() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start server: {e}"));
    let client = HttpClient::default();

    let req = HttpRequest::get(format!("{}/slow", server.base_url()))
        .with_timeout(Duration::from_millis(5));
    let err = match client.request(req).await {
        Ok(res) => panic!("expected timeout, got {}", res.status),
        Err(e) => e,
    };
    assert_eq!(err.transport_error_kind(), HttpTransportErrorKind::Timeout);

    server.shutdown().await;
}

#[tokio::test]
async fn transaction_fields_are_validated_before_the_limit() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start server: {e}"));
    let client = HttpClient::default();
    let token = format!("Bearer {}", TestServerConfig::default().token);

    let valid = serde_json::json!({
        "contract_number": "CTR-1-0",
        "otr": 1000.0,
        "admin_fee": 10000.0,
        "installment_amount": 105000.0,
        "interest_amount": 10000.0,
        "asset_name": "Motor",
        "tenor": 3,
    });
    let with = |field: &str, value: serde_json::Value| {
        let mut body = valid.clone();
        body[field] = value;
        body
    };

    let cases = [
        (with("tenor", serde_json::json!(4)), "tenor"),
        (with("otr", serde_json::json!(0.0)), "`otr`"),
        (with("asset_name", serde_json::json!("")), "`asset_name`"),
    ];
    for (body, expected) in cases {
        let req = HttpRequest::post_json(format!("{}/transaction/", server.api_url()), &body)
            .unwrap_or_else(|e| panic!("{e}"))
            .with_header("X-API-KEY", DEFAULT_API_KEY)
            .with_header("Authorization", token.as_str());
        let res = client
            .request(req)
            .await
            .unwrap_or_else(|e| panic!("request: {e}"));
        assert_eq!(res.status, 400, "{body}");
        let text = res.body_utf8().unwrap_or_default();
        assert!(text.contains(expected), "{body}: {text}");
    }
    assert_eq!(server.stats().transactions_created(), 0);
    assert_eq!(server.stats().transactions_rejected(), 0);

    let req = HttpRequest::post_json(format!("{}/transaction/", server.api_url()), &valid)
        .unwrap_or_else(|e| panic!("{e}"))
        .with_header("X-API-KEY", DEFAULT_API_KEY)
        .with_header("Authorization", token.as_str());
    let res = client
        .request(req)
        .await
        .unwrap_or_else(|e| panic!("request: {e}"));
    assert_eq!(res.status, 201);
    assert_eq!(server.stats().transactions_created(), 1);

    server.shutdown().await;
}
