//! Signed link creation over HTTP.
//!
//! Every rejection path of the request-signing protocol is exercised through
//! the real router, including the edge rate limiter.

mod common;

use axum::{
    body::Body,
    http::{
        header::{LOCATION, RETRY_AFTER},
        Request, StatusCode,
    },
    Router,
};
use chrono::Utc;
use common::*;
use serde_json::Value;
use smart_bridge::api::create_api_router;
use smart_bridge::app::Services;
use smart_bridge::auth::{AuthError, AuthRequest};
use smart_bridge::links::target::MAX_TARGET_URL_LEN;
use smart_bridge::models::CredentialStatus;
use smart_bridge::redirect::create_redirect_router;
use std::sync::Arc;
use tower::ServiceExt;

fn api_app(services: &Arc<Services>) -> Router {
    create_api_router(Arc::clone(services)).layer(TestConnectInfoLayer::default())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

fn now() -> i64 {
    Utc::now().timestamp()
}

const COUPANG_BODY: &str = r#"{"target_url":"https://www.coupang.com/vp/products/123"}"#;

#[tokio::test]
async fn test_signed_request_creates_link() {
    let services = create_test_services(test_config()).await;
    let credential = issue_credential(&services.storage, 7).await;
    let app = api_app(&services);

    let (status, json) = send(&app, signed_request(&credential, COUPANG_BODY, now(), &nonce(1))).await;

    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["success"], true);
    assert_eq!(json["platform"], "Coupang");
    assert_eq!(json["target_url"], "https://www.coupang.com/vp/products/123");
    let slug = json["slug"].as_str().unwrap();
    assert_eq!(slug.len(), 6);
    assert_eq!(json["short_link"], format!("http://localhost:3000/go/{slug}"));

    let stored = services.storage.get_link_by_slug(slug).await.unwrap().unwrap();
    assert_eq!(stored.owner_id, Some(7));
    assert_eq!(stored.click_count, 0);

    let used = services
        .storage
        .get_credential(&credential.api_key)
        .await
        .unwrap()
        .unwrap();
    assert!(used.last_used_at.is_some());
}

#[tokio::test]
async fn test_custom_slug_conflict() {
    let services = create_test_services(test_config()).await;
    let credential = issue_credential(&services.storage, 1).await;
    let app = api_app(&services);
    let body = r#"{"target_url":"https://temu.com/item/1","slug":"summer-sale"}"#;

    let (status, json) = send(&app, signed_request(&credential, body, now(), &nonce(1))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["slug"], "summer-sale");
    assert_eq!(json["platform"], "Temu");

    let (status, json) = send(&app, signed_request(&credential, body, now(), &nonce(2))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "conflict");
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_invalid_custom_slug() {
    let services = create_test_services(test_config()).await;
    let credential = issue_credential(&services.storage, 1).await;
    let app = api_app(&services);
    let body = r#"{"target_url":"https://temu.com/item/1","slug":"no spaces"}"#;

    let (status, json) = send(&app, signed_request(&credential, body, now(), &nonce(1))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "invalid_slug");
}

#[tokio::test]
async fn test_self_redirect_is_rejected_in_every_spelling() {
    let services = create_test_services(test_config()).await;
    let credential = issue_credential(&services.storage, 1).await;
    let app = api_app(&services);

    let targets = [
        "http://localhost:3000/go/abc",
        "https://LOCALHOST/go/abc",
        "http://www.localhost:3000/%67o/abc",
        "http://localhost:3000//GO//abc",
        "http://localhost:3000/?go=abc",
    ];
    for (i, target) in targets.iter().enumerate() {
        let body = serde_json::json!({ "target_url": target }).to_string();
        let (status, json) = send(&app, signed_request(&credential, &body, now(), &nonce(i))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{target}");
        assert_eq!(json["code"], "invalid_url", "{target}");
    }
    assert_eq!(services.storage.count_links().await.unwrap(), 0);
}

#[tokio::test]
async fn test_non_http_target_is_rejected() {
    let services = create_test_services(test_config()).await;
    let credential = issue_credential(&services.storage, 1).await;
    let app = api_app(&services);

    for (i, target) in ["javascript:alert(1)", "ftp://example.com/file", ""].iter().enumerate() {
        let body = serde_json::json!({ "target_url": target }).to_string();
        let (status, json) = send(&app, signed_request(&credential, &body, now(), &nonce(i))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{target}");
        assert_eq!(json["code"], "invalid_url");
    }
}

#[tokio::test]
async fn test_browser_user_agent_is_forbidden() {
    let services = create_test_services(test_config()).await;
    let credential = issue_credential(&services.storage, 1).await;
    let app = api_app(&services);

    let mut request = signed_request(&credential, COUPANG_BODY, now(), &nonce(1));
    request.headers_mut().insert(
        "user-agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64)".parse().unwrap(),
    );
    let (status, json) = send(&app, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "forbidden");
}

#[tokio::test]
async fn test_missing_signature_headers() {
    let services = create_test_services(test_config()).await;
    let app = api_app(&services);

    let request = Request::builder()
        .method("POST")
        .uri("/links")
        .header("user-agent", CLIENT_ID)
        .body(Body::from(COUPANG_BODY))
        .unwrap();
    let (status, json) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "missing_headers");
}

#[tokio::test]
async fn test_stale_timestamp_is_expired() {
    let services = create_test_services(test_config()).await;
    let credential = issue_credential(&services.storage, 1).await;
    let app = api_app(&services);

    let (status, json) = send(
        &app,
        signed_request(&credential, COUPANG_BODY, now() - 60, &nonce(1)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "expired");
    assert!(json["message"].as_str().unwrap().contains("sync your clock"));
}

#[tokio::test]
async fn test_future_timestamp_is_expired() {
    let services = create_test_services(test_config()).await;
    let credential = issue_credential(&services.storage, 1).await;
    let app = api_app(&services);
    let tolerance = services.config.protocol.timestamp_tolerance_secs;

    let (status, json) = send(
        &app,
        signed_request(&credential, COUPANG_BODY, now() + tolerance + 20, &nonce(1)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "expired");

    // small drift either way is tolerated
    for (i, ts) in [now() + tolerance, now() - (tolerance - 2)].into_iter().enumerate() {
        let (status, json) =
            send(&app, signed_request(&credential, COUPANG_BODY, ts, &nonce(10 + i))).await;
        assert_eq!(status, StatusCode::OK, "{json}");
    }
}

#[tokio::test]
async fn test_timestamp_window_edges_are_inclusive() {
    let services = create_test_services(test_config()).await;
    let credential = issue_credential(&services.storage, 1).await;
    let tolerance = services.config.protocol.timestamp_tolerance_secs;
    let ts = 1_700_000_000;

    let cases = [
        (ts + tolerance, true),
        (ts - tolerance, true),
        (ts + tolerance + 1, false),
        (ts - tolerance - 1, false),
    ];
    for (i, (server_now, accepted)) in cases.into_iter().enumerate() {
        let request = signed_request(&credential, COUPANG_BODY, ts, &nonce(20 + i));
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        let result = services
            .authenticator
            .authenticate_at(
                &AuthRequest {
                    headers: &parts.headers,
                    body: &body,
                    client_ip: "127.0.0.1".parse().unwrap(),
                    rate_limit_checked: false,
                },
                server_now,
            )
            .await;
        if accepted {
            assert_eq!(result.unwrap().api_key, credential.api_key);
        } else {
            assert!(
                matches!(result, Err(AuthError::Expired { .. })),
                "server time {server_now} should be outside the window"
            );
        }
    }
}

#[tokio::test]
async fn test_longest_target_round_trips_through_redirect() {
    let services = create_test_services(test_config()).await;
    let credential = issue_credential(&services.storage, 1).await;
    let app = api_app(&services);
    let redirect = create_redirect_router(Arc::clone(&services))
        .unwrap()
        .layer(TestConnectInfoLayer::default());

    let prefix = "https://www.coupang.com/vp/products/1?itemId=2&q=";
    let target = format!("{prefix}{}", "a".repeat(MAX_TARGET_URL_LEN - prefix.len()));
    assert_eq!(target.len(), MAX_TARGET_URL_LEN);
    let body = serde_json::json!({ "target_url": target, "slug": "long-one" }).to_string();

    let (status, json) = send(&app, signed_request(&credential, &body, now(), &nonce(1))).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["target_url"], target.as_str());

    let response = redirect
        .oneshot(Request::builder().uri("/go/long-one").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION].as_bytes(), target.as_bytes());

    let too_long = format!("{target}a");
    let body = serde_json::json!({ "target_url": too_long }).to_string();
    let (status, json) = send(&app, signed_request(&credential, &body, now(), &nonce(2))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "invalid_url");
    assert_eq!(services.storage.count_links().await.unwrap(), 1);
}

#[tokio::test]
async fn test_replayed_nonce_is_rejected() {
    let services = create_test_services(test_config()).await;
    let credential = issue_credential(&services.storage, 1).await;
    let app = api_app(&services);
    let ts = now();

    let (status, _) = send(&app, signed_request(&credential, COUPANG_BODY, ts, &nonce(9))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(&app, signed_request(&credential, COUPANG_BODY, ts, &nonce(9))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "nonce_used");
    assert_eq!(services.storage.count_links().await.unwrap(), 1);
}

#[tokio::test]
async fn test_tampered_body_fails_signature() {
    let services = create_test_services(test_config()).await;
    let credential = issue_credential(&services.storage, 1).await;
    let app = api_app(&services);

    let mut request = signed_request(&credential, COUPANG_BODY, now(), &nonce(1));
    *request.body_mut() = Body::from(r#"{"target_url":"https://evil.example.com/"}"#);
    let (status, json) = send(&app, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "invalid_signature");
}

#[tokio::test]
async fn test_revoked_and_unknown_keys() {
    let services = create_test_services(test_config()).await;
    let credential = issue_credential(&services.storage, 1).await;
    let app = api_app(&services);

    services
        .storage
        .set_credential_status(&credential.api_key, CredentialStatus::Revoked)
        .await
        .unwrap();
    let (status, json) = send(&app, signed_request(&credential, COUPANG_BODY, now(), &nonce(1))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "invalid_key");

    let mut unknown = credential.clone();
    unknown.api_key = "sb_live_doesnotexist".to_string();
    let (status, json) = send(&app, signed_request(&unknown, COUPANG_BODY, now(), &nonce(2))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "invalid_key");
}

#[tokio::test]
async fn test_malformed_json_after_valid_signature() {
    let services = create_test_services(test_config()).await;
    let credential = issue_credential(&services.storage, 1).await;
    let app = api_app(&services);

    let (status, json) = send(&app, signed_request(&credential, "{not json", now(), &nonce(1))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "invalid_request");
}

#[tokio::test]
async fn test_rate_limit_per_ip() {
    let mut config = test_config();
    config.protocol.rate_limit_max_requests = 3;
    let services = create_test_services(config).await;
    let credential = issue_credential(&services.storage, 1).await;
    let app = api_app(&services);

    for i in 0..3 {
        let (status, _) = send(&app, signed_request(&credential, COUPANG_BODY, now(), &nonce(i))).await;
        assert_eq!(status, StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(signed_request(&credential, COUPANG_BODY, now(), &nonce(3)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
}

#[tokio::test]
async fn test_health_check() {
    let services = create_test_services(test_config()).await;
    let app = api_app(&services);

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, json) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "OK");
}
