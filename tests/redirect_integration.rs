//! Redirect integration tests
//!
//! These tests drive the redirect listener end to end: lookup, response
//! headers, the interstitial page, and the click that lands in the store.

mod common;

use axum::{
    body::Body,
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE, LOCATION},
        Request, StatusCode,
    },
    Router,
};
use common::*;
use smart_bridge::app::Services;
use smart_bridge::models::link::meta_keys;
use smart_bridge::models::NewLink;
use smart_bridge::redirect::create_redirect_router;
use smart_bridge::settings::REDIRECT_DELAY;
use smart_bridge::storage::{ClickFilter, TimeBounds};
use std::sync::Arc;
use tower::ServiceExt;

const IPHONE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1";

fn redirect_app(services: &Arc<Services>) -> Router {
    create_redirect_router(Arc::clone(services))
        .unwrap()
        .layer(TestConnectInfoLayer::default())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn all_clicks(services: &Services) -> i64 {
    services
        .storage
        .count_clicks(&ClickFilter::new(TimeBounds::new(0, i64::MAX)))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_redirect_sets_location_and_no_store() {
    let services = create_test_services(test_config()).await;
    let link = create_link(
        &services.storage,
        "deal1",
        "https://www.coupang.com/vp/products/123?itemId=9",
    )
    .await;
    let app = redirect_app(&services);

    let request = Request::builder()
        .uri("/go/deal1")
        .header("user-agent", IPHONE_UA)
        .header("referer", "https://m.blog.naver.com/somepost")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    let headers = response.headers();
    assert_eq!(
        headers[LOCATION],
        "https://www.coupang.com/vp/products/123?itemId=9"
    );
    assert!(headers[CACHE_CONTROL].to_str().unwrap().contains("no-store"));
    assert_eq!(headers["pragma"], "no-cache");
    assert_eq!(headers["expires"], "0");
    assert_eq!(headers["x-redirect-by"], "smart-bridge");
    assert_eq!(headers["referrer-policy"], "unsafe-url");

    services.click_logger.flush().await;

    let stored = services.storage.get_link(link.id).await.unwrap().unwrap();
    assert_eq!(stored.click_count, 1);

    let events = services.storage.recent_clicks(None, None, 10).await.unwrap();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.link_id, link.id);
    assert_eq!(event.platform, "Coupang");
    assert_eq!(event.device, "Mobile");
    assert_eq!(event.os, "iOS");
    assert_eq!(event.browser, "Safari");
    assert_eq!(event.referer.as_deref(), Some("https://m.blog.naver.com/somepost"));
    assert_eq!(event.visitor_ip_hash.len(), 64);
    assert_ne!(event.visitor_ip_hash, "127.0.0.1");
}

#[tokio::test]
async fn test_query_form_redirects() {
    let services = create_test_services(test_config()).await;
    create_link(&services.storage, "q1", "https://temu.com/item/1").await;
    let app = redirect_app(&services);

    let response = app.oneshot(get("/?go=q1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "https://temu.com/item/1");
}

#[tokio::test]
async fn test_unknown_and_malformed_slugs_are_not_found() {
    let services = create_test_services(test_config()).await;
    let app = redirect_app(&services);

    for uri in ["/go/missing", "/go/bad!slug", "/?go=", "/", "/?go=a%20b"] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }

    services.click_logger.flush().await;
    assert_eq!(all_clicks(&services).await, 0);
}

#[tokio::test]
async fn test_unsafe_stored_target_is_refused() {
    let services = create_test_services(test_config()).await;
    // written straight to the store, bypassing creation-time validation
    services
        .storage
        .create_link(&NewLink {
            slug: "evil".to_string(),
            target_url: "javascript:alert(document.cookie)".to_string(),
            platform: "Unknown".to_string(),
            owner_id: None,
        })
        .await
        .unwrap();
    let app = redirect_app(&services);

    let response = app.oneshot(get("/go/evil")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(response.headers().get(LOCATION).is_none());

    services.click_logger.flush().await;
    assert_eq!(all_clicks(&services).await, 0);
}

#[tokio::test]
async fn test_positive_delay_serves_interstitial() {
    let services = create_test_services(test_config()).await;
    let link = create_link(&services.storage, "slow", "https://www.coupang.com/vp/products/5").await;
    services.settings.set(REDIRECT_DELAY, "1.5").await.unwrap();
    services
        .storage
        .set_link_meta(link.id, meta_keys::LOADING_MESSAGE, "Opening Coupang <deal>")
        .await
        .unwrap();
    let app = redirect_app(&services);

    let response = app.oneshot(get("/go/slow")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[CONTENT_TYPE], "text/html; charset=utf-8");
    assert!(headers[CACHE_CONTROL].to_str().unwrap().contains("no-store"));
    assert_eq!(headers["x-robots-tag"], "noindex, nofollow");
    assert!(headers.get(LOCATION).is_none());

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.contains("Opening Coupang &lt;deal&gt;"));
    assert!(html.contains(r#"<span id="countdown">2</span>"#));
    assert!(html.contains("https://www.coupang.com/vp/products/5"));

    // logged before the page is returned, no flush needed
    let stored = services.storage.get_link(link.id).await.unwrap().unwrap();
    assert_eq!(stored.click_count, 1);
}

#[tokio::test]
async fn test_both_modes_send_the_stored_target_bytes() {
    let services = create_test_services(test_config()).await;
    // `url` would normalise this to "https://temu.com/"
    create_link(&services.storage, "exact", "https://Temu.com").await;
    let app = redirect_app(&services);

    let response = app.clone().oneshot(get("/go/exact")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "https://Temu.com");

    services.settings.set(REDIRECT_DELAY, "2").await.unwrap();
    let response = app.oneshot(get("/go/exact")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.contains(r#"var targetUrl = "https://Temu.com";"#));
    assert!(html.contains(r#"href="https://Temu.com""#));
}

#[tokio::test]
async fn test_interstitial_falls_back_to_default_message() {
    let services = create_test_services(test_config()).await;
    create_link(&services.storage, "slow2", "https://temu.com/item/2").await;
    services.settings.set(REDIRECT_DELAY, "3").await.unwrap();
    let app = redirect_app(&services);

    let response = app.oneshot(get("/go/slow2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.contains("Taking you to your destination"));
    assert!(html.contains(r#"<span id="countdown">3</span>"#));
}

#[tokio::test]
async fn test_invalid_delay_redirects_immediately() {
    let services = create_test_services(test_config()).await;
    create_link(&services.storage, "fast", "https://temu.com/item/3").await;
    let app = redirect_app(&services);

    for value in ["-2", "soon", "NaN", "0"] {
        services.settings.set(REDIRECT_DELAY, value).await.unwrap();
        let response = app.clone().oneshot(get("/go/fast")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND, "delay {value}");
    }
}

#[tokio::test]
async fn test_event_store_failure_never_reaches_the_visitor() {
    let inner = create_test_storage().await;
    let link = create_link(&inner, "f1", "https://temu.com/item/9").await;
    let storage = Arc::new(FailingStorage::rejecting_clicks(Arc::clone(&inner)));
    let services = Services::build(test_config(), storage.clone()).await.unwrap();
    let app = redirect_app(&services);

    let response = app.clone().oneshot(get("/go/f1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "https://temu.com/item/9");
    services.click_logger.flush().await;

    // delayed mode logs synchronously before rendering
    services.settings.set(REDIRECT_DELAY, "2").await.unwrap();
    let response = app.clone().oneshot(get("/go/f1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.contains(r#"<span id="countdown">2</span>"#));

    assert_eq!(storage.click_attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
    let stored = inner.get_link(link.id).await.unwrap().unwrap();
    assert_eq!(stored.click_count, 0);

    // the worker is still alive after the failures
    services.settings.set(REDIRECT_DELAY, "0").await.unwrap();
    let response = app.oneshot(get("/go/f1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    services.click_logger.flush().await;
    assert_eq!(storage.click_attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_concurrent_redirects_count_every_click() {
    let services = create_test_services(test_config()).await;
    let link = create_link(&services.storage, "hot", "https://www.coupang.com/vp/products/7").await;
    let app = redirect_app(&services);

    let mut handles = Vec::new();
    for _ in 0..50 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            app.oneshot(get("/go/hot")).await.unwrap().status()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::FOUND);
    }

    services.click_logger.flush().await;
    let stored = services.storage.get_link(link.id).await.unwrap().unwrap();
    assert_eq!(stored.click_count, 50);
    assert_eq!(all_clicks(&services).await, 50);

    let today = services.today.link_today(link.id).await.unwrap();
    assert_eq!(today.clicks, 50);
    assert_eq!(today.visitors, 1);
}

#[tokio::test]
async fn test_shutdown_drains_queued_clicks() {
    let services = create_test_services(test_config()).await;
    let link = create_link(&services.storage, "drain", "https://temu.com/item/4").await;
    let app = redirect_app(&services);

    for _ in 0..10 {
        let response = app.clone().oneshot(get("/go/drain")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
    }
    services.click_logger.shutdown().await;

    let stored = services.storage.get_link(link.id).await.unwrap().unwrap();
    assert_eq!(stored.click_count, 10);
}

#[tokio::test]
async fn test_health_check() {
    let services = create_test_services(test_config()).await;
    let app = redirect_app(&services);

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
