//! Admin surface tests: session auth, mapping CRUD, reload, and the
//! public read endpoint.

mod common;

use serde_json::json;

use api_proxy::kv::KvStore;
use api_proxy::registry::{MappingRegistry, KEY_MAPPINGS};

use common::*;

const TOKEN: &str = "test-admin-token";

/// Log in and return a client whose cookie jar holds the session.
async fn admin_session(proxy: &TestProxy) -> reqwest::Client {
    let client = cookie_client();
    let res = client
        .post(proxy.url("/api/admin/login"))
        .json(&json!({ "token": TOKEN }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    client
}

#[tokio::test]
async fn admin_surface_is_disabled_without_a_token() {
    let proxy = spawn_proxy(None).await;

    let res = client().get(proxy.url("/api/mappings")).send().await.unwrap();
    assert_eq!(res.status(), 503);

    let res = client()
        .post(proxy.url("/api/admin/login"))
        .json(&json!({ "token": "anything" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 503);
}

#[tokio::test]
async fn wrong_token_cannot_log_in() {
    let proxy = spawn_proxy(Some(TOKEN)).await;

    let res = cookie_client()
        .post(proxy.url("/api/admin/login"))
        .json(&json!({ "token": "not-the-token" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);
}

#[tokio::test]
async fn requests_without_a_session_are_unauthorized() {
    let proxy = spawn_proxy(Some(TOKEN)).await;

    let res = client().get(proxy.url("/api/mappings")).send().await.unwrap();
    assert_eq!(res.status(), 401);

    let res = client()
        .get(proxy.url("/api/mappings"))
        .header("cookie", "api_proxy_admin=wrong-token")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);
}

#[tokio::test]
async fn created_mapping_serves_traffic_immediately() {
    let (upstream, captured) = spawn_capture_upstream(200, "routed", vec![]).await;
    let proxy = spawn_proxy(Some(TOKEN)).await;
    let admin = admin_session(&proxy).await;

    let res = admin
        .post(proxy.url("/api/mappings"))
        .json(&json!({ "prefix": "/a", "target": format!("http://{upstream}") }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 201);

    // Visible on the originating node without waiting for any reload.
    let res = client().get(proxy.url("/a/x")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "routed");
    assert_eq!(captured.take()[0].uri, "/x");
}

#[tokio::test]
async fn listing_includes_version_and_mappings() {
    let proxy = spawn_proxy(Some(TOKEN)).await;
    let admin = admin_session(&proxy).await;

    admin
        .post(proxy.url("/api/mappings"))
        .json(&json!({ "prefix": "/svc", "target": "http://svc.example" }))
        .send()
        .await
        .unwrap();

    let res = admin.get(proxy.url("/api/mappings")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["count"], 1);
    assert_eq!(body["mappings"]["/svc"], "http://svc.example");
    assert_eq!(body["version"], 1);
}

#[tokio::test]
async fn duplicate_add_is_rejected() {
    let proxy = spawn_proxy(Some(TOKEN)).await;
    let admin = admin_session(&proxy).await;

    let add = || {
        admin
            .post(proxy.url("/api/mappings"))
            .json(&json!({ "prefix": "/dup", "target": "http://t.example" }))
            .send()
    };
    assert_eq!(add().await.unwrap().status(), 201);
    assert_eq!(add().await.unwrap().status(), 400);
}

#[tokio::test]
async fn invalid_mappings_are_rejected_with_400() {
    let proxy = spawn_proxy(Some(TOKEN)).await;
    let admin = admin_session(&proxy).await;

    for payload in [
        json!({ "prefix": "", "target": "http://t.example" }),
        json!({ "prefix": "/ok", "target": "ftp://files.example" }),
        json!({ "prefix": "no-slash", "target": "http://t.example" }),
        json!({ "prefix": "/ok", "target": "" }),
    ] {
        let res = admin
            .post(proxy.url("/api/mappings"))
            .json(&payload)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 400, "payload: {payload}");
    }

    assert_eq!(proxy.registry.count(), 0);
}

#[tokio::test]
async fn update_and_delete_handle_multi_segment_prefixes() {
    let proxy = spawn_proxy(Some(TOKEN)).await;
    let admin = admin_session(&proxy).await;

    admin
        .post(proxy.url("/api/mappings"))
        .json(&json!({ "prefix": "/api/v1", "target": "http://one.example" }))
        .send()
        .await
        .unwrap();

    // The path parameter is everything after /api/mappings/, with the
    // leading slash restored.
    let res = admin
        .put(proxy.url("/api/mappings/api/v1"))
        .json(&json!({ "target": "http://two.example" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(
        proxy.registry.get("/api/v1").await.unwrap(),
        "http://two.example"
    );

    let res = admin
        .delete(proxy.url("/api/mappings/api/v1"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert!(proxy.registry.get("/api/v1").await.is_err());
}

#[tokio::test]
async fn deleting_a_missing_mapping_is_404() {
    let proxy = spawn_proxy(Some(TOKEN)).await;
    let admin = admin_session(&proxy).await;

    let res = admin
        .delete(proxy.url("/api/mappings/ghost"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn updating_a_missing_mapping_is_404() {
    let proxy = spawn_proxy(Some(TOKEN)).await;
    let admin = admin_session(&proxy).await;

    let res = admin
        .put(proxy.url("/api/mappings/ghost"))
        .json(&json!({ "target": "http://t.example" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn force_reload_picks_up_out_of_band_writes() {
    let proxy = spawn_proxy(Some(TOKEN)).await;
    let admin = admin_session(&proxy).await;

    // Write behind the registry's back, without bumping the version.
    proxy
        .store
        .hash_set(KEY_MAPPINGS, "/sneaky", "http://sneaky.example")
        .await
        .unwrap();
    assert!(proxy.registry.snapshot().get("/sneaky").is_none());

    let res = admin
        .post(proxy.url("/api/mappings/reload"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert!(body["version"].is_i64());

    assert_eq!(
        proxy.registry.snapshot().get("/sneaky").map(String::as_str),
        Some("http://sneaky.example")
    );
}

#[tokio::test]
async fn logout_invalidates_the_session() {
    let proxy = spawn_proxy(Some(TOKEN)).await;
    let admin = admin_session(&proxy).await;

    assert_eq!(
        admin
            .get(proxy.url("/api/mappings"))
            .send()
            .await
            .unwrap()
            .status(),
        200
    );

    let res = admin
        .post(proxy.url("/api/admin/logout"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let res = admin.get(proxy.url("/api/mappings")).send().await.unwrap();
    assert_eq!(res.status(), 401);
}

#[tokio::test]
async fn public_mappings_need_no_auth() {
    let proxy = spawn_proxy(Some(TOKEN)).await;
    proxy
        .registry
        .add("/open", "http://open.example")
        .await
        .unwrap();

    let res = client()
        .get(proxy.url("/api/public/mappings"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["count"], 1);
    assert_eq!(body["mappings"]["/open"], "http://open.example");
    assert!(body.get("version").is_none());
}
