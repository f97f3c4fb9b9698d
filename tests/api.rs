//! Router-level tests: every request goes through the real axum stack, the
//! SQLite store and libgit2, with the payment processor and code host faked.

mod common;

use std::sync::atomic::Ordering;

use axum::http::{StatusCode, header};
use serde_json::{Value, json};

use common::{FRONTEND, SOURCE_URL, TestApp, json_body, location};

fn create_order_uri(price: &str, seller_id: &str) -> String {
    format!(
        "/api/v1/purchases/create-order/widget?seller_id={}&repo_url={}&repo_price={}",
        seller_id,
        urlencoding::encode(SOURCE_URL),
        price
    )
}

fn query_param(url: &str, key: &str) -> Option<String> {
    let url = reqwest::Url::parse(url).unwrap();
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let response = app.get("/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_requires_authentication() {
    let app = TestApp::new();

    let response = app.get("/api/v1/repos", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers()[header::WWW_AUTHENTICATE],
        "Bearer realm=\"codemart\""
    );

    let response = app.get("/api/v1/repos", Some("codemart_bogus_token")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_token_cannot_buy() {
    let app = TestApp::new();
    let response = app.get("/api/v1/repos", Some(&app.admin_token)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_user_token_cannot_reconcile() {
    let app = TestApp::new();
    let response = app
        .get("/api/v1/admin/intents", Some(&app.bob_token))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_account() {
    let app = TestApp::new();
    let response = app.get("/api/v1/account", Some(&app.bob_token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["id"], app.bob_id.as_str());
    assert_eq!(body["data"]["email"], "bob@example.com");
}

#[tokio::test]
async fn test_create_and_list_listing() {
    let app = TestApp::new();
    let id = app.list_widget(1250).await;

    let response = app.get("/api/v1/repos", Some(&app.alice_token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let repos = body["data"].as_array().unwrap();
    assert_eq!(repos.len(), 1);
    assert_eq!(repos[0]["id"], id.as_str());
    assert_eq!(repos[0]["branch"], "dev");
    assert_eq!(repos[0]["price_cents"], 1250);
    assert_eq!(repos[0]["is_transfer"], false);

    let response = app
        .post_json(
            "/api/v1/repos",
            &app.alice_token,
            json!({"name": "widget", "source_url": SOURCE_URL, "price_cents": 1}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_create_listing_validation() {
    let app = TestApp::new();

    let cases = [
        json!({"name": "bad name", "source_url": SOURCE_URL, "price_cents": 0}),
        json!({"name": "widget", "source_url": SOURCE_URL, "price_cents": -5}),
        json!({"name": "widget", "source_url": "not a url", "price_cents": 0}),
    ];
    for body in cases {
        let response = app
            .post_json("/api/v1/repos", &app.alice_token, body.clone())
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        let body: Value = json_body(response).await;
        assert!(body["data"].is_null());
        assert!(body["error"].is_string());
    }
}

#[tokio::test]
async fn test_free_purchase_transfers_without_payment() {
    let app = TestApp::new();
    let listing_id = app.list_widget(0).await;

    let response = app
        .get(&create_order_uri("0", &app.alice_id), Some(&app.bob_token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["status"], "transferred");

    let transfer = &body["data"]["transfer"];
    assert_eq!(transfer["owner_id"], app.bob_id.as_str());
    assert_eq!(transfer["seller_id"], app.alice_id.as_str());
    assert_eq!(transfer["seller_repository_id"], listing_id.as_str());
    assert_eq!(transfer["branch"], "dev");
    assert!(transfer["name"].as_str().unwrap().ends_with("-widget"));
    assert_eq!(app.gateway.calls(), 0);

    let pushed = git2::Repository::open_bare(transfer["url"].as_str().unwrap()).unwrap();
    assert!(pushed.find_reference("refs/heads/main").is_ok());

    let response = app.get("/api/v1/repos", Some(&app.bob_token)).await;
    let body = json_body(response).await;
    let repos = body["data"].as_array().unwrap();
    assert_eq!(repos.len(), 1);
    assert_eq!(repos[0]["is_transfer"], true);

    let transferred_id = repos[0]["id"].as_str().unwrap();
    let response = app
        .delete(&format!("/api/v1/repos/{transferred_id}"), &app.bob_token)
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_paid_purchase_flow() {
    let app = TestApp::new();
    app.list_widget(1250).await;

    let response = app
        .get(&create_order_uri("12.50", &app.alice_id), Some(&app.bob_token))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&response),
        "https://processor.example/approve?token=ORDER-1"
    );

    let callback = format!(
        "/api/v1/purchases/success?token=ORDER-1&PayerID=PAYER-9&repo_name=widget&repo_url={}&seller_id={}",
        urlencoding::encode(SOURCE_URL),
        app.alice_id
    );
    let response = app.get(&callback, None).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let redirect = location(&response);
    assert!(redirect.starts_with(&format!("{FRONTEND}/success?")));
    assert_eq!(
        query_param(&redirect, "authorization_id").as_deref(),
        Some("AUTH-ORDER-1")
    );
    assert_eq!(query_param(&redirect, "repo_url").as_deref(), Some(SOURCE_URL));

    let form = [
        ("authorization_id", "AUTH-ORDER-1"),
        ("seller_id", app.alice_id.as_str()),
        ("repo_url", SOURCE_URL),
        ("repo_name", "widget"),
    ];
    let response = app
        .post_form("/api/v1/purchases/confirm", &app.bob_token, &form)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let first = json_body(response).await;
    assert_eq!(first["data"]["status"], "captured");
    assert_eq!(first["data"]["processor_response"]["status"], "COMPLETED");
    assert_eq!(first["data"]["transfer"]["owner_id"], app.bob_id.as_str());

    let response = app
        .post_form("/api/v1/purchases/confirm", &app.bob_token, &form)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let second = json_body(response).await;
    assert_eq!(
        second["data"]["transfer"]["repository_id"],
        first["data"]["transfer"]["repository_id"]
    );
    assert_eq!(app.gateway.captures.load(Ordering::SeqCst), 1);
    assert_eq!(app.host.created.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_confirm_by_another_buyer_is_rejected() {
    let app = TestApp::new();
    app.list_widget(1250).await;
    let authorization_id = app.approve_widget(&app.bob_token, "12.50").await;

    let form = [
        ("authorization_id", authorization_id.as_str()),
        ("seller_id", app.alice_id.as_str()),
        ("repo_url", SOURCE_URL),
        ("repo_name", "widget"),
    ];
    let response = app
        .post_form("/api/v1/purchases/confirm", &app.bob_token, &form)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post_form("/api/v1/purchases/confirm", &app.alice_token, &form)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_confirm_must_name_the_ordered_listing() {
    let app = TestApp::new();
    app.list_widget(100).await;
    let response = app
        .post_json(
            "/api/v1/repos",
            &app.alice_token,
            json!({
                "name": "gadget",
                "source_url": "https://host.example/alice/gadget",
                "price_cents": 500_000,
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let authorization_id = app.approve_widget(&app.bob_token, "1.00").await;

    let response = app
        .post_form(
            "/api/v1/purchases/confirm",
            &app.bob_token,
            &[
                ("authorization_id", authorization_id.as_str()),
                ("seller_id", app.alice_id.as_str()),
                ("repo_url", "https://host.example/alice/gadget"),
                ("repo_name", "gadget"),
            ],
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.gateway.captures.load(Ordering::SeqCst), 0);

    let response = app
        .post_form(
            "/api/v1/purchases/confirm",
            &app.bob_token,
            &[("authorization_id", "AUTH-FORGED")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.get("/api/v1/repos", Some(&app.bob_token)).await;
    let body = json_body(response).await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_create_order_errors_redirect_to_frontend() {
    let app = TestApp::new();
    app.list_widget(1250).await;

    for uri in [
        create_order_uri("9.99", &app.alice_id),
        create_order_uri("abc", &app.alice_id),
        "/api/v1/purchases/create-order/widget?seller_id=x".to_string(),
    ] {
        let response = app.get(&uri, Some(&app.bob_token)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "{uri}");
        let redirect = location(&response);
        assert!(redirect.starts_with(&format!("{FRONTEND}/error?message=")), "{redirect}");
    }

    let response = app
        .get(&create_order_uri("12.50", &app.alice_id), Some(&app.alice_token))
        .await;
    let redirect = location(&response);
    assert!(
        query_param(&redirect, "message")
            .unwrap()
            .contains("your own repository")
    );
    assert_eq!(app.gateway.calls(), 0);
}

#[tokio::test]
async fn test_approval_without_token_reports_error() {
    let app = TestApp::new();
    let response = app
        .get("/api/v1/purchases/success?PayerID=PAYER-9", None)
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let redirect = location(&response);
    assert!(redirect.starts_with(&format!("{FRONTEND}/success?error=")));
}

#[tokio::test]
async fn test_cancel_redirects() {
    let app = TestApp::new();
    let response = app.get("/api/v1/purchases/cancel", None).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), format!("{FRONTEND}/cancel"));
}

#[tokio::test]
async fn test_delete_listing() {
    let app = TestApp::new();
    let id = app.list_widget(500).await;

    let response = app
        .delete(&format!("/api/v1/repos/{id}"), &app.bob_token)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .delete(&format!("/api/v1/repos/{id}"), &app.alice_token)
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.get("/api/v1/repos", Some(&app.alice_token)).await;
    let body = json_body(response).await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_admin_intents() {
    let app = TestApp::new();

    let response = app
        .get("/api/v1/admin/intents", Some(&app.admin_token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let response = app
        .post_json(
            "/api/v1/admin/intents/missing/retry",
            &app.admin_token,
            json!({}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rotate_hosting_token() {
    let app = TestApp::new();

    let response = app
        .send(
            axum::http::Request::put("/api/v1/account/hosting-token")
                .header(header::AUTHORIZATION, format!("Bearer {}", app.bob_token))
                .header(header::CONTENT_TYPE, "application/json")
                .body(axum::body::Body::from(r#"{"token":"gho_rotated"}"#))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .send(
            axum::http::Request::put("/api/v1/account/hosting-token")
                .header(header::AUTHORIZATION, format!("Bearer {}", app.bob_token))
                .header(header::CONTENT_TYPE, "application/json")
                .body(axum::body::Body::from(r#"{"token":"  "}"#))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
