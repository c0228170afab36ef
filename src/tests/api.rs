use super::app::{create_admin, create_services, sample_listing};
use crate::app::Services;
use crate::listings::{Category, ListingStore};
use crate::users::UserStore;
use crate::web::router;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn test_router() -> (Router, Arc<Services>, tempfile::TempDir) {
    let (services, tmp) = create_services();
    (router(services.clone()), services, tmp)
}

async fn call(
    router: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, String) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

async fn call_json(
    router: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let (status, text) = call(router, method, uri, token, body).await;
    let value = serde_json::from_str(&text).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_api_banner() {
    let (router, _services, _tmp) = test_router();
    let (status, body) = call_json(&router, "GET", "/api", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Yellowbook API");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_create_and_fetch_listing() {
    let (router, services, _tmp) = test_router();

    let payload = json!({
        "name": "Khaan Buuz",
        "address": "Peace Avenue 1",
        "phone": "+976-11-000000",
        "category": "restaurant",
        "latitude": 47.918,
        "longitude": 106.917,
        "rating": 4.5,
    });

    let (status, body) = call_json(&router, "POST", "/yellow-books", None, Some(payload)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "Khaan Buuz");
    assert_eq!(body["_embeddingJob"]["status"], "queued");
    assert!(body["_embeddingJob"]["jobId"]
        .as_str()
        .unwrap()
        .starts_with("emb-"));
    assert_eq!(services.queue.pending(), 1);

    let id = body["id"].as_str().unwrap();
    let (status, fetched) =
        call_json(&router, "GET", &format!("/yellow-books/{id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "Khaan Buuz");
    assert_eq!(fetched["category"], "restaurant");

    let (status, all) = call_json(&router, "GET", "/yellow-books", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 1);

    let (_, filtered) =
        call_json(&router, "GET", "/yellow-books?search=nomatch", None, None).await;
    assert!(filtered.as_array().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_create_listing_validation_failure() {
    let (router, services, _tmp) = test_router();

    let payload = json!({
        "category": "bakery",
        "latitude": 47.9,
        "longitude": 106.9,
        "phone": "+976-11-000000",
        "address": "Somewhere 1",
        "rating": 9.0,
    });

    let (status, body) = call_json(&router, "POST", "/yellow-books", None, Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid input");

    let fields: Vec<&str> = body["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|issue| issue["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"name"));
    assert!(fields.contains(&"category"));
    assert!(fields.contains(&"rating"));

    // nothing was persisted, nothing was queued
    assert!(services.listings.search(None).unwrap().is_empty());
    assert_eq!(services.queue.pending(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_listing_is_404() {
    let (router, _services, _tmp) = test_router();
    let (status, _) = call_json(&router, "GET", "/yellow-books/nope", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_admin_endpoints_require_admin() {
    let (router, services, _tmp) = test_router();

    let (status, _) = call_json(&router, "GET", "/admin/users", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, user_token) = services.users.sign_in("pleb@example.com", None).unwrap();
    let (status, _) = call_json(&router, "GET", "/admin/users", Some(&user_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin_token = create_admin(&services, "root@example.com");
    let (status, users) =
        call_json(&router, "GET", "/admin/users", Some(&admin_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(users.as_array().unwrap().len(), 2);
    // credentials never leak through the admin view
    assert!(users[0].get("token").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_role_update_is_strict() {
    let (router, services, _tmp) = test_router();
    let admin_token = create_admin(&services, "root@example.com");
    let (target, _) = services.users.sign_in("target@example.com", None).unwrap();

    // unknown role leaves the stored role untouched
    let (status, body) = call_json(
        &router,
        "PATCH",
        &format!("/admin/users/{}/role", target.id),
        Some(&admin_token),
        Some(json!({"role": "owner"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"][0]["field"], "role");
    let unchanged = services.users.get(&target.id).unwrap().unwrap();
    assert_eq!(unchanged.role, crate::users::Role::User);

    let (status, body) = call_json(
        &router,
        "PATCH",
        &format!("/admin/users/{}/role", target.id),
        Some(&admin_token),
        Some(json!({"role": "admin"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "admin");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_admin_update_listing() {
    let (router, services, _tmp) = test_router();
    let admin_token = create_admin(&services, "root@example.com");

    let listing = services
        .listings
        .create(sample_listing("Old Name", Category::Store))
        .unwrap();

    let (status, body) = call_json(
        &router,
        "PATCH",
        &format!("/admin/yellow-books/{}", listing.id),
        Some(&admin_token),
        Some(json!({"name": "New Name", "rating": 2.5})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "New Name");
    assert_eq!(body["rating"], 2.5);
    assert_eq!(body["_embeddingJob"]["status"], "queued");
    assert_eq!(services.queue.pending(), 1);

    // out-of-range rating is rejected, nothing stored or queued
    let (status, _) = call_json(
        &router,
        "PATCH",
        &format!("/admin/yellow-books/{}", listing.id),
        Some(&admin_token),
        Some(json!({"rating": 7.0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let stored = services.listings.get(&listing.id).unwrap().unwrap();
    assert_eq!(stored.rating, Some(2.5));

    // edits pass the same format checks as creation
    let (status, body) = call_json(
        &router,
        "PATCH",
        &format!("/admin/yellow-books/{}", listing.id),
        Some(&admin_token),
        Some(json!({"website": "not a url", "email": "nonsense"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let fields: Vec<&str> = body["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|issue| issue["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"website"));
    assert!(fields.contains(&"email"));
    let stored = services.listings.get(&listing.id).unwrap().unwrap();
    assert!(stored.website.is_none());
    assert!(stored.email.is_none());

    let (status, _) = call_json(
        &router,
        "PATCH",
        "/admin/yellow-books/ghost",
        Some(&admin_token),
        Some(json!({"name": "X"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_admin_delete_listing() {
    let (router, services, _tmp) = test_router();
    let admin_token = create_admin(&services, "root@example.com");

    let listing = services
        .listings
        .create(sample_listing("Doomed", Category::Store))
        .unwrap();

    let (status, _) = call_json(
        &router,
        "DELETE",
        &format!("/admin/yellow-books/{}", listing.id),
        Some(&admin_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) =
        call_json(&router, "GET", &format!("/yellow-books/{}", listing.id), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call_json(
        &router,
        "DELETE",
        &format!("/admin/yellow-books/{}", listing.id),
        Some(&admin_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bulk_embeddings_and_job_status() {
    let (router, services, _tmp) = test_router();
    let admin_token = create_admin(&services, "root@example.com");

    let listing = services
        .listings
        .create(sample_listing("Bulked", Category::Service))
        .unwrap();

    let (status, body) = call_json(
        &router,
        "POST",
        "/admin/embeddings/bulk",
        Some(&admin_token),
        Some(json!({"businessIds": [listing.id.to_string(), "ghost-id"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let jobs = body["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0]["accepted"], true);
    assert_eq!(jobs[0]["status"], "queued");
    assert_eq!(jobs[1]["accepted"], false);
    assert_eq!(jobs[1]["reason"], "listing not found");

    let job_id = jobs[0]["jobId"].as_str().unwrap();
    let (status, snapshot) = call_json(
        &router,
        "GET",
        &format!("/admin/jobs/{job_id}"),
        Some(&admin_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["status"], "queued");
    assert_eq!(snapshot["businessId"], listing.id.to_string());
    assert_eq!(snapshot["progress"], 0);

    let (status, _) = call_json(
        &router,
        "GET",
        "/admin/jobs/emb-doesnotexist",
        Some(&admin_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // empty id list is a validation error
    let (status, _) = call_json(
        &router,
        "POST",
        "/admin/embeddings/bulk",
        Some(&admin_token),
        Some(json!({"businessIds": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ai_search_demo_mode() {
    let (router, services, _tmp) = test_router();
    services
        .listings
        .create(sample_listing("Khaan Buuz", Category::Restaurant))
        .unwrap();

    let (status, _) = call_json(
        &router,
        "POST",
        "/api/ai/yellow-books/search",
        None,
        Some(json!({"query": "  "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call_json(
        &router,
        "POST",
        "/api/ai/yellow-books/search",
        None,
        Some(json!({"query": "buuz"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["demoMode"], true);
    assert_eq!(body["cached"], false);
    assert_eq!(body["results"][0]["name"], "Khaan Buuz");
    assert_eq!(body["results"][0]["score"], 0.85);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sign_in_endpoint() {
    let (router, _services, _tmp) = test_router();

    let (status, body) = call_json(
        &router,
        "POST",
        "/auth/signin",
        None,
        Some(json!({"email": "new@example.com", "name": "New User"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].as_str().unwrap().starts_with("ybt_"));
    assert_eq!(body["user"]["email"], "new@example.com");
    assert_eq!(body["user"]["role"], "user");

    let (status, _) = call_json(
        &router,
        "POST",
        "/auth/signin",
        None,
        Some(json!({"email": "not-an-email"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_revalidate_requires_matching_secret() {
    let (router, services, _tmp) = test_router();

    // no secret configured: always rejected
    let (status, _) =
        call_json(&router, "POST", "/revalidate", None, Some(json!({"secret": "x"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    services.config.write().unwrap().revalidate_secret = Some("hunter2".to_string());

    let (status, _) =
        call_json(&router, "POST", "/revalidate", None, Some(json!({"secret": "wrong"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) =
        call_json(&router, "POST", "/revalidate", None, Some(json!({"secret": "hunter2"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revalidated"], true);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pages_render() {
    let (router, services, _tmp) = test_router();
    let listing = services
        .listings
        .create(sample_listing("Visible Cafe", Category::Restaurant))
        .unwrap();

    let (status, html) = call(&router, "GET", "/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("Visible Cafe"));

    let (status, html) =
        call(&router, "GET", &format!("/listings/{}", listing.id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("Visible Cafe"));

    let (status, _) = call(&router, "GET", "/listings/ghost", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, html) = call(&router, "GET", "/search?q=visible", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("1 result(s)"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_security_headers_are_set() {
    let (router, _services, _tmp) = test_router();

    let request = Request::builder().uri("/api").body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
}
