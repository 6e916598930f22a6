mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use serde_json::{json, Value};
use tenancy_core::server::app;
use tower::ServiceExt;
use uuid::Uuid;

async fn send(h: &common::Harness, request: Request<Body>) -> Result<Response> {
    Ok(app(h.state.clone()).oneshot(request).await?)
}

async fn body_json(response: Response) -> Result<Value> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn get(uri: &str) -> axum::http::request::Builder {
    Request::builder().method("GET").uri(uri)
}

#[tokio::test]
async fn header_resolves_tenant_context() -> Result<()> {
    let h = common::harness().await?;
    let res = send(
        &h,
        get("/api/context").header("x-tenant-id", "acme").body(Body::empty())?,
    )
    .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let body = body_json(res).await?;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["tenant"]["slug"], json!("acme"));
    assert_eq!(body["data"]["tenant"]["storage_key"], json!("tenant_acme"));
    assert_eq!(body["data"]["tenant"]["status"], json!("active"));
    Ok(())
}

#[tokio::test]
async fn path_and_host_signals_resolve() -> Result<()> {
    let h = common::harness().await?;

    let res = send(&h, get("/t/globex/api/context").body(Body::empty())?).await?;
    assert_eq!(body_json(res).await?["data"]["tenant"]["slug"], json!("globex"));

    let res = send(
        &h,
        get("/api/context")
            .header(header::HOST, "acme.example.com:8080")
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(body_json(res).await?["data"]["tenant"]["slug"], json!("acme"));
    Ok(())
}

#[tokio::test]
async fn unmatched_hostname_runs_without_tenant() -> Result<()> {
    let h = common::harness().await?;
    let res = send(
        &h,
        get("/api/context")
            .header(header::HOST, "api.example.com")
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await?["data"]["tenant"], Value::Null);
    Ok(())
}

#[tokio::test]
async fn unknown_and_suspended_tenants_are_distinct() -> Result<()> {
    let h = common::harness().await?;

    let res = send(
        &h,
        get("/api/context").header("x-tenant-id", "nobody").body(Body::empty())?,
    )
    .await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(res).await?["code"], json!("TENANT_NOT_FOUND"));

    let res = send(
        &h,
        get("/api/context").header("x-tenant-id", "initech").body(Body::empty())?,
    )
    .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(res).await?["code"], json!("TENANT_SUSPENDED"));
    Ok(())
}

#[tokio::test]
async fn correlation_id_is_echoed() -> Result<()> {
    let h = common::harness().await?;
    let cid = Uuid::new_v4().to_string();

    let res = send(
        &h,
        get("/api/context")
            .header("x-tenant-id", "acme")
            .header("x-correlation-id", cid.as_str())
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(
        res.headers().get("x-correlation-id").and_then(|v| v.to_str().ok()),
        Some(cid.as_str())
    );
    assert_eq!(body_json(res).await?["data"]["correlation_id"], json!(cid));
    Ok(())
}

#[tokio::test]
async fn data_routes_stay_inside_the_tenant() -> Result<()> {
    let h = common::harness().await?;

    let post = Request::builder()
        .method("POST")
        .uri("/api/data/tickets")
        .header("x-tenant-id", "acme")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "tenant_id": h.acme.id, "fields": { "title": "printer on fire" } }).to_string(),
        ))?;
    let res = send(&h, post).await?;
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = send(
        &h,
        get("/api/data/tickets").header("x-tenant-id", "acme").body(Body::empty())?,
    )
    .await?;
    let body = body_json(res).await?;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["data"][0]["fields"]["title"], json!("printer on fire"));

    let res = send(&h, get("/t/globex/api/data/tickets").body(Body::empty())?).await?;
    assert_eq!(body_json(res).await?["data"], json!([]));
    Ok(())
}

#[tokio::test]
async fn foreign_owner_and_missing_tenant_are_rejected() -> Result<()> {
    let h = common::harness().await?;

    let foreign = Request::builder()
        .method("POST")
        .uri("/t/acme/api/data/tickets")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "tenant_id": h.globex.id }).to_string()))?;
    assert_eq!(send(&h, foreign).await?.status(), StatusCode::FORBIDDEN);

    let anonymous = Request::builder()
        .method("POST")
        .uri("/api/data/tickets")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "fields": {} }).to_string()))?;
    assert_eq!(send(&h, anonymous).await?.status(), StatusCode::BAD_REQUEST);

    assert_eq!(h.entities.total_records().await, 0);
    Ok(())
}

#[tokio::test]
async fn health_reports_memory_backend() -> Result<()> {
    let h = common::harness().await?;
    let res = send(&h, get("/health").body(Body::empty())?).await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await?["data"]["database"], json!("memory"));
    Ok(())
}
