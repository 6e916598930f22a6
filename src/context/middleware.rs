use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::Instrument;

use super::{ContextPropagator, CorrelationId, ResolutionSignals};
use crate::error::{ApiError, TenancyError};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Slug from a `/t/{slug}/...` path prefix
pub fn path_tenant_segment(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("/t/")?;
    let segment = rest.split('/').next()?;
    (!segment.is_empty()).then_some(segment)
}

/// Gather the tenant signals carried by an inbound request
pub fn signals_from_request(headers: &HeaderMap, path: &str) -> ResolutionSignals {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    ResolutionSignals {
        header: header_value(TENANT_HEADER),
        path_segment: path_tenant_segment(path).map(str::to_string),
        hostname: header_value(header::HOST.as_str()),
    }
}

fn correlation_from_headers(headers: &HeaderMap) -> CorrelationId {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or_default()
}

/// Resolve the tenant for this request and run the rest of the stack inside
/// its context. The context is also placed in request extensions for
/// handlers that prefer `Extension<ExecutionContext>`.
///
/// A request that named a tenant explicitly (header or path) and resolved
/// nothing is rejected with 404. Requests that only carried a hostname run
/// with the no-tenant context.
pub async fn tenant_context_middleware(
    State(propagator): State<Arc<ContextPropagator>>,
    mut request: Request,
    next: Next,
) -> Response {
    let signals = signals_from_request(request.headers(), request.uri().path());
    let correlation_id = correlation_from_headers(request.headers());

    let ctx = match propagator.begin_with(&signals, correlation_id).await {
        Ok(ctx) => ctx,
        Err(e) => return ApiError::from(e).into_response(),
    };

    if !ctx.has_tenant() && signals.has_explicit() {
        tracing::warn!(correlation_id = %correlation_id, "Explicit tenant signal did not resolve");
        let err = TenancyError::TenantNotFound("no tenant matched the request".to_string());
        return ApiError::from(err).into_response();
    }

    let span = tracing::info_span!(
        "unit_of_work",
        correlation_id = %correlation_id,
        tenant_id = %ctx.tenant_id().map(|id| id.to_string()).unwrap_or_default(),
    );
    request.extensions_mut().insert(ctx.clone());

    let mut response = match ContextPropagator::scope(ctx, next.run(request).instrument(span)).await {
        Ok(response) => response,
        Err(e) => return ApiError::from(e).into_response(),
    };

    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}
