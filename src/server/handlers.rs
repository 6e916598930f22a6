use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::response::{ApiResponse, ApiResult};
use super::AppState;
use crate::context::ContextPropagator;
use crate::error::{ApiError, TenancyError};
use crate::scope::{BulkWriteReport, EntityId, Predicate, Record};
use crate::tenant::TenantId;

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    let Some(pools) = &state.pools else {
        return (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": { "status": "ok", "timestamp": now, "database": "memory" }
            })),
        );
    };

    match pools.health_check(&state.storage.system_handle()).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": { "status": "ok", "timestamp": now, "database": "ok" }
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "error": "database unavailable",
                "data": {
                    "status": "degraded",
                    "timestamp": now,
                    "database_error": e.to_string()
                }
            })),
        ),
    }
}

/// GET /api/context - the context this request runs under
pub async fn context() -> ApiResult<Value> {
    let ctx = ContextPropagator::current().ok_or_else(|| {
        TenancyError::NoContext("request is not running in a unit of work".to_string())
    })?;

    let tenant = ctx.tenant().map(|binding| {
        json!({
            "id": binding.id,
            "slug": binding.slug,
            "storage_key": binding.storage_key,
            // Null once the registry has dropped its record
            "status": binding.tenant().map(|t| t.status),
        })
    });

    Ok(ApiResponse::success(json!({
        "tenant": tenant,
        "correlation_id": ctx.correlation_id(),
        "started_at": ctx.started_at(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct DataQuery {
    /// JSON where clause, e.g. where={"status":"open"}
    #[serde(rename = "where")]
    pub filter: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WriteBody {
    pub id: Option<EntityId>,
    pub tenant_id: Option<TenantId>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl WriteBody {
    fn into_record(self, entity_type: &str) -> Record {
        Record {
            entity_type: entity_type.to_string(),
            id: self.id.unwrap_or_default(),
            tenant_id: self.tenant_id,
            fields: self.fields,
        }
    }
}

fn entity_param(params: &HashMap<String, String>) -> Result<&str, ApiError> {
    params
        .get("entity")
        .map(String::as_str)
        .ok_or_else(|| ApiError::bad_request("Missing entity type"))
}

/// GET /api/data/:entity - read records visible to the current tenant
pub async fn data_get(
    State(state): State<Arc<AppState>>,
    Path(params): Path<HashMap<String, String>>,
    Query(query): Query<DataQuery>,
) -> ApiResult<Vec<Record>> {
    let entity = entity_param(&params)?;
    let predicate = match query.filter.as_deref() {
        None => Predicate::All,
        Some(raw) => {
            let where_data: Value = serde_json::from_str(raw)
                .map_err(|e| ApiError::bad_request(format!("Invalid where clause: {}", e)))?;
            Predicate::from_json(&where_data)?
        }
    };

    let records = state.engine.read(entity, predicate).await?;
    Ok(ApiResponse::success(records))
}

/// POST /api/data/:entity - write one record, or a batch when the body is an array
pub async fn data_post(
    State(state): State<Arc<AppState>>,
    Path(params): Path<HashMap<String, String>>,
    Json(payload): Json<Value>,
) -> Result<Response, ApiError> {
    let entity = entity_param(&params)?;

    if payload.is_array() {
        let bodies: Vec<WriteBody> = serde_json::from_value(payload)
            .map_err(|e| ApiError::bad_request(format!("Invalid records: {}", e)))?;
        let records = bodies.into_iter().map(|b| b.into_record(entity)).collect();
        let report: BulkWriteReport = state.engine.bulk_write(records).await?;
        return Ok(ApiResponse::created(report).into_response());
    }

    let body: WriteBody = serde_json::from_value(payload)
        .map_err(|e| ApiError::bad_request(format!("Invalid record: {}", e)))?;
    let record = body.into_record(entity);
    state.engine.write(record.clone()).await?;
    Ok(ApiResponse::created(record).into_response())
}
