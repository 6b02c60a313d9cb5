//! Token-gated, read-only data API.

use std::sync::Arc;

use axum::extract::State;
use axum::Extension;
use serde::Deserialize;
use serde_json::{json, Value};

use super::extract::{Path, Query};
use crate::errors::AppError;
use crate::models::envelope::ApiResponse;
use crate::models::query::{parse_fields, parse_order};
use crate::models::settings::Settings;
use crate::models::{Domain, SearchQuery};
use crate::store::Access;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub fields: Option<String>,
    pub domain: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub order: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecordParams {
    pub fields: Option<String>,
}

fn parse_limit(raw: Option<&str>) -> Result<Option<i64>, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s
            .parse::<i64>()
            .map(Some)
            .map_err(|_| AppError::BadRequest(format!("limit must be an integer, got '{}'", s))),
    }
}

fn parse_offset(raw: Option<&str>) -> Result<u64, AppError> {
    let invalid = |s: &str| {
        AppError::BadRequest(format!("offset must be a non-negative integer, got '{}'", s))
    };
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(0),
        Some(s) => match s.parse::<i64>() {
            Ok(n) if n >= 0 => Ok(n as u64),
            _ => Err(invalid(s)),
        },
    }
}

fn ensure_allowed(settings: &Settings, model: &str) -> Result<(), AppError> {
    if settings.is_model_allowed(model) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!("model '{}' is not allowed", model)))
    }
}

/// Record a successful gated read. A failure here does not fail the read.
async fn touch(state: &AppState, settings: &Settings) {
    if let Err(e) = state.settings.touch_last_used(settings.id).await {
        tracing::warn!(settings_id = settings.id, "failed to update last_used: {}", e);
    }
}

/// GET /powerbi/api/health
pub async fn health() -> ApiResponse<Value> {
    ApiResponse::ok(json!({ "status": "healthy", "version": "1.0" }), "API is working")
}

/// GET /powerbi/api/models
pub async fn list_models(
    State(state): State<Arc<AppState>>,
    Extension(settings): Extension<Settings>,
) -> Result<ApiResponse<Value>, AppError> {
    let models = settings.allowed_models_list();
    touch(&state, &settings).await;
    Ok(ApiResponse::ok(
        json!({ "count": models.len(), "models": models }),
        "Allowed models",
    ))
}

/// GET /powerbi/api/:model
pub async fn list_records(
    State(state): State<Arc<AppState>>,
    Extension(settings): Extension<Settings>,
    Path(model): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<ApiResponse<Value>, AppError> {
    ensure_allowed(&settings, &model)?;

    let fields = parse_fields(params.fields.as_deref().unwrap_or_default())
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let domain = match params.domain.as_deref().map(str::trim) {
        None | Some("") => Domain::All,
        Some(raw) => Domain::parse_json(raw)?,
    };
    let limit = settings.clamp_limit(parse_limit(params.limit.as_deref())?);
    let offset = parse_offset(params.offset.as_deref())?;
    let order = parse_order(params.order.as_deref().unwrap_or("id"))
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let query = SearchQuery {
        domain,
        fields,
        limit: Some(limit),
        offset,
        order,
    };

    let records = state.store.search(&model, &query, Access::Standard).await?;
    let total_count = state
        .store
        .count(&model, &query.domain, Access::Standard)
        .await?;

    tracing::debug!(
        model = %model,
        returned = records.len(),
        total_count,
        "data API read"
    );
    touch(&state, &settings).await;

    Ok(ApiResponse::ok(
        json!({
            "model": model,
            "count": records.len(),
            "total_count": total_count,
            "limit": limit,
            "offset": offset,
            "records": records,
        }),
        format!("{} records returned", records.len()),
    ))
}

/// GET /powerbi/api/:model/:id
pub async fn get_record(
    State(state): State<Arc<AppState>>,
    Extension(settings): Extension<Settings>,
    Path((model, id)): Path<(String, i64)>,
    Query(params): Query<RecordParams>,
) -> Result<ApiResponse<Value>, AppError> {
    ensure_allowed(&settings, &model)?;

    let fields = parse_fields(params.fields.as_deref().unwrap_or_default())
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let record = state
        .store
        .find_by_id(&model, id, &fields, Access::Standard)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("record {} not found in '{}'", id, model)))?;

    touch(&state, &settings).await;

    Ok(ApiResponse::ok(
        json!({ "model": model, "record": record }),
        "Record found",
    ))
}
