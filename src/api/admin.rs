//! Admin endpoints: configuration lifecycle, connection checks and sync.

use std::sync::Arc;

use axum::extract::State;
use serde_json::{json, Value};

use super::extract::Path;
use crate::embed;
use crate::errors::AppError;
use crate::models::report::{Report, REPORT_MODEL};
use crate::models::workspace::{Workspace, WORKSPACE_MODEL};
use crate::models::{Domain, SearchQuery};
use crate::store::{self, Access};
use crate::models::envelope::ApiResponse;
use crate::models::settings::Settings;
use crate::state::AppState;
use crate::sync::SyncSummary;

async fn load_settings(state: &AppState, id: i64) -> Result<Settings, AppError> {
    state
        .settings
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("configuration {} not found", id)))
}

/// GET /powerbi/admin/settings
pub async fn show_settings(
    State(state): State<Arc<AppState>>,
) -> Result<ApiResponse<Value>, AppError> {
    let settings = state.settings.require_active().await?;
    Ok(ApiResponse::ok(settings.masked(), "Active configuration"))
}

/// POST /powerbi/admin/settings/:id/token
pub async fn rotate_token(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<ApiResponse<Value>, AppError> {
    let token = state.settings.regenerate_token(id).await?;
    Ok(ApiResponse::ok(
        json!({ "id": id, "token": token }),
        "Token regenerated; the previous token no longer works",
    ))
}

/// POST /powerbi/admin/settings/:id/test
pub async fn test_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<ApiResponse<Value>, AppError> {
    let settings = load_settings(&state, id).await?;
    let creds = settings.aad_credentials()?;
    let workspaces = state.powerbi.list_workspaces(&creds).await?;
    Ok(ApiResponse::ok(
        json!({ "workspace_count": workspaces.len() }),
        format!("Connected: {} workspace(s) accessible", workspaces.len()),
    ))
}

/// POST /powerbi/admin/settings/:id/test-aad
pub async fn test_aad(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<ApiResponse<Value>, AppError> {
    let settings = load_settings(&state, id).await?;
    let creds = settings.aad_credentials()?;
    state.powerbi.broker().acquire(&creds).await?;
    Ok(ApiResponse::ok(
        json!({ "tenant_id": creds.tenant_id }),
        "Azure AD token acquired",
    ))
}

/// POST /powerbi/admin/sync
pub async fn sync(State(state): State<Arc<AppState>>) -> Result<ApiResponse<SyncSummary>, AppError> {
    let settings = state.settings.require_active().await?;
    let summary = state.sync_engine().sync_all(&settings).await?;
    let message = format!(
        "Synchronization finished: {} report(s) created, {} updated",
        summary.reports_created, summary.reports_updated
    );
    Ok(ApiResponse::ok(summary, message))
}

/// POST /powerbi/admin/reports/:id/refresh
pub async fn refresh_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<ApiResponse<Value>, AppError> {
    let settings = state.settings.require_active().await?;
    let report = state.sync_engine().refresh_report(&settings, id).await?;
    let report = serde_json::to_value(report).map_err(anyhow::Error::from)?;
    Ok(ApiResponse::ok(report, "Report metadata refreshed"))
}

/// GET /powerbi/admin/workspaces
pub async fn list_workspaces(
    State(state): State<Arc<AppState>>,
) -> Result<ApiResponse<Value>, AppError> {
    let rows = state
        .store
        .search(WORKSPACE_MODEL, &SearchQuery::default(), Access::Elevated)
        .await?;

    let mut workspaces = Vec::with_capacity(rows.len());
    for row in rows {
        let ws: Workspace = store::from_record(row)?;
        let report_count = state
            .store
            .count(REPORT_MODEL, &Domain::eq("workspace_ref_id", ws.id), Access::Elevated)
            .await?;
        let mut entry = serde_json::to_value(&ws).map_err(anyhow::Error::from)?;
        entry["report_count"] = json!(report_count);
        workspaces.push(entry);
    }

    Ok(ApiResponse::ok(
        json!({ "count": workspaces.len(), "workspaces": workspaces }),
        format!("{} workspace(s)", workspaces.len()),
    ))
}

/// GET /powerbi/admin/reports
pub async fn list_reports(
    State(state): State<Arc<AppState>>,
) -> Result<ApiResponse<Value>, AppError> {
    let rows = state
        .store
        .search(REPORT_MODEL, &SearchQuery::default(), Access::Elevated)
        .await?;

    let mut reports = Vec::with_capacity(rows.len());
    for row in rows {
        let report: Report = store::from_record(row)?;
        let mut entry = serde_json::to_value(&report).map_err(anyhow::Error::from)?;
        entry["embed_html"] = json!(embed::preview_html(&report.url));
        entry["viewer_url"] = json!(report.viewer_path());
        reports.push(entry);
    }

    Ok(ApiResponse::ok(
        json!({ "count": reports.len(), "reports": reports }),
        format!("{} report(s)", reports.len()),
    ))
}
