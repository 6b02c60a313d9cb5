//! Report viewer routes.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::extract::Path;
use crate::embed;
use crate::errors::AppError;
use crate::state::AppState;

/// POST /powerbi/embed_config/:id
///
/// Errors use `{"error": code, "message": detail}` rather than the API
/// envelope; the viewer page reads `cfg.error`.
pub async fn embed_config(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, AppError>,
) -> Response {
    let Path(id) = match id {
        Ok(path) => path,
        Err(e) => return embed_error(e),
    };
    match embed::embed_config(
        state.store.as_ref(),
        state.settings.as_ref(),
        &state.powerbi,
        id,
    )
    .await
    {
        Ok(cfg) => Json(cfg).into_response(),
        Err(e) => {
            tracing::error!(report = id, "embed config error: {}", e);
            embed_error(e)
        }
    }
}

fn embed_error(e: AppError) -> Response {
    let body = json!({ "error": e.code(), "message": e.public_message() });
    (e.status(), Json(body)).into_response()
}

/// GET /powerbi/view/:id
pub async fn view_report(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Html<String> {
    Html(embed::viewer_page(id, &state.config.powerbi.sdk_url))
}
