//! Token gate for the data API.
//!
//! The caller presents the opaque token of the active configuration, either
//! in the `X-PowerBI-Token` header or the `token` query parameter. The header
//! wins when both are present. Tokens never expire and are not rate limited.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

use crate::credentials::SettingsProvider;
use crate::errors::AppError;
use crate::middleware::metrics;
use crate::models::settings::Settings;
use crate::state::AppState;

pub const TOKEN_HEADER: &str = "x-powerbi-token";
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Pull the presented token from the header, falling back to the query
/// string. Empty values count as absent; nothing is trimmed.
pub fn extract_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    let from_header = headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|t| !t.is_empty())
        .map(String::from);

    from_header.or_else(|| {
        url::form_urlencoded::parse(query?.as_bytes())
            .find(|(k, _)| k == TOKEN_QUERY_PARAM)
            .map(|(_, v)| v.into_owned())
            .filter(|t| !t.is_empty())
    })
}

fn tokens_match(presented: &str, stored: &str) -> bool {
    presented.as_bytes().ct_eq(stored.as_bytes()).into()
}

/// Resolve the active configuration for a presented token.
pub async fn validate(
    provider: &dyn SettingsProvider,
    presented: Option<&str>,
) -> Result<Settings, AppError> {
    let presented = presented
        .ok_or_else(|| AppError::Unauthorized("missing API token".to_string()))?;

    let settings = provider.active().await?.ok_or_else(|| {
        tracing::warn!("token gate: no active configuration");
        AppError::Unauthorized("invalid API token".to_string())
    })?;

    match settings.token.as_deref() {
        Some(stored) if !stored.is_empty() && tokens_match(presented, stored) => Ok(settings),
        _ => Err(AppError::Unauthorized("invalid API token".to_string())),
    }
}

/// Middleware: rejects the request unless it carries the active token, and
/// hands the matching [`Settings`] to the handler as a request extension.
pub async fn require_token(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = extract_token(req.headers(), req.uri().query());

    match validate(state.settings.as_ref(), presented.as_deref()).await {
        Ok(settings) => {
            metrics::record_gate(true);
            req.extensions_mut().insert(settings);
            Ok(next.run(req).await)
        }
        Err(e) => {
            metrics::record_gate(false);
            tracing::warn!(path = %req.uri().path(), "token gate rejected request: {}", e);
            Err(e)
        }
    }
}
