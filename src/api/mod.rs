use std::sync::Arc;

use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use subtle::ConstantTimeEq;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::middleware::{metrics, token_gate};
use crate::state::AppState;

pub mod admin;
pub mod data;
pub mod embed;
pub mod extract;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";
pub const ADMIN_KEY_COOKIE: &str = "connector_admin_key";

/// Full HTTP surface: data API, viewer, admin API, health and metrics.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/metrics", get(metrics_handler))
        .nest("/powerbi/api", data_router(state.clone()))
        .nest("/powerbi/admin", admin_router(state.clone()))
        .merge(viewer_router(state.clone()))
        .fallback(fallback_404)
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.dashboard_origin))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

/// Token-gated read API. Routes are relative; mounted under `/powerbi/api`.
pub fn data_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(data::health))
        .route("/models", get(data::list_models))
        .route("/:model", get(data::list_records))
        .route("/:model/:id", get(data::get_record))
        .route_layer(middleware::from_fn(track_api_requests))
        .route_layer(middleware::from_fn_with_state(
            state,
            token_gate::require_token,
        ))
}

/// Admin-key protected API. Mounted under `/powerbi/admin`.
pub fn admin_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/settings", get(admin::show_settings))
        .route("/settings/:id/token", post(admin::rotate_token))
        .route("/settings/:id/test", post(admin::test_connection))
        .route("/settings/:id/test-aad", post(admin::test_aad))
        .route("/sync", post(admin::sync))
        .route("/workspaces", get(admin::list_workspaces))
        .route("/reports", get(admin::list_reports))
        .route("/reports/:id/refresh", post(admin::refresh_report))
        .route_layer(middleware::from_fn_with_state(state, admin_auth))
}

/// Viewer page and its embed configuration endpoint, behind the admin key
/// (the browser sends it as a cookie).
pub fn viewer_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/powerbi/embed_config/:id", post(embed::embed_config))
        .route("/powerbi/view/:id", get(embed::view_report))
        .route_layer(middleware::from_fn_with_state(state, admin_auth))
}

async fn fallback_404(uri: Uri) -> AppError {
    AppError::NotFound(format!("no route for {}", uri.path()))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim())
}

/// The admin key presented by the caller: `X-Admin-Key`, then
/// `Authorization: Bearer`, then the viewer cookie.
pub fn presented_admin_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim())
        })
        .or_else(|| cookie_value(headers, ADMIN_KEY_COOKIE))
        .filter(|k| !k.is_empty())
}

/// Middleware: validates the admin key against `CONNECTOR_ADMIN_KEY`.
/// Returns 401 if missing/invalid, 500 if no key is configured.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let expected = state.config.admin_key.as_deref().ok_or_else(|| {
        tracing::error!("CONNECTOR_ADMIN_KEY is not set");
        AppError::Configuration("admin key is not configured".to_string())
    })?;

    match presented_admin_key(req.headers()) {
        Some(k) if bool::from(k.as_bytes().ct_eq(expected.as_bytes())) => Ok(next.run(req).await),
        Some(k) => {
            tracing::warn!(
                "admin API: invalid key (provided: '{}')",
                crate::models::settings::mask(k)
            );
            Err(AppError::Unauthorized("invalid admin key".to_string()))
        }
        None => {
            tracing::warn!("admin API: missing admin key");
            Err(AppError::Unauthorized("missing admin key".to_string()))
        }
    }
}

/// Middleware: counts data API responses by route and status.
async fn track_api_requests(req: Request, next: Next) -> Response {
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let resp = next.run(req).await;
    metrics::record_api_request(&endpoint, resp.status().as_u16());
    resp
}

fn cors_layer(dashboard_origin: &str) -> CorsLayer {
    let dashboard_origin = dashboard_origin.to_string();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            origin_str == dashboard_origin
                || origin_str.starts_with("http://localhost:")
                || origin_str.starts_with("http://127.0.0.1:")
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(ADMIN_KEY_HEADER),
            HeaderName::from_static(token_gate::TOKEN_HEADER),
            HeaderName::from_static("x-request-id"),
        ])
        .allow_credentials(true)
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    // The viewer page may be framed by the host application.
    headers.insert("x-frame-options", HeaderValue::from_static("SAMEORIGIN"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    // Query-string tokens must not leak through Referer.
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers.remove(header::SERVER);

    resp
}
