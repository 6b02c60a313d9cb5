//! Shared fixtures: an in-memory store with sample partners and a router
//! whose Power BI endpoints point at a mock server.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use connector::config::Config;
use connector::models::settings::{NewSettings, Settings};
use connector::models::Record;
use connector::store::{Access, MemoryStore, RecordStore};
use connector::{api, AppState};

pub const ADMIN_KEY: &str = "test-admin-key";

pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

pub struct TestApp {
    pub state: Arc<AppState>,
    pub router: Router,
}

impl TestApp {
    /// App over a fresh in-memory store. `powerbi_base` is the mock server
    /// URI used for both Azure AD and Power BI.
    pub async fn new(powerbi_base: Option<&str>) -> Self {
        let store = MemoryStore::with_connector_models().with_model("res.partner", &[]);
        for (name, city, customer) in [
            ("Acme", "Paris", true),
            ("Globex", "Lyon", false),
            ("Initech", "Paris", true),
        ] {
            store
                .create(
                    "res.partner",
                    record(json!({"name": name, "city": city, "is_customer": customer})),
                    Access::Elevated,
                )
                .await
                .unwrap();
        }

        let mut config = Config::for_memory(Some(ADMIN_KEY));
        if let Some(base) = powerbi_base {
            config.powerbi.login_base_url = base.to_string();
            config.powerbi.api_base_url = format!("{}/v1.0/myorg", base);
        }

        let store: Arc<dyn RecordStore> = Arc::new(store);
        let state = Arc::new(AppState::new(config, store).unwrap());
        let router = api::app(state.clone());
        Self { state, router }
    }

    /// Create the active configuration, with Azure AD credentials.
    pub async fn configure(&self, max_records: i64) -> Settings {
        self.state
            .settings
            .create(NewSettings {
                max_records,
                allowed_models: vec![
                    "res.partner".into(),
                    "powerbi.settings".into(),
                    "powerbi.report".into(),
                ],
                tenant_id: Some("tenant".into()),
                client_id: Some("client".into()),
                client_secret: Some("secret".into()),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    pub async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri);
        if let Some(t) = token {
            builder = builder.header("X-PowerBI-Token", t);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn get_admin(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .uri(uri)
                .header("X-Admin-Key", ADMIN_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn admin_post(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("X-Admin-Key", ADMIN_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}
