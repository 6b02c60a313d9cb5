//! Synchronization and embedding against a mocked Azure AD / Power BI.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use wiremock::matchers::{any, body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{record, TestApp, ADMIN_KEY};
use connector::models::report::REPORT_MODEL;
use connector::models::workspace::WORKSPACE_MODEL;
use connector::models::{Domain, SearchQuery};
use connector::store::Access;

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/tenant/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "expires_in": 3599,
            "access_token": "aad-token"
        })))
        .mount(server)
        .await;
}

async fn mount_workspaces(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1.0/myorg/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {"id": "ws-sales", "name": "Sales", "isOnDedicatedCapacity": true},
                {"id": "ws-broken", "name": "Broken"},
                {"id": "ws-ops"}
            ]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/myorg/groups/ws-sales/reports"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {"id": "rep-1", "name": "Revenue", "embedUrl": "https://embed/rep-1", "datasetId": "ds-1"},
                {"id": "rep-2", "name": "Pipeline", "embedUrl": "https://embed/rep-2"}
            ]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/myorg/groups/ws-broken/reports"))
        .respond_with(ResponseTemplate::new(403).set_body_string("PowerBINotAuthorizedException"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/myorg/groups/ws-ops/reports"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"id": "rep-3"}]
        })))
        .mount(server)
        .await;
}

async fn total(app: &TestApp, model: &str) -> u64 {
    app.state
        .store
        .count(model, &Domain::All, Access::Elevated)
        .await
        .unwrap()
}

mod sync_tests {
    use super::*;

    #[tokio::test]
    async fn test_partial_failure_keeps_other_workspaces() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        mount_workspaces(&server).await;

        let app = TestApp::new(Some(&server.uri())).await;
        app.configure(100).await;

        let (status, body) = app.admin_post("/powerbi/admin/sync").await;
        assert_eq!(status, StatusCode::OK);
        let summary = &body["data"];
        assert_eq!(summary["workspaces_created"], 3);
        assert_eq!(summary["reports_created"], 3);
        assert_eq!(summary["reports_updated"], 0);
        assert_eq!(summary["failed_workspaces"], json!(["ws-broken"]));

        let reports = app
            .state
            .store
            .search(
                REPORT_MODEL,
                &SearchQuery::filter(Domain::eq("report_id", "rep-1")),
                Access::Elevated,
            )
            .await
            .unwrap();
        assert_eq!(reports[0]["name"], "Revenue (Sales)");
        assert_eq!(reports[0]["dataset_id"], "ds-1");

        let unnamed = app
            .state
            .store
            .search(
                REPORT_MODEL,
                &SearchQuery::filter(Domain::eq("report_id", "rep-3")),
                Access::Elevated,
            )
            .await
            .unwrap();
        assert_eq!(unnamed[0]["name"], "Unknown (Unknown)");
        assert_eq!(unnamed[0]["url"], "");
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        mount_workspaces(&server).await;

        let app = TestApp::new(Some(&server.uri())).await;
        let settings = app.configure(100).await;
        let engine = app.state.sync_engine();

        engine.sync_all(&settings).await.unwrap();
        let workspaces = total(&app, WORKSPACE_MODEL).await;
        let reports = total(&app, REPORT_MODEL).await;

        let second = engine.sync_all(&settings).await.unwrap();
        assert_eq!(second.workspaces_created, 0);
        assert_eq!(second.workspaces_updated, 3);
        assert_eq!(second.reports_created, 0);
        assert_eq!(second.reports_updated, 3);
        assert_eq!(total(&app, WORKSPACE_MODEL).await, workspaces);
        assert_eq!(total(&app, REPORT_MODEL).await, reports);
    }

    #[tokio::test]
    async fn test_admin_listings_after_sync() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        mount_workspaces(&server).await;

        let app = TestApp::new(Some(&server.uri())).await;
        let settings = app.configure(100).await;
        app.state.sync_engine().sync_all(&settings).await.unwrap();

        let (status, body) = app.get_admin("/powerbi/admin/workspaces").await;
        assert_eq!(status, StatusCode::OK);
        let workspaces = body["data"]["workspaces"].as_array().unwrap();
        assert_eq!(workspaces.len(), 3);
        let count_for = |ws_id: &str| {
            workspaces
                .iter()
                .find(|w| w["workspace_id"] == ws_id)
                .map(|w| w["report_count"].clone())
        };
        assert_eq!(count_for("ws-sales"), Some(json!(2)));
        assert_eq!(count_for("ws-broken"), Some(json!(0)));
        assert_eq!(count_for("ws-ops"), Some(json!(1)));

        let (status, body) = app.get_admin("/powerbi/admin/reports").await;
        assert_eq!(status, StatusCode::OK);
        let reports = body["data"]["reports"].as_array().unwrap();
        let revenue = reports.iter().find(|r| r["report_id"] == "rep-1").unwrap();
        assert!(revenue["embed_html"].as_str().unwrap().contains("https://embed/rep-1"));
        assert!(revenue["viewer_url"].as_str().unwrap().starts_with("/powerbi/view/"));
        let unnamed = reports.iter().find(|r| r["report_id"] == "rep-3").unwrap();
        assert_eq!(unnamed["embed_html"], "");
    }

    #[tokio::test]
    async fn test_workspace_listing_failure_fails_the_pass() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/v1.0/myorg/groups"))
            .respond_with(ResponseTemplate::new(401).set_body_string("TokenExpired"))
            .mount(&server)
            .await;

        let app = TestApp::new(Some(&server.uri())).await;
        app.configure(100).await;

        let (status, body) = app.admin_post("/powerbi/admin/sync").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["message"].as_str().unwrap().contains("401"));
    }

    #[tokio::test]
    async fn test_rejected_client_secret_is_auth_broker_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_client"
            })))
            .mount(&server)
            .await;

        let app = TestApp::new(Some(&server.uri())).await;
        let settings = app.configure(100).await;

        let (status, _) = app
            .admin_post(&format!("/powerbi/admin/settings/{}/test-aad", settings.id))
            .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_connection_reports_workspace_count() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        mount_workspaces(&server).await;

        let app = TestApp::new(Some(&server.uri())).await;
        let settings = app.configure(100).await;

        let (status, body) = app
            .admin_post(&format!("/powerbi/admin/settings/{}/test", settings.id))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["workspace_count"], 3);
    }
}

mod embed_tests {
    use super::*;

    async fn post_embed(app: &TestApp, id: i64) -> (StatusCode, serde_json::Value) {
        app.send(
            Request::builder()
                .method("POST")
                .uri(format!("/powerbi/embed_config/{}", id))
                .header("X-Admin-Key", ADMIN_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn seed_report(app: &TestApp, access_level: Option<&str>) -> i64 {
        app.state
            .store
            .create(
                REPORT_MODEL,
                record(json!({
                    "name": "Revenue",
                    "url": "",
                    "workspace_id": "ws-sales",
                    "report_id": "rep-1",
                    "dataset_id": "",
                    "access_level": access_level,
                })),
                Access::Elevated,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_embed_config_returns_token() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/v1.0/myorg/groups/ws-sales/reports/rep-1"))
            .and(header("authorization", "Bearer aad-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "rep-1",
                "name": "Revenue FY",
                "embedUrl": "https://app.powerbi.com/reportEmbed?reportId=rep-1",
                "datasetId": "ds-1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1.0/myorg/groups/ws-sales/reports/rep-1/GenerateToken"))
            .and(body_json(json!({"accessLevel": "Edit", "datasetId": "ds-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "H4sIAAAA-embed",
                "expiration": "2030-01-01T00:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let app = TestApp::new(Some(&server.uri())).await;
        app.configure(100).await;
        let id = seed_report(&app, Some("edit")).await;

        let (status, body) = post_embed(&app, id).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reportId"], "rep-1");
        assert_eq!(body["embedToken"], "H4sIAAAA-embed");
        assert_eq!(body["name"], "Revenue FY");
        assert!(body["embedUrl"].as_str().unwrap().contains("reportEmbed"));
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_before_any_network_call() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let app = TestApp::new(Some(&server.uri())).await;
        app.state
            .settings
            .create(connector::models::settings::NewSettings {
                tenant_id: Some("tenant".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let id = seed_report(&app, None).await;

        let (status, body) = post_embed(&app, id).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "configuration_error");
        assert!(body["message"].as_str().unwrap().contains("client"));
    }

    #[tokio::test]
    async fn test_unknown_report_is_not_found() {
        let app = TestApp::new(None).await;
        app.configure(100).await;

        let (status, body) = post_embed(&app, 404).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_no_active_settings_is_configuration_error() {
        let app = TestApp::new(None).await;
        let id = seed_report(&app, None).await;

        let (status, body) = post_embed(&app, id).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "configuration_error");
    }
}
