//! Data API over the in-memory store, driven through the full router.

mod common;

use axum::http::StatusCode;
use common::TestApp;

mod token_gate_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let app = TestApp::new(None).await;
        app.configure(100).await;

        let (status, body) = app.get("/powerbi/api/models", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_no_active_configuration_is_unauthorized() {
        let app = TestApp::new(None).await;
        let (status, _) = app.get("/powerbi/api/health", Some("anything")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_wrong_token_is_unauthorized() {
        let app = TestApp::new(None).await;
        let settings = app.configure(100).await;
        let mut wrong = settings.token.unwrap();
        wrong.push('x');

        let (status, _) = app.get("/powerbi/api/models", Some(&wrong)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_query_token_accepted_and_header_wins() {
        let app = TestApp::new(None).await;
        let token = app.configure(100).await.token.unwrap();

        let (status, body) = app
            .get(&format!("/powerbi/api/health?token={}", token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "healthy");
        assert_eq!(body["data"]["version"], "1.0");

        let (status, _) = app
            .get(&format!("/powerbi/api/health?token={}", token), Some("bogus"))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_padded_token_is_unauthorized() {
        let app = TestApp::new(None).await;
        let token = app.configure(100).await.token.unwrap();

        let (status, _) = app
            .get(&format!("/powerbi/api/models?token=%20{}%20", token), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app
            .get("/powerbi/api/models", Some(&format!(" {}", token)))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_rotation_invalidates_previous_token() {
        let app = TestApp::new(None).await;
        let settings = app.configure(100).await;
        let old = settings.token.unwrap();

        let (status, body) = app
            .admin_post(&format!("/powerbi/admin/settings/{}/token", settings.id))
            .await;
        assert_eq!(status, StatusCode::OK);
        let new = body["data"]["token"].as_str().unwrap().to_string();

        assert_eq!(app.get("/powerbi/api/models", Some(&old)).await.0, StatusCode::UNAUTHORIZED);
        assert_eq!(app.get("/powerbi/api/models", Some(&new)).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_successful_read_updates_last_used() {
        let app = TestApp::new(None).await;
        let settings = app.configure(100).await;
        assert!(settings.last_used.is_none());

        app.get("/powerbi/api/models", settings.token.as_deref()).await;
        let reloaded = app.state.settings.get(settings.id).await.unwrap().unwrap();
        assert!(reloaded.last_used.is_some());
    }
}

mod read_tests {
    use super::*;

    #[tokio::test]
    async fn test_models_lists_allow_list() {
        let app = TestApp::new(None).await;
        let token = app.configure(100).await.token.unwrap();

        let (status, body) = app.get("/powerbi/api/models", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["count"], 3);
        assert_eq!(body["data"]["models"][0], "res.partner");
    }

    #[tokio::test]
    async fn test_model_outside_allow_list_is_forbidden() {
        let app = TestApp::new(None).await;
        let token = app.configure(100).await.token.unwrap();

        let (status, _) = app
            .get("/powerbi/api/sale.order?limit=5&domain=%7Bbad", Some(&token))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_settings_model_is_never_readable() {
        let app = TestApp::new(None).await;
        let token = app.configure(100).await.token.unwrap();

        let (status, body) = app.get("/powerbi/api/powerbi.settings", Some(&token)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(!body.to_string().contains(&token));

        let (status, _) = app.get("/powerbi/api/powerbi.settings/1", Some(&token)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_limit_is_clamped_and_total_counts_domain() {
        let app = TestApp::new(None).await;
        let token = app.configure(2).await.token.unwrap();

        let (status, body) = app
            .get("/powerbi/api/res.partner?limit=50", Some(&token))
            .await;
        assert_eq!(status, StatusCode::OK);
        let data = &body["data"];
        assert_eq!(data["limit"], 2);
        assert_eq!(data["count"], 2);
        assert_eq!(data["total_count"], 3);
        assert_eq!(data["records"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_domain_fields_order_and_offset() {
        let app = TestApp::new(None).await;
        let token = app.configure(100).await.token.unwrap();

        // [["city","=","Paris"]], name desc
        let uri = "/powerbi/api/res.partner?domain=%5B%5B%22city%22%2C%22%3D%22%2C%22Paris%22%5D%5D\
                   &fields=name&order=name%20desc&offset=1";
        let (status, body) = app.get(uri, Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        let data = &body["data"];
        assert_eq!(data["total_count"], 2);
        assert_eq!(data["offset"], 1);
        let records = data["records"].as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], "Acme");
        assert!(records[0].get("id").is_some());
        assert!(records[0].get("city").is_none());
    }

    #[tokio::test]
    async fn test_malformed_domain_is_bad_request() {
        let app = TestApp::new(None).await;
        let token = app.configure(100).await.token.unwrap();

        let (status, body) = app
            .get("/powerbi/api/res.partner?domain=%7Bbad", Some(&token))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        // unknown operator
        let (status, _) = app
            .get(
                "/powerbi/api/res.partner?domain=%5B%5B%22name%22%2C%22~%22%2C1%5D%5D",
                Some(&token),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_deeply_nested_domain_is_bad_request() {
        let app = TestApp::new(None).await;
        let token = app.configure(100).await.token.unwrap();

        let domain = format!("[{}[\"id\",\"=\",1]]", "\"!\",".repeat(3000));
        let uri = format!("/powerbi/api/res.partner?domain={}", urlencoding::encode(&domain));
        let (status, body) = app.get(&uri, Some(&token)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let leaves = vec!["[\"id\",\">\",0]"; 300].join(",");
        let uri = format!(
            "/powerbi/api/res.partner?domain={}",
            urlencoding::encode(&format!("[{}]", leaves))
        );
        assert_eq!(app.get(&uri, Some(&token)).await.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_offset_beyond_i64_is_bad_request() {
        let app = TestApp::new(None).await;
        let token = app.configure(100).await.token.unwrap();

        let (status, body) = app
            .get("/powerbi/api/res.partner?offset=9223372036854775808", Some(&token))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("offset"));
    }

    #[tokio::test]
    async fn test_non_numeric_id_is_json_bad_request() {
        let app = TestApp::new(None).await;
        let token = app.configure(100).await.token.unwrap();

        let (status, body) = app.get("/powerbi/api/res.partner/abc", Some(&token)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_non_integer_paging_is_bad_request() {
        let app = TestApp::new(None).await;
        let token = app.configure(100).await.token.unwrap();

        assert_eq!(
            app.get("/powerbi/api/res.partner?limit=ten", Some(&token)).await.0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            app.get("/powerbi/api/res.partner?offset=-1", Some(&token)).await.0,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_single_record_and_not_found() {
        let app = TestApp::new(None).await;
        let token = app.configure(100).await.token.unwrap();

        let (status, body) = app
            .get("/powerbi/api/res.partner/2?fields=city", Some(&token))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["model"], "res.partner");
        assert_eq!(body["data"]["record"]["id"], 2);
        assert_eq!(body["data"]["record"]["city"], "Lyon");
        assert!(body["data"]["record"].get("name").is_none());

        let (status, _) = app.get("/powerbi/api/res.partner/99", Some(&token)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_allow_listed_but_unknown_model_is_bad_request() {
        let app = TestApp::new(None).await;
        let token = app
            .state
            .settings
            .create(connector::models::settings::NewSettings {
                allowed_models: vec!["missing.model".into()],
                ..Default::default()
            })
            .await
            .unwrap()
            .token
            .unwrap();

        let (status, _) = app.get("/powerbi/api/missing.model", Some(&token)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

mod surface_tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    #[tokio::test]
    async fn test_responses_carry_request_id_and_security_headers() {
        let app = TestApp::new(None).await;
        let resp = tower::ServiceExt::oneshot(
            app.router.clone(),
            Request::builder().uri("/healthz").body(Body::empty()).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key("x-request-id"));
        assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_not_found() {
        let app = TestApp::new(None).await;
        let (status, body) = app.get("/nowhere", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_embed_config_with_non_numeric_id() {
        let app = TestApp::new(None).await;
        let (status, body) = app.admin_post("/powerbi/embed_config/abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn test_admin_routes_require_key() {
        let app = TestApp::new(None).await;
        app.configure(100).await;

        let (status, _) = app.get("/powerbi/admin/settings", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = app
            .send(
                Request::builder()
                    .uri("/powerbi/admin/settings")
                    .header("Authorization", format!("Bearer {}", common::ADMIN_KEY))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["client_secret"], "********");
    }

    #[tokio::test]
    async fn test_viewer_page_accepts_cookie() {
        let app = TestApp::new(None).await;
        let resp = tower::ServiceExt::oneshot(
            app.router.clone(),
            Request::builder()
                .uri("/powerbi/view/7")
                .header("Cookie", format!("connector_admin_key={}", common::ADMIN_KEY))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("/powerbi/embed_config/7"));
    }
}
