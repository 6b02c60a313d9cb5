//! Power BI REST API client.

use std::time::Duration;

use anyhow::Context;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::config::PowerBiConfig;
use crate::errors::AppError;
use crate::middleware::metrics;
use crate::models::settings::AccessLevel;

use super::broker::{AadCredentials, AadTokenBroker};
use super::types::{
    EmbedTokenResponse, GenerateTokenRequest, ODataList, RemoteReport, RemoteWorkspace,
    ReportDetails,
};

/// HTTP client for the Power BI REST API. Every call authenticates afresh
/// through the [`AadTokenBroker`]; there is no retry.
pub struct PowerBiClient {
    http: Client,
    broker: AadTokenBroker,
    api_base_url: String,
}

impl PowerBiClient {
    pub fn new(cfg: &PowerBiConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("pbi-connector/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            broker: AadTokenBroker::new(http.clone(), &cfg.login_base_url, &cfg.scope),
            http,
            api_base_url: cfg.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn broker(&self) -> &AadTokenBroker {
        &self.broker
    }

    fn group_url(&self, workspace_id: &str) -> String {
        format!(
            "{}/groups/{}",
            self.api_base_url,
            urlencoding::encode(workspace_id)
        )
    }

    fn report_url(&self, workspace_id: &str, report_id: &str) -> String {
        format!(
            "{}/reports/{}",
            self.group_url(workspace_id),
            urlencoding::encode(report_id)
        )
    }

    /// Send an authenticated request and decode the JSON body.
    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        creds: &AadCredentials,
        request: RequestBuilder,
    ) -> Result<T, AppError> {
        let token = self.broker.acquire(creds).await?;

        let result = async {
            let response = request
                .bearer_auth(token)
                .header("Accept", "application/json")
                .send()
                .await
                .map_err(|e| transport_error(operation, e))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(operation, %status, "Power BI API request failed");
                return Err(AppError::RemoteApi {
                    status: Some(status.as_u16()),
                    message: format!("{}: {}", operation, super::truncate(&body)),
                });
            }

            response.json::<T>().await.map_err(|e| AppError::RemoteApi {
                status: None,
                message: format!("{}: failed to parse response: {}", operation, e),
            })
        }
        .await;

        metrics::record_remote_call(operation, result.is_ok());
        result
    }

    /// `GET /groups`
    pub async fn list_workspaces(
        &self,
        creds: &AadCredentials,
    ) -> Result<Vec<RemoteWorkspace>, AppError> {
        let url = format!("{}/groups", self.api_base_url);
        let list: ODataList<RemoteWorkspace> = self
            .send_json("list_workspaces", creds, self.http.get(url))
            .await?;
        Ok(list.value)
    }

    /// `GET /groups/{workspace}/reports`
    pub async fn list_reports(
        &self,
        creds: &AadCredentials,
        workspace_id: &str,
    ) -> Result<Vec<RemoteReport>, AppError> {
        let url = format!("{}/reports", self.group_url(workspace_id));
        let list: ODataList<RemoteReport> = self
            .send_json("list_reports", creds, self.http.get(url))
            .await?;
        Ok(list.value)
    }

    /// `GET /groups/{workspace}/reports/{report}`
    pub async fn get_report_details(
        &self,
        creds: &AadCredentials,
        workspace_id: &str,
        report_id: &str,
    ) -> Result<ReportDetails, AppError> {
        let url = self.report_url(workspace_id, report_id);
        self.send_json("get_report_details", creds, self.http.get(url))
            .await
    }

    /// `POST /groups/{workspace}/reports/{report}/GenerateToken`
    pub async fn generate_embed_token(
        &self,
        creds: &AadCredentials,
        workspace_id: &str,
        report_id: &str,
        dataset_id: Option<&str>,
        access_level: AccessLevel,
    ) -> Result<String, AppError> {
        let url = format!("{}/GenerateToken", self.report_url(workspace_id, report_id));
        let body = GenerateTokenRequest {
            access_level: access_level.as_api_str(),
            dataset_id: dataset_id.filter(|d| !d.is_empty()),
        };
        let response: EmbedTokenResponse = self
            .send_json("generate_embed_token", creds, self.http.post(url).json(&body))
            .await?;

        response
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::RemoteApi {
                status: None,
                message: "generate_embed_token: response did not contain a token".to_string(),
            })
    }
}

fn transport_error(operation: &str, e: reqwest::Error) -> AppError {
    tracing::warn!(operation, "Power BI API transport error: {}", e);
    let message = if e.is_timeout() {
        format!("{}: request timed out", operation)
    } else {
        format!("{}: {}", operation, e)
    };
    AppError::RemoteApi {
        status: None,
        message,
    }
}
