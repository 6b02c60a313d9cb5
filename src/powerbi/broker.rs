//! Azure AD client-credentials exchange for the Power BI API.

use std::fmt;

use crate::errors::AppError;

use super::types::TokenResponse;

/// Tenant/client/secret triple. Construction fails if any part is blank.
#[derive(Clone)]
pub struct AadCredentials {
    pub tenant_id: String,
    pub client_id: String,
    client_secret: String,
}

impl AadCredentials {
    pub fn new(tenant_id: &str, client_id: &str, client_secret: &str) -> Result<Self, AppError> {
        let missing: Vec<&str> = [
            ("tenant_id", tenant_id),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ]
        .iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| *k)
        .collect();

        if !missing.is_empty() {
            return Err(AppError::Configuration(format!(
                "Azure AD credentials incomplete; configure tenant id, client id and client secret (missing: {})",
                missing.join(", ")
            )));
        }

        Ok(Self {
            tenant_id: tenant_id.trim().to_string(),
            client_id: client_id.trim().to_string(),
            client_secret: client_secret.to_string(),
        })
    }
}

impl fmt::Debug for AadCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AadCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"****")
            .finish()
    }
}

/// Obtains Power BI access tokens. No caching: every call hits the token
/// endpoint.
pub struct AadTokenBroker {
    http: reqwest::Client,
    login_base_url: String,
    scope: String,
}

impl AadTokenBroker {
    pub fn new(http: reqwest::Client, login_base_url: &str, scope: &str) -> Self {
        Self {
            http,
            login_base_url: login_base_url.trim_end_matches('/').to_string(),
            scope: scope.to_string(),
        }
    }

    fn token_url(&self, tenant_id: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_base_url,
            urlencoding::encode(tenant_id)
        )
    }

    pub async fn acquire(&self, creds: &AadCredentials) -> Result<String, AppError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        let response = self
            .http
            .post(self.token_url(&creds.tenant_id))
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(tenant = %creds.tenant_id, "Azure AD token request failed: {}", e);
                let reason = if e.is_timeout() { "request timed out".to_string() } else { e.to_string() };
                AppError::AuthBroker(format!("failed to obtain Azure AD token: {}", reason))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(tenant = %creds.tenant_id, %status, "Azure AD rejected token request");
            return Err(AppError::AuthBroker(format!(
                "failed to obtain Azure AD token: {} {}",
                status,
                super::truncate(&body)
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            AppError::AuthBroker(format!("failed to parse Azure AD token response: {}", e))
        })?;

        match token.access_token.filter(|t| !t.is_empty()) {
            Some(t) => {
                tracing::debug!(tenant = %creds.tenant_id, "Azure AD token acquired");
                Ok(t)
            }
            None => Err(AppError::AuthBroker(
                "Azure AD response did not contain an access_token".to_string(),
            )),
        }
    }
}
