use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::AppError;
use crate::powerbi::AadCredentials;

use super::query::Record;

pub const SETTINGS_MODEL: &str = "powerbi.settings";

pub const DEFAULT_SETTINGS_NAME: &str = "Power BI Configuration";
pub const DEFAULT_ALLOWED_MODELS: &str = "res.partner\naccount.move";
pub const DEFAULT_MAX_RECORDS: i64 = 1000;

/// Embed permission requested from Power BI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    #[default]
    View,
    Edit,
}

impl AccessLevel {
    /// Capitalized form expected by the GenerateToken endpoint.
    pub fn as_api_str(&self) -> &'static str {
        match self {
            AccessLevel::View => "View",
            AccessLevel::Edit => "Edit",
        }
    }
}

/// A connector configuration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub allowed_models: Option<String>,
    pub is_active: bool,
    pub max_records: i64,
    #[serde(default)]
    pub created_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub default_access_level: AccessLevel,
}

impl Settings {
    /// Allow-listed model names, one per line in storage.
    pub fn allowed_models_list(&self) -> Vec<String> {
        self.allowed_models
            .as_deref()
            .unwrap_or_default()
            .lines()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn is_model_allowed(&self, model: &str) -> bool {
        self.allowed_models_list().iter().any(|m| m == model)
    }

    pub fn max_records(&self) -> u64 {
        if self.max_records > 0 {
            self.max_records as u64
        } else {
            DEFAULT_MAX_RECORDS as u64
        }
    }

    /// Clamp a requested page size to the configured ceiling. Absent or
    /// non-positive requests get the ceiling itself.
    pub fn clamp_limit(&self, requested: Option<i64>) -> u64 {
        let max = self.max_records();
        match requested {
            Some(n) if n > 0 => (n as u64).min(max),
            _ => max,
        }
    }

    /// Azure AD credentials, or a configuration error naming what is missing.
    pub fn aad_credentials(&self) -> Result<AadCredentials, AppError> {
        AadCredentials::new(
            self.tenant_id.as_deref().unwrap_or_default(),
            self.client_id.as_deref().unwrap_or_default(),
            self.client_secret.as_deref().unwrap_or_default(),
        )
    }

    /// Representation for admin output: secrets are shortened.
    pub fn masked(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "name": self.name,
            "token": self.token.as_deref().map(mask),
            "allowed_models": self.allowed_models_list(),
            "is_active": self.is_active,
            "max_records": self.max_records,
            "created_date": self.created_date,
            "last_used": self.last_used,
            "tenant_id": self.tenant_id,
            "client_id": self.client_id,
            "client_secret": self.client_secret.as_deref().map(|_| "********"),
            "default_access_level": self.default_access_level,
        })
    }
}

/// Keep the first and last four characters of a secret.
pub fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}…{}", head, tail)
    } else {
        "****".to_string()
    }
}

/// Values for a new configuration record.
#[derive(Debug, Clone)]
pub struct NewSettings {
    pub name: String,
    pub allowed_models: Vec<String>,
    pub max_records: i64,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub default_access_level: AccessLevel,
    pub is_active: bool,
}

impl Default for NewSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_SETTINGS_NAME.to_string(),
            allowed_models: DEFAULT_ALLOWED_MODELS.lines().map(String::from).collect(),
            max_records: DEFAULT_MAX_RECORDS,
            tenant_id: None,
            client_id: None,
            client_secret: None,
            default_access_level: AccessLevel::View,
            is_active: true,
        }
    }
}

impl NewSettings {
    pub fn into_record(self, token: String) -> Record {
        let value = json!({
            "name": self.name,
            "token": token,
            "allowed_models": self.allowed_models.join("\n"),
            "is_active": self.is_active,
            "max_records": self.max_records,
            "created_date": Utc::now(),
            "tenant_id": self.tenant_id,
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "default_access_level": self.default_access_level,
        });
        match value {
            serde_json::Value::Object(map) => map,
            _ => Record::new(),
        }
    }
}
