//! Active configuration lookup and token lifecycle.
//!
//! At most one configuration record is expected to be active. That is not
//! enforced; when several are, the one with the lowest id wins.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use serde_json::json;

use crate::errors::AppError;
use crate::models::settings::{NewSettings, Settings, SETTINGS_MODEL};
use crate::models::{Domain, Record, SearchQuery};
use crate::store::{from_record, Access, RecordStore};

/// Random bytes behind each API token.
const TOKEN_BYTES: usize = 32;

/// Generate an opaque API token: 32 random bytes, URL-safe base64.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[async_trait]
pub trait SettingsProvider: Send + Sync {
    /// The active configuration, if any.
    async fn active(&self) -> Result<Option<Settings>, AppError>;

    /// Like [`active`](Self::active), but a missing configuration is a
    /// configuration error.
    async fn require_active(&self) -> Result<Settings, AppError> {
        self.active().await?.ok_or_else(|| {
            AppError::Configuration("no active Power BI configuration".to_string())
        })
    }

    async fn get(&self, id: i64) -> Result<Option<Settings>, AppError>;

    /// Record a successful gated read.
    async fn touch_last_used(&self, id: i64) -> Result<(), AppError>;

    /// Replace the token. The old one stops working immediately.
    async fn regenerate_token(&self, id: i64) -> Result<String, AppError>;

    async fn create(&self, new: NewSettings) -> Result<Settings, AppError>;

    /// Make `id` the only active configuration.
    async fn activate(&self, id: i64) -> Result<(), AppError>;

    async fn delete(&self, id: i64) -> Result<bool, AppError>;
}

/// [`SettingsProvider`] over the record store, using elevated access.
pub struct StoreSettingsProvider {
    store: Arc<dyn RecordStore>,
}

impl StoreSettingsProvider {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    async fn write(&self, id: i64, values: serde_json::Value) -> Result<(), AppError> {
        let values: Record = serde_json::from_value(values).map_err(anyhow::Error::from)?;
        let found = self
            .store
            .update(SETTINGS_MODEL, id, values, Access::Elevated)
            .await?;
        if !found {
            return Err(AppError::NotFound(format!("configuration {} not found", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsProvider for StoreSettingsProvider {
    async fn active(&self) -> Result<Option<Settings>, AppError> {
        let rows = self
            .store
            .search(
                SETTINGS_MODEL,
                &SearchQuery::first(Domain::eq("is_active", true)),
                Access::Elevated,
            )
            .await?;
        Ok(rows
            .into_iter()
            .next()
            .map(from_record::<Settings>)
            .transpose()?)
    }

    async fn get(&self, id: i64) -> Result<Option<Settings>, AppError> {
        let row = self
            .store
            .find_by_id(SETTINGS_MODEL, id, &[], Access::Elevated)
            .await?;
        Ok(row.map(from_record::<Settings>).transpose()?)
    }

    async fn touch_last_used(&self, id: i64) -> Result<(), AppError> {
        self.write(id, json!({ "last_used": Utc::now() })).await
    }

    async fn regenerate_token(&self, id: i64) -> Result<String, AppError> {
        let token = generate_token();
        self.write(id, json!({ "token": token })).await?;
        tracing::info!(settings_id = id, "API token regenerated");
        Ok(token)
    }

    async fn create(&self, new: NewSettings) -> Result<Settings, AppError> {
        if new.max_records <= 0 {
            return Err(AppError::BadRequest("max_records must be positive".to_string()));
        }
        let activate = new.is_active;
        let record = new.into_record(generate_token());
        let id = self
            .store
            .create(SETTINGS_MODEL, record, Access::Elevated)
            .await?;
        if activate {
            self.activate(id).await?;
        }
        tracing::info!(settings_id = id, "configuration created");
        self.get(id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("configuration {} vanished after create", id)))
    }

    async fn activate(&self, id: i64) -> Result<(), AppError> {
        if self.get(id).await?.is_none() {
            return Err(AppError::NotFound(format!("configuration {} not found", id)));
        }
        let others = self
            .store
            .search(
                SETTINGS_MODEL,
                &SearchQuery::filter(Domain::eq("is_active", true)),
                Access::Elevated,
            )
            .await?;
        for other in others.into_iter().map(from_record::<Settings>) {
            let other = other?;
            if other.id != id {
                self.write(other.id, json!({ "is_active": false })).await?;
            }
        }
        self.write(id, json!({ "is_active": true })).await
    }

    async fn delete(&self, id: i64) -> Result<bool, AppError> {
        Ok(self
            .store
            .delete(SETTINGS_MODEL, id, Access::Elevated)
            .await?)
    }
}
