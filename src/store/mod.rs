//! Model-addressed record storage.
//!
//! Records are addressed by a dotted model name (`res.partner`), which maps
//! to a table name with dots replaced by underscores (`res_partner`). Every
//! operation takes an explicit [`Access`] mode chosen at the call site.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::models::report::REPORT_MODEL;
use crate::models::settings::SETTINGS_MODEL;
use crate::models::workspace::WORKSPACE_MODEL;
use crate::models::{Domain, Record, SearchQuery};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Models holding secrets. Only reachable with [`Access::Elevated`].
pub const PROTECTED_MODELS: &[&str] = &[SETTINGS_MODEL];

static MODEL_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z_][a-z0-9_]*(\.[a-z0-9_]+)*$").expect("model name regex")
});

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("model '{0}' requires elevated access")]
    ProtectedModel(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Privilege mode for a store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Internal callers (settings lookup, synchronization).
    Elevated,
    /// Externally triggered reads; protected models are refused.
    Standard,
}

impl Access {
    pub fn check(self, model: &str) -> Result<(), StoreError> {
        if !MODEL_NAME.is_match(model) {
            return Err(StoreError::InvalidIdentifier(model.to_string()));
        }
        if self == Access::Standard && PROTECTED_MODELS.contains(&model) {
            return Err(StoreError::ProtectedModel(model.to_string()));
        }
        Ok(())
    }
}

/// Table name for a (validated) model name.
pub fn table_name(model: &str) -> String {
    model.replace('.', "_")
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Filtered, ordered, paginated, projected read.
    async fn search(
        &self,
        model: &str,
        query: &SearchQuery,
        access: Access,
    ) -> Result<Vec<Record>, StoreError>;

    /// Number of records matching `domain`, ignoring pagination.
    async fn count(&self, model: &str, domain: &Domain, access: Access) -> Result<u64, StoreError>;

    async fn find_by_id(
        &self,
        model: &str,
        id: i64,
        fields: &[String],
        access: Access,
    ) -> Result<Option<Record>, StoreError>;

    /// Insert a record and return its new id. `id` in `values` is ignored.
    async fn create(&self, model: &str, values: Record, access: Access) -> Result<i64, StoreError>;

    /// Overwrite the given columns. Returns false if no such record.
    async fn update(
        &self,
        model: &str,
        id: i64,
        values: Record,
        access: Access,
    ) -> Result<bool, StoreError>;

    async fn delete(&self, model: &str, id: i64, access: Access) -> Result<bool, StoreError>;
}

/// Decode a stored record into a typed model.
pub fn from_record<T: DeserializeOwned>(record: Record) -> Result<T, StoreError> {
    Ok(serde_json::from_value(serde_json::Value::Object(record))?)
}

/// Open the store named by `database_url`. `memory://` selects the
/// in-memory backend; anything else is treated as a Postgres URL and
/// migrated on connect.
pub async fn connect(database_url: &str) -> anyhow::Result<Arc<dyn RecordStore>> {
    if database_url.starts_with("memory:") {
        tracing::warn!("Using in-memory record store; data is lost on exit");
        return Ok(Arc::new(MemoryStore::with_connector_models()));
    }
    let store = PgStore::connect(database_url).await?;
    tracing::info!("Running migrations...");
    store.migrate().await?;
    Ok(Arc::new(store))
}

/// Models owned by the connector itself, with their unique columns.
pub fn connector_models() -> [(&'static str, &'static [&'static str]); 3] {
    [
        (SETTINGS_MODEL, &[]),
        (WORKSPACE_MODEL, &["workspace_id"]),
        (REPORT_MODEL, &[]),
    ]
}
