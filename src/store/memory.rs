use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{connector_models, Access, RecordStore, StoreError};
use crate::models::domain::values_equal;
use crate::models::query::{compare_records, project};
use crate::models::{Domain, Record, SearchQuery};

#[derive(Default)]
struct Table {
    last_id: i64,
    unique: Vec<String>,
    rows: BTreeMap<i64, Record>,
}

impl Table {
    fn check_unique(&self, values: &Record, skip_id: Option<i64>) -> Result<(), StoreError> {
        for column in &self.unique {
            let Some(candidate) = values.get(column).filter(|v| !v.is_null()) else {
                continue;
            };
            let clash = self.rows.iter().any(|(id, row)| {
                Some(*id) != skip_id
                    && row
                        .get(column)
                        .map(|existing| values_equal(existing, candidate))
                        .unwrap_or(false)
            });
            if clash {
                return Err(StoreError::UniqueViolation(format!("{} = {}", column, candidate)));
            }
        }
        Ok(())
    }
}

/// Process-local record store. Models must be registered before use.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the connector's own models registered.
    pub fn with_connector_models() -> Self {
        connector_models()
            .into_iter()
            .fold(Self::new(), |store, (model, unique)| store.with_model(model, unique))
    }

    /// Register a model and its unique columns.
    pub fn with_model(mut self, model: &str, unique: &[&str]) -> Self {
        self.tables.get_mut().insert(
            model.to_string(),
            Table {
                unique: unique.iter().map(|c| c.to_string()).collect(),
                ..Default::default()
            },
        );
        self
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn search(
        &self,
        model: &str,
        query: &SearchQuery,
        access: Access,
    ) -> Result<Vec<Record>, StoreError> {
        access.check(model)?;
        let tables = self.tables.read().await;
        let table = tables
            .get(model)
            .ok_or_else(|| StoreError::UnknownModel(model.to_string()))?;

        let mut matched: Vec<&Record> = table
            .rows
            .values()
            .filter(|row| query.domain.matches(row))
            .collect();
        matched.sort_by(|a, b| compare_records(a, b, &query.order));

        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(matched
            .into_iter()
            .skip(query.offset as usize)
            .take(limit)
            .map(|row| project(row.clone(), &query.fields))
            .collect())
    }

    async fn count(&self, model: &str, domain: &Domain, access: Access) -> Result<u64, StoreError> {
        access.check(model)?;
        let tables = self.tables.read().await;
        let table = tables
            .get(model)
            .ok_or_else(|| StoreError::UnknownModel(model.to_string()))?;
        Ok(table.rows.values().filter(|row| domain.matches(row)).count() as u64)
    }

    async fn find_by_id(
        &self,
        model: &str,
        id: i64,
        fields: &[String],
        access: Access,
    ) -> Result<Option<Record>, StoreError> {
        access.check(model)?;
        let tables = self.tables.read().await;
        let table = tables
            .get(model)
            .ok_or_else(|| StoreError::UnknownModel(model.to_string()))?;
        Ok(table.rows.get(&id).map(|row| project(row.clone(), fields)))
    }

    async fn create(
        &self,
        model: &str,
        mut values: Record,
        access: Access,
    ) -> Result<i64, StoreError> {
        access.check(model)?;
        let mut tables = self.tables.write().await;
        let table = tables
            .get_mut(model)
            .ok_or_else(|| StoreError::UnknownModel(model.to_string()))?;

        values.remove("id");
        table.check_unique(&values, None)?;

        table.last_id += 1;
        let id = table.last_id;
        values.insert("id".to_string(), Value::from(id));
        table.rows.insert(id, values);
        Ok(id)
    }

    async fn update(
        &self,
        model: &str,
        id: i64,
        mut values: Record,
        access: Access,
    ) -> Result<bool, StoreError> {
        access.check(model)?;
        let mut tables = self.tables.write().await;
        let table = tables
            .get_mut(model)
            .ok_or_else(|| StoreError::UnknownModel(model.to_string()))?;

        if !table.rows.contains_key(&id) {
            return Ok(false);
        }
        values.remove("id");
        table.check_unique(&values, Some(id))?;

        if let Some(row) = table.rows.get_mut(&id) {
            row.extend(values);
        }
        Ok(true)
    }

    async fn delete(&self, model: &str, id: i64, access: Access) -> Result<bool, StoreError> {
        access.check(model)?;
        let mut tables = self.tables.write().await;
        let table = tables
            .get_mut(model)
            .ok_or_else(|| StoreError::UnknownModel(model.to_string()))?;
        Ok(table.rows.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::query::OrderTerm;
    use serde_json::json;

    fn rec(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    async fn partners() -> MemoryStore {
        let store = MemoryStore::new().with_model("res.partner", &["ref"]);
        for (name, city) in [("Acme", "Paris"), ("Globex", "Lyon"), ("Initech", "Paris")] {
            store
                .create("res.partner", rec(json!({"name": name, "city": city})), Access::Elevated)
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() {
        let store = partners().await;
        let rec = store
            .find_by_id("res.partner", 2, &[], Access::Standard)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec["name"], "Globex");
        assert_eq!(rec["id"], 2);
    }

    #[tokio::test]
    async fn test_search_filters_orders_and_paginates() {
        let store = partners().await;
        let query = SearchQuery {
            domain: Domain::eq("city", "Paris"),
            fields: vec!["name".into()],
            limit: Some(1),
            offset: 1,
            order: vec![OrderTerm { field: "name".into(), descending: true }],
        };
        let rows = store.search("res.partner", &query, Access::Standard).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(Value::Object(rows[0].clone()), json!({"id": 1, "name": "Acme"}));

        let total = store
            .count("res.partner", &Domain::eq("city", "Paris"), Access::Standard)
            .await
            .unwrap();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn test_unknown_model_is_reported() {
        let store = MemoryStore::new();
        let err = store
            .search("sale.order", &SearchQuery::default(), Access::Standard)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownModel(m) if m == "sale.order"));
    }

    #[tokio::test]
    async fn test_unique_columns_are_enforced() {
        let store = partners().await;
        store
            .create("res.partner", rec(json!({"name": "A", "ref": "X1"})), Access::Elevated)
            .await
            .unwrap();
        let err = store
            .create("res.partner", rec(json!({"name": "B", "ref": "X1"})), Access::Elevated)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));

        // Rewriting a row with its own value is fine.
        assert!(store
            .update("res.partner", 4, rec(json!({"ref": "X1", "name": "A2"})), Access::Elevated)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_update_and_delete_report_missing_rows() {
        let store = partners().await;
        assert!(!store
            .update("res.partner", 99, rec(json!({"name": "x"})), Access::Elevated)
            .await
            .unwrap());
        assert!(store.delete("res.partner", 1, Access::Elevated).await.unwrap());
        assert!(!store.delete("res.partner", 1, Access::Elevated).await.unwrap());
        assert_eq!(
            store.count("res.partner", &Domain::All, Access::Standard).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_protected_model_refused_without_elevation() {
        let store = MemoryStore::with_connector_models();
        let err = store
            .search("powerbi.settings", &SearchQuery::default(), Access::Standard)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ProtectedModel(_)));
        assert!(store
            .search("powerbi.settings", &SearchQuery::default(), Access::Elevated)
            .await
            .unwrap()
            .is_empty());
    }
}
