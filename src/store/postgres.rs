use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::{table_name, Access, RecordStore, StoreError};
use crate::models::domain::{is_identifier, Condition, Operator};
use crate::models::query::{project, OrderTerm};
use crate::models::{Domain, Record, SearchQuery};

/// Postgres-backed record store.
///
/// Rows are read through `to_jsonb(t)`, so any table can be served without
/// a compiled-in schema. Writes go through `jsonb_populate_record`, letting
/// Postgres coerce JSON values to the column types.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn quoted(ident: &str) -> String {
    format!("\"{}\"", ident)
}

fn map_db_error(err: sqlx::Error, model: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some("42P01") => return StoreError::UnknownModel(model.to_string()),
            Some("42703") => return StoreError::InvalidIdentifier(db.message().to_string()),
            Some("23505") => return StoreError::UniqueViolation(db.message().to_string()),
            _ => {}
        }
    }
    StoreError::Database(err)
}

/// `FROM (SELECT to_jsonb(t) AS rec FROM "table" t) s`
fn push_source(qb: &mut QueryBuilder<'_, Postgres>, model: &str) {
    qb.push(" FROM (SELECT to_jsonb(t) AS rec FROM ");
    qb.push(quoted(&table_name(model)));
    qb.push(" t) s");
}

/// Escape LIKE metacharacters for substring matching.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub(crate) fn push_domain(qb: &mut QueryBuilder<'_, Postgres>, domain: &Domain) {
    match domain {
        Domain::All => {
            qb.push("TRUE");
        }
        Domain::And(a, b) | Domain::Or(a, b) => {
            let joiner = if matches!(domain, Domain::And(..)) { " AND " } else { " OR " };
            qb.push("(");
            push_domain(qb, a);
            qb.push(joiner);
            push_domain(qb, b);
            qb.push(")");
        }
        Domain::Not(inner) => {
            qb.push("NOT COALESCE((");
            push_domain(qb, inner);
            qb.push("), FALSE)");
        }
        Domain::Leaf(cond) => push_condition(qb, cond),
    }
}

fn push_condition(qb: &mut QueryBuilder<'_, Postgres>, cond: &Condition) {
    let field = cond.field.clone();
    match cond.op {
        Operator::Eq | Operator::Ne if cond.value.is_null() => {
            if cond.op == Operator::Ne {
                qb.push("NOT ");
            }
            qb.push("(rec -> ");
            qb.push_bind(field.clone());
            qb.push(" IS NULL OR rec -> ");
            qb.push_bind(field);
            qb.push(" = 'null'::jsonb)");
        }
        Operator::Eq => {
            qb.push("COALESCE(rec -> ");
            qb.push_bind(field);
            qb.push(" = ");
            qb.push_bind(Json(cond.value.clone()));
            qb.push(", FALSE)");
        }
        Operator::Ne => {
            qb.push("(rec -> ");
            qb.push_bind(field);
            qb.push(" IS DISTINCT FROM ");
            qb.push_bind(Json(cond.value.clone()));
            qb.push(")");
        }
        Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
            // Mixed-type comparisons are false, matching in-memory evaluation.
            qb.push("COALESCE(jsonb_typeof(rec -> ");
            qb.push_bind(field.clone());
            qb.push(") = jsonb_typeof(");
            qb.push_bind(Json(cond.value.clone()));
            qb.push(") AND jsonb_typeof(rec -> ");
            qb.push_bind(field.clone());
            qb.push(") <> 'null' AND rec -> ");
            qb.push_bind(field);
            qb.push(format!(" {} ", cond.op.as_str()));
            qb.push_bind(Json(cond.value.clone()));
            qb.push(", FALSE)");
        }
        Operator::In | Operator::NotIn => {
            let items: Vec<Value> = cond.value.as_array().cloned().unwrap_or_default();
            if cond.op == Operator::NotIn {
                qb.push("NOT ");
            }
            qb.push("COALESCE(rec -> ");
            qb.push_bind(field);
            qb.push(" = ANY(");
            qb.push_bind(items);
            qb.push("), FALSE)");
        }
        op => {
            let needle = cond.value.as_str().unwrap_or_default();
            let (negated, keyword, pattern) = match op {
                Operator::Like => (false, "LIKE", format!("%{}%", escape_like(needle))),
                Operator::NotLike => (true, "LIKE", format!("%{}%", escape_like(needle))),
                Operator::ILike => (false, "ILIKE", format!("%{}%", escape_like(needle))),
                Operator::NotILike => (true, "ILIKE", format!("%{}%", escape_like(needle))),
                Operator::EqLike => (false, "LIKE", needle.to_string()),
                _ => (false, "ILIKE", needle.to_string()),
            };
            if negated {
                qb.push("NOT ");
            }
            qb.push("COALESCE((rec ->> ");
            qb.push_bind(field);
            qb.push(format!(") {} ", keyword));
            qb.push_bind(pattern);
            qb.push(", FALSE)");
        }
    }
}

fn push_order(qb: &mut QueryBuilder<'_, Postgres>, order: &[OrderTerm]) {
    if order.is_empty() {
        return;
    }
    qb.push(" ORDER BY ");
    for (i, term) in order.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push("rec -> ");
        qb.push_bind(term.field.clone());
        qb.push(if term.descending { " DESC NULLS FIRST" } else { " ASC NULLS LAST" });
    }
}

fn into_record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

fn column_list(values: &Record) -> Result<Vec<String>, StoreError> {
    values
        .keys()
        .filter(|k| k.as_str() != "id")
        .map(|k| {
            if is_identifier(k) {
                Ok(quoted(k))
            } else {
                Err(StoreError::InvalidIdentifier(k.clone()))
            }
        })
        .collect()
}

#[async_trait]
impl RecordStore for PgStore {
    async fn search(
        &self,
        model: &str,
        query: &SearchQuery,
        access: Access,
    ) -> Result<Vec<Record>, StoreError> {
        access.check(model)?;
        let mut qb = QueryBuilder::<Postgres>::new("SELECT rec");
        push_source(&mut qb, model);
        qb.push(" WHERE ");
        push_domain(&mut qb, &query.domain);
        push_order(&mut qb, &query.order);
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit as i64);
        }
        if query.offset > 0 {
            qb.push(" OFFSET ");
            qb.push_bind(i64::try_from(query.offset).unwrap_or(i64::MAX));
        }

        let rows = qb
            .build_query_scalar::<Json<Value>>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_error(e, model))?;

        Ok(rows
            .into_iter()
            .map(|Json(v)| project(into_record(v), &query.fields))
            .collect())
    }

    async fn count(&self, model: &str, domain: &Domain, access: Access) -> Result<u64, StoreError> {
        access.check(model)?;
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*)");
        push_source(&mut qb, model);
        qb.push(" WHERE ");
        push_domain(&mut qb, domain);

        let n = qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_error(e, model))?;
        Ok(n.max(0) as u64)
    }

    async fn find_by_id(
        &self,
        model: &str,
        id: i64,
        fields: &[String],
        access: Access,
    ) -> Result<Option<Record>, StoreError> {
        access.check(model)?;
        let sql = format!(
            "SELECT to_jsonb(t) FROM {} t WHERE id = $1",
            quoted(&table_name(model))
        );
        let row = sqlx::query_scalar::<_, Json<Value>>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_error(e, model))?;
        Ok(row.map(|Json(v)| project(into_record(v), fields)))
    }

    async fn create(&self, model: &str, values: Record, access: Access) -> Result<i64, StoreError> {
        access.check(model)?;
        let table = quoted(&table_name(model));
        let columns = column_list(&values)?;

        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES RETURNING id", table)
        } else {
            let cols = columns.join(", ");
            format!(
                "INSERT INTO {table} ({cols}) SELECT {cols} FROM jsonb_populate_record(NULL::{table}, $1) RETURNING id"
            )
        };

        let id = sqlx::query_scalar::<_, i64>(&sql)
            .bind(Json(Value::Object(values)))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_error(e, model))?;
        tracing::debug!(model, id, "record created");
        Ok(id)
    }

    async fn update(
        &self,
        model: &str,
        id: i64,
        values: Record,
        access: Access,
    ) -> Result<bool, StoreError> {
        access.check(model)?;
        let table = quoted(&table_name(model));
        let columns = column_list(&values)?;
        if columns.is_empty() {
            return Ok(self.find_by_id(model, id, &[], access).await?.is_some());
        }

        let cols = columns.join(", ");
        let target = if columns.len() == 1 { cols.clone() } else { format!("({})", cols) };
        let sql = format!(
            "UPDATE {table} SET {target} = (SELECT {cols} FROM jsonb_populate_record(NULL::{table}, $1)) WHERE id = $2"
        );

        let result = sqlx::query(&sql)
            .bind(Json(Value::Object(values)))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(e, model))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, model: &str, id: i64, access: Access) -> Result<bool, StoreError> {
        access.check(model)?;
        let sql = format!("DELETE FROM {} WHERE id = $1", quoted(&table_name(model)));
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(e, model))?;
        Ok(result.rows_affected() > 0)
    }
}
