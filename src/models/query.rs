use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::domain::{compare_values, is_identifier, Domain, DomainError};

/// A stored record: column name → JSON value. Every record carries an
/// integer `id`.
pub type Record = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    pub field: String,
    pub descending: bool,
}

impl OrderTerm {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: false,
        }
    }
}

/// Parse an order clause such as `"name desc, id"`. Empty input orders by
/// primary key ascending.
pub fn parse_order(raw: &str) -> Result<Vec<OrderTerm>, DomainError> {
    let mut terms = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let mut words = part.split_whitespace();
        let field = words.next().unwrap_or_default();
        if !is_identifier(field) {
            return Err(DomainError::InvalidField(field.to_string()));
        }
        let descending = match words.next().map(|w| w.to_lowercase()) {
            None => false,
            Some(dir) if dir == "asc" => false,
            Some(dir) if dir == "desc" => true,
            Some(dir) => return Err(DomainError::InvalidTerm(format!("order direction '{}'", dir))),
        };
        if words.next().is_some() {
            return Err(DomainError::InvalidTerm(format!("order clause '{}'", part)));
        }
        terms.push(OrderTerm {
            field: field.to_string(),
            descending,
        });
    }
    if terms.is_empty() {
        terms.push(OrderTerm::asc("id"));
    }
    Ok(terms)
}

/// Parse a comma-separated field list, dropping blanks.
pub fn parse_fields(raw: &str) -> Result<Vec<String>, DomainError> {
    raw.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(|f| {
            if is_identifier(f) {
                Ok(f.to_string())
            } else {
                Err(DomainError::InvalidField(f.to_string()))
            }
        })
        .collect()
}

/// Filtered, ordered, paginated, projected read.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub domain: Domain,
    /// Empty means every column.
    pub fields: Vec<String>,
    pub limit: Option<u64>,
    pub offset: u64,
    pub order: Vec<OrderTerm>,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            domain: Domain::All,
            fields: Vec::new(),
            limit: None,
            offset: 0,
            order: vec![OrderTerm::asc("id")],
        }
    }
}

impl SearchQuery {
    pub fn filter(domain: Domain) -> Self {
        Self {
            domain,
            ..Default::default()
        }
    }

    pub fn first(domain: Domain) -> Self {
        Self {
            domain,
            limit: Some(1),
            ..Default::default()
        }
    }
}

/// Keep only the requested columns (plus `id`). An empty field list keeps
/// the record unchanged.
pub fn project(record: Record, fields: &[String]) -> Record {
    if fields.is_empty() {
        return record;
    }
    record
        .into_iter()
        .filter(|(k, _)| k == "id" || fields.iter().any(|f| f == k))
        .collect()
}

/// Comparator for in-memory ordering. Nulls and missing values sort last in
/// ascending order.
pub fn compare_records(a: &Record, b: &Record, order: &[OrderTerm]) -> Ordering {
    for term in order {
        let va = a.get(&term.field).unwrap_or(&Value::Null);
        let vb = b.get(&term.field).unwrap_or(&Value::Null);
        let ord = match (va.is_null(), vb.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => compare_values(va, vb).unwrap_or(Ordering::Equal),
        };
        let ord = if term.descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_order_defaults_to_id() {
        assert_eq!(parse_order("").unwrap(), vec![OrderTerm::asc("id")]);
        assert_eq!(
            parse_order("name DESC, id").unwrap(),
            vec![
                OrderTerm { field: "name".into(), descending: true },
                OrderTerm::asc("id"),
            ]
        );
    }

    #[test]
    fn test_order_rejects_injection() {
        assert!(parse_order("id; drop table x").is_err());
        assert!(parse_order("name sideways").is_err());
        assert!(parse_order("name asc nulls").is_err());
    }

    #[test]
    fn test_fields_are_trimmed_and_validated() {
        assert_eq!(parse_fields(" name, ,email ").unwrap(), vec!["name", "email"]);
        assert!(parse_fields("name,\"x\"").is_err());
        assert!(parse_fields("").unwrap().is_empty());
    }

    #[test]
    fn test_project_keeps_id() {
        let rec = json!({"id": 4, "name": "a", "email": "b"}).as_object().cloned().unwrap();
        let projected = project(rec, &["email".to_string()]);
        assert_eq!(Value::Object(projected), json!({"id": 4, "email": "b"}));
    }

    #[test]
    fn test_compare_records_nulls_last() {
        let a = json!({"id": 1, "name": null}).as_object().cloned().unwrap();
        let b = json!({"id": 2, "name": "x"}).as_object().cloned().unwrap();
        let order = vec![OrderTerm::asc("name")];
        assert_eq!(compare_records(&a, &b, &order), Ordering::Greater);
    }
}
