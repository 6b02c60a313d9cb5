//! Domain filter expressions.
//!
//! A domain is a JSON array in prefix notation. Leaves are
//! `[field, operator, value]` triples; `"&"` and `"|"` combine the next two
//! terms, `"!"` negates the next one. Consecutive top-level terms are joined
//! with an implicit AND, and the empty array matches every record.
//!
//! ```text
//! ["|", ["name", "ilike", "acme"], ["is_company", "=", true], ["id", ">", 10]]
//! ```
//!
//! reads as `(name ilike acme OR is_company = true) AND id > 10`.

use std::cmp::Ordering;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use super::query::Record;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));

/// Upper bound on the number of top-level terms in a domain. Every term
/// adds at most one level of nesting, so this also bounds the depth of the
/// parsed tree.
pub const MAX_DOMAIN_TERMS: usize = 256;

/// Returns true if `s` can be used as a field name.
pub fn is_identifier(s: &str) -> bool {
    IDENTIFIER.is_match(s)
}

#[derive(Debug, Error, PartialEq)]
pub enum DomainError {
    #[error("invalid domain format (JSON required): {0}")]
    InvalidJson(String),

    #[error("domain must be a JSON array")]
    NotAnArray,

    #[error("invalid domain term: {0}")]
    InvalidTerm(String),

    #[error("unknown domain operator '{0}'")]
    UnknownOperator(String),

    #[error("invalid field name '{0}'")]
    InvalidField(String),

    #[error("logical operator '{0}' is missing an operand")]
    MissingOperand(String),

    #[error("domain has {0} terms, at most {MAX_DOMAIN_TERMS} are allowed")]
    TooManyTerms(usize),

    #[error("operator '{op}' requires {expected}")]
    InvalidValue { op: String, expected: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Like,
    NotLike,
    ILike,
    NotILike,
    EqLike,
    EqILike,
}

impl Operator {
    pub fn parse(s: &str) -> Option<Self> {
        let op = match s.to_lowercase().as_str() {
            "=" | "==" => Operator::Eq,
            "!=" | "<>" => Operator::Ne,
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            "in" => Operator::In,
            "not in" => Operator::NotIn,
            "like" => Operator::Like,
            "not like" => Operator::NotLike,
            "ilike" => Operator::ILike,
            "not ilike" => Operator::NotILike,
            "=like" => Operator::EqLike,
            "=ilike" => Operator::EqILike,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::In => "in",
            Operator::NotIn => "not in",
            Operator::Like => "like",
            Operator::NotLike => "not like",
            Operator::ILike => "ilike",
            Operator::NotILike => "not ilike",
            Operator::EqLike => "=like",
            Operator::EqILike => "=ilike",
        }
    }

    pub fn is_pattern(&self) -> bool {
        matches!(
            self,
            Operator::Like
                | Operator::NotLike
                | Operator::ILike
                | Operator::NotILike
                | Operator::EqLike
                | Operator::EqILike
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Operator,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Domain {
    #[default]
    All,
    Leaf(Condition),
    And(Box<Domain>, Box<Domain>),
    Or(Box<Domain>, Box<Domain>),
    Not(Box<Domain>),
}

impl Domain {
    /// Parse the wire form used by the `domain` query parameter.
    pub fn parse_json(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Domain::All);
        }
        let value: Value =
            serde_json::from_str(trimmed).map_err(|e| DomainError::InvalidJson(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, DomainError> {
        let terms = value.as_array().ok_or(DomainError::NotAnArray)?;
        if terms.len() > MAX_DOMAIN_TERMS {
            return Err(DomainError::TooManyTerms(terms.len()));
        }
        let mut pos = 0;
        let mut parsed = Vec::new();
        while pos < terms.len() {
            parsed.push(parse_term(terms, &mut pos)?);
        }
        Ok(Self::all_of(parsed))
    }

    /// Single `field = value` leaf.
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Domain::Leaf(Condition {
            field: field.to_string(),
            op: Operator::Eq,
            value: value.into(),
        })
    }

    /// AND-fold of the given terms; an empty list matches everything.
    pub fn all_of(terms: Vec<Domain>) -> Self {
        let mut iter = terms.into_iter().rev();
        let Some(last) = iter.next() else {
            return Domain::All;
        };
        iter.fold(last, |acc, term| Domain::And(Box::new(term), Box::new(acc)))
    }

    /// Evaluate against an in-memory record.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Domain::All => true,
            Domain::Leaf(cond) => cond.matches(record),
            Domain::And(a, b) => a.matches(record) && b.matches(record),
            Domain::Or(a, b) => a.matches(record) || b.matches(record),
            Domain::Not(d) => !d.matches(record),
        }
    }
}

fn parse_term(terms: &[Value], pos: &mut usize) -> Result<Domain, DomainError> {
    let term = &terms[*pos];
    *pos += 1;
    match term {
        Value::String(op) if op == "&" || op == "|" || op == "!" => {
            let arity = if op == "!" { 1 } else { 2 };
            if *pos + arity > terms.len() {
                return Err(DomainError::MissingOperand(op.clone()));
            }
            let first = parse_term(terms, pos)?;
            if op == "!" {
                return Ok(Domain::Not(Box::new(first)));
            }
            if *pos >= terms.len() {
                return Err(DomainError::MissingOperand(op.clone()));
            }
            let second = parse_term(terms, pos)?;
            if op == "&" {
                Ok(Domain::And(Box::new(first), Box::new(second)))
            } else {
                Ok(Domain::Or(Box::new(first), Box::new(second)))
            }
        }
        Value::Array(leaf) => parse_leaf(leaf).map(Domain::Leaf),
        other => Err(DomainError::InvalidTerm(other.to_string())),
    }
}

fn parse_leaf(leaf: &[Value]) -> Result<Condition, DomainError> {
    let [field, op, value] = leaf else {
        return Err(DomainError::InvalidTerm(Value::Array(leaf.to_vec()).to_string()));
    };
    let field = field
        .as_str()
        .ok_or_else(|| DomainError::InvalidTerm(field.to_string()))?;
    if !is_identifier(field) {
        return Err(DomainError::InvalidField(field.to_string()));
    }
    let op_str = op
        .as_str()
        .ok_or_else(|| DomainError::InvalidTerm(op.to_string()))?;
    let op = Operator::parse(op_str).ok_or_else(|| DomainError::UnknownOperator(op_str.to_string()))?;

    match op {
        Operator::In | Operator::NotIn if !value.is_array() => {
            return Err(DomainError::InvalidValue {
                op: op.as_str().to_string(),
                expected: "an array value",
            });
        }
        _ if op.is_pattern() && !value.is_string() => {
            return Err(DomainError::InvalidValue {
                op: op.as_str().to_string(),
                expected: "a string value",
            });
        }
        _ => {}
    }

    Ok(Condition {
        field: field.to_string(),
        op,
        value: value.clone(),
    })
}

impl Condition {
    fn matches(&self, record: &Record) -> bool {
        let actual = record.get(&self.field).unwrap_or(&Value::Null);
        match self.op {
            Operator::Eq => values_equal(actual, &self.value),
            Operator::Ne => !values_equal(actual, &self.value),
            Operator::Lt => compare_values(actual, &self.value) == Some(Ordering::Less),
            Operator::Le => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Gt => compare_values(actual, &self.value) == Some(Ordering::Greater),
            Operator::Ge => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::In => self.in_list(actual),
            Operator::NotIn => !self.in_list(actual),
            Operator::Like => self.pattern_match(actual, false, false),
            Operator::NotLike => !self.pattern_match(actual, false, false),
            Operator::ILike => self.pattern_match(actual, true, false),
            Operator::NotILike => !self.pattern_match(actual, true, false),
            Operator::EqLike => self.pattern_match(actual, false, true),
            Operator::EqILike => self.pattern_match(actual, true, true),
        }
    }

    fn in_list(&self, actual: &Value) -> bool {
        self.value
            .as_array()
            .map(|items| items.iter().any(|item| values_equal(actual, item)))
            .unwrap_or(false)
    }

    fn pattern_match(&self, actual: &Value, case_insensitive: bool, raw_pattern: bool) -> bool {
        let (Some(text), Some(needle)) = (as_text(actual), self.value.as_str()) else {
            return false;
        };
        if !raw_pattern {
            return if case_insensitive {
                text.to_lowercase().contains(&needle.to_lowercase())
            } else {
                text.contains(needle)
            };
        }
        like_regex(needle, case_insensitive)
            .map(|re| re.is_match(&text))
            .unwrap_or(false)
    }
}

/// Translate a SQL LIKE pattern (`%`, `_`, `\` escapes) into an anchored regex.
fn like_regex(pattern: &str, case_insensitive: bool) -> Option<Regex> {
    let mut out = String::from(if case_insensitive { "(?is)^" } else { "(?s)^" });
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).ok()
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering between two JSON scalars of the same kind; `None` when the
/// kinds differ or either side is null.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
