//! Match expressions and find modifiers for record queries.
//!
//! [`MatchExpr`] is a small structural predicate language over record
//! fields, evaluated identically by every backend. SQL compilation is
//! deliberately out of scope; backends may fetch-and-filter.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use deriva_core::record::{as_f64, Record};

/// A structural predicate over one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MatchExpr {
    /// Matches every record.
    All,
    /// Field equals value. The pseudo-field `id` matches the record id.
    Eq { field: String, value: Value },
    /// Field differs from value (missing fields differ from everything).
    Ne { field: String, value: Value },
    /// Numeric greater-than.
    Gt { field: String, value: f64 },
    /// Numeric less-than.
    Lt { field: String, value: f64 },
    /// Field is present.
    Exists { field: String },
    And(Vec<MatchExpr>),
    Or(Vec<MatchExpr>),
    Not(Box<MatchExpr>),
}

impl MatchExpr {
    /// Shorthand equality match.
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        MatchExpr::Eq {
            field: field.into(),
            value,
        }
    }

    /// Conjunction builder.
    pub fn and(self, other: MatchExpr) -> Self {
        match self {
            MatchExpr::And(mut exprs) => {
                exprs.push(other);
                MatchExpr::And(exprs)
            }
            expr => MatchExpr::And(vec![expr, other]),
        }
    }

    /// Evaluates the predicate against one record.
    pub fn eval(&self, record: &Record) -> bool {
        match self {
            MatchExpr::All => true,
            MatchExpr::Eq { field, value } => {
                lookup(record, field).is_some_and(|v| v == *value)
            }
            MatchExpr::Ne { field, value } => {
                lookup(record, field).map_or(true, |v| v != *value)
            }
            MatchExpr::Gt { field, value } => lookup(record, field)
                .and_then(|v| as_f64(&v))
                .is_some_and(|v| v > *value),
            MatchExpr::Lt { field, value } => lookup(record, field)
                .and_then(|v| as_f64(&v))
                .is_some_and(|v| v < *value),
            MatchExpr::Exists { field } => field == "id" || record.get(field).is_some(),
            MatchExpr::And(exprs) => exprs.iter().all(|e| e.eval(record)),
            MatchExpr::Or(exprs) => exprs.iter().any(|e| e.eval(record)),
            MatchExpr::Not(expr) => !expr.eval(record),
        }
    }
}

/// Resolves a field value, treating `id` as the record id.
fn lookup(record: &Record, field: &str) -> Option<Value> {
    if field == "id" {
        Some(Value::from(record.id.0))
    } else {
        record.get(field).cloned()
    }
}

/// Result ordering and limiting for find calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Modifier {
    /// Maximum number of records to return.
    pub limit: Option<usize>,
    /// Sort ascending by this numeric/string field before limiting.
    pub order_by: Option<String>,
}

impl Modifier {
    /// No ordering, no limit.
    pub fn none() -> Self {
        Modifier::default()
    }
}

/// Applies ordering and limit to an already-matched record list.
pub(crate) fn apply_modifier(mut records: Vec<Record>, modifier: &Modifier) -> Vec<Record> {
    if let Some(field) = &modifier.order_by {
        records.sort_by(|a, b| {
            let left = a.get(field);
            let right = b.get(field);
            match (left.and_then(as_f64), right.and_then(as_f64)) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
                _ => {
                    let x = left.and_then(Value::as_str).unwrap_or("");
                    let y = right.and_then(Value::as_str).unwrap_or("");
                    x.cmp(y)
                }
            }
        });
    }
    if let Some(limit) = modifier.limit {
        records.truncate(limit);
    }
    records
}
