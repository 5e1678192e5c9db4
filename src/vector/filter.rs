//! Metadata filters for vector queries.
//!
//! `Where` accepts the usual document-store JSON syntax
//! (`{"taxa": "Mus"}`, `{"importance_score": {"$gte": 80}}`,
//! `{"paper_id": {"$in": ["1", "2"]}}`, `{"$and": [...]}`) and is evaluated either in
//! memory by the local backend or translated into a Qdrant `Filter`.

use qdrant_client::qdrant::{Condition, Filter, Range};
use serde_json::{json, Map, Value};

use super::Metadata;
use crate::error::{FlywheelError, Result};

/// Metadata key holding the stringified paper id; also the point id in Qdrant.
pub const PAPER_ID_KEY: &str = "paper_id";

#[derive(Clone, Debug, PartialEq)]
pub enum Where {
    Eq(String, Value),
    Gte(String, f64),
    Lte(String, f64),
    In(String, Vec<Value>),
    And(Vec<Where>),
}

impl Where {
    pub fn eq(key: &str, value: impl Into<Value>) -> Self {
        Where::Eq(key.to_string(), value.into())
    }

    pub fn gte(key: &str, value: f64) -> Self {
        Where::Gte(key.to_string(), value)
    }

    pub fn lte(key: &str, value: f64) -> Self {
        Where::Lte(key.to_string(), value)
    }

    pub fn is_in<V: Into<Value>>(key: &str, values: impl IntoIterator<Item = V>) -> Self {
        Where::In(key.to_string(), values.into_iter().map(Into::into).collect())
    }

    /// Conjunction of `self` and `other`, flattening nested `And`s.
    pub fn and(self, other: Where) -> Where {
        let mut clauses = match self {
            Where::And(clauses) => clauses,
            single => vec![single],
        };
        match other {
            Where::And(more) => clauses.extend(more),
            single => clauses.push(single),
        }
        Where::And(clauses)
    }

    /// Combines an optional filter with an extra clause.
    pub fn merge(base: Option<Where>, extra: Where) -> Where {
        match base {
            Some(base) => base.and(extra),
            None => extra,
        }
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Where::Eq(key, expected) => metadata
                .get(key)
                .is_some_and(|actual| loose_eq(actual, expected)),
            Where::Gte(key, bound) => metadata
                .get(key)
                .and_then(as_number)
                .is_some_and(|n| n >= *bound),
            Where::Lte(key, bound) => metadata
                .get(key)
                .and_then(as_number)
                .is_some_and(|n| n <= *bound),
            Where::In(key, options) => metadata
                .get(key)
                .is_some_and(|actual| options.iter().any(|o| loose_eq(actual, o))),
            Where::And(clauses) => clauses.iter().all(|c| c.matches(metadata)),
        }
    }

    pub fn from_json(value: &Value) -> Result<Where> {
        let object = value
            .as_object()
            .ok_or_else(|| FlywheelError::Validation("where clause must be an object".into()))?;

        let mut clauses = Vec::with_capacity(object.len());
        for (key, condition) in object {
            if key == "$and" {
                let items = condition.as_array().ok_or_else(|| {
                    FlywheelError::Validation("$and expects a list of clauses".into())
                })?;
                let nested = items.iter().map(Where::from_json).collect::<Result<Vec<_>>>()?;
                clauses.push(Where::And(nested));
            } else {
                clauses.push(parse_field(key, condition)?);
            }
        }

        match clauses.len() {
            0 => Err(FlywheelError::Validation("empty where clause".into())),
            1 => Ok(clauses.remove(0)),
            _ => Ok(Where::And(clauses)),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Where::Eq(key, value) => json!({ key.as_str(): value }),
            Where::Gte(key, bound) => json!({ key.as_str(): { "$gte": bound } }),
            Where::Lte(key, bound) => json!({ key.as_str(): { "$lte": bound } }),
            Where::In(key, values) => json!({ key.as_str(): { "$in": values } }),
            Where::And(clauses) => {
                json!({ "$and": clauses.iter().map(Where::to_json).collect::<Vec<_>>() })
            }
        }
    }

    /// Translates into a Qdrant filter. `paper_id` membership becomes a point-id filter.
    pub fn to_qdrant(&self) -> Result<Filter> {
        let mut conditions = Vec::new();
        self.collect_conditions(&mut conditions)?;
        Ok(Filter::must(conditions))
    }

    fn collect_conditions(&self, out: &mut Vec<Condition>) -> Result<()> {
        match self {
            Where::And(clauses) => {
                for clause in clauses {
                    clause.collect_conditions(out)?;
                }
            }
            Where::Eq(key, value) if key == PAPER_ID_KEY => {
                out.push(Condition::has_id([point_id(value)?]));
            }
            Where::In(key, values) if key == PAPER_ID_KEY => {
                let ids = values.iter().map(point_id).collect::<Result<Vec<u64>>>()?;
                out.push(Condition::has_id(ids));
            }
            Where::Eq(key, value) => out.push(match value {
                Value::String(s) => Condition::matches(key.clone(), s.clone()),
                Value::Bool(b) => Condition::matches(key.clone(), *b),
                Value::Number(n) if n.is_i64() => {
                    Condition::matches(key.clone(), n.as_i64().unwrap_or_default())
                }
                Value::Number(n) => {
                    let f = n.as_f64().unwrap_or_default();
                    Condition::range(
                        key.clone(),
                        Range {
                            gte: Some(f),
                            lte: Some(f),
                            ..Default::default()
                        },
                    )
                }
                other => {
                    return Err(FlywheelError::Validation(format!(
                        "unsupported equality value for {}: {}",
                        key, other
                    )))
                }
            }),
            Where::Gte(key, bound) => out.push(Condition::range(
                key.clone(),
                Range {
                    gte: Some(*bound),
                    ..Default::default()
                },
            )),
            Where::Lte(key, bound) => out.push(Condition::range(
                key.clone(),
                Range {
                    lte: Some(*bound),
                    ..Default::default()
                },
            )),
            Where::In(key, values) => {
                if values.iter().all(|v| v.is_i64()) {
                    let ints: Vec<i64> = values.iter().filter_map(Value::as_i64).collect();
                    out.push(Condition::matches(key.clone(), ints));
                } else {
                    let keywords: Vec<String> = values.iter().map(value_as_string).collect();
                    out.push(Condition::matches(key.clone(), keywords));
                }
            }
        }
        Ok(())
    }
}

fn parse_field(key: &str, condition: &Value) -> Result<Where> {
    let Some(operators) = condition.as_object() else {
        return Ok(Where::Eq(key.to_string(), condition.clone()));
    };

    let mut clauses = Vec::with_capacity(operators.len());
    for (op, operand) in operators {
        let clause = match op.as_str() {
            "$eq" => Where::Eq(key.to_string(), operand.clone()),
            "$gte" => Where::Gte(key.to_string(), require_number(key, op, operand)?),
            "$lte" => Where::Lte(key.to_string(), require_number(key, op, operand)?),
            "$in" => Where::In(
                key.to_string(),
                operand
                    .as_array()
                    .cloned()
                    .ok_or_else(|| FlywheelError::Validation(format!("$in on {} expects a list", key)))?,
            ),
            other => {
                return Err(FlywheelError::Validation(format!(
                    "unsupported operator {} on {}",
                    other, key
                )))
            }
        };
        clauses.push(clause);
    }

    match clauses.len() {
        0 => Err(FlywheelError::Validation(format!("empty condition on {}", key))),
        1 => Ok(clauses.remove(0)),
        _ => Ok(Where::And(clauses)),
    }
}

fn require_number(key: &str, op: &str, operand: &Value) -> Result<f64> {
    as_number(operand)
        .ok_or_else(|| FlywheelError::Validation(format!("{} on {} expects a number", op, key)))
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numbers compare numerically; anything else by its string form, so `"12"` matches `12`.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if let (Value::Number(x), Value::Number(y)) = (a, b) {
        return x.as_f64() == y.as_f64();
    }
    value_as_string(a) == value_as_string(b)
}

fn point_id(value: &Value) -> Result<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| FlywheelError::Validation(format!("invalid paper id in filter: {}", value)))
}

/// Builds a metadata map from `(key, value)` pairs.
pub fn metadata_from<I, K>(pairs: I) -> Metadata
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v))
        .collect::<Map<String, Value>>()
}
