//! Feed identity: a slash-separated path plus query constraints.
//!
//! Paths with an odd number of segments address a collection
//! (`products`, `stores/s1/products`); an even number addresses a single
//! document (`products/p1`).

use crate::error::{FeedError, FeedResult};
use crate::feed::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// Comparison operator of a `Where` constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "array-contains")]
    ArrayContains,
    #[serde(rename = "in")]
    In,
}

impl FilterOp {
    pub fn parse(op: &str) -> Option<Self> {
        Some(match op.trim() {
            "==" => FilterOp::Eq,
            "!=" => FilterOp::Ne,
            "<" => FilterOp::Lt,
            "<=" => FilterOp::Le,
            ">" => FilterOp::Gt,
            ">=" => FilterOp::Ge,
            "array-contains" => FilterOp::ArrayContains,
            "in" => FilterOp::In,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One query constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    Where {
        field: String,
        op: FilterOp,
        value: Value,
    },
    OrderBy {
        field: String,
        direction: SortDirection,
    },
    Limit {
        count: usize,
    },
}

impl Constraint {
    pub fn where_(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Constraint::Where {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn order_by(field: impl Into<String>, direction: SortDirection) -> Self {
        Constraint::OrderBy {
            field: field.into(),
            direction,
        }
    }

    pub fn limit(count: usize) -> Self {
        Constraint::Limit { count }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedShape {
    Collection,
    Document,
}

/// Canonical identity of a logical feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedKey(String);

impl FeedKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A feed request: path plus constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedQuery {
    path: String,
    #[serde(default)]
    constraints: Vec<Constraint>,
}

impl FeedQuery {
    /// Leading and trailing slashes are ignored.
    pub fn new(path: impl AsRef<str>, constraints: Vec<Constraint>) -> Self {
        Self {
            path: path.as_ref().trim().trim_matches('/').to_string(),
            constraints,
        }
    }

    pub fn collection(path: impl AsRef<str>) -> Self {
        Self::new(path, Vec::new())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/')
    }

    /// Two queries with equal keys are the same logical feed.
    pub fn key(&self) -> FeedKey {
        let constraints = serde_json::to_string(&self.constraints).unwrap_or_default();
        FeedKey(format!("{}?{}", self.path, constraints))
    }

    /// Validate the path and constraints and report the feed shape.
    pub fn shape(&self) -> FeedResult<FeedShape> {
        if self.path.is_empty() {
            return Err(FeedError::InvalidPath("path is empty".into()));
        }
        let mut count = 0;
        for segment in self.segments() {
            if segment.trim().is_empty() {
                return Err(FeedError::InvalidPath(format!(
                    "`{}` has an empty segment",
                    self.path
                )));
            }
            count += 1;
        }

        let shape = if count % 2 == 1 {
            FeedShape::Collection
        } else {
            FeedShape::Document
        };

        if shape == FeedShape::Document && !self.constraints.is_empty() {
            return Err(FeedError::InvalidQuery(format!(
                "`{}` is a document; constraints apply to collections only",
                self.path
            )));
        }
        for constraint in &self.constraints {
            match constraint {
                Constraint::Where { field, op, value } => {
                    if field.trim().is_empty() {
                        return Err(FeedError::InvalidQuery("where: empty field".into()));
                    }
                    if *op == FilterOp::In && !value.is_array() {
                        return Err(FeedError::InvalidQuery(format!(
                            "where {field} in: value must be an array"
                        )));
                    }
                }
                Constraint::OrderBy { field, .. } if field.trim().is_empty() => {
                    return Err(FeedError::InvalidQuery("order_by: empty field".into()));
                }
                _ => {}
            }
        }
        Ok(shape)
    }

    /// For a document path, split into (collection path, document id).
    pub fn document_parts(&self) -> Option<(&str, &str)> {
        match self.shape() {
            Ok(FeedShape::Document) => self.path.rsplit_once('/'),
            _ => None,
        }
    }

    /// Evaluate the constraints against a collection, client side.
    ///
    /// Filters run first, then ordering (records missing an ordered field are
    /// dropped), then the smallest limit.
    pub fn apply(&self, records: Vec<Record>) -> Vec<Record> {
        let mut out: Vec<Record> = records
            .into_iter()
            .filter(|record| {
                self.constraints.iter().all(|c| match c {
                    Constraint::Where { field, op, value } => {
                        matches_filter(field_value(record, field), *op, value)
                    }
                    _ => true,
                })
            })
            .collect();

        let orderings: Vec<(&str, SortDirection)> = self
            .constraints
            .iter()
            .filter_map(|c| match c {
                Constraint::OrderBy { field, direction } => Some((field.as_str(), *direction)),
                _ => None,
            })
            .collect();

        if !orderings.is_empty() {
            out.retain(|record| {
                orderings
                    .iter()
                    .all(|(field, _)| field_value(record, field).is_some())
            });
            out.sort_by(|a, b| {
                for (field, direction) in &orderings {
                    let ord = match (field_value(a, field), field_value(b, field)) {
                        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                        _ => Ordering::Equal,
                    };
                    let ord = match direction {
                        SortDirection::Asc => ord,
                        SortDirection::Desc => ord.reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let limit = self
            .constraints
            .iter()
            .filter_map(|c| match c {
                Constraint::Limit { count } => Some(*count),
                _ => None,
            })
            .min();
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        out
    }
}

impl fmt::Display for FeedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        if !self.constraints.is_empty() {
            write!(f, " ({} constraints)", self.constraints.len())?;
        }
        Ok(())
    }
}

/// Dotted field lookup (`stock.quantity`).
fn field_value<'a>(record: &'a Record, field: &str) -> Option<&'a Value> {
    field
        .split('.')
        .try_fold(record, |value, segment| value.get(segment))
        .filter(|value| !value.is_null())
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn matches_filter(field: Option<&Value>, op: FilterOp, expected: &Value) -> bool {
    let Some(actual) = field else {
        return false;
    };
    match op {
        FilterOp::Eq => values_equal(actual, expected),
        FilterOp::Ne => !values_equal(actual, expected),
        FilterOp::Lt => compare_values(actual, expected) == Some(Ordering::Less),
        FilterOp::Le => matches!(
            compare_values(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOp::Gt => compare_values(actual, expected) == Some(Ordering::Greater),
        FilterOp::Ge => matches!(
            compare_values(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOp::ArrayContains => actual
            .as_array()
            .is_some_and(|items| items.iter().any(|item| values_equal(item, expected))),
        FilterOp::In => expected
            .as_array()
            .is_some_and(|items| items.iter().any(|item| values_equal(actual, item))),
    }
}
