//! Document query filters.

use super::Document;
use serde_json::Value;
use std::cmp::Ordering;

/// A predicate over [`Document`]s.
///
/// Numbers compare numerically regardless of integer/float encoding and
/// strings compare lexicographically. Ordering between other types never
/// matches.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    Ne(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    In(String, Vec<Value>),
    Nin(String, Vec<Value>),
    Or(Vec<Filter>),
    And(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt(field.into(), value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lte(field.into(), value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt(field.into(), value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte(field.into(), value.into())
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In(field.into(), values)
    }

    pub fn not_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::Nin(field.into(), values)
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    pub fn negate(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Matches the document whose `x` and `y` fields equal the point.
    pub fn at(x: i64, y: i64) -> Self {
        Filter::and(vec![Filter::eq("x", x), Filter::eq("y", y)])
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => doc.get(field).is_some_and(|v| equal(v, value)),
            Filter::Ne(field, value) => !doc.get(field).is_some_and(|v| equal(v, value)),
            Filter::Lt(field, value) => ordered(doc, field, value, Ordering::is_lt),
            Filter::Lte(field, value) => ordered(doc, field, value, Ordering::is_le),
            Filter::Gt(field, value) => ordered(doc, field, value, Ordering::is_gt),
            Filter::Gte(field, value) => ordered(doc, field, value, Ordering::is_ge),
            Filter::In(field, values) => doc
                .get(field)
                .is_some_and(|v| values.iter().any(|candidate| equal(v, candidate))),
            Filter::Nin(field, values) => !doc
                .get(field)
                .is_some_and(|v| values.iter().any(|candidate| equal(v, candidate))),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Not(filter) => !filter.matches(doc),
        }
    }
}

fn equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_f64() == b.as_f64(),
        },
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn ordered(doc: &Document, field: &str, value: &Value, accept: fn(Ordering) -> bool) -> bool {
    doc.get(field)
        .and_then(|v| compare(v, value))
        .is_some_and(accept)
}
