//! The intermediate value representation the engine uses to move data between the embedding
//! application, the query composer's auto-parameters, and the graph driver.
//!
//! `Value` carries exactly the graph value types the store protocol is required to support
//! (section 6 of the design): scalars, containers, and the three graph-response shapes — a raw
//! node, a raw relationship, and a raw path.

use crate::Error;
use chrono::{DateTime, NaiveDate, Utc};
use num_bigint::BigInt;
use std::collections::HashMap;
use std::convert::TryFrom;

/// A node as returned directly by the driver (as opposed to a [`crate::engine::pull`]
/// projection, which is shaped by a request tree).
#[derive(Clone, Debug, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub labels: Vec<String>,
    pub props: HashMap<String, Value>,
}

/// A relationship as returned directly by the driver.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphRelationship {
    pub id: String,
    pub rel_type: String,
    pub start_id: String,
    pub end_id: String,
    pub props: HashMap<String, Value>,
}

/// A path as returned directly by the driver: an alternating sequence of nodes and the
/// relationships connecting them, `nodes.len() == relationships.len() + 1`.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphPath {
    pub nodes: Vec<GraphNode>,
    pub relationships: Vec<GraphRelationship>,
}

/// Intermediate data structure for values that cross the boundary between the engine and the
/// graph driver: field values, fragment auto-parameters, and decoded result columns.
///
/// # Examples
///
/// ```rust
/// use vertexdb::engine::value::Value;
///
/// let v = Value::Bool(true);
/// ```
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    /// A wide (128-bit class) integer, backed by an arbitrary-precision type and range-checked
    /// by the field system at validation time.
    BigInt(BigInt),
    /// A calendar date with no time-of-day component.
    Date(NaiveDate),
    /// An instant in time, always normalized to UTC by the driver boundary.
    Timestamp(DateTime<Utc>),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    Node(GraphNode),
    Relationship(GraphRelationship),
    Path(GraphPath),
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Node(a), Value::Node(b)) => a == b,
            (Value::Relationship(a), Value::Relationship(b)) => a == b,
            (Value::Path(a), Value::Path(b)) => a == b,
            (_, _) => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int64(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int64(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float64(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<BigInt> for Value {
    fn from(i: BigInt) -> Self {
        Value::BigInt(i)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Timestamp(t)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(map: HashMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = Error;

    fn try_from(value: serde_json::Value) -> Result<Value, Error> {
        match value {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int64(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float64(f))
                } else {
                    Err(Error::TypeConversionFailed {
                        src: "serde_json::Number".to_string(),
                        dst: "Value".to_string(),
                    })
                }
            }
            serde_json::Value::String(s) => Ok(Value::String(s)),
            serde_json::Value::Array(a) => Ok(Value::List(
                a.into_iter()
                    .map(Value::try_from)
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            serde_json::Value::Object(m) => Ok(Value::Map(
                m.into_iter()
                    .map(|(k, v)| Ok((k, Value::try_from(v)?)))
                    .collect::<Result<HashMap<String, Value>, Error>>()?,
            )),
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(value: Value) -> Result<bool, Self::Error> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(Error::TypeConversionFailed {
                src: format!("{:?}", other),
                dst: "bool".to_string(),
            }),
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<i64, Self::Error> {
        match value {
            Value::Int64(i) => Ok(i),
            other => Err(Error::TypeConversionFailed {
                src: format!("{:?}", other),
                dst: "i64".to_string(),
            }),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<f64, Self::Error> {
        match value {
            Value::Int64(i) => Ok(i as f64),
            Value::Float64(f) => Ok(f),
            other => Err(Error::TypeConversionFailed {
                src: format!("{:?}", other),
                dst: "f64".to_string(),
            }),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<String, Self::Error> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(Error::TypeConversionFailed {
                src: format!("{:?}", other),
                dst: "String".to_string(),
            }),
        }
    }
}

impl Value {
    /// Renders this value as JSON for a pull projection's output (section 4.E). Types with no
    /// native JSON representation are rendered as strings: a wide integer as its decimal digits
    /// (JSON numbers cannot carry 128-bit precision), a calendar date as its ISO-8601 form, and a
    /// timestamp as RFC 3339.
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int64(i) => serde_json::Value::from(i),
            Value::Float64(f) => {
                serde_json::Number::from_f64(f).map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
            Value::String(s) => serde_json::Value::String(s),
            Value::BigInt(i) => serde_json::Value::String(i.to_string()),
            Value::Date(d) => serde_json::Value::String(d.to_string()),
            Value::Timestamp(t) => serde_json::Value::String(t.to_rfc3339()),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Value::into_json).collect())
            }
            Value::Map(m) => serde_json::Value::Object(
                m.into_iter().map(|(k, v)| (k, v.into_json())).collect(),
            ),
            Value::Node(n) => serde_json::json!({
                "id": n.id,
                "labels": n.labels,
                "props": n.props.into_iter().map(|(k, v)| (k, v.into_json())).collect::<serde_json::Map<_, _>>(),
            }),
            Value::Relationship(r) => serde_json::json!({
                "id": r.id,
                "type": r.rel_type,
                "startId": r.start_id,
                "endId": r.end_id,
                "props": r.props.into_iter().map(|(k, v)| (k, v.into_json())).collect::<serde_json::Map<_, _>>(),
            }),
            Value::Path(p) => serde_json::json!({
                "nodes": p.nodes.into_iter().map(|n| Value::Node(n).into_json()).collect::<Vec<_>>(),
                "relationships": p.relationships.into_iter().map(|r| Value::Relationship(r).into_json()).collect::<Vec<_>>(),
            }),
        }
    }
}

impl TryFrom<Value> for HashMap<String, Value> {
    type Error = Error;

    fn try_from(value: Value) -> Result<HashMap<String, Value>, Self::Error> {
        match value {
            Value::Map(m) => Ok(m),
            other => Err(Error::TypeConversionFailed {
                src: format!("{:?}", other),
                dst: "Map".to_string(),
            }),
        }
    }
}
