// src/types.rs

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Passthrough fields, keyed by source column name in source column order.
pub type ValueMap = IndexMap<String, Value>;

/// A tagged scalar from an input record. The tracker never inspects these;
/// they are carried through to the output sinks unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{}", v),
        }
    }
}

/// One raw input row: the frame index plus every source column.
/// The frame column stays in `values` so it echoes to the output like any
/// other passthrough field.
#[derive(Debug, Clone)]
pub struct Record {
    pub frame: i64,
    pub values: ValueMap,
}

/// One frame's derived measurement of a single observed object.
/// No persistent identity; consumed by the tracker and dropped.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Representative 2D position (reference landmark coordinate).
    pub position: (f64, f64),
    /// Body-length estimate: summed inter-landmark segment distances.
    /// Zero when too few valid landmarks were available.
    pub size: f64,
    /// Source fields, echoed verbatim downstream.
    pub original_values: ValueMap,
}

pub fn euclidean(a: (f64, f64), b: (f64, f64)) -> f64 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}
