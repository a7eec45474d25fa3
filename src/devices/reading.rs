use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Measurement name to rounded value, kept in catalogue declaration order.
///
/// Serializes as a JSON object whose key order is the insertion order, which
/// keeps the persisted payload bytes deterministic for a given read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reading {
    measures: IndexMap<String, f64>,
}

impl Reading {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing an earlier one of the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.measures.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.measures.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.measures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measures.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.measures.keys().map(String::as_str).collect()
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.measures.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, value)?;
        }
        write!(f, "}}")
    }
}

/// Rounds half away from zero to `digits` decimal places.
pub fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    let rounded = (value * factor).round() / factor;
    if rounded.is_finite() {
        rounded
    } else {
        value
    }
}
