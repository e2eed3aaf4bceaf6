//! Query fragments and partition descriptors.
//!
//! The loader never builds query text itself. A [`Query`] is an opaque source
//! name plus a conjunction of [`Predicate`]s, and a [`PartitionDescriptor`]
//! narrows a base query down to one independently countable slice. Turning
//! either into a real remote request is the job of a
//! [`PartitionSource`](crate::source::PartitionSource).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A literal compared against a column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl ScalarValue {
    /// Numeric view of the value, `None` for strings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Int(v) => Some(*v as f64),
            ScalarValue::Float(v) => Some(*v),
            ScalarValue::Str(_) => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Int(v) => write!(f, "{}", v),
            ScalarValue::Float(v) => write!(f, "{}", v),
            ScalarValue::Str(v) => write!(f, "'{}'", v),
        }
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Float(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Str(v.to_string())
    }
}

/// A single row filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    /// `column == value`
    Eq { column: String, value: ScalarValue },
    /// `lower <= column < upper`
    Range {
        column: String,
        lower: f64,
        upper: f64,
    },
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        Predicate::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn range(column: impl Into<String>, lower: f64, upper: f64) -> Self {
        Predicate::Range {
            column: column.into(),
            lower,
            upper,
        }
    }

    /// Name of the column this predicate reads.
    pub fn column(&self) -> &str {
        match self {
            Predicate::Eq { column, .. } | Predicate::Range { column, .. } => column,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Eq { column, value } => write!(f, "{} = {}", column, value),
            Predicate::Range {
                column,
                lower,
                upper,
            } => write!(f, "{} <= {} < {}", lower, column, upper),
        }
    }
}

/// Base query: a named source narrowed by a conjunction of predicates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Query {
    pub source: String,
    #[serde(default)]
    pub filters: Vec<Predicate>,
}

impl Query {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            filters: Vec::new(),
        }
    }

    /// Adds a predicate to the conjunction.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)?;
        for (i, predicate) in self.filters.iter().enumerate() {
            let joiner = if i == 0 { " WHERE " } else { " AND " };
            write!(f, "{}{}", joiner, predicate)?;
        }
        Ok(())
    }
}

/// How a grouping or repartitioning column is split into partitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionScheme {
    /// One partition per listed value (`column == value`).
    Values(Vec<ScalarValue>),
    /// One partition per half-open range (`lower <= column < upper`).
    Ranges(Vec<(f64, f64)>),
}

impl PartitionScheme {
    pub(crate) fn predicates(&self, column: &str) -> Vec<Predicate> {
        match self {
            PartitionScheme::Values(values) => values
                .iter()
                .map(|value| Predicate::eq(column, value.clone()))
                .collect(),
            PartitionScheme::Ranges(ranges) => ranges
                .iter()
                .map(|&(lower, upper)| Predicate::range(column, lower, upper))
                .collect(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            PartitionScheme::Values(values) => values.len(),
            PartitionScheme::Ranges(ranges) => ranges.len(),
        }
    }
}

/// One independently queryable slice of the dataset.
///
/// Created once by the planner and read-only afterwards. The `ordinal` is the
/// partition's position in group-major plan order and stays stable across
/// epochs; it keys per-partition seed derivation.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionDescriptor {
    pub ordinal: usize,
    pub group: usize,
    pub query: Query,
    pub predicates: Vec<Predicate>,
}

impl PartitionDescriptor {
    /// All predicates a source must apply: base filters, then partition filters.
    pub fn all_predicates(&self) -> impl Iterator<Item = &Predicate> {
        self.query.filters.iter().chain(self.predicates.iter())
    }
}

impl fmt::Display for PartitionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} [{}", self.ordinal, self.query)?;
        for (i, predicate) in self.predicates.iter().enumerate() {
            let joiner = if i == 0 && self.query.filters.is_empty() {
                " WHERE "
            } else {
                " AND "
            };
            write!(f, "{}{}", joiner, predicate)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_descriptor_as_conjunction() {
        let descriptor = PartitionDescriptor {
            ordinal: 3,
            group: 1,
            query: Query::new("sensors").filter(Predicate::eq("site", "north")),
            predicates: vec![Predicate::range("day", 0.0, 7.0)],
        };
        assert_eq!(
            descriptor.to_string(),
            "#3 [sensors WHERE site = 'north' AND 0 <= day < 7]"
        );
        assert_eq!(descriptor.all_predicates().count(), 2);
    }

    #[test]
    fn scheme_deserializes_from_json() -> anyhow::Result<()> {
        let scheme: PartitionScheme = serde_json::from_str(r#"{"values": [1, 2.5, "a"]}"#)?;
        assert_eq!(
            scheme,
            PartitionScheme::Values(vec![
                ScalarValue::Int(1),
                ScalarValue::Float(2.5),
                ScalarValue::Str("a".into())
            ])
        );

        let ranges: PartitionScheme = serde_json::from_str(r#"{"ranges": [[0, 10], [10, 20]]}"#)?;
        assert_eq!(ranges.len(), 2);
        Ok(())
    }
}
