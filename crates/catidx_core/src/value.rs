//! Indexed attribute values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed interval with optional open ends.
///
/// `None` on either side means unbounded. Both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValueRange {
    /// Inclusive start, `None` for unbounded.
    pub from: Option<i64>,
    /// Inclusive end, `None` for unbounded.
    pub to: Option<i64>,
}

impl ValueRange {
    /// Creates a bounded range.
    #[must_use]
    pub const fn between(from: i64, to: i64) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    /// Creates a range without an end.
    #[must_use]
    pub const fn since(from: i64) -> Self {
        Self {
            from: Some(from),
            to: None,
        }
    }

    /// Creates a range without a start.
    #[must_use]
    pub const fn until(to: i64) -> Self {
        Self {
            from: None,
            to: Some(to),
        }
    }

    /// Creates a range covering every point.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            from: None,
            to: None,
        }
    }

    /// Returns true if `point` lies within the range.
    #[must_use]
    pub fn contains(&self, point: i64) -> bool {
        self.from.map_or(true, |from| from <= point) && self.to.map_or(true, |to| point <= to)
    }

    /// Returns true if the range ends strictly before `point`.
    #[must_use]
    pub fn ends_before(&self, point: i64) -> bool {
        self.to.map_or(false, |to| to < point)
    }

    /// Returns true if the range starts strictly after `point`.
    #[must_use]
    pub fn starts_after(&self, point: i64) -> bool {
        self.from.map_or(false, |from| from > point)
    }
}

impl fmt::Display for ValueRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.from {
            Some(from) => write!(f, "[{from},")?,
            None => write!(f, "[-inf,")?,
        }
        match self.to {
            Some(to) => write!(f, "{to}]"),
            None => write!(f, "+inf]"),
        }
    }
}

/// Kind of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// Boolean.
    Bool,
    /// Signed integer.
    Int,
    /// UTF-8 text.
    Text,
    /// Epoch milliseconds.
    DateTime,
    /// Interval.
    Range,
}

/// Value of an indexed attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttributeValue {
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Text value.
    Text(String),
    /// Timestamp in epoch milliseconds.
    DateTime(i64),
    /// Interval value.
    Range(ValueRange),
}

impl AttributeValue {
    /// Returns the kind of the value.
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            AttributeValue::Bool(_) => ValueKind::Bool,
            AttributeValue::Int(_) => ValueKind::Int,
            AttributeValue::Text(_) => ValueKind::Text,
            AttributeValue::DateTime(_) => ValueKind::DateTime,
            AttributeValue::Range(_) => ValueKind::Range,
        }
    }

    /// Returns the interval if this is a range value.
    #[must_use]
    pub const fn as_range(&self) -> Option<&ValueRange> {
        match self {
            AttributeValue::Range(range) => Some(range),
            _ => None,
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Int(i64::from(value))
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<ValueRange> for AttributeValue {
    fn from(value: ValueRange) -> Self {
        AttributeValue::Range(value)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bool(v) => write!(f, "{v}"),
            AttributeValue::Int(v) => write!(f, "{v}"),
            AttributeValue::Text(v) => write!(f, "{v:?}"),
            AttributeValue::DateTime(v) => write!(f, "@{v}"),
            AttributeValue::Range(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_predicates() {
        let range = ValueRange::between(10, 20);
        assert!(range.contains(10));
        assert!(range.contains(20));
        assert!(!range.contains(21));
        assert!(range.ends_before(21));
        assert!(!range.ends_before(20));
        assert!(range.starts_after(9));
        assert!(!range.starts_after(10));
    }

    #[test]
    fn unbounded_range_is_always_valid() {
        let range = ValueRange::unbounded();
        assert!(range.contains(i64::MIN));
        assert!(range.contains(i64::MAX));
        assert!(!range.ends_before(i64::MAX));
        assert!(!range.starts_after(i64::MIN));
    }

    #[test]
    fn value_kind() {
        assert_eq!(AttributeValue::from("red").kind(), ValueKind::Text);
        assert_eq!(AttributeValue::from(5).kind(), ValueKind::Int);
        assert_eq!(AttributeValue::from(ValueRange::since(1)).kind(), ValueKind::Range);
    }
}
