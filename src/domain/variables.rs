//! Typed variable values and their persisted form.
//!
//! A [`TypedValue`] keeps the runtime type it was written with, so that a
//! reader asking for the wrong type gets a [`TaskError::TypeMismatch`]
//! instead of a silent coercion. `Null` is compatible with every accessor.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TaskError;

/// A variable value together with its type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum TypedValue {
    /// Untyped null.
    Null,
    /// Text.
    String(String),
    /// Boolean.
    Boolean(bool),
    /// 32-bit integer.
    Integer(i32),
    /// 64-bit integer.
    Long(i64),
    /// Floating point.
    Double(f64),
    /// Instant.
    Date(DateTime<Utc>),
    /// Arbitrary JSON document.
    Json(Value),
}

/// Variables keyed by name.
pub type VariableMap = HashMap<String, TypedValue>;

impl TypedValue {
    /// Type label used in mismatch errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::String(_) => "string",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Long(_) => "long",
            Self::Double(_) => "double",
            Self::Date(_) => "date",
            Self::Json(_) => "json",
        }
    }

    /// Returns `true` for [`TypedValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Length checked against the configured maximum: characters for
    /// strings, serialized bytes for JSON, zero otherwise.
    pub fn checked_length(&self) -> usize {
        match self {
            Self::String(s) => s.chars().count(),
            Self::Json(v) => v.to_string().len(),
            _ => 0,
        }
    }

    fn mismatch(&self, name: &str, expected: &'static str) -> TaskError {
        TaskError::TypeMismatch {
            name: name.to_string(),
            expected,
            actual: self.type_name(),
        }
    }

    /// Reads a string value.
    pub fn as_str(&self, name: &str) -> Result<Option<&str>, TaskError> {
        match self {
            Self::Null => Ok(None),
            Self::String(s) => Ok(Some(s)),
            other => Err(other.mismatch(name, "string")),
        }
    }

    /// Reads a boolean value.
    pub fn as_bool(&self, name: &str) -> Result<Option<bool>, TaskError> {
        match self {
            Self::Null => Ok(None),
            Self::Boolean(b) => Ok(Some(*b)),
            other => Err(other.mismatch(name, "boolean")),
        }
    }

    /// Reads an integer or long value.
    pub fn as_i64(&self, name: &str) -> Result<Option<i64>, TaskError> {
        match self {
            Self::Null => Ok(None),
            Self::Integer(i) => Ok(Some(i64::from(*i))),
            Self::Long(l) => Ok(Some(*l)),
            other => Err(other.mismatch(name, "long")),
        }
    }

    /// Reads a double value.
    pub fn as_f64(&self, name: &str) -> Result<Option<f64>, TaskError> {
        match self {
            Self::Null => Ok(None),
            Self::Double(d) => Ok(Some(*d)),
            other => Err(other.mismatch(name, "double")),
        }
    }

    /// Reads a date value.
    pub fn as_date(&self, name: &str) -> Result<Option<DateTime<Utc>>, TaskError> {
        match self {
            Self::Null => Ok(None),
            Self::Date(d) => Ok(Some(*d)),
            other => Err(other.mismatch(name, "date")),
        }
    }

    /// Reads a JSON value.
    pub fn as_json(&self, name: &str) -> Result<Option<&Value>, TaskError> {
        match self {
            Self::Null => Ok(None),
            Self::Json(v) => Ok(Some(v)),
            other => Err(other.mismatch(name, "json")),
        }
    }

    /// Deserializes the value into `T`.
    ///
    /// Scalars are converted through their JSON form, so a `Long` can be
    /// read as any integer type that fits and a `Json` document as a
    /// matching struct.
    pub fn deserialize<T: DeserializeOwned>(&self, name: &str) -> Result<T, TaskError> {
        let json = match self {
            Self::Null => Value::Null,
            Self::String(s) => Value::String(s.clone()),
            Self::Boolean(b) => Value::Bool(*b),
            Self::Integer(i) => Value::from(*i),
            Self::Long(l) => Value::from(*l),
            Self::Double(d) => Value::from(*d),
            Self::Date(d) => Value::String(d.to_rfc3339()),
            Self::Json(v) => v.clone(),
        };
        serde_json::from_value(json).map_err(|_| TaskError::TypeMismatch {
            name: name.to_string(),
            expected: std::any::type_name::<T>(),
            actual: self.type_name(),
        })
    }
}

impl From<&str> for TypedValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for TypedValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for TypedValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i32> for TypedValue {
    fn from(value: i32) -> Self {
        Self::Integer(value)
    }
}

impl From<i64> for TypedValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<f64> for TypedValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<DateTime<Utc>> for TypedValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}

impl From<Value> for TypedValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            other => Self::Json(other),
        }
    }
}

impl<T: Into<TypedValue>> From<Option<T>> for TypedValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// A task-local variable row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableInstance {
    /// Owning task id.
    pub task_id: String,
    /// Variable name, unique within the task.
    pub name: String,
    /// The value.
    pub value: TypedValue,
    /// When the value was last written.
    pub last_write: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn accessors_accept_matching_types() {
        assert_eq!(TypedValue::from("a").as_str("v").unwrap(), Some("a"));
        assert_eq!(TypedValue::from(true).as_bool("v").unwrap(), Some(true));
        assert_eq!(TypedValue::from(3).as_i64("v").unwrap(), Some(3));
        assert_eq!(TypedValue::from(3_i64).as_i64("v").unwrap(), Some(3));
        assert_eq!(TypedValue::from(1.5).as_f64("v").unwrap(), Some(1.5));
        let date = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(TypedValue::from(date).as_date("v").unwrap(), Some(date));
        assert_eq!(
            TypedValue::from(json!({"a": 1})).as_json("v").unwrap(),
            Some(&json!({"a": 1}))
        );
    }

    #[test]
    fn null_reads_as_none_for_every_type() {
        let null = TypedValue::Null;
        assert_eq!(null.as_str("v").unwrap(), None);
        assert_eq!(null.as_i64("v").unwrap(), None);
        assert_eq!(null.as_date("v").unwrap(), None);
    }

    #[test]
    fn mismatch_names_both_types() {
        let err = TypedValue::from(12).as_str("amount").unwrap_err();
        match err {
            TaskError::TypeMismatch {
                name,
                expected,
                actual,
            } => {
                assert_eq!(name, "amount");
                assert_eq!(expected, "string");
                assert_eq!(actual, "integer");
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn checked_length_counts_chars_and_json_bytes() {
        assert_eq!(TypedValue::from("héllo").checked_length(), 5);
        assert_eq!(TypedValue::from(json!([1, 2])).checked_length(), 5);
        assert_eq!(TypedValue::from(i64::MAX).checked_length(), 0);
    }

    #[test]
    fn deserialize_into_struct() {
        #[derive(Debug, PartialEq, serde::Deserialize)]
        struct Invoice {
            amount: u32,
        }
        let value = TypedValue::from(json!({"amount": 10}));
        assert_eq!(
            value.deserialize::<Invoice>("inv").unwrap(),
            Invoice { amount: 10 }
        );
        assert!(TypedValue::from("x").deserialize::<Invoice>("inv").is_err());
    }

    #[test]
    fn serde_shape_is_tagged() {
        let json = serde_json::to_value(TypedValue::from(5)).unwrap();
        assert_eq!(json, json!({"type": "integer", "value": 5}));
    }
}
