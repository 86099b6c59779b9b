use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;

use crate::error::DispatchError;

/// Values that can be bound as query parameters or returned in a result row.
///
/// ```rust
/// use sql_dispatcher::prelude::*;
///
/// let params = Params::new()
///     .bind("id", 1)
///     .bind("name", "alice")
///     .bind("active", true);
/// assert_eq!(params.get("id"), Some(&Value::Int(1)));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// NULL value
    Null,
    /// JSON value
    JSON(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
}

impl Value {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let Value::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let Value::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<&bool> {
        if let Value::Bool(value) = self {
            return Some(value);
        } else if let Some(i) = self.as_int() {
            if *i == 1 {
                return Some(&true);
            } else if *i == 0 {
                return Some(&false);
            }
        }
        None
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let Value::Timestamp(value) = self {
            return Some(*value);
        } else if let Some(s) = self.as_text() {
            // Try "YYYY-MM-DD HH:MM:SS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(dt);
            }
            // Try "YYYY-MM-DD HH:MM:SS.SSS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S.%3f") {
                return Some(dt);
            }
        }
        None
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let Value::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let Value::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::Timestamp(value)
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        Value::JSON(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Named query parameters.
///
/// Names are stored without a placeholder sigil: `$id`, `:id` and `@id` in query text all
/// bind the entry named `id`, and a bare positional `?` binds the entry named after its
/// 1-based index (`"1"`, `"2"`, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Add a binding, replacing any previous value under the same name.
    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Positional bindings named `"1"`, `"2"`, ... in order.
    #[must_use]
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self(
            values
                .into_iter()
                .enumerate()
                .map(|(i, v)| ((i + 1).to_string(), v.into()))
                .collect(),
        )
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Check parameter names before anything is dispatched.
    ///
    /// # Errors
    /// Returns `DispatchError::ParameterError` for an empty name or a name containing
    /// anything other than ASCII alphanumerics and `_`.
    pub fn validate(&self) -> Result<(), DispatchError> {
        for name in self.0.keys() {
            if name.is_empty() {
                return Err(DispatchError::ParameterError(
                    "parameter name must not be empty".into(),
                ));
            }
            if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(DispatchError::ParameterError(format!(
                    "invalid parameter name {name:?}"
                )));
            }
        }
        Ok(())
    }

    /// Resolve an engine placeholder (`$id`, `:id`, `@id`, `?3`) or a bare positional index.
    ///
    /// # Errors
    /// Returns `DispatchError::ParameterError` when no binding matches the placeholder.
    pub fn lookup(&self, placeholder: Option<&str>, position: usize) -> Result<&Value, DispatchError> {
        let key = match placeholder {
            Some(raw) => raw.trim_start_matches(['$', ':', '@', '?']).to_owned(),
            None => position.to_string(),
        };
        let key = if key.is_empty() { position.to_string() } else { key };
        self.0.get(&key).ok_or_else(|| {
            DispatchError::ParameterError(format!("missing value for parameter {key:?}"))
        })
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
