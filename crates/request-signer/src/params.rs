use crate::{SignError, SignResult};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Flat, key-ordered request parameters.
///
/// Values are stored already stringified: strings verbatim, numbers in
/// decimal, booleans as `true`/`false`. Iteration is in byte order of the
/// keys, which is the order the canonical string uses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SignParams(BTreeMap<String, String>);

impl SignParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) -> Option<String> {
        self.0.insert(key.into(), value.to_string())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Convert any value that serializes to a flat JSON object.
    ///
    /// `null` fields are skipped; arrays and nested objects are rejected
    /// since they have no agreed string form on the server side.
    pub fn from_serializable<T: Serialize + ?Sized>(value: &T) -> SignResult<Self> {
        let value = serde_json::to_value(value).map_err(|e| SignError::Encoding(e.to_string()))?;
        match value {
            Value::Object(map) => Self::from_json_object(map),
            Value::Null => Ok(Self::new()),
            other => Err(SignError::NotAnObject(json_kind(&other))),
        }
    }

    fn from_json_object(map: Map<String, Value>) -> SignResult<Self> {
        let mut params = Self::new();
        for (key, value) in map {
            match value {
                Value::Null => {}
                Value::String(s) => {
                    params.0.insert(key, s);
                }
                Value::Bool(b) => {
                    params.0.insert(key, b.to_string());
                }
                Value::Number(n) => {
                    params.0.insert(key, n.to_string());
                }
                other => {
                    return Err(SignError::UnsupportedValue {
                        key,
                        kind: json_kind(&other),
                    })
                }
            }
        }
        Ok(params)
    }

    /// JSON object with every value as a string.
    pub fn to_json_object(&self) -> Map<String, Value> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for SignParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

impl<K: Into<String>, V: ToString> Extend<(K, V)> for SignParams {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}
