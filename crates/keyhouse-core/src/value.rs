//! Cached Value Model
//!
//! A stored value is either a single string or an ordered set of strings.
//! Every mutation that produced a value carries a logical commit time (LCT):
//! a 64-bit version number supplied by the writer. The cache applies
//! mutations under max-LCT semantics, so `Value` itself is version-free;
//! versioning state lives in the cache.

use serde::{Deserialize, Serialize};

/// A value held by the cache: a plain string or an ordered string set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Set(Vec<String>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Set(_) => None,
        }
    }

    pub fn as_set(&self) -> Option<&[String]> {
        match self {
            Value::String(_) => None,
            Value::Set(values) => Some(values),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<String>> for Value {
    fn from(values: Vec<String>) -> Self {
        Value::Set(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_accessors() {
        let v = Value::from("hello");
        assert_eq!(v.as_str(), Some("hello"));
        assert!(v.as_set().is_none());
    }

    #[test]
    fn test_set_accessors() {
        let v = Value::from(vec!["a".to_string(), "b".to_string()]);
        assert!(v.as_str().is_none());
        assert_eq!(v.as_set().unwrap().len(), 2);
    }

    #[test]
    fn test_untagged_serde() {
        let s: Value = serde_json::from_str(r#""plain""#).unwrap();
        assert_eq!(s, Value::from("plain"));
        let set: Value = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(set, Value::from(vec!["a".to_string(), "b".to_string()]));
    }
}
