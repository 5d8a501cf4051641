//! Typed key/value metadata attached to a download.
//!
//! Extras are a small schema-less side table: string keys mapping to one of
//! six primitive value kinds. The engine owns persistence; this module only
//! defines the value model. See [`crate::extras_accessor`] for the
//! asynchronous write operations.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single tagged extras value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ExtraValue {
    Bool(bool),
    String(String),
    Float(f32),
    Double(f64),
    Int(i32),
    Long(i64),
}

impl ExtraValue {
    /// NaN and infinities have no JSON form and cannot be stored.
    pub fn is_storable(&self) -> bool {
        match self {
            ExtraValue::Float(v) => v.is_finite(),
            ExtraValue::Double(v) => v.is_finite(),
            _ => true,
        }
    }
}

impl fmt::Display for ExtraValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtraValue::Bool(v) => write!(f, "{}", v),
            ExtraValue::String(v) => write!(f, "{}", v),
            ExtraValue::Float(v) => write!(f, "{}", v),
            ExtraValue::Double(v) => write!(f, "{}", v),
            ExtraValue::Int(v) => write!(f, "{}", v),
            ExtraValue::Long(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for ExtraValue {
    fn from(v: bool) -> Self {
        ExtraValue::Bool(v)
    }
}

impl From<String> for ExtraValue {
    fn from(v: String) -> Self {
        ExtraValue::String(v)
    }
}

impl From<&str> for ExtraValue {
    fn from(v: &str) -> Self {
        ExtraValue::String(v.to_string())
    }
}

impl From<f32> for ExtraValue {
    fn from(v: f32) -> Self {
        ExtraValue::Float(v)
    }
}

impl From<f64> for ExtraValue {
    fn from(v: f64) -> Self {
        ExtraValue::Double(v)
    }
}

impl From<i32> for ExtraValue {
    fn from(v: i32) -> Self {
        ExtraValue::Int(v)
    }
}

impl From<i64> for ExtraValue {
    fn from(v: i64) -> Self {
        ExtraValue::Long(v)
    }
}

/// Mapping from key to [`ExtraValue`]. Keys are unique; iteration order is unspecified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Extras {
    map: HashMap<String, ExtraValue>,
}

impl Extras {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Insert or overwrite a single key.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<ExtraValue>) -> &mut Self {
        self.map.insert(key.into(), value.into());
        self
    }

    pub fn put_bool(&mut self, key: impl Into<String>, value: bool) -> &mut Self {
        self.put(key, value)
    }

    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.put(key, ExtraValue::String(value.into()))
    }

    pub fn put_float(&mut self, key: impl Into<String>, value: f32) -> &mut Self {
        self.put(key, value)
    }

    pub fn put_double(&mut self, key: impl Into<String>, value: f64) -> &mut Self {
        self.put(key, value)
    }

    pub fn put_int(&mut self, key: impl Into<String>, value: i32) -> &mut Self {
        self.put(key, value)
    }

    pub fn put_long(&mut self, key: impl Into<String>, value: i64) -> &mut Self {
        self.put(key, value)
    }

    pub fn get(&self, key: &str) -> Option<&ExtraValue> {
        self.map.get(key)
    }

    /// Returns `default` when the key is missing or holds another kind.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.map.get(key) {
            Some(ExtraValue::Bool(v)) => *v,
            _ => default,
        }
    }

    pub fn get_string<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        match self.map.get(key) {
            Some(ExtraValue::String(v)) => v.as_str(),
            _ => default,
        }
    }

    pub fn get_float(&self, key: &str, default: f32) -> f32 {
        match self.map.get(key) {
            Some(ExtraValue::Float(v)) => *v,
            _ => default,
        }
    }

    pub fn get_double(&self, key: &str, default: f64) -> f64 {
        match self.map.get(key) {
            Some(ExtraValue::Double(v)) => *v,
            _ => default,
        }
    }

    pub fn get_int(&self, key: &str, default: i32) -> i32 {
        match self.map.get(key) {
            Some(ExtraValue::Int(v)) => *v,
            _ => default,
        }
    }

    pub fn get_long(&self, key: &str, default: i64) -> i64 {
        match self.map.get(key) {
            Some(ExtraValue::Long(v)) => *v,
            _ => default,
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<ExtraValue> {
        self.map.remove(key)
    }

    /// Per-key merge: keys present in `other` win.
    pub fn merge(&mut self, other: Extras) {
        self.map.extend(other.map);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ExtraValue)> {
        self.map.iter()
    }

    /// First key whose value is not [storable](ExtraValue::is_storable).
    pub fn unstorable_key(&self) -> Option<&str> {
        self.map
            .iter()
            .find(|(_, v)| !v.is_storable())
            .map(|(k, _)| k.as_str())
    }

    /// Flattened string view, e.g. for display or logging.
    pub fn to_string_map(&self) -> HashMap<String, String> {
        self.map
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl<K: Into<String>, V: Into<ExtraValue>> FromIterator<(K, V)> for Extras {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut extras = Extras::new();
        for (k, v) in iter {
            extras.put(k, v);
        }
        extras
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Extras {
        let mut extras = Extras::new();
        extras
            .put_bool("testBoolean", true)
            .put_string("testString", "test")
            .put_float("testFloat", f32::MIN_POSITIVE)
            .put_double("testDouble", f64::MIN_POSITIVE)
            .put_int("testInt", i32::MAX)
            .put_long("testLong", i64::MAX);
        extras
    }

    #[test]
    fn typed_getters_read_back_values() {
        let extras = sample();
        assert_eq!(extras.len(), 6);
        assert!(extras.get_bool("testBoolean", false));
        assert_eq!(extras.get_string("testString", ""), "test");
        assert_eq!(extras.get_int("testInt", 0), i32::MAX);
        assert_eq!(extras.get_long("testLong", 0), i64::MAX);
    }

    #[test]
    fn mismatched_kind_falls_back_to_default() {
        let extras = sample();
        assert_eq!(extras.get_int("testBoolean", -7), -7);
        assert!(!extras.get_bool("missing", false));
    }

    #[test]
    fn put_overwrites_existing_key() {
        let mut extras = sample();
        extras.put("testBoolean", "now a string");
        assert_eq!(extras.len(), 6);
        assert_eq!(extras.get_string("testBoolean", ""), "now a string");
    }

    #[test]
    fn merge_is_last_writer_wins_per_key() {
        let mut extras = sample();
        let update: Extras = [("testInt", ExtraValue::Int(1)), ("fresh", ExtraValue::Bool(true))]
            .into_iter()
            .collect();
        extras.merge(update);
        assert_eq!(extras.get_int("testInt", 0), 1);
        assert!(extras.get_bool("fresh", false));
        assert_eq!(extras.get_string("testString", ""), "test");
    }

    #[test]
    fn json_keeps_value_kinds() {
        let extras = sample();
        let json = extras.to_json().unwrap();
        let back = Extras::from_json(&json).unwrap();
        assert_eq!(back, extras);
        assert!(matches!(back.get("testLong"), Some(ExtraValue::Long(_))));
    }

    #[test]
    fn non_finite_numbers_are_unstorable() {
        assert_eq!(sample().unstorable_key(), None);
        assert!(!ExtraValue::Double(f64::NAN).is_storable());
        assert!(!ExtraValue::Float(f32::NEG_INFINITY).is_storable());

        let mut extras = sample();
        extras.put_double("ratio", f64::INFINITY);
        assert_eq!(extras.unstorable_key(), Some("ratio"));
    }

    #[test]
    fn string_map_flattens_values() {
        let mut extras = Extras::new();
        extras.put_bool("done", true).put_int("count", 3);
        let map = extras.to_string_map();
        assert_eq!(map.get("done").map(String::as_str), Some("true"));
        assert_eq!(map.get("count").map(String::as_str), Some("3"));
    }
}
