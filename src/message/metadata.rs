//! Tagged metadata values and the metadata map carried on every
//! [`crate::message::Message`].
//!
//! The value type is deliberately a closed sum over scalars and
//! homogeneous lists of scalars — no nested maps — matching the
//! constraint recorded in the original sources'
//! `multio::util::VariantHelpers` visitor pattern: metadata is meant
//! to stay flat so selectors and the wire codec don't need to recurse.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::MetadataError;

/// One value in a [`Metadata`] map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    List(Vec<MetadataValue>),
}

impl MetadataValue {
    fn type_name(&self) -> &'static str {
        match self {
            MetadataValue::Bool(_) => "bool",
            MetadataValue::Int(_) => "int",
            MetadataValue::Double(_) => "double",
            MetadataValue::String(_) => "string",
            MetadataValue::List(_) => "list",
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}
impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}
impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Double(v)
    }
}
impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::String(v)
    }
}
impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::String(v.to_string())
    }
}

/// A string-keyed map of tagged values, round-trippable through a
/// YAML textual form.
///
/// Ordering is a `BTreeMap` rather than insertion-order so that two
/// structurally equal metadata maps always serialize identically —
/// the Domain Registry's idempotent re-registration check and the
/// aggregation `fieldId` derivation both rely on that.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Metadata(BTreeMap<String, MetadataValue>);

impl Metadata {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Result<&MetadataValue, MetadataError> {
        self.0
            .get(key)
            .ok_or_else(|| MetadataError::KeyNotFound(key.to_string()))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, MetadataError> {
        match self.get(key)? {
            MetadataValue::Bool(b) => Ok(*b),
            other => Err(type_mismatch(key, "bool", other)),
        }
    }

    pub fn get_long(&self, key: &str) -> Result<i64, MetadataError> {
        match self.get(key)? {
            MetadataValue::Int(i) => Ok(*i),
            other => Err(type_mismatch(key, "int", other)),
        }
    }

    pub fn get_long_or(&self, key: &str, default: i64) -> Result<i64, MetadataError> {
        if !self.has(key) {
            return Ok(default);
        }
        self.get_long(key)
    }

    pub fn get_double(&self, key: &str) -> Result<f64, MetadataError> {
        match self.get(key)? {
            MetadataValue::Double(d) => Ok(*d),
            MetadataValue::Int(i) => Ok(*i as f64),
            other => Err(type_mismatch(key, "double", other)),
        }
    }

    pub fn get_string(&self, key: &str) -> Result<&str, MetadataError> {
        match self.get(key)? {
            MetadataValue::String(s) => Ok(s.as_str()),
            other => Err(type_mismatch(key, "string", other)),
        }
    }

    pub fn get_string_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str, MetadataError> {
        if !self.has(key) {
            return Ok(default);
        }
        self.get_string(key)
    }

    pub fn get_list(&self, key: &str) -> Result<&[MetadataValue], MetadataError> {
        match self.get(key)? {
            MetadataValue::List(items) => Ok(items.as_slice()),
            other => Err(type_mismatch(key, "list", other)),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }

    /// Serialize to the YAML-like textual form used by the
    /// configuration file and the wire codec's metadata segment.
    pub fn to_yaml(&self) -> Result<String, MetadataError> {
        serde_yaml::to_string(&self.0).map_err(|e| MetadataError::Parse(e.to_string()))
    }

    /// Inverse of [`Metadata::to_yaml`].
    pub fn from_yaml(text: &str) -> Result<Self, MetadataError> {
        let map: BTreeMap<String, MetadataValue> =
            serde_yaml::from_str(text).map_err(|e| MetadataError::Parse(e.to_string()))?;
        Ok(Self(map))
    }
}

fn type_mismatch(key: &str, expected: &'static str, actual: &MetadataValue) -> MetadataError {
    MetadataError::TypeMismatch {
        key: key.to_string(),
        expected,
        actual: actual.type_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_fails() {
        let md = Metadata::new();
        assert_eq!(
            md.get_long("step"),
            Err(MetadataError::KeyNotFound("step".to_string()))
        );
    }

    #[test]
    fn type_mismatch_fails() {
        let mut md = Metadata::new();
        md.set("step", 1i64);
        assert!(matches!(
            md.get_string("step"),
            Err(MetadataError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn round_trips_through_yaml() {
        let mut md = Metadata::new();
        md.set("param", "130".to_string());
        md.set("level", 1i64);
        md.set("global", true);
        md.set("factor", 0.5f64);
        md.set(
            "tags",
            MetadataValue::List(vec![MetadataValue::Int(1), MetadataValue::Int(2)]),
        );

        let text = md.to_yaml().unwrap();
        let back = Metadata::from_yaml(&text).unwrap();
        assert_eq!(md, back);
    }

    #[test]
    fn list_access() {
        let mut md = Metadata::new();
        md.set(
            "levels",
            MetadataValue::List(vec![MetadataValue::Int(1), MetadataValue::Int(2)]),
        );
        assert_eq!(md.get_list("levels").unwrap().len(), 2);
    }
}
