//! Query keys: ordered tuples that address cache slots.
//!
//! A key always starts with its resource namespace, e.g.
//! `["contacts", "list", {"filters": {...}, "pagination": {...}}]`.
//! Matching is prefix-based, so invalidating `["contacts"]` reaches every
//! key below it.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::warn;

/// One element of a [`QueryKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
  /// Plain string segment (namespace, discriminator, id)
  Str(String),
  /// Structured segment stored as canonical JSON (sorted object keys)
  Json(String),
}

impl KeyPart {
  /// Build a structured part from any serializable value.
  pub fn value<T: Serialize + ?Sized>(value: &T) -> Self {
    match serde_json::to_value(value) {
      Ok(Value::String(s)) => Self::Str(s),
      Ok(v) => Self::Json(canonical(v).to_string()),
      Err(e) => {
        warn!(error = %e, "unserializable query key part");
        Self::Json(Value::Null.to_string())
      }
    }
  }

  fn to_json(&self) -> Value {
    match self {
      Self::Str(s) => Value::String(s.clone()),
      Self::Json(raw) => serde_json::from_str(raw).unwrap_or(Value::Null),
    }
  }

  fn from_json(value: Value) -> Self {
    match value {
      Value::String(s) => Self::Str(s),
      other => Self::Json(canonical(other).to_string()),
    }
  }
}

impl From<&str> for KeyPart {
  fn from(s: &str) -> Self {
    Self::Str(s.to_string())
  }
}

impl From<String> for KeyPart {
  fn from(s: String) -> Self {
    Self::Str(s)
  }
}

/// Rebuild objects with sorted keys so equal structures print identically.
fn canonical(value: Value) -> Value {
  match value {
    Value::Object(map) => {
      let mut entries: Vec<(String, Value)> = map.into_iter().collect();
      entries.sort_by(|a, b| a.0.cmp(&b.0));
      let mut sorted = Map::new();
      for (k, v) in entries {
        sorted.insert(k, canonical(v));
      }
      Value::Object(sorted)
    }
    Value::Array(items) => Value::Array(items.into_iter().map(canonical).collect()),
    other => other,
  }
}

/// Ordered tuple identifying a cached query result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Vec<KeyPart>);

impl QueryKey {
  /// Key consisting of just a namespace.
  pub fn new(namespace: &str) -> Self {
    Self(vec![KeyPart::from(namespace)])
  }

  /// Append a string segment.
  pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
    self.0.push(part.into());
    self
  }

  /// Append a structured segment.
  pub fn with_value<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
    self.0.push(KeyPart::value(value));
    self
  }

  pub fn parts(&self) -> &[KeyPart] {
    &self.0
  }

  /// Leading namespace segment.
  pub fn namespace(&self) -> Option<&str> {
    match self.0.first() {
      Some(KeyPart::Str(s)) => Some(s),
      _ => None,
    }
  }

  /// True when every segment of `prefix` equals the segment at the same
  /// position in `self`.
  pub fn starts_with(&self, prefix: &QueryKey) -> bool {
    prefix.0.len() <= self.0.len() && self.0.iter().zip(&prefix.0).all(|(a, b)| a == b)
  }

  /// SHA-256 of the canonical JSON form, for fixed-length storage keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.to_string().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts: Vec<Value> = self.0.iter().map(KeyPart::to_json).collect();
    write!(f, "{}", Value::Array(parts))
  }
}

impl Serialize for QueryKey {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let parts: Vec<Value> = self.0.iter().map(KeyPart::to_json).collect();
    parts.serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for QueryKey {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let parts: Vec<Value> = Vec::deserialize(deserializer)?;
    if parts.is_empty() {
      return Err(D::Error::custom("query key must not be empty"));
    }
    Ok(Self(parts.into_iter().map(KeyPart::from_json).collect()))
  }
}
