//! CBOR helpers for CTAP2 requests and responses, built on `cbor4ii`
//!
//! Requests are integer-keyed maps that must be sent in CTAP2 canonical
//! order; [`MapBuilder`] sorts them. Responses are read through [`MapView`],
//! which looks values up by integer or text key without deserializing into
//! dedicated structs.

use crate::error::{Error, Result};

use std::cmp::Ordering;

pub type Value = cbor4ii::core::Value;

pub fn encode(value: &Value) -> Result<Vec<u8>> {
    cbor4ii::serde::to_vec(Vec::new(), value).map_err(|e| Error::Cbor(format!("{:?}", e)))
}

pub fn decode(data: &[u8]) -> Result<Value> {
    cbor4ii::serde::from_slice(data).map_err(|e| Error::Cbor(format!("{:?}", e)))
}

pub fn int(value: impl Into<i128>) -> Value {
    Value::Integer(value.into())
}

pub fn bytes(value: &[u8]) -> Value {
    Value::Bytes(value.to_vec())
}

pub fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

/// Text-keyed map, as used for rp/user entities and options
pub fn text_map<'a>(entries: impl IntoIterator<Item = (&'a str, Value)>) -> Value {
    let mut entries: Vec<(&str, Value)> = entries.into_iter().collect();
    // canonical: shorter keys first, then bytewise
    entries.sort_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    Value::Map(entries.into_iter().map(|(k, v)| (text(k), v)).collect())
}

/// Integer key ordered the way its CBOR encoding sorts
///
/// Unsigned keys (major type 0) precede negative keys (major type 1); among
/// negatives -1 encodes smallest.
fn canonical_cmp(a: i32, b: i32) -> Ordering {
    match (a >= 0, b >= 0) {
        (true, true) => a.cmp(&b),
        (false, false) => b.cmp(&a),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
    }
}

/// Integer-keyed request map
#[derive(Debug, Default, Clone)]
pub struct MapBuilder {
    entries: Vec<(i32, Value)>,
}

impl MapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, key: i32, value: Value) -> Self {
        self.entries.retain(|(k, _)| *k != key);
        self.entries.push((key, value));
        self
    }

    pub fn insert_opt(self, key: i32, value: Option<Value>) -> Self {
        match value {
            Some(value) => self.insert(key, value),
            None => self,
        }
    }

    pub fn build(mut self) -> Value {
        self.entries.sort_by(|(a, _), (b, _)| canonical_cmp(*a, *b));
        Value::Map(self.entries.into_iter().map(|(k, v)| (int(k), v)).collect())
    }

    pub fn encode(self) -> Result<Vec<u8>> {
        encode(&self.build())
    }
}

/// Read-only view of a decoded CBOR map
#[derive(Debug, Clone, Copy)]
pub struct MapView<'a> {
    entries: &'a [(Value, Value)],
}

impl<'a> MapView<'a> {
    pub fn new(value: &'a Value) -> Result<Self> {
        match value {
            Value::Map(entries) => Ok(Self { entries }),
            other => Err(Error::InvalidResponse(format!(
                "expected CBOR map, got {}",
                kind(other)
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a (Value, Value)> {
        self.entries.iter()
    }

    pub fn get(&self, key: i128) -> Option<&'a Value> {
        self.entries
            .iter()
            .find(|(k, _)| matches!(k, Value::Integer(i) if *i == key))
            .map(|(_, v)| v)
    }

    pub fn get_text_key(&self, key: &str) -> Option<&'a Value> {
        self.entries
            .iter()
            .find(|(k, _)| matches!(k, Value::Text(t) if t == key))
            .map(|(_, v)| v)
    }

    pub fn int(&self, key: i128) -> Option<i128> {
        match self.get(key)? {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn bytes(&self, key: i128) -> Option<&'a [u8]> {
        match self.get(key)? {
            Value::Bytes(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn text(&self, key: i128) -> Option<&'a str> {
        match self.get(key)? {
            Value::Text(t) => Some(t.as_str()),
            _ => None,
        }
    }

    pub fn bool(&self, key: i128) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn array(&self, key: i128) -> Option<&'a [Value]> {
        match self.get(key)? {
            Value::Array(a) => Some(a.as_slice()),
            _ => None,
        }
    }

    pub fn map(&self, key: i128) -> Option<MapView<'a>> {
        self.get(key).and_then(|v| MapView::new(v).ok())
    }

    pub fn text_value(&self, key: &str) -> Option<&'a str> {
        match self.get_text_key(key)? {
            Value::Text(t) => Some(t.as_str()),
            _ => None,
        }
    }

    pub fn bytes_value(&self, key: &str) -> Option<&'a [u8]> {
        match self.get_text_key(key)? {
            Value::Bytes(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn require_bytes(&self, key: i128, what: &str) -> Result<&'a [u8]> {
        self.bytes(key)
            .ok_or_else(|| Error::InvalidResponse(format!("missing {} (key {})", what, key)))
    }

    pub fn require_int(&self, key: i128, what: &str) -> Result<i128> {
        self.int(key)
            .ok_or_else(|| Error::InvalidResponse(format!("missing {} (key {})", what, key)))
    }

    pub fn require_map(&self, key: i128, what: &str) -> Result<MapView<'a>> {
        self.map(key)
            .ok_or_else(|| Error::InvalidResponse(format!("missing {} (key {})", what, key)))
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Integer(_) => "integer",
        Value::Bytes(_) => "bytes",
        Value::Text(_) => "text",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        _ => "other",
    }
}
