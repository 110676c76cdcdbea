//! CBOR plumbing for CTAP messages
//!
//! CTAP request and response maps use small integer keys and require
//! canonical encoding: keys sorted by their encoded bytes, which puts
//! positive keys (ascending) before negative keys (ascending absolute
//! value). Browsers reject COSE keys and response maps that break this
//! ordering, so [`MapBuilder`] emits it directly.

use crate::status::{Result, StatusCode};

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Dynamically-typed CBOR value, used where a map mixes value types.
pub type Value = cbor4ii::core::Value;

/// Encode a value to CBOR bytes.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    cbor4ii::serde::to_vec(Vec::new(), value).map_err(|_| StatusCode::InvalidCbor)
}

/// Decode CBOR bytes into a typed value.
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T> {
    cbor4ii::serde::from_slice(data).map_err(|_| StatusCode::InvalidCbor)
}

/// Re-interpret a dynamic [`Value`] as a typed value.
pub fn from_value<T: for<'de> Deserialize<'de>>(value: &Value) -> Result<T> {
    decode(&encode(value)?)
}

/// Canonical CBOR ordering for integer map keys.
fn canonical_cmp(a: i32, b: i32) -> Ordering {
    match (a >= 0, b >= 0) {
        (true, true) => a.cmp(&b),
        (false, false) => b.cmp(&a),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
    }
}

/// Append the canonical CBOR encoding of an integer (major type 0/1).
fn push_int(out: &mut Vec<u8>, value: i32) {
    let (major, magnitude) = if value >= 0 {
        (0x00u8, value as u32)
    } else {
        (0x20u8, (-(value as i64) - 1) as u32)
    };
    match magnitude {
        0..=23 => out.push(major | magnitude as u8),
        24..=0xFF => out.extend_from_slice(&[major | 0x18, magnitude as u8]),
        0x100..=0xFFFF => {
            out.push(major | 0x19);
            out.extend_from_slice(&(magnitude as u16).to_be_bytes());
        }
        _ => {
            out.push(major | 0x1A);
            out.extend_from_slice(&magnitude.to_be_bytes());
        }
    }
}

/// Builder for CTAP maps with integer keys, emitted in canonical order.
#[derive(Default)]
pub struct MapBuilder {
    entries: Vec<(i32, Vec<u8>)>,
}

impl MapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a serializable value under an integer key.
    pub fn insert<T: Serialize>(mut self, key: i32, value: T) -> Result<Self> {
        let encoded = encode(&value)?;
        self.entries.push((key, encoded));
        Ok(self)
    }

    /// Insert only if the value is present.
    pub fn insert_opt<T: Serialize>(self, key: i32, value: Option<T>) -> Result<Self> {
        match value {
            Some(v) => self.insert(key, v),
            None => Ok(self),
        }
    }

    /// Insert raw bytes as a CBOR byte string.
    pub fn insert_bytes(mut self, key: i32, bytes: &[u8]) -> Result<Self> {
        let encoded = encode(&serde_bytes::Bytes::new(bytes))?;
        self.entries.push((key, encoded));
        Ok(self)
    }

    /// Encode the map. At most 23 entries, which covers every CTAP message.
    pub fn build(mut self) -> Result<Vec<u8>> {
        if self.entries.len() > 23 {
            return Err(StatusCode::InvalidCbor);
        }
        self.entries.sort_by(|(a, _), (b, _)| canonical_cmp(*a, *b));

        let mut out = Vec::new();
        out.push(0xA0 | self.entries.len() as u8);
        for (key, value) in self.entries {
            push_int(&mut out, key);
            out.extend_from_slice(&value);
        }
        Ok(out)
    }

    /// Encode the map and re-read it as a dynamic [`Value`], for nesting.
    pub fn build_value(self) -> Result<Value> {
        decode(&self.build()?)
    }
}

/// Reader for CTAP maps with integer keys.
#[derive(Debug)]
pub struct MapParser {
    map: BTreeMap<i32, Vec<u8>>,
}

impl MapParser {
    /// Parse the top-level request map. Each value is kept as raw CBOR and
    /// decoded on demand.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let raw: BTreeMap<i32, Value> = decode(data)?;
        let mut map = BTreeMap::new();
        for (key, value) in raw {
            map.insert(key, encode(&value)?);
        }
        Ok(Self { map })
    }

    /// Required field; absence is `missing_parameter`.
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: i32) -> Result<T> {
        let bytes = self.map.get(&key).ok_or(StatusCode::MissingParameter)?;
        decode(bytes)
    }

    /// Optional field.
    pub fn get_opt<T: for<'de> Deserialize<'de>>(&self, key: i32) -> Result<Option<T>> {
        match self.map.get(&key) {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => Ok(None),
        }
    }

    /// Required byte-string field.
    pub fn get_bytes(&self, key: i32) -> Result<Vec<u8>> {
        let bytes = self.map.get(&key).ok_or(StatusCode::MissingParameter)?;
        let buf: serde_bytes::ByteBuf = decode(bytes)?;
        Ok(buf.into_vec())
    }

    /// Optional byte-string field.
    pub fn get_bytes_opt(&self, key: i32) -> Result<Option<Vec<u8>>> {
        match self.map.get(&key) {
            Some(bytes) => {
                let buf: serde_bytes::ByteBuf = decode(bytes)?;
                Ok(Some(buf.into_vec()))
            }
            None => Ok(None),
        }
    }

    pub fn contains_key(&self, key: i32) -> bool {
        self.map.contains_key(&key)
    }
}
