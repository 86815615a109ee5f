use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Opaque serialized value as held by the backing store.
///
/// The cache never interprets these bytes beyond the codec below: values are
/// encoded to `MsgPack` via `rmp-serde` on save and decoded on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageValue {
    /// Raw bytes of the encoded value.
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl StorageValue {
    /// Encodes `value` into its stored representation.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be represented in `MsgPack`.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<Self> {
        let data = rmp_serde::to_vec(value)?;
        Ok(Self { data })
    }

    /// Decodes the stored bytes into `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid encoding of `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(rmp_serde::from_slice(&self.data)?)
    }

    /// Reads the stored value as a number, if it is one.
    ///
    /// Used by ordered partitions, whose entries sort by numeric value.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        rmp_serde::from_slice::<f64>(&self.data).ok()
    }
}

/// Generic runtime value type for cached entries.
///
/// Supports all JSON-compatible types plus binary data. Serialized untagged,
/// so `Value::Int(5)` and a plain `5_i64` share the same stored encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// JSON null.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON integer (signed 64-bit).
    Int(i64),
    /// JSON floating-point (64-bit IEEE 754).
    Float(f64),
    /// JSON string (UTF-8).
    String(String),
    /// JSON array (ordered sequence of values).
    Array(Vec<Value>),
    /// Binary data (not directly representable in JSON).
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    /// JSON object. `BTreeMap` keeps encoding order deterministic.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Short name of the variant, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Bytes(_) => "bytes",
            Self::Map(_) => "map",
        }
    }

    /// Whether the value is an integer or a float.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(fields) => Self::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect(),
            ),
        }
    }
}
