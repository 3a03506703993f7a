//! Tokens: immutable envelopes carrying one payload between actors.
//!
//! The payload itself is shared behind an `Arc`, so handing a token to the
//! next actor (or across the queue bridge) never copies the value. A token
//! is never "empty": every payload variant carries a concrete value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Payload type tag used by actor contracts for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadType {
    /// Wildcard: accepts or produces every type.
    Any,
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    List,
    Failure,
}

impl PayloadType {
    /// Whether a slot declared as `self` admits a value of type `other`.
    #[inline]
    pub fn admits(self, other: PayloadType) -> bool {
        self == PayloadType::Any || self == other
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PayloadType::Any => "any",
            PayloadType::Bool => "bool",
            PayloadType::Int => "int",
            PayloadType::Float => "float",
            PayloadType::Text => "text",
            PayloadType::Bytes => "bytes",
            PayloadType::List => "list",
            PayloadType::Failure => "failure",
        }
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error container wrapping data that failed somewhere in a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    /// The data that could not be processed.
    pub payload: Box<Payload>,
    pub message: String,
    /// Where it failed, e.g. `"ingest#transmit"`.
    pub origin: String,
    pub recorded_at: DateTime<Utc>,
}

impl Failure {
    pub fn new(payload: Payload, message: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            payload: Box::new(payload),
            message: message.into(),
            origin: origin.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// A concrete payload value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Payload>),
    Failure(Failure),
}

impl Payload {
    pub fn payload_type(&self) -> PayloadType {
        match self {
            Payload::Bool(_) => PayloadType::Bool,
            Payload::Int(_) => PayloadType::Int,
            Payload::Float(_) => PayloadType::Float,
            Payload::Text(_) => PayloadType::Text,
            Payload::Bytes(_) => PayloadType::Bytes,
            Payload::List(_) => PayloadType::List,
            Payload::Failure(_) => PayloadType::Failure,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Payload::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Payload::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Payload::Float(v) => Some(*v),
            Payload::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_failure(&self) -> Option<&Failure> {
        match self {
            Payload::Failure(f) => Some(f),
            _ => None,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Bool(v) => write!(f, "{}", v),
            Payload::Int(v) => write!(f, "{}", v),
            Payload::Float(v) => write!(f, "{}", v),
            Payload::Text(v) => f.write_str(v),
            Payload::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Payload::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Payload::Failure(fail) => write!(f, "failure at {}: {}", fail.origin, fail.message),
        }
    }
}

impl From<bool> for Payload {
    fn from(v: bool) -> Self {
        Payload::Bool(v)
    }
}

impl From<i64> for Payload {
    fn from(v: i64) -> Self {
        Payload::Int(v)
    }
}

impl From<f64> for Payload {
    fn from(v: f64) -> Self {
        Payload::Float(v)
    }
}

impl From<&str> for Payload {
    fn from(v: &str) -> Self {
        Payload::Text(v.to_string())
    }
}

impl From<String> for Payload {
    fn from(v: String) -> Self {
        Payload::Text(v)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Payload::Bytes(v)
    }
}

impl From<Failure> for Payload {
    fn from(v: Failure) -> Self {
        Payload::Failure(v)
    }
}

/// Immutable envelope around a shared payload plus its provenance chain.
#[derive(Debug, Clone)]
pub struct Token {
    payload: Arc<Payload>,
    /// Tree paths of the actors that emitted this payload, oldest first.
    provenance: Vec<Arc<str>>,
}

impl Token {
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            payload: Arc::new(payload.into()),
            provenance: Vec::new(),
        }
    }

    /// Wrap an already shared payload without copying it.
    pub fn from_shared(payload: Arc<Payload>) -> Self {
        Self {
            payload,
            provenance: Vec::new(),
        }
    }

    #[inline]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    #[inline]
    pub fn payload_type(&self) -> PayloadType {
        self.payload.payload_type()
    }

    /// A second handle to the same payload.
    pub fn shared_payload(&self) -> Arc<Payload> {
        Arc::clone(&self.payload)
    }

    pub fn provenance(&self) -> &[Arc<str>] {
        &self.provenance
    }

    /// Most recent emitter, if the token passed through the engine.
    pub fn origin(&self) -> Option<&str> {
        self.provenance.last().map(|s| s.as_ref())
    }

    /// New token carrying the same payload with `step` appended to provenance.
    pub fn stamped(&self, step: &str) -> Token {
        let mut provenance = self.provenance.clone();
        provenance.push(Arc::from(step));
        Token {
            payload: Arc::clone(&self.payload),
            provenance,
        }
    }

    /// New token with a different payload, inheriting this token's provenance.
    pub fn derive(&self, payload: impl Into<Payload>) -> Token {
        Token {
            payload: Arc::new(payload.into()),
            provenance: self.provenance.clone(),
        }
    }
}

impl PartialEq for Token {
    /// Tokens compare by payload only.
    fn eq(&self, other: &Self) -> bool {
        self.payload == other.payload
    }
}
