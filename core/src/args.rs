//! Dynamic call arguments.
//!
//! An operation's arity and argument roles are only known at runtime, so
//! arguments travel as `Arg` values. `ArgType` is the declared type of a role
//! and is checked against the runtime value before the request chain runs.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::executor::Callback;

/// A single-use readable stream passed as an argument.
pub struct StreamArg(Mutex<Option<Box<dyn Read + Send>>>);

impl StreamArg {
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self(Mutex::new(Some(Box::new(reader))))
    }

    /// Take the reader. `None` if an earlier request already consumed it.
    pub fn take(&self) -> Option<Box<dyn Read + Send>> {
        self.0.lock().take()
    }
}

/// A call argument.
pub enum Arg {
    /// No value. Omitted from query, form and header assembly.
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    File(File),
    Stream(StreamArg),
    /// Any serializable value, already converted to a JSON tree.
    Json(serde_json::Value),
    /// A value that is already a wire entity.
    Entity(Entity),
    Callback(Arc<dyn Callback>),
    /// A value of a type the engine has no representation for.
    Opaque(&'static str),
}

impl Arg {
    /// Serialize any value into an argument. A value that fails to serialize
    /// becomes `Opaque` and is reported by whichever step consumes it.
    pub fn json<T: Serialize>(value: &T) -> Arg {
        match serde_json::to_value(value) {
            Ok(v) => Arg::Json(v),
            Err(e) => {
                tracing::debug!("argument of type {} is not serializable: {e}", std::any::type_name::<T>());
                Arg::Opaque(std::any::type_name::<T>())
            }
        }
    }

    pub fn stream(reader: impl Read + Send + 'static) -> Arg {
        Arg::Stream(StreamArg::new(reader))
    }

    pub fn callback(callback: impl Callback + 'static) -> Arg {
        Arg::Callback(Arc::new(callback))
    }

    pub fn opaque<T>() -> Arg {
        Arg::Opaque(std::any::type_name::<T>())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Arg::Null)
    }

    /// Runtime type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Arg::Null => "null",
            Arg::Text(_) => "text",
            Arg::Int(_) => "integer",
            Arg::Float(_) => "float",
            Arg::Bool(_) => "boolean",
            Arg::Bytes(_) => "bytes",
            Arg::File(_) => "file",
            Arg::Stream(_) => "stream",
            Arg::Json(_) => "json",
            Arg::Entity(_) => "entity",
            Arg::Callback(_) => "callback",
            Arg::Opaque(name) => *name,
        }
    }

    /// Textual form for URIs, query strings, forms and headers.
    ///
    /// `None` for values without a meaningful textual form, including JSON
    /// arrays and objects.
    pub fn stringify(&self) -> Option<String> {
        match self {
            Arg::Text(s) => Some(s.clone()),
            Arg::Int(i) => Some(i.to_string()),
            Arg::Float(f) => Some(f.to_string()),
            Arg::Bool(b) => Some(b.to_string()),
            Arg::Json(serde_json::Value::String(s)) => Some(s.clone()),
            Arg::Json(serde_json::Value::Number(n)) => Some(n.to_string()),
            Arg::Json(serde_json::Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Arg::Int(i) => f.debug_tuple("Int").field(i).finish(),
            Arg::Float(x) => f.debug_tuple("Float").field(x).finish(),
            Arg::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Arg::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Arg::Json(v) => f.debug_tuple("Json").field(v).finish(),
            other => f.write_str(other.type_name()),
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Text(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Text(s)
    }
}

impl From<i64> for Arg {
    fn from(i: i64) -> Self {
        Arg::Int(i)
    }
}

impl From<i32> for Arg {
    fn from(i: i32) -> Self {
        Arg::Int(i64::from(i))
    }
}

impl From<u32> for Arg {
    fn from(i: u32) -> Self {
        Arg::Int(i64::from(i))
    }
}

impl From<f64> for Arg {
    fn from(x: f64) -> Self {
        Arg::Float(x)
    }
}

impl From<bool> for Arg {
    fn from(b: bool) -> Self {
        Arg::Bool(b)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(b: Vec<u8>) -> Self {
        Arg::Bytes(b)
    }
}

impl From<File> for Arg {
    fn from(file: File) -> Self {
        Arg::File(file)
    }
}

impl From<serde_json::Value> for Arg {
    fn from(v: serde_json::Value) -> Self {
        Arg::Json(v)
    }
}

impl From<Entity> for Arg {
    fn from(e: Entity) -> Self {
        Arg::Entity(e)
    }
}

impl From<Arc<dyn Callback>> for Arg {
    fn from(cb: Arc<dyn Callback>) -> Self {
        Arg::Callback(cb)
    }
}

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Arg::Null)
    }
}

/// Declared type of a role's argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    #[default]
    Any,
    Text,
    Integer,
    Float,
    Boolean,
    Bytes,
    File,
    Stream,
    /// Anything serializable.
    Json,
    /// Anything the entity resolver accepts.
    Entity,
    Callback,
}

impl ArgType {
    /// Whether `arg` may be passed for a role of this type. `Null` always may.
    pub fn accepts(&self, arg: &Arg) -> bool {
        match (self, arg) {
            (_, Arg::Null) | (ArgType::Any, _) => true,
            (ArgType::Text, Arg::Text(_)) => true,
            (ArgType::Integer, Arg::Int(_)) => true,
            (ArgType::Float, Arg::Float(_) | Arg::Int(_)) => true,
            (ArgType::Boolean, Arg::Bool(_)) => true,
            (ArgType::Bytes, Arg::Bytes(_)) => true,
            (ArgType::File, Arg::File(_)) => true,
            (ArgType::Stream, Arg::Stream(_)) => true,
            (
                ArgType::Json,
                Arg::Json(_) | Arg::Text(_) | Arg::Int(_) | Arg::Float(_) | Arg::Bool(_),
            ) => true,
            (
                ArgType::Entity,
                Arg::Entity(_)
                | Arg::Bytes(_)
                | Arg::File(_)
                | Arg::Stream(_)
                | Arg::Text(_)
                | Arg::Json(_)
                | Arg::Int(_)
                | Arg::Float(_)
                | Arg::Bool(_),
            ) => true,
            (ArgType::Callback, Arg::Callback(_)) => true,
            _ => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ArgType::Any => "any",
            ArgType::Text => "text",
            ArgType::Integer => "integer",
            ArgType::Float => "float",
            ArgType::Boolean => "boolean",
            ArgType::Bytes => "bytes",
            ArgType::File => "file",
            ArgType::Stream => "stream",
            ArgType::Json => "json",
            ArgType::Entity => "entity",
            ArgType::Callback => "callback",
        }
    }
}
