//! Request entities and the resolver that produces them from arguments.
//!
//! # Design
//! `Entity` is the closed set of body kinds the transport knows how to send.
//! Resolution goes by runtime type in a fixed priority order: an argument that
//! is already an entity, then bytes, file, stream, text, and finally any
//! serializable value, which is buffered as JSON so its length is known and
//! the body can be replayed.
//!
//! The request chain first `classify`s the body argument, which can fail
//! without consuming anything, and only materializes the entity with
//! `resolve` once every step has succeeded.

use std::fmt;
use std::fs::File;
use std::io::Read;

use crate::args::Arg;
use crate::error::RequestBuildError;

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
pub const APPLICATION_JSON: &str = "application/json";
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// A request body.
pub enum Entity {
    Bytes(Vec<u8>),
    File(File),
    Stream(Box<dyn Read + Send>),
    Text(String),
    /// A fully buffered body with an explicit content type.
    Buffered { data: Vec<u8>, content_type: String },
}

impl Entity {
    pub fn json(value: &serde_json::Value) -> Result<Entity, RequestBuildError> {
        let data = serde_json::to_vec(value).map_err(|_| RequestBuildError::EntityResolutionFailed {
            type_name: "json".to_string(),
        })?;
        Ok(Entity::Buffered {
            data,
            content_type: APPLICATION_JSON.to_string(),
        })
    }

    pub fn form(encoded: String) -> Entity {
        Entity::Buffered {
            data: encoded.into_bytes(),
            content_type: FORM_URLENCODED.to_string(),
        }
    }

    pub fn content_type(&self) -> &str {
        match self {
            Entity::Bytes(_) | Entity::File(_) | Entity::Stream(_) => OCTET_STREAM,
            Entity::Text(_) => TEXT_PLAIN,
            Entity::Buffered { content_type, .. } => content_type.as_str(),
        }
    }

    /// Length when known up front.
    pub fn len(&self) -> Option<u64> {
        match self {
            Entity::Bytes(b) => Some(b.len() as u64),
            Entity::Text(s) => Some(s.len() as u64),
            Entity::Buffered { data, .. } => Some(data.len() as u64),
            Entity::File(f) => f.metadata().ok().map(|m| m.len()),
            Entity::Stream(_) => None,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Bytes(_) => EntityKind::Bytes,
            Entity::File(_) => EntityKind::File,
            Entity::Stream(_) => EntityKind::Stream,
            Entity::Text(_) => EntityKind::Text,
            Entity::Buffered { .. } => EntityKind::Buffered,
        }
    }

    /// The body as bytes, if it is held in memory.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Entity::Bytes(b) => Some(b),
            Entity::Text(s) => Some(s.as_bytes()),
            Entity::Buffered { data, .. } => Some(data),
            Entity::File(_) | Entity::Stream(_) => None,
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("kind", &self.kind())
            .field("content_type", &self.content_type())
            .field("len", &self.len())
            .finish()
    }
}

/// Which entity an argument resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// The argument already is an entity.
    Wire,
    Bytes,
    File,
    Stream,
    Text,
    Buffered,
}

/// Decide which entity `arg` would become, without consuming it.
pub fn classify(arg: &Arg) -> Result<EntityKind, RequestBuildError> {
    let kind = match arg {
        Arg::Entity(_) => EntityKind::Wire,
        Arg::Bytes(_) => EntityKind::Bytes,
        Arg::File(_) => EntityKind::File,
        Arg::Stream(_) => EntityKind::Stream,
        Arg::Text(_) => EntityKind::Text,
        Arg::Json(_) | Arg::Int(_) | Arg::Float(_) | Arg::Bool(_) => EntityKind::Buffered,
        other => {
            return Err(RequestBuildError::EntityResolutionFailed {
                type_name: other.type_name().to_string(),
            })
        }
    };
    Ok(kind)
}

/// Turn `arg` into an entity, consuming it.
pub fn resolve(arg: Arg) -> Result<Entity, RequestBuildError> {
    classify(&arg)?;
    match arg {
        Arg::Entity(entity) => Ok(entity),
        Arg::Bytes(bytes) => Ok(Entity::Bytes(bytes)),
        Arg::File(file) => Ok(Entity::File(file)),
        Arg::Stream(stream) => stream
            .take()
            .map(Entity::Stream)
            .ok_or_else(|| RequestBuildError::EntityResolutionFailed {
                type_name: "consumed stream".to_string(),
            }),
        Arg::Text(text) => Ok(Entity::Text(text)),
        Arg::Json(value) => Entity::json(&value),
        Arg::Int(i) => Entity::json(&serde_json::Value::from(i)),
        Arg::Float(x) => Entity::json(&serde_json::Value::from(x)),
        Arg::Bool(b) => Entity::json(&serde_json::Value::from(b)),
        other => Err(RequestBuildError::EntityResolutionFailed {
            type_name: other.type_name().to_string(),
        }),
    }
}
