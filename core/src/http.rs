//! Wire-level HTTP types.
//!
//! # Design
//! Requests and responses are plain data owned by exactly one call. A
//! `WireRequest` is produced by the request chain and consumed by the
//! transport; a `WireResponse` is produced by the transport and consumed by
//! the response chain. The response body is a stream that is always drained,
//! either explicitly by the response chain or by `ResponseBody`'s `Drop`, so
//! the pooled connection is released on every outcome.

use std::fmt;
use std::io::{self, Read};

use serde::{Deserialize, Serialize};

use crate::entity::Entity;

/// HTTP verb of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Trace,
    Options,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Delete => "DELETE",
            Verb::Head => "HEAD",
            Verb::Trace => "TRACE",
            Verb::Options => "OPTIONS",
        }
    }

    /// Whether requests with this verb carry an entity.
    pub fn has_body(&self) -> bool {
        matches!(self, Verb::Post | Verb::Put)
    }

    pub fn parse(s: &str) -> Option<Verb> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Verb::Get),
            "POST" => Some(Verb::Post),
            "PUT" => Some(Verb::Put),
            "DELETE" => Some(Verb::Delete),
            "HEAD" => Some(Verb::Head),
            "TRACE" => Some(Verb::Trace),
            "OPTIONS" => Some(Verb::Options),
            _ => None,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered header multimap with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).next()
    }

    pub fn get_all<'a: 'n, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> + 'n {
        self.0
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[(String, String)] {
        &self.0
    }
}

impl From<Vec<(String, String)>> for Headers {
    fn from(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Headers {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// The concrete HTTP request of one call. Built once, never reused.
#[derive(Debug)]
pub struct WireRequest {
    pub verb: Verb,
    pub uri: String,
    pub headers: Headers,
    pub body: Option<Entity>,
}

/// Raw response body, drained on drop if nobody consumed it.
pub struct ResponseBody {
    reader: Option<Box<dyn Read>>,
}

impl ResponseBody {
    pub fn new(reader: impl Read + 'static) -> Self {
        Self {
            reader: Some(Box::new(reader)),
        }
    }

    pub fn empty() -> Self {
        Self { reader: None }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::new(io::Cursor::new(bytes))
    }

    /// Read the whole body. Subsequent reads yield nothing.
    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut reader) = self.reader.take() {
            reader.read_to_end(&mut buf)?;
        }
        Ok(buf)
    }

    /// Read and discard whatever is left.
    pub fn drain(&mut self) -> io::Result<u64> {
        match self.reader.take() {
            Some(mut reader) => io::copy(&mut reader, &mut io::sink()),
            None => Ok(0),
        }
    }

    pub fn is_consumed(&self) -> bool {
        self.reader.is_none()
    }
}

impl Drop for ResponseBody {
    fn drop(&mut self) {
        if let Err(e) = self.drain() {
            tracing::debug!("failed to drain response body: {e}");
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

/// The concrete HTTP response of one call.
#[derive(Debug)]
pub struct WireResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: ResponseBody,
}

impl WireResponse {
    pub fn is_success(&self) -> bool {
        is_success(self.status)
    }
}

/// 2xx is success; everything else is a failure.
pub fn is_success(status: u16) -> bool {
    (200..=299).contains(&status)
}
