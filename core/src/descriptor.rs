//! Endpoint and operation descriptors.
//!
//! # Design
//! Two layers. The raw layer (`EndpointDef`, `EndpointTag`, `OperationDef`)
//! is what a front-end produces from whatever declarative syntax authors
//! use; every field is optional enough to express a broken definition. The
//! resolved layer (`Endpoint`, `Operation`) is produced once by the
//! validator, is immutable, and is shared behind `Arc` by every call.
//!
//! Raw definitions can be built in code or loaded from JSON.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::args::ArgType;
use crate::http::Verb;
use crate::transport::TransportConfigurator;

/// An operation interface: a type whose identity keys every cache.
pub trait EndpointInterface: 'static {
    fn definition() -> EndpointDef;
}

/// Body codec selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParserKind {
    String,
    Json,
    Object,
    Custom,
    #[default]
    Undefined,
}

/// Declared result type of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnType {
    #[default]
    Void,
    Text,
    Json,
    /// A named type deserialized from the body.
    Object(String),
    Bytes,
}

impl ReturnType {
    pub fn object(name: impl Into<String>) -> Self {
        ReturnType::Object(name.into())
    }
}

impl fmt::Display for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnType::Void => f.write_str("void"),
            ReturnType::Text => f.write_str("text"),
            ReturnType::Json => f.write_str("json"),
            ReturnType::Object(name) => f.write_str(name),
            ReturnType::Bytes => f.write_str("bytes"),
        }
    }
}

/// The semantic purpose of one argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    PathParam(String),
    QueryParam(String),
    FormParam(String),
    /// Sent as a request header, and captured from the response header of
    /// the same name.
    HeaderOut(String),
    Body,
    Callback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub index: usize,
    pub kind: RoleKind,
    #[serde(default, rename = "type")]
    pub ty: ArgType,
}

impl Role {
    pub fn new(index: usize, kind: RoleKind, ty: ArgType) -> Self {
        Self { index, kind, ty }
    }

    pub fn path(index: usize, name: &str) -> Self {
        Self::new(index, RoleKind::PathParam(name.to_string()), ArgType::Any)
    }

    pub fn query(index: usize, name: &str) -> Self {
        Self::new(index, RoleKind::QueryParam(name.to_string()), ArgType::Any)
    }

    pub fn form(index: usize, name: &str) -> Self {
        Self::new(index, RoleKind::FormParam(name.to_string()), ArgType::Any)
    }

    pub fn header(index: usize, name: &str) -> Self {
        Self::new(index, RoleKind::HeaderOut(name.to_string()), ArgType::Text)
    }

    pub fn body(index: usize) -> Self {
        Self::new(index, RoleKind::Body, ArgType::Entity)
    }

    pub fn callback(index: usize) -> Self {
        Self::new(index, RoleKind::Callback, ArgType::Callback)
    }

    pub fn typed(mut self, ty: ArgType) -> Self {
        self.ty = ty;
        self
    }
}

/// The endpoint tag of a raw definition.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointTag {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub root_path: String,
    /// `scheme://host[:port]/path`. Wins over the separate fields when
    /// non-empty.
    pub url: String,
    pub parser: ParserKind,
    pub custom_parser: Option<String>,
    #[serde(rename = "async")]
    pub asynchronous: bool,
    pub stateful: bool,
    #[serde(skip)]
    pub transport: Option<Arc<dyn TransportConfigurator>>,
}

impl Default for EndpointTag {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            host: String::new(),
            port: None,
            root_path: String::new(),
            url: String::new(),
            parser: ParserKind::Undefined,
            custom_parser: None,
            asynchronous: false,
            stateful: false,
            transport: None,
        }
    }
}

impl fmt::Debug for EndpointTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointTag")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("root_path", &self.root_path)
            .field("url", &self.url)
            .field("parser", &self.parser)
            .field("asynchronous", &self.asynchronous)
            .field("stateful", &self.stateful)
            .field("transport", &self.transport.is_some())
            .finish()
    }
}

impl EndpointTag {
    pub fn host(host: &str) -> Self {
        Self {
            host: host.to_string(),
            ..Self::default()
        }
    }

    pub fn url(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_root_path(mut self, path: &str) -> Self {
        self.root_path = path.to_string();
        self
    }

    pub fn with_parser(mut self, parser: ParserKind) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_custom_parser(mut self, name: &str) -> Self {
        self.custom_parser = Some(name.to_string());
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.asynchronous = true;
        self
    }

    pub fn stateful(mut self) -> Self {
        self.stateful = true;
        self
    }

    pub fn with_transport(mut self, configurator: Arc<dyn TransportConfigurator>) -> Self {
        self.transport = Some(configurator);
        self
    }
}

/// One raw operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationDef {
    pub name: String,
    pub verb: Option<Verb>,
    pub path: String,
    pub parser: ParserKind,
    pub custom_parser: Option<String>,
    #[serde(rename = "async")]
    pub asynchronous: Option<bool>,
    pub stateful: Option<bool>,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub roles: Vec<Role>,
    pub returns: ReturnType,
}

impl OperationDef {
    pub fn new(name: &str, verb: Option<Verb>, path: &str) -> Self {
        Self {
            name: name.to_string(),
            verb,
            path: path.to_string(),
            ..Self::default()
        }
    }

    pub fn get(name: &str, path: &str) -> Self {
        Self::new(name, Some(Verb::Get), path)
    }

    pub fn post(name: &str, path: &str) -> Self {
        Self::new(name, Some(Verb::Post), path)
    }

    pub fn put(name: &str, path: &str) -> Self {
        Self::new(name, Some(Verb::Put), path)
    }

    pub fn delete(name: &str, path: &str) -> Self {
        Self::new(name, Some(Verb::Delete), path)
    }

    pub fn role(mut self, role: Role) -> Self {
        self.roles.push(role);
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn query(mut self, name: &str, value: &str) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn returns(mut self, returns: ReturnType) -> Self {
        self.returns = returns;
        self
    }

    pub fn parser(mut self, parser: ParserKind) -> Self {
        self.parser = parser;
        self
    }

    pub fn custom_parser(mut self, name: &str) -> Self {
        self.custom_parser = Some(name.to_string());
        self
    }

    pub fn asynchronous(mut self, on: bool) -> Self {
        self.asynchronous = Some(on);
        self
    }

    pub fn stateful(mut self, on: bool) -> Self {
        self.stateful = Some(on);
        self
    }
}

/// A raw endpoint definition, as produced by a front-end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointDef {
    pub name: String,
    #[serde(default)]
    pub tag: Option<EndpointTag>,
    #[serde(default)]
    pub operations: Vec<OperationDef>,
}

impl EndpointDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn tag(mut self, tag: EndpointTag) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn operation(mut self, op: OperationDef) -> Self {
        self.operations.push(op);
        self
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// A resolved, validated endpoint.
#[derive(Clone)]
pub struct Endpoint {
    pub name: String,
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub root_path: String,
    pub parser: ParserKind,
    pub custom_parser: Option<String>,
    pub asynchronous: bool,
    pub stateful: bool,
    pub transport: Option<Arc<dyn TransportConfigurator>>,
    operations: HashMap<String, Arc<Operation>>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("base_url", &self.base_url())
            .field("operations", &self.operations.len())
            .finish()
    }
}

impl Endpoint {
    pub(crate) fn new(
        name: String,
        tag: ResolvedTag,
        operations: Vec<Operation>,
    ) -> Self {
        Self {
            name,
            scheme: tag.scheme,
            host: tag.host,
            port: tag.port,
            root_path: tag.root_path,
            parser: tag.parser,
            custom_parser: tag.custom_parser,
            asynchronous: tag.asynchronous,
            stateful: tag.stateful,
            transport: tag.transport,
            operations: operations
                .into_iter()
                .map(|op| (op.name.clone(), Arc::new(op)))
                .collect(),
        }
    }

    /// `scheme://host[:port]` followed by the root path, without a trailing
    /// slash.
    pub fn base_url(&self) -> String {
        let mut url = format!("{}://{}", self.scheme, self.host);
        if let Some(port) = self.port {
            url.push_str(&format!(":{port}"));
        }
        let root = self.root_path.trim_matches('/');
        if !root.is_empty() {
            url.push('/');
            url.push_str(root);
        }
        url
    }

    pub fn operation(&self, name: &str) -> Option<&Arc<Operation>> {
        self.operations.get(name)
    }

    pub fn operation_names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }
}

/// Endpoint-level settings after host resolution.
pub(crate) struct ResolvedTag {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub root_path: String,
    pub parser: ParserKind,
    pub custom_parser: Option<String>,
    pub asynchronous: bool,
    pub stateful: bool,
    pub transport: Option<Arc<dyn TransportConfigurator>>,
}

/// A resolved operation.
#[derive(Debug, Clone)]
pub struct Operation {
    pub endpoint: String,
    pub name: String,
    pub verb: Verb,
    pub path: String,
    pub parser: ParserKind,
    pub custom_parser: Option<String>,
    pub asynchronous: Option<bool>,
    pub stateful: Option<bool>,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    /// Sorted by index; index `i` is argument position `i`.
    pub roles: Vec<Role>,
    pub returns: ReturnType,
}

impl Operation {
    /// Async unless the operation opts out; otherwise inherits the endpoint.
    pub fn is_async(&self, endpoint: &Endpoint) -> bool {
        self.asynchronous.unwrap_or(endpoint.asynchronous)
    }

    pub fn is_stateful(&self, endpoint: &Endpoint) -> bool {
        self.stateful.unwrap_or(endpoint.stateful)
    }
}
