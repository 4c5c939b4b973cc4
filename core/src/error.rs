//! Error taxonomy for the invocation engine.
//!
//! # Design
//! Each pipeline stage owns one error type: descriptor resolution
//! (`DescriptorError`), request building (`RequestBuildError`), transport
//! execution (`ExecutionError`), status classification (`InvocationFailed`)
//! and body parsing (`ParserError`). `InvocationError` is the only type an
//! application sees; every variant names the endpoint and operation involved.

use std::fmt;

use crate::http::Headers;

/// Where a failure happened: `Endpoint.operation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub endpoint: String,
    pub operation: String,
}

impl CallSite {
    pub fn new(endpoint: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            operation: operation.into(),
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.endpoint, self.operation)
    }
}

/// One structural problem found while resolving an endpoint definition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorProblem {
    /// The interface carries no endpoint tag at all.
    #[error("missing endpoint tag")]
    MissingEndpointTag,

    /// Neither the host field nor the URL shorthand yields a host.
    #[error("missing host")]
    MissingHost,

    /// The `scheme://host[:port]/path` shorthand could not be parsed.
    #[error("invalid endpoint url {0:?}")]
    InvalidUrl(String),

    /// The named operation declares no HTTP verb.
    #[error("operation {0} has no verb tag")]
    OperationMissingVerbTag(String),

    #[error("operation {0} is declared more than once")]
    DuplicateOperation(String),

    /// Role indices of the named operation are not exactly `0..n`.
    #[error("operation {0} has duplicate or out-of-range role indices")]
    InvalidRoleIndex(String),
}

/// Resolution failure for an endpoint. Cached permanently once raised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("endpoint {endpoint} is invalid: {}", join_problems(.problems))]
pub struct DescriptorError {
    pub endpoint: String,
    pub problems: Vec<DescriptorProblem>,
}

impl DescriptorError {
    pub fn has(&self, problem: &DescriptorProblem) -> bool {
        self.problems.contains(problem)
    }
}

fn join_problems(problems: &[DescriptorProblem]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Raised by the request chain, always before any I/O.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestBuildError {
    #[error("no argument fills placeholder :{0}")]
    UnresolvedPlaceholder(String),

    #[error("body verb declares no body or form argument")]
    MissingEntity,

    #[error("more than one body argument declared")]
    MultipleEntity,

    #[error("cannot send a value of type {type_name} as a request body")]
    EntityResolutionFailed { type_name: String },

    #[error("argument {index}: expected {expected}, found {found}")]
    ParamTypeError {
        index: usize,
        expected: String,
        found: String,
    },

    #[error("expected {expected} arguments, found {found}")]
    ArityMismatch { expected: usize, found: usize },

    #[error("invalid request uri {0:?}")]
    InvalidUri(String),
}

/// Transport-level failure while sending the request or reading the response.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("transport error: {0}")]
    Transport(#[from] ureq::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// The endpoint's transport handle was released by shutdown or replacement.
    #[error("transport closed")]
    TransportClosed,
}

/// A response outside 2xx. Carries the drained response.
#[derive(Debug, Clone, thiserror::Error)]
#[error("HTTP {status}")]
pub struct InvocationFailed {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl InvocationFailed {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Parser resolution or body decoding failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParserError {
    #[error("no parser resolvable for return type {0}")]
    ParserUndefined(String),

    #[error("parser {parser} produces {output}, not assignable to {declared}")]
    ParserNotAssignable {
        parser: String,
        output: String,
        declared: String,
    },

    #[error("parser {parser} failed: {message}")]
    Parse { parser: String, message: String },
}

/// The application-facing error of every call.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// The endpoint's transport could not be set up.
    #[error("endpoint {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: ExecutionError,
    },

    #[error("{site}: {source}")]
    RequestBuild {
        site: CallSite,
        #[source]
        source: RequestBuildError,
    },

    #[error("{site}: {source}")]
    Execution {
        site: CallSite,
        #[source]
        source: ExecutionError,
    },

    #[error("{site}: {source}")]
    Failed {
        site: CallSite,
        #[source]
        source: InvocationFailed,
    },

    #[error("{site}: {source}")]
    Parser {
        site: CallSite,
        #[source]
        source: ParserError,
    },

    #[error("{site}: no such operation")]
    UnknownOperation { site: CallSite },

    /// The async worker pool no longer accepts work.
    #[error("{site}: async pool is shut down")]
    Rejected { site: CallSite },

    #[error("client is shut down")]
    ShutDown,
}

impl InvocationError {
    pub fn site(&self) -> Option<&CallSite> {
        match self {
            InvocationError::RequestBuild { site, .. }
            | InvocationError::Execution { site, .. }
            | InvocationError::Failed { site, .. }
            | InvocationError::Parser { site, .. }
            | InvocationError::UnknownOperation { site }
            | InvocationError::Rejected { site } => Some(site),
            InvocationError::Descriptor(_)
            | InvocationError::Transport { .. }
            | InvocationError::ShutDown => None,
        }
    }

    /// The non-2xx response, if this is a status failure.
    pub fn failed_response(&self) -> Option<&InvocationFailed> {
        match self {
            InvocationError::Failed { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn request_build(&self) -> Option<&RequestBuildError> {
        match self {
            InvocationError::RequestBuild { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn parser(&self) -> Option<&ParserError> {
        match self {
            InvocationError::Parser { source, .. } => Some(source),
            _ => None,
        }
    }
}
