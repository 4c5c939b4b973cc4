//! Declarative HTTP client engine.
//!
//! # Overview
//! An endpoint interface describes a remote HTTP API as data: a host, a root
//! path and a set of named operations, each with a verb, a sub-path and the
//! role of every positional argument. The engine turns a call
//! `invoke(operation, args)` into a concrete HTTP request, runs it over a
//! pooled per-endpoint transport, and turns the response into an `Outcome`
//! or an `InvocationError`.
//!
//! # Design
//! - `Client` owns every cache (descriptors, dispatchers, transports,
//!   sessions) and ends their life in `shutdown`.
//! - A call flows through the request chain, an execution strategy (sync
//!   on the caller's thread, or async on the worker pool), and the response
//!   chain.
//! - Captured response headers come back in `Outcome::captured` instead of
//!   being written into caller-owned arguments.

pub mod args;
pub mod cache;
pub mod client;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod executor;
pub mod http;
pub mod parser;
pub mod request;
pub mod response;
pub mod session;
pub mod transport;
pub mod validator;

pub use args::{Arg, ArgType};
pub use client::{Client, ShutdownReport};
pub use config::{ClientConfig, TransportConfig};
pub use descriptor::{
    Endpoint, EndpointDef, EndpointInterface, EndpointTag, Operation, OperationDef, ParserKind,
    ReturnType, Role, RoleKind,
};
pub use dispatch::Dispatcher;
pub use entity::Entity;
pub use error::{
    CallSite, DescriptorError, DescriptorProblem, ExecutionError, InvocationError, InvocationFailed,
    ParserError, RequestBuildError,
};
pub use executor::Callback;
pub use http::{Headers, Verb};
pub use parser::{Parser, Payload, PayloadKind};
pub use request::{RequestBuilder, RequestChain, RequestStep};
pub use response::Outcome;
pub use transport::TransportConfigurator;
