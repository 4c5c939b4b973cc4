//! Execution strategies.
//!
//! # Design
//! `Executor` owns everything a call needs after its context is built: the
//! request chain, the transport and session directories, the parser
//! registry and the async worker pool. The request chain always runs on the
//! caller's thread, so a call that cannot be built fails synchronously in
//! both strategies. After that:
//!
//! - Sync runs transport and response chain on the caller's thread and
//!   returns the outcome.
//! - Async hands transport and response chain to the worker pool and
//!   returns `None` at once. The outcome goes to the first `Callback`
//!   argument, or to the log if there is none.

pub mod pool;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::config::ClientConfig;
use crate::context::InvocationContext;
use crate::error::{ExecutionError, InvocationError};
use crate::parser::ParserRegistry;
use crate::request::{PreparedRequest, RequestChain};
use crate::response::{Outcome, ResponseChain};
use crate::session::SessionDirectory;
use crate::transport::TransportDirectory;

pub use pool::{PoolReport, SubmitError, WorkerPool};

/// Receives the result of an asynchronous call.
///
/// Exactly one hook fires per call, on a worker thread. A panic inside a
/// hook is caught and logged.
pub trait Callback: Send + Sync {
    fn on_success(&self, _outcome: Outcome) {}

    /// The server answered outside 2xx.
    fn on_failure(&self, _error: InvocationError) {}

    /// Transport, parser or any other failure.
    fn on_error(&self, _error: InvocationError) {}
}

pub struct Executor {
    pub(crate) requests: RequestChain,
    pub(crate) transports: TransportDirectory,
    pub(crate) sessions: SessionDirectory,
    pub(crate) parsers: ParserRegistry,
    pub(crate) pool: WorkerPool,
}

impl Executor {
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_chain(config, RequestChain::default())
    }

    pub fn with_chain(config: &ClientConfig, requests: RequestChain) -> Self {
        Self {
            requests,
            transports: TransportDirectory::new(config.transport.clone()),
            sessions: SessionDirectory::new(),
            parsers: ParserRegistry::new(),
            pool: WorkerPool::new(config.max_workers, config.worker_idle()),
        }
    }

    /// Build the request, then run it with the strategy the operation
    /// selects. `Ok(None)` means the call went to the worker pool.
    pub fn execute(self: &Arc<Self>, mut ctx: InvocationContext) -> Result<Option<Outcome>, InvocationError> {
        let prepared = self
            .requests
            .build(&mut ctx)
            .map_err(|source| InvocationError::RequestBuild { site: ctx.site(), source })?;

        if ctx.is_async() {
            self.submit(ctx, prepared)?;
            Ok(None)
        } else {
            self.run(&ctx, prepared).map(Some)
        }
    }

    fn submit(self: &Arc<Self>, ctx: InvocationContext, prepared: PreparedRequest) -> Result<(), InvocationError> {
        let site = ctx.site();
        let this = Arc::clone(self);
        let span = tracing::Span::current();
        let task = move || {
            let _entered = span.enter();
            let callback = ctx.callback();
            let result = this.run(&ctx, prepared);
            deliver(&ctx, callback.as_deref(), result);
        };

        self.pool.submit(task).map_err(|e| match e {
            SubmitError::Closed => InvocationError::Rejected { site },
            SubmitError::Runtime(io) => InvocationError::Execution {
                site,
                source: ExecutionError::Io(io),
            },
        })?;
        tracing::debug!("submitted to worker pool");
        Ok(())
    }

    /// Transport plus response chain for one prepared request.
    fn run(&self, ctx: &InvocationContext, prepared: PreparedRequest) -> Result<Outcome, InvocationError> {
        let PreparedRequest { mut request, write_back } = prepared;
        let execution = |source: ExecutionError| InvocationError::Execution { site: ctx.site(), source };

        let transport = self.transports.get_or_create(ctx.key, &ctx.endpoint).map_err(execution)?;

        let session = ctx.is_stateful().then(|| self.sessions.get_or_create(ctx.key));
        if let Some(session) = &session {
            if !request.headers.contains("cookie") {
                if let Some(cookie) = session.cookie_header() {
                    request.headers.push("Cookie", cookie);
                }
            }
        }

        tracing::debug!(verb = %request.verb, uri = %request.uri, "sending request");
        let response = transport.execute(request).map_err(execution)?;
        tracing::debug!(status = response.status, "received response");

        if let Some(session) = &session {
            session.absorb(&response.headers);
        }

        ResponseChain::new(&self.parsers).process(ctx, &write_back, response)
    }

    /// Stop the worker pool, then release every transport.
    pub fn shutdown(&self, grace: std::time::Duration) -> (PoolReport, usize) {
        let pool = self.pool.shutdown(grace);
        let closed = self.transports.close_all();
        (pool, closed)
    }
}

fn deliver(ctx: &InvocationContext, callback: Option<&dyn Callback>, result: Result<Outcome, InvocationError>) {
    let Some(callback) = callback else {
        match result {
            Ok(outcome) => tracing::debug!(status = outcome.status, "async call finished"),
            Err(e) => tracing::warn!(call = %ctx.id, "async call failed with no callback: {e}"),
        }
        return;
    };

    let hook = panic::catch_unwind(AssertUnwindSafe(|| match result {
        Ok(outcome) => callback.on_success(outcome),
        Err(e) if e.failed_response().is_some() => callback.on_failure(e),
        Err(e) => callback.on_error(e),
    }));
    if let Err(payload) = hook {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(call = %ctx.id, site = %ctx.site(), "callback panicked: {message}");
    }
}
