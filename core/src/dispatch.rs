//! Dispatch instances.
//!
//! # Design
//! A `Dispatcher` is the call-routing object of one endpoint interface. It
//! maps an operation name to its resolved `Operation`, builds a fresh
//! `InvocationContext` per call and hands it to the shared `Executor`.
//! Front-ends that generate one method per operation implement those
//! methods on top of `invoke` or `call`.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::args::Arg;
use crate::context::InvocationContext;
use crate::descriptor::Endpoint;
use crate::error::{CallSite, InvocationError};
use crate::executor::Executor;
use crate::parser::Payload;
use crate::response::Outcome;

pub struct Dispatcher {
    key: TypeId,
    endpoint: Arc<Endpoint>,
    executor: Arc<Executor>,
}

impl Dispatcher {
    pub(crate) fn new(key: TypeId, endpoint: Arc<Endpoint>, executor: Arc<Executor>) -> Self {
        Self { key, endpoint, executor }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Run `operation` with positional `args`.
    ///
    /// Returns `Ok(None)` when the operation is asynchronous; its outcome
    /// goes to the callback argument.
    pub fn invoke(&self, operation: &str, args: Vec<Arg>) -> Result<Option<Outcome>, InvocationError> {
        let site = || CallSite::new(&self.endpoint.name, operation);
        let op = self
            .endpoint
            .operation(operation)
            .ok_or_else(|| InvocationError::UnknownOperation { site: site() })?;

        let ctx = InvocationContext::new(self.key, Arc::clone(&self.endpoint), Arc::clone(op), args)
            .map_err(|source| InvocationError::RequestBuild { site: site(), source })?;

        let span = tracing::debug_span!(
            "invoke",
            call = %ctx.id,
            endpoint = %self.endpoint.name,
            operation = %operation,
        );
        let _entered = span.enter();
        tracing::debug!(verb = %ctx.operation.verb, "invoking");
        self.executor.execute(ctx)
    }

    /// Like `invoke`, deserializing the payload into `T`. Asynchronous
    /// operations deserialize from `null`, so `()` or `Option<_>` fit them.
    pub fn call<T: DeserializeOwned>(&self, operation: &str, args: Vec<Arg>) -> Result<T, InvocationError> {
        let payload = match self.invoke(operation, args)? {
            Some(outcome) => outcome.payload,
            None => Payload::None,
        };
        payload.deserialize().map_err(|source| InvocationError::Parser {
            site: CallSite::new(&self.endpoint.name, operation),
            source,
        })
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::descriptor::{EndpointDef, EndpointTag, OperationDef, Role};
    use crate::error::RequestBuildError;
    use crate::validator::resolve;

    fn dispatcher() -> Dispatcher {
        let ep = resolve(
            EndpointDef::new("UserApi")
                .tag(EndpointTag::host("127.0.0.1").with_port(9))
                .operation(OperationDef::get("getUser", "/users/:id").role(Role::path(0, "id"))),
        )
        .unwrap();
        Dispatcher::new(
            TypeId::of::<u8>(),
            Arc::new(ep),
            Arc::new(Executor::new(&ClientConfig::default())),
        )
    }

    #[test]
    fn unknown_operation_names_the_site() {
        let err = dispatcher().invoke("deleteUser", vec![]).unwrap_err();
        assert!(matches!(err, InvocationError::UnknownOperation { .. }));
        assert_eq!(err.to_string(), "UserApi.deleteUser: no such operation");
    }

    #[test]
    fn arity_mismatch_is_a_build_error() {
        let err = dispatcher().invoke("getUser", vec![]).unwrap_err();
        assert_eq!(
            err.request_build(),
            Some(&RequestBuildError::ArityMismatch { expected: 1, found: 0 })
        );
    }
}
