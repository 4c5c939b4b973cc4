//! Per-call invocation context.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::args::Arg;
use crate::descriptor::{Endpoint, Operation};
use crate::error::{CallSite, RequestBuildError};
use crate::executor::Callback;

/// Everything one call needs: which endpoint and operation, which dispatch
/// instance, and the concrete arguments.
///
/// Fresh per call. The only mutation after construction is the request
/// chain taking ownership of the body argument once every step succeeded.
pub struct InvocationContext {
    pub id: Uuid,
    /// Identity of the endpoint interface and of its dispatch instance.
    pub key: TypeId,
    pub endpoint: Arc<Endpoint>,
    pub operation: Arc<Operation>,
    args: Vec<Arg>,
}

impl InvocationContext {
    /// Check arity and declared role types, then build the context.
    pub fn new(
        key: TypeId,
        endpoint: Arc<Endpoint>,
        operation: Arc<Operation>,
        args: Vec<Arg>,
    ) -> Result<Self, RequestBuildError> {
        if args.len() != operation.roles.len() {
            return Err(RequestBuildError::ArityMismatch {
                expected: operation.roles.len(),
                found: args.len(),
            });
        }
        for (role, arg) in operation.roles.iter().zip(&args) {
            if !role.ty.accepts(arg) {
                return Err(RequestBuildError::ParamTypeError {
                    index: role.index,
                    expected: role.ty.name().to_string(),
                    found: arg.type_name().to_string(),
                });
            }
        }
        Ok(Self {
            id: Uuid::new_v4(),
            key,
            endpoint,
            operation,
            args,
        })
    }

    pub fn arg(&self, index: usize) -> &Arg {
        &self.args[index]
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    /// Move an argument out, leaving `Null` behind.
    pub(crate) fn take_arg(&mut self, index: usize) -> Arg {
        std::mem::replace(&mut self.args[index], Arg::Null)
    }

    /// The first callback among the arguments, by position.
    pub fn callback(&self) -> Option<Arc<dyn Callback>> {
        self.args.iter().find_map(|arg| match arg {
            Arg::Callback(cb) => Some(Arc::clone(cb)),
            _ => None,
        })
    }

    pub fn site(&self) -> CallSite {
        CallSite::new(&self.endpoint.name, &self.operation.name)
    }

    pub fn is_async(&self) -> bool {
        self.operation.is_async(&self.endpoint)
    }

    pub fn is_stateful(&self) -> bool {
        self.operation.is_stateful(&self.endpoint)
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint.name)
            .field("operation", &self.operation.name)
            .field("args", &self.args)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::ArgType;
    use crate::descriptor::{EndpointDef, EndpointTag, OperationDef, Role};
    use crate::validator::resolve;

    fn context(args: Vec<Arg>) -> Result<InvocationContext, RequestBuildError> {
        let ep = Arc::new(
            resolve(
                EndpointDef::new("Api").tag(EndpointTag::host("h")).operation(
                    OperationDef::get("find", "/users/:id")
                        .role(Role::path(0, "id").typed(ArgType::Integer))
                        .role(Role::callback(1)),
                ),
            )
            .unwrap(),
        );
        let op = Arc::clone(ep.operation("find").unwrap());
        InvocationContext::new(TypeId::of::<u8>(), ep, op, args)
    }

    #[test]
    fn arity_is_checked() {
        let err = context(vec![Arg::from(1)]).unwrap_err();
        assert_eq!(err, RequestBuildError::ArityMismatch { expected: 2, found: 1 });
    }

    #[test]
    fn declared_types_are_checked() {
        let err = context(vec![Arg::from("seven"), Arg::Null]).unwrap_err();
        assert_eq!(
            err,
            RequestBuildError::ParamTypeError {
                index: 0,
                expected: "integer".to_string(),
                found: "text".to_string(),
            }
        );
    }

    #[test]
    fn take_leaves_null() {
        let mut ctx = context(vec![Arg::from(7), Arg::Null]).unwrap();
        assert!(matches!(ctx.take_arg(0), Arg::Int(7)));
        assert!(ctx.arg(0).is_null());
        assert!(ctx.callback().is_none());
        assert_eq!(ctx.site().to_string(), "Api.find");
    }
}
