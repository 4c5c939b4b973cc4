//! Invocation facade.
//!
//! # Design
//! `Client` is the registry every cache hangs off: descriptors, dispatch
//! instances, transports and sessions all live exactly as long as the
//! client, and `shutdown` ends their life explicitly. Every cache is keyed
//! by the `TypeId` of the endpoint interface and created race-free per key.
//!
//! `create` is memoized only on success. A descriptor failure is memoized
//! by the descriptor cache instead, so a broken interface is resolved once
//! and never gets as far as transport setup.

use std::any::TypeId;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::args::Arg;
use crate::cache::KeyedCache;
use crate::config::{ClientConfig, TransportConfig};
use crate::descriptor::EndpointInterface;
use crate::dispatch::Dispatcher;
use crate::error::InvocationError;
use crate::executor::Executor;
use crate::parser::Parser;
use crate::request::RequestChain;
use crate::response::Outcome;
use crate::session::SessionState;
use crate::transport::TransportHandle;
use crate::validator::DescriptorCache;

/// What `Client::shutdown` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    /// Async calls finished over the client's lifetime.
    pub completed: usize,
    /// Async calls still running when the grace period ran out.
    pub abandoned: usize,
    pub transports_closed: usize,
}

pub struct Client {
    config: ClientConfig,
    descriptors: DescriptorCache,
    dispatchers: KeyedCache<TypeId, Arc<Dispatcher>>,
    executor: Arc<Executor>,
    report: OnceCell<ShutdownReport>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self::with_chain(config, RequestChain::default())
    }

    /// Use a request chain with extra steps.
    pub fn with_chain(config: ClientConfig, chain: RequestChain) -> Self {
        let executor = Arc::new(Executor::with_chain(&config, chain));
        Self {
            config,
            descriptors: DescriptorCache::new(),
            dispatchers: KeyedCache::new(),
            executor,
            report: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The dispatch instance of `E`, created on first use.
    ///
    /// Creation resolves and validates the descriptor and sets up the
    /// endpoint's transport. Nothing is cached unless both succeed.
    pub fn create<E: EndpointInterface>(&self) -> Result<Arc<Dispatcher>, InvocationError> {
        if self.is_shut_down() {
            return Err(InvocationError::ShutDown);
        }
        let key = TypeId::of::<E>();
        self.dispatchers.get_or_try_init(key, || -> Result<_, InvocationError> {
            let endpoint = self.descriptors.resolve::<E>()?;
            self.executor
                .transports
                .get_or_create(key, &endpoint)
                .map_err(|source| InvocationError::Transport {
                    endpoint: endpoint.name.clone(),
                    source,
                })?;
            tracing::debug!(endpoint = %endpoint.name, "dispatcher created");
            Ok(Arc::new(Dispatcher::new(key, endpoint, Arc::clone(&self.executor))))
        })
    }

    /// Shorthand for `create::<E>()?.invoke(operation, args)`.
    pub fn invoke<E: EndpointInterface>(
        &self,
        operation: &str,
        args: Vec<Arg>,
    ) -> Result<Option<Outcome>, InvocationError> {
        self.create::<E>()?.invoke(operation, args)
    }

    /// Override the transport configuration of `E`. A transport that already
    /// exists is closed and rebuilt with `config`. A config the transport
    /// rejects changes nothing.
    pub fn configure<E: EndpointInterface>(&self, config: TransportConfig) -> Result<(), InvocationError> {
        if self.is_shut_down() {
            return Err(InvocationError::ShutDown);
        }
        self.executor
            .transports
            .configure(TypeId::of::<E>(), config)
            .map_err(|source| InvocationError::Transport {
                endpoint: self.endpoint_name::<E>(),
                source,
            })
    }

    /// The descriptor name of `E`, also when its descriptor is invalid.
    fn endpoint_name<E: EndpointInterface>(&self) -> String {
        match self.descriptors.resolve::<E>() {
            Ok(endpoint) => endpoint.name.clone(),
            Err(e) => e.endpoint,
        }
    }

    /// Make `parser` available to endpoints and operations referencing
    /// `name` as their custom parser.
    pub fn register_parser(&self, name: &str, parser: Arc<dyn Parser>) {
        self.executor.parsers.register(name, parser);
    }

    pub fn transport<E: EndpointInterface>(&self) -> Option<Arc<TransportHandle>> {
        self.executor.transports.get(&TypeId::of::<E>())
    }

    pub fn session<E: EndpointInterface>(&self) -> Option<Arc<SessionState>> {
        self.executor.sessions.get(&TypeId::of::<E>())
    }

    /// Transport handles created so far, replacements included.
    pub fn transports_created(&self) -> usize {
        self.executor.transports.created()
    }

    pub fn is_shut_down(&self) -> bool {
        self.report.get().is_some()
    }

    /// Stop accepting async work, wait up to the configured grace period for
    /// calls in flight, then release every transport. Later calls return the
    /// first report unchanged.
    pub fn shutdown(&self) -> ShutdownReport {
        *self.report.get_or_init(|| {
            let (pool, transports_closed) = self.executor.shutdown(self.config.shutdown_grace());
            let report = ShutdownReport {
                completed: pool.completed,
                abandoned: pool.abandoned,
                transports_closed,
            };
            tracing::info!(
                completed = report.completed,
                abandoned = report.abandoned,
                transports_closed = report.transports_closed,
                "client shut down"
            );
            report
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{EndpointDef, EndpointTag, OperationDef};
    use crate::error::DescriptorProblem;

    struct Users;

    impl EndpointInterface for Users {
        fn definition() -> EndpointDef {
            EndpointDef::new("Users")
                .tag(EndpointTag::host("localhost").with_port(3000))
                .operation(OperationDef::get("list", "/users"))
        }
    }

    struct Hostless;

    impl EndpointInterface for Hostless {
        fn definition() -> EndpointDef {
            EndpointDef::new("Hostless")
                .tag(EndpointTag::default())
                .operation(OperationDef::get("list", "/users"))
        }
    }

    #[test]
    fn create_is_memoized() {
        let client = Client::new();
        let a = client.create::<Users>().unwrap();
        let b = client.create::<Users>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(client.transports_created(), 1);
    }

    #[test]
    fn invalid_descriptor_never_creates_a_transport() {
        let client = Client::new();
        for _ in 0..3 {
            match client.create::<Hostless>().unwrap_err() {
                InvocationError::Descriptor(descriptor) => {
                    assert!(descriptor.has(&DescriptorProblem::MissingHost))
                }
                other => panic!("expected a descriptor error, got {other}"),
            }
        }
        assert_eq!(client.transports_created(), 0);
        assert!(client.transport::<Hostless>().is_none());
    }

    #[test]
    fn configure_before_first_use_applies_on_creation() {
        let client = Client::new();
        client
            .configure::<Users>(TransportConfig::default().with_user_agent("wirecall-test"))
            .unwrap();
        client.create::<Users>().unwrap();
        let transport = client.transport::<Users>().unwrap();
        assert_eq!(transport.config().user_agent.as_deref(), Some("wirecall-test"));
    }

    #[test]
    fn rejected_configure_names_the_endpoint_and_keeps_it_usable() {
        let client = Client::new();
        client.create::<Users>().unwrap();
        let live = client.transport::<Users>().unwrap();

        match client.configure::<Users>(TransportConfig::default().with_proxy("not a proxy :: [")) {
            Err(InvocationError::Transport { endpoint, source }) => {
                assert_eq!(endpoint, "Users");
                assert!(matches!(source, crate::error::ExecutionError::InvalidConfig(_)));
            }
            other => panic!("expected a transport error, got {other:?}"),
        }

        let after = client.transport::<Users>().unwrap();
        assert!(Arc::ptr_eq(&live, &after));
        assert!(!after.is_closed());
        assert_eq!(client.transports_created(), 1);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let client = Client::new();
        client.create::<Users>().unwrap();
        let first = client.shutdown();
        assert_eq!(first.transports_closed, 1);
        assert_eq!(client.shutdown(), first);
        assert!(client.transport::<Users>().unwrap().is_closed());
        assert!(matches!(client.create::<Users>(), Err(InvocationError::ShutDown)));
    }
}
