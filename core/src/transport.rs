//! Per-endpoint pooled transport.
//!
//! # Design
//! A `TransportHandle` wraps one `ureq::Agent`, whose connection pool is
//! shared by every call to the endpoint. Closing the handle drops the agent;
//! calls already in flight keep their own clone until they finish, new calls
//! fail with `TransportClosed`.
//!
//! `TransportDirectory` creates one handle per endpoint identity. The
//! configuration used at creation comes from, in order: an explicit
//! `configure` override, the endpoint's own `TransportConfigurator`, the
//! client default. Creation, reconfiguration and `close_all` hold the
//! directory's lifecycle lock, so an override recorded by `configure` is
//! either seen by the creation in progress or applied as a replacement.

use std::any::TypeId;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use ureq::http::{Method, Request};
use ureq::SendBody;

use crate::cache::KeyedCache;
use crate::config::TransportConfig;
use crate::descriptor::Endpoint;
use crate::entity::Entity;
use crate::error::ExecutionError;
use crate::http::{Headers, ResponseBody, Verb, WireRequest, WireResponse};

/// Resolves the transport configuration of one endpoint.
pub trait TransportConfigurator: Send + Sync {
    fn transport_config(&self, endpoint: &Endpoint, defaults: &TransportConfig) -> TransportConfig;
}

impl<F> TransportConfigurator for F
where
    F: Fn(&Endpoint, &TransportConfig) -> TransportConfig + Send + Sync,
{
    fn transport_config(&self, endpoint: &Endpoint, defaults: &TransportConfig) -> TransportConfig {
        self(endpoint, defaults)
    }
}

/// The pooled client of one endpoint.
pub struct TransportHandle {
    endpoint: String,
    config: TransportConfig,
    agent: RwLock<Option<ureq::Agent>>,
}

impl TransportHandle {
    pub fn new(endpoint: &str, config: TransportConfig) -> Result<Self, ExecutionError> {
        let agent = build_agent(&config)?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            config,
            agent: RwLock::new(Some(agent)),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.agent.read().is_none()
    }

    /// Release the connection pool. Returns `false` if already closed.
    pub fn close(&self) -> bool {
        let released = self.agent.write().take().is_some();
        if released {
            tracing::info!(endpoint = %self.endpoint, "transport closed");
        }
        released
    }

    /// Send `request` and return the response with its body still unread.
    pub fn execute(&self, request: WireRequest) -> Result<WireResponse, ExecutionError> {
        let agent = self.agent.read().clone().ok_or(ExecutionError::TransportClosed)?;

        let WireRequest {
            verb,
            uri,
            mut headers,
            body,
        } = request;
        if let Some(agent_name) = &self.config.user_agent {
            if !headers.contains("user-agent") {
                headers.push("User-Agent", agent_name.as_str());
            }
        }

        let mut builder = Request::builder().method(method(verb)).uri(uri.as_str());
        for (name, value) in headers.iter() {
            builder = builder.header(name, value);
        }
        let (parts, ()) = builder
            .body(())
            .map_err(|e| ExecutionError::InvalidRequest(e.to_string()))?
            .into_parts();

        let response = match body {
            None => agent.run(Request::from_parts(parts, SendBody::none()))?,
            Some(Entity::Bytes(data)) | Some(Entity::Buffered { data, .. }) => {
                agent.run(Request::from_parts(parts, data))?
            }
            Some(Entity::Text(text)) => agent.run(Request::from_parts(parts, text))?,
            Some(Entity::File(mut file)) => {
                agent.run(Request::from_parts(parts, SendBody::from_reader(&mut file)))?
            }
            Some(Entity::Stream(mut reader)) => {
                agent.run(Request::from_parts(parts, SendBody::from_reader(&mut reader)))?
            }
        };

        let status = response.status().as_u16();
        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect::<Vec<_>>()
            .into();
        let body = ResponseBody::new(response.into_body().into_reader());

        Ok(WireResponse {
            status,
            headers,
            body,
        })
    }
}

fn method(verb: Verb) -> Method {
    match verb {
        Verb::Get => Method::GET,
        Verb::Post => Method::POST,
        Verb::Put => Method::PUT,
        Verb::Delete => Method::DELETE,
        Verb::Head => Method::HEAD,
        Verb::Trace => Method::TRACE,
        Verb::Options => Method::OPTIONS,
    }
}

fn build_agent(config: &TransportConfig) -> Result<ureq::Agent, ExecutionError> {
    let proxy = match &config.proxy {
        Some(p) => Some(
            ureq::Proxy::new(p).map_err(|e| ExecutionError::InvalidConfig(format!("proxy {p:?}: {e}")))?,
        ),
        None => None,
    };

    // Status interpretation belongs to the response chain, so 4xx/5xx must
    // come back as responses.
    Ok(ureq::Agent::config_builder()
        .http_status_as_error(false)
        .timeout_connect(config.connect_timeout())
        .timeout_global(config.timeout())
        .max_idle_connections(config.max_idle_connections)
        .max_idle_connections_per_host(config.max_idle_connections_per_host)
        .max_idle_age(config.max_idle_age())
        .max_redirects(config.max_redirects)
        .proxy(proxy)
        .build()
        .new_agent())
}

/// One transport handle per endpoint identity.
pub struct TransportDirectory {
    handles: KeyedCache<TypeId, Arc<TransportHandle>>,
    overrides: DashMap<TypeId, TransportConfig>,
    defaults: TransportConfig,
    created: AtomicUsize,
    closed: AtomicBool,
    lifecycle: Mutex<()>,
}

impl TransportDirectory {
    pub fn new(defaults: TransportConfig) -> Self {
        Self {
            handles: KeyedCache::new(),
            overrides: DashMap::new(),
            defaults,
            created: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn get_or_create(
        &self,
        key: TypeId,
        endpoint: &Endpoint,
    ) -> Result<Arc<TransportHandle>, ExecutionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ExecutionError::TransportClosed);
        }
        if let Some(handle) = self.handles.get(&key) {
            return Ok(handle);
        }

        let _lifecycle = self.lifecycle.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(ExecutionError::TransportClosed);
        }
        self.handles.get_or_try_init(key, || -> Result<_, ExecutionError> {
            let config = self.resolve_config(key, endpoint);
            let handle = TransportHandle::new(&endpoint.name, config)?;
            self.created.fetch_add(1, Ordering::SeqCst);
            tracing::info!(endpoint = %endpoint.name, "transport created");
            Ok(Arc::new(handle))
        })
    }

    fn resolve_config(&self, key: TypeId, endpoint: &Endpoint) -> TransportConfig {
        if let Some(config) = self.overrides.get(&key) {
            return config.clone();
        }
        match &endpoint.transport {
            Some(configurator) => configurator.transport_config(endpoint, &self.defaults),
            None => self.defaults.clone(),
        }
    }

    /// Record an override for `key`. If a handle already exists it is closed
    /// and replaced by one built from `config`.
    ///
    /// `config` is checked before anything changes: on error the override is
    /// not recorded and the live handle keeps serving.
    pub fn configure(&self, key: TypeId, config: TransportConfig) -> Result<(), ExecutionError> {
        let _lifecycle = self.lifecycle.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(ExecutionError::TransportClosed);
        }
        match self.handles.get(&key) {
            Some(old) => {
                let handle = TransportHandle::new(old.endpoint(), config.clone())?;
                self.overrides.insert(key, config);
                old.close();
                self.created.fetch_add(1, Ordering::SeqCst);
                tracing::info!(endpoint = %old.endpoint(), "transport replaced");
                self.handles.replace(key, Arc::new(handle));
            }
            None => {
                build_agent(&config)?;
                self.overrides.insert(key, config);
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &TypeId) -> Option<Arc<TransportHandle>> {
        self.handles.get(key)
    }

    /// Number of handles ever created, replacements included.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Close every handle and refuse new ones. Returns how many were open.
    pub fn close_all(&self) -> usize {
        let _lifecycle = self.lifecycle.lock();
        self.closed.store(true, Ordering::Release);
        self.handles
            .values()
            .iter()
            .filter(|handle| handle.close())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{EndpointDef, EndpointTag};
    use crate::validator::resolve;

    fn endpoint(tag: EndpointTag) -> Endpoint {
        resolve(EndpointDef::new("Api").tag(tag)).unwrap()
    }

    #[test]
    fn one_handle_per_key() {
        let dir = TransportDirectory::new(TransportConfig::default());
        let ep = endpoint(EndpointTag::host("localhost"));
        let a = dir.get_or_create(TypeId::of::<u8>(), &ep).unwrap();
        let b = dir.get_or_create(TypeId::of::<u8>(), &ep).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(dir.created(), 1);

        dir.get_or_create(TypeId::of::<u16>(), &ep).unwrap();
        assert_eq!(dir.created(), 2);
    }

    #[test]
    fn endpoint_configurator_is_consulted() {
        let dir = TransportDirectory::new(TransportConfig::default());
        let configurator = |_: &Endpoint, defaults: &TransportConfig| TransportConfig {
            timeout_ms: Some(123),
            ..defaults.clone()
        };
        let ep = endpoint(EndpointTag::host("localhost").with_transport(Arc::new(configurator)));
        let handle = dir.get_or_create(TypeId::of::<u8>(), &ep).unwrap();
        assert_eq!(handle.config().timeout_ms, Some(123));
    }

    #[test]
    fn override_beats_endpoint_configurator() {
        let dir = TransportDirectory::new(TransportConfig::default());
        let configurator = |_: &Endpoint, _: &TransportConfig| TransportConfig {
            timeout_ms: Some(1),
            ..TransportConfig::default()
        };
        let ep = endpoint(EndpointTag::host("localhost").with_transport(Arc::new(configurator)));
        dir.configure(TypeId::of::<u8>(), TransportConfig::default().with_user_agent("x"))
            .unwrap();
        let handle = dir.get_or_create(TypeId::of::<u8>(), &ep).unwrap();
        assert_eq!(handle.config().user_agent.as_deref(), Some("x"));
        assert_eq!(handle.config().timeout_ms, None);
    }

    #[test]
    fn replacement_closes_the_old_handle() {
        let dir = TransportDirectory::new(TransportConfig::default());
        let ep = endpoint(EndpointTag::host("localhost"));
        let old = dir.get_or_create(TypeId::of::<u8>(), &ep).unwrap();
        dir.configure(TypeId::of::<u8>(), TransportConfig::default()).unwrap();
        assert!(old.is_closed());
        let new = dir.get(&TypeId::of::<u8>()).unwrap();
        assert!(!new.is_closed());
        assert!(!Arc::ptr_eq(&old, &new));
    }

    #[test]
    fn rejected_config_leaves_the_live_handle_alone() {
        let dir = TransportDirectory::new(TransportConfig::default());
        let ep = endpoint(EndpointTag::host("localhost"));
        let live = dir.get_or_create(TypeId::of::<u8>(), &ep).unwrap();

        let err = dir
            .configure(TypeId::of::<u8>(), TransportConfig::default().with_proxy("not a proxy :: ["))
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidConfig(_)));

        assert!(!live.is_closed());
        assert_eq!(dir.created(), 1);
        let again = dir.get_or_create(TypeId::of::<u8>(), &ep).unwrap();
        assert!(Arc::ptr_eq(&live, &again));
        assert!(again.config().proxy.is_none());
    }

    #[test]
    fn rejected_config_before_first_use_is_not_recorded() {
        let dir = TransportDirectory::new(TransportConfig::default());
        let ep = endpoint(EndpointTag::host("localhost"));
        assert!(dir
            .configure(TypeId::of::<u8>(), TransportConfig::default().with_proxy("not a proxy :: ["))
            .is_err());

        let handle = dir.get_or_create(TypeId::of::<u8>(), &ep).unwrap();
        assert!(handle.config().proxy.is_none());
        assert!(!handle.is_closed());
    }

    #[test]
    fn configure_during_creation_is_not_lost() {
        let dir = Arc::new(TransportDirectory::new(TransportConfig::default()));
        let slow = |_: &Endpoint, defaults: &TransportConfig| {
            std::thread::sleep(std::time::Duration::from_millis(100));
            defaults.clone()
        };
        let ep = Arc::new(endpoint(EndpointTag::host("localhost").with_transport(Arc::new(slow))));

        let creator = {
            let dir = Arc::clone(&dir);
            let ep = Arc::clone(&ep);
            std::thread::spawn(move || dir.get_or_create(TypeId::of::<u8>(), &ep).unwrap())
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        dir.configure(TypeId::of::<u8>(), TransportConfig::default().with_user_agent("late"))
            .unwrap();
        creator.join().unwrap();

        let live = dir.get(&TypeId::of::<u8>()).unwrap();
        assert!(!live.is_closed());
        assert_eq!(live.config().user_agent.as_deref(), Some("late"));
    }

    #[test]
    fn close_all_refuses_new_handles() {
        let dir = TransportDirectory::new(TransportConfig::default());
        let ep = endpoint(EndpointTag::host("localhost"));
        let handle = dir.get_or_create(TypeId::of::<u8>(), &ep).unwrap();
        assert_eq!(dir.close_all(), 1);
        assert!(handle.is_closed());
        assert!(matches!(
            dir.get_or_create(TypeId::of::<u16>(), &ep),
            Err(ExecutionError::TransportClosed)
        ));
    }

    #[test]
    fn closed_handle_refuses_requests() {
        let handle = TransportHandle::new("Api", TransportConfig::default()).unwrap();
        assert!(handle.close());
        assert!(!handle.close());
        let request = WireRequest {
            verb: Verb::Get,
            uri: "http://localhost:1/".to_string(),
            headers: Headers::new(),
            body: None,
        };
        assert!(matches!(handle.execute(request), Err(ExecutionError::TransportClosed)));
    }
}
