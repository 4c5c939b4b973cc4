//! Client and transport configuration.
//!
//! Both structs deserialize with every field optional, so a partial JSON
//! document only overrides what it names.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings of one endpoint's pooled transport. Timeouts apply uniformly to
/// every call made through the handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_ms: Option<u64>,
    /// Whole-call timeout, from connect to the last body byte.
    pub timeout_ms: Option<u64>,
    pub max_idle_connections: usize,
    pub max_idle_connections_per_host: usize,
    pub max_idle_age_ms: u64,
    pub max_redirects: u32,
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: Some(10_000),
            timeout_ms: None,
            max_idle_connections: 20,
            max_idle_connections_per_host: 5,
            max_idle_age_ms: 15_000,
            max_redirects: 10,
            proxy: None,
            user_agent: None,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn max_idle_age(&self) -> Duration {
        Duration::from_millis(self.max_idle_age_ms)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_proxy(mut self, proxy: &str) -> Self {
        self.proxy = Some(proxy.to_string());
        self
    }

    pub fn with_user_agent(mut self, agent: &str) -> Self {
        self.user_agent = Some(agent.to_string());
        self
    }
}

/// Settings of the invocation facade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Upper bound on concurrently running async calls.
    pub max_workers: usize,
    /// Idle async workers exit after this long.
    pub worker_idle_ms: u64,
    /// How long `shutdown` waits for queued async work.
    pub shutdown_grace_ms: u64,
    /// Transport settings for endpoints without their own configuration.
    pub transport: TransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_workers: 64,
            worker_idle_ms: 10_000,
            shutdown_grace_ms: 5_000,
            transport: TransportConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn worker_idle(&self) -> Duration {
        Duration::from_millis(self.worker_idle_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn with_max_workers(mut self, n: usize) -> Self {
        self.max_workers = n;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ClientConfig::from_json(r#"{"max_workers": 4, "transport": {"timeout_ms": 250}}"#).unwrap();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.shutdown_grace_ms, 5_000);
        assert_eq!(config.transport.timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.transport.max_redirects, 10);
    }

    #[test]
    fn empty_json_is_default() {
        assert_eq!(ClientConfig::from_json("{}").unwrap(), ClientConfig::default());
    }
}
