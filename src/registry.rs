//! Live service registry
//!
//! The registry lists the servers that are currently connected to the cluster
//! control plane. A server missing from the registry is considered offline.

use crate::error::{Result, ShrinkError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Label carrying the server's hostname
pub const LABEL_HOSTNAME: &str = "hostname";
/// Label carrying the server's cluster role
pub const LABEL_ROLE: &str = "role";
pub const ROLE_MASTER: &str = "master";

/// A server as seen by the service registry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryServer {
    /// Advertise address of the server
    pub address: String,
    pub hostname: String,
    pub labels: HashMap<String, String>,
}

impl RegistryServer {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    /// Whether every `(name, value)` pair is present in the labels
    pub fn matches(&self, labels: &[(&str, &str)]) -> bool {
        labels.iter().all(|(name, value)| self.label(name) == Some(*value))
    }
}

#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// All servers currently registered for the cluster
    async fn list_servers(&self, cluster: &str) -> Result<Vec<RegistryServer>>;
}

/// Filter servers by labels
pub fn with_labels(servers: &[RegistryServer], labels: &[(&str, &str)]) -> Vec<RegistryServer> {
    servers.iter().filter(|s| s.matches(labels)).cloned().collect()
}

/// Servers labelled with the given `(label, value)` pair
pub async fn list_servers_by_label(
    registry: &dyn ServiceRegistry,
    cluster: &str,
    label: &str,
    value: &str,
) -> Result<Vec<RegistryServer>> {
    let servers = registry.list_servers(cluster).await?;
    Ok(with_labels(&servers, &[(label, value)]))
}

/// The single server with the given hostname, without retrying
pub async fn find_by_hostname(registry: &dyn ServiceRegistry, cluster: &str, hostname: &str) -> Result<RegistryServer> {
    list_servers_by_label(registry, cluster, LABEL_HOSTNAME, hostname)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ShrinkError::not_found(format!("server with hostname {:?} is not registered", hostname)))
}

/// Bounds for [`query_until`]
#[derive(Clone, Copy, Debug)]
pub struct QueryLimits {
    pub timeout: Duration,
    pub interval: Duration,
    pub attempts: u32,
}

/// Poll the registry until `done` accepts the server list
///
/// Each poll is bounded by `limits.timeout`; polling stops after
/// `limits.attempts` tries and returns the last error.
pub async fn query_until<F>(
    registry: &dyn ServiceRegistry,
    cluster: &str,
    limits: QueryLimits,
    done: F,
) -> Result<Vec<RegistryServer>>
where
    F: Fn(&[RegistryServer]) -> Result<()>,
{
    let attempts = limits.attempts.max(1);
    let mut last_error = ShrinkError::timeout("service registry query");
    for attempt in 1..=attempts {
        match timeout(limits.timeout, registry.list_servers(cluster)).await {
            Ok(Ok(servers)) => match done(&servers) {
                Ok(()) => return Ok(servers),
                Err(e) => last_error = e,
            },
            Ok(Err(e)) => last_error = e,
            Err(_) => last_error = ShrinkError::timeout("service registry query"),
        }
        if attempt < attempts {
            sleep(limits.interval).await;
        }
    }
    Err(last_error)
}
