//! Cluster snapshot, server descriptors and the storage backend interface

use crate::error::{Result, ShrinkError};
use crate::provisioner::Provisioner;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifies a cluster: owning account plus cluster name (domain)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterKey {
    pub account_id: String,
    pub cluster_name: String,
}

impl ClusterKey {
    pub fn new(account_id: impl Into<String>, cluster_name: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            cluster_name: cluster_name.into(),
        }
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account_id, self.cluster_name)
    }
}

/// Role of a server in the cluster control plane
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerRole {
    Master,
    Node,
}

impl ServerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerRole::Master => "master",
            ServerRole::Node => "node",
        }
    }
}

/// A server as recorded in the persisted cluster state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub hostname: String,
    pub advertise_ip: String,
    pub cluster_role: ServerRole,
    /// Node profile name from the application manifest
    pub profile: String,
    /// Provisioner-specific identity (cloud instance id, empty for on-prem)
    #[serde(default)]
    pub instance_id: String,
}

impl Server {
    pub fn is_master(&self) -> bool {
        self.cluster_role == ServerRole::Master
    }

    /// Name of the node object in the orchestration layer
    pub fn kube_node_id(&self) -> &str {
        &self.advertise_ip
    }

    /// Peer URL of this server in the coordination store
    pub fn etcd_peer_url(&self) -> String {
        format!("https://{}:2380", self.advertise_ip)
    }

    /// Identity of this server in the cluster storage backend
    pub fn object_peer_id(&self) -> &str {
        &self.advertise_ip
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server(hostname={}, addr={}, role={})", self.hostname, self.advertise_ip, self.cluster_role.as_str())
    }
}

/// Persisted topology of a cluster
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterState {
    pub servers: Vec<Server>,
}

impl ClusterState {
    /// Find a server by hostname
    pub fn find_server(&self, hostname: &str) -> Result<&Server> {
        self.servers
            .iter()
            .find(|s| s.hostname == hostname)
            .ok_or_else(|| ShrinkError::not_found(format!("server {:?} not found", hostname)))
    }
}

/// Snapshot of a cluster as read from the backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub key: ClusterKey,
    pub provisioner: Provisioner,
    pub state: ClusterState,
    /// Provisioner variables saved at install time
    #[serde(default)]
    pub provider_vars: BTreeMap<String, String>,
}

/// Trusted (remote management) cluster link
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrustedCluster {
    pub name: String,
    pub sni_host: String,
}

/// Cluster storage backend
///
/// Holds the persisted cluster state and peer registrations. Implementations
/// talk to the real database; the pipeline only sees this interface.
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    /// Read the current cluster snapshot
    async fn get_cluster(&self, key: &ClusterKey) -> Result<Cluster>;

    /// Delete a storage peer registration
    async fn delete_peer(&self, peer_id: &str) -> Result<()>;

    /// Remove servers from the persisted cluster state by hostname
    async fn remove_servers(&self, key: &ClusterKey, hostnames: &[String]) -> Result<()>;

    /// Trusted cluster link, if one is configured
    async fn trusted_cluster(&self, key: &ClusterKey) -> Result<Option<TrustedCluster>>;

    /// Stored cluster configuration resource (JSON)
    async fn cluster_configuration(&self, key: &ClusterKey) -> Result<Vec<u8>>;
}
