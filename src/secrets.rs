//! Node secrets rotation
//!
//! Generates a fresh TLS secrets package for a node. Masters additionally get
//! API server certificate SANs from the cluster configuration.

use crate::cluster::{ClusterBackend, ClusterKey, Server};
use crate::error::Result;
use crate::packages::Locator;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use slog::{info, warn, Logger};

/// Cluster configuration resource, reduced to the fields secrets depend on
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfiguration {
    #[serde(default)]
    pub spec: ConfigurationSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationSpec {
    #[serde(default)]
    pub global: GlobalConfiguration,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfiguration {
    #[serde(rename = "apiServerCertSANs", default)]
    pub api_server_cert_sans: Vec<String>,
}

impl ClusterConfiguration {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSecretsRequest {
    pub node: Server,
    pub package: Locator,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MasterSecretsRequest {
    pub master: Server,
    pub package: Locator,
    pub service_cidr: String,
    pub api_server_cert_sans: Vec<String>,
}

/// Generated secrets package
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotatePackageResponse {
    pub locator: Locator,
    #[serde(default)]
    pub labels: std::collections::HashMap<String, String>,
}

/// Builds secrets packages
#[async_trait]
pub trait SecretsPackager: Send + Sync {
    async fn node_secrets(&self, request: &NodeSecretsRequest) -> Result<RotatePackageResponse>;

    async fn master_secrets(&self, request: &MasterSecretsRequest) -> Result<RotatePackageResponse>;
}

/// Inputs to [`rotate_secrets`]
pub struct RotateSecrets<'a> {
    pub cluster: &'a ClusterKey,
    pub node: &'a Server,
    pub package: Locator,
    pub service_cidr: &'a str,
    /// Cluster configuration supplied with the request; the stored one is used when empty
    pub config: &'a [u8],
}

/// Generate a new secrets package for `request.node`
pub async fn rotate_secrets(
    backend: &dyn ClusterBackend,
    packager: &dyn SecretsPackager,
    request: RotateSecrets<'_>,
    logger: &Logger,
) -> Result<RotatePackageResponse> {
    if !request.node.is_master() {
        return packager
            .node_secrets(&NodeSecretsRequest {
                node: request.node.clone(),
                package: request.package,
            })
            .await;
    }

    let (config, source) = if request.config.is_empty() {
        let stored = backend.cluster_configuration(request.cluster).await?;
        (ClusterConfiguration::from_json(&stored)?, "stored")
    } else {
        (ClusterConfiguration::from_json(request.config)?, "request")
    };
    info!(logger, "Cluster configuration";
        "source" => source,
        "config" => serde_json::to_string(&config).unwrap_or_default()
    );

    let mut sans = config.spec.global.api_server_cert_sans;
    match backend.trusted_cluster(request.cluster).await {
        Ok(Some(trusted)) => {
            let san = format!("{}.{}", request.cluster.cluster_name, trusted.sni_host);
            if !sans.contains(&san) {
                sans.push(san);
            }
        }
        Ok(None) => {}
        Err(e) => warn!(logger, "Failed to query trusted cluster"; "error" => %e),
    }

    packager
        .master_secrets(&MasterSecretsRequest {
            master: request.node.clone(),
            package: request.package,
            service_cidr: request.service_cidr.to_string(),
            api_server_cert_sans: sans,
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Cluster, ServerRole, TrustedCluster};
    use crate::error::ShrinkError;
    use crate::logging::discard_logger;
    use std::sync::Mutex;

    struct ConfigBackend {
        stored: Vec<u8>,
        trusted: Option<TrustedCluster>,
    }

    #[async_trait]
    impl ClusterBackend for ConfigBackend {
        async fn get_cluster(&self, _key: &ClusterKey) -> Result<Cluster> {
            Err(ShrinkError::not_found("cluster not found"))
        }

        async fn delete_peer(&self, _peer_id: &str) -> Result<()> {
            Ok(())
        }

        async fn remove_servers(&self, _key: &ClusterKey, _hostnames: &[String]) -> Result<()> {
            Ok(())
        }

        async fn trusted_cluster(&self, _key: &ClusterKey) -> Result<Option<TrustedCluster>> {
            Ok(self.trusted.clone())
        }

        async fn cluster_configuration(&self, _key: &ClusterKey) -> Result<Vec<u8>> {
            Ok(self.stored.clone())
        }
    }

    #[derive(Default)]
    struct RecordingPackager {
        masters: Mutex<Vec<MasterSecretsRequest>>,
        nodes: Mutex<Vec<NodeSecretsRequest>>,
    }

    #[async_trait]
    impl SecretsPackager for RecordingPackager {
        async fn node_secrets(&self, request: &NodeSecretsRequest) -> Result<RotatePackageResponse> {
            self.nodes.lock().unwrap().push(request.clone());
            Ok(RotatePackageResponse {
                locator: request.package.clone(),
                labels: Default::default(),
            })
        }

        async fn master_secrets(&self, request: &MasterSecretsRequest) -> Result<RotatePackageResponse> {
            self.masters.lock().unwrap().push(request.clone());
            Ok(RotatePackageResponse {
                locator: request.package.clone(),
                labels: Default::default(),
            })
        }
    }

    fn server(role: ServerRole) -> Server {
        Server {
            hostname: "node-1".to_string(),
            advertise_ip: "10.0.0.1".to_string(),
            cluster_role: role,
            profile: "master".to_string(),
            instance_id: String::new(),
        }
    }

    fn request<'a>(cluster: &'a ClusterKey, node: &'a Server, config: &'a [u8]) -> RotateSecrets<'a> {
        RotateSecrets {
            cluster,
            node,
            package: Locator::new("example.com", "planet-10_0_0_1-secrets", "0.0.2"),
            service_cidr: "10.100.0.0/16",
            config,
        }
    }

    #[tokio::test]
    async fn test_node_gets_node_package() {
        let backend = ConfigBackend { stored: Vec::new(), trusted: None };
        let packager = RecordingPackager::default();
        let cluster = ClusterKey::new("acct", "example.com");
        let node = server(ServerRole::Node);

        rotate_secrets(&backend, &packager, request(&cluster, &node, b""), &discard_logger()).await.unwrap();
        assert_eq!(packager.nodes.lock().unwrap().len(), 1);
        assert!(packager.masters.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_master_uses_request_config_and_trusted_cluster() {
        let backend = ConfigBackend {
            stored: br#"{"spec":{"global":{"apiServerCertSANs":["stored.example.com"]}}}"#.to_vec(),
            trusted: Some(TrustedCluster {
                name: "hub".to_string(),
                sni_host: "hub.example.net".to_string(),
            }),
        };
        let packager = RecordingPackager::default();
        let cluster = ClusterKey::new("acct", "example.com");
        let master = server(ServerRole::Master);
        let config = br#"{"spec":{"global":{"apiServerCertSANs":["api.example.com"]}}}"#;

        rotate_secrets(&backend, &packager, request(&cluster, &master, config), &discard_logger()).await.unwrap();
        let masters = packager.masters.lock().unwrap();
        assert_eq!(
            masters[0].api_server_cert_sans,
            vec!["api.example.com".to_string(), "example.com.hub.example.net".to_string()]
        );
    }

    #[tokio::test]
    async fn test_master_falls_back_to_stored_config() {
        let backend = ConfigBackend {
            stored: br#"{"spec":{"global":{"apiServerCertSANs":["stored.example.com"]}}}"#.to_vec(),
            trusted: None,
        };
        let packager = RecordingPackager::default();
        let cluster = ClusterKey::new("acct", "example.com");
        let master = server(ServerRole::Master);

        rotate_secrets(&backend, &packager, request(&cluster, &master, b""), &discard_logger()).await.unwrap();
        assert_eq!(packager.masters.lock().unwrap()[0].api_server_cert_sans, vec!["stored.example.com".to_string()]);
    }
}
