//! Node package cleanup
//!
//! Every node owns a handful of generated packages in the cluster package
//! service: anything labelled with its advertise address, plus its
//! configuration and secrets packages. They are removed once the node is gone.

use crate::cluster::Server;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use slog::{debug, Logger};
use std::collections::HashMap;
use std::fmt;

/// Label linking a package to the server it was generated for
pub const LABEL_ADVERTISE_IP: &str = "advertise-ip";

/// Package address
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    pub repository: String,
    pub name: String,
    pub version: String,
}

impl Locator {
    pub fn new(repository: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    /// Same repository and name, any version
    pub fn same_package(&self, other: &Locator) -> bool {
        self.repository == other.repository && self.name == other.name
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.repository, self.name, self.version)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEnvelope {
    pub locator: Locator,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl PackageEnvelope {
    pub fn has_label(&self, name: &str, value: &str) -> bool {
        self.labels.get(name).map(String::as_str) == Some(value)
    }
}

#[async_trait]
pub trait PackageStore: Send + Sync {
    async fn list_packages(&self) -> Result<Vec<PackageEnvelope>>;

    async fn delete_package(&self, locator: &Locator) -> Result<()>;
}

fn ip_suffix(server: &Server) -> String {
    server.advertise_ip.replace('.', "_")
}

/// Per-server configuration packages, version left empty
pub fn config_packages(cluster: &str, server: &Server) -> Vec<Locator> {
    let suffix = ip_suffix(server);
    vec![
        Locator::new(cluster, format!("teleport-master-config-{}", suffix), ""),
        Locator::new(cluster, format!("teleport-node-config-{}", suffix), ""),
        Locator::new(cluster, format!("planet-config-{}", suffix), ""),
        Locator::new(cluster, format!("planet-{}-secrets", suffix), ""),
    ]
}

/// Packages in the store that belong to `server`
pub async fn server_packages(store: &dyn PackageStore, cluster: &str, server: &Server) -> Result<Vec<Locator>> {
    let config = config_packages(cluster, server);
    let packages = store
        .list_packages()
        .await?
        .into_iter()
        .filter(|env| {
            env.has_label(LABEL_ADVERTISE_IP, &server.advertise_ip)
                || config.iter().any(|c| c.same_package(&env.locator))
        })
        .map(|env| env.locator)
        .collect();
    Ok(packages)
}

/// Delete every package belonging to `server`, tolerating already deleted ones
pub async fn delete_server_packages(
    store: &dyn PackageStore,
    cluster: &str,
    server: &Server,
    logger: &Logger,
) -> Result<()> {
    for locator in server_packages(store, cluster, server).await? {
        match store.delete_package(&locator).await {
            Ok(()) => debug!(logger, "Deleted package"; "package" => %locator),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ServerRole;
    use crate::error::ShrinkError;
    use crate::logging::discard_logger;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakePackages {
        packages: Mutex<Vec<PackageEnvelope>>,
        missing: Vec<Locator>,
    }

    #[async_trait]
    impl PackageStore for FakePackages {
        async fn list_packages(&self) -> Result<Vec<PackageEnvelope>> {
            Ok(self.packages.lock().unwrap().clone())
        }

        async fn delete_package(&self, locator: &Locator) -> Result<()> {
            if self.missing.contains(locator) {
                return Err(ShrinkError::not_found(format!("package {} not found", locator)));
            }
            self.packages.lock().unwrap().retain(|p| &p.locator != locator);
            Ok(())
        }
    }

    fn server() -> Server {
        Server {
            hostname: "node-2".to_string(),
            advertise_ip: "10.0.0.2".to_string(),
            cluster_role: ServerRole::Node,
            profile: "node".to_string(),
            instance_id: String::new(),
        }
    }

    fn package(repository: &str, name: &str, labels: &[(&str, &str)]) -> PackageEnvelope {
        PackageEnvelope {
            locator: Locator::new(repository, name, "0.0.1"),
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[tokio::test]
    async fn test_server_packages_selection() {
        let store = FakePackages::default();
        store.packages.lock().unwrap().extend([
            package("example.com", "cert-authority", &[]),
            package("example.com", "planet-config-10_0_0_2", &[]),
            package("example.com", "planet-10_0_0_2-secrets", &[]),
            package("example.com", "planet-config-10_0_0_3", &[]),
            package("example.com", "site-export", &[(LABEL_ADVERTISE_IP, "10.0.0.2")]),
            package("other.com", "teleport-node-config-10_0_0_2", &[]),
        ]);

        let mut names: Vec<String> = server_packages(&store, "example.com", &server())
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["planet-10_0_0_2-secrets", "planet-config-10_0_0_2", "site-export"]);
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_packages() {
        let gone = Locator::new("example.com", "planet-config-10_0_0_2", "0.0.1");
        let store = FakePackages {
            missing: vec![gone],
            ..Default::default()
        };
        store.packages.lock().unwrap().extend([
            package("example.com", "planet-config-10_0_0_2", &[]),
            package("example.com", "teleport-master-config-10_0_0_2", &[]),
        ]);

        delete_server_packages(&store, "example.com", &server(), &discard_logger()).await.unwrap();
        let left = store.packages.lock().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].locator.name, "planet-config-10_0_0_2");
    }
}
