use super::{Channel, CommandRunner, RunnerTarget, ServerRunner};
use crate::cluster::Server;
use crate::error::{Result, ShrinkError};
use crate::registry::{self, ServiceRegistry, LABEL_ROLE, ROLE_MASTER};
use async_trait::async_trait;
use slog::Logger;
use std::sync::Arc;

/// The cluster's existing command transport
#[async_trait]
pub trait ControlPlaneTransport: Send + Sync {
    /// Execute `args` on `target` and return the combined output
    async fn exec(&self, cluster: &str, target: &RunnerTarget, args: &[String]) -> Result<Vec<u8>>;
}

/// Runs commands through the control-plane transport
pub struct ControlPlaneRunner {
    cluster: String,
    transport: Arc<dyn ControlPlaneTransport>,
}

impl ControlPlaneRunner {
    pub fn new(cluster: impl Into<String>, transport: Arc<dyn ControlPlaneTransport>) -> Self {
        Self {
            cluster: cluster.into(),
            transport,
        }
    }
}

#[async_trait]
impl CommandRunner for ControlPlaneRunner {
    fn channel(&self) -> Channel {
        Channel::ControlPlane
    }

    async fn run(&self, target: &RunnerTarget, args: &[String]) -> Result<Vec<u8>> {
        self.transport.exec(&self.cluster, target, args).await
    }
}

/// Pick any live master other than the server being removed
pub async fn pick_master_runner(
    registry: &dyn ServiceRegistry,
    transport: Arc<dyn ControlPlaneTransport>,
    cluster: &str,
    removed: &Server,
    logger: &Logger,
) -> Result<ServerRunner> {
    let masters = registry::list_servers_by_label(registry, cluster, LABEL_ROLE, ROLE_MASTER).await?;
    let master = masters
        .into_iter()
        .find(|master| master.address != removed.advertise_ip)
        .ok_or_else(|| {
            ShrinkError::not_found(format!(
                "{} is being removed and no more master nodes are available to execute the operation",
                removed
            ))
        })?;

    let target = RunnerTarget {
        hostname: master.hostname,
        address: master.address,
    };
    Ok(ServerRunner::new(
        target,
        Arc::new(ControlPlaneRunner::new(cluster, transport)),
        logger.clone(),
    ))
}
