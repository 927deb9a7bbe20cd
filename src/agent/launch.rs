use super::token::{create_agent_token, TokenStore};
use super::AgentService;
use crate::cluster::Server;
use crate::commands::{AgentStart, Commands};
use crate::config::ShrinkConfig;
use crate::error::{Result, ShrinkError};
use crate::operation::Operation;
use crate::registry::{self, ServiceRegistry};
use crate::runner::{AgentRunner, ControlPlaneRunner, ControlPlaneTransport, RunnerTarget, ServerRunner};
use slog::{info, warn, Logger};
use std::sync::Arc;
use tokio::time::timeout;

/// Starts a shrink agent on the node being removed and returns a runner bound to it
///
/// Errors are returned without step context; the caller decides whether a
/// failed launch aborts the operation.
pub struct AgentLauncher<'a> {
    pub registry: &'a dyn ServiceRegistry,
    pub transport: Arc<dyn ControlPlaneTransport>,
    pub tokens: &'a dyn TokenStore,
    pub agents: Arc<dyn AgentService>,
    pub config: &'a ShrinkConfig,
    pub logger: &'a Logger,
}

impl<'a> AgentLauncher<'a> {
    /// Start the agent on `server` and wait for it to connect
    ///
    /// # Arguments
    /// * `operation` - Operation the agent token is scoped to
    /// * `server` - Node being removed
    ///
    /// # Returns
    /// * Runner executing commands through the connected agent
    pub async fn launch(&self, operation: &Operation, server: &Server) -> Result<ServerRunner> {
        let cluster = operation.cluster_name.as_str();
        let node = registry::find_by_hostname(self.registry, cluster, &server.hostname).await?;
        let launcher = ServerRunner::new(
            RunnerTarget {
                hostname: node.hostname.clone(),
                address: node.address.clone(),
            },
            Arc::new(ControlPlaneRunner::new(cluster, self.transport.clone())),
            self.logger.clone(),
        );

        let token = create_agent_token(
            self.tokens,
            &operation.cluster_key(),
            operation.id,
            self.config.token_ttl,
            self.config.token_bytes,
        )
        .await?;

        let command = Commands::new(self.config).start_agent(&AgentStart {
            advertise_addr: &server.advertise_ip,
            token: &token,
            provisioner: operation.provisioner,
        });
        launcher.run(&command).await?;
        info!(self.logger, "Started shrink agent"; "host" => &server.hostname, "addr" => &server.advertise_ip);

        let key = operation.key();
        let report = match timeout(self.config.agent_connect_timeout, self.agents.wait_for_agents(&key)).await {
            Ok(report) => report?,
            Err(_) => return Err(ShrinkError::timeout(format!("shrink agent on {}", server))),
        };

        let Some(agent) = report.servers.first() else {
            warn!(self.logger, "No shrink agents reported"; "operation" => %key, "message" => &report.message);
            return Err(ShrinkError::not_found(format!("no shrink agent connected from {}", server)));
        };
        info!(self.logger, "Shrink agent connected"; "host" => &agent.hostname, "addr" => &agent.advertise_addr);

        Ok(ServerRunner::new(
            RunnerTarget {
                hostname: agent.hostname.clone(),
                address: agent.advertise_addr.clone(),
            },
            Arc::new(AgentRunner::new(key, self.agents.clone())),
            self.logger.clone(),
        ))
    }
}
