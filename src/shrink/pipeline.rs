use super::steps::{settle, Step, StepContext};
use super::Inner;
use crate::agent::AgentLauncher;
use crate::cluster::{ClusterKey, Server};
use crate::commands::Commands;
use crate::error::{Result, ShrinkError};
use crate::manifest::HookKind;
use crate::membership::{self, RemovalLimits};
use crate::operation::{Operation, OperationKey, OperationState, ProgressEntry, ShrinkState, Swap};
use crate::packages;
use crate::provisioner::CloudProvider;
use crate::registry::{self, QueryLimits, RegistryServer, LABEL_HOSTNAME};
use crate::retry::{retry, retry_until, ConstantBackoff};
use crate::runner::{pick_master_runner, ServerRunner};
use slog::{info, o, warn, Logger};
use std::time::Duration;
use tokio::time::timeout;

/// Run the removal pipeline for the operation `key`
///
/// Cleanup runs on every exit once the operation record is loaded, including
/// when this process steps down.
pub(super) async fn run(inner: &Inner, key: &OperationKey) -> Result<()> {
    let operation = inner.deps.operations.get_operation(key).await?;
    let cluster_key = operation.cluster_key();
    let logger = inner.logger.new(o!(
        "operation" => key.to_string(),
        "cluster" => cluster_key.cluster_name.clone()
    ));

    let result = start(inner, key, &operation, &logger).await;
    cleanup(inner, key, &cluster_key, &logger).await;
    if let Err(e) = &result {
        warn!(logger, "Shrink operation failed"; "error" => %e);
    }
    result
}

async fn start(inner: &Inner, key: &OperationKey, operation: &Operation, logger: &Logger) -> Result<()> {
    let state = operation
        .shrink
        .as_ref()
        .ok_or_else(|| ShrinkError::invalid_request(format!("operation {} has no shrink state", key)))?;
    let hostname = state
        .servers
        .first()
        .map(|s| s.hostname.clone())
        .ok_or_else(|| ShrinkError::invalid_request(format!("operation {} has no servers to remove", key)))?;

    let cluster_key = operation.cluster_key();
    let cluster = inner.deps.backend.get_cluster(&cluster_key).await?;
    let server = cluster.state.find_server(&hostname)?.clone();
    let logger = logger.new(o!("server" => hostname));

    // The process running on the removed node cannot finish the operation; another one resumes it.
    if inner.config.is_local(&server.advertise_ip) {
        info!(logger, "This node is being removed, stepping down");
        return inner.deps.leadership.step_down().await;
    }

    if inner.credentials.get(&cluster_key).is_none() {
        inner
            .credentials
            .set(&cluster_key, CloudProvider::from_request(operation.provisioner, &state.vars));
    }

    if state.force {
        info!(logger, "Forcing server removal");
    } else {
        info!(logger, "Starting server removal");
    }

    Pipeline {
        inner,
        key,
        cluster_key: &cluster_key,
        operation,
        state,
        server: &server,
        logger: &logger,
    }
    .execute()
    .await
}

/// Drop cached credentials and stop the operation's agents; errors are only logged
async fn cleanup(inner: &Inner, key: &OperationKey, cluster_key: &ClusterKey, logger: &Logger) {
    // Cached providers may hold API keys.
    inner.credentials.delete(cluster_key);

    match timeout(inner.config.agent_stop_timeout, inner.deps.agents.stop_agents(key)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(logger, "Failed to stop shrink agent"; "error" => %e),
        Err(_) => warn!(logger, "Timed out stopping shrink agent"),
    }
}

struct Pipeline<'a> {
    inner: &'a Inner,
    key: &'a OperationKey,
    cluster_key: &'a ClusterKey,
    operation: &'a Operation,
    state: &'a ShrinkState,
    server: &'a Server,
    logger: &'a Logger,
}

impl<'a> Pipeline<'a> {
    fn ctx(&self) -> StepContext<'a> {
        StepContext {
            node: &self.server.hostname,
            cluster: &self.cluster_key.cluster_name,
            force: self.state.force,
        }
    }

    fn settle(&self, step: Step, result: Result<()>) -> Result<()> {
        settle(step, result, self.ctx(), self.logger)
    }

    fn report(&self, step: Step) {
        if let Some((completion, message)) = step.progress() {
            info!(self.logger, "{}", message; "completion" => completion);
            self.inner
                .progress
                .report(ProgressEntry::in_progress(self.key, completion, message));
        }
    }

    fn commands(&self) -> Commands<'a> {
        Commands::new(&self.inner.config)
    }

    async fn execute(&self) -> Result<()> {
        let master = match pick_master_runner(
            self.inner.deps.registry.as_ref(),
            self.inner.deps.transport.clone(),
            &self.cluster_key.cluster_name,
            self.server,
            self.logger,
        )
        .await
        {
            Ok(runner) => runner,
            Err(e) => return Err(e.with_step(Step::SelectRunner.action(), self.ctx().node, self.ctx().cluster)),
        };
        info!(self.logger, "Selected master runner";
            "host" => &master.target().hostname,
            "addr" => &master.target().address
        );

        let agent = self.launch_agent().await?;
        let online = agent.is_some();
        info!(self.logger, "Node status"; "online" => online);

        self.report(Step::Unlabel);
        self.settle(Step::Unlabel, self.unlabel(&master).await)?;

        self.report(Step::DisableElection);
        self.settle(Step::DisableElection, self.disable_election(&master).await)?;

        if self.inner.manifest.has_hook(HookKind::NodeRemoving) {
            self.report(Step::PreRemovalHook);
            self.settle(Step::PreRemovalHook, self.run_hook(HookKind::NodeRemoving).await)?;
        }

        if online && !self.state.force {
            self.report(Step::Drain);
            self.settle(Step::Drain, self.drain().await)?;
        }

        self.report(Step::DeleteNode);
        self.settle(Step::DeleteNode, self.delete_node(&master).await)?;

        self.report(Step::RemoveMember);
        self.settle(Step::RemoveMember, self.remove_member().await)?;

        if let Some(agent) = &agent {
            self.report(Step::Uninstall);
            self.settle(Step::Uninstall, self.uninstall(agent).await)?;
        }

        if self.operation.provisioner.requires_deprovision_hook() {
            self.settle(Step::Deprovision, self.deprovision().await)?;
        }

        if self.inner.manifest.has_hook(HookKind::NodeRemoved) {
            self.report(Step::PostRemovalHook);
            self.settle(Step::PostRemovalHook, self.run_hook(HookKind::NodeRemoved).await)?;
        }

        self.report(Step::CleanupPackages);
        self.settle(Step::CleanupPackages, self.delete_packages().await)?;

        self.report(Step::WaitForRemoval);
        self.settle(Step::WaitForRemoval, self.wait_for_removal().await)?;

        let peer = self.inner.deps.backend.delete_peer(self.server.object_peer_id()).await;
        self.settle(Step::DeletePeer, peer)?;

        let removed = self
            .inner
            .deps
            .backend
            .remove_servers(self.cluster_key, &[self.server.hostname.clone()])
            .await;
        self.settle(Step::RemoveFromState, removed)?;

        let swapped = self
            .inner
            .deps
            .operations
            .compare_and_swap(Swap {
                key: self.key.clone(),
                expected_states: vec![OperationState::ShrinkInProgress],
                new_state: OperationState::Completed,
            })
            .await
            .map(|_| ());
        self.settle(Step::Complete, swapped)?;

        let message = format!("{} removed", self.server.hostname);
        info!(self.logger, "{}", message);
        self.inner.progress.report(ProgressEntry::completed(self.key, message));
        Ok(())
    }

    /// Start an agent on the node if it is reachable; `None` means offline
    async fn launch_agent(&self) -> Result<Option<ServerRunner>> {
        if self.state.node_removed {
            return Ok(None);
        }
        let deps = &self.inner.deps;
        if let Err(e) =
            registry::find_by_hostname(deps.registry.as_ref(), &self.cluster_key.cluster_name, &self.server.hostname)
                .await
        {
            warn!(self.logger, "Node is offline"; "error" => %e);
            return Ok(None);
        }

        info!(self.logger, "Launching shrink agent");
        let launcher = AgentLauncher {
            registry: deps.registry.as_ref(),
            transport: deps.transport.clone(),
            tokens: deps.tokens.as_ref(),
            agents: deps.agents.clone(),
            config: &self.inner.config,
            logger: self.logger,
        };
        match launcher.launch(self.operation, self.server).await {
            Ok(runner) => Ok(Some(runner)),
            Err(e) => self.settle(Step::LaunchAgent, Err(e)).map(|()| None),
        }
    }

    async fn run_retried(&self, runner: &ServerRunner, command: &[String]) -> Result<()> {
        let config = &self.inner.config;
        retry(config.retry_interval, config.retry_attempts, move || runner.run(command))
            .await
            .map(|_| ())
    }

    async fn unlabel(&self, master: &ServerRunner) -> Result<()> {
        let profile = self.inner.manifest.profile(&self.server.profile)?;
        let command = self.commands().unlabel_node(self.server.kube_node_id(), profile.labels.keys());
        self.run_retried(master, &command).await
    }

    async fn disable_election(&self, master: &ServerRunner) -> Result<()> {
        let command = self
            .commands()
            .set_election(&self.cluster_key.cluster_name, &self.server.advertise_ip, false);
        master.run(&command).await.map(|_| ())
    }

    async fn run_hook(&self, hook: HookKind) -> Result<()> {
        info!(self.logger, "Running hook"; "hook" => %hook);
        self.inner.deps.hooks.run_hook(self.operation, hook).await
    }

    async fn drain(&self) -> Result<()> {
        let drainer = self.inner.deps.drainer.as_ref();
        let node = self.server.kube_node_id();
        retry_until(
            self.inner.config.drain_timeout,
            ConstantBackoff::new(Duration::from_secs(1)),
            move || drainer.drain(node),
        )
        .await
    }

    async fn delete_node(&self, master: &ServerRunner) -> Result<()> {
        let command = self.commands().delete_node(self.server.kube_node_id());
        self.run_retried(master, &command).await
    }

    async fn remove_member(&self) -> Result<()> {
        let peer_url = self.server.etcd_peer_url();
        let logger = self.logger.new(o!("peer" => peer_url.clone()));
        info!(logger, "Removing peer from the coordination store");
        membership::remove_member(
            self.inner.deps.membership.as_ref(),
            &peer_url,
            RemovalLimits {
                timeout: self.inner.config.member_removal_timeout,
                max_interval: self.inner.config.member_removal_max_interval,
            },
            &logger,
        )
        .await
    }

    async fn uninstall(&self, agent: &ServerRunner) -> Result<()> {
        agent.run(&self.commands().uninstall_system()).await.map(|_| ())
    }

    async fn deprovision(&self) -> Result<()> {
        if !self.inner.manifest.has_hook(HookKind::NodesDeprovision) {
            return Err(ShrinkError::invalid_request(format!(
                "{} hook is not defined",
                HookKind::NodesDeprovision
            )));
        }
        info!(self.logger, "Using nodes deprovisioning hook");
        self.run_hook(HookKind::NodesDeprovision).await?;
        info!(self.logger, "Nodes have been successfully deprovisioned");
        Ok(())
    }

    async fn delete_packages(&self) -> Result<()> {
        packages::delete_server_packages(
            self.inner.deps.packages.as_ref(),
            &self.cluster_key.cluster_name,
            self.server,
            self.logger,
        )
        .await
    }

    async fn wait_for_removal(&self) -> Result<()> {
        let config = &self.inner.config;
        let hostname = self.server.hostname.as_str();
        let gone = |servers: &[RegistryServer]| {
            if servers.iter().any(|s| s.label(LABEL_HOSTNAME) == Some(hostname)) {
                return Err(ShrinkError::AlreadyExists(format!("server {} is not yet removed", hostname)));
            }
            Ok(())
        };
        registry::query_until(
            self.inner.deps.registry.as_ref(),
            &self.cluster_key.cluster_name,
            QueryLimits {
                timeout: config.registry_query_timeout,
                interval: config.retry_interval,
                attempts: config.retry_less_attempts,
            },
            gone,
        )
        .await
        .map(|_| ())
    }
}
