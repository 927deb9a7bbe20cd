use super::validate::{validate_request, ShrinkRequest};
use super::{ShrinkService, ShrinkTask};
use crate::cluster::ClusterKey;
use crate::error::{Result, ShrinkError};
use crate::operation::{CreateOptions, Operation, OperationKey, ProgressEntry, ShrinkState};
use crate::provisioner::CloudProvider;
use slog::{info, warn};

impl ShrinkService {
    /// Validate the request, record a new shrink operation and start it
    ///
    /// The returned task runs the removal pipeline in the background.
    pub async fn create_shrink_operation(
        &self,
        cluster_key: &ClusterKey,
        request: ShrinkRequest,
    ) -> Result<ShrinkTask> {
        let inner = &self.inner;
        info!(inner.logger, "Creating shrink operation";
            "cluster" => %cluster_key,
            "servers" => request.servers.join(","),
            "force" => request.force,
            "node_removed" => request.node_removed
        );

        let cluster = inner.deps.backend.get_cluster(cluster_key).await?;
        let live = inner.deps.registry.list_servers(&cluster_key.cluster_name).await?;
        let server = validate_request(&request, &cluster, &live, &inner.logger)?;

        let mut vars = request.variables;
        vars.fill_from_cluster(&cluster.provider_vars);
        vars.system.cluster_name = cluster_key.cluster_name.clone();
        let provider = CloudProvider::from_request(cluster.provisioner, &vars);

        let operation = Operation::new_shrink(
            cluster_key,
            &request.created_by,
            cluster.provisioner,
            ShrinkState {
                servers: vec![server],
                force: request.force,
                vars,
                node_removed: request.node_removed,
            },
        );

        let key = self.verify_and_store(operation, &provider, request.force).await?;
        inner.credentials.set(cluster_key, provider);

        inner
            .progress
            .report(ProgressEntry::in_progress(&key, 0, "initializing the operation"));
        info!(inner.logger, "Created shrink operation"; "operation" => %key);

        Ok(self.spawn(key))
    }

    async fn verify_and_store(
        &self,
        operation: Operation,
        provider: &CloudProvider,
        force: bool,
    ) -> Result<OperationKey> {
        let inner = &self.inner;
        if operation.provisioner.validates_credentials() {
            // Without keys the provisioner falls back to instance metadata credentials.
            if let CloudProvider::Aws(credentials) = provider {
                if !credentials.is_empty() {
                    if let Err(e) = inner.deps.verifier.verify_aws(credentials).await {
                        warn!(inner.logger, "AWS credential check failed"; "error" => %e);
                        return Err(ShrinkError::invalid_request("invalid AWS credentials"));
                    }
                }
            }
        }
        inner
            .deps
            .operations
            .create_operation(operation, CreateOptions { force })
            .await
    }
}
