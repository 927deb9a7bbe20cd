//! Node removal ("shrink") operations
//!
//! [`ShrinkService`] validates a removal request, records the operation and
//! runs the removal pipeline on a background task. Every external system the
//! pipeline touches is reached through a trait object in [`ShrinkDeps`].

mod create;
mod pipeline;
pub mod steps;
pub mod validate;

pub use steps::{Policy, Step};
pub use validate::{validate_request, ShrinkRequest};

use crate::agent::{AgentService, TokenStore};
use crate::cluster::{ClusterBackend, ClusterKey};
use crate::config::ShrinkConfig;
use crate::error::{Result, ShrinkError};
use crate::leadership::{Leadership, NodeDrainer};
use crate::manifest::{HookRunner, Manifest};
use crate::membership::MembershipClient;
use crate::operation::{Operation, OperationKey, OperationStore, ProgressEntry, ProgressReporter};
use crate::packages::{Locator, PackageStore};
use crate::provisioner::{CredentialStore, CredentialVerifier};
use crate::registry::ServiceRegistry;
use crate::runner::ControlPlaneTransport;
use crate::secrets::{self, RotatePackageResponse, RotateSecrets, SecretsPackager};
use slog::Logger;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// External collaborators of the shrink pipeline
#[derive(Clone)]
pub struct ShrinkDeps {
    pub operations: Arc<dyn OperationStore>,
    pub backend: Arc<dyn ClusterBackend>,
    pub registry: Arc<dyn ServiceRegistry>,
    pub transport: Arc<dyn ControlPlaneTransport>,
    pub agents: Arc<dyn AgentService>,
    pub tokens: Arc<dyn TokenStore>,
    pub membership: Arc<dyn MembershipClient>,
    pub packages: Arc<dyn PackageStore>,
    pub hooks: Arc<dyn HookRunner>,
    pub drainer: Arc<dyn NodeDrainer>,
    pub leadership: Arc<dyn Leadership>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub secrets: Arc<dyn SecretsPackager>,
}

struct Inner {
    deps: ShrinkDeps,
    manifest: Manifest,
    config: ShrinkConfig,
    credentials: CredentialStore,
    progress: ProgressReporter,
    logger: Logger,
}

/// Entry point for node removal operations
#[derive(Clone)]
pub struct ShrinkService {
    inner: Arc<Inner>,
}

/// A running removal pipeline
#[derive(Debug)]
pub struct ShrinkTask {
    pub key: OperationKey,
    handle: JoinHandle<Result<()>>,
}

impl ShrinkTask {
    /// Wait for the pipeline to finish
    pub async fn wait(self) -> Result<()> {
        self.handle
            .await
            .map_err(|e| ShrinkError::Internal(format!("shrink task for {} failed: {}", self.key, e)))?
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl ShrinkService {
    /// Create a service over its collaborators
    ///
    /// # Arguments
    /// * `deps` - External systems the pipeline acts on
    /// * `manifest` - Application manifest with hooks and node profiles
    /// * `config` - Timeouts, retry limits and tool paths
    /// * `logger` - Parent logger; each operation logs through a child of it
    pub fn new(deps: ShrinkDeps, manifest: Manifest, config: ShrinkConfig, logger: Logger) -> Self {
        Self {
            inner: Arc::new(Inner {
                deps,
                manifest,
                config,
                credentials: CredentialStore::new(),
                progress: ProgressReporter::default(),
                logger,
            }),
        }
    }

    pub fn config(&self) -> &ShrinkConfig {
        &self.inner.config
    }

    /// Cached cloud providers; populated while an operation runs
    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.credentials
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEntry> {
        self.inner.progress.subscribe()
    }

    pub fn last_progress(&self, key: &OperationKey) -> Option<ProgressEntry> {
        self.inner.progress.last_progress(key)
    }

    pub async fn get_operation(&self, key: &OperationKey) -> Result<Operation> {
        self.inner.deps.operations.get_operation(key).await
    }

    /// Run the removal pipeline for an existing operation on the current task
    pub async fn execute_operation(&self, key: &OperationKey) -> Result<()> {
        pipeline::run(&self.inner, key).await
    }

    /// Restart the pipeline of an in-progress operation, e.g. after a leader change
    pub async fn resume_operation(&self, key: &OperationKey) -> Result<ShrinkTask> {
        let operation = self.get_operation(key).await?;
        if operation.state.is_terminal() {
            return Err(ShrinkError::invalid_request(format!(
                "operation {} is {} and cannot be resumed",
                key, operation.state
            )));
        }
        Ok(self.spawn(key.clone()))
    }

    fn spawn(&self, key: OperationKey) -> ShrinkTask {
        let service = self.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move { service.execute_operation(&task_key).await });
        ShrinkTask { key, handle }
    }

    /// Generate a new secrets package for a cluster server
    pub async fn rotate_secrets(
        &self,
        cluster: &ClusterKey,
        hostname: &str,
        package: Locator,
        service_cidr: &str,
        config: &[u8],
    ) -> Result<RotatePackageResponse> {
        let snapshot = self.inner.deps.backend.get_cluster(cluster).await?;
        let node = snapshot.state.find_server(hostname)?;
        secrets::rotate_secrets(
            self.inner.deps.backend.as_ref(),
            self.inner.deps.secrets.as_ref(),
            RotateSecrets {
                cluster,
                node,
                package,
                service_cidr,
                config,
            },
            &self.inner.logger,
        )
        .await
    }
}
