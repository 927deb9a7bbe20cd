//! Provisioner kinds and cached cloud credentials

use crate::cluster::ClusterKey;
use crate::error::Result;
use crate::operation::OperationVariables;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// How the cluster's infrastructure was provisioned
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provisioner {
    /// Servers provisioned by the operator
    OnPrem,
    /// Servers provisioned in AWS with terraform
    AwsTerraform,
}

impl Provisioner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provisioner::OnPrem => "onprem",
            Provisioner::AwsTerraform => "aws_terraform",
        }
    }

    /// Cloud provider name passed to the shrink agent
    pub fn cloud_provider(&self) -> &'static str {
        match self {
            Provisioner::OnPrem => "onprem",
            Provisioner::AwsTerraform => "aws",
        }
    }

    /// Whether removed servers must be torn down by the `nodes-deprovision` hook
    pub fn requires_deprovision_hook(&self) -> bool {
        matches!(self, Provisioner::AwsTerraform)
    }

    /// Whether supplied cloud credentials are checked before the operation starts
    pub fn validates_credentials(&self) -> bool {
        matches!(self, Provisioner::AwsTerraform)
    }
}

/// AWS API credentials
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

impl AwsCredentials {
    /// No keys supplied: they will be picked up from instance metadata
    pub fn is_empty(&self) -> bool {
        self.access_key.is_empty() && self.secret_key.is_empty()
    }
}

/// Cloud provider handle cached per cluster for the duration of an operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloudProvider {
    OnPrem,
    Aws(AwsCredentials),
}

impl CloudProvider {
    /// Derive the provider from the provisioner and request variables
    pub fn from_request(provisioner: Provisioner, vars: &OperationVariables) -> Self {
        match provisioner {
            Provisioner::OnPrem => CloudProvider::OnPrem,
            Provisioner::AwsTerraform => CloudProvider::Aws(AwsCredentials {
                access_key: vars.aws.access_key.clone(),
                secret_key: vars.aws.secret_key.clone(),
                region: vars.aws.region.clone(),
            }),
        }
    }
}

/// Keyed cache of cloud providers
///
/// Entries may hold API keys, so the pipeline deletes its cluster's entry
/// when it finishes.
#[derive(Debug, Default)]
pub struct CredentialStore {
    providers: Mutex<HashMap<ClusterKey, CloudProvider>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &ClusterKey, provider: CloudProvider) {
        self.lock().insert(key.clone(), provider);
    }

    pub fn get(&self, key: &ClusterKey) -> Option<CloudProvider> {
        self.lock().get(key).cloned()
    }

    pub fn delete(&self, key: &ClusterKey) {
        self.lock().remove(key);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ClusterKey, CloudProvider>> {
        // A poisoned map still holds consistent entries: every mutation is a single insert/remove.
        self.providers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Checks that cloud credentials carry the permissions provisioning needs
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify_aws(&self, credentials: &AwsCredentials) -> Result<()>;
}
