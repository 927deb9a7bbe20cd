//! Operation records

use crate::cluster::{ClusterKey, Server};
use crate::provisioner::Provisioner;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Identifies an operation within a cluster
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationKey {
    pub account_id: String,
    pub cluster_name: String,
    pub operation_id: Uuid,
}

impl OperationKey {
    pub fn cluster_key(&self) -> ClusterKey {
        ClusterKey::new(self.account_id.clone(), self.cluster_name.clone())
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.account_id, self.cluster_name, self.operation_id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Shrink,
}

/// State of an operation record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    ShrinkInProgress,
    Completed,
    Failed,
}

impl OperationState {
    /// Terminal states are never left
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Completed | OperationState::Failed)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationState::ShrinkInProgress => "shrink_in_progress",
            OperationState::Completed => "completed",
            OperationState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Variables set by the cluster itself
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemVariables {
    pub cluster_name: String,
}

/// AWS provisioning parameters
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AwsVariables {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub vpc_id: String,
    #[serde(default)]
    pub key_pair: String,
}

/// Free-form provisioning variables attached to a request
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationVariables {
    #[serde(default)]
    pub system: SystemVariables,
    #[serde(default)]
    pub aws: AwsVariables,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// Saved provider variable names used to fill in missing request values
pub const VAR_AWS_REGION: &str = "aws_region";
pub const VAR_AWS_VPC_ID: &str = "aws_vpc_id";
pub const VAR_AWS_KEY_PAIR: &str = "aws_key_pair";

impl OperationVariables {
    /// Fill blank AWS parameters from the cluster's saved provisioner variables
    pub fn fill_from_cluster(&mut self, provider_vars: &BTreeMap<String, String>) {
        let fill = |target: &mut String, name: &str| {
            if target.is_empty() {
                if let Some(value) = provider_vars.get(name) {
                    *target = value.clone();
                }
            }
        };
        fill(&mut self.aws.region, VAR_AWS_REGION);
        fill(&mut self.aws.vpc_id, VAR_AWS_VPC_ID);
        fill(&mut self.aws.key_pair, VAR_AWS_KEY_PAIR);
    }
}

/// Shrink-specific part of an operation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShrinkState {
    /// Servers to remove; exactly one
    pub servers: Vec<Server>,
    pub force: bool,
    pub vars: OperationVariables,
    /// The node has already left the cluster, do not try to reach it
    pub node_removed: bool,
}

/// A persisted operation record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub account_id: String,
    pub cluster_name: String,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub created: DateTime<Utc>,
    pub created_by: String,
    pub updated: DateTime<Utc>,
    pub state: OperationState,
    pub provisioner: Provisioner,
    pub shrink: Option<ShrinkState>,
}

impl Operation {
    /// New in-progress shrink operation for the given cluster
    pub fn new_shrink(cluster: &ClusterKey, created_by: &str, provisioner: Provisioner, shrink: ShrinkState) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id: cluster.account_id.clone(),
            cluster_name: cluster.cluster_name.clone(),
            op_type: OperationType::Shrink,
            created: now,
            created_by: created_by.to_string(),
            updated: now,
            state: OperationState::ShrinkInProgress,
            provisioner,
            shrink: Some(shrink),
        }
    }

    pub fn key(&self) -> OperationKey {
        OperationKey {
            account_id: self.account_id.clone(),
            cluster_name: self.cluster_name.clone(),
            operation_id: self.id,
        }
    }

    pub fn cluster_key(&self) -> ClusterKey {
        ClusterKey::new(self.account_id.clone(), self.cluster_name.clone())
    }
}
