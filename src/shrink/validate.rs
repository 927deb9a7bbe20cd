use crate::cluster::{Cluster, Server};
use crate::error::{Result, ShrinkError};
use crate::operation::OperationVariables;
use crate::registry::{with_labels, RegistryServer, LABEL_HOSTNAME, LABEL_ROLE, ROLE_MASTER};
use serde::{Deserialize, Serialize};
use slog::{warn, Logger};

/// Request to remove a server from a cluster
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShrinkRequest {
    /// Hostnames of the servers to remove; exactly one is supported
    pub servers: Vec<String>,
    /// Continue past failures of non-critical steps and accept offline nodes
    #[serde(default)]
    pub force: bool,
    /// The node is already gone, do not try to reach it
    #[serde(default)]
    pub node_removed: bool,
    #[serde(default)]
    pub variables: OperationVariables,
    /// Identity of the requesting user
    #[serde(default)]
    pub created_by: String,
}

impl ShrinkRequest {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            servers: vec![hostname.into()],
            ..Default::default()
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_node_removed(mut self, node_removed: bool) -> Self {
        self.node_removed = node_removed;
        self
    }

    pub fn with_variables(mut self, variables: OperationVariables) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = created_by.into();
        self
    }
}

/// Check the request against the cluster snapshot and the live registry
///
/// Returns the server to remove.
pub fn validate_request(
    request: &ShrinkRequest,
    cluster: &Cluster,
    live: &[RegistryServer],
    logger: &Logger,
) -> Result<Server> {
    let [name] = request.servers.as_slice() else {
        return Err(ShrinkError::invalid_request(format!(
            "expected exactly one server to remove, got {}",
            request.servers.len()
        )));
    };

    if cluster.state.servers.len() == 1 && !request.force {
        return Err(ShrinkError::invalid_request(
            "cannot shrink 1-node cluster, use --force flag to uninstall",
        ));
    }

    let server = cluster.state.find_server(name)?.clone();

    let masters = with_labels(live, &[(LABEL_ROLE, ROLE_MASTER)]);
    if masters.is_empty() {
        return Err(ShrinkError::not_found("no master servers found"));
    }
    if masters.len() == 1 && masters[0].label(LABEL_HOSTNAME) == Some(server.hostname.as_str()) {
        return Err(ShrinkError::invalid_request("cannot remove the last master server"));
    }

    if with_labels(live, &[(LABEL_HOSTNAME, &server.hostname)]).is_empty() {
        if !request.force {
            return Err(ShrinkError::invalid_request(format!(
                "node {:?} is offline, add --force flag to force removal",
                name
            )));
        }
        warn!(logger, "Node is offline, forcing removal"; "server" => name);
    }

    Ok(server)
}
