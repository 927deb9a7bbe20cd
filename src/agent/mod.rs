//! Shrink agent provisioning
//!
//! When the node being removed is still online, a short-lived agent is started
//! on it so node-local cleanup (system uninstall) can run there.

mod launch;
pub mod token;

pub use launch::AgentLauncher;
pub use token::{InMemoryTokenStore, ProvisioningToken, TokenStore, TokenType};

use crate::error::Result;
use crate::operation::OperationKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A server reported by a connected agent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentServerInfo {
    pub advertise_addr: String,
    pub hostname: String,
}

/// Agents connected for an operation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentReport {
    pub servers: Vec<AgentServerInfo>,
    /// Human-readable status, e.g. why no agent is ready yet
    #[serde(default)]
    pub message: String,
}

/// Service tracking agents connected for operations
#[async_trait]
pub trait AgentService: Send + Sync {
    /// Wait until agents for the operation report in
    ///
    /// Callers bound this with their own timeout.
    async fn wait_for_agents(&self, key: &OperationKey) -> Result<AgentReport>;

    /// Run a command through the agent at `address`
    async fn exec(&self, key: &OperationKey, address: &str, args: &[String]) -> Result<Vec<u8>>;

    /// Shut down all agents of the operation
    async fn stop_agents(&self, key: &OperationKey) -> Result<()>;
}
