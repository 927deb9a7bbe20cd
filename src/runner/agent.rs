use super::{Channel, CommandRunner, RunnerTarget};
use crate::agent::AgentService;
use crate::error::Result;
use crate::operation::OperationKey;
use async_trait::async_trait;
use std::sync::Arc;

/// Runs commands through the agent launched for an operation
pub struct AgentRunner {
    key: OperationKey,
    agents: Arc<dyn AgentService>,
}

impl AgentRunner {
    pub fn new(key: OperationKey, agents: Arc<dyn AgentService>) -> Self {
        Self { key, agents }
    }
}

#[async_trait]
impl CommandRunner for AgentRunner {
    fn channel(&self) -> Channel {
        Channel::Agent
    }

    async fn run(&self, target: &RunnerTarget, args: &[String]) -> Result<Vec<u8>> {
        self.agents.exec(&self.key, &target.address, args).await
    }
}
