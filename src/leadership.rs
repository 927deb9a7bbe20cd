//! Orchestrator leadership and node draining handles

use crate::error::Result;
use async_trait::async_trait;
use slog::{info, Logger};
use std::sync::atomic::{AtomicBool, Ordering};

/// Leadership of the process running the operation
#[async_trait]
pub trait Leadership: Send + Sync {
    /// Give up leadership so a process on another host takes over. Idempotent.
    async fn step_down(&self) -> Result<()>;
}

/// Leadership flag held in process memory
pub struct LocalLeadership {
    leader: AtomicBool,
    logger: Logger,
}

impl LocalLeadership {
    pub fn new(logger: Logger) -> Self {
        Self {
            leader: AtomicBool::new(true),
            logger,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Leadership for LocalLeadership {
    async fn step_down(&self) -> Result<()> {
        if self.leader.swap(false, Ordering::SeqCst) {
            info!(self.logger, "Stepped down as leader");
        }
        Ok(())
    }
}

/// Evicts workloads from an orchestration node
#[async_trait]
pub trait NodeDrainer: Send + Sync {
    async fn drain(&self, kube_node_id: &str) -> Result<()>;
}
