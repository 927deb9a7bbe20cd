//! Remote command execution
//!
//! A [`ServerRunner`] pairs a target server with an execution channel:
//! - control plane: the cluster's command transport, used against live masters
//!   (and to start the shrink agent on the removed node)
//! - agent: a short-lived agent launched on the removed node for this operation

mod agent;
mod control_plane;

pub use agent::AgentRunner;
pub use control_plane::{pick_master_runner, ControlPlaneRunner, ControlPlaneTransport};

use crate::error::Result;
use async_trait::async_trait;
use slog::{error, Logger};
use std::fmt;
use std::sync::Arc;

/// Where a command runs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunnerTarget {
    pub hostname: String,
    pub address: String,
}

/// Which channel carries the command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    ControlPlane,
    Agent,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::ControlPlane => f.write_str("control-plane"),
            Channel::Agent => f.write_str("agent"),
        }
    }
}

/// Execution strategy: run a command on a target and return its output
///
/// A failing command reports what it printed through
/// [`ShrinkError::with_output`](crate::error::ShrinkError::with_output).
#[async_trait]
pub trait CommandRunner: Send + Sync {
    fn channel(&self) -> Channel;

    async fn run(&self, target: &RunnerTarget, args: &[String]) -> Result<Vec<u8>>;
}

/// A command runner bound to one target server
#[derive(Clone)]
pub struct ServerRunner {
    target: RunnerTarget,
    runner: Arc<dyn CommandRunner>,
    logger: Logger,
}

impl ServerRunner {
    pub fn new(target: RunnerTarget, runner: Arc<dyn CommandRunner>, logger: Logger) -> Self {
        Self { target, runner, logger }
    }

    pub fn target(&self) -> &RunnerTarget {
        &self.target
    }

    pub fn channel(&self) -> Channel {
        self.runner.channel()
    }

    /// Run a command on the target; failures are logged with their output
    ///
    /// # Arguments
    /// * `args` - Command line, program first
    ///
    /// # Returns
    /// * Combined output of the command, or the error it failed with
    pub async fn run(&self, args: &[String]) -> Result<Vec<u8>> {
        match self.runner.run(&self.target, args).await {
            Ok(out) => Ok(out),
            Err(e) => {
                let output = String::from_utf8_lossy(e.output().unwrap_or(&[])).into_owned();
                error!(self.logger, "Failed to run";
                    "command" => redacted(args),
                    "output" => output,
                    "host" => &self.target.hostname,
                    "addr" => &self.target.address,
                    "channel" => %self.channel(),
                    "error" => %e
                );
                Err(e)
            }
        }
    }
}

const SECRET_FLAGS: &[&str] = &["--token"];

/// Join a command line for logging with secret flag values masked
fn redacted(args: &[String]) -> String {
    let mut masked = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for arg in args {
        if hide_next {
            masked.push("<redacted>".to_string());
            hide_next = false;
            continue;
        }
        match arg.split_once('=') {
            Some((flag, _)) if SECRET_FLAGS.contains(&flag) => masked.push(format!("{}=<redacted>", flag)),
            _ => {
                hide_next = SECRET_FLAGS.contains(&arg.as_str());
                masked.push(arg.clone());
            }
        }
    }
    masked.join(" ")
}

impl fmt::Debug for ServerRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerRunner")
            .field("target", &self.target)
            .field("channel", &self.channel())
            .finish()
    }
}
