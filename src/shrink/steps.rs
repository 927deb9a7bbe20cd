//! Removal steps and how their failures are handled

use crate::error::{Result, ShrinkError};
use slog::{warn, Logger};

/// What a step failure does to the operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    /// Always aborts
    Hard,
    /// Aborts unless the operation is forced, in which case it is logged and skipped
    SoftUnderForce,
    /// Logged and skipped
    BestEffort,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    SelectRunner,
    LaunchAgent,
    Unlabel,
    DisableElection,
    PreRemovalHook,
    Drain,
    DeleteNode,
    RemoveMember,
    Uninstall,
    Deprovision,
    PostRemovalHook,
    CleanupPackages,
    WaitForRemoval,
    DeletePeer,
    RemoveFromState,
    Complete,
}

impl Step {
    pub fn policy(self) -> Policy {
        match self {
            Step::SelectRunner | Step::Drain | Step::Deprovision | Step::RemoveFromState | Step::Complete => {
                Policy::Hard
            }
            Step::Uninstall | Step::WaitForRemoval => Policy::BestEffort,
            _ => Policy::SoftUnderForce,
        }
    }

    /// Completion percentage and message reported when the step starts
    pub fn progress(self) -> Option<(u8, &'static str)> {
        match self {
            Step::Unlabel => Some((10, "unregistering the node")),
            Step::DisableElection => Some((15, "disable planet elections")),
            Step::PreRemovalHook => Some((20, "running pre-removal hooks")),
            Step::Drain => Some((30, "draining the node")),
            Step::DeleteNode => Some((40, "removing the node from the kubernetes cluster")),
            Step::RemoveMember => Some((45, "removing the node from the database")),
            Step::Uninstall => Some((50, "uninstalling the system software")),
            Step::PostRemovalHook => Some((80, "running post-removal hooks")),
            Step::CleanupPackages => Some((85, "cleaning up packages")),
            Step::WaitForRemoval => Some((90, "waiting for operation to complete")),
            _ => None,
        }
    }

    /// Members and peers may already be gone
    pub fn tolerates_not_found(self) -> bool {
        matches!(self, Step::RemoveMember | Step::DeletePeer)
    }

    /// Verb phrase used in error context, as in "failed to ..."
    pub fn action(self) -> &'static str {
        match self {
            Step::SelectRunner => "select master runner",
            Step::LaunchAgent => "launch shrink agent",
            Step::Unlabel => "unregister the node",
            Step::DisableElection => "disable elections on the node",
            Step::PreRemovalHook => "run node-removing hook",
            Step::Drain => "drain the node",
            Step::DeleteNode => "remove the node from the cluster",
            Step::RemoveMember => "remove the node from the database",
            Step::Uninstall => "uninstall the system software",
            Step::Deprovision => "deprovision the node",
            Step::PostRemovalHook => "run node-removed hook",
            Step::CleanupPackages => "clean up packages",
            Step::WaitForRemoval => "wait for server to disappear",
            Step::DeletePeer => "remove the object peer for the node",
            Step::RemoveFromState => "remove the node from cluster state",
            Step::Complete => "complete the operation",
        }
    }
}

/// Where a step ran, for error context and logs
#[derive(Clone, Copy, Debug)]
pub struct StepContext<'a> {
    pub node: &'a str,
    pub cluster: &'a str,
    pub force: bool,
}

/// Apply the step's policy to its result
pub fn settle(step: Step, result: Result<()>, ctx: StepContext<'_>, logger: &Logger) -> Result<()> {
    let err = match result {
        Ok(()) => return Ok(()),
        Err(e) if e.is_not_found() && step.tolerates_not_found() => return Ok(()),
        Err(e) => e,
    };
    match step.policy() {
        Policy::Hard => Err(wrap(step, err, ctx)),
        Policy::SoftUnderForce if !ctx.force => Err(wrap(step, err, ctx)),
        Policy::SoftUnderForce => {
            warn!(logger, "Step failed, force continue"; "step" => step.action(), "error" => %err);
            Ok(())
        }
        Policy::BestEffort => {
            warn!(logger, "Step failed"; "step" => step.action(), "error" => %err);
            Ok(())
        }
    }
}

fn wrap(step: Step, err: ShrinkError, ctx: StepContext<'_>) -> ShrinkError {
    err.with_step(step.action(), ctx.node, ctx.cluster)
}
