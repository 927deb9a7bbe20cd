//! Node removal orchestration for multi-node clusters
//!
//! A shrink operation takes one server out of a running cluster: it is
//! unregistered from the orchestrator, drained, removed from the coordination
//! store, uninstalled (when reachable), deprovisioned and finally dropped from
//! the persisted cluster state. See [`shrink::ShrinkService`].

pub mod agent;
pub mod cluster;
pub mod commands;
pub mod config;
pub mod error;
pub mod leadership;
pub mod logging;
pub mod manifest;
pub mod membership;
pub mod operation;
pub mod packages;
pub mod provisioner;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod secrets;
pub mod shrink;

pub use cluster::{Cluster, ClusterBackend, ClusterKey, ClusterState, Server, ServerRole};
pub use config::ShrinkConfig;
pub use error::{ErrorKind, Result, ShrinkError};
pub use operation::{
    InMemoryOperationStore, Operation, OperationKey, OperationState, OperationStore, ProgressEntry, ProgressState,
};
pub use provisioner::{CloudProvider, CredentialStore, Provisioner};
pub use shrink::{ShrinkDeps, ShrinkRequest, ShrinkService, ShrinkTask};
