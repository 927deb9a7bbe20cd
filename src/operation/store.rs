//! Operation store
//!
//! Persists operation records. Every state change after creation goes through
//! [`OperationStore::compare_and_swap`], so two orchestrator instances racing on
//! the same operation cannot both win: the stale writer gets a conflict.

use super::types::{Operation, OperationKey, OperationState};
use crate::cluster::ClusterKey;
use crate::error::{Result, ShrinkError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Options for creating an operation
#[derive(Clone, Copy, Debug, Default)]
pub struct CreateOptions {
    /// Create even if another operation is still active for the cluster
    pub force: bool,
}

/// A compare-and-swap transition request
#[derive(Clone, Debug)]
pub struct Swap {
    pub key: OperationKey,
    /// The stored state must be one of these for the swap to apply
    pub expected_states: Vec<OperationState>,
    pub new_state: OperationState,
}

#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Persist a new operation record
    ///
    /// Fails with a conflict if another non-terminal operation exists for the
    /// same cluster, unless `options.force` is set.
    async fn create_operation(&self, operation: Operation, options: CreateOptions) -> Result<OperationKey>;

    async fn get_operation(&self, key: &OperationKey) -> Result<Operation>;

    /// Atomically move an operation to `swap.new_state`
    ///
    /// Returns the updated record, or a conflict if the stored state is not
    /// one of `swap.expected_states`.
    async fn compare_and_swap(&self, swap: Swap) -> Result<Operation>;

    /// All operations of a cluster, oldest first
    async fn list_operations(&self, cluster: &ClusterKey) -> Result<Vec<Operation>>;
}

/// Operation store kept in process memory
///
/// The whole store can be serialized with [`snapshot`](Self::snapshot) and
/// loaded into a fresh instance with [`restore`](Self::restore).
#[derive(Debug, Default)]
pub struct InMemoryOperationStore {
    operations: Mutex<HashMap<OperationKey, Operation>>,
}

impl InMemoryOperationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize all records to JSON
    pub async fn snapshot(&self) -> Result<Vec<u8>> {
        let operations = self.operations.lock().await;
        let mut records: Vec<&Operation> = operations.values().collect();
        records.sort_by_key(|op| op.created);
        Ok(serde_json::to_vec(&records)?)
    }

    /// Replace all records with the contents of a snapshot
    pub async fn restore(&self, snapshot: &[u8]) -> Result<()> {
        let records: Vec<Operation> = serde_json::from_slice(snapshot)?;
        let mut operations = self.operations.lock().await;
        *operations = records.into_iter().map(|op| (op.key(), op)).collect();
        Ok(())
    }
}

#[async_trait]
impl OperationStore for InMemoryOperationStore {
    async fn create_operation(&self, operation: Operation, options: CreateOptions) -> Result<OperationKey> {
        let mut operations = self.operations.lock().await;
        let key = operation.key();

        if operations.contains_key(&key) {
            return Err(ShrinkError::conflict(format!("operation {} already exists", key)));
        }

        if !options.force {
            let active = operations
                .values()
                .find(|op| {
                    op.account_id == key.account_id && op.cluster_name == key.cluster_name && !op.state.is_terminal()
                });
            if let Some(active) = active {
                return Err(ShrinkError::conflict(format!(
                    "operation {} is in progress ({}), use force to override",
                    active.id, active.state
                )));
            }
        }

        operations.insert(key.clone(), operation);
        Ok(key)
    }

    async fn get_operation(&self, key: &OperationKey) -> Result<Operation> {
        let operations = self.operations.lock().await;
        operations
            .get(key)
            .cloned()
            .ok_or_else(|| ShrinkError::not_found(format!("operation {} not found", key)))
    }

    async fn compare_and_swap(&self, swap: Swap) -> Result<Operation> {
        let mut operations = self.operations.lock().await;
        let operation = operations
            .get_mut(&swap.key)
            .ok_or_else(|| ShrinkError::not_found(format!("operation {} not found", swap.key)))?;

        if !swap.expected_states.contains(&operation.state) {
            return Err(ShrinkError::conflict(format!(
                "operation {} is in state {}, expected one of {:?}",
                swap.key, operation.state, swap.expected_states
            )));
        }

        operation.state = swap.new_state;
        operation.updated = Utc::now();
        Ok(operation.clone())
    }

    async fn list_operations(&self, cluster: &ClusterKey) -> Result<Vec<Operation>> {
        let operations = self.operations.lock().await;
        let mut result: Vec<Operation> = operations
            .values()
            .filter(|op| op.account_id == cluster.account_id && op.cluster_name == cluster.cluster_name)
            .cloned()
            .collect();
        result.sort_by_key(|op| op.created);
        Ok(result)
    }
}
