//! Operation lifecycle: records, compare-and-swap store and progress reporting

pub mod progress;
pub mod store;
pub mod types;

pub use progress::{ProgressEntry, ProgressReporter, ProgressState, COMPLETED};
pub use store::{CreateOptions, InMemoryOperationStore, OperationStore, Swap};
pub use types::{
    AwsVariables, Operation, OperationKey, OperationState, OperationType, OperationVariables,
    ShrinkState, SystemVariables,
};
