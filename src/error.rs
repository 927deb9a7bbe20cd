//! Error types for shrink operations

use thiserror::Error;

/// Result type for shrink operations
pub type Result<T> = std::result::Result<T, ShrinkError>;

/// Coarse classification of a [`ShrinkError`]
///
/// Retry loops and NotFound normalization look at the kind rather than
/// matching on variants, so a context-wrapped error classifies the same
/// way as the error it wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    NotFound,
    AlreadyExists,
    Conflict,
    Timeout,
    Transient,
    Internal,
}

/// Errors that can occur while validating or executing a shrink operation
#[derive(Debug, Error)]
pub enum ShrinkError {
    /// Precondition or configuration violation, never retried
    #[error("{0}")]
    InvalidRequest(String),

    /// A required resource is missing
    #[error("{0}")]
    NotFound(String),

    /// A resource still exists when it was expected to be gone
    #[error("{0}")]
    AlreadyExists(String),

    /// The operation record was changed by a concurrent writer
    #[error("{0}")]
    Conflict(String),

    /// A bounded wait expired
    #[error("timeout waiting for {0}")]
    Timeout(String),

    /// Network or transport failure, retried with backoff
    #[error("{0}")]
    Transient(String),

    /// The operation task panicked or was cancelled
    #[error("{0}")]
    Internal(String),

    /// A remote command failed; `output` is whatever it printed
    #[error("{source}{}", output_suffix(.output))]
    Command {
        output: Vec<u8>,
        #[source]
        source: Box<ShrinkError>,
    },

    /// A pipeline step failed
    #[error("failed to {step} (node {node}, cluster {cluster}): {source}")]
    Step {
        step: String,
        node: String,
        cluster: String,
        #[source]
        source: Box<ShrinkError>,
    },
}

impl ShrinkError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        ShrinkError::InvalidRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ShrinkError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        ShrinkError::Conflict(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        ShrinkError::Transient(msg.into())
    }

    pub fn timeout(what: impl Into<String>) -> Self {
        ShrinkError::Timeout(what.into())
    }

    /// Classify this error, looking through step context
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShrinkError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ShrinkError::NotFound(_) => ErrorKind::NotFound,
            ShrinkError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            ShrinkError::Conflict(_) => ErrorKind::Conflict,
            ShrinkError::Timeout(_) => ErrorKind::Timeout,
            ShrinkError::Transient(_) => ErrorKind::Transient,
            ShrinkError::Internal(_) => ErrorKind::Internal,
            ShrinkError::Command { source, .. } | ShrinkError::Step { source, .. } => source.kind(),
        }
    }

    /// Output of the failed remote command, looking through step context
    pub fn output(&self) -> Option<&[u8]> {
        match self {
            ShrinkError::Command { output, .. } => Some(output.as_slice()),
            ShrinkError::Step { source, .. } => source.output(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Transient and timeout errors are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Timeout)
    }

    /// Attach the output of a failed remote command
    ///
    /// # Arguments
    /// * `output` - Combined output the command produced before failing
    pub fn with_output(self, output: impl Into<Vec<u8>>) -> Self {
        ShrinkError::Command {
            output: output.into(),
            source: Box::new(self),
        }
    }

    /// Attach pipeline step context
    pub fn with_step(self, step: &str, node: &str, cluster: &str) -> Self {
        ShrinkError::Step {
            step: step.to_string(),
            node: node.to_string(),
            cluster: cluster.to_string(),
            source: Box::new(self),
        }
    }
}

fn output_suffix(output: &[u8]) -> String {
    let text = String::from_utf8_lossy(output);
    let text = text.trim();
    if text.is_empty() {
        String::new()
    } else {
        format!(", output: {}", text)
    }
}

impl From<serde_json::Error> for ShrinkError {
    fn from(err: serde_json::Error) -> Self {
        ShrinkError::InvalidRequest(format!("malformed JSON: {}", err))
    }
}
