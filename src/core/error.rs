use ulid::Ulid;

/// Every failure the core can surface. Capacity and state-machine
/// violations are deterministic business outcomes; only `Storage` errors
/// tagged retryable are ever retried.
#[derive(Debug)]
pub enum CoreError {
    NotFound {
        kind: &'static str,
        id: Ulid,
    },
    Conflict(String),
    /// Optimistic version check failed: the row moved on (or vanished)
    /// since the caller observed its version.
    Concurrency {
        kind: &'static str,
        id: Ulid,
    },
    Validation(String),
    /// Coordinator `with_lock` exceeded its max wait. The caller may retry
    /// the whole operation.
    LockTimeout(String),
    /// Storage-layer failure, tagged retryable (deadlock/timeout class) or
    /// permanent by the layer that raised it.
    Storage {
        retryable: bool,
        message: String,
    },
}

impl CoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Storage { retryable: true, .. })
    }

    pub(crate) fn storage(message: impl Into<String>) -> Self {
        CoreError::Storage {
            retryable: false,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::NotFound { kind, id } => write!(f, "{kind} with id {id} not found"),
            CoreError::Conflict(msg) => write!(f, "{msg}"),
            CoreError::Concurrency { kind, .. } => {
                write!(f, "{kind} was modified by another operation")
            }
            CoreError::Validation(msg) => write!(f, "{msg}"),
            CoreError::LockTimeout(key) => write!(f, "failed to acquire lock for key: {key}"),
            CoreError::Storage { retryable, message } => {
                if *retryable {
                    write!(f, "transient storage error: {message}")
                } else {
                    write!(f, "storage error: {message}")
                }
            }
        }
    }
}

impl std::error::Error for CoreError {}
