use thiserror::Error;

/// Canonical error type for run lifecycle and persistence operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Entity was not found in the store or the live registry.
    #[error("{entity} `{id}` was not found")]
    NotFound {
        /// Entity type name (e.g. `"run"`).
        entity: &'static str,
        /// Identifier of the missing entity.
        id: String,
    },

    /// Entity already exists and cannot be created again.
    #[error("{entity} `{id}` already exists")]
    AlreadyExists {
        /// Entity type name.
        entity: &'static str,
        /// Identifier that conflicts.
        id: String,
    },

    /// A start parameter is outside its permitted envelope.
    #[error("invalid parameter: {message}")]
    InvalidParameter {
        /// Human-readable description of the violation.
        message: String,
    },

    /// The requested target is not allowed to be load-tested.
    #[error("target rejected: {message}")]
    TargetRejected {
        /// Why the target was refused.
        message: String,
    },

    /// The caller started runs too frequently.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Human-readable rate-limit message.
        message: String,
    },

    /// A global or per-caller concurrency cap is full.
    #[error("capacity exceeded: {message}")]
    CapacityExceeded {
        /// Which cap was hit.
        message: String,
    },

    /// Durable store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Unexpected internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable details for debugging purposes.
        message: String,
    },

    /// I/O error occurred during file or network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Creates a `NotFound` variant.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates an `AlreadyExists` variant.
    #[must_use]
    pub fn already_exists(entity: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.into(),
        }
    }

    /// Creates an `InvalidParameter` variant.
    #[must_use]
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Creates a `TargetRejected` variant.
    #[must_use]
    pub fn target_rejected(message: impl Into<String>) -> Self {
        Self::TargetRejected {
            message: message.into(),
        }
    }

    /// Creates a `RateLimited` variant.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
        }
    }

    /// Creates a `CapacityExceeded` variant.
    #[must_use]
    pub fn capacity_exceeded(message: impl Into<String>) -> Self {
        Self::CapacityExceeded {
            message: message.into(),
        }
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Convenient result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
