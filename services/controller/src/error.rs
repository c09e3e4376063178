//! Controller error type and its scheduling classification.

use pac_reconcile::ErrorClass;
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::store::StoreError;

/// Result type for controller operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while reconciling a resource.
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected input (capacity, system type, malformed reference).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The outside world has not caught up yet.
    #[error("not ready: {0}")]
    NotReady(String),

    /// Unrecoverable without intervention.
    #[error("{0}")]
    Failed(String),

    /// A gateway call failed.
    #[error("{context}: {source}")]
    Gateway {
        context: String,
        #[source]
        source: GatewayError,
    },

    /// The resource store rejected a read or write.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl Error {
    /// Wrap a gateway failure with a human-readable description of the call.
    pub fn gateway(context: impl Into<String>, source: GatewayError) -> Self {
        Self::Gateway {
            context: context.into(),
            source,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) | Self::Failed(_) => ErrorClass::Terminal,
            Self::NotReady(_) => ErrorClass::Retryable,
            Self::Gateway { source, .. } => source.class(),
            Self::Store(StoreError::Conflict { .. }) => ErrorClass::Conflict,
            Self::Store(_) => ErrorClass::Retryable,
        }
    }
}
