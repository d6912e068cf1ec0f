//! Error types for the SFU module

use thiserror::Error;

/// Failures reported by a media router
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    #[error("Media router is closed")]
    Closed,

    #[error("Router {entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("No free RTC port in {min}-{max}")]
    PortsExhausted { min: u16, max: u16 },

    #[error("Operation rejected: {0}")]
    Rejected(String),
}

impl RouterError {
    pub(crate) fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Registry error types
///
/// The registry never silently ignores an invariant violation; callers
/// decide how to surface these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Referenced entity is absent, usually a race with a disconnect
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Entity exists but belongs to another peer
    #[error("{entity} {id} is not owned by the caller")]
    Forbidden { entity: &'static str, id: String },

    /// Entity exists but is in the wrong state for the mutation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A configured capacity limit was hit
    #[error("Limit reached: {0}")]
    Limit(String),
}

impl RegistryError {
    pub(crate) fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Result type for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
