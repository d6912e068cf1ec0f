//! Session error taxonomy
//!
//! Every failed request is answered with one of these. `code()` is stable
//! wire vocabulary; `public_message()` is what the client sees. Router
//! detail stays in the logs.

use crate::proto::ErrorBody;
use huddle_core::validation::ValidationError;
use huddle_sfu::{ProducerId, RegistryError, RouterError};
use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Malformed room id, email or chat text
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Malformed request frame or payload
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Referenced entity is gone, usually a race with a disconnect
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Entity exists but belongs to another connection
    #[error("{entity} {id} is not owned by this connection")]
    Forbidden { entity: &'static str, id: String },

    #[error("Connection already joined a room")]
    AlreadyJoined,

    /// Request arrived in the wrong protocol phase
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Room or server capacity exhausted
    #[error("Capacity reached: {0}")]
    Capacity(String),

    #[error("Transport creation failed: {0}")]
    TransportCreationFailed(RouterError),

    #[error("Capabilities cannot consume producer {0}")]
    IncompatibleCapabilities(ProducerId),

    /// The media router rejected an operation
    #[error("Failed to {operation}: {source}")]
    Adapter {
        operation: &'static str,
        source: RouterError,
    },

    /// The media router is gone
    #[error("Media router unavailable")]
    Unavailable,
}

impl SessionError {
    /// Wrap a router failure, promoting a closed router to `Unavailable`
    #[must_use]
    pub fn adapter(operation: &'static str, source: RouterError) -> Self {
        match source {
            RouterError::Closed => Self::Unavailable,
            source => Self::Adapter { operation, source },
        }
    }

    #[must_use]
    pub fn transport_creation(source: RouterError) -> Self {
        match source {
            RouterError::Closed => Self::Unavailable,
            source => Self::TransportCreationFailed(source),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::BadRequest(_) => "bad_request",
            Self::NotFound { .. } => "not_found",
            Self::Forbidden { .. } => "forbidden",
            Self::AlreadyJoined => "already_joined",
            Self::InvalidState(_) => "invalid_state",
            Self::Capacity(_) => "capacity",
            Self::TransportCreationFailed(_) => "transport_creation_failed",
            Self::IncompatibleCapabilities(_) => "incompatible_capabilities",
            Self::Adapter { .. } => "adapter_failure",
            Self::Unavailable => "unavailable",
        }
    }

    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(ValidationError::Field { field, .. }) => match field.as_str() {
                "email" => "Please enter a valid email.".to_string(),
                "room_id" => "Invalid meeting code.".to_string(),
                _ => self.to_string(),
            },
            Self::BadRequest(_) | Self::NotFound { .. } | Self::Forbidden { .. } => self.to_string(),
            Self::AlreadyJoined => "Already joined a room".to_string(),
            Self::InvalidState(message) | Self::Capacity(message) => message.clone(),
            Self::TransportCreationFailed(_) => "Failed to create transport".to_string(),
            Self::IncompatibleCapabilities(_) => "Cannot consume this producer".to_string(),
            Self::Adapter { operation, .. } => format!("Failed to {operation}"),
            Self::Unavailable => "Media service unavailable".to_string(),
        }
    }

    /// Wire form, optionally tagged with the request event for pushes
    #[must_use]
    pub fn to_body(&self, event: Option<&str>) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            message: self.public_message(),
            event: event.map(str::to_string),
        }
    }
}

impl From<RegistryError> for SessionError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound { entity, id } => Self::NotFound { entity, id },
            RegistryError::Forbidden { entity, id } => Self::Forbidden { entity, id },
            RegistryError::Conflict(message) => Self::InvalidState(message),
            RegistryError::Limit(message) => Self::Capacity(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::validation::{EmailValidator, RoomIdValidator};

    #[test]
    fn test_validation_messages_match_join_page() {
        let err: SessionError = EmailValidator::new().validate("guest").unwrap_err().into();
        assert_eq!(err.code(), "validation_error");
        assert_eq!(err.public_message(), "Please enter a valid email.");

        let err: SessionError = RoomIdValidator::new().validate("abc").unwrap_err().into();
        assert_eq!(err.public_message(), "Invalid meeting code.");
    }

    #[test]
    fn test_adapter_detail_stays_private() {
        let err = SessionError::adapter(
            "produce",
            RouterError::UnsupportedCodec("video/AV1".to_string()),
        );
        assert_eq!(err.code(), "adapter_failure");
        assert_eq!(err.public_message(), "Failed to produce");
        assert!(err.to_string().contains("AV1"));

        let err = SessionError::transport_creation(RouterError::PortsExhausted { min: 1, max: 2 });
        assert_eq!(err.public_message(), "Failed to create transport");
    }

    #[test]
    fn test_closed_router_is_unavailable() {
        assert_eq!(SessionError::adapter("consume", RouterError::Closed), SessionError::Unavailable);
        assert_eq!(SessionError::transport_creation(RouterError::Closed), SessionError::Unavailable);
    }

    #[test]
    fn test_registry_errors_map_to_taxonomy() {
        let err: SessionError = RegistryError::Forbidden {
            entity: "transport",
            id: "t1".to_string(),
        }
        .into();
        assert_eq!(err.code(), "forbidden");

        let err: SessionError = RegistryError::Conflict("transport t1 is new".to_string()).into();
        assert_eq!(err.code(), "invalid_state");

        let err: SessionError = RegistryError::Limit("room abc123 is full".to_string()).into();
        assert_eq!(err.to_body(Some("join-room")).event.as_deref(), Some("join-room"));
    }
}
