//! Input validation for signaling requests
//!
//! Every identifier a client hands us is checked here before it reaches
//! the room registry.

use std::sync::LazyLock;

/// Minimum room id length
pub const ROOM_ID_MIN: usize = 6;
/// Maximum room id length (a hyphenated UUID fits exactly)
pub const ROOM_ID_MAX: usize = 36;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid {field}: {message}")]
    Field { field: String, message: String },
}

impl ValidationError {
    fn field(field: &str, message: impl Into<String>) -> Self {
        Self::Field {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Name of the offending field
    #[must_use]
    pub fn field_name(&self) -> &str {
        match self {
            Self::Field { field, .. } => field,
        }
    }
}

/// Validation result
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Pre-compiled email validation regex: something@something.something, no whitespace
static EMAIL_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$")
        .expect("email validation regex is a compile-time constant and always valid")
});

/// Pre-compiled room id regex
static ROOM_ID_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[a-zA-Z0-9-]{6,36}$")
        .expect("room id regex is a compile-time constant and always valid")
});

/// Email validator
#[derive(Default)]
pub struct EmailValidator {}

impl EmailValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self, email: &str) -> ValidationResult<()> {
        if !EMAIL_REGEX.is_match(email) {
            return Err(ValidationError::field("email", "must be a valid email address"));
        }

        Ok(())
    }
}

/// Room id validator
#[derive(Default)]
pub struct RoomIdValidator {}

impl RoomIdValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self, room_id: &str) -> ValidationResult<()> {
        if room_id.len() < ROOM_ID_MIN || room_id.len() > ROOM_ID_MAX {
            return Err(ValidationError::field(
                "room_id",
                format!("must be between {ROOM_ID_MIN} and {ROOM_ID_MAX} characters"),
            ));
        }

        if !ROOM_ID_REGEX.is_match(room_id) {
            return Err(ValidationError::field(
                "room_id",
                "can only contain letters, numbers, and hyphens",
            ));
        }

        Ok(())
    }
}

/// Chat message validator
pub struct ChatMessageValidator {
    max_length: usize,
}

impl ChatMessageValidator {
    #[must_use]
    pub const fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    pub fn validate(&self, text: &str) -> ValidationResult<()> {
        if text.trim().is_empty() {
            return Err(ValidationError::field("message", "cannot be empty"));
        }

        if text.chars().count() > self.max_length {
            return Err(ValidationError::field(
                "message",
                format!("must be at most {} characters", self.max_length),
            ));
        }

        Ok(())
    }
}
