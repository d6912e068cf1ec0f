//! Registry-side transport records

use crate::types::{TransportDirection, TransportId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection state of a transport
///
/// `new → connecting → connected → closed`, with `failed` absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Failed,
    Closed,
}

impl TransportState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }

    /// Whether `next` is a legal transition from this state
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::New, Self::Connecting)
                | (Self::Connecting, Self::Connected | Self::Failed)
                | (Self::New | Self::Connecting | Self::Connected, Self::Closed)
        )
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transport owned by exactly one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRecord {
    pub id: TransportId,
    pub direction: TransportDirection,
    pub state: TransportState,
    pub created_at: DateTime<Utc>,
}

impl TransportRecord {
    #[must_use]
    pub fn new(id: TransportId, direction: TransportDirection) -> Self {
        Self {
            id,
            direction,
            state: TransportState::New,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == TransportState::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use TransportState::*;

        assert!(New.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Failed));
        assert!(Connected.can_transition_to(Closed));

        assert!(!New.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Failed.can_transition_to(Connecting));
        assert!(!Failed.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(New));
    }

    #[test]
    fn test_new_record_starts_fresh() {
        let record = TransportRecord::new(TransportId::from("t1"), TransportDirection::Recv);
        assert_eq!(record.state, TransportState::New);
        assert!(!record.is_connected());
    }
}
