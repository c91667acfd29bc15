//! Core call identity types.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque unique call identifier. This is the dedup key for all signaling:
/// every wire message, push payload, and timer is scoped to one `CallId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random call id (32 uppercase hex chars).
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::rng().fill(&mut bytes[..]);
        Self(hex::encode_upper(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque user identifier assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Media type of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    #[default]
    Audio,
    Video,
}

/// Which side of the call we are on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallRole {
    Caller,
    Callee,
}

/// Reason carried on an outbound `call_decline` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclineReason {
    /// The user explicitly declined.
    UserDeclined,
    /// The answer timer expired without a decision.
    Timeout,
    /// Another call was already active.
    Busy,
}

/// Why a call session reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Declined, either locally or by the remote peer.
    Declined,
    /// The caller cancelled before the callee responded.
    Cancelled,
    /// The ring/answer timer expired.
    Timeout,
    /// Rejected automatically because another call was active.
    Busy,
    /// Ended normally by either party after connecting.
    Hangup,
    /// Reconnection attempts were exhausted.
    ConnectionFailed,
    /// An outbound action could not be delivered before the timer expired.
    SendFailed,
    /// The media session reported a fault.
    MediaFailed,
    /// The engine was torn down while the call was in flight.
    Shutdown,
}

/// Identity and metadata of one call attempt.
///
/// Created when the local user initiates a call or when an incoming offer is
/// first observed for an unknown call id. Evicted from the registry once the
/// call reaches a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct CallInvitation {
    pub call_id: CallId,
    pub caller_id: UserId,
    pub recipient_id: UserId,
    pub call_type: CallType,
    pub conversation_id: Option<String>,
    pub group_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CallInvitation {
    pub fn new(
        call_id: CallId,
        caller_id: UserId,
        recipient_id: UserId,
        call_type: CallType,
        conversation_id: Option<String>,
        group_id: Option<String>,
    ) -> Self {
        Self {
            call_id,
            caller_id,
            recipient_id,
            call_type,
            conversation_id,
            group_id,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_call_ids_are_unique_hex() {
        let a = CallId::generate();
        let b = CallId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a.as_str(), a.as_str().to_uppercase());
    }

    #[test]
    fn test_decline_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&DeclineReason::UserDeclined).unwrap(),
            "\"user_declined\""
        );
        assert_eq!(
            serde_json::to_string(&DeclineReason::Busy).unwrap(),
            "\"busy\""
        );
    }
}
