//! Call session state machine.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::call::{CallInvitation, CallRole, EndReason};
use crate::types::events::CallUpdate;

/// Current state of a call attempt.
#[derive(Debug, Clone, Serialize)]
pub enum CallStatus {
    /// Outgoing call: invite sent, waiting for the callee.
    Outgoing { dialed_at: DateTime<Utc> },
    /// Incoming call: ringing locally, waiting for the user.
    Incoming { received_at: DateTime<Utc> },
    /// Call accepted, media session being established.
    Connecting { accepted_at: DateTime<Utc> },
    /// Call active with media flowing.
    Active { connected_at: DateTime<Utc> },
    /// Call ended. Terminal for this call id.
    Ended {
        reason: EndReason,
        ended_at: DateTime<Utc>,
        duration_secs: Option<i64>,
    },
}

impl CallStatus {
    pub fn is_ringing(&self) -> bool {
        matches!(self, Self::Outgoing { .. } | Self::Incoming { .. })
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Ended { .. })
    }

    pub fn can_accept(&self) -> bool {
        matches!(self, Self::Incoming { .. })
    }

    pub fn can_decline(&self) -> bool {
        matches!(self, Self::Incoming { .. })
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Outgoing { .. })
    }
}

/// Liveness of the signaling/media path for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// State transitions applied by the engine.
#[derive(Debug, Clone)]
pub enum SessionTransition {
    LocalAccepted,
    RemoteAccepted,
    MediaConnected,
    Terminated { reason: EndReason },
}

/// The engine's working record for the one call attempt in flight.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub invitation: CallInvitation,
    pub role: CallRole,
    pub status: CallStatus,
    pub connection: ConnectionState,
    pub reconnect_attempts: u32,
}

impl CallSession {
    pub fn new_outgoing(invitation: CallInvitation) -> Self {
        Self {
            invitation,
            role: CallRole::Caller,
            status: CallStatus::Outgoing {
                dialed_at: Utc::now(),
            },
            connection: ConnectionState::Disconnected,
            reconnect_attempts: 0,
        }
    }

    pub fn new_incoming(invitation: CallInvitation) -> Self {
        Self {
            invitation,
            role: CallRole::Callee,
            status: CallStatus::Incoming {
                received_at: Utc::now(),
            },
            connection: ConnectionState::Disconnected,
            reconnect_attempts: 0,
        }
    }

    /// When media started flowing, if the call ever connected.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            CallStatus::Active { connected_at } => Some(connected_at),
            _ => None,
        }
    }

    /// Apply a state transition. Returns an error if the transition is not
    /// valid from the current state.
    pub fn apply_transition(
        &mut self,
        transition: SessionTransition,
    ) -> Result<(), InvalidTransition> {
        let new_status = match (&self.status, transition) {
            (CallStatus::Outgoing { .. }, SessionTransition::RemoteAccepted) => {
                CallStatus::Connecting {
                    accepted_at: Utc::now(),
                }
            }
            (CallStatus::Incoming { .. }, SessionTransition::LocalAccepted) => {
                CallStatus::Connecting {
                    accepted_at: Utc::now(),
                }
            }
            (CallStatus::Connecting { .. }, SessionTransition::MediaConnected) => {
                self.connection = ConnectionState::Connected;
                CallStatus::Active {
                    connected_at: Utc::now(),
                }
            }
            (
                CallStatus::Outgoing { .. } | CallStatus::Incoming { .. }
                | CallStatus::Connecting { .. },
                SessionTransition::Terminated { reason },
            ) => {
                if reason == EndReason::ConnectionFailed {
                    self.connection = ConnectionState::Failed;
                } else {
                    self.connection = ConnectionState::Disconnected;
                }
                CallStatus::Ended {
                    reason,
                    ended_at: Utc::now(),
                    duration_secs: None,
                }
            }
            (
                CallStatus::Active { connected_at },
                SessionTransition::Terminated { reason },
            ) => {
                let duration = Utc::now()
                    .signed_duration_since(*connected_at)
                    .num_seconds();
                if reason == EndReason::ConnectionFailed {
                    self.connection = ConnectionState::Failed;
                } else {
                    self.connection = ConnectionState::Disconnected;
                }
                CallStatus::Ended {
                    reason,
                    ended_at: Utc::now(),
                    duration_secs: Some(duration),
                }
            }
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: format!("{:?}", current),
                    attempted: format!("{:?}", transition),
                });
            }
        };
        self.status = new_status;
        Ok(())
    }

    /// Snapshot for the update channel.
    pub fn snapshot(&self) -> CallUpdate {
        let missed = self.role == CallRole::Callee
            && matches!(
                self.status,
                CallStatus::Ended {
                    reason: EndReason::Timeout | EndReason::Cancelled,
                    ..
                }
            );
        CallUpdate {
            call_id: self.invitation.call_id.clone(),
            role: self.role,
            call_type: self.invitation.call_type,
            status: self.status.clone(),
            connection: self.connection,
            reconnect_attempts: self.reconnect_attempts,
            missed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}
