//! Normalized signaling events and observer updates.
//!
//! Both delivery channels (socket and push) and all local timers produce the
//! same [`SignalingEvent`] shape, so the engine consumes a single ordered
//! queue regardless of where an event originated.

use serde::Serialize;

use crate::session::{CallStatus, ConnectionState};
use crate::types::call::{CallId, CallRole, CallType};

/// Where an event was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// The persistent signaling socket.
    Socket,
    /// The out-of-band push delivery path.
    Push,
    /// A timer or supervisor inside this process.
    Local,
}

/// What happened. `(call_id, kind)` is the dedup key: the first arrival wins
/// and later copies from the other channel are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Incoming,
    Accepted,
    Declined,
    Cancelled,
    Ended,
    Timeout,
    Signaling,
    ChannelConnected,
    ChannelLost,
    ChannelLostFinal,
}

impl EventKind {
    /// Kinds that terminate a call attempt on arrival.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Declined | Self::Cancelled | Self::Ended)
    }
}

/// The normalized unit consumed by the call engine.
///
/// Channel-scope events (`ChannelConnected` / `ChannelLost`) carry no call
/// id; everything else is scoped to exactly one call attempt.
#[derive(Debug, Clone)]
pub struct SignalingEvent {
    pub call_id: Option<CallId>,
    pub kind: EventKind,
    pub payload: Option<serde_json::Value>,
    pub source: EventSource,
}

impl SignalingEvent {
    pub fn for_call(call_id: CallId, kind: EventKind, source: EventSource) -> Self {
        Self {
            call_id: Some(call_id),
            kind,
            payload: None,
            source,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn channel(kind: EventKind) -> Self {
        Self {
            call_id: None,
            kind,
            payload: None,
            source: EventSource::Socket,
        }
    }
}

/// Snapshot published on the update channel after every state transition.
#[derive(Debug, Clone, Serialize)]
pub struct CallUpdate {
    pub call_id: CallId,
    pub role: CallRole,
    pub call_type: CallType,
    pub status: CallStatus,
    pub connection: ConnectionState,
    pub reconnect_attempts: u32,
    /// Set on the terminal update of a callee-side call the user never
    /// answered (rang out or the caller hung up first).
    pub missed: bool,
}
