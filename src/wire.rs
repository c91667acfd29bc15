//! Wire messages for the signaling channel and the push delivery path.
//!
//! The signaling channel carries JSON frames tagged by `type`. The push
//! service delivers data-only payloads with the same tagging convention, so
//! both paths normalize into the same [`SignalingEvent`] shape.

use serde::{Deserialize, Serialize};

use crate::types::call::{CallId, CallInvitation, CallType, DeclineReason, UserId};
use crate::types::events::{EventKind, EventSource, SignalingEvent};

/// Routing fields present on every call message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRoute {
    pub call_id: CallId,
    pub call_type: CallType,
    pub caller_id: UserId,
    pub recipient_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl CallRoute {
    pub fn from_invitation(invitation: &CallInvitation) -> Self {
        Self {
            call_id: invitation.call_id.clone(),
            call_type: invitation.call_type,
            caller_id: invitation.caller_id.clone(),
            recipient_id: invitation.recipient_id.clone(),
            conversation_id: invitation.conversation_id.clone(),
            group_id: invitation.group_id.clone(),
        }
    }

    pub fn into_invitation(self) -> CallInvitation {
        CallInvitation::new(
            self.call_id,
            self.caller_id,
            self.recipient_id,
            self.call_type,
            self.conversation_id,
            self.group_id,
        )
    }
}

/// A frame on the signaling channel, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Call offer. Sent by the caller to initiate; relayed to the callee.
    IncomingCall {
        #[serde(flatten)]
        route: CallRoute,
    },
    /// The callee accepted.
    CallAnswer {
        #[serde(flatten)]
        route: CallRoute,
    },
    /// The callee declined, with a reason.
    CallDecline {
        #[serde(flatten)]
        route: CallRoute,
        reason: DeclineReason,
    },
    /// The caller cancelled before the callee responded.
    CallCancel {
        #[serde(flatten)]
        route: CallRoute,
    },
    /// Either party hung up.
    CallEnd {
        #[serde(flatten)]
        route: CallRoute,
    },
    /// Opaque media-negotiation payload, passed through to the media session.
    CallSignaling {
        #[serde(flatten)]
        route: CallRoute,
        payload: serde_json::Value,
    },
}

impl WireMessage {
    pub fn route(&self) -> &CallRoute {
        match self {
            Self::IncomingCall { route }
            | Self::CallAnswer { route }
            | Self::CallDecline { route, .. }
            | Self::CallCancel { route }
            | Self::CallEnd { route }
            | Self::CallSignaling { route, .. } => route,
        }
    }

    pub fn call_id(&self) -> &CallId {
        &self.route().call_id
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::IncomingCall { .. } => EventKind::Incoming,
            Self::CallAnswer { .. } => EventKind::Accepted,
            Self::CallDecline { .. } => EventKind::Declined,
            Self::CallCancel { .. } => EventKind::Cancelled,
            Self::CallEnd { .. } => EventKind::Ended,
            Self::CallSignaling { .. } => EventKind::Signaling,
        }
    }

    /// Normalize into the event shape the engine consumes.
    ///
    /// Offers carry their routing fields as the event payload so the engine
    /// can build the invitation; signaling frames carry the opaque
    /// negotiation payload.
    pub fn into_event(self, source: EventSource) -> SignalingEvent {
        let kind = self.kind();
        let call_id = self.call_id().clone();
        let payload = match self {
            Self::IncomingCall { route } => serde_json::to_value(route).ok(),
            Self::CallSignaling { payload, .. } => Some(payload),
            _ => None,
        };
        let mut event = SignalingEvent::for_call(call_id, kind, source);
        if let Some(payload) = payload {
            event = event.with_payload(payload);
        }
        event
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Data-only push payload, delivered with high-priority/short-TTL semantics.
///
/// `incoming_call` additionally carries display fields for the native
/// incoming-call surface; `call_ended` lets a push-woken callee dismiss that
/// surface when the caller cancels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushPayload {
    IncomingCall {
        #[serde(flatten)]
        route: CallRoute,
        caller_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caller_photo: Option<String>,
    },
    CallEnded { call_id: CallId },
}

impl PushPayload {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_incoming_call_frame() {
        let text = r#"{
            "type": "incoming_call",
            "call_id": "AC90CFD09DF712D981142B172706F9F2",
            "call_type": "video",
            "caller_id": "u-1001",
            "recipient_id": "u-2002",
            "conversation_id": "conv-77"
        }"#;
        let msg = WireMessage::decode(text).unwrap();
        assert_eq!(msg.kind(), EventKind::Incoming);
        assert_eq!(msg.call_id().as_str(), "AC90CFD09DF712D981142B172706F9F2");

        let route = msg.route();
        assert_eq!(route.call_type, CallType::Video);
        assert_eq!(route.conversation_id.as_deref(), Some("conv-77"));
        assert!(route.group_id.is_none());
    }

    #[test]
    fn test_decline_roundtrip_keeps_reason() {
        let route = CallRoute {
            call_id: CallId::new("BC5BD1EDE9BBE601F408EF3795479E93"),
            call_type: CallType::Audio,
            caller_id: UserId::new("u-1"),
            recipient_id: UserId::new("u-2"),
            conversation_id: None,
            group_id: None,
        };
        let msg = WireMessage::CallDecline {
            route,
            reason: DeclineReason::Timeout,
        };
        let text = msg.encode().unwrap();
        assert!(text.contains("\"call_decline\""));
        assert!(text.contains("\"timeout\""));

        match WireMessage::decode(&text).unwrap() {
            WireMessage::CallDecline { reason, .. } => {
                assert_eq!(reason, DeclineReason::Timeout)
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_offer_event_carries_route_payload() {
        let route = CallRoute {
            call_id: CallId::new("C1"),
            call_type: CallType::Audio,
            caller_id: UserId::new("u-1"),
            recipient_id: UserId::new("u-2"),
            conversation_id: Some("conv-1".into()),
            group_id: None,
        };
        let event = WireMessage::IncomingCall { route }.into_event(EventSource::Socket);
        assert_eq!(event.kind, EventKind::Incoming);
        assert_eq!(event.source, EventSource::Socket);

        let parsed: CallRoute = serde_json::from_value(event.payload.unwrap()).unwrap();
        assert_eq!(parsed.call_id.as_str(), "C1");
        assert_eq!(parsed.conversation_id.as_deref(), Some("conv-1"));
    }

    #[test]
    fn test_parse_push_payloads() {
        let incoming = r#"{
            "type": "incoming_call",
            "call_id": "C2",
            "call_type": "audio",
            "caller_id": "u-1",
            "recipient_id": "u-2",
            "caller_name": "Sam",
            "caller_photo": "https://cdn.example/p.jpg"
        }"#;
        match PushPayload::decode(incoming).unwrap() {
            PushPayload::IncomingCall {
                route, caller_name, ..
            } => {
                assert_eq!(route.call_id.as_str(), "C2");
                assert_eq!(caller_name.as_deref(), Some("Sam"));
            }
            other => panic!("unexpected payload: {:?}", other),
        }

        let ended = r#"{"type": "call_ended", "call_id": "C2"}"#;
        match PushPayload::decode(ended).unwrap() {
            PushPayload::CallEnded { call_id } => assert_eq!(call_id.as_str(), "C2"),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_frame_type_is_rejected() {
        assert!(WireMessage::decode(r#"{"type": "profile_update"}"#).is_err());
    }
}
