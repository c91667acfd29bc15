//! Call invitation signaling for the Amora client.
//!
//! One call at a time: invitations arrive over the persistent socket and the
//! push delivery path, get deduplicated against the [`registry`], and drive a
//! single state machine in the [`engine`]. Media negotiation itself is out of
//! scope; the engine starts and stops a [`MediaSession`] and passes opaque
//! signaling payloads through to it.

pub mod config;
pub mod engine;
pub mod error;
pub mod push;
pub mod registry;
pub mod session;
pub mod socket;
pub mod supervisor;
pub mod types;
pub mod wire;

pub use config::CallConfig;
pub use engine::{
    CallAction, CallComponents, CallEngine, CallEngineBuilder, CallEngineHandle, MediaSession,
};
pub use error::CallError;
pub use push::{AppForeground, NativeCallUi, PushBridge};
pub use session::{CallSession, CallStatus, ConnectionState};
pub use socket::websocket::WebSocketTransportFactory;
pub use types::call::{
    CallId, CallInvitation, CallRole, CallType, DeclineReason, EndReason, UserId,
};
pub use types::events::{CallUpdate, EventKind, EventSource, SignalingEvent};
