//! Push notification bridge.
//!
//! Call invitations can arrive out-of-band through the platform push
//! service while the socket is down or the app is not running. The bridge
//! normalizes those payloads into the same event shape the socket adapter
//! produces and routes them through the registry guard; it keeps no call
//! state of its own, because the socket may already have delivered and
//! resolved the call before the push arrives.

use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use crate::engine::EngineInput;
use crate::error::CallError;
use crate::registry::InvitationRegistry;
use crate::types::call::{CallId, CallInvitation};
use crate::types::events::{EventKind, EventSource, SignalingEvent};
use crate::wire::PushPayload;

/// The platform's native incoming-call surface (full-screen UI, ringing).
///
/// Implementations must be idempotent per call id: a call may be shown by
/// the push path and dismissed by the socket path, or vice versa. Accept and
/// decline decisions made on the native surface are piped back through the
/// same [`CallEngineHandle`](crate::engine::CallEngineHandle) the in-app UI
/// uses.
#[async_trait]
pub trait NativeCallUi: Send + Sync {
    async fn show_incoming(
        &self,
        invitation: &CallInvitation,
        caller_name: Option<&str>,
        caller_photo: Option<&str>,
    );

    async fn dismiss(&self, call_id: &CallId);
}

/// Whether the app UI is currently in the foreground. Shared between the
/// bridge and the engine so both can decide when the native surface is
/// needed.
#[derive(Default)]
pub struct AppForeground(AtomicBool);

impl AppForeground {
    pub fn set(&self, foreground: bool) {
        self.0.store(foreground, Ordering::Release);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct PushBridge {
    queue_tx: mpsc::Sender<EngineInput>,
    registry: Arc<InvitationRegistry>,
    native_ui: Arc<dyn NativeCallUi>,
    foreground: Arc<AppForeground>,
}

impl PushBridge {
    pub fn new(
        queue_tx: mpsc::Sender<EngineInput>,
        registry: Arc<InvitationRegistry>,
        native_ui: Arc<dyn NativeCallUi>,
        foreground: Arc<AppForeground>,
    ) -> Self {
        Self {
            queue_tx,
            registry,
            native_ui,
            foreground,
        }
    }

    pub fn set_foreground(&self, foreground: bool) {
        self.foreground.set(foreground);
    }

    /// Handle one raw push payload as delivered by the OS callback.
    ///
    /// Delivery is at-least-once and unordered relative to the socket; a
    /// payload for a call that already resolved is dropped at the guard. A
    /// push that arrives after the ring-timeout fired falls out the same
    /// way, since the terminal transition cleared the registry.
    pub async fn handle_payload(&self, json: &str) -> Result<(), CallError> {
        let payload = PushPayload::decode(json)?;
        match payload {
            PushPayload::IncomingCall {
                route,
                caller_name,
                caller_photo,
            } => {
                if !self.registry.precheck(&route.call_id, EventKind::Incoming) {
                    debug!(
                        target: "Calls/Push",
                        "Dropping push offer for call {} at guard", route.call_id
                    );
                    return Ok(());
                }

                // An offer passes the guard while a different call holds
                // the slot so the engine can busy-decline it; that offer
                // must never ring the user's screen.
                let busy = self
                    .registry
                    .current()
                    .is_some_and(|active| active.call_id != route.call_id);
                if !self.foreground.get() && !busy {
                    let invitation = route.clone().into_invitation();
                    self.native_ui
                        .show_incoming(
                            &invitation,
                            caller_name.as_deref(),
                            caller_photo.as_deref(),
                        )
                        .await;
                }

                let event = SignalingEvent::for_call(
                    route.call_id.clone(),
                    EventKind::Incoming,
                    EventSource::Push,
                )
                .with_payload(serde_json::to_value(route)?);
                self.enqueue(event).await;
            }
            PushPayload::CallEnded { call_id } => {
                if !self.registry.precheck(&call_id, EventKind::Ended) {
                    debug!(
                        target: "Calls/Push",
                        "Dropping push call_ended for call {} at guard", call_id
                    );
                    return Ok(());
                }
                // Dismiss eagerly: the process may have been woken only by
                // push, with no engine-driven dismissal pending.
                self.native_ui.dismiss(&call_id).await;
                let event =
                    SignalingEvent::for_call(call_id, EventKind::Ended, EventSource::Push);
                self.enqueue(event).await;
            }
        }
        Ok(())
    }

    async fn enqueue(&self, event: SignalingEvent) {
        if self
            .queue_tx
            .send(EngineInput::Signal(event))
            .await
            .is_err()
        {
            warn!(target: "Calls/Push", "Engine queue closed, dropping push event");
        }
    }
}
