//! Call engine: the state machine at the heart of call signaling.
//!
//! Events from the socket adapter, the push bridge, local timers, and user
//! actions all funnel into one ordered queue consumed sequentially here. The
//! engine never processes two inputs concurrently, which is what makes the
//! registry's dedup and the tie-break rules sufficient without any locking
//! inside the state machine itself.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::config::CallConfig;
use crate::error::CallError;
use crate::push::{AppForeground, NativeCallUi, PushBridge};
use crate::registry::{Admission, InvitationRegistry};
use crate::session::{CallSession, CallStatus, ConnectionState, SessionTransition};
use crate::socket::{SignalingChannel, TransportFactory};
use crate::supervisor::TimerSupervisor;
use crate::types::call::{
    CallId, CallInvitation, CallRole, CallType, DeclineReason, EndReason, UserId,
};
use crate::types::events::{CallUpdate, EventKind, EventSource, SignalingEvent};
use crate::wire::{CallRoute, WireMessage};

const UPDATE_CHANNEL_CAPACITY: usize = 32;

/// The media session this engine starts and stops. The actual negotiation
/// and transport live elsewhere; confirmation that the media channel opened
/// comes back through [`CallEngineHandle::media_connected`].
#[async_trait]
pub trait MediaSession: Send + Sync {
    async fn start(&self, invitation: &CallInvitation, role: CallRole)
    -> Result<(), anyhow::Error>;

    async fn stop(&self, call_id: &CallId);

    /// Opaque negotiation payload passed through from the signaling channel.
    async fn handle_signaling(&self, call_id: &CallId, payload: &serde_json::Value);
}

/// User-initiated actions and media confirmations. These enter the same
/// queue as signaling events so ordering against remote events is explicit.
#[derive(Debug, Clone)]
pub enum CallAction {
    Initiate {
        call_id: CallId,
        recipient_id: UserId,
        call_type: CallType,
        conversation_id: Option<String>,
        group_id: Option<String>,
    },
    Accept {
        call_id: CallId,
    },
    Decline {
        call_id: CallId,
        reason: DeclineReason,
    },
    Cancel {
        call_id: CallId,
    },
    End {
        call_id: CallId,
    },
    MediaConnected {
        call_id: CallId,
    },
    MediaFailed {
        call_id: CallId,
        detail: String,
    },
}

impl CallAction {
    fn call_id(&self) -> &CallId {
        match self {
            Self::Initiate { call_id, .. }
            | Self::Accept { call_id }
            | Self::Decline { call_id, .. }
            | Self::Cancel { call_id }
            | Self::End { call_id }
            | Self::MediaConnected { call_id }
            | Self::MediaFailed { call_id, .. } => call_id,
        }
    }
}

/// One item on the engine's input queue.
#[derive(Debug)]
pub enum EngineInput {
    Signal(SignalingEvent),
    Action(CallAction),
    Shutdown,
}

/// Cloneable front door for UI layers and the native call surface.
#[derive(Clone)]
pub struct CallEngineHandle {
    queue_tx: mpsc::Sender<EngineInput>,
    registry: Arc<InvitationRegistry>,
    updates: broadcast::Sender<CallUpdate>,
}

impl CallEngineHandle {
    /// Start an outgoing call. Fails fast when another call is active; the
    /// engine re-checks under its own consumer before committing.
    pub async fn initiate(
        &self,
        recipient_id: UserId,
        call_type: CallType,
        conversation_id: Option<String>,
        group_id: Option<String>,
    ) -> Result<CallId, CallError> {
        if self.registry.current().is_some() {
            return Err(CallError::AlreadyActive);
        }
        let call_id = CallId::generate();
        self.send_action(CallAction::Initiate {
            call_id: call_id.clone(),
            recipient_id,
            call_type,
            conversation_id,
            group_id,
        })
        .await?;
        Ok(call_id)
    }

    pub async fn accept(&self, call_id: CallId) -> Result<(), CallError> {
        self.send_action(CallAction::Accept { call_id }).await
    }

    pub async fn decline(&self, call_id: CallId, reason: DeclineReason) -> Result<(), CallError> {
        self.send_action(CallAction::Decline { call_id, reason })
            .await
    }

    pub async fn cancel(&self, call_id: CallId) -> Result<(), CallError> {
        self.send_action(CallAction::Cancel { call_id }).await
    }

    pub async fn end(&self, call_id: CallId) -> Result<(), CallError> {
        self.send_action(CallAction::End { call_id }).await
    }

    /// The media session confirmed its channel is open.
    pub async fn media_connected(&self, call_id: CallId) -> Result<(), CallError> {
        self.send_action(CallAction::MediaConnected { call_id })
            .await
    }

    /// The media session reported a fault. Always terminal for the call.
    pub async fn media_failed(&self, call_id: CallId, detail: String) -> Result<(), CallError> {
        self.send_action(CallAction::MediaFailed { call_id, detail })
            .await
    }

    /// Subscribe to state snapshots published after every transition.
    pub fn subscribe(&self) -> broadcast::Receiver<CallUpdate> {
        self.updates.subscribe()
    }

    /// The invitation currently in flight, if any.
    pub fn current_call(&self) -> Option<CallInvitation> {
        self.registry.current()
    }

    /// Tear the engine down, terminating any call in flight.
    pub async fn shutdown(&self) -> Result<(), CallError> {
        self.queue_tx
            .send(EngineInput::Shutdown)
            .await
            .map_err(|_| CallError::EngineStopped)
    }

    async fn send_action(&self, action: CallAction) -> Result<(), CallError> {
        self.queue_tx
            .send(EngineInput::Action(action))
            .await
            .map_err(|_| CallError::EngineStopped)
    }
}

/// Everything `build` wires together. The engine is consumed by
/// [`CallEngine::run`]; the rest are shared handles.
pub struct CallComponents {
    pub engine: CallEngine,
    pub handle: CallEngineHandle,
    pub push_bridge: Arc<PushBridge>,
    pub channel: Arc<SignalingChannel>,
    pub foreground: Arc<AppForeground>,
}

/// Builder wiring the engine to its collaborators at startup. No component
/// is a process-wide singleton; the registry is the only shared state and it
/// is owned by the components built here.
pub struct CallEngineBuilder {
    config: CallConfig,
    local_user: UserId,
    factory: Option<Box<dyn TransportFactory>>,
    media: Option<Arc<dyn MediaSession>>,
    native_ui: Option<Arc<dyn NativeCallUi>>,
}

impl CallEngineBuilder {
    pub fn new(local_user: UserId) -> Self {
        Self {
            config: CallConfig::default(),
            local_user,
            factory: None,
            media: None,
            native_ui: None,
        }
    }

    pub fn with_config(mut self, config: CallConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_transport_factory(mut self, factory: impl TransportFactory + 'static) -> Self {
        self.factory = Some(Box::new(factory));
        self
    }

    pub fn with_media_session(mut self, media: Arc<dyn MediaSession>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn with_native_ui(mut self, native_ui: Arc<dyn NativeCallUi>) -> Self {
        self.native_ui = Some(native_ui);
        self
    }

    pub fn build(self) -> Result<CallComponents, CallError> {
        let factory = self
            .factory
            .ok_or(CallError::MissingComponent("transport factory"))?;
        let media = self
            .media
            .ok_or(CallError::MissingComponent("media session"))?;
        let native_ui = self
            .native_ui
            .ok_or(CallError::MissingComponent("native call ui"))?;

        let registry = Arc::new(InvitationRegistry::new());
        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_capacity);
        let channel = SignalingChannel::new(
            factory,
            registry.clone(),
            queue_tx.clone(),
            self.config.send_timeout,
        );
        let supervisor = TimerSupervisor::new(
            queue_tx.clone(),
            self.config.reconnect_max_attempts,
            self.config.reconnect_delay,
        );
        let foreground = Arc::new(AppForeground::default());
        let push_bridge = Arc::new(PushBridge::new(
            queue_tx.clone(),
            registry.clone(),
            native_ui.clone(),
            foreground.clone(),
        ));
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        let handle = CallEngineHandle {
            queue_tx,
            registry: registry.clone(),
            updates: updates.clone(),
        };

        let engine = CallEngine {
            config: self.config,
            local_user: self.local_user,
            registry,
            channel: channel.clone(),
            supervisor,
            media,
            native_ui,
            foreground: foreground.clone(),
            updates,
            queue_rx,
            session: None,
            pending_outbound: Vec::new(),
            send_failed: false,
        };

        Ok(CallComponents {
            engine,
            handle,
            push_bridge,
            channel,
            foreground,
        })
    }
}

/// The call state machine. Owns the one in-flight [`CallSession`]; consumed
/// by [`run`](CallEngine::run), which should be spawned as a task.
pub struct CallEngine {
    config: CallConfig,
    local_user: UserId,
    registry: Arc<InvitationRegistry>,
    channel: Arc<SignalingChannel>,
    supervisor: TimerSupervisor,
    media: Arc<dyn MediaSession>,
    native_ui: Arc<dyn NativeCallUi>,
    foreground: Arc<AppForeground>,
    updates: broadcast::Sender<CallUpdate>,
    queue_rx: mpsc::Receiver<EngineInput>,
    session: Option<CallSession>,
    pending_outbound: Vec<WireMessage>,
    send_failed: bool,
}

impl CallEngine {
    /// The engine's run loop. Inputs already queued when the loop wakes are
    /// drained as one processing pass, which is the window the tie-break
    /// rule applies to: a terminal signal in the pass beats an accept.
    pub async fn run(mut self) {
        info!(target: "Calls/Engine", "Call engine started");
        while let Some(first) = self.queue_rx.recv().await {
            let mut batch = VecDeque::new();
            batch.push_back(first);
            while let Ok(next) = self.queue_rx.try_recv() {
                batch.push_back(next);
            }

            while let Some(input) = batch.pop_front() {
                match input {
                    EngineInput::Shutdown => {
                        self.teardown().await;
                        info!(target: "Calls/Engine", "Call engine stopped");
                        return;
                    }
                    EngineInput::Signal(event) => self.handle_event(event, &batch).await,
                    EngineInput::Action(action) => self.handle_action(action).await,
                }
            }
        }
        info!(target: "Calls/Engine", "Input queue closed, call engine stopped");
    }

    async fn handle_event(&mut self, event: SignalingEvent, batch: &VecDeque<EngineInput>) {
        match event.kind {
            EventKind::ChannelConnected => return self.on_channel_connected().await,
            EventKind::ChannelLost => return self.on_channel_lost().await,
            _ => {}
        }

        let Some(call_id) = event.call_id.clone() else {
            warn!(target: "Calls/Engine", "Dropping {:?} event without call id", event.kind);
            return;
        };

        match self.registry.observe(&call_id, event.kind) {
            Admission::Fresh => {}
            Admission::Duplicate => {
                debug!(
                    target: "Calls/Engine",
                    "Duplicate {:?} from {:?} for call {}", event.kind, event.source, call_id
                );
                return;
            }
            Admission::Stale => {
                debug!(
                    target: "Calls/Engine",
                    "Stale {:?} from {:?} for call {}", event.kind, event.source, call_id
                );
                return;
            }
            Admission::Busy => {
                self.auto_decline_busy(&event).await;
                return;
            }
        }

        match event.kind {
            EventKind::Incoming => self.on_incoming(call_id, event).await,
            EventKind::Accepted => self.on_remote_accepted(call_id, batch).await,
            EventKind::Declined => self.on_remote_terminal(call_id, EndReason::Declined).await,
            EventKind::Cancelled => self.on_remote_terminal(call_id, EndReason::Cancelled).await,
            EventKind::Ended => self.on_remote_terminal(call_id, EndReason::Hangup).await,
            EventKind::Timeout => self.on_timeout(call_id).await,
            EventKind::Signaling => self.on_signaling(call_id, event.payload).await,
            EventKind::ChannelLostFinal => self.on_channel_lost_final(call_id).await,
            EventKind::ChannelConnected | EventKind::ChannelLost => {}
        }
    }

    async fn handle_action(&mut self, action: CallAction) {
        if let CallAction::Initiate { .. } = action {
            return self.on_initiate(action).await;
        }

        let call_id = action.call_id().clone();
        if !self.session_matches(&call_id) {
            warn!(
                target: "Calls/Engine",
                "Dropping {:?}: no call in flight for {}", action, call_id
            );
            return;
        }

        match action {
            CallAction::Accept { call_id } => self.on_accept(call_id).await,
            CallAction::Decline { call_id, reason } => self.on_decline(call_id, reason).await,
            CallAction::Cancel { call_id } => self.on_cancel(call_id).await,
            CallAction::End { .. } => {
                self.send_or_queue(self.outbound(WireMessageKind::End)).await;
                self.terminate(EndReason::Hangup).await;
            }
            CallAction::MediaConnected { .. } => self.on_media_connected().await,
            CallAction::MediaFailed { call_id, detail } => {
                warn!(
                    target: "Calls/Engine",
                    "Media session fault for call {}: {}", call_id, detail
                );
                self.terminate(EndReason::MediaFailed).await;
            }
            CallAction::Initiate { .. } => unreachable!("handled above"),
        }
    }

    async fn on_initiate(&mut self, action: CallAction) {
        let CallAction::Initiate {
            call_id,
            recipient_id,
            call_type,
            conversation_id,
            group_id,
        } = action
        else {
            return;
        };

        let invitation = CallInvitation::new(
            call_id.clone(),
            self.local_user.clone(),
            recipient_id,
            call_type,
            conversation_id,
            group_id,
        );

        if !self.registry.register_if_absent(&invitation) {
            warn!(
                target: "Calls/Engine",
                "Ignoring initiate for call {}: another call is active", call_id
            );
            return;
        }

        info!(
            target: "Calls/Engine",
            "Outgoing {:?} call {} to {}", call_type, call_id, invitation.recipient_id
        );
        self.session = Some(CallSession::new_outgoing(invitation));
        self.supervisor
            .arm_response_timer(call_id, self.config.ring_timeout);
        self.send_or_queue(self.outbound(WireMessageKind::Invite)).await;
        self.publish();
    }

    async fn on_incoming(&mut self, call_id: CallId, event: SignalingEvent) {
        let Some(payload) = event.payload else {
            warn!(target: "Calls/Engine", "Offer for call {} carried no routing data", call_id);
            return;
        };
        let route: CallRoute = match serde_json::from_value(payload) {
            Ok(route) => route,
            Err(e) => {
                warn!(target: "Calls/Engine", "Malformed offer for call {}: {}", call_id, e);
                return;
            }
        };

        let invitation = route.into_invitation();
        if !self.registry.register_if_absent(&invitation) {
            // Lost a race with an initiate that was queued ahead of us.
            self.auto_decline_busy_route(&invitation).await;
            return;
        }

        info!(
            target: "Calls/Engine",
            "Incoming {:?} call {} from {} (via {:?})",
            invitation.call_type, call_id, invitation.caller_id, event.source
        );
        self.session = Some(CallSession::new_incoming(invitation.clone()));
        self.supervisor
            .arm_response_timer(call_id, self.config.answer_timeout);

        // The push bridge already raised the native surface for push
        // deliveries; socket offers while backgrounded raise it here.
        if event.source == EventSource::Socket && !self.foreground.get() {
            self.native_ui.show_incoming(&invitation, None, None).await;
        }
        self.publish();
    }

    async fn on_remote_accepted(&mut self, call_id: CallId, batch: &VecDeque<EngineInput>) {
        if !self.session_matches(&call_id) {
            return;
        }
        // Tie-break: a decline/cancel/end already queued in this processing
        // pass wins over the accept, so media never starts for a call the
        // other side has terminated.
        if batch_has_terminal_for(batch, &call_id) {
            info!(
                target: "Calls/Engine",
                "Dropping accept for call {}: terminal signal in same pass", call_id
            );
            return;
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !matches!(session.status, CallStatus::Outgoing { .. }) {
            debug!(target: "Calls/Engine", "Ignoring accept for call {} (not outgoing)", call_id);
            return;
        }

        if let Err(e) = session.apply_transition(SessionTransition::RemoteAccepted) {
            warn!(target: "Calls/Engine", "{}", e);
            return;
        }
        // Replaces the ring timer: media setup is bounded too.
        self.supervisor
            .arm_response_timer(call_id, self.config.connect_timeout);
        self.publish();
        self.start_media().await;
    }

    async fn on_remote_terminal(&mut self, call_id: CallId, reason: EndReason) {
        if !self.session_matches(&call_id) {
            return;
        }
        self.terminate(reason).await;
    }

    async fn on_timeout(&mut self, call_id: CallId) {
        if !self.session_matches(&call_id) {
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let ringing = session.status.is_ringing();
        let connecting = matches!(session.status, CallStatus::Connecting { .. });
        let is_callee = session.role == CallRole::Callee;

        if ringing {
            if is_callee {
                self.send_or_queue(self.outbound_decline(DeclineReason::Timeout))
                    .await;
            }
            let reason = if self.send_failed {
                EndReason::SendFailed
            } else {
                EndReason::Timeout
            };
            self.terminate(reason).await;
        } else if connecting {
            // Media setup neither confirmed nor faulted in time.
            let reason = if self.send_failed {
                EndReason::SendFailed
            } else {
                EndReason::MediaFailed
            };
            self.terminate(reason).await;
        } else {
            debug!(
                target: "Calls/Engine",
                "Ignoring timeout for call {} (not awaiting a response)", call_id
            );
        }
    }

    async fn on_signaling(&mut self, call_id: CallId, payload: Option<serde_json::Value>) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.invitation.call_id != call_id {
            return;
        }
        match (&session.status, payload) {
            (CallStatus::Connecting { .. } | CallStatus::Active { .. }, Some(payload)) => {
                self.media.handle_signaling(&call_id, &payload).await;
            }
            _ => {
                debug!(
                    target: "Calls/Engine",
                    "Dropping signaling payload for call {} outside media phase", call_id
                );
            }
        }
    }

    async fn on_accept(&mut self, call_id: CallId) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.status.can_accept() {
            warn!(
                target: "Calls/Engine",
                "Cannot accept call {} in state {:?}", call_id, session.status
            );
            return;
        }

        if let Err(e) = session.apply_transition(SessionTransition::LocalAccepted) {
            warn!(target: "Calls/Engine", "{}", e);
            return;
        }
        // Replaces the answer timer: media setup is bounded too.
        self.supervisor
            .arm_response_timer(call_id, self.config.connect_timeout);
        self.send_or_queue(self.outbound(WireMessageKind::Answer)).await;
        self.publish();
        self.start_media().await;
    }

    async fn on_decline(&mut self, call_id: CallId, reason: DeclineReason) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if !session.status.can_decline() {
            warn!(
                target: "Calls/Engine",
                "Cannot decline call {} in state {:?}", call_id, session.status
            );
            return;
        }

        self.send_or_queue(self.outbound_decline(reason)).await;
        let end_reason = match reason {
            DeclineReason::UserDeclined => EndReason::Declined,
            DeclineReason::Timeout => EndReason::Timeout,
            DeclineReason::Busy => EndReason::Busy,
        };
        self.terminate(end_reason).await;
    }

    async fn on_cancel(&mut self, call_id: CallId) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if !session.status.can_cancel() {
            warn!(
                target: "Calls/Engine",
                "Cannot cancel call {} in state {:?}", call_id, session.status
            );
            return;
        }
        self.send_or_queue(self.outbound(WireMessageKind::Cancel)).await;
        self.terminate(EndReason::Cancelled).await;
    }

    async fn on_media_connected(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.apply_transition(SessionTransition::MediaConnected) {
            Ok(()) => {
                let call_id = session.invitation.call_id.clone();
                info!(target: "Calls/Engine", "Call {} active", call_id);
                // The media-setup timer has done its job.
                self.supervisor.disarm_all(&call_id);
                self.publish();
            }
            Err(e) => warn!(target: "Calls/Engine", "{}", e),
        }
    }

    async fn on_channel_connected(&mut self) {
        if let Some(session) = self.session.as_mut()
            && session.connection == ConnectionState::Reconnecting
        {
            let call_id = session.invitation.call_id.clone();
            session.connection = ConnectionState::Connected;
            session.reconnect_attempts = self.supervisor.reconnect_attempts(&call_id);
            info!(
                target: "Calls/Engine",
                "Channel restored for call {} after {} attempt(s)",
                call_id, session.reconnect_attempts
            );
            self.publish();
        }
        self.flush_pending().await;
    }

    async fn on_channel_lost(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.status.is_active() && session.connection == ConnectionState::Connected {
            let call_id = session.invitation.call_id.clone();
            session.connection = ConnectionState::Reconnecting;
            warn!(
                target: "Calls/Engine",
                "Channel lost during active call {}, reconnecting", call_id
            );
            self.supervisor
                .start_reconnect(call_id, self.channel.clone());
            self.publish();
        }
        // While ringing or connecting, outbound actions queue up and the
        // response timer resolves the attempt if the channel stays down.
    }

    async fn on_channel_lost_final(&mut self, call_id: CallId) {
        if !self.session_matches(&call_id) {
            return;
        }
        warn!(
            target: "Calls/Engine",
            "Reconnection attempts exhausted for call {}", call_id
        );
        self.terminate(EndReason::ConnectionFailed).await;
    }

    /// Answer a second concurrent offer with a busy decline, without
    /// touching the active session.
    async fn auto_decline_busy(&mut self, event: &SignalingEvent) {
        let Some(payload) = event.payload.clone() else {
            return;
        };
        let Ok(route) = serde_json::from_value::<CallRoute>(payload) else {
            return;
        };
        info!(
            target: "Calls/Engine",
            "Busy: auto-declining call {} from {}", route.call_id, route.caller_id
        );
        let declined_id = route.call_id.clone();
        let msg = WireMessage::CallDecline {
            route,
            reason: DeclineReason::Busy,
        };
        if let Err(e) = self.channel.send(&msg).await {
            debug!(target: "Calls/Engine", "Busy decline not delivered: {}", e);
        }
        // The surface may have been raised before the active call won the
        // slot; dismissal is idempotent per call id.
        self.native_ui.dismiss(&declined_id).await;
    }

    async fn auto_decline_busy_route(&mut self, invitation: &CallInvitation) {
        info!(
            target: "Calls/Engine",
            "Busy: auto-declining call {} from {}",
            invitation.call_id, invitation.caller_id
        );
        let msg = WireMessage::CallDecline {
            route: CallRoute::from_invitation(invitation),
            reason: DeclineReason::Busy,
        };
        if let Err(e) = self.channel.send(&msg).await {
            debug!(target: "Calls/Engine", "Busy decline not delivered: {}", e);
        }
        self.native_ui.dismiss(&invitation.call_id).await;
    }

    async fn start_media(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let invitation = session.invitation.clone();
        let role = session.role;
        if let Err(e) = self.media.start(&invitation, role).await {
            warn!(
                target: "Calls/Engine",
                "Media session failed to start for call {}: {}", invitation.call_id, e
            );
            self.terminate(EndReason::MediaFailed).await;
        }
    }

    /// Terminal transition for the in-flight call: timers are disarmed and
    /// the registry cleared before any further input is consumed, so a stale
    /// timer can never fire into an already-ended call.
    async fn terminate(&mut self, reason: EndReason) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let call_id = session.invitation.call_id.clone();
        session.reconnect_attempts = session
            .reconnect_attempts
            .max(self.supervisor.reconnect_attempts(&call_id));

        self.supervisor.disarm_all(&call_id);
        self.registry.clear(&call_id);
        if let Err(e) = session.apply_transition(SessionTransition::Terminated { reason }) {
            warn!(target: "Calls/Engine", "{}", e);
        }
        self.pending_outbound.clear();
        self.send_failed = false;

        self.media.stop(&call_id).await;
        self.native_ui.dismiss(&call_id).await;

        info!(target: "Calls/Engine", "Call {} ended: {:?}", call_id, reason);
        let _ = self.updates.send(session.snapshot());
    }

    async fn teardown(&mut self) {
        if self.session.is_some() {
            let msg = self.outbound(WireMessageKind::End);
            if let Err(e) = self.channel.send(&msg).await {
                debug!(target: "Calls/Engine", "End not delivered during teardown: {}", e);
            }
            self.terminate(EndReason::Shutdown).await;
        }
        self.channel.disconnect().await;
    }

    /// Send one outbound message, or queue it for a single retry once the
    /// channel reconnects. A send failure is remembered so a later response
    /// timeout is reported as `SendFailed` rather than `Timeout`.
    async fn send_or_queue(&mut self, msg: WireMessage) {
        match self.channel.send(&msg).await {
            Ok(()) => {}
            Err(e) => {
                warn!(
                    target: "Calls/Engine",
                    "Send failed for call {} ({}), queued for retry", msg.call_id(), e
                );
                self.send_failed = true;
                self.pending_outbound.push(msg);
            }
        }
    }

    async fn flush_pending(&mut self) {
        let mut all_delivered = true;
        for msg in std::mem::take(&mut self.pending_outbound) {
            if let Err(e) = self.channel.send(&msg).await {
                all_delivered = false;
                warn!(
                    target: "Calls/Engine",
                    "Dropping outbound {:?} for call {} after retry: {}",
                    msg.kind(), msg.call_id(), e
                );
            }
        }
        // Once everything reached the wire, a later ring-out is a plain
        // timeout again, not a send failure.
        if all_delivered {
            self.send_failed = false;
        }
    }

    fn session_matches(&self, call_id: &CallId) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.invitation.call_id == *call_id)
    }

    fn publish(&self) {
        if let Some(session) = &self.session {
            let _ = self.updates.send(session.snapshot());
        }
    }

    fn outbound(&self, kind: WireMessageKind) -> WireMessage {
        let session = self.session.as_ref().expect("outbound requires a session");
        let route = CallRoute::from_invitation(&session.invitation);
        match kind {
            WireMessageKind::Invite => WireMessage::IncomingCall { route },
            WireMessageKind::Answer => WireMessage::CallAnswer { route },
            WireMessageKind::Cancel => WireMessage::CallCancel { route },
            WireMessageKind::End => WireMessage::CallEnd { route },
        }
    }

    fn outbound_decline(&self, reason: DeclineReason) -> WireMessage {
        let session = self.session.as_ref().expect("outbound requires a session");
        WireMessage::CallDecline {
            route: CallRoute::from_invitation(&session.invitation),
            reason,
        }
    }
}

enum WireMessageKind {
    Invite,
    Answer,
    Cancel,
    End,
}

fn batch_has_terminal_for(batch: &VecDeque<EngineInput>, call_id: &CallId) -> bool {
    batch.iter().any(|input| {
        matches!(
            input,
            EngineInput::Signal(event)
                if event.kind.is_terminal() && event.call_id.as_ref() == Some(call_id)
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_terminal_scan() {
        let c1 = CallId::new("C1");
        let c2 = CallId::new("C2");
        let mut batch = VecDeque::new();
        batch.push_back(EngineInput::Signal(SignalingEvent::for_call(
            c2.clone(),
            EventKind::Declined,
            EventSource::Socket,
        )));
        assert!(!batch_has_terminal_for(&batch, &c1));
        assert!(batch_has_terminal_for(&batch, &c2));

        batch.push_back(EngineInput::Signal(SignalingEvent::for_call(
            c1.clone(),
            EventKind::Accepted,
            EventSource::Push,
        )));
        assert!(!batch_has_terminal_for(&batch, &c1));

        batch.push_back(EngineInput::Signal(SignalingEvent::for_call(
            c1.clone(),
            EventKind::Ended,
            EventSource::Socket,
        )));
        assert!(batch_has_terminal_for(&batch, &c1));
    }
}
