//! Timeout and reconnection supervisor.
//!
//! All time-based transitions live here, in one timer table keyed by call
//! id: the caller's ring-timeout, the callee's answer-timeout, the
//! media-setup timeout after an accept, and the bounded reconnection task
//! used while an active call loses its channel.
//! Timers never mutate call state directly; they resolve by enqueuing a
//! local [`SignalingEvent`], preserving the engine's single-consumer model.
//! `disarm_all` aborts synchronously, so a terminal transition and timer
//! cancellation are one step from the consumer's point of view.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::engine::EngineInput;
use crate::socket::SignalingChannel;
use crate::types::call::CallId;
use crate::types::events::{EventKind, EventSource, SignalingEvent};

pub struct TimerSupervisor {
    queue_tx: mpsc::Sender<EngineInput>,
    timers: Mutex<HashMap<CallId, JoinHandle<()>>>,
    attempts: Arc<Mutex<HashMap<CallId, u32>>>,
    reconnect_max_attempts: u32,
    reconnect_delay: Duration,
}

impl TimerSupervisor {
    pub fn new(
        queue_tx: mpsc::Sender<EngineInput>,
        reconnect_max_attempts: u32,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            queue_tx,
            timers: Mutex::new(HashMap::new()),
            attempts: Arc::new(Mutex::new(HashMap::new())),
            reconnect_max_attempts,
            reconnect_delay,
        }
    }

    /// Arm the single-shot response timer (ring-timeout for the caller,
    /// answer-timeout for the callee). Re-arming replaces any timer already
    /// held for this call.
    pub fn arm_response_timer(&self, call_id: CallId, timeout: Duration) {
        let queue_tx = self.queue_tx.clone();
        let timer_id = call_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            debug!(target: "Calls/Supervisor", "Response timer fired for call {}", timer_id);
            let event = SignalingEvent::for_call(timer_id, EventKind::Timeout, EventSource::Local);
            let _ = queue_tx.send(EngineInput::Signal(event)).await;
        });
        self.install(call_id, handle);
    }

    /// Start bounded channel reconnection for an active call. Exhausting the
    /// bound enqueues a local `ChannelLostFinal` event; a successful attempt
    /// lets the channel emit its own `ChannelConnected`.
    pub fn start_reconnect(&self, call_id: CallId, channel: Arc<SignalingChannel>) {
        let queue_tx = self.queue_tx.clone();
        let attempts = self.attempts.clone();
        let max_attempts = self.reconnect_max_attempts;
        let delay = self.reconnect_delay;
        let timer_id = call_id.clone();

        let handle = tokio::spawn(async move {
            for attempt in 1..=max_attempts {
                tokio::time::sleep(delay).await;
                attempts.lock().unwrap().insert(timer_id.clone(), attempt);
                info!(
                    target: "Calls/Supervisor",
                    "Reconnect attempt {}/{} for call {}", attempt, max_attempts, timer_id
                );
                match channel.connect().await {
                    Ok(()) => return,
                    Err(e) => {
                        warn!(
                            target: "Calls/Supervisor",
                            "Reconnect attempt {} failed for call {}: {}", attempt, timer_id, e
                        );
                    }
                }
            }
            let event = SignalingEvent::for_call(
                timer_id,
                EventKind::ChannelLostFinal,
                EventSource::Local,
            );
            let _ = queue_tx.send(EngineInput::Signal(event)).await;
        });
        self.install(call_id, handle);
    }

    /// How many reconnection attempts have been made for this call.
    pub fn reconnect_attempts(&self, call_id: &CallId) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(call_id)
            .copied()
            .unwrap_or(0)
    }

    /// Abort every timer belonging to this call. Synchronous, so no timer
    /// can fire for the call once this returns.
    pub fn disarm_all(&self, call_id: &CallId) {
        if let Some(handle) = self.timers.lock().unwrap().remove(call_id) {
            handle.abort();
        }
        self.attempts.lock().unwrap().remove(call_id);
    }

    fn install(&self, call_id: CallId, handle: JoinHandle<()>) {
        if let Some(old) = self.timers.lock().unwrap().insert(call_id, handle) {
            old.abort();
        }
    }
}
