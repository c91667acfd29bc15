//! Signaling channel adapter.
//!
//! Wraps the persistent real-time connection behind a [`Transport`] seam,
//! parses wire frames, and forwards them in arrival order through the
//! registry's read-only guard into the engine's input queue.

pub mod websocket;

use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

use crate::engine::EngineInput;
use crate::registry::InvitationRegistry;
use crate::types::events::{EventKind, EventSource, SignalingEvent};
use crate::wire::WireMessage;

/// An event produced by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// A text frame has been received from the server.
    MessageReceived(String),
    /// The connection was lost.
    Disconnected,
}

/// Represents an active network connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a text frame to the server.
    async fn send_text(&self, text: &str) -> Result<(), anyhow::Error>;

    /// Closes the connection.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Creates a new transport and returns it, along with a stream of events.
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("signaling channel is not connected")]
    NotConnected,

    #[error("signaling channel is already connected")]
    AlreadyConnected,

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("send timed out")]
    SendTimeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("frame encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Adapter over the persistent signaling connection.
///
/// Guarantees: frames are forwarded in arrival order; `ChannelConnected` is
/// enqueued exactly once per successful (re)connect and `ChannelLost` exactly
/// once per disconnect; [`send`](SignalingChannel::send) fails fast rather
/// than blocking when disconnected.
pub struct SignalingChannel {
    factory: Box<dyn TransportFactory>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    queue_tx: mpsc::Sender<EngineInput>,
    registry: Arc<InvitationRegistry>,
    connected: AtomicBool,
    send_timeout: Duration,
}

impl SignalingChannel {
    pub fn new(
        factory: Box<dyn TransportFactory>,
        registry: Arc<InvitationRegistry>,
        queue_tx: mpsc::Sender<EngineInput>,
        send_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            factory,
            transport: Mutex::new(None),
            queue_tx,
            registry,
            connected: AtomicBool::new(false),
            send_timeout,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Establish the connection and start the read pump.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ChannelError> {
        if self.is_connected() {
            return Err(ChannelError::AlreadyConnected);
        }

        let (transport, events_rx) = self
            .factory
            .create_transport()
            .await
            .map_err(|e| ChannelError::ConnectFailed(e.to_string()))?;

        *self.transport.lock().await = Some(transport);
        tokio::spawn(self.clone().read_pump(events_rx));
        Ok(())
    }

    /// Close the connection. The read pump emits the `ChannelLost` event
    /// once the transport stream ends.
    pub async fn disconnect(&self) {
        let transport = self.transport.lock().await.clone();
        if let Some(transport) = transport {
            transport.disconnect().await;
        }
    }

    /// Send one wire message, failing fast when disconnected and bounding
    /// the send so a hung transport cannot mask a response timer.
    ///
    /// Callers must not assume delivery succeeded without a corresponding
    /// remote event.
    pub async fn send(&self, msg: &WireMessage) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        let transport = self
            .transport
            .lock()
            .await
            .clone()
            .ok_or(ChannelError::NotConnected)?;

        let text = msg.encode()?;
        debug!(
            target: "Calls/Channel",
            "--> Sending {:?} for call {} ({} bytes)", msg.kind(), msg.call_id(), text.len()
        );

        match tokio::time::timeout(self.send_timeout, transport.send_text(&text)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ChannelError::Transport(e.to_string())),
            Err(_) => Err(ChannelError::SendTimeout),
        }
    }

    async fn read_pump(self: Arc<Self>, mut events_rx: mpsc::Receiver<TransportEvent>) {
        let mut was_connected = false;
        while let Some(event) = events_rx.recv().await {
            match event {
                TransportEvent::Connected => {
                    was_connected = true;
                    self.connected.store(true, Ordering::Release);
                    self.enqueue(SignalingEvent::channel(EventKind::ChannelConnected))
                        .await;
                }
                TransportEvent::MessageReceived(text) => self.handle_frame(&text).await,
                TransportEvent::Disconnected => break,
            }
        }

        self.connected.store(false, Ordering::Release);
        *self.transport.lock().await = None;
        if was_connected {
            self.enqueue(SignalingEvent::channel(EventKind::ChannelLost))
                .await;
        }
    }

    async fn handle_frame(&self, text: &str) {
        let msg = match WireMessage::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(target: "Calls/Channel", "Failed to parse signaling frame: {}", e);
                return;
            }
        };

        let event = msg.into_event(EventSource::Socket);
        if let Some(call_id) = &event.call_id
            && !self.registry.precheck(call_id, event.kind)
        {
            debug!(
                target: "Calls/Channel",
                "Dropping {:?} for call {} at guard", event.kind, call_id
            );
            return;
        }
        self.enqueue(event).await;
    }

    async fn enqueue(&self, event: SignalingEvent) {
        if self
            .queue_tx
            .send(EngineInput::Signal(event))
            .await
            .is_err()
        {
            warn!(target: "Calls/Channel", "Engine queue closed, dropping event");
        }
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;

    /// A transport that records nothing and always succeeds.
    pub struct MockTransport;

    #[async_trait]
    impl Transport for MockTransport {
        async fn send_text(&self, _text: &str) -> Result<(), anyhow::Error> {
            Ok(())
        }

        async fn disconnect(&self) {}
    }

    /// A factory that always fails to connect, for reconnection tests.
    #[derive(Default)]
    pub struct FailingTransportFactory;

    #[async_trait]
    impl TransportFactory for FailingTransportFactory {
        async fn create_transport(
            &self,
        ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }
}
