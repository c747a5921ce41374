//! Sans-IO protocol core.
//!
//! `Connection` composes the session state machine, call correlation and
//! stream routing. It consumes raw inbound frames and produces encoded
//! outbound frames; the websocket worker in [`crate::stream::client`] only
//! moves text between the socket and this type.
//!
//! Nothing here touches the network, so every protocol scenario can be
//! driven frame by frame in tests.

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::stream::calls::{CallError, CallRegistry, CallReply};
use crate::stream::frame::{self, Envelope, FrameError};
use crate::stream::proto::{ClientMessage, ServerMessage};
use crate::stream::router::{StreamListener, SubscriptionRouter};
use crate::stream::session::{CloseReason, Session, SessionState};

#[derive(Debug, Default)]
pub struct Connection {
    session: Session,
    calls: CallRegistry,
    router: SubscriptionRouter,
}

impl Connection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn pending_calls(&self) -> usize {
        self.calls.len()
    }

    /// Processes one raw transport frame. Malformed frames are logged and
    /// dropped without affecting the session.
    pub fn handle_frame(&mut self, raw: &str) {
        debug!(event = "frame_received", frame = raw);
        match frame::decode(raw) {
            Ok(envelope) => self.handle_envelope(envelope),
            Err(err) => warn!(event = "frame_dropped", error = %err, frame = raw),
        }
    }

    fn handle_envelope(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Open => {
                if let Err(err) = self.session.on_open() {
                    warn!(event = "handshake_encode_failed", error = %err);
                }
            }
            Envelope::Heartbeat => self.pong(None),
            Envelope::Close(payload) => self.close(CloseReason::Remote(payload)),
            Envelope::Messages(messages) => {
                for message in messages {
                    self.handle_message(message);
                }
            }
        }
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Connected { session } => self.session.on_connected(session),
            ServerMessage::Failed { version } => {
                self.close(CloseReason::HandshakeRejected { version });
            }
            ServerMessage::Ping { id } => self.pong(id),
            ServerMessage::Result { id, result, error } => {
                let outcome = match error {
                    Some(error) => Err(CallError::Method(error)),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                self.calls.resolve(&id, outcome);
            }
            ServerMessage::Changed {
                collection,
                id,
                fields,
            } => {
                self.router.dispatch(&collection, &id, &fields);
            }
            ServerMessage::Nosub { id, error } => {
                warn!(event = "subscription_refused", id = %id, error = ?error);
            }
            ServerMessage::Error {
                reason,
                offending_message,
            } => {
                warn!(event = "server_error", reason = %reason, offending = ?offending_message);
            }
            ServerMessage::Pong { .. }
            | ServerMessage::Ready { .. }
            | ServerMessage::Updated { .. }
            | ServerMessage::Unknown => {
                debug!(event = "message_ignored");
            }
        }
    }

    fn pong(&mut self, id: Option<String>) {
        if let Err(err) = self.session.on_ping(id) {
            warn!(event = "pong_encode_failed", error = %err);
        }
    }

    /// Issues a method call and returns its id.
    ///
    /// The reply slot is registered before the request is queued. Before the
    /// session is connected the request waits in the deferred queue; after
    /// close the reply is rejected immediately.
    pub fn issue(
        &mut self,
        method: &str,
        params: Vec<Value>,
        reply: CallReply,
    ) -> Result<Option<String>, FrameError> {
        if self.state() == SessionState::Closed {
            let _ = reply.send(Err(CallError::ConnectionClosed));
            return Ok(None);
        }

        let id = self.calls.next_id();
        self.calls.register(id.clone(), method, reply);
        let message = ClientMessage::Method {
            method: method.to_string(),
            params,
            id: id.clone(),
        };
        if let Err(err) = self.session.send_when_connected(&message) {
            self.calls.resolve(&id, Err(CallError::ConnectionClosed));
            return Err(err);
        }
        Ok(Some(id))
    }

    /// Registers a stream listener and queues the subscribe request.
    pub fn subscribe(
        &mut self,
        name: &str,
        key: &str,
        listener: StreamListener,
    ) -> Result<(), FrameError> {
        let message = self.router.subscribe(name, key, listener);
        self.session.send_when_connected(&message)
    }

    pub fn wait_connected(&mut self, waiter: oneshot::Sender<()>) {
        self.session.wait_connected(waiter);
    }

    pub fn wait_closed(&mut self, waiter: oneshot::Sender<CloseReason>) {
        self.session.wait_closed(waiter);
    }

    /// Closes the session and rejects every outstanding call.
    pub fn close(&mut self, reason: CloseReason) {
        self.session.close(reason);
        self.calls.reject_all();
    }

    pub fn drain_outbound(&mut self) -> Vec<String> {
        self.session.drain_outbound()
    }
}
