//! Session lifecycle state machine.
//!
//! `Session` owns the connection state and the outbound frame queue. Frames
//! that must not reach the server before the handshake completes are parked
//! in a FIFO and released, in issuance order, the moment the server confirms
//! the session.
//!
//! ```text
//! Disconnected --open--> Handshaking --connected--> Connected
//!       |                     |                         |
//!       +---------------------+----------close----------+--> Closed
//! ```

use std::collections::VecDeque;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::stream::frame::{self, FrameError};
use crate::stream::proto::ClientMessage;

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// No transport open frame received yet.
    Disconnected,
    /// Handshake sent, waiting for the server to confirm.
    Handshaking,
    /// Server confirmed the session; method calls flow freely.
    Connected,
    /// Terminal. A closed session is never reopened.
    Closed,
}

/// Why a session reached [`SessionState::Closed`].
#[derive(Clone, Debug, PartialEq)]
pub enum CloseReason {
    /// Server sent a close frame with this payload.
    Remote(Value),
    /// Server refused every protocol version we offered.
    HandshakeRejected {
        /// Version the server would have accepted, when it said so.
        version: Option<String>,
    },
    /// Websocket closed or the stream ended.
    TransportClosed,
    /// Websocket failed to connect or errored mid-session.
    Transport(String),
    /// Every client handle was dropped.
    ClientDropped,
}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
    session_id: Option<String>,
    outbound: VecDeque<String>,
    deferred: VecDeque<String>,
    connected_waiters: Vec<oneshot::Sender<()>>,
    closed_waiters: Vec<oneshot::Sender<CloseReason>>,
    close_reason: Option<CloseReason>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            session_id: None,
            outbound: VecDeque::new(),
            deferred: VecDeque::new(),
            connected_waiters: Vec::new(),
            closed_waiters: Vec::new(),
            close_reason: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session id assigned by the server in its `connected` reply.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    /// Handles the transport open frame by sending the handshake request.
    pub fn on_open(&mut self) -> Result<(), FrameError> {
        if self.state != SessionState::Disconnected {
            debug!(event = "open_ignored", state = ?self.state);
            return Ok(());
        }
        self.send(&ClientMessage::connect())?;
        self.state = SessionState::Handshaking;
        Ok(())
    }

    /// Answers a liveness probe immediately, whatever the state.
    pub fn on_ping(&mut self, id: Option<String>) -> Result<(), FrameError> {
        self.send(&ClientMessage::Pong { id })
    }

    /// Marks the session connected, releases deferred frames in order and
    /// notifies connected waiters. Repeated confirmations are ignored.
    pub fn on_connected(&mut self, session_id: Option<String>) {
        match self.state {
            SessionState::Disconnected | SessionState::Handshaking => {}
            SessionState::Connected | SessionState::Closed => {
                debug!(event = "connected_ignored", state = ?self.state);
                return;
            }
        }

        self.state = SessionState::Connected;
        info!(event = "session_connected", session_id = ?session_id);
        self.session_id = session_id;
        self.outbound.extend(self.deferred.drain(..));
        for waiter in self.connected_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    /// Moves to [`SessionState::Closed`]. Only the first reason is kept.
    pub fn close(&mut self, reason: CloseReason) {
        if self.state == SessionState::Closed {
            return;
        }

        let dropped_frames = self.deferred.len() + self.outbound.len();
        info!(event = "session_closed", reason = ?reason, dropped_frames);
        self.state = SessionState::Closed;
        self.outbound.clear();
        self.deferred.clear();
        self.connected_waiters.clear();
        for waiter in self.closed_waiters.drain(..) {
            let _ = waiter.send(reason.clone());
        }
        self.close_reason = Some(reason);
    }

    /// Queues a message for the transport regardless of handshake progress.
    pub fn send(&mut self, message: &ClientMessage) -> Result<(), FrameError> {
        if self.state == SessionState::Closed {
            debug!(event = "send_after_close_dropped");
            return Ok(());
        }
        self.outbound.push_back(frame::encode(message)?);
        Ok(())
    }

    /// Queues a message, holding it back until the session is connected.
    pub fn send_when_connected(&mut self, message: &ClientMessage) -> Result<(), FrameError> {
        match self.state {
            SessionState::Connected => self.send(message),
            SessionState::Closed => {
                debug!(event = "send_after_close_dropped");
                Ok(())
            }
            SessionState::Disconnected | SessionState::Handshaking => {
                self.deferred.push_back(frame::encode(message)?);
                Ok(())
            }
        }
    }

    /// Registers a one-shot connected notification.
    ///
    /// Fires immediately when already connected; dropped without firing once
    /// the session is closed.
    pub fn wait_connected(&mut self, waiter: oneshot::Sender<()>) {
        match self.state {
            SessionState::Connected => {
                let _ = waiter.send(());
            }
            SessionState::Closed => {}
            SessionState::Disconnected | SessionState::Handshaking => {
                self.connected_waiters.push(waiter);
            }
        }
    }

    /// Registers a one-shot closed notification carrying the close reason.
    pub fn wait_closed(&mut self, waiter: oneshot::Sender<CloseReason>) {
        match &self.close_reason {
            Some(reason) => {
                let _ = waiter.send(reason.clone());
            }
            None => self.closed_waiters.push(waiter),
        }
    }

    /// Takes every frame ready to be written to the transport.
    pub fn drain_outbound(&mut self) -> Vec<String> {
        self.outbound.drain(..).collect()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
