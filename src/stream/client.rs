//! Realtime client façade and websocket worker.
//!
//! `DdpClient::connect` spawns a background worker that owns the websocket and
//! the protocol [`Connection`]. Handles talk to it through a command queue, so
//! every frame and command is processed in one place, in arrival order. The
//! worker outlives a closed session: it keeps answering commands (calls are
//! rejected, close waiters get the reason) until every handle is dropped.

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, WebSocketStream};
use tracing::{debug, info, warn};

use crate::chat_api::{
    rest_base_url, AuthSession, ChatApiClient, ChatApiClientOptions, ChatApiError,
    OutgoingMessage,
};
use crate::ids;
use crate::stream::calls::{CallError, CallHandle, CallReply};
use crate::stream::connection::Connection;
use crate::stream::frame::FrameError;
use crate::stream::router::StreamListener;
use crate::stream::session::{CloseReason, SessionState};

/// Stream carrying every new message posted to a room, keyed by room id.
pub const ROOM_MESSAGES_STREAM: &str = "stream-room-messages";

/// Entry point for creating realtime connections.
#[derive(Clone, Debug)]
pub struct DdpClient {
    host: String,
    endpoint_override: Option<String>,
    rest_base_url_override: Option<String>,
    chat_api_options: ChatApiClientOptions,
}

impl DdpClient {
    /// Creates a client for `host` (no scheme, e.g. `chat.example.com`).
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            endpoint_override: None,
            rest_base_url_override: None,
            chat_api_options: ChatApiClientOptions::default(),
        }
    }

    /// Sets an explicit websocket endpoint instead of a generated SockJS URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.endpoint_override = Some(endpoint.trim_end().to_string());
        self
    }

    /// Sets an explicit REST base URL for the side-channel.
    pub fn with_rest_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.rest_base_url_override = Some(base_url.trim_end().to_string());
        self
    }

    pub fn with_chat_api_options(mut self, options: ChatApiClientOptions) -> Self {
        self.chat_api_options = options;
        self
    }

    /// Starts connecting and returns immediately.
    ///
    /// The handshake proceeds in a background worker; calls made before it
    /// completes are queued and sent once the server confirms the session.
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) -> Result<DdpConnection, ClientError> {
        let chat_api =
            ChatApiClient::with_options(self.rest_base_url(), self.chat_api_options.clone())?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let url = self.endpoint();
        debug!(event = "connect_started", url = %url);

        tokio::spawn(async move {
            connection_worker(url, command_rx, state_tx).await;
        });

        Ok(DdpConnection {
            commands: command_tx,
            state: state_rx,
            chat_api,
            auth: None,
        })
    }

    fn endpoint(&self) -> String {
        match self.endpoint_override.as_deref() {
            Some(endpoint) => endpoint.to_string(),
            None => sockjs_endpoint(&self.host),
        }
    }

    fn rest_base_url(&self) -> String {
        match self.rest_base_url_override.as_deref() {
            Some(base_url) => base_url.to_string(),
            None => rest_base_url(&self.host),
        }
    }
}

/// Builds `wss://<host>/sockjs/<0..=999>/<random>/websocket`.
pub fn sockjs_endpoint(host: &str) -> String {
    format!(
        "wss://{host}/sockjs/{}/{}/websocket",
        ids::sockjs_server_id(),
        ids::random_id()
    )
}

/// Identity returned by the `login` method.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LoginResult {
    pub token: String,
    #[serde(rename = "id")]
    pub user_id: String,
    #[serde(rename = "tokenExpires", default, skip_serializing_if = "Option::is_none")]
    pub token_expires: Option<Value>,
}

enum Command {
    Call {
        method: String,
        params: Vec<Value>,
        reply: CallReply,
    },
    Subscribe {
        name: String,
        key: String,
        listener: StreamListener,
    },
    WaitConnected(oneshot::Sender<()>),
    WaitClosed(oneshot::Sender<CloseReason>),
}

/// Handle to a running realtime connection.
#[derive(Debug)]
pub struct DdpConnection {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    chat_api: ChatApiClient,
    auth: Option<AuthSession>,
}

impl DdpConnection {
    /// Latest session state published by the worker.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Credentials stored by the last successful [`login`](Self::login).
    pub fn auth(&self) -> Option<&AuthSession> {
        self.auth.as_ref()
    }

    /// Issues a method call. The returned handle resolves with the server's
    /// result or rejects with its error payload.
    pub fn call(&self, method: impl Into<String>, params: Vec<Value>) -> CallHandle {
        let (reply, handle) = CallHandle::channel();
        // A stopped worker drops the command and its reply slot, which the
        // handle reports as a closed connection.
        let _ = self.commands.send(Command::Call {
            method: method.into(),
            params,
            reply,
        });
        handle
    }

    /// Resumes a session with `resume_token` and stores the returned
    /// credentials for side-channel requests.
    pub async fn login(&mut self, resume_token: &SecretString) -> Result<LoginResult, ClientError> {
        let result = self
            .call("login", vec![json!({"resume": resume_token.expose_secret()})])
            .await?;
        let login: LoginResult =
            serde_json::from_value(result).map_err(ClientError::InvalidLoginResult)?;

        info!(event = "logged_in", user_id = %login.user_id);
        self.auth = Some(AuthSession {
            token: SecretString::new(login.token.clone()),
            user_id: login.user_id.clone(),
        });
        Ok(login)
    }

    /// Subscribes to stream `name` with `key`; `listener` receives the first
    /// argument of every matching event for the lifetime of the connection.
    pub fn subscribe_stream<F>(
        &self,
        name: impl Into<String>,
        key: impl Into<String>,
        listener: F,
    ) -> Result<(), ClientError>
    where
        F: FnMut(Value) + Send + 'static,
    {
        self.commands
            .send(Command::Subscribe {
                name: name.into(),
                key: key.into(),
                listener: Box::new(listener),
            })
            .map_err(|_| ClientError::WorkerStopped)
    }

    /// Posts a chat message over the REST side-channel using the credentials
    /// from [`login`](Self::login).
    pub async fn send_chat_message(
        &self,
        message_id: impl Into<String>,
        room_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<Value, ClientError> {
        let auth = self.auth.as_ref().ok_or(ClientError::NotLoggedIn)?;
        let message = OutgoingMessage {
            id: message_id.into(),
            rid: room_id.into(),
            msg: text.into(),
        };
        Ok(self.chat_api.send_message(auth, &message).await?)
    }

    /// Resolves once the server has confirmed the session.
    pub async fn wait_connected(&self) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::WaitConnected(tx))
            .map_err(|_| ClientError::WorkerStopped)?;
        rx.await.map_err(|_| ClientError::ConnectionClosed)
    }

    /// Resolves with the close reason once the session is closed.
    pub async fn closed(&self) -> Result<CloseReason, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::WaitClosed(tx))
            .map_err(|_| ClientError::WorkerStopped)?;
        rx.await.map_err(|_| ClientError::WorkerStopped)
    }
}

/// Errors produced by the realtime client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Method call rejected by the server or cut short by a close.
    #[error(transparent)]
    Call(#[from] CallError),

    /// Login succeeded but the result did not carry a token and user id.
    #[error("invalid login result: {0}")]
    InvalidLoginResult(serde_json::Error),

    /// Side-channel request failed.
    #[error("chat api error: {0}")]
    ChatApi(#[from] ChatApiError),

    /// Side-channel request attempted before login.
    #[error("not logged in")]
    NotLoggedIn,

    /// Session closed before the awaited event.
    #[error("connection closed")]
    ConnectionClosed,

    /// Background worker is no longer running.
    #[error("connection worker stopped")]
    WorkerStopped,

    /// Outbound message could not be encoded.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

async fn connection_worker(
    url: String,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<SessionState>,
) {
    let mut connection = Connection::new();

    match connect_async(url.as_str()).await {
        Ok((mut socket, _)) => {
            info!(event = "transport_connected", url = %url);
            run_session(&mut socket, &mut connection, &mut commands, &state_tx).await;
        }
        Err(err) => {
            warn!(event = "transport_connect_failed", url = %url, error = %err);
            connection.close(CloseReason::Transport(err.to_string()));
        }
    }
    publish_state(&state_tx, &connection);

    while let Some(command) = commands.recv().await {
        apply_command(&mut connection, command);
        connection.drain_outbound();
    }
    debug!(event = "worker_stopped");
}

async fn run_session<S>(
    socket: &mut WebSocketStream<S>,
    connection: &mut Connection,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    state_tx: &watch::Sender<SessionState>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        if let Err(err) = flush_outbound(socket, connection).await {
            connection.close(CloseReason::Transport(err.to_string()));
            return;
        }
        publish_state(state_tx, connection);
        if connection.state() == SessionState::Closed {
            let _ = socket.close(None).await;
            return;
        }

        tokio::select! {
            maybe_command = commands.recv() => {
                match maybe_command {
                    Some(command) => apply_command(connection, command),
                    None => {
                        connection.close(CloseReason::ClientDropped);
                        let _ = socket.close(None).await;
                        return;
                    }
                }
            }
            maybe_inbound = socket.next() => {
                match maybe_inbound {
                    Some(Ok(Message::Text(text))) => connection.handle_frame(text.as_str()),
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(err) = socket.send(Message::Pong(payload)).await {
                            connection.close(CloseReason::Transport(err.to_string()));
                            return;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        connection.close(CloseReason::TransportClosed);
                        return;
                    }
                    Some(Ok(_)) => debug!(event = "non_text_frame_ignored"),
                    Some(Err(err)) => {
                        connection.close(CloseReason::Transport(err.to_string()));
                        return;
                    }
                }
            }
        }
    }
}

fn apply_command(connection: &mut Connection, command: Command) {
    match command {
        Command::Call {
            method,
            params,
            reply,
        } => {
            if let Err(err) = connection.issue(&method, params, reply) {
                warn!(event = "call_encode_failed", method = %method, error = %err);
            }
        }
        Command::Subscribe {
            name,
            key,
            listener,
        } => {
            if let Err(err) = connection.subscribe(&name, &key, listener) {
                warn!(event = "subscribe_encode_failed", name = %name, error = %err);
            }
        }
        Command::WaitConnected(waiter) => connection.wait_connected(waiter),
        Command::WaitClosed(waiter) => connection.wait_closed(waiter),
    }
}

async fn flush_outbound<S>(
    socket: &mut WebSocketStream<S>,
    connection: &mut Connection,
) -> Result<(), WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    for frame in connection.drain_outbound() {
        debug!(event = "frame_sent", frame = %frame);
        socket.send(Message::Text(frame.into())).await?;
    }
    Ok(())
}

fn publish_state(state_tx: &watch::Sender<SessionState>, connection: &Connection) {
    let state = connection.state();
    state_tx.send_if_modified(|current| {
        if *current == state {
            return false;
        }
        *current = state;
        true
    });
}
