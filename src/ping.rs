//! Raw websocket keep-alive probe.
//!
//! Opens a plain websocket, sends the text `ping` right away and then once
//! per interval, and logs every frame that comes back until the server
//! closes the connection.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{self, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, WebSocketStream};
use tracing::{debug, info};

pub const PING_TEXT: &str = "ping";

/// Frame counts for one probe run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PingSummary {
    pub sent: u64,
    pub received: u64,
}

#[derive(Debug, Error)]
pub enum PingError {
    #[error("websocket connect failed: {0}")]
    Connect(#[source] WsError),

    #[error("websocket error: {0}")]
    Transport(#[source] WsError),
}

/// Connects to `url` and pings it every `interval` until the socket closes.
pub async fn run_ping(url: &str, interval: Duration) -> Result<PingSummary, PingError> {
    let (mut socket, _) = connect_async(url).await.map_err(PingError::Connect)?;
    info!(event = "ping_connected", url);
    drive_ping(&mut socket, interval).await
}

async fn drive_ping<S>(
    socket: &mut WebSocketStream<S>,
    interval: Duration,
) -> Result<PingSummary, PingError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut summary = PingSummary::default();
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                info!(event = "ping_sent", frame = PING_TEXT);
                socket
                    .send(Message::Text(PING_TEXT.into()))
                    .await
                    .map_err(PingError::Transport)?;
                summary.sent += 1;
            }
            inbound = socket.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        summary.received += 1;
                        info!(event = "ping_frame_received", frame = %text.as_str());
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        summary.received += 1;
                        info!(event = "ping_frame_received", bytes = bytes.len());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(event = "ping_closed", close = ?frame);
                        return Ok(summary);
                    }
                    Some(Ok(other)) => debug!(event = "ping_control_frame", frame = ?other),
                    Some(Err(WsError::ConnectionClosed)) | None => {
                        info!(event = "ping_closed");
                        return Ok(summary);
                    }
                    Some(Err(err)) => return Err(PingError::Transport(err)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::accept_async;

    use super::{run_ping, PingError, PING_TEXT};

    #[tokio::test]
    async fn pings_until_server_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut socket = accept_async(stream).await.expect("handshake");
            let mut pings = 0;
            while pings < 2 {
                match socket.next().await {
                    Some(Ok(Message::Text(text))) => {
                        assert_eq!(text.as_str(), PING_TEXT);
                        pings += 1;
                        socket
                            .send(Message::Text(format!("pong {pings}").into()))
                            .await
                            .expect("reply");
                    }
                    Some(Ok(_)) => {}
                    other => panic!("unexpected inbound: {other:?}"),
                }
            }
            socket.close(None).await.expect("close");
            pings
        });

        let summary = run_ping(&format!("ws://{addr}"), Duration::from_millis(20))
            .await
            .expect("ping run");

        assert_eq!(server.await.expect("server task"), 2);
        assert!(summary.sent >= 2);
        assert_eq!(summary.received, 2);
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let error = run_ping(&format!("ws://{addr}"), Duration::from_millis(20))
            .await
            .expect_err("nothing is listening");
        assert!(matches!(error, PingError::Connect(_)));
    }
}
