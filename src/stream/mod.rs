//! Realtime stream modules.
//!
//! - `frame`: SockJS frame parsing and double-encoded payload helpers.
//! - `proto`: DDP messages exchanged with the server.
//! - `session`: handshake state machine, deferred send queue and waiters.
//! - `calls`: method-call id allocation and result correlation.
//! - `router`: stream subscriptions and event fan-out.
//! - `connection`: sans-IO core composing the pieces above.
//! - `client`: websocket worker and the user-facing connection handle.

/// Websocket worker and connection handle.
pub mod client;
/// Sans-IO protocol core.
pub mod connection;
/// Method-call correlation.
pub mod calls;
/// SockJS framing.
pub mod frame;
/// DDP protocol messages.
pub mod proto;
/// Stream subscription routing.
pub mod router;
/// Session lifecycle state machine.
pub mod session;
