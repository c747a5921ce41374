//! Realtime client and latency probe for chat servers speaking DDP over SockJS.
//!
//! The crate is organized by surface:
//! - `stream`: the realtime connection, from SockJS frames up to the client handle.
//! - `chat_api`: REST side-channel used to post chat messages.
//! - `latency`: three-phase timing of correlated operations.
//! - `ping`: raw websocket keep-alive probe.
//! - `config` and `telemetry`: command-line configuration and logging setup.

/// REST side-channel client.
pub mod chat_api;
/// Command-line configuration.
pub mod config;
/// Random identifiers.
pub mod ids;
/// Latency harness.
pub mod latency;
/// Websocket ping probe.
pub mod ping;
/// Realtime client, protocol types, and session state helpers.
pub mod stream;
/// Logging setup.
pub mod telemetry;
