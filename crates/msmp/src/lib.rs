//! Management-protocol (MSMP) client.
//!
//! JSON-RPC 2.0 over a persistent, bearer-authenticated WebSocket, with
//! id-correlated requests, server notifications, heartbeat liveness
//! detection and backoff reconnection. [`MsmpWorker`] hosts a client on
//! its own thread for synchronous callers.

pub mod blocking;
pub mod client;
pub mod error;
pub mod events;
mod pumps;

#[cfg(test)]
mod test_server;

pub use blocking::MsmpWorker;
pub use client::{MsmpClient, MsmpConfig, MsmpSnapshot, ReconnectOutcome};
pub use error::MsmpError;
pub use events::{ServerEvent, ServerEventListener};
pub use pumps::heartbeat::HeartbeatSettings;
