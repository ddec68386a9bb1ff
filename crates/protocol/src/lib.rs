//! Shared vocabulary for the craftlink connectivity layer.
//!
//! Holds the JSON-RPC envelope spoken by the management protocol, the
//! player-list shape both protocols produce, the connection-state and
//! protocol enums the manager reports, and the reconnect backoff schedule.

pub mod backoff;
pub mod constants;
pub mod envelope;
pub mod types;

pub use backoff::ReconnectConfig;
pub use envelope::{Inbound, Request, RpcError};
pub use types::{ConnectionState, PlayerListInfo, Protocol};
