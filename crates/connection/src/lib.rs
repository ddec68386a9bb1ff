//! Coordinates the console and management clients.
//!
//! [`ConnectionManager`] answers which protocol is usable, picks a client
//! per command, and reconnects or stands both clients down as a unit.
//! Callers receive the chosen client as an `Arc<dyn ProtocolClient>` and
//! talk to it directly.

pub mod cache;
pub mod channel;
pub mod config;
pub mod error;
pub mod manager;
pub mod policy;
pub mod status;

pub use cache::StatusCache;
pub use channel::{ChannelFuture, ConsoleChannel, ProtocolClient};
pub use config::ConfigProvider;
pub use error::ChannelError;
pub use manager::{ConnectionManager, ManagerTiming, SelectedClient};
pub use status::{ConnectResults, ConnectionReport, ProtocolStatus};
