//! Error type shared by both channel adapters.

use craftlink_msmp::MsmpError;
use craftlink_rcon::RconError;

/// Failure from either protocol, as seen through [`ProtocolClient`](crate::ProtocolClient).
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("console: {0}")]
    Console(#[from] RconError),

    #[error("management: {0}")]
    Management(#[from] MsmpError),

    /// The blocking task running a console call died.
    #[error("worker failed: {0}")]
    Worker(String),
}

impl ChannelError {
    /// Authentication failures are never worth retrying.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::Console(e) => matches!(e, RconError::AuthFailed(_)),
            Self::Management(e) => e.is_auth_failure(),
            Self::Worker(_) => false,
        }
    }
}
