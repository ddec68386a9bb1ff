//! Error types for the console client.

/// Errors produced by the remote-console client.
#[derive(Debug, thiserror::Error)]
pub enum RconError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("not connected")]
    NotConnected,

    #[error("connection timed out")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("client is shut down")]
    ShutDown,
}

impl RconError {
    /// Returns `true` for a read/write that hit the socket timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}
