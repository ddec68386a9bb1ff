//! Error types for the management-protocol client.

use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::http::StatusCode;

use craftlink_protocol::RpcError;

/// Errors from the management-protocol client.
#[derive(Debug, thiserror::Error)]
pub enum MsmpError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("auth token cannot be sent as a header")]
    InvalidToken,

    #[error("{method} timed out")]
    Timeout { method: String },

    #[error("connection closed")]
    Closed,

    #[error("not connected")]
    NotConnected,

    #[error("server error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("client is shut down")]
    ShutDown,

    #[error("background worker is gone")]
    WorkerGone,
}

impl MsmpError {
    pub(crate) fn timeout(method: impl Into<String>) -> Self {
        Self::Timeout {
            method: method.into(),
        }
    }

    /// Rejected credentials: an unusable token or a 401/403 handshake
    /// response. Retrying with the same token cannot succeed.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::InvalidToken => true,
            Self::Ws(tungstenite::Error::Http(resp)) => matches!(
                resp.status(),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            ),
            _ => false,
        }
    }

    /// Returns `true` when the failure says nothing about the link itself
    /// (the server answered, just not with a result).
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Rpc { .. })
    }
}

impl From<RpcError> for MsmpError {
    fn from(err: RpcError) -> Self {
        Self::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msmp_error_display() {
        assert_eq!(MsmpError::Closed.to_string(), "connection closed");
        assert_eq!(
            MsmpError::timeout("minecraft:players").to_string(),
            "minecraft:players timed out"
        );

        let err = MsmpError::Rpc {
            code: -32601,
            message: "Method not found".into(),
        };
        assert!(err.to_string().contains("-32601"));
        assert!(err.is_server_error());
        assert!(!MsmpError::NotConnected.is_server_error());
    }

    #[test]
    fn rejected_handshake_is_auth_failure() {
        let rejected = |status: StatusCode| {
            let mut resp = tungstenite::http::Response::<Option<Vec<u8>>>::new(None);
            *resp.status_mut() = status;
            MsmpError::Ws(tungstenite::Error::Http(resp.into()))
        };

        assert!(rejected(StatusCode::UNAUTHORIZED).is_auth_failure());
        assert!(rejected(StatusCode::FORBIDDEN).is_auth_failure());
        assert!(!rejected(StatusCode::SERVICE_UNAVAILABLE).is_auth_failure());
        assert!(MsmpError::InvalidToken.is_auth_failure());
        assert!(!MsmpError::Closed.is_auth_failure());
    }

    #[test]
    fn from_rpc_error() {
        let rpc = RpcError {
            code: 401,
            message: "unauthorized".into(),
            data: None,
        };
        match MsmpError::from(rpc) {
            MsmpError::Rpc { code, message } => {
                assert_eq!(code, 401);
                assert_eq!(message, "unauthorized");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
