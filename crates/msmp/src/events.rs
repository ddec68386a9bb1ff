//! Server-initiated notifications.
//!
//! Notification methods are matched by name and handed to the registered
//! [`ServerEventListener`]. Save notifications are informational and only
//! logged.

use serde_json::Value;
use tracing::{debug, info, trace};

use craftlink_protocol::envelope::namespaced;

/// Receives lifecycle notifications from the server.
///
/// Every method has a no-op default so implementors only override what
/// they care about. Calls happen on the read pump; keep them short.
pub trait ServerEventListener: Send + Sync {
    fn on_server_started(&self, _params: &Value) {}
    fn on_server_stopping(&self, _params: &Value) {}
    fn on_player_joined(&self, _params: &Value) {}
    fn on_player_left(&self, _params: &Value) {}
}

/// Known notification kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    Started,
    Stopping,
    PlayerJoined,
    PlayerLeft,
    Saving,
    Saved,
    Other,
}

impl ServerEvent {
    /// Classifies a notification method, with or without namespace prefix.
    pub fn from_method(method: &str) -> Self {
        match namespaced(method).as_str() {
            "minecraft:notification/server/started" => Self::Started,
            "minecraft:notification/server/stopping" => Self::Stopping,
            "minecraft:notification/players/joined" => Self::PlayerJoined,
            "minecraft:notification/players/left" => Self::PlayerLeft,
            "minecraft:notification/server/saving" => Self::Saving,
            "minecraft:notification/server/saved" => Self::Saved,
            _ => Self::Other,
        }
    }
}

/// Routes one notification to the listener, if any.
pub(crate) fn dispatch(listener: Option<&dyn ServerEventListener>, method: &str, params: &Value) {
    let event = ServerEvent::from_method(method);
    trace!(method, ?event, "notification received");

    match event {
        ServerEvent::Saving => {
            debug!("server is saving");
            return;
        }
        ServerEvent::Saved => {
            debug!("server save complete");
            return;
        }
        ServerEvent::Other => {
            debug!(method, "unhandled notification");
            return;
        }
        _ => {}
    }

    let Some(listener) = listener else {
        info!(method, "no event listener set, dropping notification");
        return;
    };

    match event {
        ServerEvent::Started => listener.on_server_started(params),
        ServerEvent::Stopping => listener.on_server_stopping(params),
        ServerEvent::PlayerJoined => listener.on_player_joined(params),
        ServerEvent::PlayerLeft => listener.on_player_left(params),
        ServerEvent::Saving | ServerEvent::Saved | ServerEvent::Other => {}
    }
}
