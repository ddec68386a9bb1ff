//! Server notifications: logged, then forwarded to the main loop.

use serde_json::Value;
use tokio::sync::mpsc;

use craftlink_msmp::{ServerEvent, ServerEventListener};

/// Logs every server event and forwards it on `events`.
pub struct EventForwarder {
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl EventForwarder {
    pub fn new(events: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self { events }
    }

    fn forward(&self, event: ServerEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!(?event, "event receiver gone");
        }
    }
}

/// Player name from a players/joined or players/left parameter object.
pub fn player_name(params: &Value) -> &str {
    params
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
}

impl ServerEventListener for EventForwarder {
    fn on_server_started(&self, _params: &Value) {
        tracing::info!("server started");
        self.forward(ServerEvent::Started);
    }

    fn on_server_stopping(&self, _params: &Value) {
        tracing::info!("server stopping");
        self.forward(ServerEvent::Stopping);
    }

    fn on_player_joined(&self, params: &Value) {
        tracing::info!(player = player_name(params), "player joined");
        self.forward(ServerEvent::PlayerJoined);
    }

    fn on_player_left(&self, params: &Value) {
        tracing::info!(player = player_name(params), "player left");
        self.forward(ServerEvent::PlayerLeft);
    }
}
