//! Per-protocol status records and the report built from them.

use serde::Serialize;
use serde_json::Value;

use craftlink_protocol::Protocol;

/// What the manager last observed about one protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProtocolStatus {
    pub enabled: bool,
    pub connected: bool,
    pub authenticated: bool,
    pub shutdown_mode: bool,
}

/// Status of both protocols. Only mutated through its methods, always
/// under the manager's lock.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    management: ProtocolStatus,
    console: ProtocolStatus,
}

impl StatusBoard {
    pub fn new(management_enabled: bool, console_enabled: bool) -> Self {
        Self {
            management: ProtocolStatus {
                enabled: management_enabled,
                ..Default::default()
            },
            console: ProtocolStatus {
                enabled: console_enabled,
                ..Default::default()
            },
        }
    }

    pub fn get(&self, protocol: Protocol) -> ProtocolStatus {
        match protocol {
            Protocol::Management => self.management,
            Protocol::Console => self.console,
        }
    }

    fn slot(&mut self, protocol: Protocol) -> &mut ProtocolStatus {
        match protocol {
            Protocol::Management => &mut self.management,
            Protocol::Console => &mut self.console,
        }
    }

    pub fn set_enabled(&mut self, protocol: Protocol, enabled: bool) {
        self.slot(protocol).enabled = enabled;
    }

    pub fn record_liveness(&mut self, protocol: Protocol, connected: bool, authenticated: bool) {
        let slot = self.slot(protocol);
        slot.connected = connected;
        slot.authenticated = authenticated;
    }

    pub fn set_shutdown_mode(&mut self, on: bool) {
        self.management.shutdown_mode = on;
        self.console.shutdown_mode = on;
        if on {
            self.record_liveness(Protocol::Management, false, false);
            self.record_liveness(Protocol::Console, false, false);
        }
    }
}

/// Outcome of [`connect_all`](crate::ConnectionManager::connect_all).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectResults {
    pub management: bool,
    pub console: bool,
}

impl ConnectResults {
    pub fn get(&self, protocol: Protocol) -> bool {
        match protocol {
            Protocol::Management => self.management,
            Protocol::Console => self.console,
        }
    }

    pub(crate) fn set(&mut self, protocol: Protocol, ok: bool) {
        match protocol {
            Protocol::Management => self.management = ok,
            Protocol::Console => self.console = ok,
        }
    }

    pub fn any(&self) -> bool {
        self.management || self.console
    }
}

/// Snapshot returned by [`get_connection_status`](crate::ConnectionManager::get_connection_status).
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub management: ProtocolStatus,
    pub console: ProtocolStatus,
    pub shutdown_mode: bool,
    pub cache_ttl_secs: u64,
    pub cache_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub management_details: Option<Value>,
}
