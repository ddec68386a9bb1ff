//! Connection vocabulary shared by both clients and the manager.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_MAX_PLAYERS;

/// The two control channels a game server can be reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// JSON-RPC over WebSocket (MSMP).
    Management,
    /// Binary remote console (RCON).
    Console,
}

impl Protocol {
    /// Both protocols in default preference order.
    pub const ALL: [Protocol; 2] = [Protocol::Management, Protocol::Console];

    /// Short operator-facing name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Management => "msmp",
            Self::Console => "rcon",
        }
    }

    /// Key under which the manager caches this protocol's verdict.
    pub fn cache_key(self) -> &'static str {
        match self {
            Self::Management => "management-connected",
            Self::Console => "console-connected",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown protocol name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProtocol(pub String);

impl fmt::Display for UnknownProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown protocol: {}", self.0)
    }
}

impl std::error::Error for UnknownProtocol {}

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "msmp" | "management" => Ok(Self::Management),
            "rcon" | "console" => Ok(Self::Console),
            other => Err(UnknownProtocol(other.to_string())),
        }
    }
}

/// Observed state of a connection. Reported, never used to drive transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Unknown,
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionState {
    /// Maps a liveness verdict onto a state.
    pub fn from_connected(connected: bool) -> Self {
        if connected {
            Self::Connected
        } else {
            Self::Disconnected
        }
    }

    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

/// Online players as reported by either protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerListInfo {
    pub current: u32,
    pub max: u32,
    pub names: Vec<String>,
}

impl Default for PlayerListInfo {
    fn default() -> Self {
        Self {
            current: 0,
            max: DEFAULT_MAX_PLAYERS,
            names: Vec::new(),
        }
    }
}

impl PlayerListInfo {
    /// Builds a list whose count is taken from the names themselves.
    pub fn from_names(names: Vec<String>, max: u32) -> Self {
        Self {
            current: names.len() as u32,
            max,
            names,
        }
    }
}

impl fmt::Display for PlayerListInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} online", self.current, self.max)?;
        if !self.names.is_empty() {
            write!(f, ": {}", self.names.join(", "))?;
        }
        Ok(())
    }
}
