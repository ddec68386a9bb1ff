//! Protocol constants and timing defaults.

use std::time::Duration;

/// Namespace every management-protocol method name lives under.
pub const METHOD_PREFIX: &str = "minecraft:";

/// JSON-RPC version string sent in every request envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Maximum time to wait for a management-protocol response.
pub const MSMP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum time for the WebSocket handshake.
pub const MSMP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum time for the post-connect verification request.
pub const MSMP_VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between connect and the first heartbeat.
pub const MSMP_HEARTBEAT_SETTLE: Duration = Duration::from_secs(2);

/// Interval between heartbeat pings.
pub const MSMP_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Time to wait for the pong after each heartbeat ping.
pub const MSMP_PONG_WAIT: Duration = Duration::from_secs(10);

/// Time since the last pong after which the link is considered dead.
pub const MSMP_HEARTBEAT_STALE: Duration = Duration::from_secs(90);

/// Consecutive heartbeat failures that force a reconnect.
pub const MSMP_MAX_HEARTBEAT_FAILURES: u32 = 3;

/// Reconnect attempts made after one link loss before giving up.
pub const MSMP_MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Maximum accepted WebSocket message size (16 MB).
pub const MSMP_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Maximum time for the console TCP connect and authentication.
pub const RCON_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Read timeout while waiting for a console command response.
pub const RCON_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest console packet body accepted from the server.
pub const RCON_MAX_PACKET_LEN: usize = 1024 * 1024;

/// Console command that lists online players.
pub const RCON_LIST_COMMAND: &str = "list";

/// Console command that stops the server.
pub const RCON_STOP_COMMAND: &str = "stop";

/// Player capacity assumed when the server does not report one.
pub const DEFAULT_MAX_PLAYERS: u32 = 20;

/// Default lifetime of a cached connectivity verdict.
pub const STATUS_CACHE_TTL: Duration = Duration::from_secs(5);
