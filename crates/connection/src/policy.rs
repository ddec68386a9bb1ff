//! Which protocol a command should go to.

use craftlink_protocol::Protocol;

/// Command prefixes that are better served by the management protocol.
pub const ADMIN_PREFIXES: [&str; 5] = ["allowlist", "ban", "op", "gamerule", "serversettings"];

fn normalize(command: &str) -> String {
    command.trim().trim_start_matches('/').to_lowercase()
}

/// True for the configured performance query (e.g. `tps`), which only the
/// console can answer.
pub fn is_performance_query(command: &str, performance_command: &str) -> bool {
    let wanted = normalize(performance_command);
    !wanted.is_empty() && normalize(command) == wanted
}

pub fn is_admin_command(command: &str) -> bool {
    let command = normalize(command);
    ADMIN_PREFIXES.iter().any(|p| command.starts_with(p))
}

/// Protocol a command must or should use, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    /// Only this protocol may serve the command.
    Forced(Protocol),
    /// Use this protocol when connected, otherwise fall back.
    Preferred(Protocol),
    /// Default preference order.
    Default,
}

pub fn route(command: &str, performance_command: &str) -> Routing {
    if is_performance_query(command, performance_command) {
        Routing::Forced(Protocol::Console)
    } else if is_admin_command(command) {
        Routing::Preferred(Protocol::Management)
    } else {
        Routing::Default
    }
}
