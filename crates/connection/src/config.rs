//! What the manager needs to know from the application's configuration.

use craftlink_protocol::Protocol;

/// Supplies enabled flags and routing hints. Read at construction and
/// again whenever shutdown mode is reset.
pub trait ConfigProvider: Send + Sync {
    fn is_management_enabled(&self) -> bool;

    fn is_console_enabled(&self) -> bool;

    /// Command text that must always be answered by the console.
    fn performance_command(&self) -> String {
        "tps".to_string()
    }

    fn is_enabled(&self, protocol: Protocol) -> bool {
        match protocol {
            Protocol::Management => self.is_management_enabled(),
            Protocol::Console => self.is_console_enabled(),
        }
    }
}
