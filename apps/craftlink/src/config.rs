//! Craftlink configuration.
//!
//! Stored as TOML at `$CRAFTLINK_CONFIG`, or `~/.config/craftlink/config.toml`
//! when the variable is unset. A default file is written on first run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use craftlink_connection::ConfigProvider;
use craftlink_msmp::MsmpConfig;
use craftlink_rcon::RconConfig;

const MSMP_PASSWORD_PLACEHOLDER: &str = "your_msmp_password_here";
const RCON_PASSWORD_PLACEHOLDER: &str = "your_rcon_password_here";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Verbose logging for craftlink crates.
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub msmp: MsmpSection,

    #[serde(default)]
    pub rcon: RconSection,

    #[serde(default)]
    pub commands: CommandsSection,

    #[serde(default)]
    pub advanced: AdvancedSection,
}

/// Management protocol endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsmpSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_msmp_port")]
    pub port: u16,
    /// Bearer token.
    #[serde(default = "default_msmp_password")]
    pub password: String,
}

impl Default for MsmpSection {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_msmp_port(),
            password: default_msmp_password(),
        }
    }
}

/// Remote console endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RconSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_rcon_port")]
    pub port: u16,
    #[serde(default = "default_rcon_password")]
    pub password: String,
}

impl Default for RconSection {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_rcon_port(),
            password: default_rcon_password(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsSection {
    /// Performance query, always sent over the console.
    #[serde(default = "default_tps_command")]
    pub tps_command: String,
}

impl Default for CommandsSection {
    fn default() -> Self {
        Self {
            tps_command: default_tps_command(),
        }
    }
}

/// Timing knobs, all in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedSection {
    /// Interval between management heartbeats.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Cap on the management reconnect backoff.
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: u64,
    /// How long connection verdicts are cached.
    #[serde(default = "default_cache_ttl")]
    pub player_list_cache_ttl: u64,
    /// Wait after a server-started event before connecting.
    #[serde(default = "default_startup_delay")]
    pub startup_delay: u64,
}

impl Default for AdvancedSection {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            reconnect_interval: default_reconnect_interval(),
            player_list_cache_ttl: default_cache_ttl(),
            startup_delay: default_startup_delay(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "localhost".into()
}

fn default_msmp_port() -> u16 {
    21111
}

fn default_rcon_port() -> u16 {
    25575
}

fn default_msmp_password() -> String {
    MSMP_PASSWORD_PLACEHOLDER.into()
}

fn default_rcon_password() -> String {
    RCON_PASSWORD_PLACEHOLDER.into()
}

fn default_tps_command() -> String {
    "tps".into()
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_reconnect_interval() -> u64 {
    300
}

fn default_cache_ttl() -> u64 {
    5
}

fn default_startup_delay() -> u64 {
    5
}

impl Config {
    /// Loads configuration from the default location, creating it if absent.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            tracing::info!(path = %path.display(), "wrote default configuration");
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Restrict permissions on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Problems that prevent startup. Empty when the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !self.msmp.enabled && !self.rcon.enabled {
            errors.push("at least one of [msmp] or [rcon] must be enabled".to_string());
        }
        if self.msmp.enabled {
            check_endpoint(
                "msmp",
                &self.msmp.host,
                self.msmp.port,
                &self.msmp.password,
                MSMP_PASSWORD_PLACEHOLDER,
                &mut errors,
            );
        }
        if self.rcon.enabled {
            check_endpoint(
                "rcon",
                &self.rcon.host,
                self.rcon.port,
                &self.rcon.password,
                RCON_PASSWORD_PLACEHOLDER,
                &mut errors,
            );
        }
        if self.advanced.heartbeat_interval == 0 {
            errors.push("advanced.heartbeat_interval must be positive".to_string());
        }
        if self.advanced.reconnect_interval == 0 {
            errors.push("advanced.reconnect_interval must be positive".to_string());
        }
        errors
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.advanced.player_list_cache_ttl)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.advanced.startup_delay)
    }

    pub fn msmp_config(&self) -> MsmpConfig {
        let mut config = MsmpConfig::new(&self.msmp.host, self.msmp.port, &self.msmp.password);
        config.heartbeat.interval = Duration::from_secs(self.advanced.heartbeat_interval);
        config.reconnect = config
            .reconnect
            .with_max_delay(Duration::from_secs(self.advanced.reconnect_interval));
        config
    }

    pub fn rcon_config(&self) -> RconConfig {
        RconConfig::new(&self.rcon.host, self.rcon.port, &self.rcon.password)
    }
}

fn check_endpoint(
    section: &str,
    host: &str,
    port: u16,
    password: &str,
    placeholder: &str,
    errors: &mut Vec<String>,
) {
    if host.trim().is_empty() {
        errors.push(format!("{section}.host is not set"));
    }
    if port < 1024 {
        errors.push(format!("{section}.port {port} is invalid (expected 1024-65535)"));
    }
    if password.is_empty() {
        errors.push(format!("{section}.password is not set"));
    } else if password == placeholder {
        errors.push(format!("{section}.password is still the placeholder value"));
    }
}

impl ConfigProvider for Config {
    fn is_management_enabled(&self) -> bool {
        self.msmp.enabled
    }

    fn is_console_enabled(&self) -> bool {
        self.rcon.enabled
    }

    fn performance_command(&self) -> String {
        self.commands.tps_command.clone()
    }
}

/// `$CRAFTLINK_CONFIG`, else the per-user config directory.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os("CRAFTLINK_CONFIG") {
        return PathBuf::from(path);
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("craftlink").join("config.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("craftlink")
            .join("config.toml")
    }
}
