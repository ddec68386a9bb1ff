//! Application orchestrator: builds the clients, runs the operator console.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use craftlink_connection::{ConnectionManager, ConnectionReport, ConsoleChannel, ProtocolStatus};
use craftlink_msmp::{MsmpClient, ServerEvent};
use craftlink_protocol::Protocol;
use craftlink_rcon::RconClient;

use crate::config::Config;
use crate::listener::EventForwarder;

const HELP: &str = "\
commands:
  !status                 connection status of both protocols
  !players                online players
  !reconnect [msmp|rcon]  reconnect one or both protocols
  !help                   this text
  !quit                   exit
anything else is sent to the server as a console command";

/// Creates clients for the enabled protocols and the manager over them.
pub fn build_manager(
    config: &Config,
    events: mpsc::UnboundedSender<ServerEvent>,
) -> ConnectionManager {
    let mut manager = ConnectionManager::new(Arc::new(config.clone()), config.cache_ttl());

    if config.msmp.enabled {
        let client = MsmpClient::new(config.msmp_config());
        client.set_event_listener(Arc::new(EventForwarder::new(events)));
        manager = manager.with_client(Arc::new(client));
    }
    if config.rcon.enabled {
        let channel = ConsoleChannel::new(RconClient::new(config.rcon_config()));
        manager = manager.with_client(Arc::new(channel));
    }
    manager
}

/// Runs until stdin asks to quit or SIGINT arrives.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let manager = Arc::new(build_manager(&config, events_tx));

    let results = manager.connect_all().await;
    tracing::info!(
        management = results.management,
        console = results.console,
        "initial connect finished"
    );
    if !results.any() {
        tracing::warn!("no protocol connected yet, commands will retry");
    }

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if matches!(line, "!quit" | "!exit") {
                        break;
                    }
                    println!("{}", handle_line(&manager, line).await);
                }
                None => {
                    tracing::info!("stdin closed, waiting for SIGINT");
                    stdin_open = false;
                }
            },
            Some(event) = events.recv() => on_event(&manager, event, config.startup_delay()),
            _ = &mut ctrl_c => {
                tracing::info!("SIGINT received, shutting down");
                break;
            }
        }
    }

    manager.immediate_shutdown().await;
    Ok(())
}

fn on_event(manager: &Arc<ConnectionManager>, event: ServerEvent, startup_delay: std::time::Duration) {
    match event {
        ServerEvent::Started => {
            let manager = Arc::clone(manager);
            tokio::spawn(async move {
                let results = manager.connect_after_server_start(startup_delay).await;
                tracing::info!(
                    management = results.management,
                    console = results.console,
                    "connected after server start"
                );
            });
        }
        ServerEvent::Stopping => {
            let manager = Arc::clone(manager);
            tokio::spawn(async move { manager.invalidate_all_caches().await });
        }
        _ => {}
    }
}

/// Executes one operator line and returns the text to print.
pub async fn handle_line(manager: &ConnectionManager, line: &str) -> String {
    let mut words = line.split_whitespace();
    match words.next().unwrap_or_default() {
        "!help" => HELP.to_string(),
        "!status" => format_report(&manager.get_connection_status().await),
        "!players" => players(manager).await,
        "!reconnect" => match words.next() {
            None => {
                let results = manager.reconnect_all().await;
                format!(
                    "msmp: {}, rcon: {}",
                    outcome(results.management),
                    outcome(results.console)
                )
            }
            Some(name) => match name.parse::<Protocol>() {
                Ok(protocol) => {
                    let ok = manager.reconnect_single(protocol).await;
                    format!("{protocol}: {}", outcome(ok))
                }
                Err(e) => e.to_string(),
            },
        },
        word if word.starts_with('!') => format!("unknown command {word}, try !help"),
        _ => run_command(manager, line).await,
    }
}

fn outcome(ok: bool) -> &'static str {
    if ok { "connected" } else { "failed" }
}

async fn players(manager: &ConnectionManager) -> String {
    let Some(selected) = manager.ensure_connected().await else {
        return "no connection available".to_string();
    };
    match selected.client.player_list().await {
        Ok(list) => format!("[{}] {list}", selected.protocol),
        Err(e) => format!("player list failed: {e}"),
    }
}

async fn run_command(manager: &ConnectionManager, command: &str) -> String {
    let selected = match manager.get_client_for_command(command).await {
        Some(selected) => Some(selected),
        None => {
            manager.ensure_connected().await;
            manager.get_client_for_command(command).await
        }
    };
    let Some(selected) = selected else {
        return "no connection available".to_string();
    };

    match selected.client.execute(command).await {
        Ok(Some(output)) if output.trim().is_empty() => format!("[{}] (no output)", selected.protocol),
        Ok(Some(output)) => format!("[{}] {}", selected.protocol, output.trim_end()),
        Ok(None) => format!("[{}] no response", selected.protocol),
        Err(e) => format!("command failed: {e}"),
    }
}

fn format_status(name: &str, status: &ProtocolStatus) -> String {
    format!(
        "{name}: enabled={} connected={} authenticated={}",
        status.enabled, status.connected, status.authenticated
    )
}

pub fn format_report(report: &ConnectionReport) -> String {
    let mut out = vec![
        format_status(Protocol::Management.as_str(), &report.management),
        format_status(Protocol::Console.as_str(), &report.console),
        format!(
            "shutdown mode: {}, cache: {} entries (ttl {}s)",
            if report.shutdown_mode { "on" } else { "off" },
            report.cache_size,
            report.cache_ttl_secs
        ),
    ];
    if let Some(details) = &report.management_details {
        out.push(format!("msmp details: {details}"));
    }
    out.join("\n")
}
