//! Failover, caching and coordinated reconnection across both protocols.
//!
//! The manager never proxies protocol calls. It decides which client a
//! caller should use, keeps both clients alive, and answers "is protocol X
//! usable right now" from a short-lived cache. Every public method is
//! fail-soft: errors are logged and reported as `false` or `None`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use craftlink_protocol::{ConnectionState, Protocol, ReconnectConfig};

use crate::cache::StatusCache;
use crate::channel::ProtocolClient;
use crate::config::ConfigProvider;
use crate::policy::{self, Routing};
use crate::status::{ConnectResults, ConnectionReport, ProtocolStatus, StatusBoard};

/// Delays and limits used by the manager.
#[derive(Debug, Clone)]
pub struct ManagerTiming {
    /// Pause before [`ConnectionManager::reconnect_all`] reconnects.
    pub reconnect_all_settle: Duration,
    /// Pause before an explicit management reconnect.
    pub management_settle: Duration,
    /// Pause before an explicit console reconnect.
    pub console_settle: Duration,
    /// Delay schedule between retry attempts.
    pub retry: ReconnectConfig,
    pub max_retry_attempts: u32,
    /// Bound on the whole reconnect round run by `ensure_connected`.
    pub auto_reconnect_timeout: Duration,
    /// Bound on each client's shutdown when entering shutdown mode.
    pub shutdown_client_timeout: Duration,
}

impl Default for ManagerTiming {
    fn default() -> Self {
        Self {
            reconnect_all_settle: Duration::from_secs(3),
            management_settle: Duration::from_secs(2),
            console_settle: Duration::from_secs(1),
            retry: ReconnectConfig::manager_retry(),
            max_retry_attempts: 3,
            auto_reconnect_timeout: Duration::from_secs(20),
            shutdown_client_timeout: Duration::from_secs(2),
        }
    }
}

impl ManagerTiming {
    /// No settle or retry delays. Timeouts keep their defaults.
    pub fn immediate() -> Self {
        Self {
            reconnect_all_settle: Duration::ZERO,
            management_settle: Duration::ZERO,
            console_settle: Duration::ZERO,
            retry: ReconnectConfig {
                initial_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                backoff_factor: 2.0,
            },
            ..Self::default()
        }
    }

    fn settle_for(&self, protocol: Protocol) -> Duration {
        match protocol {
            Protocol::Management => self.management_settle,
            Protocol::Console => self.console_settle,
        }
    }
}

/// A client picked by the manager, ready to be used directly.
#[derive(Clone)]
pub struct SelectedClient {
    pub protocol: Protocol,
    pub client: Arc<dyn ProtocolClient>,
}

impl std::fmt::Debug for SelectedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedClient")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

pub struct ConnectionManager {
    config: Arc<dyn ConfigProvider>,
    clients: HashMap<Protocol, Arc<dyn ProtocolClient>>,
    board: Mutex<StatusBoard>,
    cache: StatusCache,
    shutdown: AtomicBool,
    shutdown_lock: Mutex<()>,
    timing: ManagerTiming,
}

impl ConnectionManager {
    pub fn new(config: Arc<dyn ConfigProvider>, cache_ttl: Duration) -> Self {
        let board = StatusBoard::new(
            config.is_management_enabled(),
            config.is_console_enabled(),
        );
        Self {
            config,
            clients: HashMap::new(),
            board: Mutex::new(board),
            cache: StatusCache::new(cache_ttl),
            shutdown: AtomicBool::new(false),
            shutdown_lock: Mutex::new(()),
            timing: ManagerTiming::default(),
        }
    }

    /// Registers the client for its protocol, replacing any previous one.
    pub fn with_client(mut self, client: Arc<dyn ProtocolClient>) -> Self {
        self.clients.insert(client.protocol(), client);
        self
    }

    pub fn with_timing(mut self, timing: ManagerTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn client(&self, protocol: Protocol) -> Option<Arc<dyn ProtocolClient>> {
        self.clients.get(&protocol).cloned()
    }

    pub fn is_shutdown_mode(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    async fn is_enabled(&self, protocol: Protocol) -> bool {
        self.board.lock().await.get(protocol).enabled && self.clients.contains_key(&protocol)
    }

    async fn enabled_protocols(&self) -> Vec<Protocol> {
        let mut out = Vec::with_capacity(2);
        for p in Protocol::ALL {
            if self.is_enabled(p).await {
                out.push(p);
            }
        }
        out
    }

    fn select(&self, protocol: Protocol) -> Option<SelectedClient> {
        self.clients.get(&protocol).map(|client| SelectedClient {
            protocol,
            client: client.clone(),
        })
    }

    /// Asks the client for a fresh liveness verdict and caches it.
    pub async fn refresh_status(&self, protocol: Protocol) -> bool {
        if self.is_shutdown_mode() {
            return false;
        }
        let Some(client) = self.clients.get(&protocol) else {
            return false;
        };

        let connected = client.is_connected();
        let authenticated = connected && client.is_authenticated();
        self.board
            .lock()
            .await
            .record_liveness(protocol, connected, authenticated);
        self.cache
            .set(protocol.cache_key(), ConnectionState::from_connected(connected))
            .await;
        connected
    }

    /// Cached liveness. Hits the client at most once per cache TTL.
    pub async fn is_connected(&self, protocol: Protocol) -> bool {
        if self.is_shutdown_mode() || !self.is_enabled(protocol).await {
            return false;
        }
        if let Some(state) = self.cache.get(protocol.cache_key()).await {
            return state.is_connected();
        }
        self.refresh_status(protocol).await
    }

    pub async fn is_any_connected(&self) -> bool {
        if self.is_shutdown_mode() {
            return false;
        }
        for p in Protocol::ALL {
            if self.is_connected(p).await {
                return true;
            }
        }
        false
    }

    pub async fn get_connection_status(&self) -> ConnectionReport {
        for p in self.enabled_protocols().await {
            self.refresh_status(p).await;
        }

        let (management, console): (ProtocolStatus, ProtocolStatus) = {
            let board = self.board.lock().await;
            (board.get(Protocol::Management), board.get(Protocol::Console))
        };
        let management_details = match self.clients.get(&Protocol::Management) {
            Some(client) => client.details().await,
            None => None,
        };

        ConnectionReport {
            management,
            console,
            shutdown_mode: self.is_shutdown_mode(),
            cache_ttl_secs: self.cache.ttl().as_secs(),
            cache_size: self.cache.len().await,
            management_details,
        }
    }

    pub async fn invalidate_all_caches(&self) {
        self.cache.clear().await;
    }

    /// Management first, console second, among connected protocols.
    pub async fn get_preferred_client(&self) -> Option<SelectedClient> {
        if self.is_shutdown_mode() {
            return None;
        }
        for p in Protocol::ALL {
            if self.is_connected(p).await {
                return self.select(p);
            }
        }
        None
    }

    /// Picks a client for one console command.
    ///
    /// The performance query only goes to the console. Administrative
    /// commands prefer the management protocol. Everything else follows
    /// the default preference.
    pub async fn get_client_for_command(&self, command: &str) -> Option<SelectedClient> {
        if self.is_shutdown_mode() {
            return None;
        }
        match policy::route(command, &self.config.performance_command()) {
            Routing::Forced(p) => {
                if self.is_connected(p).await {
                    self.select(p)
                } else {
                    debug!(protocol = %p, command, "required protocol unavailable");
                    None
                }
            }
            Routing::Preferred(p) => {
                if self.is_connected(p).await {
                    self.select(p)
                } else {
                    self.get_preferred_client().await
                }
            }
            Routing::Default => self.get_preferred_client().await,
        }
    }

    /// Returns a usable client, reconnecting every enabled protocol once
    /// if none is available.
    pub async fn ensure_connected(&self) -> Option<SelectedClient> {
        if self.is_shutdown_mode() {
            debug!("shutdown mode, not checking connections");
            return None;
        }
        if let Some(selected) = self.get_preferred_client().await {
            return Some(selected);
        }
        if self.is_shutdown_mode() {
            return None;
        }

        warn!("no protocol connected, reconnecting");
        self.auto_reconnect().await;
        self.get_preferred_client().await
    }

    async fn auto_reconnect(&self) {
        let protocols = self.enabled_protocols().await;
        if protocols.is_empty() {
            return;
        }
        let round = join_all(protocols.into_iter().map(|p| self.retry_protocol(p)));
        if tokio::time::timeout(self.timing.auto_reconnect_timeout, round)
            .await
            .is_err()
        {
            warn!(
                timeout_secs = self.timing.auto_reconnect_timeout.as_secs(),
                "automatic reconnect timed out"
            );
        }
    }

    /// Bounded retry loop for one protocol. Each success is confirmed by
    /// a fresh liveness check. Authentication failures end the loop.
    async fn retry_protocol(&self, protocol: Protocol) -> bool {
        if self.is_connected(protocol).await {
            return true;
        }
        let Some(client) = self.client(protocol) else {
            return false;
        };

        let attempts = self.timing.max_retry_attempts;
        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.timing.retry.delay_for_attempt(attempt + 1);
                info!(
                    protocol = %protocol,
                    attempt = attempt + 1,
                    max = attempts,
                    delay_secs = delay.as_secs(),
                    "retrying connection"
                );
                tokio::time::sleep(delay).await;
            }
            if self.is_shutdown_mode() {
                return false;
            }

            match client.connect().await {
                Ok(()) => {
                    self.cache.invalidate(protocol.cache_key()).await;
                    if self.refresh_status(protocol).await {
                        info!(protocol = %protocol, "reconnected");
                        return true;
                    }
                }
                Err(e) if e.is_auth_failure() => {
                    warn!(protocol = %protocol, error = %e, "credentials rejected, giving up");
                    break;
                }
                Err(e) => {
                    debug!(protocol = %protocol, attempt = attempt + 1, error = %e, "connect attempt failed");
                }
            }
        }

        warn!(protocol = %protocol, "reconnect failed");
        self.refresh_status(protocol).await;
        false
    }

    async fn connect_protocol(&self, protocol: Protocol) -> bool {
        let Some(client) = self.client(protocol) else {
            return false;
        };
        if self.refresh_status(protocol).await {
            debug!(protocol = %protocol, "already connected");
            return true;
        }

        info!(protocol = %protocol, "connecting");
        match client.connect().await {
            Ok(()) => {
                self.cache.invalidate(protocol.cache_key()).await;
                let connected = self.refresh_status(protocol).await;
                if connected {
                    info!(protocol = %protocol, "connected");
                } else {
                    warn!(protocol = %protocol, "connect returned but link is down");
                }
                connected
            }
            Err(e) => {
                warn!(protocol = %protocol, error = %e, "connect failed");
                self.refresh_status(protocol).await;
                false
            }
        }
    }

    /// Connects every enabled protocol once. In shutdown mode nothing is
    /// attempted and every result is `false`.
    pub async fn connect_all(&self) -> ConnectResults {
        let mut results = ConnectResults::default();
        if self.is_shutdown_mode() {
            warn!("shutdown mode, skipping connect");
            return results;
        }

        let protocols = self.enabled_protocols().await;
        let outcomes = join_all(protocols.iter().map(|&p| self.connect_protocol(p))).await;
        for (p, ok) in protocols.into_iter().zip(outcomes) {
            results.set(p, ok);
        }
        self.cache.clear().await;
        results
    }

    /// Waits for a freshly started server to open its ports, then connects.
    pub async fn connect_after_server_start(&self, delay: Duration) -> ConnectResults {
        if self.is_shutdown_mode() {
            warn!("shutdown mode, skipping post-start connect");
            return ConnectResults::default();
        }
        info!(delay_secs = delay.as_secs(), "waiting for server before connecting");
        tokio::time::sleep(delay).await;
        self.connect_all().await
    }

    /// Drops every link and reconnects each enabled protocol through the
    /// retry loop.
    pub async fn reconnect_all(&self) -> ConnectResults {
        let mut results = ConnectResults::default();
        if self.is_shutdown_mode() {
            warn!("shutdown mode, skipping reconnect");
            return results;
        }

        info!("reconnecting all protocols");
        let protocols = self.enabled_protocols().await;
        for &p in &protocols {
            if let Some(client) = self.clients.get(&p) {
                client.close().await;
            }
        }
        self.cache.clear().await;
        tokio::time::sleep(self.timing.reconnect_all_settle).await;

        let outcomes = join_all(protocols.iter().map(|&p| self.retry_protocol(p))).await;
        for (p, ok) in protocols.into_iter().zip(outcomes) {
            results.set(p, ok);
        }
        results
    }

    /// Drops and re-establishes one protocol's link.
    pub async fn reconnect_single(&self, protocol: Protocol) -> bool {
        if self.is_shutdown_mode() {
            warn!(protocol = %protocol, "shutdown mode, skipping reconnect");
            return false;
        }
        let Some(client) = self.client(protocol) else {
            warn!(protocol = %protocol, "no client configured");
            return false;
        };
        if !self.is_enabled(protocol).await {
            warn!(protocol = %protocol, "protocol disabled");
            return false;
        }

        info!(protocol = %protocol, "reconnecting");
        client.close().await;
        self.cache.invalidate(protocol.cache_key()).await;
        tokio::time::sleep(self.timing.settle_for(protocol)).await;
        self.retry_protocol(protocol).await
    }

    /// Stops all connection activity until [`reset_shutdown_mode`](Self::reset_shutdown_mode).
    /// Idempotent.
    pub async fn set_shutdown_mode(&self) {
        if self.is_shutdown_mode() {
            return;
        }
        let _guard = self.shutdown_lock.lock().await;
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("entering shutdown mode");
        self.board.lock().await.set_shutdown_mode(true);

        let wait = self.timing.shutdown_client_timeout;
        join_all(self.clients.iter().map(|(&p, client)| async move {
            if tokio::time::timeout(wait, client.shutdown()).await.is_err() {
                debug!(protocol = %p, "client shutdown timed out");
            }
        }))
        .await;

        self.cache.clear().await;
        info!("connection manager in shutdown mode");
    }

    /// Leaves shutdown mode, re-reading the enabled flags.
    pub async fn reset_shutdown_mode(&self) {
        if !self.is_shutdown_mode() {
            return;
        }
        let _guard = self.shutdown_lock.lock().await;
        if !self.shutdown.load(Ordering::SeqCst) {
            return;
        }

        {
            let mut board = self.board.lock().await;
            board.set_shutdown_mode(false);
            for p in Protocol::ALL {
                board.set_enabled(p, self.config.is_enabled(p));
            }
        }
        for client in self.clients.values() {
            client.resume();
        }
        self.cache.clear().await;
        self.shutdown.store(false, Ordering::SeqCst);
        info!("connection manager shutdown mode reset");
    }

    /// Closes everything and stays in shutdown mode.
    pub async fn disconnect_all(&self) {
        self.set_shutdown_mode().await;
    }

    /// Process-exit teardown.
    pub async fn immediate_shutdown(&self) {
        self.set_shutdown_mode().await;
    }
}
