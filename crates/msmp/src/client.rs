//! Management-protocol client.
//!
//! One persistent WebSocket per client. Requests are correlated by a
//! strictly increasing integer id; the read, write and heartbeat pumps run
//! as separate tasks bound to the link they were started for. A link that
//! dies on its own (read side ends, heartbeat gives up) triggers an
//! automatic reconnect unless the client has been shut down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use craftlink_protocol::constants::{
    DEFAULT_MAX_PLAYERS, MSMP_CONNECT_TIMEOUT, MSMP_MAX_MESSAGE_SIZE, MSMP_MAX_RECONNECT_ATTEMPTS,
    MSMP_REQUEST_TIMEOUT, MSMP_VERIFY_TIMEOUT,
};
use craftlink_protocol::{PlayerListInfo, ReconnectConfig, Request};

use crate::error::MsmpError;
use crate::events::ServerEventListener;
use crate::pumps::heartbeat::{HeartbeatSettings, HeartbeatVerdict, PongTracker, heartbeat_pump};
use crate::pumps::read::{Dispatch, LinkEnd, read_pump};
use crate::pumps::write::write_pump;

/// Slot a response (or failure) is delivered into.
pub(crate) type ResponseSlot = oneshot::Sender<Result<Value, MsmpError>>;

/// In-flight requests keyed by id.
pub(crate) type PendingMap = Arc<Mutex<HashMap<u64, ResponseSlot>>>;

/// Listener shared with the read pump.
pub(crate) type SharedListener = Arc<RwLock<Option<Arc<dyn ServerEventListener>>>>;

/// Endpoint and timing for one management server.
#[derive(Debug, Clone)]
pub struct MsmpConfig {
    pub host: String,
    pub port: u16,
    /// Sent as `Authorization: Bearer <token>` during the handshake.
    pub token: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub verify_timeout: Duration,
    /// Issue one `server/status` right after connecting.
    pub verify_on_connect: bool,
    pub heartbeat: HeartbeatSettings,
    pub reconnect: ReconnectConfig,
    /// Attempts made after one link loss before the client gives up and
    /// waits for an explicit connect.
    pub max_reconnect_attempts: u32,
}

impl MsmpConfig {
    pub fn new(host: impl Into<String>, port: u16, token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            token: token.into(),
            connect_timeout: MSMP_CONNECT_TIMEOUT,
            request_timeout: MSMP_REQUEST_TIMEOUT,
            verify_timeout: MSMP_VERIFY_TIMEOUT,
            verify_on_connect: true,
            heartbeat: HeartbeatSettings::default(),
            reconnect: ReconnectConfig::management(),
            max_reconnect_attempts: MSMP_MAX_RECONNECT_ATTEMPTS,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

/// Result of one [`MsmpClient::reconnect`] call.
#[derive(Debug)]
pub enum ReconnectOutcome {
    Reconnected,
    /// Another reconnect was already running; this call did nothing.
    AlreadyInProgress,
    /// The client is shut down, or was shut down mid-wait.
    Stopped,
    Failed(MsmpError),
}

/// Point-in-time view of the client, for status reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MsmpSnapshot {
    pub connected: bool,
    pub authenticated: bool,
    pub link_open: bool,
    pub pending_requests: usize,
    pub secs_since_last_pong: Option<f64>,
    pub reconnect_attempts: u32,
    pub reconnecting: bool,
}

/// Handles for one live socket.
struct Link {
    outbound: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
    generation: u64,
}

struct Inner {
    config: MsmpConfig,
    next_id: AtomicU64,
    pending: PendingMap,
    listener: SharedListener,
    pongs: Arc<PongTracker>,
    link: StdMutex<Option<Link>>,
    generation: AtomicU64,
    connected: AtomicBool,
    authenticated: AtomicBool,
    stopped: AtomicBool,
    connect_lock: Mutex<()>,
    reconnect_lock: Mutex<()>,
    reconnecting: AtomicBool,
    reconnect_attempts: AtomicU32,
    reconnect_cancel: StdMutex<CancellationToken>,
}

/// Management-protocol client. Cheap to clone; clones share one link.
#[derive(Clone)]
pub struct MsmpClient {
    inner: Arc<Inner>,
}

impl MsmpClient {
    pub fn new(config: MsmpConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                next_id: AtomicU64::new(0),
                pending: Arc::new(Mutex::new(HashMap::new())),
                listener: Arc::new(RwLock::new(None)),
                pongs: Arc::new(PongTracker::new()),
                link: StdMutex::new(None),
                generation: AtomicU64::new(0),
                connected: AtomicBool::new(false),
                authenticated: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                connect_lock: Mutex::new(()),
                reconnect_lock: Mutex::new(()),
                reconnecting: AtomicBool::new(false),
                reconnect_attempts: AtomicU32::new(0),
                reconnect_cancel: StdMutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn config(&self) -> &MsmpConfig {
        &self.inner.config
    }

    fn link(&self) -> MutexGuard<'_, Option<Link>> {
        self.inner
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the WebSocket, starts the pumps and optionally verifies the
    /// link with one `server/status`. A failed verification is logged and
    /// the link kept. No-op when already connected.
    pub async fn connect(&self) -> Result<(), MsmpError> {
        let inner = &self.inner;
        if inner.stopped.load(Ordering::SeqCst) {
            return Err(MsmpError::ShutDown);
        }

        {
            let _guard = inner.connect_lock.lock().await;
            if self.is_connected() {
                return Ok(());
            }
            self.open_link().await?;
        }

        if inner.config.verify_on_connect {
            let verify = tokio::time::timeout(
                inner.config.verify_timeout,
                self.request("server/status", Vec::new()),
            )
            .await;
            match verify {
                Ok(Ok(_)) => debug!("management link verified"),
                Ok(Err(e)) => warn!(error = %e, "verification request failed, keeping link"),
                Err(_) => warn!("verification request timed out, keeping link"),
            }
        }
        Ok(())
    }

    async fn open_link(&self) -> Result<(), MsmpError> {
        let inner = &self.inner;
        let config = &inner.config;
        let url = config.url();

        let mut request = url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| MsmpError::InvalidToken)?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(MSMP_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(MSMP_MAX_MESSAGE_SIZE);

        debug!(%url, "opening management link");
        let (ws_stream, _) = tokio::time::timeout(
            config.connect_timeout,
            tokio_tungstenite::connect_async_with_config(request, Some(ws_config), false),
        )
        .await
        .map_err(|_| MsmpError::timeout("connect"))??;
        let (sink, stream) = ws_stream.split();

        let (outbound, outbound_rx) = mpsc::channel::<tungstenite::Message>(256);
        let cancel = CancellationToken::new();
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        inner.pongs.reset();

        tokio::spawn(write_pump(sink, outbound_rx, cancel.clone()));

        {
            let dispatch = Dispatch {
                pending: inner.pending.clone(),
                listener: inner.listener.clone(),
                pongs: inner.pongs.clone(),
                outbound: outbound.clone(),
            };
            let weak = Arc::downgrade(&self.inner);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let end = read_pump(stream, dispatch, cancel).await;
                if let Some(inner) = weak.upgrade() {
                    MsmpClient { inner }.link_lost(generation, end).await;
                }
            });
        }

        {
            let weak = Arc::downgrade(&self.inner);
            let heartbeat = heartbeat_pump(
                outbound.clone(),
                inner.pongs.clone(),
                config.heartbeat.clone(),
                cancel.clone(),
            );
            tokio::spawn(async move {
                if let Some(verdict) = heartbeat.await
                    && let Some(inner) = weak.upgrade()
                {
                    MsmpClient { inner }.heartbeat_failed(generation, verdict).await;
                }
            });
        }

        *self.link() = Some(Link {
            outbound,
            cancel,
            generation,
        });
        inner.connected.store(true, Ordering::SeqCst);
        inner.authenticated.store(true, Ordering::SeqCst);

        // `shutdown` may have run while the handshake was in flight and
        // found no link to tear down.
        if inner.stopped.load(Ordering::SeqCst) {
            debug!(%url, "shut down during handshake, dropping new link");
            self.teardown().await;
            return Err(MsmpError::ShutDown);
        }

        inner.reconnect_attempts.store(0, Ordering::SeqCst);
        info!(%url, "management connected");
        Ok(())
    }

    /// Takes the link if it is still `generation`. Whichever of the read
    /// pump and the heartbeat gets here first owns the recovery.
    fn claim_link(&self, generation: u64) -> Option<Link> {
        let mut link = self.link();
        if link.as_ref().is_some_and(|l| l.generation == generation) {
            link.take()
        } else {
            None
        }
    }

    /// Read side of `generation` ended. Ignored when that link was already
    /// replaced or torn down on purpose.
    async fn link_lost(&self, generation: u64, end: LinkEnd) {
        let Some(link) = self.claim_link(generation) else {
            debug!(generation, ?end, "stale link ended");
            return;
        };
        warn!(?end, "management link lost");
        self.recover(link).await;
    }

    async fn heartbeat_failed(&self, generation: u64, verdict: HeartbeatVerdict) {
        let Some(link) = self.claim_link(generation) else {
            debug!(generation, ?verdict, "heartbeat verdict for stale link");
            return;
        };
        warn!(?verdict, "heartbeat declared link dead");
        self.recover(link).await;
    }

    async fn recover(&self, link: Link) {
        link.cancel.cancel();
        self.mark_disconnected();
        self.fail_pending().await;

        if !self.inner.stopped.load(Ordering::SeqCst) {
            self.spawn_reconnect_loop();
        }
    }

    /// Calls [`reconnect`](Self::reconnect) up to `max_reconnect_attempts`
    /// times. Stops early on success, shutdown, a concurrent reconnect, or
    /// rejected credentials.
    fn spawn_reconnect_loop(&self) {
        let client = self.clone();
        let max = self.inner.config.max_reconnect_attempts;
        tokio::spawn(async move {
            for _ in 0..max {
                match client.reconnect().await {
                    ReconnectOutcome::Failed(e) if e.is_auth_failure() => {
                        warn!(error = %e, "management credentials rejected, not retrying");
                        return;
                    }
                    ReconnectOutcome::Failed(_) => {}
                    ReconnectOutcome::Reconnected
                    | ReconnectOutcome::AlreadyInProgress
                    | ReconnectOutcome::Stopped => return,
                }
            }
            warn!(attempts = max, "management reconnect gave up");
        });
    }

    /// One reconnect attempt with backoff.
    ///
    /// Concurrent calls collapse: only the first runs, the others return
    /// [`ReconnectOutcome::AlreadyInProgress`] immediately. The attempt
    /// counter grows with every call and resets on a successful connect.
    ///
    /// Returns a boxed future to break the recursive type cycle with
    /// `connect` (whose read pump may spawn a reconnect loop).
    pub fn reconnect(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ReconnectOutcome> + Send>> {
        let client = self.clone();
        Box::pin(async move {
            let inner = &client.inner;
            if inner.stopped.load(Ordering::SeqCst) {
                return ReconnectOutcome::Stopped;
            }
            if inner
                .reconnecting
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                debug!("reconnect already in progress");
                return ReconnectOutcome::AlreadyInProgress;
            }

            let outcome = {
                let _guard = inner.reconnect_lock.lock().await;
                client.reconnect_once().await
            };
            inner.reconnecting.store(false, Ordering::SeqCst);
            outcome
        })
    }

    async fn reconnect_once(&self) -> ReconnectOutcome {
        let inner = &self.inner;
        let cancel = inner
            .reconnect_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        self.teardown().await;

        let attempt = inner.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = inner.config.reconnect.delay_for_attempt(attempt);
        info!(
            attempt,
            delay_secs = format_args!("{:.1}", delay.as_secs_f64()),
            "reconnecting to management server"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("reconnect cancelled");
                return ReconnectOutcome::Stopped;
            }
            _ = tokio::time::sleep(delay) => {}
        }
        if inner.stopped.load(Ordering::SeqCst) {
            return ReconnectOutcome::Stopped;
        }

        match self.connect().await {
            Ok(()) => {
                info!(attempt, "management reconnected");
                ReconnectOutcome::Reconnected
            }
            Err(e) => {
                warn!(attempt, error = %e, "management reconnect failed");
                ReconnectOutcome::Failed(e)
            }
        }
    }

    /// Sends a request and waits for its response.
    ///
    /// `method` is namespaced automatically. The pending slot is removed on
    /// every exit path.
    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, MsmpError> {
        let outbound = self
            .link()
            .as_ref()
            .map(|l| l.outbound.clone())
            .ok_or(MsmpError::NotConnected)?;

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let request = Request::new(id, method, params);
        let json = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id, tx);

        if outbound
            .send(tungstenite::Message::Text(json.into()))
            .await
            .is_err()
        {
            self.inner.pending.lock().await.remove(&id);
            return Err(MsmpError::Closed);
        }

        let result = tokio::time::timeout(self.inner.config.request_timeout, rx).await;
        self.inner.pending.lock().await.remove(&id);

        match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(MsmpError::Closed),
            Err(_) => {
                warn!(method = %request.method, id, "request timed out");
                Err(MsmpError::timeout(request.method))
            }
        }
    }

    pub async fn server_status(&self) -> Result<Value, MsmpError> {
        self.request("server/status", Vec::new()).await
    }

    /// Online players plus capacity. A failed capacity lookup falls back
    /// to the default rather than failing the whole call.
    pub async fn player_list(&self) -> Result<PlayerListInfo, MsmpError> {
        let players = self.request("players", Vec::new()).await?;
        let names = players
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|p| p.get("name").and_then(Value::as_str))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let max = match self.request("serversettings/max_players", Vec::new()).await {
            Ok(value) => max_players_from(&value).unwrap_or(DEFAULT_MAX_PLAYERS),
            Err(e) => {
                debug!(error = %e, "max players lookup failed, using default");
                DEFAULT_MAX_PLAYERS
            }
        };

        Ok(PlayerListInfo::from_names(names, max))
    }

    /// Runs a console command. `server/stop` maps to the dedicated method.
    pub async fn execute_command(&self, command: &str) -> Result<Value, MsmpError> {
        if command.trim().eq_ignore_ascii_case("server/stop") {
            self.request("server/stop", Vec::new()).await
        } else {
            self.request("server/command", vec![json!({ "command": command })])
                .await
        }
    }

    pub async fn game_rules(&self) -> Result<Value, MsmpError> {
        self.request("gamerules", Vec::new()).await
    }

    pub fn set_event_listener(&self, listener: Arc<dyn ServerEventListener>) {
        *self
            .inner
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    /// Cheap local check: flag set and a link is held.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst) && self.link().is_some()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.authenticated.load(Ordering::SeqCst) && self.is_connected()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> MsmpSnapshot {
        let connected = self.is_connected();
        let link_open = self.link().is_some();
        let pending_requests = self.inner.pending.lock().await.len();
        MsmpSnapshot {
            connected,
            authenticated: self.is_authenticated(),
            link_open,
            pending_requests,
            secs_since_last_pong: connected.then(|| self.inner.pongs.since_last().as_secs_f64()),
            reconnect_attempts: self.inner.reconnect_attempts.load(Ordering::SeqCst),
            reconnecting: self.inner.reconnecting.load(Ordering::SeqCst),
        }
    }

    fn mark_disconnected(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.authenticated.store(false, Ordering::SeqCst);
    }

    /// Resolves every pending request with [`MsmpError::Closed`].
    async fn fail_pending(&self) {
        let drained: Vec<_> = self.inner.pending.lock().await.drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "failing pending requests");
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(MsmpError::Closed));
        }
    }

    /// Stops the pumps, closes the socket and fails pending requests.
    async fn teardown(&self) {
        let link = self.link().take();
        if let Some(link) = link {
            link.cancel.cancel();
        }
        self.mark_disconnected();
        self.fail_pending().await;
    }

    /// Closes the current link. A running reconnect loop is not affected;
    /// use [`shutdown`](Self::shutdown) for that.
    pub async fn close(&self) {
        self.teardown().await;
        info!("management connection closed");
    }

    /// Enters stopped mode: cancels reconnects, closes the link and makes
    /// every later connect fail with [`MsmpError::ShutDown`].
    pub async fn shutdown(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner
            .reconnect_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
        self.close().await;
    }

    /// Leaves stopped mode. Does not connect.
    pub fn resume(&self) {
        *self
            .inner
            .reconnect_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = CancellationToken::new();
        self.inner.stopped.store(false, Ordering::SeqCst);
    }
}

/// Accepts a bare number or an object carrying it.
fn max_players_from(value: &Value) -> Option<u32> {
    let n = value
        .as_u64()
        .or_else(|| value.get("max_players").and_then(Value::as_u64))
        .or_else(|| value.get("value").and_then(Value::as_u64))?;
    u32::try_from(n).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::{Behaviour, FakeServer, TOKEN};
    use std::sync::Mutex as StdMutex;

    fn config(port: u16) -> MsmpConfig {
        let mut config = MsmpConfig::new("127.0.0.1", port, TOKEN);
        config.heartbeat.settle = Duration::from_secs(3600);
        config.reconnect = ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_factor: 2.0,
        };
        config
    }

    async fn connected(server: &FakeServer) -> MsmpClient {
        let client = MsmpClient::new(config(server.port));
        client.connect().await.unwrap();
        client
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..500 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn max_players_shapes() {
        assert_eq!(max_players_from(&json!(50)), Some(50));
        assert_eq!(max_players_from(&json!({"max_players": 12})), Some(12));
        assert_eq!(max_players_from(&json!({"value": 8})), Some(8));
        assert_eq!(max_players_from(&json!("many")), None);
    }

    #[tokio::test]
    async fn connect_sends_bearer_token() {
        let server = FakeServer::start().await;
        let client = connected(&server).await;

        assert!(client.is_connected());
        assert!(client.is_authenticated());
        assert_eq!(server.auth_headers(), vec![format!("Bearer {TOKEN}")]);
        // Verification request went out on connect.
        assert!(server.methods().contains(&"minecraft:server/status".to_string()));

        client.close().await;
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn wrong_token_is_rejected() {
        let server = FakeServer::start().await;
        let mut cfg = config(server.port);
        cfg.token = "nope".into();
        let client = MsmpClient::new(cfg);

        assert!(matches!(client.connect().await, Err(MsmpError::Ws(_))));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn invalid_token_characters() {
        let mut cfg = config(1);
        cfg.token = "bad\ntoken".into();
        let client = MsmpClient::new(cfg);
        assert!(matches!(client.connect().await, Err(MsmpError::InvalidToken)));
    }

    #[tokio::test]
    async fn request_without_connect() {
        let client = MsmpClient::new(config(1));
        assert!(matches!(
            client.server_status().await,
            Err(MsmpError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn status_and_player_list() {
        let server = FakeServer::start().await;
        let client = connected(&server).await;

        let status = client.server_status().await.unwrap();
        assert_eq!(status["started"], json!(true));

        let players = client.player_list().await.unwrap();
        assert_eq!(players.current, 2);
        assert_eq!(players.max, 50);
        assert_eq!(players.names, vec!["Alice", "Bob"]);
    }

    #[tokio::test]
    async fn execute_command_routing() {
        let server = FakeServer::start().await;
        let client = connected(&server).await;

        assert_eq!(
            client.execute_command("say hi").await.unwrap(),
            json!("say hi")
        );
        client.execute_command("server/stop").await.unwrap();

        let methods = server.methods();
        assert!(methods.contains(&"minecraft:server/command".to_string()));
        assert!(methods.contains(&"minecraft:server/stop".to_string()));
    }

    #[tokio::test]
    async fn rpc_error_is_surfaced() {
        let server = FakeServer::start().await;
        let client = connected(&server).await;

        match client.request("boom", Vec::new()).await {
            Err(MsmpError::Rpc { code, .. }) => assert_eq!(code, -32601),
            other => panic!("expected rpc error, got {other:?}"),
        }
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn timeout_discards_pending_slot() {
        let server = FakeServer::start().await;
        let mut cfg = config(server.port);
        cfg.request_timeout = Duration::from_millis(100);
        let client = MsmpClient::new(cfg);
        client.connect().await.unwrap();

        assert!(matches!(
            client.request("slow", Vec::new()).await,
            Err(MsmpError::Timeout { .. })
        ));
        assert_eq!(client.snapshot().await.pending_requests, 0);
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn close_resolves_pending() {
        let server = FakeServer::start().await;
        let client = connected(&server).await;

        let waiting = {
            let client = client.clone();
            tokio::spawn(async move { client.request("slow", Vec::new()).await })
        };
        for _ in 0..500 {
            if client.snapshot().await.pending_requests == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        client.close().await;

        assert!(matches!(waiting.await.unwrap(), Err(MsmpError::Closed)));
        assert_eq!(client.snapshot().await.pending_requests, 0);
    }

    #[tokio::test]
    async fn notifications_reach_listener() {
        #[derive(Default)]
        struct Joined(StdMutex<Vec<Value>>);
        impl ServerEventListener for Joined {
            fn on_player_joined(&self, params: &Value) {
                self.0.lock().unwrap().push(params.clone());
            }
        }

        let server = FakeServer::start().await;
        let client = connected(&server).await;
        let listener = Arc::new(Joined::default());
        client.set_event_listener(listener.clone());

        // The server pushes the notification before answering.
        client.request("notify", Vec::new()).await.unwrap();

        assert_eq!(*listener.0.lock().unwrap(), vec![json!({"name": "Alice"})]);
    }

    #[tokio::test]
    async fn concurrent_reconnects_collapse_into_one() {
        let server = FakeServer::start().await;
        let client = connected(&server).await;
        assert_eq!(server.accepted(), 1);

        let (a, b) = tokio::join!(client.reconnect(), client.reconnect());

        let outcomes = [a, b];
        let reconnected = outcomes
            .iter()
            .filter(|o| matches!(o, ReconnectOutcome::Reconnected))
            .count();
        let skipped = outcomes
            .iter()
            .filter(|o| matches!(o, ReconnectOutcome::AlreadyInProgress))
            .count();
        assert_eq!((reconnected, skipped), (1, 1));
        assert_eq!(server.accepted(), 2);
        assert!(client.is_connected());
        assert_eq!(client.snapshot().await.reconnect_attempts, 0);
    }

    #[tokio::test]
    async fn server_drop_triggers_automatic_reconnect() {
        let server = FakeServer::start().await;
        let client = connected(&server).await;

        // The server hangs up instead of answering.
        assert!(matches!(
            client.request("drop", Vec::new()).await,
            Err(MsmpError::Closed)
        ));

        wait_until(|| server.accepted() == 2 && client.is_connected()).await;
    }

    #[tokio::test]
    async fn rejected_token_after_link_loss_is_not_retried() {
        let server = FakeServer::start().await;
        let client = connected(&server).await;
        server.set_behaviour(Behaviour::Unauthorized);

        assert!(matches!(
            client.request("drop", Vec::new()).await,
            Err(MsmpError::Closed)
        ));

        wait_until(|| server.accepted() == 2).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(server.accepted(), 2);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn reconnect_after_link_loss_is_bounded() {
        let server = FakeServer::start().await;
        let client = connected(&server).await;
        server.set_behaviour(Behaviour::Refuse);

        assert!(matches!(
            client.request("drop", Vec::new()).await,
            Err(MsmpError::Closed)
        ));

        let expected = 1 + MSMP_MAX_RECONNECT_ATTEMPTS as usize;
        wait_until(|| server.accepted() == expected).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(server.accepted(), expected);
        assert!(!client.is_connected());
        assert!(!client.snapshot().await.reconnecting);

        // An explicit connect still works once the server recovers.
        server.set_behaviour(Behaviour::Normal);
        client.connect().await.unwrap();
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn missed_pongs_and_server_hangup_reconnect_once() {
        let server = FakeServer::start().await;
        server.set_behaviour(Behaviour::Mute(Duration::from_millis(120)));

        let mut cfg = config(server.port);
        cfg.verify_on_connect = false;
        cfg.heartbeat = HeartbeatSettings {
            settle: Duration::from_millis(10),
            interval: Duration::from_millis(20),
            pong_wait: Duration::from_millis(30),
            stale_after: Duration::from_secs(10),
            max_failures: 3,
        };
        let client = MsmpClient::new(cfg);
        client.connect().await.unwrap();
        server.set_behaviour(Behaviour::Normal);

        // Three missed pongs land at roughly the same time as the hangup.
        wait_until(|| server.accepted() == 2 && client.is_connected()).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(server.accepted(), 2);
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn shutdown_during_handshake_drops_new_link() {
        let server = FakeServer::start().await;
        server.set_behaviour(Behaviour::SlowHandshake(Duration::from_millis(300)));
        let client = MsmpClient::new(config(server.port));

        let connecting = {
            let client = client.clone();
            tokio::spawn(async move { client.connect().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.shutdown().await;

        assert!(matches!(
            connecting.await.unwrap(),
            Err(MsmpError::ShutDown)
        ));
        assert!(client.is_stopped());
        assert!(!client.is_connected());
        assert!(!client.snapshot().await.link_open);
    }

    #[tokio::test]
    async fn shutdown_blocks_connects_until_resumed() {
        let server = FakeServer::start().await;
        let client = connected(&server).await;

        client.shutdown().await;
        assert!(client.is_stopped());
        assert!(!client.is_connected());
        assert!(matches!(client.connect().await, Err(MsmpError::ShutDown)));
        assert!(matches!(
            client.reconnect().await,
            ReconnectOutcome::Stopped
        ));
        assert_eq!(server.accepted(), 1);

        client.resume();
        client.connect().await.unwrap();
        assert_eq!(server.accepted(), 2);
    }

    #[tokio::test]
    async fn snapshot_reports_link_state() {
        let server = FakeServer::start().await;
        let client = connected(&server).await;

        let snap = client.snapshot().await;
        assert!(snap.connected && snap.authenticated && snap.link_open);
        assert!(snap.secs_since_last_pong.is_some());
        assert!(!snap.reconnecting);

        client.close().await;
        let snap = client.snapshot().await;
        assert!(!snap.connected && !snap.link_open);
        assert_eq!(snap.secs_since_last_pong, None);
    }
}
