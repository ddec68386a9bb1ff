//! Blocking remote-console client.
//!
//! One TCP connection, one request in flight. The session lives behind a
//! mutex, so concurrent callers queue up instead of interleaving packets.
//! Async callers should go through `spawn_blocking`.

use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use craftlink_protocol::PlayerListInfo;
use craftlink_protocol::constants::{
    RCON_COMMAND_TIMEOUT, RCON_CONNECT_TIMEOUT, RCON_LIST_COMMAND, RCON_STOP_COMMAND,
};
use tracing::{debug, info, warn};

use crate::error::RconError;
use crate::player_list::parse_list_response;
use crate::wire::{
    AUTH_FAILED_ID, Packet, SERVERDATA_AUTH, SERVERDATA_EXECCOMMAND, read_packet, write_packet,
};

/// Connection settings for one console endpoint.
#[derive(Debug, Clone)]
pub struct RconConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl RconConfig {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
            connect_timeout: RCON_CONNECT_TIMEOUT,
            command_timeout: RCON_COMMAND_TIMEOUT,
        }
    }
}

/// Late replies skipped while waiting for the current one.
const MAX_STALE_REPLIES: usize = 32;

/// An authenticated socket plus its request id counter.
struct Session {
    stream: TcpStream,
    next_id: i32,
}

impl Session {
    /// Next request id. Wraps back to 1 so it never collides with the
    /// auth-failure marker.
    fn allocate_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = if self.next_id == i32::MAX {
            1
        } else {
            self.next_id + 1
        };
        id
    }

    /// Sends one packet and reads until the reply carrying its id (or the
    /// auth-failure marker). Replies to earlier, timed-out requests are
    /// dropped.
    fn round_trip(&mut self, kind: i32, body: &str) -> Result<Packet, RconError> {
        let id = self.allocate_id();
        write_packet(&mut self.stream, &Packet::new(id, kind, body))?;

        for _ in 0..=MAX_STALE_REPLIES {
            let reply = read_packet(&mut self.stream)?;
            if reply.request_id == id || reply.request_id == AUTH_FAILED_ID {
                return Ok(reply);
            }
            debug!(expected = id, got = reply.request_id, "dropping stale console reply");
        }
        Err(RconError::Protocol(format!(
            "no reply for request {id} after {MAX_STALE_REPLIES} unexpected ids"
        )))
    }

    fn shutdown(&self) {
        // Already-closed sockets report NotConnected here; nothing to do.
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Blocking remote-console client.
pub struct RconClient {
    config: RconConfig,
    session: Mutex<Option<Session>>,
    authenticated: AtomicBool,
    stopped: AtomicBool,
}

impl RconClient {
    pub fn new(config: RconConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
            authenticated: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &RconConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the socket and authenticates. Any previous session is dropped.
    ///
    /// A rejected password closes the socket and returns
    /// [`RconError::AuthFailed`]; there is no internal retry. Fails with
    /// [`RconError::ShutDown`] after [`shutdown`](Self::shutdown).
    pub fn connect(&self) -> Result<(), RconError> {
        if self.is_stopped() {
            return Err(RconError::ShutDown);
        }
        let mut guard = self.lock();
        if let Some(old) = guard.take() {
            old.shutdown();
        }
        self.authenticated.store(false, Ordering::SeqCst);

        let addr = (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                RconError::Protocol(format!("could not resolve {}", self.config.host))
            })?;

        debug!(%addr, "connecting to console");
        let stream = TcpStream::connect_timeout(&addr, self.config.connect_timeout).map_err(|e| {
            if matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ) {
                RconError::Timeout
            } else {
                RconError::Io(e)
            }
        })?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(self.config.connect_timeout))?;
        stream.set_write_timeout(Some(self.config.connect_timeout))?;

        let mut session = Session { stream, next_id: 1 };
        let reply = match session.round_trip(SERVERDATA_AUTH, &self.config.password) {
            Ok(reply) => reply,
            Err(e) => {
                session.shutdown();
                return Err(if e.is_timeout() { RconError::Timeout } else { e });
            }
        };

        if reply.request_id == AUTH_FAILED_ID {
            session.shutdown();
            warn!(host = %self.config.host, port = self.config.port, "console authentication rejected");
            return Err(RconError::AuthFailed("server rejected password".into()));
        }

        // `shutdown` may have landed while we were authenticating.
        if self.is_stopped() {
            session.shutdown();
            debug!(host = %self.config.host, "shut down during connect, dropping session");
            return Err(RconError::ShutDown);
        }

        session
            .stream
            .set_read_timeout(Some(self.config.command_timeout))?;
        *guard = Some(session);
        self.authenticated.store(true, Ordering::SeqCst);
        info!(host = %self.config.host, port = self.config.port, "console connected");
        Ok(())
    }

    /// Executes one command and returns its output.
    ///
    /// `Ok(None)` means the response did not arrive within the command
    /// timeout; the connection is kept. Any other failure closes it.
    /// Only the first response packet is read, so very long outputs are
    /// truncated.
    pub fn execute(&self, command: &str) -> Result<Option<String>, RconError> {
        let mut guard = self.lock();
        let Some(session) = guard.as_mut() else {
            return Err(RconError::NotConnected);
        };

        match session.round_trip(SERVERDATA_EXECCOMMAND, command) {
            Ok(reply) => {
                debug!(command, bytes = reply.body.len(), "console command answered");
                Ok(Some(reply.body))
            }
            Err(e) if e.is_timeout() => {
                warn!(command, "console command timed out");
                Ok(None)
            }
            Err(e) => {
                warn!(command, error = %e, "console command failed, closing connection");
                if let Some(session) = guard.take() {
                    session.shutdown();
                }
                self.authenticated.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Runs `list` and parses the output.
    pub fn player_list(&self) -> Result<PlayerListInfo, RconError> {
        match self.execute(RCON_LIST_COMMAND)? {
            Some(output) => Ok(parse_list_response(&output)),
            None => Err(RconError::Timeout),
        }
    }

    /// Sends `stop`. The server usually drops the socket right after
    /// acknowledging, so a closed connection afterwards still counts.
    pub fn stop_server(&self) -> bool {
        match self.execute(RCON_STOP_COMMAND) {
            Ok(_) => true,
            Err(RconError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => true,
            Err(e) => {
                warn!(error = %e, "stop command failed");
                false
            }
        }
    }

    /// Cheap local check: a session exists and authentication succeeded.
    ///
    /// When another caller currently holds the session (a command is in
    /// flight) the connection is assumed to be up.
    pub fn is_connected(&self) -> bool {
        if !self.authenticated.load(Ordering::SeqCst) {
            return false;
        }
        match self.session.try_lock() {
            Ok(guard) => guard.is_some(),
            Err(TryLockError::Poisoned(p)) => p.into_inner().is_some(),
            Err(TryLockError::WouldBlock) => true,
        }
    }

    /// Active liveness check: issues `list` and requires an answer.
    pub fn probe(&self) -> bool {
        matches!(self.execute(RCON_LIST_COMMAND), Ok(Some(_)))
    }

    /// Closes the socket. Safe to call repeatedly.
    pub fn close(&self) {
        self.authenticated.store(false, Ordering::SeqCst);
        if let Some(session) = self.lock().take() {
            session.shutdown();
            info!(host = %self.config.host, "console connection closed");
        }
    }
}

impl RconClient {
    /// Closes the socket and refuses every later connect until
    /// [`resume`](Self::resume).
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.close();
    }

    pub fn resume(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for RconClient {
    fn drop(&mut self) {
        if let Some(session) = self.lock().take() {
            session.shutdown();
        }
    }
}
