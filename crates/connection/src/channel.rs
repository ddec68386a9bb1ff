//! The `ProtocolClient` seam and its two implementations.
//!
//! The manager only ever sees `Arc<dyn ProtocolClient>`. The console client
//! is blocking, so its adapter moves every socket call onto the blocking
//! pool; the management client is already async and implements the trait
//! directly.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use craftlink_msmp::MsmpClient;
use craftlink_protocol::{PlayerListInfo, Protocol};
use craftlink_rcon::{RconClient, RconError};

use crate::error::ChannelError;

/// Boxed future returned by [`ProtocolClient`] methods.
pub type ChannelFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A control channel to the game server.
///
/// Implemented by both protocol clients. Kept object-safe so the manager
/// can hold either behind one pointer, and so tests can substitute doubles.
pub trait ProtocolClient: Send + Sync {
    fn protocol(&self) -> Protocol;

    fn connect(&self) -> ChannelFuture<'_, Result<(), ChannelError>>;

    /// Cheap local liveness check. Must not touch the network.
    fn is_connected(&self) -> bool;

    fn is_authenticated(&self) -> bool {
        self.is_connected()
    }

    fn close(&self) -> ChannelFuture<'_, ()>;

    /// Stops background reconnects, then closes.
    fn shutdown(&self) -> ChannelFuture<'_, ()>;

    /// Re-allows connects after [`shutdown`](Self::shutdown).
    fn resume(&self) {}

    /// Runs one console command. `Ok(None)` means no answer arrived in time.
    fn execute<'a>(&'a self, command: &'a str)
    -> ChannelFuture<'a, Result<Option<String>, ChannelError>>;

    fn player_list(&self) -> ChannelFuture<'_, Result<PlayerListInfo, ChannelError>>;

    /// Protocol-specific diagnostics for status reports.
    fn details(&self) -> ChannelFuture<'_, Option<Value>> {
        Box::pin(async { None })
    }
}

/// Async adapter over the blocking console client.
pub struct ConsoleChannel {
    client: Arc<RconClient>,
}

impl ConsoleChannel {
    pub fn new(client: RconClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    pub fn client(&self) -> &Arc<RconClient> {
        &self.client
    }

    /// Runs `f` against the client on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, ChannelError>
    where
        T: Send + 'static,
        F: FnOnce(&RconClient) -> Result<T, RconError> + Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || f(&client))
            .await
            .map_err(|e| ChannelError::Worker(e.to_string()))?
            .map_err(ChannelError::Console)
    }
}

impl ProtocolClient for ConsoleChannel {
    fn protocol(&self) -> Protocol {
        Protocol::Console
    }

    fn connect(&self) -> ChannelFuture<'_, Result<(), ChannelError>> {
        Box::pin(self.blocking(|c| c.connect()))
    }

    fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    fn close(&self) -> ChannelFuture<'_, ()> {
        Box::pin(async move {
            let _ = self
                .blocking(|c| {
                    c.close();
                    Ok(())
                })
                .await;
        })
    }

    fn shutdown(&self) -> ChannelFuture<'_, ()> {
        Box::pin(async move {
            let _ = self
                .blocking(|c| {
                    c.shutdown();
                    Ok(())
                })
                .await;
        })
    }

    fn resume(&self) {
        self.client.resume();
    }

    fn execute<'a>(
        &'a self,
        command: &'a str,
    ) -> ChannelFuture<'a, Result<Option<String>, ChannelError>> {
        let command = command.to_string();
        Box::pin(self.blocking(move |c| c.execute(&command)))
    }

    fn player_list(&self) -> ChannelFuture<'_, Result<PlayerListInfo, ChannelError>> {
        Box::pin(self.blocking(|c| c.player_list()))
    }
}

/// Renders a management command result as console text.
fn result_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

impl ProtocolClient for MsmpClient {
    fn protocol(&self) -> Protocol {
        Protocol::Management
    }

    fn connect(&self) -> ChannelFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move { MsmpClient::connect(self).await.map_err(ChannelError::from) })
    }

    fn is_connected(&self) -> bool {
        MsmpClient::is_connected(self)
    }

    fn is_authenticated(&self) -> bool {
        MsmpClient::is_authenticated(self)
    }

    fn close(&self) -> ChannelFuture<'_, ()> {
        Box::pin(MsmpClient::close(self))
    }

    fn shutdown(&self) -> ChannelFuture<'_, ()> {
        Box::pin(MsmpClient::shutdown(self))
    }

    fn resume(&self) {
        MsmpClient::resume(self);
    }

    fn execute<'a>(
        &'a self,
        command: &'a str,
    ) -> ChannelFuture<'a, Result<Option<String>, ChannelError>> {
        Box::pin(async move {
            let value = self.execute_command(command).await?;
            Ok(result_text(value))
        })
    }

    fn player_list(&self) -> ChannelFuture<'_, Result<PlayerListInfo, ChannelError>> {
        Box::pin(async move { Ok(MsmpClient::player_list(self).await?) })
    }

    fn details(&self) -> ChannelFuture<'_, Option<Value>> {
        Box::pin(async move { serde_json::to_value(self.snapshot().await).ok() })
    }
}
