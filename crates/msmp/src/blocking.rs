//! Synchronous access to a [`MsmpClient`].
//!
//! [`MsmpWorker`] owns a dedicated thread running a current-thread tokio
//! runtime. Blocking wrappers push a job onto the worker's queue and wait
//! for the answer on a std channel with a bounded timeout. The client's
//! pumps live on the worker runtime, so callers need no runtime of their
//! own.

use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error};

use craftlink_protocol::PlayerListInfo;

use crate::client::{MsmpClient, MsmpConfig};
use crate::error::MsmpError;

const CONNECT_WAIT: Duration = Duration::from_secs(30);
const STATUS_WAIT: Duration = Duration::from_secs(10);
const PLAYERS_WAIT: Duration = Duration::from_secs(10);
const COMMAND_WAIT: Duration = Duration::from_secs(30);
const CLOSE_WAIT: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce(MsmpClient) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Background thread hosting one management client.
pub struct MsmpWorker {
    client: MsmpClient,
    jobs: Option<mpsc::UnboundedSender<Job>>,
    thread: Option<JoinHandle<()>>,
}

impl MsmpWorker {
    /// Starts the worker thread. The client is created but not connected.
    pub fn spawn(config: MsmpConfig) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let client = MsmpClient::new(config);
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();

        let hosted = client.clone();
        let thread = std::thread::Builder::new()
            .name("msmp-worker".into())
            .spawn(move || {
                runtime.block_on(async move {
                    while let Some(job) = queue.recv().await {
                        tokio::spawn(job(hosted.clone()));
                    }
                    hosted.shutdown().await;
                });
                debug!("msmp worker stopped");
            })?;

        Ok(Self {
            client,
            jobs: Some(jobs),
            thread: Some(thread),
        })
    }

    /// The hosted client, for async callers that share it.
    pub fn client(&self) -> &MsmpClient {
        &self.client
    }

    /// Runs `f` on the worker and blocks for at most `wait`.
    pub fn call<T, F, Fut>(&self, label: &str, wait: Duration, f: F) -> Result<T, MsmpError>
    where
        T: Send + 'static,
        F: FnOnce(MsmpClient) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, MsmpError>> + Send + 'static,
    {
        let jobs = self.jobs.as_ref().ok_or(MsmpError::WorkerGone)?;
        let (tx, rx) = std_mpsc::sync_channel(1);
        let job: Job = Box::new(move |client| {
            Box::pin(async move {
                let _ = tx.send(f(client).await);
            })
        });
        jobs.send(job).map_err(|_| MsmpError::WorkerGone)?;

        match rx.recv_timeout(wait) {
            Ok(result) => result,
            Err(std_mpsc::RecvTimeoutError::Timeout) => Err(MsmpError::timeout(label)),
            Err(std_mpsc::RecvTimeoutError::Disconnected) => Err(MsmpError::WorkerGone),
        }
    }

    pub fn connect_blocking(&self) -> Result<(), MsmpError> {
        self.call("connect", CONNECT_WAIT, |c| async move { c.connect().await })
    }

    pub fn server_status_blocking(&self) -> Result<Value, MsmpError> {
        self.call("server/status", STATUS_WAIT, |c| async move {
            c.server_status().await
        })
    }

    pub fn player_list_blocking(&self) -> Result<PlayerListInfo, MsmpError> {
        self.call("players", PLAYERS_WAIT, |c| async move { c.player_list().await })
    }

    pub fn execute_command_blocking(&self, command: &str) -> Result<Value, MsmpError> {
        let command = command.to_string();
        self.call("server/command", COMMAND_WAIT, move |c| async move {
            c.execute_command(&command).await
        })
    }

    pub fn close_blocking(&self) -> Result<(), MsmpError> {
        self.call("close", CLOSE_WAIT, |c| async move {
            c.close().await;
            Ok(())
        })
    }

    /// Shuts the client down and joins the worker thread.
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        self.jobs.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("msmp worker thread panicked");
        }
    }
}

impl Drop for MsmpWorker {
    fn drop(&mut self) {
        self.stop_inner();
    }
}
