//! Decode worker process supervision
//!
//! Starts the worker as a child process, waits for its health endpoint and
//! restarts it with backoff when it dies. Restarts are bounded; a worker
//! whose decoder fails to initialize is never restarted.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

use super::EXIT_DECODER_INIT;
use crate::retry::{RetryPolicy, delay_for_attempt};
use crate::{Error, Result};

/// How to launch the worker
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Executable that understands the `worker` subcommand
    pub program: PathBuf,
    pub models_dir: PathBuf,
    pub port: u16,
    pub interim_interval: Option<Duration>,
    /// Time allowed from spawn to a healthy `/health`
    pub startup_timeout: Duration,
    pub restart: RetryPolicy,
}

impl SupervisorConfig {
    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "worker".to_string(),
            "--models-dir".to_string(),
            self.models_dir.display().to_string(),
            "--port".to_string(),
            self.port.to_string(),
        ];
        if let Some(interval) = self.interim_interval {
            args.push("--interim-ms".to_string());
            args.push(interval.as_millis().to_string());
        }
        args
    }
}

#[derive(Default)]
struct ProcessState {
    child: Option<Child>,
    /// Consecutive restarts since the last confirmed healthy connection
    restarts: u32,
}

/// Owns the worker child process
pub struct WorkerSupervisor {
    config: SupervisorConfig,
    http: reqwest::Client,
    state: Mutex<ProcessState>,
}

fn is_decoder_init_failure(status: ExitStatus) -> bool {
    status.code() == Some(EXIT_DECODER_INIT)
}

impl WorkerSupervisor {
    /// Create a supervisor; nothing is spawned until [`Self::ensure_running`]
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            config,
            http,
            state: Mutex::new(ProcessState::default()),
        })
    }

    /// WebSocket URL of the worker stream endpoint
    #[must_use]
    pub fn stream_url(&self) -> String {
        format!("ws://127.0.0.1:{}/stream", self.config.port)
    }

    async fn healthy(&self) -> bool {
        let url = format!("http://127.0.0.1:{}/health", self.config.port);
        self.http
            .get(&url)
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    /// Make sure a healthy worker is running, starting or restarting it
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerUnavailable`] if the decoder cannot initialize
    /// or the restart budget is spent
    pub async fn ensure_running(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        if let Some(child) = state.child.as_mut() {
            match child.try_wait() {
                Ok(None) => {
                    if self.healthy().await {
                        return Ok(());
                    }
                    tracing::warn!("decode worker unresponsive, restarting");
                    let _ = child.kill().await;
                }
                Ok(Some(status)) if is_decoder_init_failure(status) => {
                    state.child = None;
                    return Err(Error::WorkerUnavailable(
                        "decoder failed to initialize".to_string(),
                    ));
                }
                Ok(Some(status)) => tracing::warn!(%status, "decode worker exited"),
                Err(e) => tracing::warn!(error = %e, "failed to poll decode worker"),
            }
            state.child = None;
        }

        loop {
            if !self.config.restart.allows(state.restarts) {
                return Err(Error::WorkerUnavailable(format!(
                    "decode worker failed {} times in a row",
                    state.restarts
                )));
            }

            if state.restarts > 0 {
                let delay = delay_for_attempt(&self.config.restart, state.restarts - 1);
                tracing::info!(attempt = state.restarts, delay_ms = delay.as_millis(), "restarting decode worker");
                sleep(delay).await;
            }
            state.restarts += 1;

            match self.spawn().await {
                Ok(child) => {
                    state.child = Some(child);
                    return Ok(());
                }
                Err(e @ Error::WorkerUnavailable(_)) => return Err(e),
                Err(e) => tracing::warn!(error = %e, "decode worker failed to start"),
            }
        }
    }

    /// Spawn the worker and wait until it reports healthy
    async fn spawn(&self) -> Result<Child> {
        let mut child = Command::new(&self.config.program)
            .args(self.config.args())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::WorkerUnavailable(format!("failed to spawn decode worker: {e}")))?;

        tracing::debug!(pid = child.id(), port = self.config.port, "decode worker spawned");

        let deadline = Instant::now() + self.config.startup_timeout;
        while Instant::now() < deadline {
            if let Some(status) = child.try_wait()? {
                if is_decoder_init_failure(status) {
                    return Err(Error::WorkerUnavailable(
                        "decoder failed to initialize".to_string(),
                    ));
                }
                return Err(Error::Worker(format!("decode worker exited during startup: {status}")));
            }

            if self.healthy().await {
                tracing::info!(port = self.config.port, "decode worker ready");
                return Ok(child);
            }
            sleep(Duration::from_millis(200)).await;
        }

        let _ = child.kill().await;
        Err(Error::Worker(format!(
            "decode worker not healthy after {:?}",
            self.config.startup_timeout
        )))
    }

    /// Reset the restart budget after the worker served a connection
    pub async fn record_success(&self) {
        self.state.lock().await.restarts = 0;
    }

    /// Stop the worker
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let Some(mut child) = state.child.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "failed to kill decode worker");
            }
            tracing::info!("decode worker stopped");
        }
    }
}
