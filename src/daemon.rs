//! Daemon - the voice control service
//!
//! Keeps the device registry in sync with the gateway, rebuilds the decoder
//! bias whenever device names change, supervises the decode worker and runs
//! the listening session until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;

use crate::command::{CommandEngine, Resolver};
use crate::grammar::{TEMPLATES, Vocabularies, compile};
use crate::model::{ModelBuilder, publish_corpus};
use crate::registry::{Debouncer, DeviceClient, DeviceRegistry, GatewayClient};
use crate::session::{DecodeConnector, Session, SessionConfig, SessionEvent, VoiceController};
use crate::voice::MicrophoneSource;
use crate::worker::{SupervisorConfig, WorkerConnector, WorkerSupervisor};
use crate::{Config, Result};

/// Time allowed for the worker to load its model and answer `/health`
const WORKER_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Compiles the corpus for the current device tags and publishes it
pub struct ModelRebuilder {
    builder: ModelBuilder,
    vocabularies: Vocabularies,
    models_dir: PathBuf,
    wake_word: String,
}

impl ModelRebuilder {
    #[must_use]
    pub fn new(builder: ModelBuilder, models_dir: PathBuf, wake_word: String) -> Self {
        Self {
            builder,
            vocabularies: Vocabularies::standard(),
            models_dir,
            wake_word,
        }
    }

    /// Rebuild for `tags`
    ///
    /// Build failures are logged and leave the previous artifacts in place.
    /// Without the packaging tools only the corpus is published.
    pub async fn rebuild(&self, tags: &[String]) {
        let corpus = compile(&TEMPLATES, &self.vocabularies, tags, &self.wake_word);
        tracing::info!(tags = tags.len(), phrases = corpus.len(), "grammar compiled");

        if !self.builder.tools_available() {
            match publish_corpus(&corpus, &self.models_dir).await {
                Ok(path) => tracing::info!(path = %path.display(), "corpus published (LM tools not installed)"),
                Err(e) => tracing::error!(error = %e, "failed to publish corpus"),
            }
            return;
        }

        match self.builder.build(&corpus, &self.models_dir).await {
            Ok(artifacts) => {
                tracing::info!(scorer = %artifacts.scorer.display(), "language model rebuilt");
            }
            Err(e) => {
                tracing::warn!(error = %e, "language model build failed, keeping previous model");
            }
        }
    }
}

/// Refresh the registry from the gateway; true if any tag changed
async fn sync_registry(client: &dyn DeviceClient, registry: &RwLock<DeviceRegistry>) -> bool {
    match client.list_devices().await {
        Ok(devices) => {
            let count = devices.len();
            let changed = registry.write().await.sync(devices);
            if changed {
                tracing::info!(devices = count, "device registry updated");
            }
            changed
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to list gateway devices");
            false
        }
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::WakeWord { wake_word } => tracing::info!(wake_word = %wake_word, "wakeword"),
        SessionEvent::SpeechInput { transcript } => tracing::info!(transcript = %transcript, "speechinput"),
        SessionEvent::CommandExecuted { transcript, outcome } => {
            tracing::info!(transcript = %transcript, outcome = %outcome, "command executed");
        }
        SessionEvent::CommandFailed { transcript, outcome } => {
            tracing::warn!(transcript = %transcript, outcome = %outcome, "command failed");
        }
        SessionEvent::NoInput => tracing::info!("no input after wake word"),
        SessionEvent::Error { message } => {
            tracing::error!(message = %message, "speech control unavailable");
        }
    }
}

fn spawn_event_logger(mut events: broadcast::Receiver<SessionEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "session event logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// The Beacon voice daemon
pub struct Daemon {
    config: Config,
}

impl Daemon {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the gateway client, worker supervisor or resolver
    /// cannot be created
    #[allow(clippy::too_many_lines)]
    pub async fn run(self) -> Result<()> {
        let Config {
            wake_word,
            match_threshold,
            silence_repeats,
            poll_interval,
            rebuild_debounce,
            model,
            worker,
            gateway,
            stt: _,
            microphone,
        } = self.config;

        tracing::info!(
            wake_word = %wake_word,
            gateway = %gateway.url,
            models_dir = %model.models_dir.display(),
            "daemon running"
        );

        let client: Arc<dyn DeviceClient> = Arc::new(GatewayClient::new(&gateway.url, gateway.token)?);
        let registry = Arc::new(RwLock::new(DeviceRegistry::new()));

        let rebuilder = Arc::new(ModelRebuilder::new(
            ModelBuilder::new(model.tools_dir.clone(), model.alphabet(), model.tool_timeout),
            model.models_dir.clone(),
            wake_word.clone(),
        ));

        // Initial sync and build happen before the worker starts so it
        // loads the current bias
        sync_registry(client.as_ref(), &registry).await;
        let tags = registry.read().await.tag_names();
        rebuilder.rebuild(&tags).await;

        let (debouncer, rebuild_task) = {
            let rebuilder = Arc::clone(&rebuilder);
            let registry = Arc::clone(&registry);
            Debouncer::spawn(rebuild_debounce, move || {
                let rebuilder = Arc::clone(&rebuilder);
                let registry = Arc::clone(&registry);
                async move {
                    let tags = registry.read().await.tag_names();
                    rebuilder.rebuild(&tags).await;
                }
            })
        };

        let poll_task = {
            let client = Arc::clone(&client);
            let registry = Arc::clone(&registry);
            let period = gateway.poll_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                // Skip the first immediate tick
                interval.tick().await;

                loop {
                    interval.tick().await;
                    if sync_registry(client.as_ref(), &registry).await {
                        debouncer.trigger();
                    }
                }
            })
        };

        let (supervisor, connector): (Option<Arc<WorkerSupervisor>>, Arc<dyn DecodeConnector>) =
            if let Some(url) = &worker.url {
                tracing::info!(url = %url, "using external decode worker");
                (None, Arc::new(WorkerConnector::external(url.clone())))
            } else {
                let supervisor = Arc::new(WorkerSupervisor::new(SupervisorConfig {
                    program: std::env::current_exe()?,
                    models_dir: model.models_dir.clone(),
                    port: worker.port,
                    interim_interval: Some(poll_interval),
                    startup_timeout: WORKER_STARTUP_TIMEOUT,
                    restart: worker.restart_policy(),
                })?);
                let connector = Arc::new(WorkerConnector::supervised(Arc::clone(&supervisor)));
                (Some(supervisor), connector)
            };

        let engine = Arc::new(CommandEngine::new(
            Resolver::standard(match_threshold)?,
            Arc::clone(&registry),
            Arc::clone(&client),
        ));

        let session_config = SessionConfig {
            silence_repeats,
            poll_interval,
            ..SessionConfig::new(&wake_word)
        };
        let session = Session::new(
            session_config,
            Box::new(MicrophoneSource::new(microphone)),
            connector,
            engine,
        );

        let controller: VoiceController = session.controller();
        let logger = spawn_event_logger(session.subscribe());
        let session_task = tokio::spawn(session.run());

        controller.enable();
        tracing::info!("beacon voice ready - say \"{wake_word}\"");

        // Run until interrupted
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
        tracing::info!("shutdown requested");

        controller.shutdown();
        if let Err(e) = session_task.await {
            tracing::warn!(error = %e, "session task ended abnormally");
        }

        poll_task.abort();
        rebuild_task.abort();
        logger.abort();
        if let Some(supervisor) = supervisor {
            supervisor.shutdown().await;
        }

        tracing::info!("daemon stopped");
        Ok(())
    }
}
