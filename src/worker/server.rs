//! Decode worker server
//!
//! Serves one decode context per WebSocket connection. The biased model is
//! reloaded when the models directory changes, but only when a new stream
//! starts; in-flight streams finish on the model they started with.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tower_http::trace::TraceLayer;

use super::decoder::{DecodeContext, ModelLoader, SpeechModel};
use super::protocol::{ControlMessage, WorkerMessage, decode_pcm};
use crate::model::stamp;
use crate::{Error, Result};

struct LoadedModel {
    model: Arc<dyn SpeechModel>,
    stamp: Option<SystemTime>,
}

/// Shared worker state
pub struct WorkerState {
    models_dir: PathBuf,
    loader: Arc<dyn ModelLoader>,
    current: RwLock<LoadedModel>,
    interim_interval: Option<Duration>,
}

impl WorkerState {
    /// Load the initial model
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decoder`] if the decoder cannot be initialized; the
    /// worker must not serve in that case
    pub async fn init(
        models_dir: PathBuf,
        loader: Arc<dyn ModelLoader>,
        interim_interval: Option<Duration>,
    ) -> Result<Arc<Self>> {
        let current_stamp = stamp(&models_dir);
        let model = loader
            .load(&models_dir)
            .await
            .map_err(|e| Error::Decoder(format!("failed to initialize decoder: {e}")))?;

        tracing::info!(
            models_dir = %models_dir.display(),
            sample_rate = model.sample_rate(),
            "decoder initialized"
        );

        Ok(Arc::new(Self {
            models_dir,
            loader,
            current: RwLock::new(LoadedModel {
                model,
                stamp: current_stamp,
            }),
            interim_interval,
        }))
    }

    async fn sample_rate(&self) -> u32 {
        self.current.read().await.model.sample_rate()
    }

    /// Model for a stream that is starting now, reloading if artifacts changed
    async fn model_for_new_stream(&self) -> Arc<dyn SpeechModel> {
        let latest = stamp(&self.models_dir);
        {
            let current = self.current.read().await;
            if current.stamp == latest {
                return Arc::clone(&current.model);
            }
        }

        let mut current = self.current.write().await;
        if current.stamp != latest {
            match self.loader.load(&self.models_dir).await {
                Ok(model) => {
                    tracing::info!("models directory changed, decoder reloaded");
                    current.model = model;
                    current.stamp = latest;
                }
                Err(e) => {
                    // Keep serving the previous model; retry on the next stream
                    tracing::warn!(error = %e, "decoder reload failed, keeping previous model");
                }
            }
        }
        Arc::clone(&current.model)
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(rename = "sampleRate")]
    sample_rate: u32,
}

/// Build the worker router
pub fn router(state: Arc<WorkerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stream", get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<Arc<WorkerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sample_rate: state.sample_rate().await,
    })
}

async fn ws_upgrade(State(state): State<Arc<WorkerState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send(sender: &mut futures::stream::SplitSink<WebSocket, Message>, message: &WorkerMessage) -> bool {
    match message.to_json() {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode worker message");
            true
        }
    }
}

/// Serve one connection; at most one decode context is open at a time
async fn handle_socket(socket: WebSocket, state: Arc<WorkerState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut context: Option<Box<dyn DecodeContext>> = None;
    let mut fed_samples = 0_usize;

    let period = state.interim_interval.unwrap_or(Duration::from_secs(3600));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!("decode client connected");

    loop {
        let message = tokio::select! {
            message = receiver.next() => message,
            _ = ticker.tick(), if context.is_some() && state.interim_interval.is_some() => {
                if let Some(ctx) = context.as_mut() {
                    match ctx.intermediate().await {
                        Ok(transcript) => {
                            tracing::trace!(transcript = %transcript, "interim");
                            let interim = WorkerMessage::Transcript { transcript, interim: true };
                            if !send(&mut sender, &interim).await {
                                break;
                            }
                        }
                        Err(e) => tracing::debug!(error = %e, "interim decode failed"),
                    }
                }
                continue;
            }
        };

        let message = match message {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                tracing::debug!(error = %e, "decode client socket error");
                break;
            }
            None => break,
        };

        let reply = match message {
            Message::Text(text) => match ControlMessage::parse(text.as_str()) {
                Some(ControlMessage::GetSampleRate) => Some(WorkerMessage::SampleRate {
                    sample_rate: state.sample_rate().await,
                }),
                Some(ControlMessage::StartStream) => {
                    if context.is_some() {
                        tracing::warn!("stream restarted before end, discarding open context");
                    }
                    let model = state.model_for_new_stream().await;
                    context = Some(model.create_context());
                    fed_samples = 0;
                    ticker.reset();
                    None
                }
                Some(ControlMessage::StreamEnd) => match context.take() {
                    Some(ctx) => {
                        let transcript = match ctx.finish().await {
                            Ok(t) => t,
                            Err(e) => {
                                tracing::error!(error = %e, "final decode failed");
                                String::new()
                            }
                        };
                        tracing::debug!(transcript = %transcript, samples = fed_samples, "stream finalized");
                        Some(WorkerMessage::Transcript {
                            transcript,
                            interim: false,
                        })
                    }
                    None => Some(WorkerMessage::Error {
                        error: "no open stream".to_string(),
                    }),
                },
                None => {
                    tracing::warn!(token = %text.as_str(), "unknown control message");
                    Some(WorkerMessage::Error {
                        error: format!("unknown control message: {}", text.as_str()),
                    })
                }
            },
            Message::Binary(bytes) => {
                match (context.as_mut(), decode_pcm(&bytes)) {
                    (Some(ctx), Ok(samples)) => {
                        fed_samples += samples.len();
                        ctx.feed(&samples);
                    }
                    (Some(_), Err(e)) => tracing::error!(error = %e, "malformed audio frame"),
                    (None, _) => tracing::error!(bytes = bytes.len(), "audio received with no open stream, rejected"),
                }
                None
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => None,
        };

        if let Some(reply) = reply
            && !send(&mut sender, &reply).await
        {
            break;
        }
    }

    tracing::debug!("decode client disconnected");
}

/// Bind and serve the worker until the process is stopped
///
/// # Errors
///
/// Returns error if the port cannot be bound or the server fails
pub async fn serve(state: Arc<WorkerState>, port: u16) -> Result<()> {
    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Config(format!("failed to bind decode worker: {e}")))?;

    tracing::info!(port, "decode worker listening");
    serve_on(state, listener).await
}

/// Serve on an already bound listener
///
/// # Errors
///
/// Returns error if the server fails
pub async fn serve_on(state: Arc<WorkerState>, listener: TcpListener) -> Result<()> {
    axum::serve(listener, router(state))
        .await
        .map_err(|e| Error::Worker(format!("decode worker server error: {e}")))
}
