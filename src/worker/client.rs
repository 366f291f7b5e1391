//! Session-side connection to the decode worker

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::protocol::{ControlMessage, WorkerMessage, encode_pcm};
use super::supervisor::WorkerSupervisor;
use crate::session::{DecodeConnector, DecodeStream, StreamMessage};
use crate::{Error, Result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens [`WorkerStream`]s, starting the worker first when supervised
pub struct WorkerConnector {
    url: String,
    supervisor: Option<Arc<WorkerSupervisor>>,
}

impl WorkerConnector {
    /// Connect to a supervised worker
    #[must_use]
    pub fn supervised(supervisor: Arc<WorkerSupervisor>) -> Self {
        Self {
            url: supervisor.stream_url(),
            supervisor: Some(supervisor),
        }
    }

    /// Connect to a worker managed elsewhere
    #[must_use]
    pub fn external(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            supervisor: None,
        }
    }
}

#[async_trait]
impl DecodeConnector for WorkerConnector {
    async fn connect(&self) -> Result<Box<dyn DecodeStream>> {
        if let Some(supervisor) = &self.supervisor {
            supervisor.ensure_running().await?;
        }

        let stream = WorkerStream::connect(&self.url).await?;

        if let Some(supervisor) = &self.supervisor {
            supervisor.record_success().await;
        }
        Ok(Box::new(stream))
    }
}

/// One WebSocket connection to the worker
pub struct WorkerStream {
    socket: Socket,
    sample_rate: u32,
}

impl WorkerStream {
    /// Connect and ask the worker for its sample rate
    ///
    /// # Errors
    ///
    /// Returns error if the connection fails or the worker does not answer
    pub async fn connect(url: &str) -> Result<Self> {
        let (mut socket, _response) = connect_async(url).await?;
        socket
            .send(Message::Text(ControlMessage::GetSampleRate.as_str().to_string()))
            .await?;

        while let Some(message) = socket.next().await {
            if let Message::Text(text) = message? {
                match WorkerMessage::from_json(&text)? {
                    WorkerMessage::SampleRate { sample_rate } => {
                        tracing::debug!(url, sample_rate, "decode worker connected");
                        return Ok(Self { socket, sample_rate });
                    }
                    WorkerMessage::Error { error } => return Err(Error::Worker(error)),
                    WorkerMessage::Transcript { .. } => {}
                }
            }
        }

        Err(Error::Worker("connection closed before sample rate".to_string()))
    }

    async fn control(&mut self, message: ControlMessage) -> Result<()> {
        self.socket
            .send(Message::Text(message.as_str().to_string()))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DecodeStream for WorkerStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn start(&mut self) -> Result<()> {
        self.control(ControlMessage::StartStream).await
    }

    async fn send_audio(&mut self, samples: &[i16]) -> Result<()> {
        self.socket.send(Message::Binary(encode_pcm(samples))).await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.control(ControlMessage::StreamEnd).await
    }

    async fn next_message(&mut self) -> Result<Option<StreamMessage>> {
        while let Some(message) = self.socket.next().await {
            match message? {
                Message::Text(text) => match WorkerMessage::from_json(&text) {
                    Ok(WorkerMessage::Transcript { transcript, interim }) => {
                        return Ok(Some(if interim {
                            StreamMessage::Interim(transcript)
                        } else {
                            StreamMessage::Final(transcript)
                        }));
                    }
                    Ok(WorkerMessage::Error { error }) => {
                        tracing::warn!(error = %error, "decode worker reported error");
                    }
                    Ok(WorkerMessage::SampleRate { .. }) => {}
                    Err(e) => tracing::warn!(error = %e, "unreadable worker message"),
                },
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    async fn close(&mut self) {
        if let Err(e) = self.socket.close(None).await {
            tracing::debug!(error = %e, "decode worker close failed");
        }
    }
}
