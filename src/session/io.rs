//! Seams between the session and its collaborators

use async_trait::async_trait;

use crate::Result;
use crate::command::CommandOutcome;

/// Something captured by the audio front end
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioEvent {
    /// Mono 16-bit PCM at the rate passed to [`AudioSource::start`]
    Frame(Vec<i16>),
    /// The front end detected the end of speech
    Silence,
}

/// Audio front end
#[async_trait]
pub trait AudioSource: Send {
    /// Start or resume capture at `sample_rate`
    async fn start(&mut self, sample_rate: u32) -> Result<()>;

    /// Next captured event
    ///
    /// Must be cancel safe. An error is a permanent capture failure.
    async fn next_event(&mut self) -> Result<AudioEvent>;

    /// Stop capture and drop anything buffered
    async fn pause(&mut self);
}

/// Message received on a decode stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    Interim(String),
    Final(String),
}

/// One connection to the decode worker
#[async_trait]
pub trait DecodeStream: Send {
    /// Decoder input sample rate
    fn sample_rate(&self) -> u32;

    /// Open a decode context for the next utterance
    async fn start(&mut self) -> Result<()>;

    /// Send PCM samples
    async fn send_audio(&mut self, samples: &[i16]) -> Result<()>;

    /// Signal end of utterance
    async fn finish(&mut self) -> Result<()>;

    /// Next message from the worker; `None` once the connection closed
    ///
    /// Must be cancel safe.
    async fn next_message(&mut self) -> Result<Option<StreamMessage>>;

    /// Tear the connection down
    async fn close(&mut self);
}

/// Opens connections to the decode worker
#[async_trait]
pub trait DecodeConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn DecodeStream>>;
}

/// Acts on a transcript heard after the wake word
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, transcript: &str) -> CommandOutcome;
}
