//! Error types for Beacon voice

use thiserror::Error;

use crate::model::BuildError;

/// Result type alias for Beacon voice operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Beacon voice
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio capture error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text backend error
    #[error("STT error: {0}")]
    Stt(String),

    /// Decoder capability error inside the decode worker
    #[error("decoder error: {0}")]
    Decoder(String),

    /// Transient decode worker failure (connection dropped, protocol hiccup)
    #[error("decode worker error: {0}")]
    Worker(String),

    /// Decode worker cannot be started; speech control is unavailable
    #[error("speech control unavailable: {0}")]
    WorkerUnavailable(String),

    /// Language model rebuild failed
    #[error("model build error: {0}")]
    Build(#[from] BuildError),

    /// Device registry collaborator error
    #[error("registry error: {0}")]
    Registry(String),

    /// The registry collaborator rejected a property write
    #[error("property apply error: {0}")]
    PropertyApply(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
    /// Whether the listening cycle may recover from this error by reconnecting
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Worker(_) | Self::Io(_) | Self::Http(_) | Self::WebSocket(_) | Self::Serialization(_)
        )
    }
}
