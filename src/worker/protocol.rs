//! Decode worker wire protocol
//!
//! Text frames carry control tokens from the client and JSON responses from
//! the worker. Binary frames carry raw little-endian mono 16-bit PCM.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Control token sent by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    GetSampleRate,
    StartStream,
    StreamEnd,
}

impl ControlMessage {
    /// Parse a control token; accepts the short aliases too
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "get-sample-rate" | "sample-rate" => Some(Self::GetSampleRate),
            "start-stream" | "start" => Some(Self::StartStream),
            "stream-end" | "end" => Some(Self::StreamEnd),
            _ => None,
        }
    }

    /// Canonical wire token
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GetSampleRate => "get-sample-rate",
            Self::StartStream => "start-stream",
            Self::StreamEnd => "stream-end",
        }
    }
}

/// JSON response sent by the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerMessage {
    SampleRate {
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
    },
    Transcript {
        transcript: String,
        /// Interim transcripts are best-effort and never drive decisions
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        interim: bool,
    },
    Error {
        error: String,
    },
}

impl WorkerMessage {
    /// Encode as a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns error if the frame is not a known response
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Encode samples as little-endian PCM bytes
#[must_use]
pub fn encode_pcm(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Decode little-endian PCM bytes
///
/// # Errors
///
/// Returns error if the frame has an odd byte count
pub fn decode_pcm(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(Error::Worker(format!("odd PCM frame length {}", bytes.len())));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}
