//! Decode worker
//!
//! The decoder runs in its own process behind a small WebSocket protocol:
//! the session asks for the sample rate, opens a stream, sends PCM frames,
//! ends the stream and receives exactly one final transcript. The parent
//! supervises the process and restarts it with bounded backoff.

mod client;
mod decoder;
mod protocol;
mod server;
mod stt;
mod supervisor;

pub use client::{WorkerConnector, WorkerStream};
pub use decoder::{DecodeContext, ModelLoader, RemoteLoader, RemoteModel, SpeechModel, bias_words};
pub use protocol::{ControlMessage, WorkerMessage, decode_pcm, encode_pcm};
pub use server::{WorkerState, router, serve, serve_on};
pub use stt::{Bias, SpeechToText, SttProvider};
pub use supervisor::{SupervisorConfig, WorkerSupervisor};

/// Exit code of a worker whose decoder failed to initialize
pub const EXIT_DECODER_INIT: i32 = 3;

/// Input rate of the remote decoder
pub const DECODER_SAMPLE_RATE: u32 = 16000;

/// Default worker port
pub const DEFAULT_PORT: u16 = 18791;
