//! Beacon Voice - offline voice control for smart-home gateways
//!
//! This library provides the core functionality for Beacon voice control:
//! - Grammar compilation from command templates and device names
//! - Language model builds biased toward the compiled corpus
//! - A decode worker process with a WebSocket streaming protocol
//! - The wake word / command listening session
//! - Transcript resolution into device property actions
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Gateway (devices)                    │
//! └──────────┬──────────────────────────────▲───────────┘
//!            │ registry sync                │ set / get
//! ┌──────────▼──────────┐        ┌──────────┴───────────┐
//! │ Grammar → LM build  │        │  Command resolution   │
//! └──────────┬──────────┘        └──────────▲───────────┘
//!            │ models dir                   │ transcript
//! ┌──────────▼──────────┐  ws    ┌──────────┴───────────┐
//! │    Decode worker    ◄────────►   Session (mic)      │
//! └─────────────────────┘        └──────────────────────┘
//! ```

pub mod command;
pub mod config;
pub mod daemon;
pub mod error;
pub mod grammar;
pub mod model;
pub mod registry;
pub mod retry;
pub mod session;
pub mod voice;
pub mod worker;

pub use command::{CommandEngine, CommandOutcome, Resolver};
pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use grammar::{Corpus, compile};
pub use registry::{Device, DeviceRegistry};
pub use session::{Session, SessionEvent, SessionState, VoiceController};
