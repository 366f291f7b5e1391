//! Configuration management for Beacon voice
//!
//! Values come from environment variables (`BEACON_VOICE_*`) layered over
//! an optional TOML file (`~/.config/beacon/voice.toml`). Every file field is
//! optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::command::DEFAULT_MATCH_THRESHOLD;
use crate::model::DEFAULT_TOOL_TIMEOUT;
use crate::retry::RetryPolicy;
use crate::voice::MicrophoneConfig;
use crate::worker::{DEFAULT_PORT, SttProvider};
use crate::{Error, Result};

const DEFAULT_WAKE_WORD: &str = "hey beacon";
const DEFAULT_GATEWAY_URL: &str = "http://localhost:8080";

/// Beacon voice configuration
#[derive(Debug)]
pub struct Config {
    /// Lower-cased wake phrase
    pub wake_word: String,

    /// Minimum tag similarity accepted by the resolver
    pub match_threshold: f64,

    /// Unchanged interim polls that end an utterance
    pub silence_repeats: u32,

    /// Interval between interim transcript polls
    pub poll_interval: Duration,

    /// Quiet period before a registry change triggers a rebuild
    pub rebuild_debounce: Duration,

    /// Language model build settings
    pub model: ModelConfig,

    pub worker: WorkerConfig,

    pub gateway: GatewayConfig,

    pub stt: SttConfig,

    pub microphone: MicrophoneConfig,
}

/// Corpus and scorer build settings
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Where `local_lm.txt` and `local_lm.scorer` are published
    pub models_dir: PathBuf,

    /// Directory holding `lmplz`, `build_binary` and `generate_scorer_package`;
    /// `PATH` when unset
    pub tools_dir: Option<PathBuf>,

    /// Directory holding `alphabet.txt` and the acoustic model
    pub assets_dir: PathBuf,

    /// Per-tool timeout
    pub tool_timeout: Duration,
}

impl ModelConfig {
    #[must_use]
    pub fn alphabet(&self) -> PathBuf {
        self.assets_dir.join("alphabet.txt")
    }
}

/// Decode worker settings
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub port: u16,

    /// Consecutive restarts before speech control is disabled
    pub max_restarts: u32,

    /// Connect to a worker managed elsewhere instead of spawning one
    pub url: Option<String>,
}

impl WorkerConfig {
    #[must_use]
    pub fn restart_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_restarts,
            ..RetryPolicy::default()
        }
    }
}

/// Smart-home gateway connection
#[derive(Debug)]
pub struct GatewayConfig {
    pub url: String,

    /// Bearer token for the gateway API
    pub token: Option<SecretString>,

    /// How often the device list is refreshed
    pub poll_interval: Duration,
}

/// Speech-to-text backend used by the decode worker
#[derive(Debug)]
pub struct SttConfig {
    pub provider: SttProvider,

    /// Model identifier (e.g. "whisper-1", "nova-2")
    pub model: String,

    pub api_key: Option<SecretString>,

    /// Override the provider's default URL
    pub endpoint: Option<String>,
}

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    pub wake_word: Option<String>,

    pub match_threshold: Option<f64>,

    pub silence_repeats: Option<u32>,

    pub poll_interval_ms: Option<u64>,

    pub rebuild_debounce_ms: Option<u64>,

    #[serde(default)]
    pub model: ModelFileConfig,

    #[serde(default)]
    pub worker: WorkerFileConfig,

    #[serde(default)]
    pub gateway: GatewayFileConfig,

    #[serde(default)]
    pub stt: SttFileConfig,

    #[serde(default)]
    pub microphone: MicrophoneFileConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelFileConfig {
    pub models_dir: Option<PathBuf>,
    pub tools_dir: Option<PathBuf>,
    pub assets_dir: Option<PathBuf>,
    pub tool_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WorkerFileConfig {
    pub port: Option<u16>,
    pub max_restarts: Option<u32>,
    pub url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GatewayFileConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    pub poll_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    pub provider: Option<SttProvider>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MicrophoneFileConfig {
    pub device: Option<String>,
    pub silence_threshold: Option<f32>,
}

/// Return the config file path: `BEACON_VOICE_CONFIG` or `~/.config/beacon/voice.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("BEACON_VOICE_CONFIG") {
        return Some(PathBuf::from(path));
    }
    directories::BaseDirs::new().map(|d| d.config_dir().join("beacon").join("voice.toml"))
}

/// Read and parse a config file
///
/// A missing file yields the defaults; an unreadable or malformed file is an error.
///
/// # Errors
///
/// Returns error if the file exists but cannot be read or parsed
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(ConfigFile::default());
    }

    let content = std::fs::read_to_string(path)?;
    let file = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(file)
}

fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "omni", "beacon").map_or_else(
        || PathBuf::from(".local/share/beacon"),
        |d| d.data_dir().to_path_buf(),
    )
}

fn secret(value: Option<String>) -> Option<SecretString> {
    value.filter(|v| !v.is_empty()).map(SecretString::from)
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// `path` overrides the config file location.
    ///
    /// # Errors
    ///
    /// Returns error if the config file is malformed or a value is out of range
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path.map(Path::to_path_buf).or_else(config_file_path) {
            Some(path) => load_config_file(&path)?,
            None => ConfigFile::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Layer environment values from `env` over a parsed config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is out of range
    pub fn resolve(fc: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let parsed = |key: &str| env(key).and_then(|v| v.parse::<u64>().ok());

        let wake_word = env("BEACON_VOICE_WAKE_WORD")
            .or(fc.wake_word)
            .unwrap_or_else(|| DEFAULT_WAKE_WORD.to_string())
            .trim()
            .to_lowercase();

        let match_threshold = env("BEACON_VOICE_MATCH_THRESHOLD")
            .and_then(|v| v.parse().ok())
            .or(fc.match_threshold)
            .unwrap_or(DEFAULT_MATCH_THRESHOLD);

        let silence_repeats = env("BEACON_VOICE_SILENCE_REPEATS")
            .and_then(|v| v.parse().ok())
            .or(fc.silence_repeats)
            .unwrap_or(3);

        let poll_interval = Duration::from_millis(
            parsed("BEACON_VOICE_POLL_INTERVAL_MS")
                .or(fc.poll_interval_ms)
                .unwrap_or(1000),
        );

        let rebuild_debounce = Duration::from_millis(
            parsed("BEACON_VOICE_REBUILD_DEBOUNCE_MS")
                .or(fc.rebuild_debounce_ms)
                .unwrap_or(1000),
        );

        let base = data_dir();
        let model = ModelConfig {
            models_dir: env("BEACON_VOICE_MODELS_DIR")
                .map(PathBuf::from)
                .or(fc.model.models_dir)
                .unwrap_or_else(|| base.join("voice").join("models")),
            tools_dir: env("BEACON_VOICE_TOOLS_DIR")
                .map(PathBuf::from)
                .or(fc.model.tools_dir),
            assets_dir: env("BEACON_VOICE_ASSETS_DIR")
                .map(PathBuf::from)
                .or(fc.model.assets_dir)
                .unwrap_or_else(|| base.join("voice").join("assets")),
            tool_timeout: parsed("BEACON_VOICE_TOOL_TIMEOUT_SECS")
                .or(fc.model.tool_timeout_secs)
                .map_or(DEFAULT_TOOL_TIMEOUT, Duration::from_secs),
        };

        let worker = WorkerConfig {
            port: env("BEACON_VOICE_WORKER_PORT")
                .and_then(|v| v.parse().ok())
                .or(fc.worker.port)
                .unwrap_or(DEFAULT_PORT),
            max_restarts: env("BEACON_VOICE_WORKER_MAX_RESTARTS")
                .and_then(|v| v.parse().ok())
                .or(fc.worker.max_restarts)
                .unwrap_or(5),
            url: env("BEACON_VOICE_WORKER_URL").or(fc.worker.url),
        };

        let gateway = GatewayConfig {
            url: env("BEACON_VOICE_GATEWAY_URL")
                .or(fc.gateway.url)
                .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string()),
            token: secret(env("BEACON_VOICE_GATEWAY_TOKEN").or(fc.gateway.token)),
            poll_interval: Duration::from_secs(
                parsed("BEACON_VOICE_GATEWAY_POLL_SECS")
                    .or(fc.gateway.poll_interval_secs)
                    .unwrap_or(30),
            ),
        };

        let provider = match env("BEACON_VOICE_STT_PROVIDER") {
            Some(value) => value.parse()?,
            None => fc.stt.provider.unwrap_or(SttProvider::Whisper),
        };
        let key_var = match provider {
            SttProvider::Whisper => "OPENAI_API_KEY",
            SttProvider::Deepgram => "DEEPGRAM_API_KEY",
        };
        let stt = SttConfig {
            provider,
            model: env("BEACON_VOICE_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or_else(|| match provider {
                    SttProvider::Whisper => "whisper-1".to_string(),
                    SttProvider::Deepgram => "nova-2".to_string(),
                }),
            api_key: secret(
                env("BEACON_VOICE_STT_API_KEY")
                    .or_else(|| env(key_var))
                    .or(fc.stt.api_key),
            ),
            endpoint: env("BEACON_VOICE_STT_ENDPOINT").or(fc.stt.endpoint),
        };

        let microphone = MicrophoneConfig {
            device: env("BEACON_VOICE_MICROPHONE").or(fc.microphone.device),
            silence_threshold: env("BEACON_VOICE_SILENCE_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .or(fc.microphone.silence_threshold),
        };

        let config = Self {
            wake_word,
            match_threshold,
            silence_repeats,
            poll_interval,
            rebuild_debounce,
            model,
            worker,
            gateway,
            stt,
            microphone,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.wake_word.is_empty() {
            return Err(Error::Config("wake word must not be empty".to_string()));
        }
        if !(self.match_threshold > 0.0 && self.match_threshold <= 1.0) {
            return Err(Error::Config(format!(
                "match threshold must be in (0, 1], got {}",
                self.match_threshold
            )));
        }
        if self.silence_repeats == 0 {
            return Err(Error::Config("silence repeats must be at least 1".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be positive".to_string()));
        }
        Ok(())
    }
}
