//! Decoder capability hosted by the worker
//!
//! A [`ModelLoader`] turns a models directory into a [`SpeechModel`]; each
//! stream gets its own [`DecodeContext`] from the model that was current
//! when the stream started.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::stt::{Bias, SpeechToText};
use crate::Result;
use crate::grammar::{TEMPLATES, Vocabularies, expand_templates};
use crate::model::CORPUS_FILE;
use crate::voice::pcm_to_wav;

/// Bias words sent per request
const MAX_BIAS_WORDS: usize = 100;

/// Loads the decoder for a models directory
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Load the model biased by the artifacts in `models_dir`
    async fn load(&self, models_dir: &Path) -> Result<Arc<dyn SpeechModel>>;
}

/// A loaded decoder
pub trait SpeechModel: Send + Sync {
    /// Input sample rate the decoder requires
    fn sample_rate(&self) -> u32;

    /// Open a decode context for one utterance
    fn create_context(&self) -> Box<dyn DecodeContext>;
}

/// Decoding state for one stream
#[async_trait]
pub trait DecodeContext: Send {
    /// Append PCM samples in arrival order
    fn feed(&mut self, samples: &[i16]);

    /// Best-effort partial transcript of the audio so far
    async fn intermediate(&mut self) -> Result<String>;

    /// Final transcript; consumes the context
    async fn finish(self: Box<Self>) -> Result<String>;
}

/// Device words in the corpus that the fixed grammar does not already contain
///
/// Remote decoders know English; what they need is the device names.
#[must_use]
pub fn bias_words(corpus_text: &str) -> Vec<String> {
    let static_words: BTreeSet<String> = expand_templates(&TEMPLATES, &Vocabularies::standard())
        .iter()
        .flat_map(|l| l.split_whitespace().map(str::to_string).collect::<Vec<_>>())
        .collect();

    let mut seen = BTreeSet::new();
    corpus_text
        .lines()
        .flat_map(str::split_whitespace)
        .filter(|w| !static_words.contains(*w) && !w.starts_with('<'))
        .filter(|w| seen.insert((*w).to_string()))
        .take(MAX_BIAS_WORDS)
        .map(str::to_string)
        .collect()
}

/// Loads a [`RemoteModel`] biased by the corpus in the models directory
pub struct RemoteLoader {
    stt: Arc<SpeechToText>,
    sample_rate: u32,
}

impl RemoteLoader {
    #[must_use]
    pub const fn new(stt: Arc<SpeechToText>, sample_rate: u32) -> Self {
        Self { stt, sample_rate }
    }
}

#[async_trait]
impl ModelLoader for RemoteLoader {
    async fn load(&self, models_dir: &Path) -> Result<Arc<dyn SpeechModel>> {
        let corpus = match tokio::fs::read_to_string(models_dir.join(CORPUS_FILE)).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let bias = Bias {
            words: bias_words(&corpus),
        };
        tracing::info!(bias_words = bias.words.len(), "loaded remote decoder");

        Ok(Arc::new(RemoteModel {
            stt: Arc::clone(&self.stt),
            sample_rate: self.sample_rate,
            bias: Arc::new(bias),
        }))
    }
}

/// Decoder backed by a remote transcription API
pub struct RemoteModel {
    stt: Arc<SpeechToText>,
    sample_rate: u32,
    bias: Arc<Bias>,
}

impl SpeechModel for RemoteModel {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn create_context(&self) -> Box<dyn DecodeContext> {
        Box::new(RemoteContext {
            stt: Arc::clone(&self.stt),
            sample_rate: self.sample_rate,
            bias: Arc::clone(&self.bias),
            samples: Vec::new(),
            decoded_len: 0,
            last_interim: String::new(),
        })
    }
}

/// Buffers the utterance and transcribes it in one request
struct RemoteContext {
    stt: Arc<SpeechToText>,
    sample_rate: u32,
    bias: Arc<Bias>,
    samples: Vec<i16>,
    decoded_len: usize,
    last_interim: String,
}

impl RemoteContext {
    async fn transcribe(&self) -> Result<String> {
        if self.samples.is_empty() {
            return Ok(String::new());
        }
        let wav = pcm_to_wav(&self.samples, self.sample_rate)?;
        let text = self.stt.transcribe(&wav, &self.bias).await?;
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl DecodeContext for RemoteContext {
    fn feed(&mut self, samples: &[i16]) {
        self.samples.extend_from_slice(samples);
    }

    async fn intermediate(&mut self) -> Result<String> {
        // No new audio, same answer
        if self.samples.len() == self.decoded_len {
            return Ok(self.last_interim.clone());
        }
        self.last_interim = self.transcribe().await?;
        self.decoded_len = self.samples.len();
        Ok(self.last_interim.clone())
    }

    async fn finish(self: Box<Self>) -> Result<String> {
        self.transcribe().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bias_words_keep_device_names_only() {
        let corpus = "turn kitchen on\nturn the kitchen light off\nset porch to red\nhey beacon\n";
        let words = bias_words(corpus);

        assert_eq!(words, vec!["kitchen", "porch", "hey", "beacon"]);
    }
}
