//! Energy-based end-of-speech detection
//!
//! Signals silence once speech has been heard and the signal has stayed
//! under the energy threshold long enough. Complements the interim-transcript
//! endpointing done by the session.

/// RMS energy (on a 0..1 scale) above which a frame counts as speech
pub const DEFAULT_ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum speech before silence may end the utterance
const MIN_SPEECH_SECS: f32 = 0.3;

/// Trailing silence that ends the utterance
const SILENCE_SECS: f32 = 0.8;

/// Detector state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceState {
    /// Waiting for speech
    Quiet,
    /// Speech heard, counting trailing silence
    Speaking,
}

/// Tracks speech and trailing silence over a PCM stream
#[derive(Debug, Clone)]
pub struct SilenceDetector {
    threshold: f32,
    min_speech_samples: usize,
    silence_samples: usize,
    state: SilenceState,
    speech_counter: usize,
    silence_counter: usize,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn seconds_to_samples(seconds: f32, sample_rate: u32) -> usize {
    (seconds * sample_rate as f32) as usize
}

impl SilenceDetector {
    /// Create a detector for audio at `sample_rate`
    #[must_use]
    pub fn new(sample_rate: u32, threshold: f32) -> Self {
        Self {
            threshold,
            min_speech_samples: seconds_to_samples(MIN_SPEECH_SECS, sample_rate),
            silence_samples: seconds_to_samples(SILENCE_SECS, sample_rate),
            state: SilenceState::Quiet,
            speech_counter: 0,
            silence_counter: 0,
        }
    }

    /// Feed a frame; returns true once speech has ended
    ///
    /// The detector resets itself after reporting.
    pub fn process(&mut self, samples: &[i16]) -> bool {
        let energy = calculate_energy(samples);
        let is_speech = energy > self.threshold;

        match self.state {
            SilenceState::Quiet => {
                if is_speech {
                    self.state = SilenceState::Speaking;
                    self.speech_counter = samples.len();
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech started");
                }
            }
            SilenceState::Speaking => {
                if is_speech {
                    self.speech_counter += samples.len();
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.silence_counter > self.silence_samples {
                    let enough_speech = self.speech_counter > self.min_speech_samples;
                    self.reset();
                    if enough_speech {
                        tracing::trace!("speech ended");
                        return true;
                    }
                }
            }
        }

        false
    }

    /// Back to waiting for speech
    pub const fn reset(&mut self) {
        self.state = SilenceState::Quiet;
        self.speech_counter = 0;
        self.silence_counter = 0;
    }

    #[must_use]
    pub const fn state(&self) -> SilenceState {
        self.state
    }
}

/// RMS energy of PCM samples, normalized to 0..1
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples
        .iter()
        .map(|&s| {
            let s = f32::from(s) / 32768.0;
            s * s
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16000;

    fn frame(value: i16) -> Vec<i16> {
        vec![value; 1600]
    }

    #[test]
    fn test_energy_calculation() {
        assert!(calculate_energy(&frame(0)) < 0.001);
        assert!(calculate_energy(&frame(16000)) > 0.4);
    }

    #[test]
    fn test_speech_then_silence() {
        let mut detector = SilenceDetector::new(RATE, DEFAULT_ENERGY_THRESHOLD);

        for _ in 0..5 {
            assert!(!detector.process(&frame(8000)));
        }
        assert_eq!(detector.state(), SilenceState::Speaking);

        let ended = (0..10).any(|_| detector.process(&frame(0)));
        assert!(ended);
        assert_eq!(detector.state(), SilenceState::Quiet);
    }

    #[test]
    fn test_click_is_not_speech() {
        let mut detector = SilenceDetector::new(RATE, DEFAULT_ENERGY_THRESHOLD);

        // 0.1s burst is under the minimum speech length
        detector.process(&frame(8000));
        let ended = (0..10).any(|_| detector.process(&frame(0)));
        assert!(!ended);
    }
}
