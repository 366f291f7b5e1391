//! Session state machine
//!
//! Streams captured audio into the decode worker, endpoints utterances on
//! silence, gates on the wake word and hands the next utterance to the
//! command handler. The loop runs until shut down; while disabled it sits
//! in [`SessionState::Idle`] with no worker connection.

mod controller;
mod io;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};

pub use controller::{Control, VoiceController};
pub use io::{AudioEvent, AudioSource, CommandHandler, DecodeConnector, DecodeStream, StreamMessage};

use self::controller::until_not_enabled;
use crate::command::{CommandOutcome, normalize_transcript};
use crate::retry::{RetryPolicy, delay_for_attempt};
use crate::{Error, Result};

/// Listening state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Disabled, no worker connection
    Idle,
    AwaitingWakeWord,
    AwaitingCommand,
}

/// Observable session events
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    WakeWord { wake_word: String },
    /// A command transcript that parsed, before its outcome
    SpeechInput { transcript: String },
    CommandExecuted { transcript: String, outcome: CommandOutcome },
    CommandFailed { transcript: String, outcome: CommandOutcome },
    /// Nothing was said after the wake word
    NoInput,
    /// Speech control was disabled by an unrecoverable failure
    Error { message: String },
}

/// Session policy
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Lower-cased wake phrase
    pub wake_word: String,
    /// Unchanged interim polls that end an utterance
    pub silence_repeats: u32,
    pub poll_interval: Duration,
    /// How long to wait for the final transcript after end of utterance
    pub final_timeout: Duration,
    /// Reconnect policy for transient worker failures
    pub reconnect: RetryPolicy,
}

impl SessionConfig {
    #[must_use]
    pub fn new(wake_word: &str) -> Self {
        Self {
            wake_word: normalize_transcript(wake_word),
            silence_repeats: 3,
            poll_interval: Duration::from_secs(1),
            final_timeout: Duration::from_secs(30),
            reconnect: RetryPolicy::default(),
        }
    }
}

/// How one listening cycle ended
enum Cycle {
    Transcript(String),
    Disabled,
}

/// One step of the streaming phase
enum Step {
    Disabled,
    Audio(AudioEvent),
    Message(Option<StreamMessage>),
    Poll,
}

/// Skip interim messages until the final transcript
async fn wait_final(stream: &mut dyn DecodeStream) -> Result<String> {
    loop {
        match stream.next_message().await? {
            Some(StreamMessage::Final(text)) => return Ok(text),
            Some(StreamMessage::Interim(_)) => {}
            None => {
                return Err(Error::Worker(
                    "decode stream closed before final transcript".to_string(),
                ));
            }
        }
    }
}

/// The session loop and its collaborators
pub struct Session {
    config: SessionConfig,
    audio: Box<dyn AudioSource>,
    connector: Arc<dyn DecodeConnector>,
    handler: Arc<dyn CommandHandler>,
    controller: VoiceController,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Create a session; it stays idle until its controller is enabled
    #[must_use]
    pub fn new(
        config: SessionConfig,
        audio: Box<dyn AudioSource>,
        connector: Arc<dyn DecodeConnector>,
        handler: Arc<dyn CommandHandler>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            audio,
            connector,
            handler,
            controller: VoiceController::new(),
            state,
            events,
        }
    }

    #[must_use]
    pub fn controller(&self) -> VoiceController {
        self.controller.clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = ?previous, to = ?next, "session state");
        }
    }

    fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn emit(&self, event: SessionEvent) {
        tracing::debug!(event = ?event, "session event");
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Run until the controller is shut down
    pub async fn run(mut self) {
        let mut control = self.controller.subscribe();

        loop {
            let current = *control.borrow_and_update();
            match current {
                Control::Shutdown => break,
                Control::Disabled => {
                    self.set_state(SessionState::Idle);
                    if control.changed().await.is_err() {
                        break;
                    }
                }
                Control::Enabled => {
                    self.set_state(SessionState::AwaitingWakeWord);
                    if let Err(e) = self.listen().await {
                        tracing::error!(error = %e, "speech control disabled");
                        self.emit(SessionEvent::Error {
                            message: e.to_string(),
                        });
                        self.controller.disable();
                    }
                    self.audio.pause().await;
                    self.set_state(SessionState::Idle);
                }
            }
        }

        tracing::debug!("session loop stopped");
    }

    /// Listening cycles while enabled, reconnecting on transient failures
    ///
    /// Returns `Ok` once disabled, `Err` when failures are permanent or
    /// retries are exhausted.
    async fn listen(&mut self) -> Result<()> {
        let mut control = self.controller.subscribe();
        let mut stream: Option<Box<dyn DecodeStream>> = None;
        let mut failures = 0_u32;

        loop {
            if !self.controller.is_enabled() {
                if let Some(mut s) = stream.take() {
                    s.close().await;
                }
                return Ok(());
            }

            let result = if stream.is_none() {
                match self.open(&mut control).await {
                    Ok(opened) => {
                        stream = opened;
                        continue;
                    }
                    Err(e) => Err(e),
                }
            } else if let Some(s) = stream.as_mut() {
                self.cycle(s.as_mut(), &mut control).await
            } else {
                continue;
            };

            match result {
                Ok(Cycle::Transcript(transcript)) => {
                    failures = 0;
                    if self.controller.is_enabled() {
                        self.handle_transcript(transcript.trim()).await;
                    } else {
                        tracing::debug!("transcript arrived after disable, discarded");
                    }
                }
                Ok(Cycle::Disabled) => {}
                Err(e) if e.is_transient() && self.config.reconnect.allows(failures) => {
                    let delay = delay_for_attempt(&self.config.reconnect, failures);
                    failures += 1;
                    tracing::warn!(error = %e, attempt = failures, delay_ms = delay.as_millis(), "decode stream failed, reconnecting");

                    if let Some(mut s) = stream.take() {
                        s.close().await;
                    }
                    self.audio.pause().await;

                    tokio::select! {
                        () = sleep(delay) => {}
                        () = until_not_enabled(&mut control) => {}
                    }
                }
                Err(e) => {
                    if let Some(mut s) = stream.take() {
                        s.close().await;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Connect to the worker unless disabled first
    async fn open(
        &mut self,
        control: &mut watch::Receiver<Control>,
    ) -> Result<Option<Box<dyn DecodeStream>>> {
        tokio::select! {
            () = until_not_enabled(control) => Ok(None),
            stream = self.connector.connect() => {
                let stream = stream?;
                tracing::debug!(sample_rate = stream.sample_rate(), "connected to decode worker");
                Ok(Some(stream))
            }
        }
    }

    /// One utterance: stream audio until endpoint, then wait for the final transcript
    async fn cycle(
        &mut self,
        stream: &mut dyn DecodeStream,
        control: &mut watch::Receiver<Control>,
    ) -> Result<Cycle> {
        self.audio.start(stream.sample_rate()).await?;
        stream.start().await?;

        let mut poll = interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        poll.tick().await;

        let mut latest = String::new();
        let mut observed = String::new();
        let mut unchanged = 0_u32;

        loop {
            let step = tokio::select! {
                biased;
                () = until_not_enabled(control) => Step::Disabled,
                event = self.audio.next_event() => Step::Audio(event?),
                message = stream.next_message() => Step::Message(message?),
                _ = poll.tick() => Step::Poll,
            };

            match step {
                Step::Disabled => return Ok(Cycle::Disabled),
                Step::Audio(AudioEvent::Frame(samples)) => stream.send_audio(&samples).await?,
                Step::Audio(AudioEvent::Silence) => {
                    tracing::trace!("audio source signalled silence");
                    break;
                }
                Step::Message(Some(StreamMessage::Interim(text))) => latest = text,
                Step::Message(Some(StreamMessage::Final(text))) => {
                    // Worker finalized on its own
                    self.audio.pause().await;
                    return Ok(Cycle::Transcript(text));
                }
                Step::Message(None) => {
                    return Err(Error::Worker("decode stream closed".to_string()));
                }
                Step::Poll => {
                    if latest == observed {
                        unchanged += 1;
                        if unchanged >= self.config.silence_repeats {
                            tracing::trace!(unchanged, "interim transcript settled");
                            break;
                        }
                    } else {
                        observed.clone_from(&latest);
                        unchanged = 0;
                    }
                }
            }
        }

        self.audio.pause().await;
        stream.finish().await?;

        tokio::select! {
            biased;
            () = until_not_enabled(control) => Ok(Cycle::Disabled),
            result = timeout(self.config.final_timeout, wait_final(stream)) => match result {
                Ok(text) => Ok(Cycle::Transcript(text?)),
                Err(_) => Err(Error::Worker("timed out waiting for final transcript".to_string())),
            },
        }
    }

    async fn handle_transcript(&mut self, transcript: &str) {
        let state = self.current_state();

        if transcript.is_empty() {
            if state == SessionState::AwaitingCommand {
                self.emit(SessionEvent::NoInput);
                self.set_state(SessionState::AwaitingWakeWord);
            }
            return;
        }

        match state {
            SessionState::AwaitingWakeWord => {
                let heard = normalize_transcript(transcript);
                if !self.config.wake_word.is_empty() && heard.ends_with(&self.config.wake_word) {
                    tracing::info!(wake_word = %self.config.wake_word, "wake word detected");
                    self.set_state(SessionState::AwaitingCommand);
                    self.emit(SessionEvent::WakeWord {
                        wake_word: self.config.wake_word.clone(),
                    });
                } else {
                    tracing::trace!(transcript, "not the wake word");
                }
            }
            SessionState::AwaitingCommand => {
                tracing::info!(transcript, "command heard");
                let outcome = self.handler.handle(transcript).await;
                let transcript = transcript.to_string();

                if outcome.parsed() {
                    self.emit(SessionEvent::SpeechInput {
                        transcript: transcript.clone(),
                    });
                }
                if outcome.succeeded() {
                    self.emit(SessionEvent::CommandExecuted { transcript, outcome });
                } else {
                    self.emit(SessionEvent::CommandFailed { transcript, outcome });
                }
                self.set_state(SessionState::AwaitingWakeWord);
            }
            SessionState::Idle => {}
        }
    }
}
