//! Session state machine tests
//!
//! Runs the real session loop against in-memory audio, worker and gateway fakes

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast, watch};
use tokio::time::{sleep, timeout};

use beacon_voice::command::{CommandEngine, CommandOutcome, NoMatchReason, Resolver};
use beacon_voice::registry::{DeviceRegistry, PropertyRef, PropertyValue};
use beacon_voice::retry::RetryPolicy;
use beacon_voice::session::{
    AudioEvent, DecodeConnector, DecodeStream, Session, SessionConfig, SessionEvent, SessionState,
};
use beacon_voice::{Error, Result};

mod common;

use common::{ChannelAudio, FakeConnector, MemoryGateway, RecordingHandler, Traffic, WorkerScript, bulb};

const WAIT: Duration = Duration::from_secs(2);

fn config() -> SessionConfig {
    SessionConfig {
        // Only the audio source's silence signal ends utterances in these tests
        poll_interval: Duration::from_secs(60),
        final_timeout: Duration::from_secs(5),
        reconnect: RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
        },
        ..SessionConfig::new("OK House")
    }
}

fn unused_handler() -> Arc<RecordingHandler> {
    RecordingHandler::new(CommandOutcome::Rejected {
        reason: "unused".to_string(),
    })
}

async fn next_event(events: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

async fn wait_for_state(state: &mut watch::Receiver<SessionState>, target: SessionState) {
    timeout(WAIT, state.wait_for(|s| *s == target))
        .await
        .expect("timed out waiting for session state")
        .expect("state channel closed");
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

fn utterance(feed: &tokio::sync::mpsc::UnboundedSender<AudioEvent>) {
    feed.send(AudioEvent::Frame(vec![500; 1600])).unwrap();
    feed.send(AudioEvent::Silence).unwrap();
}

#[tokio::test]
async fn test_wake_word_moves_to_awaiting_command() {
    let script = WorkerScript::with_finals(&["hello there ok house"]);
    let (audio, feed) = ChannelAudio::new();
    let handler = unused_handler();

    let session = Session::new(
        config(),
        Box::new(audio),
        Arc::new(FakeConnector {
            script: Arc::clone(&script),
        }),
        handler.clone(),
    );
    let controller = session.controller();
    let mut events = session.subscribe();
    let mut state = session.state();
    let task = tokio::spawn(session.run());

    controller.enable();
    utterance(&feed);

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::WakeWord {
            wake_word: "ok house".to_string()
        }
    );
    wait_for_state(&mut state, SessionState::AwaitingCommand).await;

    // Exactly one event for the wake word
    sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());
    assert!(handler.heard().is_empty());

    let traffic = script.traffic();
    assert_eq!(traffic[0], Traffic::Start);
    assert!(traffic.contains(&Traffic::Audio(1600)));
    assert!(traffic.contains(&Traffic::Finish));

    controller.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_transcript_without_wake_word_keeps_waiting() {
    let script = WorkerScript::with_finals(&["ok housework is done"]);
    let (audio, feed) = ChannelAudio::new();

    let session = Session::new(
        config(),
        Box::new(audio),
        Arc::new(FakeConnector {
            script: Arc::clone(&script),
        }),
        unused_handler(),
    );
    let controller = session.controller();
    let mut events = session.subscribe();
    let state = session.state();
    let task = tokio::spawn(session.run());

    controller.enable();
    utterance(&feed);

    // Second cycle started on the same connection
    wait_until(|| script.traffic().iter().filter(|t| **t == Traffic::Start).count() == 2).await;
    assert!(events.try_recv().is_err());
    assert_eq!(*state.borrow(), SessionState::AwaitingWakeWord);

    controller.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_empty_command_is_no_input() {
    let script = WorkerScript::with_finals(&["ok house", "   "]);
    let (audio, feed) = ChannelAudio::new();
    let handler = unused_handler();

    let session = Session::new(
        config(),
        Box::new(audio),
        Arc::new(FakeConnector {
            script: Arc::clone(&script),
        }),
        handler.clone(),
    );
    let controller = session.controller();
    let mut events = session.subscribe();
    let mut state = session.state();
    let task = tokio::spawn(session.run());

    controller.enable();
    utterance(&feed);
    assert!(matches!(next_event(&mut events).await, SessionEvent::WakeWord { .. }));

    utterance(&feed);
    assert_eq!(next_event(&mut events).await, SessionEvent::NoInput);
    wait_for_state(&mut state, SessionState::AwaitingWakeWord).await;

    sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());
    assert!(handler.heard().is_empty());

    controller.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_command_is_resolved_and_applied() {
    let gateway = MemoryGateway::with_devices(Vec::new());
    gateway.set("kitchen-1", "on", PropertyValue::Bool(false));

    let mut registry = DeviceRegistry::new();
    registry.register(bulb("living-1", "Living Room"));
    registry.register(bulb("kitchen-1", "Kitchen"));

    let engine = Arc::new(CommandEngine::new(
        Resolver::standard(0.7).unwrap(),
        Arc::new(RwLock::new(registry)),
        gateway.clone(),
    ));

    let script = WorkerScript::with_finals(&["ok house", "turn the kicthen light on"]);
    let (audio, feed) = ChannelAudio::new();

    let session = Session::new(
        config(),
        Box::new(audio),
        Arc::new(FakeConnector {
            script: Arc::clone(&script),
        }),
        engine,
    );
    let controller = session.controller();
    let mut events = session.subscribe();
    let mut state = session.state();
    let task = tokio::spawn(session.run());

    controller.enable();
    utterance(&feed);
    assert!(matches!(next_event(&mut events).await, SessionEvent::WakeWord { .. }));

    utterance(&feed);
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::SpeechInput {
            transcript: "turn the kicthen light on".to_string()
        }
    );

    let property = PropertyRef {
        device_id: "kitchen-1".to_string(),
        property: "on".to_string(),
    };
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::CommandExecuted {
            transcript: "turn the kicthen light on".to_string(),
            outcome: CommandOutcome::Executed {
                property: property.clone(),
                value: PropertyValue::Bool(true),
            },
        }
    );
    wait_for_state(&mut state, SessionState::AwaitingWakeWord).await;
    assert_eq!(gateway.writes(), vec![(property, PropertyValue::Bool(true))]);

    controller.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unresolved_command_fails() {
    let handler = RecordingHandler::new(CommandOutcome::NoMatch(NoMatchReason::Unparsed));
    let script = WorkerScript::with_finals(&["ok house", "fly me to the moon"]);
    let (audio, feed) = ChannelAudio::new();

    let session = Session::new(
        config(),
        Box::new(audio),
        Arc::new(FakeConnector {
            script: Arc::clone(&script),
        }),
        handler.clone(),
    );
    let controller = session.controller();
    let mut events = session.subscribe();
    let task = tokio::spawn(session.run());

    controller.enable();
    utterance(&feed);
    assert!(matches!(next_event(&mut events).await, SessionEvent::WakeWord { .. }));

    utterance(&feed);
    // Unparsed speech is not reported as input
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::CommandFailed {
            transcript: "fly me to the moon".to_string(),
            outcome: CommandOutcome::NoMatch(NoMatchReason::Unparsed),
        }
    );
    assert_eq!(handler.heard(), vec!["fly me to the moon".to_string()]);

    controller.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_disable_mid_stream_discards_transcript() {
    let script = WorkerScript::with_finals(&["ok house"]);
    *script.final_delay.lock().unwrap() = Duration::from_millis(300);
    let (audio, feed) = ChannelAudio::new();

    let session = Session::new(
        config(),
        Box::new(audio),
        Arc::new(FakeConnector {
            script: Arc::clone(&script),
        }),
        unused_handler(),
    );
    let controller = session.controller();
    let mut events = session.subscribe();
    let mut state = session.state();
    let task = tokio::spawn(session.run());

    controller.enable();
    utterance(&feed);
    wait_until(|| script.traffic().contains(&Traffic::Finish)).await;

    // The final transcript is still in flight
    controller.disable();
    wait_for_state(&mut state, SessionState::Idle).await;
    let at_disable = script.traffic();
    assert_eq!(at_disable.last(), Some(&Traffic::Close));

    feed.send(AudioEvent::Frame(vec![500; 1600])).unwrap();
    sleep(Duration::from_millis(500)).await;

    assert_eq!(script.traffic(), at_disable);
    assert!(events.try_recv().is_err());
    assert_eq!(*state.borrow(), SessionState::Idle);
    assert_eq!(*script.connections.lock().unwrap(), 1);

    // Enabling again opens a fresh connection
    controller.enable();
    wait_until(|| *script.connections.lock().unwrap() == 2).await;

    controller.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap();
}

/// Fails the first connection attempt with a transient error
struct FlakyConnector {
    inner: FakeConnector,
    failures: Mutex<u32>,
}

#[async_trait]
impl DecodeConnector for FlakyConnector {
    async fn connect(&self) -> Result<Box<dyn DecodeStream>> {
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::Worker("connection refused".to_string()));
            }
        }
        self.inner.connect().await
    }
}

#[tokio::test]
async fn test_transient_failure_reconnects() {
    let script = WorkerScript::with_finals(&["ok house"]);
    let (audio, feed) = ChannelAudio::new();

    let session = Session::new(
        config(),
        Box::new(audio),
        Arc::new(FlakyConnector {
            inner: FakeConnector {
                script: Arc::clone(&script),
            },
            failures: Mutex::new(1),
        }),
        unused_handler(),
    );
    let controller = session.controller();
    let mut events = session.subscribe();
    let task = tokio::spawn(session.run());

    controller.enable();
    utterance(&feed);

    assert!(matches!(next_event(&mut events).await, SessionEvent::WakeWord { .. }));
    assert!(controller.is_enabled());

    controller.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap();
}

/// Worker that can never be started
struct UnavailableConnector;

#[async_trait]
impl DecodeConnector for UnavailableConnector {
    async fn connect(&self) -> Result<Box<dyn DecodeStream>> {
        Err(Error::WorkerUnavailable("decoder failed to initialize".to_string()))
    }
}

#[tokio::test]
async fn test_unavailable_worker_disables_with_single_error() {
    let (audio, _feed) = ChannelAudio::new();

    let session = Session::new(config(), Box::new(audio), Arc::new(UnavailableConnector), unused_handler());
    let controller = session.controller();
    let mut events = session.subscribe();
    let mut state = session.state();
    let task = tokio::spawn(session.run());

    controller.enable();

    assert!(matches!(next_event(&mut events).await, SessionEvent::Error { .. }));
    wait_for_state(&mut state, SessionState::Idle).await;
    assert!(!controller.is_enabled());

    sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());

    controller.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap();
}

fn polling_config(poll_interval: Duration) -> SessionConfig {
    SessionConfig {
        poll_interval,
        silence_repeats: 3,
        ..config()
    }
}

#[tokio::test]
async fn test_settled_interim_ends_utterance() {
    let script = WorkerScript::with_finals(&["ok house"]);
    let (audio, feed) = ChannelAudio::new();

    let session = Session::new(
        polling_config(Duration::from_millis(50)),
        Box::new(audio),
        Arc::new(FakeConnector {
            script: Arc::clone(&script),
        }),
        unused_handler(),
    );
    let controller = session.controller();
    let mut events = session.subscribe();
    let task = tokio::spawn(session.run());

    let started = std::time::Instant::now();
    controller.enable();
    // No silence signal; only the unchanged interim can end this
    feed.send(AudioEvent::Frame(vec![500; 1600])).unwrap();

    wait_until(|| script.traffic().contains(&Traffic::Finish)).await;
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(&script.traffic()[..3], &[Traffic::Start, Traffic::Audio(1600), Traffic::Finish]);
    assert!(matches!(next_event(&mut events).await, SessionEvent::WakeWord { .. }));

    controller.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_changing_interim_keeps_utterance_open() {
    let script = WorkerScript::with_finals(&["ok house"]);
    let (audio, feed) = ChannelAudio::new();

    let session = Session::new(
        polling_config(Duration::from_millis(100)),
        Box::new(audio),
        Arc::new(FakeConnector {
            script: Arc::clone(&script),
        }),
        unused_handler(),
    );
    let controller = session.controller();
    let task = tokio::spawn(session.run());

    controller.enable();
    wait_until(|| script.traffic().contains(&Traffic::Start)).await;
    feed.send(AudioEvent::Frame(vec![500; 1600])).unwrap();

    // A new interim lands between every pair of polls
    for i in 0..20 {
        script.send_interim(&format!("ok hou {i}"));
        sleep(Duration::from_millis(20)).await;
    }
    assert!(!script.traffic().contains(&Traffic::Finish));

    wait_until(|| script.traffic().contains(&Traffic::Finish)).await;

    controller.shutdown();
    timeout(WAIT, task).await.unwrap().unwrap();
}
