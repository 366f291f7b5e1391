//! Shared test utilities
//!
//! In-memory stand-ins for the microphone, the decode worker connection and
//! the gateway.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use beacon_voice::command::CommandOutcome;
use beacon_voice::registry::{
    Capability, Device, DeviceClient, PropertyDescription, PropertyRef, PropertyValue,
};
use beacon_voice::session::{
    AudioEvent, AudioSource, CommandHandler, DecodeConnector, DecodeStream, StreamMessage,
};
use beacon_voice::{Error, Result};

/// Audio source fed by the test through a channel
pub struct ChannelAudio {
    events: mpsc::UnboundedReceiver<AudioEvent>,
    pub log: Arc<Mutex<Vec<String>>>,
}

impl ChannelAudio {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedSender<AudioEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let audio = Self {
            events: rx,
            log: Arc::new(Mutex::new(Vec::new())),
        };
        (audio, tx)
    }
}

#[async_trait]
impl AudioSource for ChannelAudio {
    async fn start(&mut self, sample_rate: u32) -> Result<()> {
        self.log.lock().unwrap().push(format!("start {sample_rate}"));
        Ok(())
    }

    async fn next_event(&mut self) -> Result<AudioEvent> {
        match self.events.recv().await {
            Some(event) => Ok(event),
            // Sender gone: behave like a quiet microphone
            None => std::future::pending().await,
        }
    }

    async fn pause(&mut self) {
        self.log.lock().unwrap().push("pause".to_string());
    }
}

/// What the session sent to the fake worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Traffic {
    Start,
    Audio(usize),
    Finish,
    Close,
}

/// Shared script for [`FakeConnector`] streams
#[derive(Default)]
pub struct WorkerScript {
    /// Final transcripts handed out, one per `finish`
    pub finals: Mutex<VecDeque<String>>,
    /// Delay before a final transcript is delivered
    pub final_delay: Mutex<Duration>,
    pub traffic: Mutex<Vec<Traffic>>,
    pub connections: Mutex<usize>,
    /// Message channel of the latest stream
    pub stream_tx: Mutex<Option<mpsc::UnboundedSender<StreamMessage>>>,
}

impl WorkerScript {
    #[must_use]
    pub fn with_finals(finals: &[&str]) -> Arc<Self> {
        let script = Self::default();
        script
            .finals
            .lock()
            .unwrap()
            .extend(finals.iter().map(|f| (*f).to_string()));
        Arc::new(script)
    }

    #[must_use]
    pub fn traffic(&self) -> Vec<Traffic> {
        self.traffic.lock().unwrap().clone()
    }

    /// Push an interim transcript down the latest stream
    pub fn send_interim(&self, text: &str) {
        if let Some(tx) = self.stream_tx.lock().unwrap().as_ref() {
            let _ = tx.send(StreamMessage::Interim(text.to_string()));
        }
    }
}

/// Decode stream answering `finish` from a [`WorkerScript`]
pub struct FakeStream {
    script: Arc<WorkerScript>,
    tx: mpsc::UnboundedSender<StreamMessage>,
    rx: mpsc::UnboundedReceiver<StreamMessage>,
}

#[async_trait]
impl DecodeStream for FakeStream {
    fn sample_rate(&self) -> u32 {
        16000
    }

    async fn start(&mut self) -> Result<()> {
        self.script.traffic.lock().unwrap().push(Traffic::Start);
        Ok(())
    }

    async fn send_audio(&mut self, samples: &[i16]) -> Result<()> {
        self.script
            .traffic
            .lock()
            .unwrap()
            .push(Traffic::Audio(samples.len()));
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.script.traffic.lock().unwrap().push(Traffic::Finish);

        let next = self.script.finals.lock().unwrap().pop_front();
        if let Some(text) = next {
            let delay = *self.script.final_delay.lock().unwrap();
            let tx = self.tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(StreamMessage::Final(text));
            });
        }
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<StreamMessage>> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) {
        self.script.traffic.lock().unwrap().push(Traffic::Close);
    }
}

/// Connector producing [`FakeStream`]s
pub struct FakeConnector {
    pub script: Arc<WorkerScript>,
}

#[async_trait]
impl DecodeConnector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn DecodeStream>> {
        *self.script.connections.lock().unwrap() += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        *self.script.stream_tx.lock().unwrap() = Some(tx.clone());
        Ok(Box::new(FakeStream {
            script: Arc::clone(&self.script),
            tx,
            rx,
        }))
    }
}

/// Handler that records transcripts and answers with a fixed outcome
pub struct RecordingHandler {
    pub heard: Mutex<Vec<String>>,
    outcome: CommandOutcome,
}

impl RecordingHandler {
    #[must_use]
    pub fn new(outcome: CommandOutcome) -> Arc<Self> {
        Arc::new(Self {
            heard: Mutex::new(Vec::new()),
            outcome,
        })
    }

    #[must_use]
    pub fn heard(&self) -> Vec<String> {
        self.heard.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandHandler for RecordingHandler {
    async fn handle(&self, transcript: &str) -> CommandOutcome {
        self.heard.lock().unwrap().push(transcript.to_string());
        self.outcome.clone()
    }
}

/// Gateway with devices and property values held in memory
#[derive(Default)]
pub struct MemoryGateway {
    pub devices: Mutex<Vec<Device>>,
    pub values: Mutex<HashMap<PropertyRef, PropertyValue>>,
    /// Every write, in order
    pub writes: Mutex<Vec<(PropertyRef, PropertyValue)>>,
    /// Reject writes with this message
    pub reject_writes: Mutex<Option<String>>,
}

impl MemoryGateway {
    #[must_use]
    pub fn with_devices(devices: Vec<Device>) -> Arc<Self> {
        let gateway = Self::default();
        *gateway.devices.lock().unwrap() = devices;
        Arc::new(gateway)
    }

    pub fn set(&self, device_id: &str, property: &str, value: PropertyValue) {
        self.values.lock().unwrap().insert(
            PropertyRef {
                device_id: device_id.to_string(),
                property: property.to_string(),
            },
            value,
        );
    }

    #[must_use]
    pub fn writes(&self) -> Vec<(PropertyRef, PropertyValue)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceClient for MemoryGateway {
    async fn list_devices(&self) -> Result<Vec<Device>> {
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn get_value(&self, property: &PropertyRef) -> Result<PropertyValue> {
        self.values
            .lock()
            .unwrap()
            .get(property)
            .cloned()
            .ok_or_else(|| Error::PropertyApply(format!("no value for {property}")))
    }

    async fn set_value(&self, property: &PropertyRef, value: PropertyValue) -> Result<PropertyValue> {
        if let Some(reason) = self.reject_writes.lock().unwrap().clone() {
            return Err(Error::PropertyApply(reason));
        }
        self.writes
            .lock()
            .unwrap()
            .push((property.clone(), value.clone()));
        self.values
            .lock()
            .unwrap()
            .insert(property.clone(), value.clone());
        Ok(value)
    }
}

/// A dimmable colour bulb
#[must_use]
pub fn bulb(id: &str, title: &str) -> Device {
    Device::new(id, title)
        .with_property("on", PropertyDescription::of(Capability::OnOff))
        .with_property(
            "level",
            PropertyDescription::of(Capability::Brightness).with_range(0.0, 100.0),
        )
        .with_property(
            "colorTemperature",
            PropertyDescription::of(Capability::ColorTemperature).with_range(2200.0, 6500.0),
        )
        .with_property("color", PropertyDescription::of(Capability::Color))
}

/// A door contact sensor
#[must_use]
pub fn door_sensor(id: &str, title: &str) -> Device {
    let mut open = PropertyDescription::of(Capability::Open);
    open.read_only = true;
    Device::new(id, title).with_property("open", open)
}
