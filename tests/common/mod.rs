//! In-memory devices and a harness that drives a `VoiceLink` event by event.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use voxlink::audio::codec;
use voxlink::audio::device::{
    CaptureConstraints, CaptureDevice, OutputDevice, ProcessorSpec, SampleProcessor,
    StreamHandle, Visualizer,
};
use voxlink::audio::{Emission, EmissionKind};
use voxlink::events::{EventSink, LinkEvent, TransportEvent};
use voxlink::net_link::{Connector, TransportHandle};
use voxlink::{Config, Devices, LinkError, Notification, Result, VoiceLink};

pub const RATE: u32 = 8_000;
/// 400 ms at 8 kHz.
pub const CHUNK: usize = 3_200;
/// 1000 ms at 8 kHz.
pub const THRESHOLD: usize = 8_000;

pub fn test_config() -> Config {
    Config {
        ws_url: "ws://link.test/stream".into(),
        capture_sample_rate: RATE,
        playback_sample_rate: RATE,
        inbound_default_sample_rate: RATE,
        chunk_duration_ms: 400,
        playback_buffer_ms: 1_000,
        ..Config::default()
    }
}

/// State shared between the fakes and the test body.
#[derive(Clone, Default)]
pub struct Rig {
    /// Device calls in the order they happened.
    pub journal: Arc<Mutex<Vec<String>>>,
    /// Text frames written to any transport.
    pub sent: Arc<Mutex<Vec<String>>>,
    /// One sink per transport opened.
    pub transports: Arc<Mutex<Vec<EventSink>>>,
    pub emissions: Arc<Mutex<Vec<Emission>>>,
    pub fail_acquire: Arc<AtomicBool>,
    pub fail_load: Arc<AtomicBool>,
    pub fail_connect: Arc<AtomicBool>,
    pub fail_output_open: Arc<AtomicBool>,
    pub fail_schedule: Arc<AtomicBool>,
    /// Epoch passed to each `interrupt` call.
    pub interrupts: Arc<Mutex<Vec<u64>>>,
}

impl Rig {
    fn log(&self, entry: impl Into<String>) {
        self.journal.lock().unwrap().push(entry.into());
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.journal().iter().filter(|e| *e == entry).count()
    }

    pub fn sent_json(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    /// The `event` tag of every frame sent so far.
    pub fn sent_events(&self) -> Vec<String> {
        self.sent_json()
            .iter()
            .map(|v| v["event"].as_str().unwrap().to_string())
            .collect()
    }

    /// `tts_playing` values in the order they were announced.
    pub fn playing_notices(&self) -> Vec<bool> {
        self.sent_json()
            .iter()
            .filter(|v| v["event"] == "TTS_PLAYING")
            .map(|v| v["media"]["tts_playing"].as_bool().unwrap())
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn emissions(&self) -> Vec<Emission> {
        self.emissions.lock().unwrap().clone()
    }

    pub fn last_emission(&self) -> Emission {
        self.emissions().last().cloned().expect("nothing scheduled")
    }

    pub fn kinds(&self) -> Vec<EmissionKind> {
        self.emissions().iter().map(|e| e.kind).collect()
    }

    pub fn sink(&self, index: usize) -> EventSink {
        self.transports.lock().unwrap()[index].clone()
    }

    pub fn devices(&self) -> Devices {
        Devices {
            connector: Box::new(FakeConnector(self.clone())),
            capture: Box::new(FakeCapture {
                rig: self.clone(),
                next_id: 1,
            }),
            processor: Box::new(FakeProcessor(self.clone())),
            output: Box::new(FakeOutput(self.clone())),
            visualizer: Some(Box::new(FakeVisualizer(self.clone()))),
        }
    }
}

pub struct FakeConnector(Rig);

impl Connector for FakeConnector {
    fn open(&mut self, url: &str, sink: EventSink) -> Result<Box<dyn TransportHandle>> {
        if self.0.fail_connect.load(Ordering::SeqCst) {
            return Err(LinkError::Transport(format!("refused {url}")));
        }
        self.0.log("transport.open");
        self.0.transports.lock().unwrap().push(sink);
        Ok(Box::new(FakeTransport(self.0.clone())))
    }
}

pub struct FakeTransport(Rig);

impl TransportHandle for FakeTransport {
    fn send(&mut self, text: String) -> Result<()> {
        self.0.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn close(&mut self) {
        self.0.log("transport.close");
    }
}

pub struct FakeCapture {
    rig: Rig,
    next_id: u64,
}

#[async_trait]
impl CaptureDevice for FakeCapture {
    async fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<StreamHandle> {
        if self.rig.fail_acquire.load(Ordering::SeqCst) {
            return Err(LinkError::CaptureAcquisition("permission denied".into()));
        }
        self.rig.log("capture.acquire");
        let id = self.next_id;
        self.next_id += 1;
        Ok(StreamHandle {
            id,
            sample_rate: constraints.sample_rate,
            channels: constraints.channels,
        })
    }

    fn release(&mut self, _stream: StreamHandle) {
        self.rig.log("capture.release");
    }
}

pub struct FakeProcessor(Rig);

#[async_trait]
impl SampleProcessor for FakeProcessor {
    async fn load(&mut self, _stream: &StreamHandle, _spec: ProcessorSpec, _sink: EventSink) -> Result<()> {
        if self.0.fail_load.load(Ordering::SeqCst) {
            return Err(LinkError::ProcessorLoad("module missing".into()));
        }
        self.0.log("processor.load");
        Ok(())
    }

    fn unload(&mut self) {
        self.0.log("processor.unload");
    }
}

pub struct FakeOutput(Rig);

impl OutputDevice for FakeOutput {
    fn open(&mut self, _sink: EventSink) -> Result<()> {
        if self.0.fail_output_open.load(Ordering::SeqCst) {
            return Err(LinkError::Output("device busy".into()));
        }
        self.0.log("output.open");
        Ok(())
    }

    fn schedule(&mut self, emission: Emission) -> Result<()> {
        if self.0.fail_schedule.load(Ordering::SeqCst) {
            return Err(LinkError::Output("underrun".into()));
        }
        self.0.emissions.lock().unwrap().push(emission);
        Ok(())
    }

    fn interrupt(&mut self, epoch: u64) {
        self.0.log("output.interrupt");
        self.0.interrupts.lock().unwrap().push(epoch);
    }

    fn close(&mut self) {
        self.0.log("output.close");
    }
}

pub struct FakeVisualizer(Rig);

impl Visualizer for FakeVisualizer {
    fn attach(&mut self, _source: &StreamHandle) {
        self.0.log("visualizer.attach");
    }

    fn detach(&mut self) {
        self.0.log("visualizer.detach");
    }
}

pub struct Harness {
    pub link: VoiceLink,
    pub rig: Rig,
    pub notes: mpsc::UnboundedReceiver<Notification>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let rig = Rig::default();
        let (tx, notes) = mpsc::unbounded_channel();
        let link = VoiceLink::new(config, rig.devices(), tx);
        Self { link, rig, notes }
    }

    /// connect() followed by the transport reporting open.
    pub async fn open(&mut self) {
        self.link.connect().await.unwrap();
        self.transport(TransportEvent::Opened).await;
    }

    pub async fn transport(&mut self, event: TransportEvent) {
        self.link.dispatch(LinkEvent::Transport(event)).await;
    }

    pub async fn server(&mut self, text: &str) {
        self.transport(TransportEvent::Message(text.to_string())).await;
    }

    pub async fn server_media(&mut self, samples: usize, sample_rate: Option<u32>) {
        let payload = codec::encode_pcm16_payload(&vec![0.25; samples]);
        let text = match sample_rate {
            Some(rate) => format!(
                r#"{{"event":"media","media":{{"payload":"{payload}"}},"sample_rate":{rate}}}"#
            ),
            None => format!(r#"{{"event":"media","media":{{"payload":"{payload}"}}}}"#),
        };
        self.server(&text).await;
    }

    pub async fn captured(&mut self, samples: usize) {
        self.link
            .dispatch(LinkEvent::Captured(vec![0.1; samples]))
            .await;
    }

    /// Reports the most recently scheduled emission as played out.
    pub async fn finish_emission(&mut self) {
        let seq = self.rig.last_emission().seq;
        self.link
            .dispatch(LinkEvent::EmissionFinished { seq })
            .await;
    }

    pub fn drain_notes(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(note) = self.notes.try_recv() {
            out.push(note);
        }
        out
    }
}
