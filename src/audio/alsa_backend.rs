//! ALSA implementations of the device capabilities.
//!
//! Real-time I/O runs on dedicated OS threads, not tokio tasks. Capture and
//! playback threads report back through the [`EventSink`] they were given.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use alsa::pcm::PCM;
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::alsa_device;
use super::codec;
use super::device::{
    CaptureConstraints, CaptureDevice, OutputDevice, ProcessorSpec, SampleProcessor,
    StreamHandle,
};
use super::playback::Emission;
use crate::error::{LinkError, Result};
use crate::events::{EventSink, LinkEvent};

const XRUN_RETRIES: u32 = 3;

type Registry = Arc<Mutex<HashMap<u64, PCM>>>;

fn lock(registry: &Registry) -> std::sync::MutexGuard<'_, HashMap<u64, PCM>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ======================== Capture ========================

/// Opens capture PCMs and keeps them until released.
pub struct AlsaCapture {
    streams: Registry,
    next_id: u64,
}

impl AlsaCapture {
    pub fn new() -> Self {
        Self {
            streams: Arc::new(Mutex::new(HashMap::new())),
            next_id: 1,
        }
    }

    /// A processor reading from the streams this device acquires.
    pub fn processor(&self) -> AlsaProcessor {
        AlsaProcessor {
            streams: self.streams.clone(),
            worker: None,
        }
    }
}

impl Default for AlsaCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureDevice for AlsaCapture {
    async fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<StreamHandle> {
        let device = constraints.device.clone();
        let (rate, channels) = (constraints.sample_rate, constraints.channels);
        let (pcm, negotiated) = tokio::task::spawn_blocking(move || {
            alsa_device::open_capture(&device, rate, channels)
        })
        .await
        .map_err(|e| LinkError::CaptureAcquisition(e.to_string()))?
        .map_err(|e| LinkError::CaptureAcquisition(format!("{:#}", e)))?;

        let id = self.next_id;
        self.next_id += 1;
        lock(&self.streams).insert(id, pcm);
        Ok(StreamHandle {
            id,
            sample_rate: negotiated.sample_rate,
            channels: negotiated.channels,
        })
    }

    fn release(&mut self, stream: StreamHandle) {
        if lock(&self.streams).remove(&stream.id).is_some() {
            log::info!("Capture stream #{} released", stream.id);
        }
    }
}

struct CaptureWorker {
    stream_id: u64,
    running: Arc<AtomicBool>,
    handle: JoinHandle<PCM>,
}

/// Pulls S16LE periods off an acquired stream and emits mono floats.
pub struct AlsaProcessor {
    streams: Registry,
    worker: Option<CaptureWorker>,
}

#[async_trait]
impl SampleProcessor for AlsaProcessor {
    async fn load(
        &mut self,
        stream: &StreamHandle,
        spec: ProcessorSpec,
        sink: EventSink,
    ) -> Result<()> {
        self.unload();
        let pcm = lock(&self.streams)
            .remove(&stream.id)
            .ok_or_else(|| LinkError::ProcessorLoad(format!("stream #{} not found", stream.id)))?;

        let running = Arc::new(AtomicBool::new(true));
        let input = stream.clone();
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("voxlink-capture".into())
            .spawn(move || {
                if let Err(e) = capture_loop(&pcm, input, spec.sample_rate, &sink, &flag) {
                    log::error!("Capture thread error: {:#}", e);
                }
                let _ = PCM::drop(&pcm);
                pcm
            })
            .map_err(|e| LinkError::ProcessorLoad(e.to_string()))?;

        self.worker = Some(CaptureWorker {
            stream_id: stream.id,
            running,
            handle,
        });
        Ok(())
    }

    fn unload(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.running.store(false, Ordering::SeqCst);
        match worker.handle.join() {
            // hand the PCM back so release() can close it
            Ok(pcm) => {
                lock(&self.streams).insert(worker.stream_id, pcm);
            }
            Err(_) => log::error!("Capture thread panicked"),
        }
    }
}

fn capture_loop(
    pcm: &PCM,
    input: StreamHandle,
    target_rate: u32,
    sink: &EventSink,
    running: &AtomicBool,
) -> anyhow::Result<()> {
    pcm.prepare()?;
    let io = pcm.io_i16()?;
    let channels = input.channels.max(1) as usize;
    let mut buf = vec![0i16; (input.sample_rate as usize / 50).max(1) * channels];

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut buf) {
            Ok(frames) => {
                let mono: Vec<f32> = buf[..frames * channels]
                    .chunks_exact(channels)
                    .map(|frame| {
                        frame.iter().map(|&s| codec::pcm16_to_float(s)).sum::<f32>()
                            / channels as f32
                    })
                    .collect();
                let samples = codec::resample(&mono, input.sample_rate, target_rate);
                if !sink.emit(LinkEvent::Captured(samples)) {
                    break;
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                pcm.prepare()?;
            }
        }
    }
    Ok(())
}

// ======================== Playback ========================

struct PlaybackWorker {
    tx: mpsc::UnboundedSender<Emission>,
    /// Latest barge epoch; `u64::MAX` while closing.
    barge_epoch: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

/// Plays emissions on an ALSA device and reports each one as finished.
pub struct AlsaOutput {
    device: String,
    sample_rate: u32,
    channels: u32,
    worker: Option<PlaybackWorker>,
}

impl AlsaOutput {
    pub fn new(device: impl Into<String>, sample_rate: u32, channels: u32) -> Self {
        Self {
            device: device.into(),
            sample_rate,
            channels,
            worker: None,
        }
    }
}

impl OutputDevice for AlsaOutput {
    fn open(&mut self, sink: EventSink) -> Result<()> {
        self.close();
        let (pcm, negotiated) =
            alsa_device::open_playback(&self.device, self.sample_rate, self.channels)
                .map_err(|e| LinkError::Output(format!("{:#}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let barge_epoch = Arc::new(AtomicU64::new(0));
        let epoch_seen = barge_epoch.clone();
        let handle = thread::Builder::new()
            .name("voxlink-playback".into())
            .spawn(move || {
                if let Err(e) = playback_loop(&pcm, negotiated, rx, &sink, &epoch_seen) {
                    log::error!("Playback thread error: {:#}", e);
                }
                log::info!("Playback stopped");
            })
            .map_err(|e| LinkError::Output(e.to_string()))?;

        self.worker = Some(PlaybackWorker {
            tx,
            barge_epoch,
            handle,
        });
        Ok(())
    }

    fn schedule(&mut self, emission: Emission) -> Result<()> {
        let worker = self
            .worker
            .as_ref()
            .ok_or_else(|| LinkError::Output("output device not open".into()))?;
        worker
            .tx
            .send(emission)
            .map_err(|_| LinkError::Output("playback thread gone".into()))
    }

    fn interrupt(&mut self, epoch: u64) {
        if let Some(worker) = &self.worker {
            worker.barge_epoch.fetch_max(epoch, Ordering::SeqCst);
        }
    }

    fn close(&mut self) {
        let Some(PlaybackWorker {
            tx,
            barge_epoch,
            handle,
        }) = self.worker.take()
        else {
            return;
        };
        // abort the current write within one period, then end the thread so
        // the PCM is closed before a reopen
        barge_epoch.store(u64::MAX, Ordering::SeqCst);
        drop(tx);
        if handle.join().is_err() {
            log::error!("Playback thread panicked");
        }
    }
}

fn playback_loop(
    pcm: &PCM,
    negotiated: alsa_device::Negotiated,
    mut rx: mpsc::UnboundedReceiver<Emission>,
    sink: &EventSink,
    barge_epoch: &AtomicU64,
) -> anyhow::Result<()> {
    let io = pcm.io_i16()?;
    let channels = negotiated.channels.max(1) as usize;
    let period = negotiated.period_size.max(1);

    while let Some(emission) = rx.blocking_recv() {
        let seq = emission.seq;
        if emission.superseded_by(barge_epoch.load(Ordering::SeqCst)) {
            log::debug!("Skipping emission {} cut before a barge", seq);
            if !sink.emit(LinkEvent::EmissionFinished { seq }) {
                break;
            }
            continue;
        }
        let epoch = emission.epoch;
        let chunk = emission.chunk.resampled(negotiated.sample_rate);
        let interleaved: Vec<i16> = chunk
            .samples
            .iter()
            .flat_map(|&s| std::iter::repeat_n(codec::float_to_pcm16(s), channels))
            .collect();

        let total = interleaved.len() / channels;
        let mut written = 0;
        let mut retries = 0;
        while written < total {
            if barge_epoch.load(Ordering::SeqCst) > epoch {
                // interrupted: discard what the hardware still holds
                let _ = PCM::drop(pcm);
                pcm.prepare()?;
                break;
            }
            let end = (written + period).min(total);
            match io.writei(&interleaved[written * channels..end * channels]) {
                Ok(n) => {
                    written += n;
                    retries = 0;
                }
                Err(e) => {
                    retries += 1;
                    log::warn!("ALSA playback error: {} (retry {}/{})", e, retries, XRUN_RETRIES);
                    pcm.prepare()?;
                    if retries >= XRUN_RETRIES {
                        log::error!("Giving up on emission {} after {} retries", seq, retries);
                        break;
                    }
                }
            }
        }

        if !sink.emit(LinkEvent::EmissionFinished { seq }) {
            break;
        }
    }
    Ok(())
}
