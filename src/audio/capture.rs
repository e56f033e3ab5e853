//! Fixed-duration chunker for microphone audio.
//!
//! Raw buffers from the processing unit arrive in whatever size the device
//! delivers. They are accumulated into a fixed ring sized for one chunk
//! duration; every time it fills, a copy is emitted and the fill cursor
//! resets.

use std::time::Instant;

use super::chunk::AudioChunk;

/// Nominal capture sample rate; the encoder assumes this rate.
pub const CAPTURE_SAMPLE_RATE: u32 = 44_100;
/// Duration of one outbound chunk.
pub const CHUNK_DURATION_MS: u32 = 400;

/// A full chunk plus the capture timestamp (ms since the pipeline attached).
#[derive(Debug, Clone)]
pub struct CapturedChunk {
    pub chunk: AudioChunk,
    pub timestamp_ms: u64,
}

pub struct CapturePipeline {
    ring: Vec<f32>,
    fill: usize,
    sample_rate: u32,
    attached_at: Option<Instant>,
    last_timestamp_ms: u64,
}

impl CapturePipeline {
    pub fn new(sample_rate: u32, chunk_duration_ms: u32) -> Self {
        let len = ((sample_rate as u64 * chunk_duration_ms as u64) / 1000).max(1) as usize;
        Self {
            ring: vec![0.0; len],
            fill: 0,
            sample_rate,
            attached_at: None,
            last_timestamp_ms: 0,
        }
    }

    /// Samples per emitted chunk.
    pub fn chunk_len(&self) -> usize {
        self.ring.len()
    }

    /// Samples waiting for the ring to fill.
    pub fn buffered(&self) -> usize {
        self.fill
    }

    pub fn is_attached(&self) -> bool {
        self.attached_at.is_some()
    }

    /// Returns `false` if already attached.
    pub fn attach(&mut self) -> bool {
        if self.attached_at.is_some() {
            return false;
        }
        self.attached_at = Some(Instant::now());
        self.last_timestamp_ms = 0;
        self.fill = 0;
        true
    }

    /// Clears all buffering state. Returns `false` if it was not attached.
    pub fn detach(&mut self) -> bool {
        if self.attached_at.take().is_none() {
            return false;
        }
        self.fill = 0;
        self.ring.iter_mut().for_each(|s| *s = 0.0);
        true
    }

    /// Feeds raw samples; returns every chunk completed by them.
    ///
    /// Samples pushed while detached are dropped.
    pub fn push(&mut self, mut samples: &[f32]) -> Vec<CapturedChunk> {
        let mut out = Vec::new();
        if self.attached_at.is_none() {
            return out;
        }

        while !samples.is_empty() {
            let room = self.ring.len() - self.fill;
            let take = room.min(samples.len());
            self.ring[self.fill..self.fill + take].copy_from_slice(&samples[..take]);
            self.fill += take;
            samples = &samples[take..];

            if self.fill == self.ring.len() {
                out.push(CapturedChunk {
                    chunk: AudioChunk::new(self.ring.clone(), self.sample_rate),
                    timestamp_ms: self.next_timestamp(),
                });
                self.fill = 0;
            }
        }
        out
    }

    fn next_timestamp(&mut self) -> u64 {
        let elapsed = self
            .attached_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.last_timestamp_ms = self.last_timestamp_ms.max(elapsed);
        self.last_timestamp_ms
    }
}
