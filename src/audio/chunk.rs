//! Audio chunk value type shared by the capture, codec and playback stages.

use super::codec;

/// A contiguous block of mono samples at a known sample rate.
///
/// Ownership moves forward through the pipeline: capture → encode → send,
/// or receive → decode → queue → play. Nothing holds on to a chunk after
/// handing it to the next stage.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Converts the chunk to `target_rate`. Returns `self` untouched when the
    /// rates already match.
    pub fn resampled(self, target_rate: u32) -> AudioChunk {
        if self.sample_rate == target_rate {
            return self;
        }
        let samples = codec::resample(&self.samples, self.sample_rate, target_rate);
        AudioChunk::new(samples, target_rate)
    }
}
