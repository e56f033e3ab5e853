//! Playback queue for downlink audio.
//!
//! Decoded chunks are buffered FIFO and released to the output device in
//! slices of one buffer duration. Playback only starts once a full buffer
//! has accumulated; after that the queue keeps draining (even below the
//! threshold) until it runs dry, then it bridges the gap with silence.
//!
//! The output device drives the schedule: every finished [`Emission`]
//! produces exactly one call to [`PlaybackQueue::tick`].

use std::collections::VecDeque;

use super::chunk::AudioChunk;
use super::codec;

/// Local output sample rate in Hz.
pub const PLAYBACK_SAMPLE_RATE: u32 = 44_100;
/// Audio accumulated before playback starts, and the length of one emission.
pub const PLAYBACK_BUFFER_MS: u32 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmissionKind {
    Audio,
    Silence,
}

/// One unit of audio handed to the output device per tick.
#[derive(Debug, Clone)]
pub struct Emission {
    /// Monotonic sequence number; the device echoes it back on completion.
    pub seq: u64,
    /// Barge epoch at the time the emission was cut.
    pub epoch: u64,
    pub kind: EmissionKind,
    pub chunk: AudioChunk,
    /// `Some(state)` when this tick flipped the playback-active flag.
    pub playing_changed: Option<bool>,
}

impl Emission {
    pub fn is_silence(&self) -> bool {
        self.kind == EmissionKind::Silence
    }

    /// True once a barge has moved the queue past the epoch this emission
    /// was cut in.
    pub fn superseded_by(&self, barge_epoch: u64) -> bool {
        self.epoch < barge_epoch
    }
}

pub struct PlaybackQueue {
    pending: VecDeque<AudioChunk>,
    queued_samples: usize,
    sample_rate: u32,
    buffer_ms: u32,
    threshold: usize,
    draining: bool,
    playing: bool,
    epoch: u64,
    next_seq: u64,
}

impl PlaybackQueue {
    pub fn new(sample_rate: u32, buffer_ms: u32) -> Self {
        let threshold = ((sample_rate as u64 * buffer_ms as u64) / 1000).max(1) as usize;
        Self {
            pending: VecDeque::new(),
            queued_samples: 0,
            sample_rate,
            buffer_ms,
            threshold,
            draining: false,
            playing: false,
            epoch: 0,
            next_seq: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples needed before playback starts.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn queued_samples(&self) -> usize {
        self.queued_samples
    }

    /// Number of pending chunks.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Nothing queued and nothing audible.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && !self.playing
    }

    pub fn enqueue(&mut self, chunk: AudioChunk) {
        if chunk.is_empty() {
            return;
        }
        if chunk.sample_rate != self.sample_rate {
            log::warn!(
                "Enqueued chunk at {}Hz into a {}Hz playback queue",
                chunk.sample_rate,
                self.sample_rate
            );
        }
        self.queued_samples += chunk.len();
        self.pending.push_back(chunk);
    }

    /// Drops everything not yet played and bumps the epoch.
    ///
    /// Returns `Some(false)` only when this stopped active playback. A barge
    /// while buffering or idle returns `None` and no playback-state notice is
    /// sent, since the peer was never told playback started.
    pub fn barge(&mut self) -> Option<bool> {
        let dropped = self.queued_samples;
        self.pending.clear();
        self.queued_samples = 0;
        self.draining = false;
        self.epoch += 1;
        log::info!(
            "Barge-in: discarded {} queued samples, epoch now {}",
            dropped,
            self.epoch
        );
        if self.playing {
            self.playing = false;
            Some(false)
        } else {
            None
        }
    }

    /// Plays out whatever is queued even if it never reaches the threshold.
    pub fn flush(&mut self) {
        if !self.pending.is_empty() {
            self.draining = true;
        }
    }

    /// Produces the next emission for the output device.
    pub fn tick(&mut self) -> Emission {
        let seq = self.next_seq;
        self.next_seq += 1;

        if self.pending.is_empty() {
            self.draining = false;
            let playing_changed = if self.playing {
                self.playing = false;
                Some(false)
            } else {
                None
            };
            return self.silence(seq, playing_changed);
        }

        if self.queued_samples < self.threshold && !self.draining {
            // still buffering
            return self.silence(seq, None);
        }

        self.draining = true;
        let mut samples = Vec::with_capacity(self.threshold.min(self.queued_samples));
        while samples.len() < self.threshold {
            let Some(chunk) = self.pending.pop_front() else {
                break;
            };
            self.queued_samples -= chunk.len();
            samples.extend_from_slice(&chunk.samples);
        }

        let playing_changed = if self.playing {
            None
        } else {
            self.playing = true;
            Some(true)
        };

        Emission {
            seq,
            epoch: self.epoch,
            kind: EmissionKind::Audio,
            chunk: AudioChunk::new(samples, self.sample_rate),
            playing_changed,
        }
    }

    /// Resets all buffering state; used on teardown.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.queued_samples = 0;
        self.draining = false;
        self.playing = false;
    }

    fn silence(&self, seq: u64, playing_changed: Option<bool>) -> Emission {
        Emission {
            seq,
            epoch: self.epoch,
            kind: EmissionKind::Silence,
            chunk: codec::synthesize_silence(self.buffer_ms as f64 / 1000.0, self.sample_rate),
            playing_changed,
        }
    }
}
