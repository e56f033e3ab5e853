//! Capability interfaces for the audio hardware the link drives.
//!
//! The link never opens devices itself; it calls through these traits and
//! receives device callbacks as [`LinkEvent`](crate::events::LinkEvent)s on
//! the [`EventSink`] it hands out.

use async_trait::async_trait;

use super::playback::Emission;
use crate::error::Result;
use crate::events::EventSink;

/// What the link asks of the capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    /// Device name (e.g. "default", "plughw:0,0")
    pub device: String,
    pub sample_rate: u32,
    pub channels: u32,
}

/// An acquired microphone stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHandle {
    pub id: u64,
    /// Rate actually negotiated with the hardware
    pub sample_rate: u32,
    pub channels: u32,
}

/// Parameters for the raw-audio processing unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorSpec {
    pub chunk_duration_ms: u32,
    pub sample_rate: u32,
}

#[async_trait]
pub trait CaptureDevice: Send {
    async fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<StreamHandle>;
    fn release(&mut self, stream: StreamHandle);
}

/// Pushes raw mono sample buffers from an acquired stream into the mailbox
/// as `LinkEvent::Captured`.
#[async_trait]
pub trait SampleProcessor: Send {
    async fn load(&mut self, stream: &StreamHandle, spec: ProcessorSpec, sink: EventSink)
    -> Result<()>;
    fn unload(&mut self);
}

/// Plays emissions and reports each one finished exactly once via
/// `LinkEvent::EmissionFinished`.
pub trait OutputDevice: Send {
    fn open(&mut self, sink: EventSink) -> Result<()>;
    fn schedule(&mut self, emission: Emission) -> Result<()>;
    /// A barge moved the queue to `epoch`. Any emission cut in an earlier
    /// epoch, playing or still queued, is cut short. Its completion is
    /// still reported.
    fn interrupt(&mut self, epoch: u64);
    /// Releases the device. Returns once it is no longer held.
    fn close(&mut self);
}

/// Purely observational tap on the capture stream.
pub trait Visualizer: Send {
    fn attach(&mut self, source: &StreamHandle);
    fn detach(&mut self);
}
