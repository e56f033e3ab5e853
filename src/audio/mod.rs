//! audio - sample codec, capture chunking, playback scheduling and the
//! device capabilities the link drives.

pub mod capture;
pub mod chunk;
pub mod codec;
pub mod device;
pub mod playback;

#[cfg(feature = "alsa")]
mod alsa_device;
#[cfg(feature = "alsa")]
pub mod alsa_backend;

pub use capture::{CapturePipeline, CapturedChunk};
pub use chunk::AudioChunk;
pub use playback::{Emission, EmissionKind, PlaybackQueue};
