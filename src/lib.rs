//! voxlink - a full-duplex voice link over WebSocket.
//!
//! Microphone audio is chunked, mu-law encoded and streamed to the server;
//! PCM16 audio coming back is buffered and played out, with barge-in and
//! graceful stop handled by [`controller::VoiceLink`].

pub mod audio;
pub mod config;
pub mod connection;
pub mod controller;
pub mod error;
pub mod events;
pub mod net_link;
pub mod protocol;
pub mod status;

pub use config::Config;
pub use controller::{Devices, LinkHandle, RunOutcome, VoiceLink};
pub use error::{LinkError, Result};
pub use events::{CloseCause, Notification};
pub use status::LinkStatus;
