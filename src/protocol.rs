use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};

/// Frames sent to the server, one JSON text message each.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "event")]
pub enum OutboundFrame {
    #[serde(rename = "start")]
    Start,
    #[serde(rename = "media")]
    Media { media: MediaPayload },
    #[serde(rename = "TTS_PLAYING")]
    TtsPlaying { media: PlaybackState },
    #[serde(rename = "EOC")]
    EndOfConversation,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MediaPayload {
    /// base64 mu-law bytes
    pub payload: String,
    pub timestamp: u64,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct PlaybackState {
    pub tts_playing: bool,
}

impl OutboundFrame {
    pub fn media(payload: String, timestamp: u64) -> Self {
        OutboundFrame::Media {
            media: MediaPayload { payload, timestamp },
        }
    }

    pub fn playing(tts_playing: bool) -> Self {
        OutboundFrame::TtsPlaying {
            media: PlaybackState { tts_playing },
        }
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Frames received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// base64 PCM16 payload with the declared sample rate, if any
    Media {
        payload: String,
        sample_rate: Option<u32>,
    },
    Barge,
    EndOfConversation,
    Stop,
    /// Any other `event` value; ignored by the link.
    Unknown(String),
}

/// Declared inbound rates outside this range are rejected before any
/// resampling happens.
pub const INBOUND_SAMPLE_RATES: std::ops::RangeInclusive<u32> = 8_000..=192_000;

#[derive(Deserialize, Debug)]
struct ServerMessage {
    event: String,
    media: Option<ServerMedia>,
    sample_rate: Option<u32>,
}

#[derive(Deserialize, Debug)]
struct ServerMedia {
    payload: Option<String>,
}

/// Parses one inbound text message.
///
/// Unknown `event` values parse fine as [`InboundFrame::Unknown`]; only
/// invalid JSON or a media frame without a usable payload is an error.
pub fn parse_inbound(text: &str) -> Result<InboundFrame> {
    let msg: ServerMessage = serde_json::from_str(text)?;

    let frame = match msg.event.as_str() {
        "media" => {
            let payload = msg
                .media
                .and_then(|m| m.payload)
                .ok_or_else(|| LinkError::MalformedFrame("media frame without payload".into()))?;
            if let Some(rate) = msg.sample_rate {
                if !INBOUND_SAMPLE_RATES.contains(&rate) {
                    return Err(LinkError::MalformedFrame(format!(
                        "media frame with sample_rate {rate}"
                    )));
                }
            }
            InboundFrame::Media {
                payload,
                sample_rate: msg.sample_rate,
            }
        }
        "barge" | "BARGE" => InboundFrame::Barge,
        "EOC" => InboundFrame::EndOfConversation,
        "stop" => InboundFrame::Stop,
        other => InboundFrame::Unknown(other.to_string()),
    };
    Ok(frame)
}
