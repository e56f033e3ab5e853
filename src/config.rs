use serde::{Deserialize, Serialize};

use crate::audio::capture::{CAPTURE_SAMPLE_RATE, CHUNK_DURATION_MS};
use crate::audio::playback::{PLAYBACK_BUFFER_MS, PLAYBACK_SAMPLE_RATE};

/// Sample rate assumed for inbound media frames that do not declare one.
pub const INBOUND_DEFAULT_SAMPLE_RATE: u32 = 44_100;
/// Close reason the server uses for an expired link.
pub const EXPIRED_LINK_REASON: &str = "link_expired";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    // 网络配置
    pub ws_url: String,
    pub expired_link_reason: String,

    // 录音配置
    pub capture_device: String,
    pub capture_sample_rate: u32,
    pub capture_channels: u32,
    pub chunk_duration_ms: u32,

    // 播放配置
    pub playback_device: String,
    pub playback_sample_rate: u32,
    pub playback_channels: u32,
    pub playback_buffer_ms: u32,

    pub inbound_default_sample_rate: u32,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            ws_url: env!("VOXLINK_WS_URL").to_string(),
            expired_link_reason: env!("VOXLINK_EXPIRED_LINK_REASON").to_string(),

            capture_device: env!("VOXLINK_CAPTURE_DEVICE").to_string(),
            capture_sample_rate: env!("VOXLINK_CAPTURE_SAMPLE_RATE")
                .parse()
                .map_err(|_| "Failed to parse VOXLINK_CAPTURE_SAMPLE_RATE")?,
            capture_channels: env!("VOXLINK_CAPTURE_CHANNELS")
                .parse()
                .map_err(|_| "Failed to parse VOXLINK_CAPTURE_CHANNELS")?,
            chunk_duration_ms: env!("VOXLINK_CHUNK_DURATION_MS")
                .parse()
                .map_err(|_| "Failed to parse VOXLINK_CHUNK_DURATION_MS")?,

            playback_device: env!("VOXLINK_PLAYBACK_DEVICE").to_string(),
            playback_sample_rate: env!("VOXLINK_PLAYBACK_SAMPLE_RATE")
                .parse()
                .map_err(|_| "Failed to parse VOXLINK_PLAYBACK_SAMPLE_RATE")?,
            playback_channels: env!("VOXLINK_PLAYBACK_CHANNELS")
                .parse()
                .map_err(|_| "Failed to parse VOXLINK_PLAYBACK_CHANNELS")?,
            playback_buffer_ms: env!("VOXLINK_PLAYBACK_BUFFER_MS")
                .parse()
                .map_err(|_| "Failed to parse VOXLINK_PLAYBACK_BUFFER_MS")?,

            inbound_default_sample_rate: env!("VOXLINK_INBOUND_DEFAULT_SAMPLE_RATE")
                .parse()
                .map_err(|_| "Failed to parse VOXLINK_INBOUND_DEFAULT_SAMPLE_RATE")?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8765/stream".to_string(),
            expired_link_reason: EXPIRED_LINK_REASON.to_string(),
            capture_device: "default".to_string(),
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            capture_channels: 1,
            chunk_duration_ms: CHUNK_DURATION_MS,
            playback_device: "default".to_string(),
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            playback_channels: 2,
            playback_buffer_ms: PLAYBACK_BUFFER_MS,
            inbound_default_sample_rate: INBOUND_DEFAULT_SAMPLE_RATE,
        }
    }
}
