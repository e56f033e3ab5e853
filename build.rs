use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize)]
struct Config {
    network: Network,
    capture: Capture,
    playback: Playback,
    protocol: Protocol,
}

#[derive(Deserialize)]
struct Network {
    ws_url: String,
    expired_link_reason: String,
}

#[derive(Deserialize)]
struct Capture {
    device: String,
    sample_rate: u32,
    channels: u32,
    chunk_duration_ms: u32,
}

#[derive(Deserialize)]
struct Playback {
    device: String,
    sample_rate: u32,
    channels: u32,
    buffer_ms: u32,
}

#[derive(Deserialize)]
struct Protocol {
    inbound_default_sample_rate: u32,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 网络配置
    println!("cargo:rustc-env=VOXLINK_WS_URL={}", config.network.ws_url);
    println!(
        "cargo:rustc-env=VOXLINK_EXPIRED_LINK_REASON={}",
        config.network.expired_link_reason
    );

    // 录音配置
    println!("cargo:rustc-env=VOXLINK_CAPTURE_DEVICE={}", config.capture.device);
    println!("cargo:rustc-env=VOXLINK_CAPTURE_SAMPLE_RATE={}", config.capture.sample_rate);
    println!("cargo:rustc-env=VOXLINK_CAPTURE_CHANNELS={}", config.capture.channels);
    println!(
        "cargo:rustc-env=VOXLINK_CHUNK_DURATION_MS={}",
        config.capture.chunk_duration_ms
    );

    // 播放配置
    println!("cargo:rustc-env=VOXLINK_PLAYBACK_DEVICE={}", config.playback.device);
    println!("cargo:rustc-env=VOXLINK_PLAYBACK_SAMPLE_RATE={}", config.playback.sample_rate);
    println!("cargo:rustc-env=VOXLINK_PLAYBACK_CHANNELS={}", config.playback.channels);
    println!("cargo:rustc-env=VOXLINK_PLAYBACK_BUFFER_MS={}", config.playback.buffer_ms);

    // 协议配置
    println!(
        "cargo:rustc-env=VOXLINK_INBOUND_DEFAULT_SAMPLE_RATE={}",
        config.protocol.inbound_default_sample_rate
    );
}
