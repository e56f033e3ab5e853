use tokio::signal;
use tokio::sync::mpsc;

use voxlink::audio::alsa_backend::{AlsaCapture, AlsaOutput};
use voxlink::net_link::WsConnector;
use voxlink::{Config, Devices, Notification, RunOutcome, VoiceLink};

fn alsa_devices(config: &Config) -> Devices {
    let capture = AlsaCapture::new();
    let processor = capture.processor();
    Devices {
        connector: Box::new(WsConnector::new()),
        capture: Box::new(capture),
        processor: Box::new(processor),
        output: Box::new(AlsaOutput::new(
            config.playback_device.clone(),
            config.playback_sample_rate,
            config.playback_channels,
        )),
        visualizer: None,
    }
}

fn report(notification: Notification) {
    match notification {
        Notification::Connected => log::info!("Connected"),
        Notification::Closed(cause) => log::info!("Connection closed by {:?}", cause),
        Notification::Error(e) => log::error!("Link error: {}", e),
        Notification::ReloadRequired => log::warn!("Server expired the link"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置，命令行第一个参数可覆盖服务器地址
    let mut config = Config::new().unwrap_or_default();
    if let Some(url) = std::env::args().nth(1) {
        config.ws_url = url;
    }
    log::info!("voxlink starting, server: {}", config.ws_url);

    loop {
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
        let link = VoiceLink::new(config.clone(), alsa_devices(&config), notify_tx);
        let handle = link.handle();
        handle.connect();

        let mut run = tokio::spawn(link.run());
        let outcome = loop {
            tokio::select! {
                res = &mut run => break res?,
                Some(notification) = notify_rx.recv() => report(notification),
                _ = signal::ctrl_c() => {
                    log::info!("Ctrl-C received, shutting down");
                    handle.shutdown();
                }
            }
        };

        match outcome {
            RunOutcome::Stopped => break,
            RunOutcome::Reload => log::warn!("Rebuilding link from scratch"),
        }
    }

    log::info!("voxlink stopped");
    Ok(())
}
