//! Opening ALSA PCM handles with S16LE interleaved access.

use alsa::pcm::{Access, Format, Frames, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::Context;

/// What the hardware actually agreed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub sample_rate: u32,
    pub channels: u32,
    /// Frames per period.
    pub period_size: usize,
}

pub fn open_capture(device: &str, sample_rate: u32, channels: u32) -> anyhow::Result<(PCM, Negotiated)> {
    open_pcm(device, Direction::Capture, "capture", sample_rate, channels)
}

pub fn open_playback(device: &str, sample_rate: u32, channels: u32) -> anyhow::Result<(PCM, Negotiated)> {
    open_pcm(device, Direction::Playback, "playback", sample_rate, channels)
}

fn open_pcm(
    device: &str,
    direction: Direction,
    label: &str,
    sample_rate: u32,
    channels: u32,
) -> anyhow::Result<(PCM, Negotiated)> {
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("cannot open PCM '{}' for {}", device, label))?;

    {
        let hwp = HwParams::any(&pcm).context("HwParams::any")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        // ~20ms periods keep interrupt latency low
        hwp.set_period_size_near((sample_rate / 50) as Frames, ValueOr::Nearest)?;
        pcm.hw_params(&hwp)?;
    }

    let negotiated = {
        let hwp = pcm.hw_params_current()?;
        Negotiated {
            sample_rate: hwp.get_rate()?,
            channels: hwp.get_channels()?,
            period_size: hwp.get_period_size()? as usize,
        }
    };

    if negotiated.sample_rate != sample_rate || negotiated.channels != channels {
        log::warn!(
            "ALSA {} '{}': asked {}Hz/{}ch, got {}Hz/{}ch",
            label,
            device,
            sample_rate,
            channels,
            negotiated.sample_rate,
            negotiated.channels
        );
    } else {
        log::info!(
            "ALSA {} '{}': {}Hz/{}ch, period {}",
            label,
            device,
            negotiated.sample_rate,
            negotiated.channels,
            negotiated.period_size
        );
    }

    Ok((pcm, negotiated))
}
