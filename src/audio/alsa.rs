//! ALSA playback backend.
//!
//! Each track opens and configures the PCM for that track's rate and channel
//! count, writes interleaved i16 data one period at a time, and checks the
//! stop flag between periods so a cross-thread `stop` interrupts playback
//! within one period's worth of audio.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result, bail};

use super::backend::AudioBackend;
use super::track::Track;

pub struct AlsaBackend {
    device: String,
    volume: AtomicI32,
    stop_requested: AtomicBool,
}

impl AlsaBackend {
    /// Open the backend, probing the device once so a misconfigured device
    /// name fails at startup rather than on the first track.
    pub fn open(device: Option<&str>) -> Result<Self> {
        let device = device.unwrap_or("default").to_string();
        PCM::new(&device, Direction::Playback, false)
            .with_context(|| format!("Failed to open ALSA PCM device '{}'", device))?;
        log::info!("ALSA playback backend opened on device '{}'", device);
        Ok(Self {
            device,
            volume: AtomicI32::new(0),
            stop_requested: AtomicBool::new(false),
        })
    }

    fn open_pcm(&self, track: &Track) -> Result<(PCM, usize)> {
        let pcm = PCM::new(&self.device, Direction::Playback, false)
            .with_context(|| format!("Failed to open PCM device '{}' for playback", self.device))?;

        // Configure hardware parameters for this track's format. Samples are
        // already in native byte order when they reach the backend.
        {
            let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
            hwp.set_access(Access::RWInterleaved)?;
            hwp.set_format(Format::s16())?;
            hwp.set_channels(track.channels)?;
            hwp.set_rate_near(track.rate, ValueOr::Nearest)?;
            pcm.hw_params(&hwp)?;
        }

        let period_size = pcm.hw_params_current()?.get_period_size()? as usize;
        Ok((pcm, period_size))
    }

    /// Linear gain for the stored volume: -100 silences, 0 passes through.
    fn gain(&self) -> f32 {
        (self.volume.load(Ordering::Relaxed) + 100) as f32 / 100.0
    }
}

impl AudioBackend for AlsaBackend {
    fn name(&self) -> &'static str {
        "alsa"
    }

    fn play(&self, track: &Track) -> Result<()> {
        if track.bits != 16 {
            bail!("ALSA backend only plays 16-bit tracks, got {} bits", track.bits);
        }
        if track.channels == 0 {
            bail!("track declares zero channels");
        }
        self.stop_requested.store(false, Ordering::SeqCst);

        let (pcm, period_size) = self.open_pcm(track)?;
        let io = pcm.io_i16()?;

        let gain = self.gain();
        let data: Vec<i16> = if (gain - 1.0).abs() < f32::EPSILON {
            track.samples.clone()
        } else {
            track
                .samples
                .iter()
                .map(|s| (*s as f32 * gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
                .collect()
        };

        let channels = track.channels as usize;
        let total_frames = data.len() / channels;
        let mut frames_written = 0;
        let mut retry_count = 0u32;

        // Write one period per iteration so the stop flag is honored with
        // bounded latency, with prepare() recovery on XRUN.
        while frames_written < total_frames {
            if self.stop_requested.load(Ordering::SeqCst) {
                log::debug!("ALSA playback interrupted at frame {}", frames_written);
                let _ = pcm.drop();
                return Ok(());
            }
            let end = (frames_written + period_size).min(total_frames);
            match io.writei(&data[frames_written * channels..end * channels]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    pcm.prepare()
                        .with_context(|| "Failed to recover PCM playback")?;
                    if retry_count >= 3 {
                        bail!(
                            "giving up after {} recovery attempts, {} frames unwritten",
                            retry_count,
                            total_frames - frames_written
                        );
                    }
                }
            }
        }

        // Let the buffered tail play out unless a stop arrived meanwhile.
        if self.stop_requested.load(Ordering::SeqCst) {
            let _ = pcm.drop();
        } else if let Err(e) = pcm.drain() {
            log::warn!("ALSA drain failed: {}", e);
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.stop_requested.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.stop_requested.store(true, Ordering::SeqCst);
        log::info!("ALSA playback backend closed");
        Ok(())
    }

    fn set_volume(&self, volume: i32) -> Result<()> {
        self.volume.store(volume, Ordering::Relaxed);
        Ok(())
    }
}
