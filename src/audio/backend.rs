//! Pluggable audio output backends.
//!
//! Backends are statically known and selected by name at startup; the
//! capability surface matches what a hardware output needs to expose:
//! open, play, stop, close, volume and log-level control.

use anyhow::{Result, bail};

use super::alsa::AlsaBackend;
use super::null::NullBackend;
use super::track::Track;
use crate::config::Config;

/// One concrete audio output technology.
///
/// `play` blocks until the track finished or was interrupted. `stop` may be
/// called from a different thread while `play` is blocked and must make it
/// return promptly, without audible artifacts; that cross-thread contract is
/// the backend's to honor, the caller adds no locking around hardware calls.
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Play one track, blocking the calling thread until done.
    fn play(&self, track: &Track) -> Result<()>;

    /// Interrupt an in-progress `play`. No-op when idle.
    fn stop(&self) -> Result<()>;

    /// Release backend resources. No `play`/`stop` may follow.
    fn close(&self) -> Result<()>;

    /// Per-stream volume in [-100, 100]; 0 is the recorded loudness.
    fn set_volume(&self, volume: i32) -> Result<()>;

    fn set_log_level(&self, _level: u32) {}

    /// External player command, for backends that shell out. None here.
    fn play_command(&self) -> Option<&str> {
        None
    }
}

/// Opaque per-backend parameters, one slot per known backend, taken from
/// the configuration in the same order the C-era plugins received them.
#[derive(Debug, Clone, Default)]
pub struct BackendParams {
    pub alsa_device: Option<String>,
    pub oss_device: Option<String>,
    pub pulse_server: Option<String>,
    pub pulse_min_length: Option<u32>,
}

impl From<&Config> for BackendParams {
    fn from(config: &Config) -> Self {
        Self {
            alsa_device: config.alsa_device.clone(),
            oss_device: config.oss_device.clone(),
            pulse_server: config.pulse_server.clone(),
            pulse_min_length: config.pulse_min_length,
        }
    }
}

/// Resolve a backend name and open it.
///
/// Every failure mode gets its own message so the fallback log reads well.
pub fn open_backend(name: &str, params: &BackendParams) -> Result<Box<dyn AudioBackend>> {
    match name {
        "alsa" => {
            let backend = AlsaBackend::open(params.alsa_device.as_deref())?;
            Ok(Box::new(backend))
        }
        "null" => Ok(Box::new(NullBackend::new())),
        other => bail!("unknown audio backend \"{}\"", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_backend_name_is_an_error() {
        let err = open_backend("nas", &BackendParams::default())
            .err()
            .expect("nas must not resolve");
        assert!(err.to_string().contains("nas"));
    }

    #[test]
    fn null_backend_resolves() {
        let backend = open_backend("null", &BackendParams::default()).unwrap();
        assert_eq!(backend.name(), "null");
        assert_eq!(backend.play_command(), None);
    }
}
