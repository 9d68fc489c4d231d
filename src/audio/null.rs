//! Backend that accepts every track and discards it.
//!
//! Useful as the last entry of the fallback list on machines without sound
//! hardware, and as a deterministic device in tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;

use super::backend::AudioBackend;
use super::track::Track;

#[derive(Debug, Default)]
pub struct NullBackend {
    discarded: AtomicUsize,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracks accepted so far.
    pub fn discarded(&self) -> usize {
        self.discarded.load(Ordering::Relaxed)
    }
}

impl AudioBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn play(&self, track: &Track) -> Result<()> {
        let n = self.discarded.fetch_add(1, Ordering::Relaxed) + 1;
        log::debug!(
            "null backend discarding track #{}: {} samples at {} Hz",
            n,
            track.samples.len(),
            track.rate
        );
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn set_volume(&self, _volume: i32) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ByteOrder;

    #[test]
    fn counts_every_discarded_track() {
        let backend = NullBackend::new();
        let track = Track {
            order: ByteOrder::native(),
            bits: 16,
            channels: 1,
            rate: 8000,
            samples: vec![0; 16],
        };
        assert_eq!(backend.discarded(), 0);
        backend.play(&track).unwrap();
        backend.play(&track).unwrap();
        assert_eq!(backend.discarded(), 2);
        backend.stop().unwrap();
        backend.close().unwrap();
    }
}
