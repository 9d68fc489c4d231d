//! The server's sole open connection to the active audio backend.
//!
//! Candidates from the configured method list are tried in order; the first
//! that opens wins for the lifetime of the process. When none opens the
//! handle degrades to an inoperative state: the server keeps accepting and
//! draining producer traffic, `play` just returns errors.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use anyhow::{Result, bail};

use super::backend::{AudioBackend, BackendParams, open_backend};
use super::track::{ByteOrder, Track, swap_sample_bytes};

pub struct DeviceHandle {
    backend: Option<Arc<dyn AudioBackend>>,
    native_order: ByteOrder,
    volume: AtomicI32,
    closed: AtomicBool,
}

impl DeviceHandle {
    /// Try each comma-separated backend name in order; first success wins.
    ///
    /// Failures are logged, never fatal. `log_level` is forwarded to the
    /// opened backend and `default_volume` is applied immediately, matching
    /// how the daemon has always initialized its audio output.
    pub fn open(
        methods: &str,
        params: &BackendParams,
        log_level: u32,
        default_volume: i32,
    ) -> Self {
        for name in methods.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            match open_backend(name, params) {
                Ok(backend) => {
                    backend.set_log_level(log_level);
                    let handle = Self::with_backend(Arc::from(backend));
                    if let Err(e) = handle.set_volume(default_volume) {
                        log::warn!("Can't set initial volume: {:#}", e);
                    }
                    log::info!("Using {} audio output method", name);
                    return handle;
                }
                Err(e) => {
                    log::warn!("Opening audio backend {} failed: {:#}", name, e);
                }
            }
        }
        log::error!(
            "Opening sound device failed for all of \"{}\"; running without audio output",
            methods
        );
        Self::inoperative()
    }

    /// Wrap an already-open backend. Used by `open` and by tests.
    pub fn with_backend(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend: Some(backend),
            native_order: ByteOrder::native(),
            volume: AtomicI32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// A handle with no backend: `play` errors, everything else no-ops.
    pub fn inoperative() -> Self {
        Self {
            backend: None,
            native_order: ByteOrder::native(),
            volume: AtomicI32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.as_deref().map(|b| b.name())
    }

    /// Play one track, blocking until it finished or was stopped.
    ///
    /// Converts byte order first when the track was produced in the other
    /// endianness. A failure leaves the handle usable for the next track.
    pub fn play(&self, mut track: Track) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("audio device is closed");
        }
        let Some(backend) = &self.backend else {
            bail!("no audio backend available");
        };
        if track.order != self.native_order {
            swap_sample_bytes(&mut track.samples);
            track.order = self.native_order;
        }
        backend.play(&track)
    }

    /// Interrupt the in-progress `play`, if any. Safe from any thread.
    pub fn stop(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        match &self.backend {
            Some(backend) => backend.stop(),
            None => Ok(()),
        }
    }

    /// Set the volume for subsequent tracks. Rejects values outside
    /// [-100, 100] without touching the current setting.
    pub fn set_volume(&self, volume: i32) -> Result<()> {
        if !(-100..=100).contains(&volume) {
            bail!("Requested volume {} out of range <-100:100>", volume);
        }
        self.volume.store(volume, Ordering::Relaxed);
        match &self.backend {
            Some(backend) => backend.set_volume(volume),
            None => Ok(()),
        }
    }

    pub fn volume(&self) -> i32 {
        self.volume.load(Ordering::Relaxed)
    }

    /// Release the backend. Idempotent; after the first call the handle is
    /// invalid for playback.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match &self.backend {
            Some(backend) => backend.close(),
            None => Ok(()),
        }
    }

    pub fn play_command(&self) -> Option<String> {
        self.backend
            .as_deref()
            .and_then(|b| b.play_command().map(str::to_owned))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use super::*;

    /// Backend that records every call for assertions.
    #[derive(Default)]
    struct RecordingBackend {
        played: Mutex<Vec<Track>>,
        volumes: Mutex<Vec<i32>>,
        closes: AtomicUsize,
    }

    impl AudioBackend for RecordingBackend {
        fn name(&self) -> &'static str {
            "recording"
        }
        fn play(&self, track: &Track) -> Result<()> {
            self.played.lock().unwrap().push(track.clone());
            Ok(())
        }
        fn stop(&self) -> Result<()> {
            Ok(())
        }
        fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn set_volume(&self, volume: i32) -> Result<()> {
            self.volumes.lock().unwrap().push(volume);
            Ok(())
        }
    }

    fn track_with(order: ByteOrder, samples: Vec<i16>) -> Track {
        Track {
            order,
            bits: 16,
            channels: 1,
            rate: 22050,
            samples,
        }
    }

    #[test]
    fn fallback_skips_failing_candidates() {
        let params = BackendParams::default();
        let handle = DeviceHandle::open("oss, nas ,null", &params, 0, 85);
        assert_eq!(handle.backend_name(), Some("null"));
        assert_eq!(handle.volume(), 85);
    }

    #[test]
    fn all_candidates_failing_degrades_to_inoperative() {
        let params = BackendParams::default();
        let handle = DeviceHandle::open("oss,nas", &params, 0, 85);
        assert_eq!(handle.backend_name(), None);
        assert!(handle.play(track_with(ByteOrder::native(), vec![1])).is_err());
        assert!(handle.stop().is_ok());
        assert!(handle.close().is_ok());
    }

    #[test]
    fn volume_bounds_are_enforced() {
        let backend = Arc::new(RecordingBackend::default());
        let handle = DeviceHandle::with_backend(backend.clone());
        handle.set_volume(50).unwrap();
        assert!(handle.set_volume(101).is_err());
        assert!(handle.set_volume(-101).is_err());
        // The rejected values never reached the handle or the backend.
        assert_eq!(handle.volume(), 50);
        assert_eq!(*backend.volumes.lock().unwrap(), vec![50]);
    }

    #[test]
    fn play_swaps_only_foreign_byte_order() {
        let backend = Arc::new(RecordingBackend::default());
        let handle = DeviceHandle::with_backend(backend.clone());

        handle
            .play(track_with(ByteOrder::native(), vec![0x1234]))
            .unwrap();
        let foreign = match ByteOrder::native() {
            ByteOrder::Little => ByteOrder::Big,
            ByteOrder::Big => ByteOrder::Little,
        };
        handle.play(track_with(foreign, vec![0x1234])).unwrap();

        let played = backend.played.lock().unwrap();
        assert_eq!(played[0].samples, vec![0x1234]);
        assert_eq!(played[1].samples, vec![0x3412]);
    }

    #[test]
    fn close_is_idempotent_and_invalidates_play() {
        let backend = Arc::new(RecordingBackend::default());
        let handle = DeviceHandle::with_backend(backend.clone());
        handle.close().unwrap();
        handle.close().unwrap();
        assert_eq!(backend.closes.load(Ordering::SeqCst), 1);
        assert!(handle.play(track_with(ByteOrder::native(), vec![1])).is_err());
    }
}
