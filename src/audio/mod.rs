//! audio - pluggable playback backends behind a single device handle.
//!
//! Replaces the dlopen-based plugin loading of the C implementation with a
//! static registry of [`AudioBackend`] implementations selected by name.

mod alsa;
mod backend;
mod device;
mod null;
mod track;

pub use backend::{AudioBackend, BackendParams, open_backend};
pub use device::DeviceHandle;
pub use null::NullBackend;
pub use track::{ByteOrder, Track, swap_sample_bytes};
