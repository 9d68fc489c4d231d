//! audiod - audio playback server for a speech-dispatching daemon.
//!
//! Producers (speech output modules) connect to a local unix socket and
//! stream framed PCM tracks; the server plays them one at a time through a
//! pluggable hardware backend, with runtime volume control and immediate
//! cross-thread interruption.

pub mod audio;
pub mod config;
pub mod protocol;
pub mod server;
