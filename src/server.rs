//! The audio socket server and its playback thread.
//!
//! One dedicated OS thread owns the device handle and multiplexes the
//! listening socket plus every producer connection (std thread for the
//! real-time side, a current-thread tokio runtime for socket readiness).
//! Completed tracks are played synchronously on that same thread, so at most
//! one track is ever in flight; producers sending while audio plays simply
//! back up in their OS socket buffers. That single-flight behavior is the
//! design, not an accident.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::BytesMut;
use futures_util::future::select_all;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

use crate::audio::DeviceHandle;
use crate::config::Config;
use crate::protocol::Codec;

/// How often the loop wakes to re-check the shutdown flag when idle. The
/// control channel normally wins; this is the backstop bound on shutdown
/// latency.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

enum ControlMessage {
    Shutdown,
}

/// One producer connection: stream, receive buffer, codec state, and a
/// diagnostic id used in log messages.
struct Connection {
    id: u64,
    stream: UnixStream,
    buf: BytesMut,
    codec: Codec,
}

/// The bound-but-not-yet-serving audio server.
///
/// Binding happens on the caller's thread so fatal startup errors (stale
/// socket file that can't be removed, bind failure) surface before the
/// playback thread exists.
pub struct AudioServer {
    listener: std::os::unix::net::UnixListener,
    socket_path: PathBuf,
}

impl AudioServer {
    pub fn bind(config: &Config) -> Result<Self> {
        let socket_path = config.socket_path();
        log::info!("Creating audio socket at {}", socket_path.display());

        std::fs::create_dir_all(&config.runtime_dir).with_context(|| {
            format!("Failed to create runtime directory {}", config.runtime_dir.display())
        })?;
        if socket_path.exists() {
            std::fs::remove_file(&socket_path).with_context(|| {
                format!(
                    "Socket file {} exists but is impossible to delete. Wrong permissions?",
                    socket_path.display()
                )
            })?;
        }

        let listener = std::os::unix::net::UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind audio socket {}", socket_path.display()))?;
        listener
            .set_nonblocking(true)
            .context("Failed to set audio socket non-blocking")?;

        Ok(Self {
            listener,
            socket_path,
        })
    }

    pub fn socket_path(&self) -> &std::path::Path {
        &self.socket_path
    }

    /// Start the playback thread and hand back the control surface.
    pub fn spawn(self, device: DeviceHandle) -> Result<ServerHandle> {
        let device = Arc::new(device);
        let shutdown = Arc::new(AtomicBool::new(false));
        let (ctrl_tx, ctrl_rx) = mpsc::channel::<ControlMessage>(4);

        let thread_device = device.clone();
        let thread_shutdown = shutdown.clone();
        let listener = self.listener;
        let join = thread::Builder::new()
            .name("audio-play".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        log::error!("Failed to build playback runtime: {}", e);
                        return;
                    }
                };
                runtime.block_on(playback_thread(
                    listener,
                    thread_device,
                    thread_shutdown,
                    ctrl_rx,
                ));
            })
            .context("Failed to spawn playback thread")?;

        Ok(ServerHandle {
            device,
            shutdown,
            ctrl_tx,
            join: Some(join),
        })
    }
}

/// Thread-safe control surface for the running server.
///
/// `stop` and `set_volume` act on the device directly and may be called
/// while a track is playing; the backend contract makes that safe.
pub struct ServerHandle {
    device: Arc<DeviceHandle>,
    shutdown: Arc<AtomicBool>,
    ctrl_tx: mpsc::Sender<ControlMessage>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Interrupt the currently playing track, if any.
    pub fn stop(&self) -> Result<()> {
        self.device.stop()
    }

    /// Set playback volume for subsequent tracks, range [-100, 100].
    pub fn set_volume(&self, volume: i32) -> Result<()> {
        self.device.set_volume(volume)
    }

    pub fn volume(&self) -> i32 {
        self.device.volume()
    }

    /// Request termination and wait for the playback thread to finish.
    /// The thread closes the listener, every connection, and the device,
    /// in that order.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.ctrl_tx.try_send(ControlMessage::Shutdown);
        // A blocked play would stall the loop past the poll bound.
        let _ = self.device.stop();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// What the multiplexer woke up for.
enum Activity {
    Accept(std::io::Result<UnixStream>),
    Readable(usize, std::io::Result<()>),
    Control(Option<ControlMessage>),
    Tick,
}

async fn playback_thread(
    listener: std::os::unix::net::UnixListener,
    device: Arc<DeviceHandle>,
    shutdown: Arc<AtomicBool>,
    mut ctrl_rx: mpsc::Receiver<ControlMessage>,
) {
    log::info!("Playback thread starting");

    let listener = match UnixListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("Failed to register audio socket with the runtime: {}", e);
            if let Err(e) = device.close() {
                log::error!("Closing audio device failed: {:#}", e);
            }
            return;
        }
    };

    let mut connections: Vec<Connection> = Vec::new();
    let mut next_id: u64 = 0;

    while !shutdown.load(Ordering::SeqCst) {
        let activity = tokio::select! {
            result = listener.accept() => Activity::Accept(result.map(|(stream, _)| stream)),
            (index, result) = next_readable(&connections) => Activity::Readable(index, result),
            message = ctrl_rx.recv() => Activity::Control(message),
            _ = tokio::time::sleep(POLL_INTERVAL) => Activity::Tick,
        };

        match activity {
            Activity::Accept(Ok(stream)) => {
                let id = next_id;
                next_id += 1;
                log::info!("Adding audio connection {}", id);
                connections.push(Connection {
                    id,
                    stream,
                    buf: BytesMut::with_capacity(8192),
                    codec: Codec::new(),
                });
            }
            Activity::Accept(Err(e)) => {
                log::warn!("Can't handle connection request of a module for audio: {}", e);
            }
            Activity::Readable(index, Ok(())) => {
                match service_connection(&mut connections[index], &device) {
                    Ok(true) => {}
                    Ok(false) => {
                        let conn = connections.swap_remove(index);
                        log::info!("Audio connection {} has gone", conn.id);
                    }
                    Err(e) => {
                        let conn = connections.swap_remove(index);
                        log::warn!("Failed to serve audio connection {}: {:#}", conn.id, e);
                    }
                }
            }
            Activity::Readable(index, Err(e)) => {
                let conn = connections.swap_remove(index);
                log::warn!("Audio connection {} readiness error: {}", conn.id, e);
            }
            Activity::Control(Some(ControlMessage::Shutdown)) | Activity::Control(None) => {
                // Loop condition re-checks the flag.
            }
            Activity::Tick => {}
        }
    }

    log::info!("Playback thread stopping");

    // Shutdown order matters: stop accepting, drop every connection, then
    // close the device so no registration outlives it.
    drop(listener);
    for conn in connections.drain(..) {
        log::info!("Closing audio connection {}", conn.id);
    }
    if let Err(e) = device.close() {
        log::error!("Closing audio device failed: {:#}", e);
    }

    log::info!("Playback thread ended");
}

/// Resolve to the index of the next readable connection. Pends forever when
/// there are none, leaving the other select arms in charge.
async fn next_readable(connections: &[Connection]) -> (usize, std::io::Result<()>) {
    if connections.is_empty() {
        futures_util::future::pending::<()>().await;
        unreachable!();
    }
    let readiness = connections
        .iter()
        .enumerate()
        .map(|(index, conn)| Box::pin(async move { (index, conn.stream.readable().await) }));
    let ((index, result), _, _) = select_all(readiness).await;
    (index, result)
}

/// Drain available bytes from one connection and play every completed track.
///
/// Returns `Ok(true)` while the connection stays open, `Ok(false)` on EOF,
/// and an error on protocol violations (the caller tears the connection
/// down; nothing else is affected).
fn service_connection(conn: &mut Connection, device: &DeviceHandle) -> Result<bool> {
    loop {
        match conn.stream.try_read_buf(&mut conn.buf) {
            Ok(0) => return Ok(false),
            Ok(n) => {
                log::trace!("Read {} bytes from audio connection {}", n, conn.id);
                while let Some(track) = conn.codec.advance(&mut conn.buf)? {
                    log::debug!(
                        "Playing track from connection {}: {} samples at {} Hz",
                        conn.id,
                        track.samples.len(),
                        track.rate
                    );
                    // Blocks this thread until done or stopped; playback
                    // failures are logged, the connection stays up.
                    if let Err(e) = device.play(track) {
                        log::error!("Unable to play audio from connection {}: {:#}", conn.id, e);
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(true),
            Err(e) => return Err(e).context("socket read failed"),
        }
    }
}
