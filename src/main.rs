use std::path::Path;

use audiod::audio::{BackendParams, DeviceHandle};
use audiod::config::Config;
use audiod::server::AudioServer;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置，未指定配置文件时使用默认值
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(Path::new(&path))?,
        None => {
            log::info!("No config file given, using defaults");
            Config::default()
        }
    };

    // Bind before anything else; a stale socket file that can't be removed
    // or a failing bind terminates the process here.
    let server = AudioServer::bind(&config)?;

    // Open the audio output, trying configured backends in order. A machine
    // with no working backend still serves (and discards) producer traffic.
    let device = DeviceHandle::open(
        &config.output_method,
        &BackendParams::from(&config),
        config.log_level,
        config.default_volume,
    );

    let mut handle = server.spawn(device)?;
    log::info!("audiod started");

    signal::ctrl_c().await?;
    log::info!("Received Ctrl+C, shutting down...");
    handle.shutdown();

    Ok(())
}
