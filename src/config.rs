//! Runtime configuration, loaded from a TOML file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the audio socket; the socket lives at
    /// `<runtime_dir>/audio.sock`.
    pub runtime_dir: PathBuf,

    /// Comma-separated, ordered list of backend names to try (e.g.
    /// "alsa,null"). The first that opens is used until restart.
    pub output_method: String,

    // 各后端的参数，每个后端一个
    pub alsa_device: Option<String>,
    pub oss_device: Option<String>,
    pub pulse_server: Option<String>,
    pub pulse_min_length: Option<u32>,

    /// Volume applied right after the backend opens. Playback volume is
    /// otherwise controlled by the synthesizer side.
    pub default_volume: i32,

    /// Log level handed to the backend.
    pub log_level: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime_dir: PathBuf::from("/run/audiod"),
            output_method: "alsa".to_string(),
            alsa_device: None,
            oss_device: None,
            pulse_server: None,
            pulse_min_length: None,
            default_volume: 85,
            log_level: 3,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn socket_path(&self) -> PathBuf {
        self.runtime_dir.join("audio.sock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_toml_over_defaults() {
        let config: Config = toml::from_str(
            r#"
            runtime_dir = "/tmp/audiod-test"
            output_method = "null"
            alsa_device = "plughw:1,0"
            "#,
        )
        .unwrap();
        assert_eq!(config.output_method, "null");
        assert_eq!(config.alsa_device.as_deref(), Some("plughw:1,0"));
        assert_eq!(config.default_volume, 85);
        assert_eq!(
            config.socket_path(),
            PathBuf::from("/tmp/audiod-test/audio.sock")
        );
    }
}
