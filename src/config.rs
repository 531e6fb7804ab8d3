use std::path::{Path, PathBuf};
use std::time::Duration;

use ffmpeg_proc::ArgTemplate;
use serde::Deserialize;

use crate::media::types::CameraId;

pub const MANIFEST_NAME: &str = "manifest.mpd";
pub const CONVERTED_EXTENSION: &str = "mp4";

const CONFIG_ENV: &str = "MULTIFLOW_CONFIG";
const BIND_ENV: &str = "MULTIFLOW_BIND";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// One directory per camera holding the live manifest and segments.
    pub live_root: PathBuf,
    /// One directory per camera holding the full recording.
    pub record_root: PathBuf,
    /// Flat directory of flattened recordings, `<camera id>.mp4`.
    pub converted_root: PathBuf,
    /// Drive a second codec process per camera that keeps every segment.
    pub record: bool,
    /// Keep the live directory after the pipeline has closed.
    pub retain_live_artifacts: bool,
    /// `None` keeps the intake queue unbounded. With a bound, producers wait
    /// for space instead of dropping chunks.
    pub queue_capacity: Option<usize>,
    pub max_chunk_bytes: usize,
    pub teardown_grace_ms: u64,
    pub idle_poll_ms: u64,
    pub telemetry_interval_ms: u64,
    pub codec: CodecConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub program: String,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    // ffmpeg syntax, e.g. "1M", "800k"
    pub bitrate: String,
    pub live_args: ArgTemplate,
    pub record_args: ArgTemplate,
    pub convert_args: ArgTemplate,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            width: 640,
            height: 480,
            framerate: 30,
            bitrate: "1M".to_string(),
            live_args: ArgTemplate::dash_live(),
            record_args: ArgTemplate::dash_record(),
            convert_args: ArgTemplate::mp4_convert(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            live_root: PathBuf::from("data/live"),
            record_root: PathBuf::from("data/recordings"),
            converted_root: PathBuf::from("data/converted"),
            record: true,
            retain_live_artifacts: true,
            queue_capacity: None,
            max_chunk_bytes: 8 * 1024 * 1024,
            teardown_grace_ms: 5_000,
            idle_poll_ms: 1_000,
            telemetry_interval_ms: 1_000,
            codec: CodecConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Reads the TOML file named by `MULTIFLOW_CONFIG` when set, then applies
    /// the `MULTIFLOW_BIND` override.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => {
                let text = std::fs::read_to_string(&path).map_err(|e| {
                    anyhow::anyhow!("read config {}: {}", Path::new(&path).display(), e)
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        if let Ok(bind) = std::env::var(BIND_ENV) {
            config.bind = bind;
        }
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).map_err(|e| anyhow::anyhow!("invalid config: {}", e))
    }

    /// Places all three artifact roots under `dir`.
    pub fn with_data_dir(mut self, dir: &Path) -> Self {
        self.live_root = dir.join("live");
        self.record_root = dir.join("recordings");
        self.converted_root = dir.join("converted");
        self
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms.max(1))
    }

    pub fn live_dir(&self, id: &CameraId) -> PathBuf {
        self.live_root.join(id.as_str())
    }

    pub fn record_dir(&self, id: &CameraId) -> PathBuf {
        self.record_root.join(id.as_str())
    }

    pub fn recorded_manifest(&self, id: &CameraId) -> PathBuf {
        self.record_dir(id).join(MANIFEST_NAME)
    }

    pub fn converted_file(&self, id: &CameraId) -> PathBuf {
        self.converted_root
            .join(format!("{}.{}", id.as_str(), CONVERTED_EXTENSION))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind, "0.0.0.0:5000");
        assert!(config.record);
        assert!(config.queue_capacity.is_none());
        assert_eq!(config.codec.program, "ffmpeg");
        assert_eq!(config.teardown_grace(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() -> anyhow::Result<()> {
        let config = ServerConfig::from_toml_str(
            r#"
            bind = "127.0.0.1:9000"
            queue_capacity = 64

            [codec]
            program = "/usr/local/bin/ffmpeg"
            width = 1280
            convert_args = ["-i", "{input}", "{output}"]
            "#,
        )?;

        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(config.queue_capacity, Some(64));
        assert_eq!(config.codec.program, "/usr/local/bin/ffmpeg");
        assert_eq!(config.codec.width, 1280);
        assert_eq!(config.codec.height, 480);
        assert_eq!(config.codec.convert_args.args(), ["-i", "{input}", "{output}"]);
        assert_eq!(config.codec.live_args, ArgTemplate::dash_live());
        Ok(())
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        assert!(ServerConfig::from_toml_str("queue_capacity = \"lots\"").is_err());
    }

    #[test]
    fn test_artifact_paths() -> anyhow::Result<()> {
        let config = ServerConfig::default().with_data_dir(Path::new("/srv/flow"));
        let id = CameraId::parse("cam-1")?;

        assert_eq!(config.live_dir(&id), PathBuf::from("/srv/flow/live/cam-1"));
        assert_eq!(
            config.recorded_manifest(&id),
            PathBuf::from("/srv/flow/recordings/cam-1/manifest.mpd")
        );
        assert_eq!(
            config.converted_file(&id),
            PathBuf::from("/srv/flow/converted/cam-1.mp4")
        );
        Ok(())
    }
}
