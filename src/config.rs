use anyhow::{anyhow, bail, ensure, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analysis::RemoteAnalysisConfig;
use crate::clip::ClipSettings;
use crate::forward::ForwarderConfig;
use crate::frame::{DEFAULT_FPS, DEFAULT_WINDOW_SECS};
use crate::ingest::CaptureConfig;

pub const CONFIG_FILE_ENV: &str = "CAMERA_AGENT_CONFIG";

const DEFAULT_PORT: u16 = 5055;
const DEFAULT_BIND_HOST: &str = "0.0.0.0";
const DEFAULT_CAMERA_LOCATION: &str = "CAM_12";
const DEFAULT_VIDEO_INPUT: &str = "./clip.mp4";
const DEFAULT_ANALYSIS_API_URL: &str = "http://localhost:8700";
const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
const DEFAULT_CLIP_DIR: &str = ".";
const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";

const DEFAULT_CLIP_INTERVAL_MS: u64 = 1_000;
const DEFAULT_ANALYSIS_INTERVAL_MS: u64 = 10_000;
const DEFAULT_ANALYSIS_INITIAL_DELAY_MS: u64 = 4_000;
const DEFAULT_ANALYSIS_PACING_MS: u64 = 10_000;
const DEFAULT_EMERGENCY_COOLDOWN_MS: u64 = 30_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_ENCODE_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Deserialize, Default)]
struct AgentConfigFile {
    port: Option<u16>,
    bind_host: Option<String>,
    camera_location: Option<String>,
    video_input: Option<String>,
    use_mock_analysis: Option<bool>,
    clip_dir: Option<PathBuf>,
    ffmpeg_path: Option<String>,
    fps: Option<u32>,
    window_secs: Option<u32>,
    analysis: Option<AnalysisConfigFile>,
    backend: Option<BackendConfigFile>,
    timing: Option<TimingConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct AnalysisConfigFile {
    api_url: Option<String>,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct BackendConfigFile {
    url: Option<String>,
    public_clip_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TimingConfigFile {
    clip_interval_ms: Option<u64>,
    analysis_interval_ms: Option<u64>,
    analysis_initial_delay_ms: Option<u64>,
    analysis_pacing_ms: Option<u64>,
    emergency_cooldown_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    encode_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub bind_host: String,
    pub port: u16,
    pub camera_location: String,
    pub video_input: String,
    pub use_mock_analysis: bool,
    pub analysis_api_url: String,
    pub analysis_api_key: Option<String>,
    pub backend_url: String,
    /// Clip URL sent to the collector; derived from `port` when unset.
    pub public_clip_url: Option<String>,
    pub clip_dir: PathBuf,
    pub ffmpeg_path: String,
    pub fps: u32,
    pub window_secs: u32,
    pub timing: TimingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingSettings {
    pub clip_interval: Duration,
    pub analysis_interval: Duration,
    pub analysis_initial_delay: Duration,
    pub analysis_pacing: Duration,
    pub emergency_cooldown: Duration,
    /// Bound on each outbound HTTP request.
    pub request_timeout: Duration,
    pub encode_timeout: Duration,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self::from_file(TimingConfigFile::default())
    }
}

impl TimingSettings {
    fn from_file(file: TimingConfigFile) -> Self {
        let ms = |value: Option<u64>, default: u64| Duration::from_millis(value.unwrap_or(default));
        Self {
            clip_interval: ms(file.clip_interval_ms, DEFAULT_CLIP_INTERVAL_MS),
            analysis_interval: ms(file.analysis_interval_ms, DEFAULT_ANALYSIS_INTERVAL_MS),
            analysis_initial_delay: ms(
                file.analysis_initial_delay_ms,
                DEFAULT_ANALYSIS_INITIAL_DELAY_MS,
            ),
            analysis_pacing: ms(file.analysis_pacing_ms, DEFAULT_ANALYSIS_PACING_MS),
            emergency_cooldown: ms(file.emergency_cooldown_ms, DEFAULT_EMERGENCY_COOLDOWN_MS),
            request_timeout: ms(file.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS),
            encode_timeout: ms(file.encode_timeout_ms, DEFAULT_ENCODE_TIMEOUT_MS),
        }
    }
}

impl Default for AgentConfig {
    /// Built-in defaults, before environment overrides and validation.
    fn default() -> Self {
        Self::from_file(AgentConfigFile::default())
    }
}

impl AgentConfig {
    /// Load from the file named by `CAMERA_AGENT_CONFIG` (if any), then the
    /// environment.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_FILE_ENV)
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(config_path.as_deref(), false)
    }

    /// Load from an explicit file. `force_mock` wins over the file and
    /// `USE_MOCK_ANALYSIS`.
    pub fn load_from(config_path: Option<&Path>, force_mock: bool) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => read_config_file(path)?,
            None => AgentConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        if force_mock {
            cfg.use_mock_analysis = true;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AgentConfigFile) -> Self {
        let analysis = file.analysis.unwrap_or_default();
        let backend = file.backend.unwrap_or_default();
        Self {
            bind_host: file
                .bind_host
                .unwrap_or_else(|| DEFAULT_BIND_HOST.to_string()),
            port: file.port.unwrap_or(DEFAULT_PORT),
            camera_location: file
                .camera_location
                .unwrap_or_else(|| DEFAULT_CAMERA_LOCATION.to_string()),
            video_input: file
                .video_input
                .unwrap_or_else(|| DEFAULT_VIDEO_INPUT.to_string()),
            use_mock_analysis: file.use_mock_analysis.unwrap_or(false),
            analysis_api_url: analysis
                .api_url
                .unwrap_or_else(|| DEFAULT_ANALYSIS_API_URL.to_string()),
            analysis_api_key: analysis.api_key,
            backend_url: backend
                .url
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            public_clip_url: backend.public_clip_url,
            clip_dir: file
                .clip_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CLIP_DIR)),
            ffmpeg_path: file
                .ffmpeg_path
                .unwrap_or_else(|| DEFAULT_FFMPEG_PATH.to_string()),
            fps: file.fps.unwrap_or(DEFAULT_FPS),
            window_secs: file.window_secs.unwrap_or(DEFAULT_WINDOW_SECS),
            timing: TimingSettings::from_file(file.timing.unwrap_or_default()),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(port) = non_empty_env("PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| anyhow!("PORT must be a TCP port number, got {:?}", port))?;
        }
        if let Some(host) = non_empty_env("BIND_HOST") {
            self.bind_host = host;
        }
        if let Some(location) = non_empty_env("CAMERA_LOCATION").or_else(|| non_empty_env("CAMERA_NAME")) {
            self.camera_location = location;
        }
        if let Some(input) = non_empty_env("VIDEO_INPUT") {
            self.video_input = input;
        }
        if let Some(flag) = non_empty_env("USE_MOCK_ANALYSIS") {
            self.use_mock_analysis = parse_flag(&flag);
        }
        if let Some(url) = non_empty_env("ANALYSIS_API_URL") {
            self.analysis_api_url = url;
        }
        if let Some(key) = non_empty_env("ANALYSIS_API_KEY") {
            self.analysis_api_key = Some(key);
        }
        if let Some(url) = non_empty_env("BACKEND_URL") {
            self.backend_url = url;
        }
        if let Some(url) = non_empty_env("PUBLIC_CLIP_URL") {
            self.public_clip_url = Some(url);
        }
        if let Some(dir) = non_empty_env("CLIP_DIR") {
            self.clip_dir = PathBuf::from(dir);
        }
        if let Some(ffmpeg) = non_empty_env("FFMPEG_PATH") {
            self.ffmpeg_path = ffmpeg;
        }
        Ok(())
    }

    /// Check the loaded values. Called by `load`; call again after changing
    /// fields by hand.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.camera_location.trim().is_empty(),
            "camera location must not be empty"
        );
        ensure!(
            !self.video_input.trim().is_empty(),
            "video input must not be empty"
        );
        ensure!(self.fps > 0, "fps must be greater than zero");
        ensure!(self.window_secs > 0, "window_secs must be greater than zero");
        ensure!(
            !self.timing.clip_interval.is_zero(),
            "clip interval must be greater than zero"
        );
        ensure!(
            !self.timing.analysis_interval.is_zero(),
            "analysis interval must be greater than zero"
        );

        validate_http_url("BACKEND_URL", &self.backend_url)?;
        if let Some(url) = &self.public_clip_url {
            validate_http_url("PUBLIC_CLIP_URL", url)?;
        }
        if !self.use_mock_analysis {
            validate_http_url("ANALYSIS_API_URL", &self.analysis_api_url)?;
            let has_key = self
                .analysis_api_key
                .as_deref()
                .is_some_and(|key| !key.trim().is_empty());
            if !has_key {
                bail!("ANALYSIS_API_KEY is required unless USE_MOCK_ANALYSIS=true");
            }
        }
        Ok(())
    }

    /// `host:port` for the HTTP listener.
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    pub fn reference_clip_url(&self) -> String {
        self.public_clip_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}/latest_clip.mp4", self.port))
    }

    /// Frames in a full rolling window.
    pub fn frames_required(&self) -> usize {
        self.fps as usize * self.window_secs as usize
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            ffmpeg: self.ffmpeg_path.clone(),
            input: self.video_input.clone(),
            fps: self.fps,
        }
    }

    pub fn clip_settings(&self) -> ClipSettings {
        ClipSettings::for_camera(
            &self.clip_dir,
            &self.camera_location,
            self.fps,
            self.window_secs,
        )
    }

    pub fn remote_analysis_config(&self) -> RemoteAnalysisConfig {
        RemoteAnalysisConfig {
            base_url: self.analysis_api_url.clone(),
            api_key: self.analysis_api_key.clone().unwrap_or_default(),
            timeout: self.timing.request_timeout,
        }
    }

    pub fn forwarder_config(&self) -> ForwarderConfig {
        ForwarderConfig {
            collector_url: self.backend_url.clone(),
            camera_id: self.camera_location.clone(),
            reference_clip_url: self.reference_clip_url(),
            timeout: self.timing.request_timeout,
        }
    }
}

fn read_config_file(path: &Path) -> Result<AgentConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1")
}

fn validate_http_url(name: &str, value: &str) -> Result<()> {
    let parsed = url::Url::parse(value).map_err(|e| anyhow!("{} is not a valid URL ({}): {}", name, value, e))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => bail!("{} must use http or https, got {}", name, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> AgentConfig {
        AgentConfig::default()
    }

    #[test]
    fn defaults_match_single_camera_setup() {
        let cfg = base();
        assert_eq!(cfg.api_addr(), "0.0.0.0:5055");
        assert_eq!(cfg.camera_location, "CAM_12");
        assert_eq!(cfg.frames_required(), 100);
        assert_eq!(cfg.timing.analysis_pacing, Duration::from_secs(10));
        assert_eq!(cfg.timing.emergency_cooldown, Duration::from_secs(30));
        assert_eq!(
            cfg.reference_clip_url(),
            "http://localhost:5055/latest_clip.mp4"
        );
    }

    #[test]
    fn remote_mode_requires_key() {
        let mut cfg = base();
        assert!(cfg.validate().is_err());
        cfg.analysis_api_key = Some("secret".to_string());
        assert!(cfg.validate().is_ok());
        cfg.analysis_api_key = None;
        cfg.use_mock_analysis = true;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        let mut cfg = base();
        cfg.use_mock_analysis = true;

        cfg.backend_url = "ftp://collector".to_string();
        assert!(cfg.validate().is_err());
        cfg.backend_url = DEFAULT_BACKEND_URL.to_string();

        cfg.fps = 0;
        assert!(cfg.validate().is_err());
        cfg.fps = 10;

        cfg.camera_location = "  ".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn flags_accept_true_and_one() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" TRUE "));
        assert!(parse_flag("1"));
        assert!(!parse_flag("yes"));
        assert!(!parse_flag("false"));
    }

    #[test]
    fn clip_settings_are_per_camera() {
        let mut cfg = base();
        cfg.clip_dir = PathBuf::from("/var/clips");
        cfg.camera_location = "CAM_7".to_string();
        let settings = cfg.clip_settings();
        assert_eq!(settings.output_path, PathBuf::from("/var/clips/.latest_clip_CAM_7.mp4"));
        assert_eq!(settings.scratch_dir, PathBuf::from("/var/clips/.tmp_frames_CAM_7"));
        assert_eq!(settings.frames_required, 100);
    }
}
