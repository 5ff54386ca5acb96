//! Capture process supervision.
//!
//! The video source is opened by an external ffmpeg process that resamples it
//! to the configured frame rate and writes an MJPEG stream to stdout. The agent
//! owns the child: it is killed when `CaptureProcess` is dropped, and its exit
//! while the agent runs is fatal.

use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};

/// Configuration for the capture process.
#[derive(Clone, Debug)]
pub struct CaptureConfig {
    /// ffmpeg binary (name on PATH or absolute path).
    pub ffmpeg: String,
    /// Video source: a local file path or a stream URL (rtsp://, http://, ...).
    pub input: String,
    /// Frames per second sampled out of the source.
    pub fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            input: "./clip.mp4".to_string(),
            fps: crate::frame::DEFAULT_FPS,
        }
    }
}

impl CaptureConfig {
    /// True when the input is a stream URL rather than a file.
    pub fn is_network_source(&self) -> bool {
        self.input.contains("://")
    }

    /// ffmpeg arguments for this source.
    ///
    /// Files are read at native rate and looped forever so a recorded clip
    /// behaves like a live camera.
    pub fn ffmpeg_args(&self, input: &str) -> Vec<String> {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];
        if !self.is_network_source() {
            args.extend(["-re".into(), "-stream_loop".into(), "-1".into()]);
        }
        args.extend([
            "-i".into(),
            input.to_string(),
            "-vf".into(),
            format!("fps={}", self.fps),
            "-f".into(),
            "mjpeg".into(),
            "pipe:1".into(),
        ]);
        args
    }
}

/// Running capture child.
pub struct CaptureProcess {
    child: Child,
    input: String,
}

impl CaptureProcess {
    /// Start the capture process. Fails when a file source does not exist or
    /// ffmpeg cannot be spawned.
    pub fn spawn(config: &CaptureConfig) -> Result<Self> {
        let input = if config.is_network_source() {
            config.input.clone()
        } else {
            let path = Path::new(&config.input);
            if !path.is_file() {
                bail!("video input not found: {}", path.display());
            }
            std::fs::canonicalize(path)
                .with_context(|| format!("resolve video input {}", path.display()))?
                .to_string_lossy()
                .into_owned()
        };

        let child = Command::new(&config.ffmpeg)
            .args(config.ffmpeg_args(&input))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn capture process '{}'", config.ffmpeg))?;

        log::info!(
            "capture started: pid={} input={} fps={}",
            child.id(),
            input,
            config.fps
        );
        Ok(Self { child, input })
    }

    /// Take the MJPEG stdout. Can only be taken once.
    pub fn take_stdout(&mut self) -> Result<ChildStdout> {
        self.child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("capture stdout already taken"))
    }

    /// Exit status if the child has terminated.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        self.child.try_wait().context("poll capture process")
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    /// Kill the child and reap it. Safe to call more than once.
    pub fn kill(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            if let Err(err) = self.child.kill() {
                log::warn!("failed to kill capture process: {}", err);
            }
        }
        let _ = self.child.wait();
    }
}

impl Drop for CaptureProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sources_loop_at_native_rate() {
        let cfg = CaptureConfig {
            input: "clip.mp4".to_string(),
            fps: 12,
            ..CaptureConfig::default()
        };
        let args = cfg.ffmpeg_args("/videos/clip.mp4");
        assert!(args.iter().any(|a| a == "-stream_loop"));
        assert!(args.iter().any(|a| a == "-re"));
        assert!(args.iter().any(|a| a == "fps=12"));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn network_sources_are_opened_directly() {
        let cfg = CaptureConfig {
            input: "rtsp://10.0.0.5/stream".to_string(),
            ..CaptureConfig::default()
        };
        assert!(cfg.is_network_source());
        let args = cfg.ffmpeg_args(&cfg.input);
        assert!(!args.iter().any(|a| a == "-stream_loop"));
        assert!(args.iter().any(|a| a == "rtsp://10.0.0.5/stream"));
    }

    #[test]
    fn missing_file_source_is_rejected() {
        let cfg = CaptureConfig {
            input: "/definitely/not/here.mp4".to_string(),
            ..CaptureConfig::default()
        };
        let err = CaptureProcess::spawn(&cfg).err().expect("missing input must fail");
        assert!(err.to_string().contains("video input not found"));
    }
}
