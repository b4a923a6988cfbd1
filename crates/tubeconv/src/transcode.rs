//! ffmpeg invocation.
//!
//! Three conversions are needed: extract/re-encode audio to mp3, wrap audio
//! in an mp4 with a black frame, and mux separate video and audio streams.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::error::MediaError;
use crate::extractor::ytdlp::last_lines;

/// Trait implemented by transcoders.
///
/// Inputs are any container ffmpeg understands; outputs are always written
/// to the given path in the delivery container.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Drop any video track and encode the audio as 192 kbps MP3
    async fn to_audio_only(&self, input: &Path, output: &Path) -> Result<(), MediaError>;

    /// Wrap the audio track in an MP4 over a black 1280x720 still
    async fn to_video(&self, input: &Path, output: &Path) -> Result<(), MediaError>;

    /// Combine a video-only and an audio-only file into one MP4
    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), MediaError>;
}

/// Command builder for generating ffmpeg command lines
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandBuilder;

impl CommandBuilder {
    pub fn new() -> Self {
        CommandBuilder
    }

    fn preamble() -> Vec<String> {
        ["-y", "-hide_banner", "-loglevel", "error"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Audio-only MP3 at 192 kbps
    pub fn build_audio_command(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args = Self::preamble();

        args.push("-i".to_string());
        args.push(input.to_string_lossy().to_string());

        // Drop video, including embedded cover art
        args.push("-vn".to_string());
        args.push("-c:a".to_string());
        args.push("libmp3lame".to_string());
        args.push("-b:a".to_string());
        args.push("192k".to_string());
        args.push("-f".to_string());
        args.push("mp3".to_string());

        args.push(output.to_string_lossy().to_string());
        args
    }

    /// MP4 with a generated black video track and the input's audio
    ///
    /// The video source is infinite, so `-shortest` ends the output with the
    /// audio.
    pub fn build_still_video_command(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args = Self::preamble();

        args.push("-f".to_string());
        args.push("lavfi".to_string());
        args.push("-i".to_string());
        args.push("color=c=black:s=1280x720".to_string());
        args.push("-i".to_string());
        args.push(input.to_string_lossy().to_string());

        args.push("-map".to_string());
        args.push("0:v:0".to_string());
        args.push("-map".to_string());
        args.push("1:a:0".to_string());

        args.push("-c:v".to_string());
        args.push("libx264".to_string());
        args.push("-tune".to_string());
        args.push("stillimage".to_string());
        args.push("-pix_fmt".to_string());
        args.push("yuv420p".to_string());
        args.push("-c:a".to_string());
        args.push("aac".to_string());
        args.push("-b:a".to_string());
        args.push("192k".to_string());
        args.push("-shortest".to_string());
        args.push("-movflags".to_string());
        args.push("+faststart".to_string());
        args.push("-f".to_string());
        args.push("mp4".to_string());

        args.push(output.to_string_lossy().to_string());
        args
    }

    /// MP4 from separate video and audio inputs
    pub fn build_mux_command(&self, video: &Path, audio: &Path, output: &Path) -> Vec<String> {
        let mut args = Self::preamble();

        args.push("-i".to_string());
        args.push(video.to_string_lossy().to_string());
        args.push("-i".to_string());
        args.push(audio.to_string_lossy().to_string());

        args.push("-map".to_string());
        args.push("0:v:0".to_string());
        args.push("-map".to_string());
        args.push("1:a:0".to_string());

        args.push("-c:v".to_string());
        args.push("libx264".to_string());
        args.push("-pix_fmt".to_string());
        args.push("yuv420p".to_string());
        args.push("-c:a".to_string());
        args.push("aac".to_string());
        args.push("-shortest".to_string());
        args.push("-movflags".to_string());
        args.push("+faststart".to_string());
        args.push("-f".to_string());
        args.push("mp4".to_string());

        args.push(output.to_string_lossy().to_string());
        args
    }
}

/// Transcoder backed by a local ffmpeg binary
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    pub ffmpeg_bin: PathBuf,
    builder: CommandBuilder,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>) -> Self {
        FfmpegTranscoder {
            ffmpeg_bin: ffmpeg_bin.into(),
            builder: CommandBuilder::new(),
        }
    }

    /// Run ffmpeg with `args`, returning its stderr on failure
    ///
    /// The child is killed if this future is dropped.
    async fn execute(&self, args: Vec<String>) -> anyhow::Result<()> {
        let cmd_str = format!("{} {}", self.ffmpeg_bin.display(), args.join(" "));
        debug!("Executing FFmpeg: {}", cmd_str);

        let mut child = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!(
                "Failed to spawn FFmpeg process at: {}. Ensure FFmpeg is installed and accessible.",
                self.ffmpeg_bin.display()
            ))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("Failed to capture FFmpeg stderr"))?;

        let stderr_handle = tokio::spawn(async move {
            let mut lines = Vec::new();
            let mut line_stream = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = line_stream.next_line().await {
                lines.push(line);
            }
            lines.join("\n")
        });

        let status = child.wait().await.context("Failed to wait for FFmpeg process")?;
        let stderr = stderr_handle.await.context("Failed to read FFmpeg stderr")?;

        if !status.success() {
            return Err(anyhow!(
                "ffmpeg exited with code {}: {}",
                status.code().unwrap_or(-1),
                last_lines(&stderr, 5)
            ));
        }

        Ok(())
    }

    async fn run(&self, args: Vec<String>) -> Result<(), MediaError> {
        self.execute(args)
            .await
            .map_err(|e| MediaError::TranscodeFailed(format!("{:#}", e)))
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn to_audio_only(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
        self.run(self.builder.build_audio_command(input, output)).await
    }

    async fn to_video(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
        self.run(self.builder.build_still_video_command(input, output)).await
    }

    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), MediaError> {
        self.run(self.builder.build_mux_command(video, audio, output)).await
    }
}

/// Run `bin version_flag` and return the first line of its output
///
/// Used at startup to report which external tools are usable.
pub async fn probe_tool(bin: &Path, version_flag: &str) -> anyhow::Result<String> {
    let output = Command::new(bin)
        .arg(version_flag)
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("Failed to execute {}", bin.display()))?;

    if !output.status.success() {
        return Err(anyhow!(
            "{} {} exited with code {}",
            bin.display(),
            version_flag,
            output.status.code().unwrap_or(-1)
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .next()
        .map(|l| l.trim().to_string())
        .ok_or_else(|| anyhow!("Empty output from {} {}", bin.display(), version_flag))
}
