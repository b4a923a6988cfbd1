use std::path::{Path, PathBuf};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use tokio::process::Command;

use crate::media::MediaKind;

/// Format selector for video downloads: best ≤720p mp4 video + m4a audio, or a progressive mp4
pub const VIDEO_FORMAT_SELECTOR: &str =
    "bestvideo[height<=?720][ext=mp4]+bestaudio[ext=m4a]/best[height<=?720][ext=mp4]";

/// Trait implemented by fallback extractors.
#[async_trait]
pub trait SecondaryExtractor: Send + Sync {
    /// Fetch `url` as `kind` into `out`; succeeds only if `out` exists afterwards
    async fn fetch(&self, url: &str, kind: MediaKind, out: &Path) -> Result<()>;
}

/// yt-dlp run as a subprocess
#[derive(Debug, Clone)]
pub struct YtDlp {
    pub ytdlp_bin: PathBuf,
    pub ffmpeg_bin: PathBuf,
    pub max_file_mb: u64,
    pub max_duration_secs: u64,
}

impl YtDlp {
    /// Build the yt-dlp argument list
    ///
    /// Size and duration limits are passed along so yt-dlp refuses oversized
    /// media itself.
    pub fn build_args(&self, url: &str, kind: MediaKind, out: &Path) -> Vec<String> {
        let mut args = vec![
            url.to_string(),
            "--ffmpeg-location".to_string(),
            self.ffmpeg_bin.to_string_lossy().to_string(),
        ];

        match kind {
            MediaKind::Audio => {
                args.push("-x".to_string());
                args.push("--audio-format".to_string());
                args.push("mp3".to_string());
                args.push("--audio-quality".to_string());
                args.push("192K".to_string());
                args.push("-f".to_string());
                args.push("bestaudio".to_string());
            }
            MediaKind::Video => {
                args.push("-f".to_string());
                args.push(VIDEO_FORMAT_SELECTOR.to_string());
                args.push("--merge-output-format".to_string());
                args.push("mp4".to_string());
            }
        }

        args.push("--no-playlist".to_string());
        args.push("--max-filesize".to_string());
        args.push(format!("{}m", self.max_file_mb));
        if self.max_duration_secs > 0 {
            args.push("--match-filter".to_string());
            args.push(format!("duration <= ?{}", self.max_duration_secs));
        }
        args.push("-o".to_string());
        args.push(out.to_string_lossy().to_string());

        args
    }
}

#[async_trait]
impl SecondaryExtractor for YtDlp {
    async fn fetch(&self, url: &str, kind: MediaKind, out: &Path) -> Result<()> {
        let args = self.build_args(url, kind, out);
        info!("Falling back to yt-dlp for {} ({})", url, kind);
        debug!("yt-dlp args: {:?}", args);

        let output = Command::new(&self.ytdlp_bin)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!(
                "Failed to execute yt-dlp at: {}. Ensure yt-dlp is installed and accessible.",
                self.ytdlp_bin.display()
            ))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "yt-dlp failed (exit code {}): {}",
                output.status.code().unwrap_or(-1),
                last_lines(&stderr, 5)
            ));
        }

        if tokio::fs::metadata(out).await.is_err() {
            return Err(anyhow!(
                "yt-dlp did not produce a file. The video may be region-locked, private, or filtered by duration/size."
            ));
        }

        Ok(())
    }
}

/// Last `n` non-empty lines of subprocess output
pub(crate) fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}
