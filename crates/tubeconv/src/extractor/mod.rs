//! Remote media extractors.
//!
//! The primary extractor talks to the platform's API directly and streams
//! bytes itself. The secondary one shells out to yt-dlp and is used when the
//! primary gets blocked.

pub mod classify;
pub mod innertube;
pub mod ytdlp;

use std::path::Path;
use async_trait::async_trait;

pub use classify::{ErrorClass, ErrorClassifier};
pub use innertube::InnertubeExtractor;
pub use ytdlp::{SecondaryExtractor, YtDlp};

/// One downloadable stream of a remote video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFormat {
    pub itag: u32,
    /// Direct URL; `None` when the stream is signature-protected
    pub url: Option<String>,
    pub mime_type: String,
    /// Container name from the mime type ("mp4", "webm", ...)
    pub container: String,
    pub has_audio: bool,
    pub has_video: bool,
    pub bitrate: Option<u64>,
    pub height: Option<u32>,
    pub content_length: Option<u64>,
    pub is_hls: bool,
}

impl StreamFormat {
    pub fn is_progressive(&self) -> bool {
        self.has_audio && self.has_video
    }
}

/// Metadata returned by the primary extractor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    pub duration_secs: u64,
    pub formats: Vec<StreamFormat>,
}

/// Which stream to download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSelector {
    /// Highest-bitrate audio-only stream
    HighestAudio,
    /// Highest video-only stream (by height, then bitrate)
    HighestVideoOnly,
    /// Best non-HLS stream with both tracks in the given container
    Progressive(&'static str),
}

/// Pick the stream `selector` asks for
pub fn choose_format<'a>(formats: &'a [StreamFormat], selector: FormatSelector) -> Option<&'a StreamFormat> {
    let bitrate = |f: &&StreamFormat| f.bitrate.unwrap_or(0);
    match selector {
        FormatSelector::HighestAudio => formats
            .iter()
            .filter(|f| f.has_audio && !f.has_video && !f.is_hls)
            .max_by_key(bitrate),
        FormatSelector::HighestVideoOnly => formats
            .iter()
            .filter(|f| f.has_video && !f.has_audio && !f.is_hls)
            .max_by_key(|f| (f.height.unwrap_or(0), f.bitrate.unwrap_or(0))),
        FormatSelector::Progressive(container) => formats
            .iter()
            .filter(|f| f.is_progressive() && !f.is_hls && f.container == container && f.url.is_some())
            .max_by_key(bitrate),
    }
}

/// Trait implemented by primary extractors.
///
/// Errors are plain `anyhow` errors; whether they warrant the fallback is
/// decided by `ErrorClassifier` on their text.
#[async_trait]
pub trait PrimaryExtractor: Send + Sync {
    /// Whether `url` points at something this extractor understands
    fn validate_url(&self, url: &str) -> bool;

    /// Fetch metadata without downloading media bytes
    async fn get_info(&self, url: &str) -> anyhow::Result<VideoInfo>;

    /// Stream `format` to `dest`, returning the number of bytes written
    async fn download(&self, info: &VideoInfo, format: &StreamFormat, dest: &Path) -> anyhow::Result<u64>;
}
