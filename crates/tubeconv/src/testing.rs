//! Test doubles for the pipeline's collaborators.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::error::MediaError;
use crate::extractor::{PrimaryExtractor, SecondaryExtractor, StreamFormat, VideoInfo, YtDlp};
use crate::media::MediaKind;
use crate::message::{Attachment, AttachmentKind, Envelope, InboundMessage, MessageKey, Payload};
use crate::transcode::Transcoder;
use crate::transport::{ChatTransport, OutboundContent, ReplyTarget};

fn write_bytes(path: &Path, len: usize) -> std::io::Result<()> {
    std::fs::write(path, vec![0u8; len])
}

fn stream(itag: u32, container: &str, audio: bool, video: bool, bitrate: u64, height: Option<u32>) -> StreamFormat {
    StreamFormat {
        itag,
        url: Some(format!("https://media.example/videoplayback?itag={}", itag)),
        mime_type: format!("{}/{}", if video { "video" } else { "audio" }, container),
        container: container.to_string(),
        has_audio: audio,
        has_video: video,
        bitrate: Some(bitrate),
        height,
        content_length: None,
        is_hls: false,
    }
}

/// Metadata with a progressive mp4, separate video and two audio streams
pub fn video_info(duration_secs: u64) -> VideoInfo {
    VideoInfo {
        id: "abc".to_string(),
        title: "Test Video".to_string(),
        duration_secs,
        formats: vec![
            stream(140, "mp4", true, false, 128_000, None),
            stream(251, "webm", true, false, 160_000, None),
            stream(137, "mp4", false, true, 4_000_000, Some(1080)),
            stream(18, "mp4", true, true, 500_000, Some(360)),
        ],
    }
}

pub struct ScriptedPrimary {
    info: std::result::Result<VideoInfo, String>,
    download_error: Option<String>,
    download_bytes: usize,
    accepts_urls: bool,
    delay: Duration,
    info_urls: Mutex<Vec<String>>,
    downloads: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl ScriptedPrimary {
    pub fn new(info: VideoInfo) -> Self {
        Self::with_info(Ok(info))
    }

    pub fn failing_info(message: &str) -> Self {
        Self::with_info(Err(message.to_string()))
    }

    fn with_info(info: std::result::Result<VideoInfo, String>) -> Self {
        ScriptedPrimary {
            info,
            download_error: None,
            download_bytes: 1024,
            accepts_urls: true,
            delay: Duration::ZERO,
            info_urls: Mutex::new(Vec::new()),
            downloads: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    pub fn with_download_error(mut self, message: &str) -> Self {
        self.download_error = Some(message.to_string());
        self
    }

    pub fn with_download_bytes(mut self, len: usize) -> Self {
        self.download_bytes = len;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn rejecting_urls(mut self) -> Self {
        self.accepts_urls = false;
        self
    }

    pub fn info_urls(&self) -> Vec<String> {
        self.info_urls.lock().unwrap().clone()
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Highest number of `get_info` calls observed in flight at once
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PrimaryExtractor for ScriptedPrimary {
    fn validate_url(&self, _url: &str) -> bool {
        self.accepts_urls
    }

    async fn get_info(&self, url: &str) -> Result<VideoInfo> {
        self.info_urls.lock().unwrap().push(url.to_string());

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        self.info.clone().map_err(|m| anyhow!(m))
    }

    async fn download(&self, _info: &VideoInfo, _format: &StreamFormat, dest: &Path) -> Result<u64> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = &self.download_error {
            return Err(anyhow!(msg.clone()));
        }
        write_bytes(dest, self.download_bytes)?;
        Ok(self.download_bytes as u64)
    }
}

#[derive(Debug, Clone)]
pub struct SecondaryCall {
    pub url: String,
    pub kind: MediaKind,
    pub out: PathBuf,
    /// Arguments the real yt-dlp would have been given
    pub args: Vec<String>,
}

pub struct ScriptedSecondary {
    result: std::result::Result<usize, String>,
    template: YtDlp,
    calls: Mutex<Vec<SecondaryCall>>,
}

impl ScriptedSecondary {
    pub fn succeeding(bytes: usize) -> Self {
        Self::with_result(Ok(bytes))
    }

    pub fn failing(message: &str) -> Self {
        Self::with_result(Err(message.to_string()))
    }

    fn with_result(result: std::result::Result<usize, String>) -> Self {
        ScriptedSecondary {
            result,
            template: YtDlp {
                ytdlp_bin: PathBuf::from("yt-dlp"),
                ffmpeg_bin: PathBuf::from("ffmpeg"),
                max_file_mb: 50,
                max_duration_secs: 900,
            },
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<SecondaryCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SecondaryExtractor for ScriptedSecondary {
    async fn fetch(&self, url: &str, kind: MediaKind, out: &Path) -> Result<()> {
        self.calls.lock().unwrap().push(SecondaryCall {
            url: url.to_string(),
            kind,
            out: out.to_path_buf(),
            args: self.template.build_args(url, kind, out),
        });
        match &self.result {
            Ok(bytes) => {
                write_bytes(out, *bytes)?;
                Ok(())
            }
            Err(msg) => {
                // Leave what an interrupted yt-dlp leaves: a partial output and format intermediates
                write_bytes(&sibling(out, "part"), 32)?;
                write_bytes(&sibling(out, "f137.mp4.part"), 32)?;
                write_bytes(&sibling(out, "f140.m4a"), 32)?;
                Err(anyhow!(msg.clone()))
            }
        }
    }
}

/// `out` with its extension replaced by `suffix`, or `.part` appended
fn sibling(out: &Path, suffix: &str) -> PathBuf {
    if suffix == "part" {
        let mut name = out.as_os_str().to_os_string();
        name.push(".part");
        PathBuf::from(name)
    } else {
        out.with_extension(suffix)
    }
}

/// Writes an output file of fixed size, fails, or panics
pub struct FakeTranscoder {
    output_bytes: usize,
    failure: Option<String>,
    panics: bool,
    calls: Mutex<Vec<&'static str>>,
}

impl FakeTranscoder {
    pub fn new(output_bytes: usize) -> Self {
        FakeTranscoder {
            output_bytes,
            failure: None,
            panics: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        FakeTranscoder {
            failure: Some(message.to_string()),
            ..Self::new(0)
        }
    }

    /// Writes a partial output, then panics mid-job
    pub fn panicking() -> Self {
        FakeTranscoder {
            panics: true,
            ..Self::new(0)
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn produce(&self, op: &'static str, output: &Path) -> std::result::Result<(), MediaError> {
        self.calls.lock().unwrap().push(op);
        if self.panics {
            write_bytes(output, 16)?;
            panic!("transcoder crashed during {}", op);
        }
        if let Some(msg) = &self.failure {
            // Leave a partial file behind like a crashed ffmpeg would
            write_bytes(output, 16)?;
            return Err(MediaError::TranscodeFailed(msg.clone()));
        }
        write_bytes(output, self.output_bytes)?;
        Ok(())
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn to_audio_only(&self, _input: &Path, output: &Path) -> std::result::Result<(), MediaError> {
        self.produce("audio", output)
    }

    async fn to_video(&self, _input: &Path, output: &Path) -> std::result::Result<(), MediaError> {
        self.produce("video", output)
    }

    async fn mux(&self, _video: &Path, _audio: &Path, output: &Path) -> std::result::Result<(), MediaError> {
        self.produce("mux", output)
    }
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub chat: String,
    pub quoted_id: String,
    pub content: OutboundContent,
    /// Whether the referenced file existed when `send` was called
    pub file_existed: bool,
}

/// Records replies and serves attachment bytes from memory
pub struct RecordingTransport {
    media: HashMap<String, usize>,
    fail_media_sends: bool,
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        RecordingTransport {
            media: HashMap::new(),
            fail_media_sends: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_media(mut self, handle: &str, bytes: usize) -> Self {
        self.media.insert(handle.to_string(), bytes);
        self
    }

    pub fn failing_media_sends(mut self) -> Self {
        self.fail_media_sends = true;
        self
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m.content {
                OutboundContent::Text(t) => Some(t),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send(&self, target: &ReplyTarget, content: OutboundContent) -> Result<()> {
        let file_existed = match &content {
            OutboundContent::Text(_) => false,
            OutboundContent::Audio { path, .. } | OutboundContent::Video { path, .. } => path.exists(),
        };
        let is_media = !matches!(content, OutboundContent::Text(_));
        self.sent.lock().unwrap().push(SentMessage {
            chat: target.chat.clone(),
            quoted_id: target.quoted.key.id.clone(),
            content,
            file_existed,
        });
        if is_media && self.fail_media_sends {
            return Err(anyhow!("upload rejected"));
        }
        Ok(())
    }

    async fn download_media(&self, attachment: &Attachment, dest: &Path) -> Result<u64> {
        let len = self
            .media
            .get(&attachment.handle)
            .copied()
            .ok_or_else(|| anyhow!("unknown media handle {}", attachment.handle))?;
        write_bytes(dest, len)?;
        Ok(len as u64)
    }
}

pub fn attachment(kind: AttachmentKind, handle: &str) -> Attachment {
    Attachment {
        kind,
        handle: handle.to_string(),
        mime_type: None,
        caption: None,
    }
}

pub fn text_message(text: &str) -> InboundMessage {
    message_with_media(text, None, None)
}

/// Message with optional own attachment and an optional quoted attachment
pub fn message_with_media(text: &str, own: Option<Attachment>, quoted: Option<Attachment>) -> InboundMessage {
    InboundMessage {
        key: MessageKey {
            chat: "chat-1".to_string(),
            id: format!("msg-{}", text.len()),
            from_self: false,
        },
        envelope: Envelope::Plain(Payload {
            text: Some(text.to_string()),
            attachment: own,
            quoted: quoted.map(|a| {
                Box::new(Envelope::Plain(Payload {
                    attachment: Some(a),
                    ..Payload::default()
                }))
            }),
        }),
    }
}
