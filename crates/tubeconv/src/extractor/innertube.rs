//! Primary extractor speaking YouTube's InnerTube player API.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use log::debug;
use regex::Regex;
use reqwest::header::{ACCEPT_LANGUAGE, CONTENT_TYPE, USER_AGENT};
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use url::Url;

use super::{PrimaryExtractor, StreamFormat, VideoInfo};

const PLAYER_ENDPOINT: &str = "https://www.youtube.com/youtubei/v1/player?prettyPrint=false";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";
const CLIENT_NAME: &str = "ANDROID";
const CLIENT_NAME_ID: &str = "3";
const CLIENT_VERSION: &str = "19.09.37";

const VIDEO_HOSTS: &[&str] = &["youtube.com", "youtube-nocookie.com"];
const SHORT_HOST: &str = "youtu.be";
const PATH_PREFIXES: &[&str] = &["shorts", "embed", "live", "v"];

static VIDEO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("video id pattern is valid"));

/// Extract the 11-character video id from a YouTube URL
pub fn extract_video_id(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    let host = ["www.", "m.", "music."]
        .iter()
        .find_map(|p| host.strip_prefix(*p))
        .unwrap_or(&host)
        .to_string();

    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    let candidate: Option<String> = if host == SHORT_HOST {
        segments.next().map(str::to_string)
    } else if VIDEO_HOSTS.contains(&host.as_str()) {
        match segments.next() {
            Some("watch") => url
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned()),
            Some(prefix) if PATH_PREFIXES.contains(&prefix) => segments.next().map(str::to_string),
            _ => None,
        }
    } else {
        None
    };
    let candidate = candidate?;

    VIDEO_ID.is_match(&candidate).then_some(candidate)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerResponse {
    playability_status: Option<PlayabilityStatus>,
    video_details: Option<VideoDetails>,
    streaming_data: Option<StreamingData>,
}

#[derive(Debug, Deserialize)]
struct PlayabilityStatus {
    status: String,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoDetails {
    video_id: String,
    title: Option<String>,
    length_seconds: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamingData {
    #[serde(default)]
    formats: Vec<RawFormat>,
    #[serde(default)]
    adaptive_formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFormat {
    itag: u32,
    url: Option<String>,
    mime_type: String,
    bitrate: Option<u64>,
    height: Option<u32>,
    content_length: Option<String>,
}

impl RawFormat {
    fn into_stream(self, progressive: bool) -> StreamFormat {
        // "video/mp4; codecs=\"avc1.42001E, mp4a.40.2\""
        let essence = self.mime_type.split(';').next().unwrap_or("").trim().to_string();
        let (top, container) = essence.split_once('/').unwrap_or((essence.as_str(), ""));
        let is_video = top == "video";
        let is_hls = self
            .url
            .as_deref()
            .map(|u| u.contains(".m3u8") || u.contains("/manifest/"))
            .unwrap_or(false);

        StreamFormat {
            itag: self.itag,
            container: container.to_string(),
            has_audio: progressive || top == "audio",
            has_video: is_video,
            bitrate: self.bitrate,
            height: self.height,
            content_length: self.content_length.and_then(|c| c.parse().ok()),
            is_hls,
            url: self.url,
            mime_type: self.mime_type,
        }
    }
}

/// Turn a player API response body into `VideoInfo`
pub fn parse_player_response(body: &str) -> Result<VideoInfo> {
    let resp: PlayerResponse = serde_json::from_str(body).context("Failed to parse player response")?;

    if let Some(status) = &resp.playability_status {
        if status.status != "OK" {
            bail!(
                "Video not playable ({}): {}",
                status.status,
                status.reason.as_deref().unwrap_or("no reason given")
            );
        }
    }

    let details = resp
        .video_details
        .ok_or_else(|| anyhow!("Player response has no video details"))?;
    let duration_secs = details
        .length_seconds
        .as_deref()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let streaming = resp.streaming_data.unwrap_or_default();
    let formats: Vec<StreamFormat> = streaming
        .formats
        .into_iter()
        .map(|f| f.into_stream(true))
        .chain(streaming.adaptive_formats.into_iter().map(|f| f.into_stream(false)))
        .collect();

    Ok(VideoInfo {
        id: details.video_id,
        title: details.title.unwrap_or_else(|| "video".to_string()),
        duration_secs,
        formats,
    })
}

/// Primary extractor using the InnerTube API with a mobile client identity
pub struct InnertubeExtractor {
    client: reqwest::Client,
    user_agent: String,
}

impl InnertubeExtractor {
    pub fn new(user_agent: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(InnertubeExtractor {
            client,
            user_agent: user_agent.unwrap_or(DEFAULT_USER_AGENT).to_string(),
        })
    }
}

#[async_trait]
impl PrimaryExtractor for InnertubeExtractor {
    fn validate_url(&self, url: &str) -> bool {
        extract_video_id(url).is_some()
    }

    async fn get_info(&self, url: &str) -> Result<VideoInfo> {
        let video_id = extract_video_id(url).ok_or_else(|| anyhow!("Invalid YouTube URL: {}", url))?;
        debug!("Fetching player response for {}", video_id);

        let body = json!({
            "videoId": video_id,
            "context": {
                "client": {
                    "clientName": CLIENT_NAME,
                    "clientVersion": CLIENT_VERSION,
                    "androidSdkVersion": 30,
                    "hl": "en",
                    "gl": "US"
                }
            }
        });

        let resp = self
            .client
            .post(PLAYER_ENDPOINT)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(CONTENT_TYPE, "application/json")
            .header("X-YouTube-Client-Name", CLIENT_NAME_ID)
            .header("X-YouTube-Client-Version", CLIENT_VERSION)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to request player response for {}", video_id))?
            .error_for_status()
            .with_context(|| format!("Player request rejected for {}", video_id))?;

        let text = resp.text().await.context("Failed to read player response")?;
        parse_player_response(&text)
    }

    async fn download(&self, info: &VideoInfo, format: &StreamFormat, dest: &Path) -> Result<u64> {
        let url = format.url.as_deref().ok_or_else(|| {
            anyhow!(
                "Stream {} of {} needs signature deciphering, which this extractor does not do",
                format.itag,
                info.id
            )
        })?;

        debug!("Downloading itag {} of {} to {}", format.itag, info.id, dest.display());

        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .with_context(|| format!("Failed to request stream {} of {}", format.itag, info.id))?
            .error_for_status()
            .with_context(|| format!("Stream {} of {} was refused", format.itag, info.id))?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;
        let mut stream = resp.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("Stream {} of {} broke off", format.itag, info.id))?;
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", dest.display()))?;
            written += chunk.len() as u64;
        }
        file.flush().await.with_context(|| format!("Failed to flush {}", dest.display()))?;

        Ok(written)
    }
}
