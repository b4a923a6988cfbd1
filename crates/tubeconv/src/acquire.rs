//! Acquisition: turn a job source into a local file.
//!
//! Remote URLs go through the primary extractor first. When it fails with a
//! bot-detection error the same normalized URL is handed once to the
//! secondary extractor. Any other primary error ends the acquisition.

use std::path::PathBuf;
use std::sync::Arc;
use anyhow::anyhow;
use log::{debug, info, warn};

use crate::error::MediaError;
use crate::extractor::{
    choose_format, ErrorClass, ErrorClassifier, FormatSelector, PrimaryExtractor, SecondaryExtractor,
};
use crate::guard::Guard;
use crate::links::normalize_url;
use crate::media::{MediaAsset, MediaKind};
use crate::message::{AttachmentKind, InboundMessage};
use crate::temp::TempSet;
use crate::transcode::Transcoder;
use crate::transport::ChatTransport;

/// A remote asset on disk plus what is known about it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquired {
    pub asset: MediaAsset,
    /// Remote title; `None` when the secondary extractor produced the file
    pub title: Option<String>,
}

/// Inbound attachment written to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMedia {
    pub path: PathBuf,
    pub kind: AttachmentKind,
    pub size_bytes: u64,
}

/// Why the primary path stopped
enum PrimaryFailure {
    /// Refused or failed for a reason the fallback cannot change
    Media(MediaError),
    /// Raw extractor error, to be classified
    Extractor(anyhow::Error),
}

impl From<MediaError> for PrimaryFailure {
    fn from(e: MediaError) -> Self {
        PrimaryFailure::Media(e)
    }
}

pub struct Acquirer {
    primary: Arc<dyn PrimaryExtractor>,
    secondary: Arc<dyn SecondaryExtractor>,
    transcoder: Arc<dyn Transcoder>,
    classifier: ErrorClassifier,
    guard: Guard,
    force_secondary: bool,
}

impl Acquirer {
    pub fn new(
        primary: Arc<dyn PrimaryExtractor>,
        secondary: Arc<dyn SecondaryExtractor>,
        transcoder: Arc<dyn Transcoder>,
        classifier: ErrorClassifier,
        guard: Guard,
        force_secondary: bool,
    ) -> Self {
        Acquirer {
            primary,
            secondary,
            transcoder,
            classifier,
            guard,
            force_secondary,
        }
    }

    /// Download `raw_url` as `kind`, allocating every path from `temps`
    pub async fn fetch_remote(
        &self,
        raw_url: &str,
        kind: MediaKind,
        temps: &mut TempSet,
    ) -> Result<Acquired, MediaError> {
        let url = normalize_url(raw_url)?;

        if self.force_secondary {
            debug!("Secondary extractor forced for {}", url);
            return self.fetch_secondary(&url, kind, temps).await;
        }

        if !self.primary.validate_url(&url) {
            return Err(MediaError::InvalidSource(format!("unsupported link: {}", url)));
        }

        match self.fetch_primary(&url, kind, temps).await {
            Ok(acquired) => Ok(acquired),
            Err(PrimaryFailure::Media(e)) => Err(e),
            Err(PrimaryFailure::Extractor(err)) => match self.classifier.classify(&err) {
                ErrorClass::BotBlocked => {
                    warn!("🤖 Primary extractor blocked for {}: {:#}", url, err);
                    self.fetch_secondary(&url, kind, temps).await
                }
                class => {
                    warn!("Primary extractor failed for {} ({:?}): {:#}", url, class, err);
                    Err(MediaError::AcquisitionFailed(format!("{:#}", err)))
                }
            },
        }
    }

    async fn fetch_primary(
        &self,
        url: &str,
        kind: MediaKind,
        temps: &mut TempSet,
    ) -> Result<Acquired, PrimaryFailure> {
        let info = self.primary.get_info(url).await.map_err(PrimaryFailure::Extractor)?;
        info!("🔎 {} \"{}\" ({}s, {} formats)", info.id, info.title, info.duration_secs, info.formats.len());

        self.guard.check_duration(info.duration_secs)?;

        let asset = match kind {
            MediaKind::Audio => {
                let format = choose_format(&info.formats, FormatSelector::HighestAudio)
                    .ok_or_else(|| PrimaryFailure::Extractor(anyhow!("No audio stream available for {}", info.id)))?;
                if let Some(len) = format.content_length {
                    self.guard.check_bytes(len)?;
                }

                let dest = temps.allocate(&format.container);
                let size_bytes = self
                    .primary
                    .download(&info, format, &dest)
                    .await
                    .map_err(PrimaryFailure::Extractor)?;
                MediaAsset {
                    path: dest,
                    kind: MediaKind::Audio,
                    container: format.container.clone(),
                    size_bytes,
                }
            }
            MediaKind::Video => {
                if let Some(format) = choose_format(&info.formats, FormatSelector::Progressive("mp4")) {
                    if let Some(len) = format.content_length {
                        self.guard.check_bytes(len)?;
                    }
                    let dest = temps.allocate("mp4");
                    let size_bytes = self
                        .primary
                        .download(&info, format, &dest)
                        .await
                        .map_err(PrimaryFailure::Extractor)?;
                    MediaAsset {
                        path: dest,
                        kind: MediaKind::Video,
                        container: "mp4".to_string(),
                        size_bytes,
                    }
                } else {
                    let video = choose_format(&info.formats, FormatSelector::HighestVideoOnly);
                    let audio = choose_format(&info.formats, FormatSelector::HighestAudio);
                    let (video, audio) = match (video, audio) {
                        (Some(v), Some(a)) => (v, a),
                        _ => {
                            return Err(PrimaryFailure::Extractor(anyhow!(
                                "No downloadable video stream for {}",
                                info.id
                            )))
                        }
                    };
                    if let (Some(v), Some(a)) = (video.content_length, audio.content_length) {
                        self.guard.check_bytes(v.saturating_add(a))?;
                    }

                    debug!("No progressive mp4, muxing itag {} + {}", video.itag, audio.itag);
                    let video_path = temps.allocate(&video.container);
                    self.primary
                        .download(&info, video, &video_path)
                        .await
                        .map_err(PrimaryFailure::Extractor)?;
                    let audio_path = temps.allocate(&audio.container);
                    self.primary
                        .download(&info, audio, &audio_path)
                        .await
                        .map_err(PrimaryFailure::Extractor)?;

                    let dest = temps.allocate("mp4");
                    self.transcoder.mux(&video_path, &audio_path, &dest).await?;
                    let size_bytes = tokio::fs::metadata(&dest).await.map_err(MediaError::from)?.len();
                    MediaAsset {
                        path: dest,
                        kind: MediaKind::Video,
                        container: "mp4".to_string(),
                        size_bytes,
                    }
                }
            }
        };

        Ok(Acquired {
            asset,
            title: Some(info.title),
        })
    }

    async fn fetch_secondary(
        &self,
        url: &str,
        kind: MediaKind,
        temps: &mut TempSet,
    ) -> Result<Acquired, MediaError> {
        let dest = temps.allocate(kind.extension());
        self.secondary
            .fetch(url, kind, &dest)
            .await
            .map_err(|e| MediaError::AcquisitionFailed(format!("{:#}", e)))?;

        let size_bytes = tokio::fs::metadata(&dest).await?.len();
        info!("📥 yt-dlp produced {} ({} bytes)", dest.display(), size_bytes);

        Ok(Acquired {
            asset: MediaAsset {
                path: dest,
                kind,
                container: kind.extension().to_string(),
                size_bytes,
            },
            title: None,
        })
    }

    /// Download the media a conversion command applies to (quoted media first)
    pub async fn fetch_inbound(
        &self,
        message: &InboundMessage,
        transport: &dyn ChatTransport,
        temps: &mut TempSet,
    ) -> Result<InboundMedia, MediaError> {
        let attachment = message.pick_media().ok_or(MediaError::NoMediaFound)?;
        let dest = temps.allocate(attachment.kind.extension());

        let size_bytes = transport
            .download_media(attachment, &dest)
            .await
            .map_err(|e| MediaError::AcquisitionFailed(format!("{:#}", e)))?;
        debug!("Downloaded inbound {} to {} ({} bytes)", attachment.kind, dest.display(), size_bytes);

        Ok(InboundMedia {
            path: dest,
            kind: attachment.kind,
            size_bytes,
        })
    }
}
