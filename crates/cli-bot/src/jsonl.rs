//! JSON-lines chat transport for local operation.
//!
//! Inbound messages arrive one JSON object per line. Replies are written the
//! same way. Attachment handles are local file paths.

use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::sync::Mutex;
use uuid::Uuid;

use tubeconv::{Attachment, ChatTransport, InboundMessage, OutboundContent, ReplyTarget};

/// One reply line
#[derive(Debug, Serialize)]
struct ReplyLine<'a> {
    chat: &'a str,
    quoted_id: &'a str,
    #[serde(flatten)]
    body: ReplyBody,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplyBody {
    Text {
        text: String,
    },
    Audio {
        file_name: String,
        mime_type: String,
        size_bytes: u64,
        /// Copy in the outbox, if one is configured
        saved_to: Option<PathBuf>,
    },
    Video {
        caption: String,
        size_bytes: u64,
        saved_to: Option<PathBuf>,
    },
}

/// Writes replies as JSON lines and copies delivered files to an outbox
pub struct JsonLinesTransport<W> {
    out: Mutex<W>,
    outbox: Option<PathBuf>,
}

impl<W> JsonLinesTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(out: W, outbox: Option<PathBuf>) -> Self {
        JsonLinesTransport {
            out: Mutex::new(out),
            outbox,
        }
    }

    #[cfg(test)]
    pub async fn output(&self) -> W
    where
        W: Clone,
    {
        self.out.lock().await.clone()
    }

    /// Copy a delivered file into the outbox before the job removes it
    async fn save(&self, path: &Path, file_name: &str) -> Result<(u64, Option<PathBuf>)> {
        let size = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Delivered file is missing: {}", path.display()))?
            .len();

        let Some(outbox) = &self.outbox else {
            return Ok((size, None));
        };
        tokio::fs::create_dir_all(outbox)
            .await
            .with_context(|| format!("Failed to create outbox: {}", outbox.display()))?;
        let id = Uuid::new_v4().simple().to_string();
        let dest = outbox.join(format!("{}-{}", &id[..8], file_name));
        tokio::fs::copy(path, &dest)
            .await
            .with_context(|| format!("Failed to copy {} to {}", path.display(), dest.display()))?;
        debug!("Saved delivery to {}", dest.display());
        Ok((size, Some(dest)))
    }

    async fn write_line(&self, line: &ReplyLine<'_>) -> Result<()> {
        let mut json = serde_json::to_string(line).context("Failed to serialize reply")?;
        json.push('\n');
        let mut out = self.out.lock().await;
        out.write_all(json.as_bytes()).await.context("Failed to write reply")?;
        out.flush().await.context("Failed to flush reply")?;
        Ok(())
    }
}

#[async_trait]
impl<W> ChatTransport for JsonLinesTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, target: &ReplyTarget, content: OutboundContent) -> Result<()> {
        let body = match content {
            OutboundContent::Text(text) => ReplyBody::Text { text },
            OutboundContent::Audio {
                path,
                file_name,
                mime_type,
            } => {
                let (size_bytes, saved_to) = self.save(&path, &file_name).await?;
                ReplyBody::Audio {
                    file_name,
                    mime_type,
                    size_bytes,
                    saved_to,
                }
            }
            OutboundContent::Video { path, caption } => {
                let file_name = path
                    .extension()
                    .map(|ext| format!("video.{}", ext.to_string_lossy()))
                    .unwrap_or_else(|| "video".to_string());
                let (size_bytes, saved_to) = self.save(&path, &file_name).await?;
                ReplyBody::Video {
                    caption,
                    size_bytes,
                    saved_to,
                }
            }
        };

        self.write_line(&ReplyLine {
            chat: &target.chat,
            quoted_id: &target.quoted.key.id,
            body,
        })
        .await
    }

    async fn download_media(&self, attachment: &Attachment, dest: &Path) -> Result<u64> {
        tokio::fs::copy(&attachment.handle, dest)
            .await
            .with_context(|| format!("Failed to read attachment: {}", attachment.handle))
    }
}

/// A source of inbound messages that can be (re)opened
#[async_trait]
pub trait Connector: Send {
    async fn connect(&mut self) -> Result<()>;

    /// Next inbound message; `None` once the source is exhausted
    async fn next_message(&mut self) -> Result<Option<InboundMessage>>;
}

/// Reads inbound messages as JSON lines
pub struct JsonLinesConnector<R, F> {
    open: F,
    lines: Option<Lines<R>>,
}

impl<R, F> JsonLinesConnector<R, F>
where
    R: AsyncBufRead + Unpin + Send,
    F: FnMut() -> R + Send,
{
    pub fn new(open: F) -> Self {
        JsonLinesConnector { open, lines: None }
    }
}

#[async_trait]
impl<R, F> Connector for JsonLinesConnector<R, F>
where
    R: AsyncBufRead + Unpin + Send,
    F: FnMut() -> R + Send,
{
    async fn connect(&mut self) -> Result<()> {
        self.lines = Some((self.open)().lines());
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<InboundMessage>> {
        let lines = self.lines.as_mut().context("Input is not connected")?;
        loop {
            let Some(line) = lines.next_line().await.context("Failed to read input")? else {
                self.lines = None;
                return Ok(None);
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<InboundMessage>(line) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => warn!("Skipping malformed input line: {}", e),
            }
        }
    }
}
