//! Chat transport seam.
//!
//! The connection itself (login, session persistence, reconnects) lives in
//! the transport implementation. The pipeline only needs to send replies and
//! fetch attachment bytes.

use std::path::{Path, PathBuf};
use async_trait::async_trait;

use crate::message::{Attachment, InboundMessage};

/// Where replies for one command go: the chat, quoting the triggering message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTarget {
    pub chat: String,
    /// Triggering message with envelopes removed
    pub quoted: InboundMessage,
}

impl ReplyTarget {
    pub fn for_message(message: &InboundMessage) -> Self {
        ReplyTarget {
            chat: message.key.chat.clone(),
            quoted: message.unwrapped(),
        }
    }
}

/// Content of an outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundContent {
    Text(String),
    Audio {
        path: PathBuf,
        file_name: String,
        mime_type: String,
    },
    Video {
        path: PathBuf,
        caption: String,
    },
}

/// Trait implemented by chat transports.
///
/// Implementations must finish reading any file referenced by `send` before
/// returning: the pipeline removes it right after.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a message to `target.chat`, quoting `target.quoted`
    async fn send(&self, target: &ReplyTarget, content: OutboundContent) -> anyhow::Result<()>;

    /// Write the bytes of `attachment` to `dest`, returning the number written
    async fn download_media(&self, attachment: &Attachment, dest: &Path) -> anyhow::Result<u64>;
}
