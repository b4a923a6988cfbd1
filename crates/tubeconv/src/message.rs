//! Inbound chat message model.
//!
//! Chat protocols wrap disappearing content in envelopes. Every consumer goes
//! through `Envelope::payload`, which strips any nesting of them.

use std::fmt;
use serde::{Deserialize, Serialize};

use crate::media::MediaKind;

/// Identifies one message in one chat
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    /// Chat the message was posted in; replies go back here
    pub chat: String,
    pub id: String,
    #[serde(default)]
    pub from_self: bool,
}

/// Media capability carried by a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Video,
    Audio,
    Image,
    Document,
}

impl AttachmentKind {
    /// Extension used when the attachment is written to disk
    pub fn extension(&self) -> &'static str {
        match self {
            AttachmentKind::Video => "mp4",
            AttachmentKind::Audio => "mp3",
            AttachmentKind::Image | AttachmentKind::Document => "bin",
        }
    }

    /// Only audio and video can be converted
    pub fn media_kind(&self) -> Option<MediaKind> {
        match self {
            AttachmentKind::Video => Some(MediaKind::Video),
            AttachmentKind::Audio => Some(MediaKind::Audio),
            AttachmentKind::Image | AttachmentKind::Document => None,
        }
    }
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttachmentKind::Video => "video",
            AttachmentKind::Audio => "audio",
            AttachmentKind::Image => "image",
            AttachmentKind::Document => "document",
        };
        write!(f, "{}", s)
    }
}

/// A media payload the transport knows how to download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    /// Opaque transport reference used by `ChatTransport::download_media`
    pub handle: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

/// The actual content of a message once envelopes are removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachment: Option<Attachment>,
    /// Content of the message this one replies to
    #[serde(default)]
    pub quoted: Option<Box<Envelope>>,
}

/// Message content, possibly wrapped for disappearing delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Envelope {
    Plain(Payload),
    Ephemeral(Box<Envelope>),
    ViewOnce(Box<Envelope>),
}

impl Envelope {
    /// Strip every wrapper and return the payload underneath
    pub fn payload(&self) -> &Payload {
        match self {
            Envelope::Plain(payload) => payload,
            Envelope::Ephemeral(inner) | Envelope::ViewOnce(inner) => inner.payload(),
        }
    }
}

impl From<Payload> for Envelope {
    fn from(payload: Payload) -> Self {
        Envelope::Plain(payload)
    }
}

/// A message event delivered by the chat transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub key: MessageKey,
    pub envelope: Envelope,
}

impl InboundMessage {
    pub fn payload(&self) -> &Payload {
        self.envelope.payload()
    }

    pub fn sender_is_self(&self) -> bool {
        self.key.from_self
    }

    /// Command text: the message text, or the media caption when there is none
    pub fn text(&self) -> String {
        let payload = self.payload();
        payload
            .text
            .as_deref()
            .or_else(|| payload.attachment.as_ref().and_then(|a| a.caption.as_deref()))
            .unwrap_or("")
            .trim()
            .to_string()
    }

    /// Media of the replied-to message, if any
    pub fn quoted_media(&self) -> Option<&Attachment> {
        self.payload()
            .quoted
            .as_deref()
            .and_then(|q| q.payload().attachment.as_ref())
    }

    /// Media attached to this message itself
    pub fn own_media(&self) -> Option<&Attachment> {
        self.payload().attachment.as_ref()
    }

    /// Media a conversion command applies to; quoted media wins
    pub fn pick_media(&self) -> Option<&Attachment> {
        self.quoted_media().or_else(|| self.own_media())
    }

    /// Copy of this message with envelopes removed, safe to quote in replies
    pub fn unwrapped(&self) -> InboundMessage {
        InboundMessage {
            key: self.key.clone(),
            envelope: Envelope::Plain(self.payload().clone()),
        }
    }
}
