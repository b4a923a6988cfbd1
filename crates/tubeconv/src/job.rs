use std::fmt;
use uuid::Uuid;

use crate::error::MediaError;
use crate::media::MediaKind;
use crate::message::{AttachmentKind, InboundMessage};
use crate::transport::ReplyTarget;

/// What a job produces and from where
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Remote URL to MP3
    FetchAudio,
    /// Remote URL to MP4
    FetchVideo,
    /// Inbound video to MP3
    ConvertToAudio,
    /// Inbound audio to MP4
    ConvertToVideo,
}

impl JobKind {
    pub fn output_kind(&self) -> MediaKind {
        match self {
            JobKind::FetchAudio | JobKind::ConvertToAudio => MediaKind::Audio,
            JobKind::FetchVideo | JobKind::ConvertToVideo => MediaKind::Video,
        }
    }

    /// Attachment kind a conversion job requires as input
    pub fn required_input(&self) -> Option<AttachmentKind> {
        match self {
            JobKind::ConvertToAudio => Some(AttachmentKind::Video),
            JobKind::ConvertToVideo => Some(AttachmentKind::Audio),
            JobKind::FetchAudio | JobKind::FetchVideo => None,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, JobKind::FetchAudio | JobKind::FetchVideo)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobKind::FetchAudio => "fetch-audio",
            JobKind::FetchVideo => "fetch-video",
            JobKind::ConvertToAudio => "convert-to-audio",
            JobKind::ConvertToVideo => "convert-to-video",
        };
        write!(f, "{}", s)
    }
}

/// Where the input media comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSource {
    Remote(String),
    Inbound(InboundMessage),
}

/// One admitted unit of work
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub id: Uuid,
    pub kind: JobKind,
    pub source: JobSource,
    pub reply: ReplyTarget,
}

impl JobRequest {
    pub fn new(kind: JobKind, source: JobSource, reply: ReplyTarget) -> Self {
        JobRequest {
            id: Uuid::new_v4(),
            kind,
            source,
            reply,
        }
    }

    /// Remote fetch job
    pub fn remote(kind: JobKind, url: impl Into<String>, message: &InboundMessage) -> Self {
        Self::new(kind, JobSource::Remote(url.into()), ReplyTarget::for_message(message))
    }

    /// Conversion job on the media carried by `message`
    pub fn inbound(kind: JobKind, message: &InboundMessage) -> Self {
        Self::new(kind, JobSource::Inbound(message.clone()), ReplyTarget::for_message(message))
    }
}

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Delivered,
    Rejected,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Delivered | JobState::Rejected | JobState::Failed)
    }
}

/// How a job ended
#[derive(Debug)]
pub enum JobOutcome {
    Delivered,
    /// Refused by a guard; the requester was told why
    Rejected(MediaError),
    Failed(MediaError),
}

impl JobOutcome {
    pub fn from_error(err: MediaError) -> Self {
        if err.is_rejection() {
            JobOutcome::Rejected(err)
        } else {
            JobOutcome::Failed(err)
        }
    }

    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Delivered => JobState::Delivered,
            JobOutcome::Rejected(_) => JobState::Rejected,
            JobOutcome::Failed(_) => JobState::Failed,
        }
    }

    pub fn error(&self) -> Option<&MediaError> {
        match self {
            JobOutcome::Delivered => None,
            JobOutcome::Rejected(e) | JobOutcome::Failed(e) => Some(e),
        }
    }
}
