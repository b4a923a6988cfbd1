pub mod config;
pub mod error;
pub mod media;
pub mod message;
pub mod transport;
pub mod links;
pub mod temp;
pub mod guard;
pub mod extractor;
pub mod transcode;
pub mod acquire;
pub mod job;
pub mod dispatcher;
pub mod router;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{BotConfig, Limits};
pub use error::MediaError;
pub use media::{MediaAsset, MediaKind};
pub use message::{Attachment, AttachmentKind, Envelope, InboundMessage, MessageKey, Payload};
pub use transport::{ChatTransport, OutboundContent, ReplyTarget};
pub use guard::Guard;
pub use temp::TempSet;
pub use extractor::{ErrorClass, ErrorClassifier, InnertubeExtractor, PrimaryExtractor, SecondaryExtractor, YtDlp};
pub use transcode::{FfmpegTranscoder, Transcoder};
pub use acquire::Acquirer;
pub use job::{JobKind, JobOutcome, JobRequest, JobSource, JobState};
pub use dispatcher::{DispatchSettings, Dispatcher, JobHandle, Pipeline};
pub use router::{Command, Routed, Router};
pub use session::{ConnectionState, SessionAction, SessionCoordinator, SessionEvent};
