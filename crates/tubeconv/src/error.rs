use thiserror::Error;

use crate::message::AttachmentKind;

/// Errors a media job can end with
///
/// Every variant is recovered at the job boundary and turned into a reply.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("invalid source: {0}")]
    InvalidSource(String),

    #[error("duration exceeded: {actual_secs}s > {limit_secs}s")]
    DurationExceeded { actual_secs: u64, limit_secs: u64 },

    #[error("size exceeded: {size_bytes} bytes > {limit_mb} MB")]
    SizeExceeded { size_bytes: u64, limit_mb: u64 },

    #[error("no media found in the message or its quoted message")]
    NoMediaFound,

    #[error("wrong media kind: expected {expected}, got {actual}")]
    WrongMediaKind {
        expected: AttachmentKind,
        actual: AttachmentKind,
    },

    #[error("acquisition failed: {0}")]
    AcquisitionFailed(String),

    #[error("transcode failed: {0}")]
    TranscodeFailed(String),

    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("queue full: {pending} jobs already waiting")]
    QueueFull { pending: usize },

    #[error("job timed out after {0}s")]
    TimedOut(u64),

    /// The job ended without reporting an outcome (task panicked or the queue shut down)
    #[error("job interrupted: {0}")]
    Interrupted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Guard-class errors: the request was understood but refused
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            MediaError::DurationExceeded { .. }
                | MediaError::SizeExceeded { .. }
                | MediaError::WrongMediaKind { .. }
                | MediaError::NoMediaFound
        )
    }

    /// Human-readable text sent back to the requester
    pub fn user_message(&self) -> String {
        match self {
            MediaError::InvalidSource(reason) => format!("Invalid link: {}", reason),
            MediaError::DurationExceeded { actual_secs, limit_secs } => format!(
                "Video too long: {:.1} min > {:.1} min",
                *actual_secs as f64 / 60.0,
                *limit_secs as f64 / 60.0
            ),
            MediaError::SizeExceeded { size_bytes, limit_mb } => format!(
                "File too large: {:.2} MB > {} MB",
                *size_bytes as f64 / (1024.0 * 1024.0),
                limit_mb
            ),
            MediaError::NoMediaFound => {
                "No media found. Reply to a video/audio with the command, or send the media with the command as its caption."
                    .to_string()
            }
            MediaError::WrongMediaKind { expected, .. } => format!(
                "That message is not a {}. Reply to a {} with this command.",
                expected, expected
            ),
            MediaError::AcquisitionFailed(reason) => format!("Download failed: {}", reason),
            MediaError::TranscodeFailed(reason) => format!("Conversion failed: {}", reason),
            MediaError::DeliveryFailed(reason) => format!("Could not send the result: {}", reason),
            MediaError::QueueFull { .. } => {
                "The bot is busy right now, try again in a few minutes.".to_string()
            }
            MediaError::TimedOut(secs) => format!("Took too long (over {}s), gave up.", secs),
            MediaError::Interrupted(_) => "Something went wrong while processing, please try again.".to_string(),
            MediaError::Io(e) => format!("Internal error: {}", e),
        }
    }
}
