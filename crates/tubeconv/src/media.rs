use std::fmt;
use std::path::PathBuf;
use serde::{Deserialize, Serialize};

/// Kind of media a job produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Container extension used for delivered files of this kind
    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Audio => "mp3",
            MediaKind::Video => "mp4",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// A local file produced while running a job
///
/// The path always comes from the owning job's `TempSet`, which removes it
/// when the job finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAsset {
    pub path: PathBuf,
    pub kind: MediaKind,
    /// Container extension of the file on disk (e.g. "mp3", "webm", "mp4")
    pub container: String,
    pub size_bytes: u64,
}

impl MediaAsset {
    /// True when the file is already in the container delivered for its kind
    pub fn is_delivery_container(&self) -> bool {
        self.container.eq_ignore_ascii_case(self.kind.extension())
    }
}
