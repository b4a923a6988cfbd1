use std::path::Path;
use log::debug;

use crate::config::Limits;
use crate::error::MediaError;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Size and duration limits applied before and after acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guard {
    max_duration_secs: u64,
    max_file_mb: u64,
}

impl Guard {
    pub fn new(limits: &Limits) -> Self {
        Guard {
            max_duration_secs: limits.max_duration_secs,
            max_file_mb: limits.max_file_mb,
        }
    }

    pub fn max_duration_secs(&self) -> u64 {
        self.max_duration_secs
    }

    pub fn max_file_mb(&self) -> u64 {
        self.max_file_mb
    }

    /// Largest accepted file size in bytes
    pub fn max_bytes(&self) -> u64 {
        self.max_file_mb.saturating_mul(BYTES_PER_MB)
    }

    /// Fail when `secs` exceeds the duration limit (a limit of 0 disables the check)
    pub fn check_duration(&self, secs: u64) -> Result<(), MediaError> {
        if self.max_duration_secs > 0 && secs > self.max_duration_secs {
            return Err(MediaError::DurationExceeded {
                actual_secs: secs,
                limit_secs: self.max_duration_secs,
            });
        }
        Ok(())
    }

    /// Fail when a byte count exceeds the size limit
    pub fn check_bytes(&self, size_bytes: u64) -> Result<(), MediaError> {
        if size_bytes > self.max_bytes() {
            return Err(MediaError::SizeExceeded {
                size_bytes,
                limit_mb: self.max_file_mb,
            });
        }
        Ok(())
    }

    /// Stat `path` and fail when the file exceeds the size limit; returns the size
    pub async fn check_size(&self, path: &Path) -> Result<u64, MediaError> {
        let size = tokio::fs::metadata(path).await?.len();
        debug!("Size check: {} is {} bytes (limit {} bytes)", path.display(), size, self.max_bytes());
        self.check_bytes(size)?;
        Ok(size)
    }
}
