use std::path::{Path, PathBuf};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::extractor::classify::DEFAULT_BOT_BLOCK_PATTERN;

/// Process-wide job limits, read-only after startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum number of jobs running at the same time
    pub max_concurrency: usize,
    /// Maximum media duration in seconds (0 disables the check)
    pub max_duration_secs: u64,
    /// Maximum size of any produced file, in megabytes
    pub max_file_mb: u64,
    /// User-agent sent by the primary extractor
    pub user_agent: Option<String>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            max_duration_secs: 900,
            max_file_mb: 50,
            user_agent: None,
        }
    }
}

/// Configuration for the conversion bot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub limits: Limits,
    /// Skip the primary extractor and always use yt-dlp
    pub force_secondary: bool,
    /// Maximum number of jobs waiting for a slot (None = unbounded)
    pub max_queue_depth: Option<usize>,
    /// Wall-clock deadline for a whole job (None = no deadline)
    pub job_timeout_secs: Option<u64>,
    /// Directory for per-job temporary files
    pub temp_dir: PathBuf,
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Path to the yt-dlp binary
    pub ytdlp_bin: PathBuf,
    /// Regex matched against primary extractor errors to trigger the yt-dlp fallback
    pub bot_block_pattern: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl BotConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            limits: Limits::default(),
            force_secondary: false,
            max_queue_depth: Some(32),
            job_timeout_secs: Some(1200),
            temp_dir: std::env::temp_dir(),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ytdlp_bin: PathBuf::from("yt-dlp"),
            bot_block_pattern: DEFAULT_BOT_BLOCK_PATTERN.to_string(),
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an environment lookup function
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("MAX_CONCURRENCY") {
            self.limits.max_concurrency = parse_number("MAX_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("MAX_DURATION_SEC") {
            self.limits.max_duration_secs = parse_number("MAX_DURATION_SEC", &v)?;
        }
        if let Some(v) = get("MAX_FILE_MB") {
            self.limits.max_file_mb = parse_number("MAX_FILE_MB", &v)?;
        }
        if let Some(v) = get("YTDL_USER_AGENT") {
            self.limits.user_agent = Some(v);
        }
        if let Some(v) = get("USE_YTDLP") {
            self.force_secondary = v == "1";
        }
        if let Some(v) = get("MAX_QUEUE_DEPTH") {
            let depth: usize = parse_number("MAX_QUEUE_DEPTH", &v)?;
            self.max_queue_depth = (depth > 0).then_some(depth);
        }
        if let Some(v) = get("JOB_TIMEOUT_SEC") {
            let secs: u64 = parse_number("JOB_TIMEOUT_SEC", &v)?;
            self.job_timeout_secs = (secs > 0).then_some(secs);
        }
        if let Some(v) = get("FFMPEG_PATH") {
            self.ffmpeg_bin = PathBuf::from(v);
        }
        if let Some(v) = get("YTDLP_PATH") {
            self.ytdlp_bin = PathBuf::from(v);
        }
        if let Some(v) = get("TUBECONV_TEMP_DIR") {
            self.temp_dir = PathBuf::from(v);
        }
        if let Some(v) = get("BOT_BLOCK_PATTERN") {
            self.bot_block_pattern = v;
        }

        Ok(())
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.limits.max_concurrency == 0 {
            return Err(anyhow!("max_concurrency must be at least 1"));
        }
        if self.limits.max_file_mb == 0 {
            return Err(anyhow!("max_file_mb must be greater than 0"));
        }
        regex::Regex::new(&self.bot_block_pattern)
            .with_context(|| format!("Invalid bot_block_pattern: {}", self.bot_block_pattern))?;
        Ok(())
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse::<T>()
        .with_context(|| format!("Invalid value for {}: {:?}", key, value))
}
