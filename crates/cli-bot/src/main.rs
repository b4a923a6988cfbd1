mod jsonl;
mod supervisor;

use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use tokio::io::BufReader;

use tubeconv::{
    temp, transcode, Acquirer, BotConfig, ChatTransport, DispatchSettings, Dispatcher, ErrorClassifier,
    FfmpegTranscoder, Guard, InnertubeExtractor, JobOutcome, Pipeline, Router, YtDlp,
};

use crate::jsonl::{JsonLinesConnector, JsonLinesTransport};

/// Chat-command media conversion bot
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory that receives a copy of every delivered file
    #[arg(short, long)]
    outbox: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // .env is optional
    let _ = dotenvy::dotenv();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .target(env_logger::Target::Stderr)
        .init();

    let mut cfg = BotConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    cfg.apply_process_env()
        .context("Failed to apply environment overrides")?;
    cfg.validate().context("Invalid configuration")?;

    info!("Media bot starting");
    info!("Configuration loaded:");
    info!("  Max concurrency: {}", cfg.limits.max_concurrency);
    info!("  Max duration: {}s", cfg.limits.max_duration_secs);
    info!("  Max file size: {} MB", cfg.limits.max_file_mb);
    info!("  Queue depth: {:?}", cfg.max_queue_depth);
    info!("  Job timeout: {:?}", cfg.job_timeout_secs.map(|s| format!("{}s", s)));
    info!("  Temp dir: {}", cfg.temp_dir.display());
    if cfg.force_secondary {
        info!("  yt-dlp forced for all downloads");
    }

    tokio::fs::create_dir_all(&cfg.temp_dir)
        .await
        .with_context(|| format!("Failed to create temp directory: {}", cfg.temp_dir.display()))?;

    info!("🔄 Checking for orphaned temp files...");
    let cleaned = temp::sweep_orphans(&cfg.temp_dir)
        .await
        .context("Failed to clean orphaned temp files on startup")?;
    info!("✅ Startup cleanup complete: {} orphaned temp file(s) removed", cleaned);

    check_tools(&cfg).await;

    let transport = Arc::new(JsonLinesTransport::new(tokio::io::stdout(), args.outbox.clone()));
    let router = build_router(&cfg, transport)?;

    let mut connector = JsonLinesConnector::new(|| BufReader::new(tokio::io::stdin()));
    let jobs = supervisor::run_session(&mut connector, &router).await?;

    info!("Waiting for {} job(s) to finish...", jobs.len());
    let mut failed = 0;
    for handle in jobs {
        let id = handle.id;
        if let JobOutcome::Failed(e) = handle.outcome().await {
            warn!("Job {} failed: {}", id, e);
            failed += 1;
        }
    }
    info!("Media bot stopped ({} failed job(s))", failed);

    Ok(())
}

fn build_router(cfg: &BotConfig, transport: Arc<dyn ChatTransport>) -> Result<Router> {
    let guard = Guard::new(&cfg.limits);
    let classifier = ErrorClassifier::new(&cfg.bot_block_pattern)
        .with_context(|| format!("Invalid bot_block_pattern: {}", cfg.bot_block_pattern))?;
    let primary = InnertubeExtractor::new(cfg.limits.user_agent.as_deref())
        .context("Failed to build primary extractor")?;
    let secondary = YtDlp {
        ytdlp_bin: cfg.ytdlp_bin.clone(),
        ffmpeg_bin: cfg.ffmpeg_bin.clone(),
        max_file_mb: cfg.limits.max_file_mb,
        max_duration_secs: cfg.limits.max_duration_secs,
    };
    let transcoder = Arc::new(FfmpegTranscoder::new(cfg.ffmpeg_bin.clone()));

    let acquirer = Acquirer::new(
        Arc::new(primary),
        Arc::new(secondary),
        transcoder.clone(),
        classifier,
        guard,
        cfg.force_secondary,
    );
    let pipeline = Arc::new(Pipeline::new(acquirer, transcoder, transport.clone(), guard, &cfg.temp_dir));
    let dispatcher = Arc::new(Dispatcher::start(pipeline, DispatchSettings::from_config(cfg)));

    Ok(Router::new(dispatcher, transport, cfg.limits.clone()))
}

/// Warn about missing external tools without refusing to start
async fn check_tools(cfg: &BotConfig) {
    match transcode::probe_tool(&cfg.ffmpeg_bin, "-version").await {
        Ok(version) => info!("🎬 {}", version),
        Err(e) => warn!("ffmpeg not usable, conversions will fail: {:#}", e),
    }
    match transcode::probe_tool(&cfg.ytdlp_bin, "--version").await {
        Ok(version) => info!("📦 yt-dlp {}", version),
        Err(e) => warn!("yt-dlp not usable, fallback downloads will fail: {:#}", e),
    }
}
