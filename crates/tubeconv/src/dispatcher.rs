//! Job queue and per-job pipeline.
//!
//! A single admission task pulls jobs off an unbounded channel in submission
//! order and waits for a semaphore permit before spawning each one, so at
//! most `max_concurrency` jobs run and admission stays FIFO. The number of
//! jobs waiting for a permit is capped by `max_queue_depth`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use humansize::{format_size, DECIMAL};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use crate::acquire::Acquirer;
use crate::config::BotConfig;
use crate::error::MediaError;
use crate::guard::Guard;
use crate::job::{JobKind, JobOutcome, JobRequest, JobSource, JobState};
use crate::links::safe_name;
use crate::media::{MediaAsset, MediaKind};
use crate::temp::TempSet;
use crate::transcode::Transcoder;
use crate::transport::{ChatTransport, OutboundContent, ReplyTarget};

/// Content type used for every delivered audio file
pub const AUDIO_MIME: &str = "audio/mp4";

pub const ACK_TEXT: &str = "⏳ Processing, please wait...";

/// Queue sizing and deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    pub max_concurrency: usize,
    pub max_queue_depth: Option<usize>,
    pub job_timeout: Option<Duration>,
}

impl DispatchSettings {
    pub fn from_config(cfg: &BotConfig) -> Self {
        DispatchSettings {
            max_concurrency: cfg.limits.max_concurrency.max(1),
            max_queue_depth: cfg.max_queue_depth,
            job_timeout: cfg.job_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Runs one job from acknowledgement to cleanup
pub struct Pipeline {
    acquirer: Acquirer,
    transcoder: Arc<dyn Transcoder>,
    transport: Arc<dyn ChatTransport>,
    guard: Guard,
    temp_dir: PathBuf,
}

impl Pipeline {
    pub fn new(
        acquirer: Acquirer,
        transcoder: Arc<dyn Transcoder>,
        transport: Arc<dyn ChatTransport>,
        guard: Guard,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Pipeline {
            acquirer,
            transcoder,
            transport,
            guard,
            temp_dir: temp_dir.into(),
        }
    }

    pub fn transport(&self) -> &Arc<dyn ChatTransport> {
        &self.transport
    }

    /// Run `job` to a terminal outcome
    ///
    /// Never fails: errors become a failure reply. Every temp file the job
    /// allocated is removed before this returns, whatever the outcome.
    pub async fn execute(&self, job: &JobRequest, timeout: Option<Duration>) -> JobOutcome {
        let started = Instant::now();
        info!("▶️  Job {} running ({})", job.id, job.kind);

        let mut temps = TempSet::new(&self.temp_dir);
        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.run(job, &mut temps)).await {
                Ok(result) => result,
                Err(_) => Err(MediaError::TimedOut(limit.as_secs())),
            },
            None => self.run(job, &mut temps).await,
        };
        temps.release_all().await;

        let outcome = match result {
            Ok(()) => JobOutcome::Delivered,
            Err(e) => {
                if e.is_rejection() {
                    info!("🚫 Job {} rejected: {}", job.id, e);
                } else {
                    error!("❌ Job {} failed: {}", job.id, e);
                }
                self.reply_text(&job.reply, format!("❌ Failed: {}", e.user_message()))
                    .await;
                JobOutcome::from_error(e)
            }
        };

        info!(
            "Job {} finished as {:?} in {:.1}s",
            job.id,
            outcome.state(),
            started.elapsed().as_secs_f64()
        );
        outcome
    }

    async fn run(&self, job: &JobRequest, temps: &mut TempSet) -> Result<(), MediaError> {
        self.reply_text(&job.reply, ACK_TEXT.to_string()).await;

        let target = job.kind.output_kind();
        let (asset, file_name) = match &job.source {
            JobSource::Remote(url) => {
                if !job.kind.is_remote() {
                    return Err(MediaError::InvalidSource(format!("{} needs an attachment", job.kind)));
                }
                let acquired = self.acquirer.fetch_remote(url, target, temps).await?;
                let fallback = match target {
                    MediaKind::Audio => "audio",
                    MediaKind::Video => "video",
                };
                let name = safe_name(acquired.title.as_deref(), fallback, target.extension());
                (acquired.asset, name)
            }
            JobSource::Inbound(message) => {
                let media = self
                    .acquirer
                    .fetch_inbound(message, self.transport.as_ref(), temps)
                    .await?;
                let expected = job.kind.required_input().ok_or_else(|| {
                    MediaError::InvalidSource(format!("{} needs a link", job.kind))
                })?;
                if media.kind != expected {
                    return Err(MediaError::WrongMediaKind {
                        expected,
                        actual: media.kind,
                    });
                }
                let asset = MediaAsset {
                    path: media.path,
                    kind: expected.media_kind().unwrap_or(target),
                    container: expected.extension().to_string(),
                    size_bytes: media.size_bytes,
                };
                (asset, format!("output.{}", target.extension()))
            }
        };
        debug!("Job {} acquired {} ({} bytes)", job.id, asset.path.display(), asset.size_bytes);

        let mut size = self.guard.check_size(&asset.path).await?;

        let final_path = if needs_transcode(job.kind, &asset) {
            let out = temps.allocate(target.extension());
            info!("🎛️  Job {} transcoding {} -> {}", job.id, asset.container, target.extension());
            match target {
                MediaKind::Audio => self.transcoder.to_audio_only(&asset.path, &out).await?,
                MediaKind::Video => self.transcoder.to_video(&asset.path, &out).await?,
            }
            size = self.guard.check_size(&out).await?;
            out
        } else {
            asset.path
        };

        let content = match target {
            MediaKind::Audio => OutboundContent::Audio {
                path: final_path,
                file_name: file_name.clone(),
                mime_type: AUDIO_MIME.to_string(),
            },
            MediaKind::Video => OutboundContent::Video {
                path: final_path,
                caption: format!("✅ {}", file_name),
            },
        };
        self.transport
            .send(&job.reply, content)
            .await
            .map_err(|e| MediaError::DeliveryFailed(format!("{:#}", e)))?;

        info!("📤 Job {} delivered {} ({})", job.id, file_name, format_size(size, DECIMAL));
        Ok(())
    }

    async fn reply_text(&self, target: &ReplyTarget, text: String) {
        if let Err(e) = self.transport.send(target, OutboundContent::Text(text)).await {
            warn!("Failed to send reply to {}: {:#}", target.chat, e);
        }
    }
}

/// Whether the acquired asset must go through ffmpeg before delivery
fn needs_transcode(kind: JobKind, asset: &MediaAsset) -> bool {
    match kind {
        JobKind::ConvertToAudio | JobKind::ConvertToVideo => true,
        JobKind::FetchAudio | JobKind::FetchVideo => {
            asset.kind != kind.output_kind() || !asset.is_delivery_container()
        }
    }
}

struct QueuedJob {
    request: JobRequest,
    done: oneshot::Sender<JobOutcome>,
}

/// Receipt for a submitted job
#[derive(Debug)]
pub struct JobHandle {
    pub id: Uuid,
    outcome: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    /// Wait for the job to reach a terminal state
    pub async fn outcome(self) -> JobOutcome {
        match self.outcome.await {
            Ok(outcome) => outcome,
            Err(_) => JobOutcome::Failed(MediaError::Interrupted(format!(
                "job {} stopped without an outcome",
                self.id
            ))),
        }
    }
}

/// Process-wide bounded FIFO job queue
pub struct Dispatcher {
    queue: mpsc::UnboundedSender<QueuedJob>,
    pending: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
    settings: DispatchSettings,
}

impl Dispatcher {
    /// Start the admission task; must be called inside a Tokio runtime
    pub fn start(pipeline: Arc<Pipeline>, settings: DispatchSettings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));

        tokio::spawn(admission_loop(
            rx,
            pipeline,
            Arc::new(Semaphore::new(settings.max_concurrency.max(1))),
            pending.clone(),
            running.clone(),
            settings.job_timeout,
        ));

        info!(
            "🚀 Dispatcher started (concurrency {}, queue depth {}, timeout {})",
            settings.max_concurrency,
            settings.max_queue_depth.map(|d| d.to_string()).unwrap_or_else(|| "unbounded".to_string()),
            settings.job_timeout.map(|d| format!("{}s", d.as_secs())).unwrap_or_else(|| "none".to_string())
        );

        Dispatcher {
            queue: tx,
            pending,
            running,
            settings,
        }
    }

    /// Queue `request`; fails with `QueueFull` when too many jobs are waiting
    pub fn submit(&self, request: JobRequest) -> Result<JobHandle, MediaError> {
        let waiting = self.pending.fetch_add(1, Ordering::SeqCst);
        if let Some(max) = self.settings.max_queue_depth {
            if waiting >= max {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                warn!("Queue full ({} waiting), refusing job {}", waiting, request.id);
                return Err(MediaError::QueueFull { pending: waiting });
            }
        }

        let id = request.id;
        let (done, outcome) = oneshot::channel();
        info!("📥 Job {} admitted ({}), {} waiting ahead", id, request.kind, waiting);
        debug!("Job {} state {:?}", id, JobState::Queued);

        if self.queue.send(QueuedJob { request, done }).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(MediaError::Interrupted("dispatcher stopped".to_string()));
        }

        Ok(JobHandle { id, outcome })
    }

    /// Jobs waiting for a slot
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Jobs currently running
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> DispatchSettings {
        self.settings
    }
}

/// A running job's share of the queue, given back when dropped
///
/// Dropping also runs when the job task panics, so `running` cannot drift.
struct RunningSlot {
    running: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl RunningSlot {
    fn new(running: Arc<AtomicUsize>, permit: OwnedSemaphorePermit) -> Self {
        running.fetch_add(1, Ordering::SeqCst);
        RunningSlot {
            running,
            _permit: permit,
        }
    }
}

impl Drop for RunningSlot {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn admission_loop(
    mut rx: mpsc::UnboundedReceiver<QueuedJob>,
    pipeline: Arc<Pipeline>,
    slots: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
    job_timeout: Option<Duration>,
) {
    while let Some(queued) = rx.recv().await {
        let permit = match slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        pending.fetch_sub(1, Ordering::SeqCst);
        let slot = RunningSlot::new(running.clone(), permit);

        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            let QueuedJob { request, done } = queued;
            debug!("Job {} state {:?}", request.id, JobState::Running);
            let outcome = pipeline.execute(&request, job_timeout).await;
            drop(slot);
            let _ = done.send(outcome);
        });
    }
    debug!("Admission loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use crate::extractor::ErrorClassifier;
    use crate::message::AttachmentKind;
    use crate::testing::*;

    struct Harness {
        dir: tempfile::TempDir,
        primary: Arc<ScriptedPrimary>,
        secondary: Arc<ScriptedSecondary>,
        transcoder: Arc<FakeTranscoder>,
        transport: Arc<RecordingTransport>,
        pipeline: Arc<Pipeline>,
    }

    fn harness_with(
        primary: ScriptedPrimary,
        secondary: ScriptedSecondary,
        transcoder: FakeTranscoder,
        transport: RecordingTransport,
        limits: Limits,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let primary = Arc::new(primary);
        let secondary = Arc::new(secondary);
        let transcoder = Arc::new(transcoder);
        let transport = Arc::new(transport);
        let guard = Guard::new(&limits);
        let acquirer = Acquirer::new(
            primary.clone(),
            secondary.clone(),
            transcoder.clone(),
            ErrorClassifier::default(),
            guard,
            false,
        );
        let pipeline = Arc::new(Pipeline::new(
            acquirer,
            transcoder.clone(),
            transport.clone(),
            guard,
            dir.path(),
        ));
        Harness {
            dir,
            primary,
            secondary,
            transcoder,
            transport,
            pipeline,
        }
    }

    fn harness(primary: ScriptedPrimary) -> Harness {
        harness_with(
            primary,
            ScriptedSecondary::succeeding(4096),
            FakeTranscoder::new(2048),
            RecordingTransport::new(),
            Limits::default(),
        )
    }

    fn leftover_files(h: &Harness) -> Vec<PathBuf> {
        std::fs::read_dir(h.dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect()
    }

    fn settings(max_concurrency: usize) -> DispatchSettings {
        DispatchSettings {
            max_concurrency,
            max_queue_depth: None,
            job_timeout: None,
        }
    }

    #[tokio::test]
    async fn test_ytmp3_scenario() {
        let h = harness(ScriptedPrimary::new(video_info(120)));
        let msg = text_message(".ytmp3 https://example.com/watch?v=abc&si=TRACK");
        let job = JobRequest::remote(JobKind::FetchAudio, "https://example.com/watch?v=abc&si=TRACK", &msg);

        let outcome = h.pipeline.execute(&job, None).await;

        assert!(matches!(outcome, JobOutcome::Delivered));
        assert_eq!(h.primary.info_urls(), vec!["https://example.com/watch?v=abc".to_string()]);
        assert_eq!(h.transcoder.calls(), vec!["audio"]);
        assert_eq!(h.secondary.call_count(), 0);

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].content, OutboundContent::Text(ACK_TEXT.to_string()));
        assert_eq!(sent[1].quoted_id, msg.key.id);
        assert_eq!(sent[1].chat, "chat-1");
        match &sent[1].content {
            OutboundContent::Audio { file_name, mime_type, .. } => {
                assert_eq!(file_name, "Test Video.mp3");
                assert_eq!(mime_type, AUDIO_MIME);
            }
            other => panic!("expected audio, got {:?}", other),
        }
        assert!(sent[1].file_existed);
        assert!(leftover_files(&h).is_empty());
    }

    #[tokio::test]
    async fn test_bot_error_scenario_uses_ytdlp_audio() {
        let h = harness(ScriptedPrimary::failing_info("ERROR: Sign in to confirm you're not a bot"));
        let msg = text_message(".ytmp3 https://example.com/watch?v=abc");
        let job = JobRequest::remote(JobKind::FetchAudio, "https://example.com/watch?v=abc", &msg);

        let outcome = h.pipeline.execute(&job, None).await;

        assert!(matches!(outcome, JobOutcome::Delivered));
        let calls = h.secondary.calls();
        assert_eq!(calls.len(), 1);
        let fmt = calls[0].args.iter().position(|a| a == "--audio-format").unwrap();
        assert_eq!(calls[0].args[fmt + 1], "mp3");
        // yt-dlp already produced mp3, no second pass
        assert!(h.transcoder.calls().is_empty());
        match &h.transport.sent()[1].content {
            OutboundContent::Audio { mime_type, file_name, .. } => {
                assert_eq!(mime_type, "audio/mp4");
                assert_eq!(file_name, "audio.mp3");
            }
            other => panic!("expected audio, got {:?}", other),
        }
        assert!(leftover_files(&h).is_empty());
    }

    #[tokio::test]
    async fn test_non_bot_error_never_falls_back() {
        let h = harness(ScriptedPrimary::failing_info("This video is private"));
        let msg = text_message(".ytmp4 https://example.com/watch?v=abc");
        let job = JobRequest::remote(JobKind::FetchVideo, "https://example.com/watch?v=abc", &msg);

        let outcome = h.pipeline.execute(&job, None).await;

        assert!(matches!(outcome, JobOutcome::Failed(MediaError::AcquisitionFailed(_))));
        assert_eq!(h.secondary.call_count(), 0);
        let texts = h.transport.texts();
        assert_eq!(texts.len(), 2);
        assert!(texts[1].starts_with("❌ Failed: "));
        assert!(leftover_files(&h).is_empty());
    }

    #[tokio::test]
    async fn test_failed_fallback_cleans_up_intermediates() {
        let h = harness_with(
            ScriptedPrimary::failing_info("Sign in to confirm you’re not a bot"),
            ScriptedSecondary::failing("yt-dlp failed (exit code 1): ERROR: unable to download video data"),
            FakeTranscoder::new(2048),
            RecordingTransport::new(),
            Limits::default(),
        );
        let msg = text_message(".ytmp4 https://example.com/watch?v=abc");
        let job = JobRequest::remote(JobKind::FetchVideo, "https://example.com/watch?v=abc", &msg);

        let outcome = h.pipeline.execute(&job, None).await;

        assert!(matches!(outcome, JobOutcome::Failed(MediaError::AcquisitionFailed(_))));
        assert_eq!(h.secondary.call_count(), 1);
        assert!(h.transcoder.calls().is_empty());
        assert!(h.transport.texts()[1].starts_with("❌ Failed: Download failed"));
        assert!(leftover_files(&h).is_empty());
    }

    #[tokio::test]
    async fn test_duration_rejection_writes_nothing() {
        let h = harness(ScriptedPrimary::new(video_info(901)));
        let msg = text_message(".ytmp4 https://example.com/watch?v=abc");
        let job = JobRequest::remote(JobKind::FetchVideo, "https://example.com/watch?v=abc", &msg);

        let outcome = h.pipeline.execute(&job, None).await;

        assert!(matches!(outcome, JobOutcome::Rejected(MediaError::DurationExceeded { .. })));
        assert_eq!(h.primary.download_count(), 0);
        assert!(leftover_files(&h).is_empty());
        assert!(h.transport.texts()[1].contains("Video too long: 15.0 min > 15.0 min"));
    }

    #[tokio::test]
    async fn test_size_rejection_still_removes_file() {
        let h = harness_with(
            ScriptedPrimary::new(video_info(60)).with_download_bytes(1024 * 1024 + 1),
            ScriptedSecondary::succeeding(1),
            FakeTranscoder::new(10),
            RecordingTransport::new(),
            Limits {
                max_file_mb: 1,
                ..Limits::default()
            },
        );
        let msg = text_message(".ytmp4 https://example.com/watch?v=abc");
        let job = JobRequest::remote(JobKind::FetchVideo, "https://example.com/watch?v=abc", &msg);

        let outcome = h.pipeline.execute(&job, None).await;

        assert!(matches!(
            outcome,
            JobOutcome::Rejected(MediaError::SizeExceeded { size_bytes: 1_048_577, limit_mb: 1 })
        ));
        assert_eq!(h.primary.download_count(), 1);
        assert!(leftover_files(&h).is_empty());
    }

    #[tokio::test]
    async fn test_transcoded_output_is_size_checked() {
        let h = harness_with(
            ScriptedPrimary::new(video_info(60)),
            ScriptedSecondary::succeeding(1),
            FakeTranscoder::new(1024 * 1024 + 5),
            RecordingTransport::new(),
            Limits {
                max_file_mb: 1,
                ..Limits::default()
            },
        );
        let msg = text_message(".ytmp3 https://example.com/watch?v=abc");
        let job = JobRequest::remote(JobKind::FetchAudio, "https://example.com/watch?v=abc", &msg);

        let outcome = h.pipeline.execute(&job, None).await;

        assert!(matches!(outcome, JobOutcome::Rejected(MediaError::SizeExceeded { .. })));
        assert_eq!(h.transcoder.calls(), vec!["audio"]);
        assert!(leftover_files(&h).is_empty());
    }

    #[tokio::test]
    async fn test_to_mp3_on_audio_is_wrong_kind_and_cleaned() {
        let h = harness_with(
            ScriptedPrimary::new(video_info(60)),
            ScriptedSecondary::succeeding(1),
            FakeTranscoder::new(10),
            RecordingTransport::new().with_media("voice-note", 500),
            Limits::default(),
        );
        let msg = message_with_media(".to_mp3", None, Some(attachment(AttachmentKind::Audio, "voice-note")));
        let job = JobRequest::inbound(JobKind::ConvertToAudio, &msg);

        let outcome = h.pipeline.execute(&job, None).await;

        assert!(matches!(
            outcome,
            JobOutcome::Rejected(MediaError::WrongMediaKind {
                expected: AttachmentKind::Video,
                actual: AttachmentKind::Audio
            })
        ));
        assert!(h.transcoder.calls().is_empty());
        assert!(leftover_files(&h).is_empty());
    }

    #[tokio::test]
    async fn test_to_mp4_converts_quoted_audio() {
        let h = harness_with(
            ScriptedPrimary::new(video_info(60)),
            ScriptedSecondary::succeeding(1),
            FakeTranscoder::new(4000),
            RecordingTransport::new().with_media("song", 3000),
            Limits::default(),
        );
        let msg = message_with_media(".to_mp4", None, Some(attachment(AttachmentKind::Audio, "song")));
        let job = JobRequest::inbound(JobKind::ConvertToVideo, &msg);

        let outcome = h.pipeline.execute(&job, None).await;

        assert!(matches!(outcome, JobOutcome::Delivered));
        assert_eq!(h.transcoder.calls(), vec!["video"]);
        match &h.transport.sent()[1].content {
            OutboundContent::Video { caption, .. } => assert!(caption.contains("output.mp4")),
            other => panic!("expected video, got {:?}", other),
        }
        assert!(leftover_files(&h).is_empty());
    }

    #[tokio::test]
    async fn test_transcode_failure_cleans_partial_output() {
        let h = harness_with(
            ScriptedPrimary::new(video_info(60)),
            ScriptedSecondary::succeeding(1),
            FakeTranscoder::failing("Invalid data found when processing input"),
            RecordingTransport::new().with_media("clip", 3000),
            Limits::default(),
        );
        let msg = message_with_media(".to_mp3", Some(attachment(AttachmentKind::Video, "clip")), None);
        let job = JobRequest::inbound(JobKind::ConvertToAudio, &msg);

        let outcome = h.pipeline.execute(&job, None).await;

        assert!(matches!(outcome, JobOutcome::Failed(MediaError::TranscodeFailed(_))));
        assert!(leftover_files(&h).is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failure_is_reported() {
        let h = harness_with(
            ScriptedPrimary::new(video_info(60)),
            ScriptedSecondary::succeeding(1),
            FakeTranscoder::new(10),
            RecordingTransport::new().failing_media_sends(),
            Limits::default(),
        );
        let msg = text_message(".ytmp4 https://example.com/watch?v=abc");
        let job = JobRequest::remote(JobKind::FetchVideo, "https://example.com/watch?v=abc", &msg);

        let outcome = h.pipeline.execute(&job, None).await;

        assert!(matches!(outcome, JobOutcome::Failed(MediaError::DeliveryFailed(_))));
        assert!(h.transport.texts().last().unwrap().starts_with("❌ Failed: "));
        assert!(leftover_files(&h).is_empty());
    }

    #[tokio::test]
    async fn test_timeout_cleans_up() {
        let h = harness(ScriptedPrimary::new(video_info(60)).with_delay(Duration::from_secs(5)));
        let msg = text_message(".ytmp3 https://example.com/watch?v=abc");
        let job = JobRequest::remote(JobKind::FetchAudio, "https://example.com/watch?v=abc", &msg);

        let outcome = h.pipeline.execute(&job, Some(Duration::from_millis(50))).await;

        assert!(matches!(outcome, JobOutcome::Failed(MediaError::TimedOut(0))));
        assert!(leftover_files(&h).is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_ceiling() {
        let h = harness(ScriptedPrimary::new(video_info(60)).with_delay(Duration::from_millis(40)));
        let dispatcher = Dispatcher::start(h.pipeline.clone(), settings(2));
        let msg = text_message(".ytmp4 https://example.com/watch?v=abc");

        let handles: Vec<_> = (0..6)
            .map(|_| {
                dispatcher
                    .submit(JobRequest::remote(JobKind::FetchVideo, "https://example.com/watch?v=abc", &msg))
                    .unwrap()
            })
            .collect();
        for handle in handles {
            assert!(matches!(handle.outcome().await, JobOutcome::Delivered));
        }

        assert_eq!(h.primary.max_running(), 2);
        assert_eq!(dispatcher.running(), 0);
        assert_eq!(dispatcher.pending(), 0);
        assert!(leftover_files(&h).is_empty());
    }

    #[tokio::test]
    async fn test_panicking_job_gives_its_slot_back() {
        let h = harness_with(
            ScriptedPrimary::new(video_info(60)),
            ScriptedSecondary::succeeding(1),
            FakeTranscoder::panicking(),
            RecordingTransport::new(),
            Limits::default(),
        );
        let dispatcher = Dispatcher::start(h.pipeline.clone(), settings(1));
        let msg = text_message(".ytmp3 https://example.com/watch?v=abc");
        let job = || JobRequest::remote(JobKind::FetchAudio, "https://example.com/watch?v=abc", &msg);

        let first = dispatcher.submit(job()).unwrap();
        let second = dispatcher.submit(job()).unwrap();

        // With one slot the second job only runs if the first gave its permit back
        let outcomes = tokio::time::timeout(Duration::from_secs(5), async {
            (first.outcome().await, second.outcome().await)
        })
        .await
        .expect("second job never ran");
        for outcome in [outcomes.0, outcomes.1] {
            match outcome {
                JobOutcome::Failed(MediaError::Interrupted(reason)) => {
                    assert!(reason.contains("without an outcome"))
                }
                other => panic!("expected interrupted job, got {:?}", other),
            }
        }

        tokio::time::timeout(Duration::from_secs(1), async {
            while dispatcher.running() != 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("running count never returned to zero");
        assert_eq!(h.transcoder.calls(), vec!["audio", "audio"]);
        assert!(leftover_files(&h).is_empty());
    }

    #[tokio::test]
    async fn test_single_slot_runs_jobs_one_at_a_time_in_order() {
        let h = harness(ScriptedPrimary::new(video_info(60)).with_delay(Duration::from_millis(10)));
        let dispatcher = Dispatcher::start(h.pipeline.clone(), settings(1));

        let urls: Vec<String> = (0..4).map(|i| format!("https://example.com/watch?v=job{}", i)).collect();
        let handles: Vec<_> = urls
            .iter()
            .map(|url| {
                let msg = text_message(&format!(".ytmp4 {}", url));
                dispatcher.submit(JobRequest::remote(JobKind::FetchVideo, url.clone(), &msg)).unwrap()
            })
            .collect();
        for handle in handles {
            handle.outcome().await;
        }

        assert_eq!(h.primary.max_running(), 1);
        assert_eq!(h.primary.info_urls(), urls);
    }

    #[tokio::test]
    async fn test_queue_full() {
        let h = harness(ScriptedPrimary::new(video_info(60)).with_delay(Duration::from_millis(200)));
        let dispatcher = Dispatcher::start(
            h.pipeline.clone(),
            DispatchSettings {
                max_concurrency: 1,
                max_queue_depth: Some(2),
                job_timeout: None,
            },
        );
        let msg = text_message(".ytmp4 https://example.com/watch?v=abc");
        let job = || JobRequest::remote(JobKind::FetchVideo, "https://example.com/watch?v=abc", &msg);

        // Nothing has been admitted yet, so all three submissions count as waiting
        let first = dispatcher.submit(job()).unwrap();
        let second = dispatcher.submit(job()).unwrap();
        let third = dispatcher.submit(job());
        assert!(matches!(third, Err(MediaError::QueueFull { pending: 2 })));

        first.outcome().await;
        second.outcome().await;
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn test_needs_transcode() {
        let asset = |kind, container: &str| MediaAsset {
            path: PathBuf::from("/tmp/x"),
            kind,
            container: container.to_string(),
            size_bytes: 1,
        };
        assert!(needs_transcode(JobKind::FetchAudio, &asset(MediaKind::Audio, "webm")));
        assert!(!needs_transcode(JobKind::FetchAudio, &asset(MediaKind::Audio, "mp3")));
        assert!(!needs_transcode(JobKind::FetchVideo, &asset(MediaKind::Video, "mp4")));
        assert!(needs_transcode(JobKind::ConvertToAudio, &asset(MediaKind::Video, "mp4")));
    }
}
