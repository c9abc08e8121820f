// Parallel segment downloader: a fixed worker pool feeding the ordered writer.
//
// Workers pull indices from a shared cursor, fetch with retry and insert into the
// SegmentBuffer. A single SegmentWriter task appends them to the output in index order.
// The job's stop flag is a CancellationToken set once every worker has finished, on a
// fatal append failure, or when the caller cancels.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::ParallelConfig;
use crate::error::DownloadError;
use crate::hls::appender::{FileAppender, file_size};
use crate::hls::buffer::{BufferRejection, BufferedSegment, SegmentBuffer};
use crate::hls::fetcher::{SegmentDownloader, fetch_with_retry};
use crate::hls::resume::{ResumeManifest, estimate_completed, playlist_fingerprint};
use crate::hls::retry::RetryError;
use crate::hls::writer::{ManifestSink, SegmentWriter, WriterExit};

/// One download invocation. Segment `i` (1-based) is `segment_urls[i - 1]`.
#[derive(Debug, Clone)]
pub struct SegmentJob {
    pub segment_urls: Vec<String>,
    pub output_path: PathBuf,
    pub referer: Option<String>,
}

impl SegmentJob {
    pub fn new(segment_urls: Vec<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            segment_urls,
            output_path: output_path.into(),
            referer: None,
        }
    }

    pub fn with_referer(mut self, referer: Option<String>) -> Self {
        self.referer = referer;
        self
    }

    pub fn total(&self) -> u64 {
        self.segment_urls.len() as u64
    }
}

/// Emitted by the writer after each appended segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Index just appended
    pub index: u64,
    /// Segments on disk, including those from a previous run
    pub completed: u64,
    pub total: u64,
    /// Bytes appended during this run
    pub bytes_written: u64,
}

pub type ProgressFn = Arc<dyn Fn(ProgressEvent) + Send + Sync + 'static>;

/// Where the starting point of a job came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeSource {
    /// No usable data on disk
    Fresh,
    /// A matching resume manifest
    Manifest,
    /// Existing file size divided by the size of a probed first segment
    Estimated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub total: u64,
    /// Segments already on disk when the job started
    pub resumed_from: u64,
    /// Segments appended by this job
    pub written: u64,
    pub bytes_written: u64,
    pub resume: ResumeSource,
}

struct ResumePlan {
    completed: u64,
    source: ResumeSource,
    manifest: Option<ManifestSink>,
}

struct WorkerContext {
    downloader: Arc<dyn SegmentDownloader>,
    buffer: Arc<SegmentBuffer>,
    urls: Vec<String>,
    referer: Option<String>,
    cursor: AtomicU64,
    total: u64,
    config: ParallelConfig,
    stop: CancellationToken,
}

pub struct ParallelSegmentDownloader {
    downloader: Arc<dyn SegmentDownloader>,
    config: ParallelConfig,
    progress: Option<ProgressFn>,
    cancel: CancellationToken,
}

impl ParallelSegmentDownloader {
    pub fn new(downloader: Arc<dyn SegmentDownloader>, config: ParallelConfig) -> Self {
        Self {
            downloader,
            config,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressFn>) -> Self {
        self.progress = progress;
        self
    }

    /// Cancelling `token` stops the job cooperatively; the partial file is kept.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &ParallelConfig {
        &self.config
    }

    pub async fn download(&self, job: &SegmentJob) -> Result<JobReport, DownloadError> {
        let total = job.total();
        if total == 0 {
            return Err(DownloadError::NoSegments {
                url: job.output_path.display().to_string(),
            });
        }
        let started = Instant::now();

        let plan = self.plan_resume(job, total).await?;
        let completed = plan.completed;
        if completed >= total {
            info!(
                output = %job.output_path.display(),
                total,
                "All segments already on disk, nothing to download"
            );
            self.remove_manifest(job);
            return Ok(JobReport {
                total,
                resumed_from: completed,
                written: 0,
                bytes_written: 0,
                resume: plan.source,
            });
        }

        if completed > 0 {
            info!(
                completed,
                total,
                source = ?plan.source,
                "Resuming download"
            );
        }

        let first_index = completed + 1;
        let buffer = Arc::new(SegmentBuffer::starting_at(
            self.config.buffer_capacity,
            first_index,
        ));
        let stop = self.cancel.child_token();

        let writer = SegmentWriter::new(
            Arc::clone(&buffer),
            job.output_path.clone(),
            total,
            first_index,
            stop.clone(),
            self.config.poll_interval,
        )
        .with_manifest(plan.manifest)
        .with_progress(self.progress.clone());
        let mut writer_handle = tokio::spawn(writer.run());

        let remaining = total - completed;
        let worker_count = self.config.max_workers.max(1).min(remaining as usize);
        let ctx = Arc::new(WorkerContext {
            downloader: Arc::clone(&self.downloader),
            buffer: Arc::clone(&buffer),
            urls: job.segment_urls.clone(),
            referer: job.referer.clone(),
            cursor: AtomicU64::new(first_index),
            total,
            config: self.config.clone(),
            stop: stop.clone(),
        });

        debug!(
            workers = worker_count,
            capacity = buffer.capacity(),
            first = first_index,
            total,
            "Starting segment workers"
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(run_worker(Arc::clone(&ctx), worker_id));
        }
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Segment worker panicked");
            }
        }

        // Every add has happened; an empty slot seen by the writer from now on is final.
        stop.cancel();

        let drain_timeout = self.config.writer_drain_timeout;
        let report = match tokio::time::timeout(drain_timeout, &mut writer_handle).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                return Err(DownloadError::Internal {
                    reason: format!("segment writer task failed: {e}"),
                });
            }
            Err(_) => {
                writer_handle.abort();
                error!(
                    timeout_secs = drain_timeout.as_secs(),
                    "Segment writer did not drain in time"
                );
                return Err(DownloadError::WriterStuck {
                    timeout_secs: drain_timeout.as_secs(),
                });
            }
        };

        let failed = buffer.failed();
        let written_total = completed + report.written;
        info!(
            written = report.written,
            bytes = report.bytes_written,
            failed = failed.len(),
            on_disk = written_total,
            total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Segment download finished"
        );

        match report.exit {
            WriterExit::Completed => {
                self.remove_manifest(job);
                Ok(JobReport {
                    total,
                    resumed_from: completed,
                    written: report.written,
                    bytes_written: report.bytes_written,
                    resume: plan.source,
                })
            }
            WriterExit::Failed { at, error } => match error {
                DownloadError::Integrity { .. } => Err(error),
                other => Err(DownloadError::WriterAborted {
                    index: at,
                    reason: other.to_string(),
                }),
            },
            WriterExit::Stalled { .. } | WriterExit::Stopped { .. }
                if self.cancel.is_cancelled() =>
            {
                warn!(on_disk = written_total, total, "Download cancelled");
                Err(DownloadError::Cancelled)
            }
            WriterExit::Stalled { .. } | WriterExit::Stopped { .. } if !failed.is_empty() => {
                error!(failed = ?failed, "Some segments could not be downloaded");
                Err(DownloadError::Incomplete {
                    failed,
                    written: written_total,
                    total,
                })
            }
            WriterExit::Stalled { at } | WriterExit::Stopped { at } => Err(DownloadError::Internal {
                reason: format!("writer stopped at segment {at} with no recorded failure"),
            }),
        }
    }

    async fn plan_resume(&self, job: &SegmentJob, total: u64) -> Result<ResumePlan, DownloadError> {
        let output = &job.output_path;
        let existing = file_size(output);
        let fingerprint = playlist_fingerprint(&job.segment_urls);
        let manifest_path = ResumeManifest::path_for(output);

        if existing > 0 && self.config.resume_manifest {
            if let Some(plan) =
                self.resume_from_manifest(job, total, existing, &fingerprint, &manifest_path)
                    .await?
            {
                return Ok(plan);
            }
        }

        let (completed, source) = if existing == 0 {
            (0, ResumeSource::Fresh)
        } else {
            let average = self.probe_average_size(job).await;
            let completed = estimate_completed(existing, average, total);
            info!(
                existing_bytes = existing,
                average_segment_bytes = average,
                completed,
                "Estimated resume point from file size"
            );
            (completed, ResumeSource::Estimated)
        };

        if completed == 0 && existing > 0 {
            warn!(
                output = %output.display(),
                existing_bytes = existing,
                "Restarting download from the first segment"
            );
            let path = output.clone();
            run_blocking(move || FileAppender.reset(&path)).await?;
        }

        let manifest = if self.config.resume_manifest {
            let mut manifest = ResumeManifest::new(total, fingerprint);
            if completed > 0 && completed < total {
                // Sizes of the inherited prefix are unknown; keep their sum equal to the file size
                let average = existing / completed;
                for _ in 1..completed {
                    manifest.record(average);
                }
                manifest.record(existing - average * (completed - 1));
            }
            self.start_manifest(manifest, manifest_path).await
        } else {
            None
        };

        Ok(ResumePlan {
            completed,
            source,
            manifest,
        })
    }

    async fn resume_from_manifest(
        &self,
        job: &SegmentJob,
        total: u64,
        existing: u64,
        fingerprint: &str,
        manifest_path: &std::path::Path,
    ) -> Result<Option<ResumePlan>, DownloadError> {
        let path = manifest_path.to_path_buf();
        let loaded = run_blocking(move || ResumeManifest::load(&path)).await;
        let manifest = match loaded {
            Ok(Some(manifest)) => manifest,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(path = %manifest_path.display(), error = %e, "Ignoring unreadable resume manifest");
                return Ok(None);
            }
        };

        if !manifest.matches(total, fingerprint) {
            warn!(path = %manifest_path.display(), "Resume manifest belongs to a different playlist, ignoring it");
            return Ok(None);
        }
        let recorded = manifest.recorded_bytes();
        if existing < recorded {
            warn!(
                existing_bytes = existing,
                recorded_bytes = recorded,
                "Output is shorter than the resume manifest records, ignoring it"
            );
            return Ok(None);
        }
        if existing > recorded {
            warn!(
                existing_bytes = existing,
                recorded_bytes = recorded,
                "Truncating partially appended segment"
            );
            let output = job.output_path.clone();
            run_blocking(move || FileAppender.truncate_to(&output, recorded)).await?;
        }

        let completed = manifest.completed();
        info!(completed, total, "Resume point taken from manifest");
        Ok(Some(ResumePlan {
            completed,
            source: ResumeSource::Manifest,
            manifest: Some(ManifestSink {
                manifest,
                path: manifest_path.to_path_buf(),
            }),
        }))
    }

    /// Download the first segment once, only to measure it.
    async fn probe_average_size(&self, job: &SegmentJob) -> u64 {
        let Some(url) = job.segment_urls.first() else {
            return 0;
        };
        match self
            .downloader
            .fetch_segment(url, job.referer.as_deref())
            .await
        {
            Ok(data) => data.len() as u64,
            Err(e) => {
                warn!(url = %url, kind = e.kind(), error = %e, "Resume probe failed, restarting from scratch");
                0
            }
        }
    }

    async fn start_manifest(&self, manifest: ResumeManifest, path: PathBuf) -> Option<ManifestSink> {
        let sink = ManifestSink { manifest, path };
        let stored = tokio::task::spawn_blocking(move || {
            let result = sink.manifest.store(&sink.path);
            (sink, result)
        })
        .await;
        match stored {
            Ok((sink, Ok(()))) => Some(sink),
            Ok((sink, Err(e))) => {
                warn!(path = %sink.path.display(), error = %e, "Could not create resume manifest");
                None
            }
            Err(e) => {
                warn!(error = %e, "Resume manifest task failed");
                None
            }
        }
    }

    fn remove_manifest(&self, job: &SegmentJob) {
        if self.config.resume_manifest {
            ResumeManifest::remove(&ResumeManifest::path_for(&job.output_path));
        }
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, DownloadError>
where
    F: FnOnce() -> Result<T, DownloadError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DownloadError::Internal {
            reason: format!("blocking file task failed: {e}"),
        })?
}

async fn run_worker(ctx: Arc<WorkerContext>, worker_id: usize) {
    trace!(worker_id, "Segment worker started");
    loop {
        if ctx.stop.is_cancelled() {
            break;
        }
        let index = ctx.cursor.fetch_add(1, Ordering::SeqCst);
        if index > ctx.total {
            break;
        }
        if !wait_for_admission(&ctx, index).await {
            break;
        }

        let url = &ctx.urls[(index - 1) as usize];
        let fetched = fetch_with_retry(
            ctx.downloader.as_ref(),
            index,
            url,
            ctx.referer.as_deref(),
            &ctx.config.retry,
            &ctx.stop,
        )
        .await;

        match fetched {
            Ok(data) => {
                if !insert(&ctx, BufferedSegment::new(index, data)).await {
                    break;
                }
            }
            Err(RetryError::Cancelled) => break,
            Err(RetryError::Failed { attempts, error }) => {
                error!(
                    worker_id,
                    index,
                    attempts,
                    kind = error.kind(),
                    error = %error,
                    "Failed to download segment"
                );
                ctx.buffer.mark_failed(index);
            }
        }
    }
    trace!(worker_id, "Segment worker finished");
}

/// Wait until the buffer has room reserved for `index`. False if the job was stopped.
async fn wait_for_admission(ctx: &WorkerContext, index: u64) -> bool {
    loop {
        let notified = ctx.buffer.space_freed().notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if ctx.buffer.admits(index) {
            return true;
        }
        if ctx.stop.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = &mut notified => {}
            _ = ctx.stop.cancelled() => return false,
            _ = tokio::time::sleep(ctx.config.poll_interval) => {}
        }
    }
}

/// Insert a segment, waiting while the buffer is full. False if the job was stopped.
async fn insert(ctx: &WorkerContext, segment: BufferedSegment) -> bool {
    let mut segment = segment;
    loop {
        let notified = ctx.buffer.space_freed().notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        match ctx.buffer.add(segment) {
            Ok(()) => return true,
            Err(BufferRejection::Full(rejected)) => {
                trace!(index = rejected.index, "Buffer full, waiting for writer");
                segment = rejected;
            }
            Err(BufferRejection::Duplicate(rejected)) => {
                warn!(index = rejected.index, "Segment already buffered, dropping duplicate");
                return true;
            }
            Err(BufferRejection::Closed(rejected)) => {
                debug!(index = rejected.index, "Writer no longer consuming, discarding segment");
                return true;
            }
        }

        tokio::select! {
            _ = &mut notified => {}
            _ = ctx.stop.cancelled() => return false,
            _ = tokio::time::sleep(ctx.config.poll_interval) => {}
        }
    }
}
