// Ordered segment writer: the only task that touches the output file during a job.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::DownloadError;
use crate::hls::appender::FileAppender;
use crate::hls::buffer::{BufferedSegment, SegmentBuffer};
use crate::hls::downloader::{ProgressEvent, ProgressFn};
use crate::hls::resume::ResumeManifest;

/// How the writer loop ended.
#[derive(Debug)]
pub enum WriterExit {
    /// Every segment up to `total` was appended.
    Completed,
    /// The next expected segment was recorded as failed; nothing after it can be written.
    Stalled { at: u64 },
    /// The stop flag was set and the next expected segment never arrived.
    Stopped { at: u64 },
    /// An append failed at `at`. The stop flag has been set.
    Failed { at: u64, error: DownloadError },
}

#[derive(Debug)]
pub struct WriterReport {
    pub exit: WriterExit,
    /// Segments appended during this run
    pub written: u64,
    /// Bytes appended during this run
    pub bytes_written: u64,
    /// Index the writer would have written next
    pub next_index: u64,
}

/// Manifest kept in step with the output file.
#[derive(Debug)]
pub struct ManifestSink {
    pub manifest: ResumeManifest,
    pub path: PathBuf,
}

pub struct SegmentWriter {
    buffer: Arc<SegmentBuffer>,
    output: PathBuf,
    total: u64,
    next_index: u64,
    stop: CancellationToken,
    poll_interval: Duration,
    appender: FileAppender,
    manifest: Option<ManifestSink>,
    progress: Option<ProgressFn>,
    written: u64,
    bytes_written: u64,
    last_logged_step: u64,
}

impl SegmentWriter {
    pub fn new(
        buffer: Arc<SegmentBuffer>,
        output: PathBuf,
        total: u64,
        first_index: u64,
        stop: CancellationToken,
        poll_interval: Duration,
    ) -> Self {
        Self {
            buffer,
            output,
            total,
            next_index: first_index,
            stop,
            poll_interval,
            appender: FileAppender,
            manifest: None,
            progress: None,
            written: 0,
            bytes_written: 0,
            last_logged_step: (first_index.saturating_sub(1) * 10) / total.max(1),
        }
    }

    pub fn with_manifest(mut self, manifest: Option<ManifestSink>) -> Self {
        self.manifest = manifest;
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressFn>) -> Self {
        self.progress = progress;
        self
    }

    pub async fn run(mut self) -> WriterReport {
        debug!(
            output = %self.output.display(),
            first = self.next_index,
            total = self.total,
            "Segment writer started"
        );

        let exit = loop {
            if self.next_index > self.total {
                break WriterExit::Completed;
            }

            // Read the flag before looking at the slot: once it is set no further adds happen,
            // so an empty slot after a set flag is final.
            let stopped = self.stop.is_cancelled();

            if let Some(segment) = self.buffer.take(self.next_index) {
                let at = segment.index;
                if let Err(error) = self.write(segment).await {
                    error!(index = at, error = %error, "Failed to append segment, aborting job");
                    self.buffer.close();
                    self.stop.cancel();
                    break WriterExit::Failed { at, error };
                }
                continue;
            }

            if self.buffer.is_failed(self.next_index) {
                warn!(
                    index = self.next_index,
                    "Segment failed to download, writer cannot advance"
                );
                self.buffer.close();
                break WriterExit::Stalled {
                    at: self.next_index,
                };
            }

            if stopped {
                break WriterExit::Stopped {
                    at: self.next_index,
                };
            }

            tokio::select! {
                _ = self.buffer.segment_ready().notified() => {}
                _ = self.stop.cancelled() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        };

        debug!(
            written = self.written,
            bytes = self.bytes_written,
            next = self.next_index,
            "Segment writer finished"
        );

        WriterReport {
            exit,
            written: self.written,
            bytes_written: self.bytes_written,
            next_index: self.next_index,
        }
    }

    async fn write(&mut self, segment: BufferedSegment) -> Result<(), DownloadError> {
        let appender = self.appender;
        let output = self.output.clone();
        let data = segment.data;
        let size = data.len() as u64;

        tokio::task::spawn_blocking(move || appender.append(&data, &output))
            .await
            .map_err(|e| DownloadError::Internal {
                reason: format!("append task failed: {e}"),
            })??;

        self.written += 1;
        self.bytes_written += size;
        self.record_in_manifest(size).await;
        self.next_index += 1;
        self.report_progress(segment.index);
        Ok(())
    }

    async fn record_in_manifest(&mut self, size: u64) {
        let Some(mut sink) = self.manifest.take() else {
            return;
        };
        sink.manifest.record(size);

        let stored = tokio::task::spawn_blocking(move || {
            let result = sink.manifest.store(&sink.path);
            (sink, result)
        })
        .await;

        match stored {
            Ok((sink, Ok(()))) => self.manifest = Some(sink),
            Ok((sink, Err(e))) => {
                warn!(
                    path = %sink.path.display(),
                    error = %e,
                    "Failed to update resume manifest, continuing without it"
                );
            }
            Err(e) => warn!(error = %e, "Resume manifest task failed, continuing without it"),
        }
    }

    fn report_progress(&mut self, index: u64) {
        let completed = index;
        if let Some(progress) = &self.progress {
            progress(ProgressEvent {
                index,
                completed,
                total: self.total,
                bytes_written: self.bytes_written,
            });
        }

        let step = completed * 10 / self.total.max(1);
        if step > self.last_logged_step {
            self.last_logged_step = step;
            info!(
                completed,
                total = self.total,
                percent = step * 10,
                "Download progress"
            );
        }
    }
}
