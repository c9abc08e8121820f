// HLS Downloader: playlist -> segments -> ordered .ts file -> optional container conversion.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{HttpClient, PlaylistFetcher};
use crate::config::HlsConfig;
use crate::error::DownloadError;
use crate::headers::SiteHeaders;
use crate::hls::appender::file_size;
use crate::hls::downloader::{JobReport, ParallelSegmentDownloader, ProgressFn, SegmentJob};
use crate::hls::fetcher::SegmentDownloader;
use crate::hls::playlist;
use crate::hls::resume::ResumeManifest;
use crate::transcode::{FfmpegTranscoder, Transcoder};

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub stream_url: String,
    /// Final target. The transport stream is written to its `.ts` sibling.
    pub output_path: PathBuf,
    pub referer: Option<String>,
    /// Convert to the container named by the target's extension
    pub convert: bool,
}

impl DownloadRequest {
    pub fn new(stream_url: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            stream_url: stream_url.into(),
            output_path: output_path.into(),
            referer: None,
            convert: true,
        }
    }

    pub fn with_referer(mut self, referer: Option<String>) -> Self {
        self.referer = referer;
        self
    }

    pub fn with_convert(mut self, convert: bool) -> Self {
        self.convert = convert;
        self
    }

    pub fn ts_path(&self) -> PathBuf {
        self.output_path.with_extension("ts")
    }

    fn wants_conversion(&self) -> bool {
        self.convert
            && self
                .output_path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| !ext.eq_ignore_ascii_case("ts"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The target already existed with data; nothing was fetched.
    AlreadyExists(PathBuf),
    /// Downloaded and converted; the `.ts` file was removed.
    Converted(PathBuf),
    /// Downloaded; the transport stream is the final file.
    TransportStream(PathBuf),
    /// Downloaded, but conversion was not possible. The `.ts` file is kept.
    ConversionSkipped { ts_path: PathBuf, reason: String },
}

impl DownloadOutcome {
    /// The playable file the user ends up with.
    pub fn path(&self) -> &Path {
        match self {
            Self::AlreadyExists(path) | Self::Converted(path) | Self::TransportStream(path) => {
                path
            }
            Self::ConversionSkipped { ts_path, .. } => ts_path,
        }
    }
}

pub struct HlsDownloader {
    config: HlsConfig,
    headers: SiteHeaders,
    playlists: Arc<dyn PlaylistFetcher>,
    segments: Arc<dyn SegmentDownloader>,
    transcoder: Arc<dyn Transcoder>,
    progress: Option<ProgressFn>,
    cancel: CancellationToken,
}

impl HlsDownloader {
    /// Build with the `reqwest` client and the ffmpeg transcoder.
    pub fn new(config: HlsConfig) -> Result<Self, DownloadError> {
        let http = Arc::new(HttpClient::new(&config.base)?);
        let transcoder = Arc::new(FfmpegTranscoder::new(&config.transcode));
        Ok(Self::with_collaborators(
            config,
            http.clone(),
            http,
            transcoder,
        ))
    }

    pub fn with_collaborators(
        config: HlsConfig,
        playlists: Arc<dyn PlaylistFetcher>,
        segments: Arc<dyn SegmentDownloader>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            headers: SiteHeaders::from_config(&config.base),
            config,
            playlists,
            segments,
            transcoder,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressFn>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &HlsConfig {
        &self.config
    }

    pub async fn download(&self, request: &DownloadRequest) -> Result<DownloadOutcome, DownloadError> {
        let output = &request.output_path;
        let ts_path = request.ts_path();

        if self.target_already_complete(request) {
            if output == &ts_path {
                info!(
                    path = %output.display(),
                    "Transport stream exists without a resume manifest, treating it as finished; delete it to download again"
                );
            }
            info!(path = %output.display(), "Output already exists, skipping download");
            return Ok(DownloadOutcome::AlreadyExists(output.clone()));
        }

        info!(url = %request.stream_url, output = %output.display(), "Starting HLS download");

        let segment_urls = self.resolve_segments(request).await?;
        let job = SegmentJob::new(segment_urls, ts_path.clone()).with_referer(request.referer.clone());

        let report = ParallelSegmentDownloader::new(Arc::clone(&self.segments), self.config.parallel.clone())
            .with_progress(self.progress.clone())
            .with_cancellation(self.cancel.clone())
            .download(&job)
            .await?;
        log_report(&report, &ts_path);

        if !request.wants_conversion() {
            return Ok(DownloadOutcome::TransportStream(ts_path));
        }

        Ok(self.convert(&ts_path, output).await)
    }

    /// Playlist fetch, master resolution and segment parsing.
    pub async fn resolve_segments(&self, request: &DownloadRequest) -> Result<Vec<String>, DownloadError> {
        let headers = self.headers.build(request.referer.as_deref());
        let mut playlist_url = playlist::parse_playlist_url(&request.stream_url)?;

        debug!(url = %playlist_url, "Downloading playlist");
        let mut content = self
            .playlists
            .fetch_text(playlist_url.as_str(), headers.clone())
            .await?;
        if content.trim().is_empty() {
            return Err(DownloadError::playlist(format!("empty playlist at {playlist_url}")));
        }

        if playlist::is_master_playlist(&content) {
            info!("Master playlist detected, selecting first quality");
            let base = playlist::get_base_url(&playlist_url);
            let variant = playlist::get_first_quality_url(&content, &base).ok_or_else(|| {
                DownloadError::NoVariant {
                    url: playlist_url.to_string(),
                }
            })?;
            content = self.playlists.fetch_text(variant.as_str(), headers).await?;
            playlist_url = variant;
        }

        match playlist::inspect_media_playlist(&content) {
            Some(info) if !info.end_list => warn!(
                url = %playlist_url,
                "Playlist has no #EXT-X-ENDLIST; only the segments listed now will be downloaded"
            ),
            Some(info) => debug!(
                segments = info.segment_count,
                duration_secs = info.total_duration,
                target_duration = info.target_duration,
                "Media playlist"
            ),
            None => {}
        }

        let base = playlist::get_base_url(&playlist_url);
        let segments = playlist::parse_segments(&content, &base);
        if segments.is_empty() {
            return Err(DownloadError::NoSegments {
                url: playlist_url.to_string(),
            });
        }
        info!(count = segments.len(), "Segments found");
        Ok(segments.into_iter().map(String::from).collect())
    }

    /// The target has data and is not an unfinished transport stream.
    fn target_already_complete(&self, request: &DownloadRequest) -> bool {
        let output = &request.output_path;
        if file_size(output) == 0 {
            return false;
        }
        // When the target is the .ts file itself a manifest next to it means the download is unfinished
        !(output == &request.ts_path() && ResumeManifest::path_for(output).exists())
    }

    async fn convert(&self, ts_path: &Path, output: &Path) -> DownloadOutcome {
        if !self.transcoder.is_available().await {
            warn!(
                ts_path = %ts_path.display(),
                "ffmpeg not found, keeping .ts file. Convert manually with: ffmpeg -i {} -c copy {}",
                ts_path.display(),
                output.display()
            );
            return DownloadOutcome::ConversionSkipped {
                ts_path: ts_path.to_path_buf(),
                reason: "ffmpeg is not available".to_string(),
            };
        }

        match self.transcoder.transcode(ts_path, output).await {
            Ok(()) => {
                match tokio::fs::remove_file(ts_path).await {
                    Ok(()) => debug!(path = %ts_path.display(), "Removed transport stream"),
                    Err(e) => warn!(path = %ts_path.display(), error = %e, "Could not remove .ts file"),
                }
                info!(path = %output.display(), "Final file");
                DownloadOutcome::Converted(output.to_path_buf())
            }
            Err(e) => {
                // A partial target would pass the already-exists check on the next run
                match tokio::fs::remove_file(output).await {
                    Ok(()) => debug!(path = %output.display(), "Removed partial conversion output"),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => warn!(
                        path = %output.display(),
                        error = %err,
                        "Could not remove partial conversion output"
                    ),
                }
                warn!(ts_path = %ts_path.display(), error = %e, "Conversion failed, .ts file kept");
                DownloadOutcome::ConversionSkipped {
                    ts_path: ts_path.to_path_buf(),
                    reason: e.to_string(),
                }
            }
        }
    }
}

fn log_report(report: &JobReport, ts_path: &Path) {
    info!(
        path = %ts_path.display(),
        total = report.total,
        resumed_from = report.resumed_from,
        written = report.written,
        bytes = report.bytes_written,
        "Transport stream complete"
    );
}
