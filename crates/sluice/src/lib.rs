//! Parallel, resumable downloader for static HLS (VOD) playlists.
//!
//! The pipeline resolves a playlist (following a master playlist to its first
//! variant), downloads every media segment with a bounded worker pool, and
//! appends the segments to a single `.ts` file strictly in playlist order. An
//! interrupted download resumes from what is already on disk.

pub mod client;
pub mod config;
pub mod error;
pub mod headers;
pub mod hls;
pub mod source;
pub mod transcode;

pub use client::{HttpClient, PlaylistFetcher, create_client};
pub use config::{DownloaderConfig, HlsConfig, ParallelConfig, TranscodeConfig};
pub use error::{DownloadError, SegmentFetchError};
pub use headers::SiteHeaders;
pub use hls::{
    DownloadOutcome, DownloadRequest, HlsDownloader, JobReport, ParallelSegmentDownloader,
    ProgressEvent, ProgressFn, SegmentBuffer, SegmentDownloader, SegmentJob,
};
pub use transcode::{FfmpegTranscoder, MediaInfo, Transcoder};
