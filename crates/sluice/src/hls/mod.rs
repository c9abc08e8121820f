// HLS VOD download pipeline

pub mod appender;
pub mod buffer;
pub mod downloader;
pub mod fetcher;
mod hls_downloader;
pub mod playlist;
pub mod resume;
pub mod retry;
pub mod writer;

pub use appender::{FileAppender, file_size};
pub use buffer::{BufferRejection, BufferedSegment, SegmentBuffer};
pub use downloader::{
    JobReport, ParallelSegmentDownloader, ProgressEvent, ProgressFn, ResumeSource, SegmentJob,
};
pub use fetcher::SegmentDownloader;
pub use hls_downloader::{DownloadOutcome, DownloadRequest, HlsDownloader};
pub use resume::ResumeManifest;
pub use retry::RetryPolicy;
pub use writer::{WriterExit, WriterReport};
