use std::path::PathBuf;

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("failed to decode `{input}`: {reason}")]
    Decode { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("resume manifest error: {source}")]
    Manifest {
        #[from]
        source: serde_json::Error,
    },

    #[error("playlist error: {reason}")]
    Playlist { reason: String },

    #[error("master playlist {url} has no variant stream")]
    NoVariant { url: String },

    #[error("no segments found in playlist {url}")]
    NoSegments { url: String },

    #[error("integrity check failed for {path}: expected {expected} bytes, found {actual}")]
    Integrity {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("{} of {total} segments failed, {written} written", .failed.len())]
    Incomplete {
        failed: Vec<u64>,
        written: u64,
        total: u64,
    },

    #[error("segment writer did not finish within {timeout_secs}s")]
    WriterStuck { timeout_secs: u64 },

    #[error("segment writer aborted at index {index}: {reason}")]
    WriterAborted { index: u64, reason: String },

    #[error("stream extraction failed for {url}: {reason}")]
    Extraction { url: String, reason: String },

    #[error("transcode error: {reason}")]
    Transcode { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl DownloadError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn playlist(reason: impl Into<String>) -> Self {
        Self::Playlist {
            reason: reason.into(),
        }
    }

    pub fn extraction(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Extraction {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Whether a partial output file was left on disk that a later run can resume.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Self::Incomplete { .. }
                | Self::Integrity { .. }
                | Self::WriterAborted { .. }
                | Self::WriterStuck { .. }
                | Self::Cancelled
        )
    }
}

/// Failure of a single segment GET.
///
/// The variant is used for logging and retry decisions only; callers of the
/// fetcher treat every variant the same way ("no data").
#[derive(Debug, thiserror::Error)]
pub enum SegmentFetchError {
    #[error("transport error fetching {url}: {reason}")]
    Transport {
        url: String,
        reason: String,
        timeout: bool,
    },

    #[error("HTTP {status} fetching {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("unexpected error fetching {url}: {reason}")]
    Unexpected { url: String, reason: String },
}

impl SegmentFetchError {
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() {
            Self::Transport {
                url: url.to_owned(),
                reason: err.to_string(),
                timeout: err.is_timeout(),
            }
        } else if let Some(status) = err.status() {
            Self::HttpStatus {
                status,
                url: url.to_owned(),
            }
        } else {
            Self::Unexpected {
                url: url.to_owned(),
                reason: err.to_string(),
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Unexpected { .. } => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { timeout: true, .. } => "timeout",
            Self::Transport { .. } => "transport",
            Self::HttpStatus { .. } => "http",
            Self::Unexpected { .. } => "unexpected",
        }
    }
}
