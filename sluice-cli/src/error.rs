use sluice_engine::DownloadError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl AppError {
    /// Interrupted by the user; the partial file is kept for the next run.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Download(DownloadError::Cancelled))
    }
}
