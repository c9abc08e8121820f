// Resume support: the `<output>.resume.json` sidecar and the size-estimation fallback.

use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::DownloadError;

pub const MANIFEST_VERSION: u32 = 1;

/// Persisted record of the segments already appended to an output file.
///
/// Segments are written strictly in order, so the completed set is always the prefix
/// `1..=segment_sizes.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeManifest {
    pub version: u32,
    pub total_segments: u64,
    pub playlist_fingerprint: String,
    pub segment_sizes: Vec<u64>,
}

impl ResumeManifest {
    pub fn new(total_segments: u64, playlist_fingerprint: impl Into<String>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            total_segments,
            playlist_fingerprint: playlist_fingerprint.into(),
            segment_sizes: Vec::new(),
        }
    }

    /// `video.ts` -> `video.ts.resume.json`
    pub fn path_for(output: &Path) -> PathBuf {
        let mut name = output
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("output"));
        name.push(".resume.json");
        output.with_file_name(name)
    }

    /// Read a manifest; a missing file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>, DownloadError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Whether this manifest describes the same job.
    pub fn matches(&self, total_segments: u64, fingerprint: &str) -> bool {
        self.version == MANIFEST_VERSION
            && self.total_segments == total_segments
            && self.playlist_fingerprint == fingerprint
            && self.completed() <= total_segments
    }

    pub fn completed(&self) -> u64 {
        self.segment_sizes.len() as u64
    }

    pub fn recorded_bytes(&self) -> u64 {
        self.segment_sizes.iter().sum()
    }

    pub fn record(&mut self, size: u64) {
        self.segment_sizes.push(size);
    }

    /// Replace the manifest at `path` atomically (write temp file, then rename).
    pub fn store(&self, path: &Path) -> Result<(), DownloadError> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut staged = tempfile::Builder::new()
            .prefix(".sluice-manifest-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        serde_json::to_writer(&mut staged, self)?;
        staged.flush()?;
        staged.as_file().sync_all()?;
        staged.persist(path).map_err(|e| DownloadError::from(e.error))?;
        Ok(())
    }

    pub fn remove(path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Removed resume manifest"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Could not remove resume manifest"),
        }
    }
}

/// SHA-256 over the ordered segment URLs, hex encoded.
pub fn playlist_fingerprint<S: AsRef<str>>(segment_urls: &[S]) -> String {
    let mut hasher = Sha256::new();
    for url in segment_urls {
        hasher.update(url.as_ref().as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Number of segments assumed to be on disk: `min(existing / average, total)`.
///
/// A zero average (the probe fetch failed or returned nothing) means a full restart.
pub fn estimate_completed(existing_size: u64, average_segment_size: u64, total: u64) -> u64 {
    if average_segment_size == 0 {
        return 0;
    }
    (existing_size / average_segment_size).min(total)
}
