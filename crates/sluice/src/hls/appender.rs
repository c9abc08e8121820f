// File append layer: stage a segment in a temp file, append it, verify the size.
//
// All functions here are blocking and are called from the writer through spawn_blocking.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{error, trace};

use crate::error::DownloadError;

/// Size of `path` in bytes, or 0 if it does not exist.
pub fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileAppender;

impl FileAppender {
    /// Append `data` to `output`, returning the new file size.
    ///
    /// The bytes are first written to a temp file next to `output`. Fails with
    /// [`DownloadError::Integrity`] if the output did not grow by exactly `data.len()`.
    /// The temp file is removed on every path.
    pub fn append(&self, data: &[u8], output: &Path) -> Result<u64, DownloadError> {
        let dir = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut staged = tempfile::Builder::new()
            .prefix(".sluice-")
            .suffix(".part")
            .tempfile_in(dir)?;
        staged.write_all(data)?;
        staged.flush()?;
        staged.as_file_mut().seek(SeekFrom::Start(0))?;

        let size_before = file_size(output);
        let mut target = OpenOptions::new().create(true).append(true).open(output)?;
        let copied = io::copy(staged.as_file_mut(), &mut target)?;
        target.sync_all()?;
        drop(target);

        let size_after = file_size(output);
        let expected = size_before + data.len() as u64;
        if copied != data.len() as u64 || size_after != expected {
            error!(
                path = %output.display(),
                expected,
                actual = size_after,
                "Append size verification failed"
            );
            return Err(DownloadError::Integrity {
                path: output.to_path_buf(),
                expected,
                actual: size_after,
            });
        }

        trace!(path = %output.display(), bytes = data.len(), size = size_after, "Appended segment");
        Ok(size_after)
    }

    /// Cut `path` down to `len` bytes.
    pub fn truncate_to(&self, path: &Path, len: u64) -> Result<(), DownloadError> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(len)?;
        file.sync_all()?;
        Ok(())
    }

    /// Create or empty `path`.
    pub fn reset(&self, path: &Path) -> Result<(), DownloadError> {
        let file = File::create(path)?;
        file.sync_all()?;
        Ok(())
    }
}
