use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MergyError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not a regular file: {0}")]
    NotAFile(String),

    #[error("Out of disk space: {0}")]
    OutOfSpace(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl MergyError {
    /// Classify a raw IO failure for a given path into the error taxonomy.
    ///
    /// Out-of-space is the only fatal kind; everything else is a soft,
    /// per-item failure that callers accumulate and continue past.
    pub fn from_io(err: io::Error, path: &Path) -> Self {
        if is_out_of_space(&err) {
            return MergyError::OutOfSpace(format!("{}: {}", path.display(), err));
        }
        match err.kind() {
            io::ErrorKind::NotFound => MergyError::NotFound(path.display().to_string()),
            io::ErrorKind::PermissionDenied => {
                MergyError::PermissionDenied(path.display().to_string())
            }
            _ => MergyError::Io(err),
        }
    }

    /// Whether this error aborts the current merge call rather than being
    /// recorded and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MergyError::OutOfSpace(_))
    }
}

/// Detect the disk-full condition across platforms.
pub fn is_out_of_space(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        // ENOSPC
        if err.raw_os_error() == Some(28) {
            return true;
        }
    }

    #[cfg(windows)]
    {
        // ERROR_HANDLE_DISK_FULL / ERROR_DISK_FULL
        if matches!(err.raw_os_error(), Some(39) | Some(112)) {
            return true;
        }
    }

    err.to_string().contains("No space left on device")
}

pub type Result<T> = std::result::Result<T, MergyError>;
