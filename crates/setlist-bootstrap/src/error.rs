//! Bootstrap error types.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::phase::PhaseKind;

/// Errors raised by the pipeline components.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The remote source was unreachable or the transfer broke off.
    #[error("transfer failed: {message}")]
    Transfer { message: String, retryable: bool },

    /// The downloaded archive does not match its reference.
    #[error("integrity check failed: expected {check} {expected}, got {actual}")]
    Integrity {
        check: &'static str,
        expected: String,
        actual: String,
    },

    /// The archive could not be fully read or is missing required entries.
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    /// Staging storage ran out of space.
    #[error("insufficient staging space: {0}")]
    DiskSpace(String),

    /// Too many staged records failed structural validation.
    #[error("catalog format error: {skipped} malformed records exceed tolerance of {tolerance} (last: {last_problem})")]
    CatalogFormat {
        skipped: usize,
        tolerance: usize,
        last_problem: String,
    },

    /// An error propagated from local storage.
    #[error("storage error: {0}")]
    Storage(#[from] setlist_core::Error),

    /// Local file I/O on the staging area failed.
    #[error("staging I/O error: {0}")]
    Io(std::io::Error),

    #[error("bootstrap cancelled")]
    Cancelled,

    /// Another run already owns the local store.
    #[error("a bootstrap is already running against {0}")]
    AlreadyRunning(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BootstrapError {
    pub fn transfer(message: impl Into<String>) -> Self {
        Self::Transfer {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn transfer_fatal(message: impl Into<String>) -> Self {
        Self::Transfer {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns `true` when the error is transient and the Fetcher may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transfer { retryable: true, .. })
    }

    /// The stable kind reported to progress subscribers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transfer { .. } => ErrorKind::Transfer,
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::CorruptArchive(_) => ErrorKind::CorruptArchive,
            Self::DiskSpace(_) => ErrorKind::DiskSpace,
            Self::CatalogFormat { .. } => ErrorKind::CatalogFormat,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Io(_) => ErrorKind::Staging,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::AlreadyRunning(_) => ErrorKind::AlreadyRunning,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<std::io::Error> for BootstrapError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::StorageFull {
            Self::DiskSpace(err.to_string())
        } else {
            Self::Io(err)
        }
    }
}

impl From<reqwest::Error> for BootstrapError {
    fn from(err: reqwest::Error) -> Self {
        let retryable = err.is_timeout()
            || err.is_connect()
            || err.is_body()
            || err.status().is_some_and(|s| s.is_server_error());
        Self::Transfer {
            message: err.to_string(),
            retryable,
        }
    }
}

/// Stable, user-facing error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transfer,
    Integrity,
    CorruptArchive,
    DiskSpace,
    CatalogFormat,
    Storage,
    Staging,
    Cancelled,
    AlreadyRunning,
    Internal,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transfer => "transfer",
            Self::Integrity => "integrity",
            Self::CorruptArchive => "corrupt_archive",
            Self::DiskSpace => "disk_space",
            Self::CatalogFormat => "catalog_format",
            Self::Storage => "storage",
            Self::Staging => "staging",
            Self::Cancelled => "cancelled",
            Self::AlreadyRunning => "already_running",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A component error tagged with the phase it was raised in.
#[derive(Debug, Error)]
#[error("{phase} failed: {error}")]
pub struct PhaseError {
    pub phase: PhaseKind,
    #[source]
    pub error: BootstrapError,
}

impl PhaseError {
    pub fn new(phase: PhaseKind, error: impl Into<BootstrapError>) -> Self {
        Self {
            phase,
            error: error.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// Convenience alias for component results.
pub type BootstrapResult<T> = std::result::Result<T, BootstrapError>;
