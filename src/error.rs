//! All error types used in this crate

use std::ffi::CStr;

use libc::c_int;
use num_enum::TryFromPrimitive;
use tracing::trace;

use crate::ffi;

/// Anything that can go wrong while reading an archive, plus the
/// end-of-archive condition.
///
/// [Error::EndOfArchive] is not a failure: it is returned by
/// [ArchiveReader::next_header](crate::ArchiveReader::next_header) once all
/// entries have been visited, and by
/// [ArchiveReader::read_data](crate::ArchiveReader::read_data) once the
/// current entry has no more bytes.
///
/// The `detail` of the other variants is the engine's own error text, when
/// it had any.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No more entries, or no more bytes in the current entry.
    #[error("end of archive")]
    EndOfArchive,

    /// The operation failed transiently and may be reissued.
    #[error("retry [{}]", display_detail(.detail))]
    Retry {
        /// Engine error text
        detail: Option<String>,
    },

    /// The operation went through, but the engine flagged a problem. The
    /// reader remains usable.
    #[error("warning [{}]", display_detail(.detail))]
    Warning {
        /// Engine error text
        detail: Option<String>,
    },

    /// The operation did not complete. Depending on context the reader may
    /// still be usable.
    #[error("failed [{}]", display_detail(.detail))]
    Failed {
        /// Engine error text
        detail: Option<String>,
    },

    /// The reader is no longer usable, the only thing left to do is to free
    /// it.
    #[error("fatal [{}]", display_detail(.detail))]
    Fatal {
        /// Engine error text
        detail: Option<String>,
    },

    /// A seek was requested with an unknown whence, or would have landed
    /// before the start.
    #[error("invalid seek: {0}")]
    SeekInvalid(#[from] SeekError),
}

/// The closed set of error kinds, see [Error::kind].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [Error::EndOfArchive]
    EndOfArchive,
    /// See [Error::Retry]
    Retry,
    /// See [Error::Warning]
    Warning,
    /// See [Error::Failed]
    Failed,
    /// See [Error::Fatal]
    Fatal,
    /// See [Error::SeekInvalid]
    SeekInvalid,
}

/// Why a seek was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SeekError {
    /// Whence must be 0 (start), 1 (current) or 2 (end).
    #[error("invalid whence {0}")]
    InvalidWhence(i32),

    /// The computed absolute position was negative.
    #[error("negative position {0}")]
    NegativePosition(i64),
}

fn display_detail(detail: &Option<String>) -> &str {
    detail.as_deref().unwrap_or("no details")
}

impl Error {
    /// Which kind of error this is.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EndOfArchive => ErrorKind::EndOfArchive,
            Error::Retry { .. } => ErrorKind::Retry,
            Error::Warning { .. } => ErrorKind::Warning,
            Error::Failed { .. } => ErrorKind::Failed,
            Error::Fatal { .. } => ErrorKind::Fatal,
            Error::SeekInvalid(_) => ErrorKind::SeekInvalid,
        }
    }

    /// True for the expected end-of-archive / end-of-entry condition.
    pub fn is_end_of_archive(&self) -> bool {
        matches!(self, Error::EndOfArchive)
    }

    /// The engine's error text, if any was attached.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Error::Retry { detail }
            | Error::Warning { detail }
            | Error::Failed { detail }
            | Error::Fatal { detail } => detail.as_deref(),
            Error::EndOfArchive | Error::SeekInvalid(_) => None,
        }
    }

    /// Puts the byte source's own error in front of the engine's detail.
    /// The engine usually overwrites the message it was given with its own
    /// ("truncated archive" and the like).
    pub(crate) fn with_source_error(self, source: &std::io::Error) -> Self {
        let merge = |detail: Option<String>| {
            Some(match detail {
                Some(detail) if detail.contains(&source.to_string()) => detail,
                Some(detail) => format!("{source} ({detail})"),
                None => source.to_string(),
            })
        };
        match self {
            Error::Retry { detail } => Error::Retry {
                detail: merge(detail),
            },
            Error::Warning { detail } => Error::Warning {
                detail: merge(detail),
            },
            Error::Failed { detail } => Error::Failed {
                detail: merge(detail),
            },
            Error::Fatal { detail } => Error::Fatal {
                detail: merge(detail),
            },
            e => e,
        }
    }

    pub(crate) fn fatal(detail: impl Into<String>) -> Self {
        Error::Fatal {
            detail: Some(detail.into()),
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::EndOfArchive => std::io::ErrorKind::UnexpectedEof.into(),
            e => std::io::Error::other(e),
        }
    }
}

/// Status codes returned by the engine, mirroring `ffi::ARCHIVE_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(i32)]
pub(crate) enum Status {
    Eof = 1,
    Ok = 0,
    Retry = -10,
    Warn = -20,
    Failed = -25,
    Fatal = -30,
}

const _: () = assert!(
    Status::Eof as c_int == ffi::ARCHIVE_EOF
        && Status::Ok as c_int == ffi::ARCHIVE_OK
        && Status::Retry as c_int == ffi::ARCHIVE_RETRY
        && Status::Warn as c_int == ffi::ARCHIVE_WARN
        && Status::Failed as c_int == ffi::ARCHIVE_FAILED
        && Status::Fatal as c_int == ffi::ARCHIVE_FATAL
);

/// Reads the engine's last error text. Must be called before any other
/// engine call, which may overwrite it.
///
/// # Safety
///
/// `archive` must be a live engine instance.
pub(crate) unsafe fn error_string(archive: *mut ffi::archive) -> Option<String> {
    let ptr = ffi::archive_error_string(archive);
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

/// Maps an engine status code to `Ok(())` or the matching [Error].
///
/// # Safety
///
/// `archive` must be the live engine instance that produced `code`.
pub(crate) unsafe fn check_status(archive: *mut ffi::archive, code: c_int) -> Result<(), Error> {
    let status = match Status::try_from(code) {
        Ok(Status::Ok) => return Ok(()),
        Ok(Status::Eof) => return Err(Error::EndOfArchive),
        Ok(status) => status,
        Err(_) => {
            return Err(Error::Failed {
                detail: Some(format!("unknown status code {code}")),
            })
        }
    };

    let detail = error_string(archive);
    trace!(?status, errno = ffi::archive_errno(archive), ?detail, "engine status");
    Err(status_error(status, detail))
}

/// Maps a negative `archive_read_data` result. Counts that are not a known
/// status become [Error::Failed].
///
/// # Safety
///
/// `archive` must be the live engine instance that produced `n`.
pub(crate) unsafe fn check_read(archive: *mut ffi::archive, n: isize) -> Error {
    read_error(n, error_string(archive))
}

fn read_error(n: isize, detail: Option<String>) -> Error {
    let status = c_int::try_from(n)
        .ok()
        .and_then(|code| Status::try_from(code).ok());
    match status {
        Some(status @ (Status::Retry | Status::Warn | Status::Fatal)) => {
            status_error(status, detail)
        }
        _ => Error::Failed { detail },
    }
}

fn status_error(status: Status, detail: Option<String>) -> Error {
    match status {
        Status::Ok | Status::Eof => Error::EndOfArchive,
        Status::Retry => Error::Retry { detail },
        Status::Warn => Error::Warning { detail },
        Status::Failed => Error::Failed { detail },
        Status::Fatal => Error::Fatal { detail },
    }
}
