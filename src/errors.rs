//! Closed status taxonomy for journal operations.
//!
//! Every call that crosses the OS boundary resolves to one of a small closed
//! set of statuses for that operation kind. An OS code outside the documented
//! set for a call site is never coerced into a neighboring status; it surfaces
//! as [`JournalError::Unexpected`] so contract drift stays detectable.

use thiserror::Error;

use crate::record::VolumeSerial;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JournalError {
    #[error("change journal is not active on this volume")]
    NotActive,

    #[error("change journal deletion is in progress on this volume")]
    DeleteInProgress,

    /// The requested cursor has been truncated out of the journal. Callers
    /// should restart from cursor 0 or accept permanent data loss for the gap.
    #[error("journal entry at the requested cursor has been deleted")]
    EntryDeleted,

    #[error("volume does not support change journals")]
    Unsupported,

    #[error("invalid parameter passed to a journal operation")]
    InvalidParameter,

    #[error("access denied by the operating system")]
    AccessDenied,

    /// The file has no journal record: the journal is disabled or the file
    /// predates it.
    #[error("file has no change journal record")]
    NoRecord,

    #[error("no volume with serial {0} is registered")]
    UnknownVolume(VolumeSerial),

    #[error("failed to open {path}: {reason}")]
    Open { path: String, reason: OpenError },

    #[error("malformed journal buffer: {0}")]
    Decode(#[from] DecodeError),

    /// An OS code outside the closed set documented for this call site. Not
    /// recoverable: it means an assumption about the OS contract is wrong.
    #[error("unexpected os error during {op} (code {code:#010x})")]
    Unexpected { op: &'static str, code: i32 },
}

impl JournalError {
    /// The resource the operation addressed should be treated as absent.
    pub fn is_missing(&self) -> bool {
        match self {
            JournalError::Open { reason, .. } => reason.is_missing(),
            JournalError::UnknownVolume(_) | JournalError::NoRecord => true,
            _ => false,
        }
    }

    /// Another actor is blocking access to an existing resource.
    pub fn is_blocked(&self) -> bool {
        match self {
            JournalError::Open { reason, .. } => reason.is_blocked(),
            JournalError::AccessDenied => true,
            _ => false,
        }
    }
}

/// Sub-reasons for a failed open of a volume root or file path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OpenError {
    #[error("file not found")]
    NotFound,
    #[error("path not found")]
    PathNotFound,
    #[error("sharing violation")]
    SharingViolation,
    #[error("access denied")]
    AccessDenied,
    #[error("lock violation")]
    LockViolation,
    #[error("device not ready")]
    DeviceNotReady,
    #[error("volume is locked")]
    LockedVolume,
    #[error("timed out")]
    Timeout,
    #[error("cannot access the file")]
    CannotAccess,
    #[error("bad path name")]
    BadPath,
    #[error("unknown os error (code {0:#010x})")]
    Unknown(i32),
}

impl OpenError {
    /// The target should be treated as absent rather than contended.
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            OpenError::NotFound
                | OpenError::PathNotFound
                | OpenError::DeviceNotReady
                | OpenError::LockedVolume
                | OpenError::CannotAccess
                | OpenError::BadPath
        )
    }

    /// The target exists but another actor is blocking access.
    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            OpenError::SharingViolation | OpenError::AccessDenied | OpenError::LockViolation
        )
    }
}

/// Structural violations found while decoding a read buffer.
///
/// The ioctl boundary guarantees well-formed output, so any of these means a
/// codec/version mismatch rather than a recoverable condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("buffer of {len} bytes is too short for the leading cursor word")]
    MissingCursor { len: usize },

    #[error("record header truncated at offset {offset}: only {remaining} bytes remain")]
    TruncatedHeader { offset: usize, remaining: usize },

    #[error("record at offset {offset} declares {declared} bytes but only {remaining} remain")]
    RecordOverrun {
        offset: usize,
        declared: u32,
        remaining: usize,
    },

    #[error("unsupported record major version {major} at offset {offset}")]
    UnsupportedVersion { major: u16, offset: usize },

    #[error("record length {declared} outside [{min}, {max}] for version {major}")]
    LengthOutOfBounds {
        major: u16,
        declared: u32,
        min: u32,
        max: u32,
    },

    #[error("file name range {name_offset}+{name_len} escapes a record of {record_len} bytes")]
    NameOutOfRange {
        name_offset: u16,
        name_len: u16,
        record_len: u32,
    },

    /// A journal buffer may never carry a record at the reserved zero cursor;
    /// zero encodes "no activity", not a record position.
    #[error("record at offset {offset} carries the reserved zero cursor")]
    ReservedUsn { offset: usize },
}
