//! Error types for building, serializing and extracting archives.

use thiserror::Error;

use crate::header::{NAME_LEN, PREFIX_LEN};

/// Coarse classification of an [`ArchiveError`].
///
/// Callers that only need to tell corruption apart from naming violations or I/O failures can
/// match on this instead of the full error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The byte stream is not a well-formed archive.
    Corrupted,
    /// A path cannot be represented in the name/prefix fields.
    FilenameTooLong,
    /// Unsupported header format or invalid input to the builder.
    Format,
    /// Failure reported by a filesystem or compression collaborator.
    Io,
    /// The builder was used in a way its lifecycle does not allow.
    Usage,
    /// The operation was cancelled.
    Cancelled,
}

/// Errors that can occur while encoding, decoding or moving archive data.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Checksum mismatch, trailing garbage, or a stream that ended mid-entry.
    #[error("corrupted archive: {0}")]
    CorruptedArchive(String),

    /// The stored header checksum does not match the computed value.
    #[error("checksum mismatch: stored {expected}, computed {computed}")]
    ChecksumMismatch {
        /// The checksum value stored in the header.
        expected: u64,
        /// The checksum computed from the header bytes.
        computed: u64,
    },

    /// The path cannot be split into a name of at most 100 bytes and a prefix of at most 155.
    #[error("filename too long to split into {NAME_LEN}-byte name and {PREFIX_LEN}-byte prefix: {0:?}")]
    FilenameTooLong(String),

    /// The header magic does not start with `ustar`.
    #[error("unsupported header magic: {0:?}")]
    UnsupportedMagic(Vec<u8>),

    /// Content shape does not fit the entry being appended.
    #[error("invalid content for {path:?}: {reason}")]
    InvalidContent {
        /// The entry the content was given for.
        path: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A numeric or text field does not fit its fixed width.
    #[error("value {value} does not fit the {field} field")]
    FieldOverflow {
        /// Header field name.
        field: &'static str,
        /// Offending value (rendered for display).
        value: String,
    },

    /// A stream body was appended without a declared size.
    #[error("size must be given for stream content of {0:?}")]
    MissingSize(String),

    /// `serialize` was called a second time on the same builder.
    #[error("archive has already been serialized")]
    AlreadySerialized,

    /// The body of an entry was taken by `serialize` before it could be read.
    #[error("body of {0:?} has already been consumed")]
    BodyConsumed(String),

    /// An entry path would escape the extraction destination.
    #[error("refusing to extract unsafe path {0:?}")]
    UnsafePath(String),

    /// The cancellation token fired before extraction completed.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error from a collaborator or the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    /// Returns the coarse classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchiveError::CorruptedArchive(_) | ArchiveError::ChecksumMismatch { .. } => {
                ErrorKind::Corrupted
            }
            ArchiveError::FilenameTooLong(_) => ErrorKind::FilenameTooLong,
            ArchiveError::UnsupportedMagic(_)
            | ArchiveError::InvalidContent { .. }
            | ArchiveError::FieldOverflow { .. }
            | ArchiveError::MissingSize(_)
            | ArchiveError::UnsafePath(_) => ErrorKind::Format,
            ArchiveError::AlreadySerialized | ArchiveError::BodyConsumed(_) => ErrorKind::Usage,
            ArchiveError::Cancelled => ErrorKind::Cancelled,
            ArchiveError::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn corrupted(msg: impl Into<String>) -> Self {
        ArchiveError::CorruptedArchive(msg.into())
    }

    /// Recover an archive error that travelled through an I/O interface.
    pub(crate) fn from_io(err: std::io::Error) -> Self {
        err.downcast::<ArchiveError>().unwrap_or_else(ArchiveError::Io)
    }
}

/// Converts back into an I/O error so archive failures can travel through `AsyncRead`.
impl From<ArchiveError> for std::io::Error {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::Io(e) => e,
            ArchiveError::Cancelled => std::io::Error::other(err),
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            ArchiveError::corrupted("bad checksum").kind(),
            ErrorKind::Corrupted
        );
        assert_eq!(
            ArchiveError::FilenameTooLong("x".into()).kind(),
            ErrorKind::FilenameTooLong
        );
        assert_eq!(
            ArchiveError::UnsupportedMagic(b"nope\0\0".to_vec()).kind(),
            ErrorKind::Format
        );
        assert_eq!(ArchiveError::AlreadySerialized.kind(), ErrorKind::Usage);
        assert_eq!(ArchiveError::Cancelled.kind(), ErrorKind::Cancelled);
        let io = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(ArchiveError::from(io).kind(), ErrorKind::Io);
    }

    #[test]
    fn test_io_roundtrip_preserves_inner_error() {
        let inner = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        let back: std::io::Error = ArchiveError::Io(inner).into();
        assert_eq!(back.kind(), std::io::ErrorKind::BrokenPipe);

        let back: std::io::Error = ArchiveError::corrupted("short").into();
        assert_eq!(back.kind(), std::io::ErrorKind::InvalidData);
        assert!(matches!(
            ArchiveError::from_io(back),
            ArchiveError::CorruptedArchive(_)
        ));

        let plain = std::io::Error::other("disk on fire");
        assert!(matches!(ArchiveError::from_io(plain), ArchiveError::Io(_)));
    }
}
