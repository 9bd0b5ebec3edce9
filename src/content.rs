//! Body sources accepted by [`ArchiveBuilder::append`](crate::ArchiveBuilder::append).

use std::{fmt, path::Path};

use tokio::io::AsyncRead;

use crate::{
    body::Body,
    entry::EntryKind,
    error::{ArchiveError, Result},
    fs::Filesystem,
};

/// A byte source for an archive entry.
pub enum Content {
    /// UTF-8 text; the body is its encoded bytes.
    Text(String),
    /// A fully buffered body.
    Bytes(Vec<u8>),
    /// A lazily read body. The size is required, either here or in the entry metadata.
    Stream {
        reader: Box<dyn AsyncRead + Send + Unpin>,
        size: Option<u64>,
    },
    /// No body. Directories and special entries only.
    None,
}

impl Content {
    /// Wrap a reader whose length is known up front.
    pub fn stream(reader: impl AsyncRead + Send + Unpin + 'static, size: u64) -> Self {
        Content::Stream {
            reader: Box::new(reader),
            size: Some(size),
        }
    }

    /// Stat `path` through `fs` and, for a regular file, open it as a sized stream.
    ///
    /// Anything else (directories, fifos, devices) yields [`Content::None`] without being
    /// opened.
    pub async fn from_path(fs: &impl Filesystem, path: &Path) -> Result<Self> {
        let stat = fs.stat(path).await?;
        if !stat.is_file() {
            return Ok(Content::None);
        }
        let reader = fs.open_read(path).await?;
        Ok(Content::stream(reader, stat.size))
    }

    /// Validate against the entry being appended and produce its body and length.
    ///
    /// `declared` is the size from the entry metadata, if any.
    pub(crate) fn into_body(
        self,
        path: &str,
        kind: EntryKind,
        declared: Option<u64>,
    ) -> Result<(Body, u64)> {
        let invalid = |reason| ArchiveError::InvalidContent {
            path: path.to_string(),
            reason,
        };

        if kind.is_dir() {
            return match self {
                Content::None => Ok((Body::Empty, 0)),
                _ => Err(invalid("directories cannot have content")),
            };
        }

        let (body, actual) = match self {
            Content::Text(text) => {
                let bytes = text.into_bytes();
                let len = bytes.len() as u64;
                (Body::bytes(bytes), Some(len))
            }
            Content::Bytes(bytes) => {
                let len = bytes.len() as u64;
                (Body::bytes(bytes), Some(len))
            }
            Content::Stream { reader, size } => {
                let size = match (size, declared) {
                    (Some(a), Some(b)) if a != b => {
                        return Err(invalid("stream size disagrees with metadata size"))
                    }
                    (Some(size), _) | (None, Some(size)) => size,
                    (None, None) => return Err(ArchiveError::MissingSize(path.to_string())),
                };
                (Body::from_reader(reader, size), Some(size))
            }
            Content::None if kind.is_file() => return Err(invalid("files require content")),
            Content::None => (Body::Empty, None),
        };

        match (actual, declared) {
            (Some(actual), Some(declared)) if actual != declared => {
                Err(invalid("content length disagrees with metadata size"))
            }
            (Some(size), _) => Ok((body, size)),
            // special entries without content carry only their header
            (None, _) => Ok((body, 0)),
        }
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Content::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Content::Stream { size, .. } => f.debug_struct("Stream").field("size", size).finish(),
            Content::None => f.write_str("None"),
        }
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Content {
    fn from(bytes: Vec<u8>) -> Self {
        Content::Bytes(bytes)
    }
}
