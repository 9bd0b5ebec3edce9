//! Streaming USTar archives.
//!
//! [`ArchiveBuilder`] collects entries in memory and serializes them once into an
//! [`AsyncRead`](tokio::io::AsyncRead) byte stream. [`extract`] parses an archive incrementally,
//! from input chunked in any way, either into a builder or onto a destination directory. Both
//! directions can optionally be gzip-wrapped.
//!
//! ```no_run
//! use ustar::{ArchiveBuilder, Content, EntryMetadata, ExtractOptions, SerializeOptions};
//!
//! # async fn demo() -> ustar::Result<()> {
//! let mut builder = ArchiveBuilder::new();
//! builder.append(Content::None, EntryMetadata::directory("foo").with_mode(0o740))?;
//! builder.append("Hello, World!", EntryMetadata::file("foo/hello.txt"))?;
//! let archive = builder.serialize(SerializeOptions { gzip: true })?;
//!
//! let options = ExtractOptions { gzip: true, ..Default::default() };
//! ustar::extract(archive, Some("out".as_ref()), options).await?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod body;
pub mod compression;
pub mod content;
pub mod entry;
pub mod error;
pub mod fs;
pub mod header;
pub mod stream;

pub use archive::{ArchiveBuilder, ArchiveStream, EntrySnapshot, LoadOptions, SerializeOptions};
pub use body::EntryBody;
pub use content::Content;
pub use entry::{EntryDescriptor, EntryKind, EntryMetadata};
pub use error::{ArchiveError, ErrorKind, Result};
pub use stream::{extract, extract_with, ExtractOptions};
