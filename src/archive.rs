//! In-memory archive construction and one-shot serialization.

use std::{
    collections::VecDeque,
    fmt, io,
    pin::Pin,
    task::{ready, Context, Poll},
};

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::{
    body::{Body, BodySlot, EntryBody},
    compression::{compress, ByteStream},
    content::Content,
    entry::{parent, EntryDescriptor, EntryMetadata},
    error::{ArchiveError, Result},
    header::{self, Header, EOF_MARKER_LEN},
    stream::{extract, ExtractOptions},
};

/// Options for [`ArchiveBuilder::serialize`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SerializeOptions {
    /// Gzip-compress the output.
    pub gzip: bool,
}

/// Options for [`ArchiveBuilder::load`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// The input is gzip-compressed.
    pub gzip: bool,
}

struct Entry {
    descriptor: EntryDescriptor,
    header: Header,
    body: BodySlot,
}

impl Entry {
    fn prepare(content: Content, metadata: EntryMetadata) -> Result<Self> {
        let kind = metadata.kind.unwrap_or_default();
        let (body, size) = content.into_body(&metadata.relative_path, kind, metadata.size)?;
        let descriptor = metadata.resolve(size)?;
        let header = header::encode(&descriptor)?;
        Ok(Self {
            descriptor,
            header,
            body: BodySlot::new(body),
        })
    }
}

/// An ordered collection of archive entries.
///
/// Paths are unique: appending a path that is already present replaces that entry in place.
/// The builder can be serialized once, since serialization consumes the entry bodies.
#[derive(Default)]
pub struct ArchiveBuilder {
    entries: Vec<Entry>,
    serialized: bool,
}

impl ArchiveBuilder {
    /// An empty archive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a whole archive into memory, bodies included.
    ///
    /// Meant for archives that fit comfortably in memory. Use
    /// [`extract`](crate::stream::extract) with a destination for anything larger.
    pub async fn load(
        reader: impl AsyncRead + Send + Unpin + 'static,
        options: LoadOptions,
    ) -> Result<Self> {
        let options = ExtractOptions {
            gzip: options.gzip,
            cancel: None,
        };
        let builder = extract(reader, None, options).await?;
        Ok(builder.unwrap_or_default())
    }

    /// Append an entry, inserting any missing parent directories before it.
    ///
    /// Paths are unique. If `metadata.relative_path` is already present, the existing entry is
    /// replaced and keeps its position; nothing is appended. Use [`ArchiveBuilder::replace`] to
    /// replace only entries that exist.
    ///
    /// # Errors
    ///
    /// Fails if the content does not fit the entry kind or size, if the path cannot be encoded,
    /// or if the path already exists as a directory and the new entry is not one (or the
    /// reverse).
    pub fn append(&mut self, content: impl Into<Content>, metadata: EntryMetadata) -> Result<()> {
        let entry = Entry::prepare(content.into(), metadata)?;
        let path = &entry.descriptor.relative_path;
        if let Some(index) = self.position(path) {
            if self.entries[index].descriptor.is_dir() != entry.descriptor.is_dir() {
                return Err(ArchiveError::InvalidContent {
                    path: path.clone(),
                    reason: "path already exists with a different kind",
                });
            }
            debug!("replacing {path:?}");
            self.entries[index] = entry;
            return Ok(());
        }

        if let Some(dir) = parent(path) {
            if !self.contains(dir) {
                debug!("adding missing parent directory {dir:?}");
                self.append(Content::None, EntryMetadata::directory(dir))?;
            }
        }
        debug!(
            "appending {} {:?} ({} bytes)",
            entry.descriptor.kind, entry.descriptor.relative_path, entry.descriptor.size
        );
        self.entries.push(entry);
        Ok(())
    }

    /// Look up an entry by exact path.
    #[must_use]
    pub fn retrieve(&self, path: &str) -> Option<EntrySnapshot> {
        self.position(path).map(|index| {
            let entry = &self.entries[index];
            EntrySnapshot {
                descriptor: entry.descriptor.clone(),
                header: entry.header,
                body: entry.body.clone(),
            }
        })
    }

    /// Remove an entry by exact path. Children of a removed directory are kept.
    pub fn remove(&mut self, path: &str) -> bool {
        match self.position(path) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Replace the entry at `path`, keeping its position.
    ///
    /// The new entry takes `path` as its relative path. Returns `Ok(false)` without changing
    /// anything if `path` is not present or the new kind would turn a directory into a
    /// non-directory or the reverse.
    pub fn replace(
        &mut self,
        path: &str,
        content: impl Into<Content>,
        metadata: EntryMetadata,
    ) -> Result<bool> {
        let Some(index) = self.position(path) else {
            return Ok(false);
        };
        let metadata = EntryMetadata {
            relative_path: path.to_string(),
            ..metadata
        };
        if self.entries[index].descriptor.is_dir() != metadata.kind.unwrap_or_default().is_dir() {
            return Ok(false);
        }
        self.entries[index] = Entry::prepare(content.into(), metadata)?;
        Ok(true)
    }

    /// Turn the archive into a byte stream.
    ///
    /// Each entry is written as its header, body and zero padding to the next block boundary,
    /// followed by two zero blocks. Bodies are read lazily as the stream is consumed.
    ///
    /// # Errors
    ///
    /// [`ArchiveError::AlreadySerialized`] on any call after the first.
    pub fn serialize(&mut self, options: SerializeOptions) -> Result<ArchiveStream> {
        if self.serialized {
            return Err(ArchiveError::AlreadySerialized);
        }
        self.serialized = true;
        debug!("serializing {} entries", self.entries.len());

        let mut segments: VecDeque<ByteStream> = VecDeque::with_capacity(self.entries.len() * 3 + 1);
        for entry in &self.entries {
            let path = &entry.descriptor.relative_path;
            segments.push_back(Box::new(io::Cursor::new(entry.header.as_bytes().to_vec())));
            let body = entry
                .body
                .take()
                .into_reader()
                .ok_or_else(|| ArchiveError::BodyConsumed(path.clone()))?;
            segments.push_back(body);
            let padding = entry.descriptor.padding();
            if padding > 0 {
                segments.push_back(Box::new(tokio::io::repeat(0).take(padding)));
            }
        }
        segments.push_back(Box::new(tokio::io::repeat(0).take(EOF_MARKER_LEN as u64)));

        let stream = Concat { segments };
        let inner: ByteStream = if options.gzip {
            compress(stream)
        } else {
            Box::new(stream)
        };
        Ok(ArchiveStream { inner })
    }

    /// Estimated length of the uncompressed serialized archive.
    ///
    /// Computed from the declared entry sizes; informational only.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.entries
            .iter()
            .map(|entry| entry.descriptor.stored_size())
            .sum::<u64>()
            + EOF_MARKER_LEN as u64
    }

    /// Number of entries, synthesized parent directories included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if an entry has exactly this relative path.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.position(path).is_some()
    }

    /// Entry descriptors in archive order.
    pub fn entries(&self) -> impl Iterator<Item = &EntryDescriptor> {
        self.entries.iter().map(|entry| &entry.descriptor)
    }

    /// Insert an entry read from an archive, keeping its original header bytes.
    pub(crate) fn insert_decoded(
        &mut self,
        descriptor: EntryDescriptor,
        header: Header,
        body: Vec<u8>,
    ) {
        let entry = Entry {
            descriptor,
            header,
            body: BodySlot::new(Body::bytes(body)),
        };
        match self.position(&entry.descriptor.relative_path) {
            // later members win, as they would on disk
            Some(index) => self.entries[index] = entry,
            None => self.entries.push(entry),
        }
    }

    fn position(&self, path: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.descriptor.relative_path == path)
    }
}

impl fmt::Debug for ArchiveBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveBuilder")
            .field("entries", &self.entries().collect::<Vec<_>>())
            .field("serialized", &self.serialized)
            .finish()
    }
}

/// A retrieved entry: its descriptor, header bytes and a lazily forked body.
pub struct EntrySnapshot {
    descriptor: EntryDescriptor,
    header: Header,
    body: BodySlot,
}

impl EntrySnapshot {
    /// The resolved metadata of the entry.
    #[must_use]
    pub fn descriptor(&self) -> &EntryDescriptor {
        &self.descriptor
    }

    /// The header block as it is serialized.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// An independent reader over the body.
    ///
    /// The archive's own copy stays readable for a later `serialize`. See the [`body`
    /// module](crate::body) docs for the memory cost of reading one side and not the other.
    #[must_use]
    pub fn body(&self) -> EntryBody {
        EntryBody::new(self.body.clone(), self.descriptor.relative_path.clone())
    }

    /// Read the whole body.
    pub async fn read_to_vec(&self) -> Result<Vec<u8>> {
        if let Some(bytes) = self.body.bytes() {
            return Ok(bytes.to_vec());
        }
        let mut out = Vec::with_capacity(usize::try_from(self.descriptor.size).unwrap_or(0));
        self.body()
            .read_to_end(&mut out)
            .await
            .map_err(ArchiveError::from_io)?;
        Ok(out)
    }
}

impl fmt::Debug for EntrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntrySnapshot")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// The serialized archive, produced by [`ArchiveBuilder::serialize`].
pub struct ArchiveStream {
    inner: ByteStream,
}

impl fmt::Debug for ArchiveStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveStream").finish_non_exhaustive()
    }
}

impl AsyncRead for ArchiveStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Reads each segment to its end in turn.
struct Concat {
    segments: VecDeque<ByteStream>,
}

impl AsyncRead for Concat {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        while let Some(segment) = self.segments.front_mut() {
            let before = buf.filled().len();
            ready!(Pin::new(segment).poll_read(cx, buf))?;
            if buf.filled().len() > before {
                return Poll::Ready(Ok(()));
            }
            self.segments.pop_front();
        }
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::entry::EntryKind;

    async fn serialize_to_vec(builder: &mut ArchiveBuilder) -> Vec<u8> {
        let mut out = vec![];
        builder
            .serialize(SerializeOptions::default())
            .unwrap()
            .read_to_end(&mut out)
            .await
            .unwrap();
        out
    }

    fn paths(builder: &ArchiveBuilder) -> Vec<&str> {
        builder.entries().map(|d| d.relative_path.as_str()).collect()
    }

    #[test]
    fn test_append_synthesizes_parents_top_down() {
        let mut builder = ArchiveBuilder::new();
        builder
            .append("hi", EntryMetadata::file("a/b/c/hello.txt"))
            .unwrap();
        builder.append("x", EntryMetadata::file("a/b/x.txt")).unwrap();
        assert_eq!(paths(&builder), ["a", "a/b", "a/b/c", "a/b/c/hello.txt", "a/b/x.txt"]);
        let dir = builder.retrieve("a/b").unwrap();
        assert_eq!(dir.descriptor().kind, EntryKind::Directory);
        assert_eq!(dir.descriptor().mode, 0o755);
    }

    #[test]
    fn test_append_existing_path_replaces_in_place() {
        let mut builder = ArchiveBuilder::new();
        builder.append("one", EntryMetadata::file("a.txt")).unwrap();
        builder.append("two", EntryMetadata::file("b.txt")).unwrap();
        builder
            .append("three!", EntryMetadata::file("a.txt"))
            .unwrap();
        assert_eq!(paths(&builder), ["a.txt", "b.txt"]);
        assert_eq!(builder.retrieve("a.txt").unwrap().descriptor().size, 6);

        let err = builder
            .append(Content::None, EntryMetadata::directory("a.txt"))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Format);
    }

    #[test]
    fn test_failed_append_leaves_builder_untouched() {
        let mut builder = ArchiveBuilder::new();
        let path = format!("dir/{}", "n".repeat(120));
        let err = builder.append("x", EntryMetadata::file(path)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::FilenameTooLong);
        assert!(builder.is_empty());
    }

    #[test]
    fn test_remove() {
        let mut builder = ArchiveBuilder::new();
        builder.append("x", EntryMetadata::file("d/x")).unwrap();
        assert!(builder.remove("d/x"));
        assert!(!builder.remove("d/x"));
        assert_eq!(paths(&builder), ["d"]);
    }

    #[test]
    fn test_replace() {
        let mut builder = ArchiveBuilder::new();
        builder.append("old", EntryMetadata::file("a.txt")).unwrap();
        builder.append("b", EntryMetadata::file("b.txt")).unwrap();

        let replaced = builder
            .replace("a.txt", "newer", EntryMetadata::new("ignored.txt").with_mode(0o600))
            .unwrap();
        assert!(replaced);
        assert_eq!(paths(&builder), ["a.txt", "b.txt"]);
        let snapshot = builder.retrieve("a.txt").unwrap();
        assert_eq!(snapshot.descriptor().size, 5);
        assert_eq!(snapshot.descriptor().mode, 0o600);

        assert!(!builder
            .replace("missing", "x", EntryMetadata::new("missing"))
            .unwrap());
        assert!(!builder
            .replace("a.txt", Content::None, EntryMetadata::directory("a.txt"))
            .unwrap());
    }

    #[test]
    fn test_size() {
        let mut builder = ArchiveBuilder::new();
        assert_eq!(builder.size(), 1024);
        builder.append("Hello, World!", EntryMetadata::file("foo/hello.txt")).unwrap();
        // directory header, file header, one body block, EOF marker
        assert_eq!(builder.size(), 512 + 512 + 512 + 1024);
    }

    #[tokio::test]
    async fn test_serialize_layout() {
        let mut builder = ArchiveBuilder::new();
        builder
            .append(
                "Hello, World!",
                EntryMetadata::file("hello.txt").with_mtime(0),
            )
            .unwrap();
        builder
            .append(Content::None, EntryMetadata::directory("empty").with_mtime(0))
            .unwrap();
        let expected_size = builder.size();
        let data = serialize_to_vec(&mut builder).await;

        assert_eq!(data.len() as u64, expected_size);
        assert_eq!(data.len(), 512 + 512 + 512 + 1024);
        let first = builder.retrieve("hello.txt").unwrap();
        assert_eq!(&data[..512], first.header().as_bytes());
        assert_eq!(&data[512..525], b"Hello, World!");
        assert!(data[525..1024].iter().all(|&b| b == 0));
        assert_eq!(&data[1024..1029], b"empty");
        assert!(data[1536..].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_serialize_twice_fails() {
        let mut builder = ArchiveBuilder::new();
        builder.append("x", EntryMetadata::file("x")).unwrap();
        serialize_to_vec(&mut builder).await;
        assert!(matches!(
            builder.serialize(SerializeOptions::default()),
            Err(ArchiveError::AlreadySerialized)
        ));
    }

    #[tokio::test]
    async fn test_stream_content_serializes_lazily() {
        let data: Vec<u8> = (0..3000u32).map(|i| (i % 7) as u8).collect();
        let mut builder = ArchiveBuilder::new();
        builder
            .append(
                Content::stream(io::Cursor::new(data.clone()), data.len() as u64),
                EntryMetadata::file("stream.bin"),
            )
            .unwrap();

        let snapshot = builder.retrieve("stream.bin").unwrap();
        assert_eq!(snapshot.read_to_vec().await.unwrap(), data);

        let out = serialize_to_vec(&mut builder).await;
        assert_eq!(&out[512..512 + data.len()], &data[..]);
        assert_eq!(out.len(), 512 + 3072 + 1024);

        // the archive copy is gone once serialized
        let err = builder
            .retrieve("stream.bin")
            .unwrap()
            .read_to_vec()
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::BodyConsumed(_)));
    }

    #[tokio::test]
    async fn test_short_stream_fails_serialization() {
        let mut builder = ArchiveBuilder::new();
        builder
            .append(Content::stream(&b"abc"[..], 10), EntryMetadata::file("short"))
            .unwrap();
        let mut out = vec![];
        let err = builder
            .serialize(SerializeOptions::default())
            .unwrap()
            .read_to_end(&mut out)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_load_roundtrip() {
        let mut builder = ArchiveBuilder::new();
        builder
            .append("Hello, World!", EntryMetadata::file("foo/hello.txt").with_mtime(0))
            .unwrap();
        let data = serialize_to_vec(&mut builder).await;

        let loaded = ArchiveBuilder::load(io::Cursor::new(data.clone()), LoadOptions::default())
            .await
            .unwrap();
        assert_eq!(paths(&loaded), ["foo", "foo/hello.txt"]);
        let hello = loaded.retrieve("foo/hello.txt").unwrap();
        assert_eq!(hello.read_to_vec().await.unwrap(), b"Hello, World!");
        assert_eq!(loaded.size(), data.len() as u64);

        let mut loaded = loaded;
        assert_eq!(serialize_to_vec(&mut loaded).await, data);
    }
}
