//! Drives a [`Decoder`] from an async byte source into an [`EntrySink`].

use std::{
    future::Future,
    io,
    path::{Component, Path, PathBuf},
};

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::{
    archive::ArchiveBuilder,
    compression::maybe_decompress,
    entry::EntryDescriptor,
    error::{ArchiveError, Result},
    fs::{Filesystem, LocalFs},
    header::Header,
    stream::decoder::{Decoder, Event},
};

const READ_CHUNK: usize = 64 * 1024;

/// Options for [`extract`].
#[derive(Clone, Debug, Default)]
pub struct ExtractOptions {
    /// The input is gzip-compressed.
    pub gzip: bool,
    /// Stops extraction at the next read once cancelled.
    pub cancel: Option<CancellationToken>,
}

/// Receives decoded entries in archive order.
pub trait EntrySink {
    /// A new entry starts. `header` is the block it was decoded from.
    fn begin(
        &mut self,
        descriptor: EntryDescriptor,
        header: Header,
    ) -> impl Future<Output = Result<()>>;

    /// The next slice of the current entry's body.
    fn write(&mut self, data: Vec<u8>) -> impl Future<Output = Result<()>>;

    /// The current entry's body is complete. Called for every entry, directories included.
    fn end(&mut self) -> impl Future<Output = Result<()>>;

    /// Called once after the last entry.
    fn finish(&mut self) -> impl Future<Output = Result<()>> {
        async { Ok(()) }
    }
}

/// Decode `reader` into `sink`.
///
/// The source is read to its end so trailing data after the end-of-archive marker can be
/// checked. With a cancellation token, every read races it and a cancelled run drops the source
/// and fails with [`ArchiveError::Cancelled`].
pub async fn decode_into<S: EntrySink>(
    mut reader: impl AsyncRead + Unpin,
    sink: &mut S,
    cancel: Option<&CancellationToken>,
) -> Result<()> {
    let mut decoder = Decoder::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = match cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => return Err(ArchiveError::Cancelled),
                read = reader.read(&mut buf) => read.map_err(ArchiveError::from_io)?,
            },
            None => reader.read(&mut buf).await.map_err(ArchiveError::from_io)?,
        };
        if n == 0 {
            decoder.finish()?;
            break;
        }
        decoder.push(&buf[..n])?;
        while let Some(event) = decoder.next_event()? {
            match event {
                Event::Entry { descriptor, header } => sink.begin(descriptor, header).await?,
                Event::Data(data) => sink.write(data).await?,
                Event::EntryEnd => sink.end().await?,
                Event::End => debug!("end of archive"),
            }
        }
    }
    sink.finish().await
}

/// Extract an archive.
///
/// Without a destination every entry is buffered in memory and the populated builder is
/// returned. With one, entries are written below it on the local filesystem.
pub async fn extract(
    reader: impl AsyncRead + Send + Unpin + 'static,
    destination: Option<&Path>,
    options: ExtractOptions,
) -> Result<Option<ArchiveBuilder>> {
    match destination {
        None => {
            let reader = maybe_decompress(reader, options.gzip);
            let mut sink = MemorySink::default();
            decode_into(reader, &mut sink, options.cancel.as_ref()).await?;
            Ok(Some(sink.into_builder()))
        }
        Some(destination) => {
            extract_with(reader, &LocalFs, destination, options).await?;
            Ok(None)
        }
    }
}

/// Extract an archive below `destination` through `fs`.
pub async fn extract_with<F: Filesystem>(
    reader: impl AsyncRead + Send + Unpin + 'static,
    fs: &F,
    destination: &Path,
    options: ExtractOptions,
) -> Result<()> {
    let reader = maybe_decompress(reader, options.gzip);
    fs.ensure_directory(destination).await?;
    let mut sink = DestinationSink::new(fs, destination);
    decode_into(reader, &mut sink, options.cancel.as_ref()).await
}

/// Collects every entry, body included, into an [`ArchiveBuilder`].
#[derive(Default)]
pub struct MemorySink {
    builder: ArchiveBuilder,
    current: Option<(EntryDescriptor, Header, Vec<u8>)>,
}

impl MemorySink {
    /// The entries collected so far, in archive order.
    #[must_use]
    pub fn into_builder(self) -> ArchiveBuilder {
        self.builder
    }
}

impl EntrySink for MemorySink {
    async fn begin(&mut self, descriptor: EntryDescriptor, header: Header) -> Result<()> {
        let capacity = usize::try_from(descriptor.size).unwrap_or(0).min(READ_CHUNK * 16);
        self.current = Some((descriptor, header, Vec::with_capacity(capacity)));
        Ok(())
    }

    async fn write(&mut self, data: Vec<u8>) -> Result<()> {
        if let Some((_, _, body)) = &mut self.current {
            if body.is_empty() {
                *body = data;
            } else {
                body.extend_from_slice(&data);
            }
        }
        Ok(())
    }

    async fn end(&mut self) -> Result<()> {
        if let Some((descriptor, header, body)) = self.current.take() {
            self.builder.insert_decoded(descriptor, header, body);
        }
        Ok(())
    }
}

enum Current<W> {
    Idle,
    File {
        descriptor: EntryDescriptor,
        path: PathBuf,
        writer: W,
    },
}

/// Writes entries below a destination directory.
///
/// Directories are created as soon as their header is seen, with owner write permission so
/// their children can be written. Their recorded mode, owner and mtime are applied once the
/// archive is complete, deepest first.
pub struct DestinationSink<'a, F: Filesystem> {
    fs: &'a F,
    root: PathBuf,
    current: Current<F::Writer>,
    directories: Vec<(PathBuf, EntryDescriptor)>,
}

impl<'a, F: Filesystem> DestinationSink<'a, F> {
    /// A sink writing below `root`, which must already exist.
    pub fn new(fs: &'a F, root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
            current: Current::Idle,
            directories: vec![],
        }
    }

    /// Owner first: changing it clears the set-user-ID and set-group-ID bits.
    async fn restore_metadata(&self, path: &Path, descriptor: &EntryDescriptor) -> Result<()> {
        match self
            .fs
            .set_owner(path, descriptor.uid, descriptor.gid)
            .await
        {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!(
                    "not restoring owner {}:{} of {path:?}: {e}",
                    descriptor.uid, descriptor.gid
                );
            }
            Err(e) => return Err(e.into()),
        }
        self.fs.set_mode(path, descriptor.mode).await?;
        self.fs.set_times(path, descriptor.mtime).await?;
        Ok(())
    }
}

impl<F: Filesystem> EntrySink for DestinationSink<'_, F> {
    async fn begin(&mut self, descriptor: EntryDescriptor, _header: Header) -> Result<()> {
        let path = safe_join(&self.root, &descriptor.relative_path)?;
        if descriptor.is_dir() {
            debug!("creating directory {path:?}");
            self.fs.ensure_directory(&path).await?;
            self.fs.set_mode(&path, descriptor.mode | 0o700).await?;
            self.directories.push((path, descriptor));
            return Ok(());
        }

        debug!("extracting {} {path:?} ({} bytes)", descriptor.kind, descriptor.size);
        if let Some(parent) = path.parent() {
            self.fs.ensure_directory(parent).await?;
        }
        let writer = self.fs.open_write(&path).await?;
        self.current = Current::File {
            descriptor,
            path,
            writer,
        };
        Ok(())
    }

    async fn write(&mut self, data: Vec<u8>) -> Result<()> {
        if let Current::File { writer, .. } = &mut self.current {
            writer.write_all(&data).await?;
        }
        Ok(())
    }

    async fn end(&mut self) -> Result<()> {
        if let Current::File {
            descriptor,
            path,
            mut writer,
        } = std::mem::replace(&mut self.current, Current::Idle)
        {
            writer.shutdown().await?;
            drop(writer);
            self.restore_metadata(&path, &descriptor).await?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        let mut directories = std::mem::take(&mut self.directories);
        directories.sort_by_key(|(path, _)| std::cmp::Reverse(path.components().count()));
        for (path, descriptor) in &directories {
            self.restore_metadata(path, descriptor).await?;
        }
        Ok(())
    }
}

/// Join an archive path below `root`, refusing anything that could escape it.
pub(crate) fn safe_join(root: &Path, relative: &str) -> Result<PathBuf> {
    let mut path = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) | Component::ParentDir => {
                return Err(ArchiveError::UnsafePath(relative.to_string()))
            }
        }
    }
    Ok(path)
}
