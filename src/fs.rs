//! The filesystem seam used to read content from disk and to materialise extracted archives.

use std::{
    fs::Metadata,
    future::Future,
    io,
    os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt},
    path::{Path, PathBuf},
};

use rustix::fs::{chown, utimensat, AtFlags, Gid, Timespec, Timestamps, Uid, CWD, UTIME_OMIT};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::entry::EntryKind;

/// What [`Filesystem::stat`] reports about a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileStat {
    /// The archive kind of the object, or `None` for sockets, which have no archive form.
    pub kind: Option<EntryKind>,
    /// Length in bytes. Only meaningful for regular files.
    pub size: u64,
    /// Permission bits, including set-user-ID, set-group-ID and sticky.
    pub mode: u32,
    /// Modification time in seconds since the Unix epoch.
    pub mtime: u64,
    /// Owning user ID.
    pub uid: u32,
    /// Owning group ID.
    pub gid: u32,
}

impl FileStat {
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == Some(EntryKind::Directory)
    }

    /// Regular files are the only objects whose content is read.
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind == Some(EntryKind::File)
    }

    fn from_metadata(meta: &Metadata) -> Self {
        let file_type = meta.file_type();
        let kind = if file_type.is_dir() {
            Some(EntryKind::Directory)
        } else if file_type.is_symlink() {
            Some(EntryKind::Symlink)
        } else if file_type.is_fifo() {
            Some(EntryKind::Fifo)
        } else if file_type.is_char_device() {
            Some(EntryKind::CharDevice)
        } else if file_type.is_block_device() {
            Some(EntryKind::BlockDevice)
        } else if file_type.is_socket() {
            None
        } else {
            Some(EntryKind::File)
        };
        FileStat {
            kind,
            size: meta.len(),
            mode: meta.mode() & 0o7777,
            mtime: u64::try_from(meta.mtime()).unwrap_or(0),
            uid: meta.uid(),
            gid: meta.gid(),
        }
    }
}

/// Operations the extractor and [`Content::from_path`](crate::Content::from_path) need from a
/// filesystem.
///
/// Paths are passed through unchanged; implementations decide how they map onto storage.
pub trait Filesystem {
    /// Reader returned by [`Filesystem::open_read`].
    type Reader: AsyncRead + Send + Unpin + 'static;
    /// Writer returned by [`Filesystem::open_write`].
    type Writer: AsyncWrite + Send + Unpin;

    /// Describe `path`, following symbolic links.
    fn stat(&self, path: &Path) -> impl Future<Output = io::Result<FileStat>>;

    /// Describe `path` itself; a symbolic link is reported as [`EntryKind::Symlink`].
    fn symlink_stat(&self, path: &Path) -> impl Future<Output = io::Result<FileStat>>;

    /// Target of the symbolic link at `path`.
    fn read_link(&self, path: &Path) -> impl Future<Output = io::Result<PathBuf>>;

    /// Create `path` and any missing parents. Existing directories are not an error.
    fn ensure_directory(&self, path: &Path) -> impl Future<Output = io::Result<()>>;

    /// Open the regular file at `path` for reading.
    fn open_read(&self, path: &Path) -> impl Future<Output = io::Result<Self::Reader>>;

    /// Open `path` for writing, creating or truncating it.
    fn open_write(&self, path: &Path) -> impl Future<Output = io::Result<Self::Writer>>;

    /// Set all permission bits of `path` to `mode`.
    fn set_mode(&self, path: &Path, mode: u32) -> impl Future<Output = io::Result<()>>;

    /// Change the owning user and group. Unprivileged callers typically get
    /// [`io::ErrorKind::PermissionDenied`].
    fn set_owner(&self, path: &Path, uid: u32, gid: u32)
        -> impl Future<Output = io::Result<()>>;

    /// Set the modification time (seconds since the epoch), leaving the access time alone.
    fn set_times(&self, path: &Path, mtime: u64) -> impl Future<Output = io::Result<()>>;
}

/// The host filesystem, through `tokio::fs` and rustix.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFs;

impl Filesystem for LocalFs {
    type Reader = tokio::fs::File;
    type Writer = tokio::fs::File;

    async fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let meta = tokio::fs::metadata(path).await?;
        Ok(FileStat::from_metadata(&meta))
    }

    async fn symlink_stat(&self, path: &Path) -> io::Result<FileStat> {
        let meta = tokio::fs::symlink_metadata(path).await?;
        Ok(FileStat::from_metadata(&meta))
    }

    async fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        tokio::fs::read_link(path).await
    }

    async fn ensure_directory(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn open_read(&self, path: &Path) -> io::Result<Self::Reader> {
        tokio::fs::File::open(path).await
    }

    async fn open_write(&self, path: &Path) -> io::Result<Self::Writer> {
        tokio::fs::File::create(path).await
    }

    async fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
    }

    async fn set_owner(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        let path = path.to_path_buf();
        unblock(move || {
            chown(&path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))?;
            Ok(())
        })
        .await
    }

    async fn set_times(&self, path: &Path, mtime: u64) -> io::Result<()> {
        let times = Timestamps {
            last_modification: Timespec {
                tv_sec: i64::try_from(mtime)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "mtime out of range"))?,
                tv_nsec: 0,
            },
            last_access: Timespec {
                tv_sec: 0,
                tv_nsec: UTIME_OMIT,
            },
        };
        let path: PathBuf = path.to_path_buf();
        unblock(move || {
            utimensat(CWD, &path, &times, AtFlags::empty())?;
            Ok(())
        })
        .await
    }
}

async fn unblock<T, F>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)?
}
