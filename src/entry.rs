//! Entry kinds and the metadata records carried by every archive member.

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    error::{ArchiveError, Result},
    header::BLOCK_SIZE,
};

/// Default permission bits for directories.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Default permission bits for everything that is not a directory.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Kind of filesystem object an entry describes.
///
/// The kind is stored as a single ASCII digit in the header's typeflag field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Regular file (type '0', or '\0' in old archives).
    #[default]
    File,
    /// Hard link to another member of the archive (type '1').
    Link,
    /// Symbolic link (type '2').
    Symlink,
    /// Character device (type '3').
    CharDevice,
    /// Block device (type '4').
    BlockDevice,
    /// Directory (type '5').
    Directory,
    /// FIFO/named pipe (type '6').
    Fifo,
    /// Contiguous file (type '7').
    ContiguousFile,
}

impl EntryKind {
    /// Parse a typeflag byte. Unknown values are treated as regular files.
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            b'1' => EntryKind::Link,
            b'2' => EntryKind::Symlink,
            b'3' => EntryKind::CharDevice,
            b'4' => EntryKind::BlockDevice,
            b'5' => EntryKind::Directory,
            b'6' => EntryKind::Fifo,
            b'7' => EntryKind::ContiguousFile,
            _ => EntryKind::File,
        }
    }

    /// The typeflag byte written for this kind.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            EntryKind::File => b'0',
            EntryKind::Link => b'1',
            EntryKind::Symlink => b'2',
            EntryKind::CharDevice => b'3',
            EntryKind::BlockDevice => b'4',
            EntryKind::Directory => b'5',
            EntryKind::Fifo => b'6',
            EntryKind::ContiguousFile => b'7',
        }
    }

    /// True for [`EntryKind::Directory`].
    #[must_use]
    pub fn is_dir(self) -> bool {
        self == EntryKind::Directory
    }

    /// Regular and contiguous files are the only kinds that require a body.
    #[must_use]
    pub fn is_file(self) -> bool {
        matches!(self, EntryKind::File | EntryKind::ContiguousFile)
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntryKind::File => "file",
            EntryKind::Link => "link",
            EntryKind::Symlink => "symlink",
            EntryKind::CharDevice => "character-device",
            EntryKind::BlockDevice => "block-device",
            EntryKind::Directory => "directory",
            EntryKind::Fifo => "fifo",
            EntryKind::ContiguousFile => "contiguous-file",
        })
    }
}

/// Caller-supplied metadata for an entry being appended.
///
/// Every field except `relative_path` is optional; missing values are filled in when the entry
/// is resolved into an [`EntryDescriptor`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Path of the entry inside the archive, `/`-separated.
    pub relative_path: String,
    /// Defaults to [`EntryKind::File`].
    pub kind: Option<EntryKind>,
    /// Body length. Required only when it cannot be derived from the content.
    pub size: Option<u64>,
    /// Modification time in seconds since the Unix epoch. Defaults to now.
    pub mtime: Option<u64>,
    /// Permission bits. Defaults to 0o755 for directories and 0o644 otherwise.
    pub mode: Option<u32>,
    /// Owner user ID. Defaults to 0.
    pub uid: u32,
    /// Owner group ID. Defaults to 0.
    pub gid: u32,
    /// Owner user name.
    pub owner: String,
    /// Owner group name.
    pub group: String,
    /// Target of a hard or symbolic link.
    pub link_name: Option<String>,
}

impl EntryMetadata {
    /// Metadata with every optional field unset.
    pub fn new(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            ..Default::default()
        }
    }

    /// Metadata for a regular file.
    pub fn file(relative_path: impl Into<String>) -> Self {
        Self::new(relative_path).with_kind(EntryKind::File)
    }

    /// Metadata for a directory.
    pub fn directory(relative_path: impl Into<String>) -> Self {
        Self::new(relative_path).with_kind(EntryKind::Directory)
    }

    /// Set the entry kind.
    #[must_use]
    pub fn with_kind(mut self, kind: EntryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Set the permission bits.
    #[must_use]
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set the modification time, in seconds since the Unix epoch.
    #[must_use]
    pub fn with_mtime(mut self, mtime: u64) -> Self {
        self.mtime = Some(mtime);
        self
    }

    /// Declare the body length, checked against the content when appended.
    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the owner user ID and name.
    #[must_use]
    pub fn with_owner(mut self, uid: u32, owner: impl Into<String>) -> Self {
        self.uid = uid;
        self.owner = owner.into();
        self
    }

    /// Set the owner group ID and name.
    #[must_use]
    pub fn with_group(mut self, gid: u32, group: impl Into<String>) -> Self {
        self.gid = gid;
        self.group = group.into();
        self
    }

    /// Set the link target of a hard or symbolic link.
    #[must_use]
    pub fn with_link_name(mut self, target: impl Into<String>) -> Self {
        self.link_name = Some(target.into());
        self
    }

    /// Fill in defaults and produce the record that gets encoded.
    ///
    /// `size` is the body length established by the caller; it is forced to zero for directories.
    pub(crate) fn resolve(self, size: u64) -> Result<EntryDescriptor> {
        let kind = self.kind.unwrap_or_default();
        let relative_path = self.relative_path.trim_end_matches('/').to_string();
        if relative_path.is_empty() {
            return Err(ArchiveError::InvalidContent {
                path: self.relative_path,
                reason: "empty relative path",
            });
        }
        let mode = self.mode.unwrap_or(if kind.is_dir() {
            DEFAULT_DIR_MODE
        } else {
            DEFAULT_FILE_MODE
        });
        Ok(EntryDescriptor {
            relative_path,
            kind,
            size: if kind.is_dir() { 0 } else { size },
            mtime: self.mtime.unwrap_or_else(now),
            mode,
            uid: self.uid,
            gid: self.gid,
            owner: self.owner,
            group: self.group,
            link_name: self.link_name,
        })
    }
}

/// Fully resolved description of an archive member, as encoded in its header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryDescriptor {
    /// `(prefix + "/")? + name`, without a trailing slash.
    pub relative_path: String,
    /// What the entry describes.
    pub kind: EntryKind,
    /// Body length in bytes; always 0 for directories.
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub mtime: u64,
    /// Permission bits.
    pub mode: u32,
    /// Owner user ID.
    pub uid: u32,
    /// Owner group ID.
    pub gid: u32,
    /// Owner user name, possibly empty.
    pub owner: String,
    /// Owner group name, possibly empty.
    pub group: String,
    /// Target of a hard or symbolic link.
    pub link_name: Option<String>,
}

impl EntryDescriptor {
    /// The final path segment.
    #[must_use]
    pub fn name(&self) -> &str {
        basename(&self.relative_path)
    }

    /// True for directory entries.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Zero bytes needed after the body to reach a block boundary.
    #[must_use]
    pub fn padding(&self) -> u64 {
        padding_for(self.size)
    }

    /// Bytes this entry occupies in a serialized archive: header, body and padding.
    #[must_use]
    pub fn stored_size(&self) -> u64 {
        BLOCK_SIZE as u64 + self.size + self.padding()
    }
}

/// `(512 - size % 512) % 512`
#[must_use]
pub fn padding_for(size: u64) -> u64 {
    let block = BLOCK_SIZE as u64;
    (block - size % block) % block
}

/// Last `/`-separated segment of an archive path.
pub(crate) fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Everything before the last `/`, or `None` for top-level paths.
pub(crate) fn parent(path: &str) -> Option<&str> {
    path.rfind('/')
        .map(|pos| &path[..pos])
        .filter(|p| !p.is_empty())
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
