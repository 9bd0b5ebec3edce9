//! Fixed-width USTar header blocks.
//!
//! Every archive member starts with a 512-byte header. All fields are ASCII at fixed offsets:
//!
//! | Offset | Size | Field     | Encoding                                         |
//! |--------|------|-----------|--------------------------------------------------|
//! | 0      | 100  | name      | null-padded                                      |
//! | 100    | 8    | mode      | 6 octal digits, space, NUL                       |
//! | 108    | 8    | uid       | 6 octal digits, space, NUL                       |
//! | 116    | 8    | gid       | 6 octal digits, space, NUL                       |
//! | 124    | 12   | size      | 11 octal digits + NUL, or 12 digits when large   |
//! | 136    | 12   | mtime     | 11 octal digits, space                           |
//! | 148    | 8    | checksum  | 6 octal digits, NUL, space                       |
//! | 156    | 1    | typeflag  | see [`EntryKind`]                                |
//! | 157    | 100  | linkname  | null-filled when unused                          |
//! | 257    | 6    | magic     | "ustar\0"                                        |
//! | 263    | 2    | version   | "00"                                             |
//! | 265    | 32   | uname     | null-padded                                      |
//! | 297    | 32   | gname     | null-padded                                      |
//! | 329    | 8    | devmajor  | null-filled                                      |
//! | 337    | 8    | devminor  | null-filled                                      |
//! | 345    | 155  | prefix    | leading part of a split long path                |
//! | 500    | 12   | padding   | zero                                             |
//!
//! The checksum is the unsigned sum of all 512 bytes with the checksum field itself counted as
//! eight ASCII spaces. An all-zero block therefore sums to [`EMPTY_CHECKSUM`] and marks the end
//! of the archive.

use std::fmt;

use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::{
    entry::{EntryDescriptor, EntryKind},
    error::{ArchiveError, Result},
};

/// Size of a header (and of every body block) in bytes.
pub const BLOCK_SIZE: usize = 512;

/// Length of the serialized end-of-archive marker (two zero blocks).
pub const EOF_MARKER_LEN: usize = 2 * BLOCK_SIZE;

/// Capacity of the `name` field.
pub const NAME_LEN: usize = 100;

/// Capacity of the `prefix` field.
pub const PREFIX_LEN: usize = 155;

/// Magic written into new headers.
pub const USTAR_MAGIC: &[u8; 6] = b"ustar\0";

/// Version written into new headers.
pub const USTAR_VERSION: &[u8; 2] = b"00";

/// Checksum of a block whose bytes are all zero outside the checksum field.
pub const EMPTY_CHECKSUM: u64 = 8 * b' ' as u64;

const CHECKSUM_RANGE: std::ops::Range<usize> = 148..156;

/// Named view of a USTar header block.
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct UstarHeader {
    /// Final part of the path (or all of it, up to 100 bytes).
    pub name: [u8; NAME_LEN],
    /// Permission bits, octal.
    pub mode: [u8; 8],
    /// Owner user ID, octal.
    pub uid: [u8; 8],
    /// Owner group ID, octal.
    pub gid: [u8; 8],
    /// Body length, octal.
    pub size: [u8; 12],
    /// Modification time in seconds since the epoch, octal.
    pub mtime: [u8; 12],
    /// Header checksum, octal.
    pub checksum: [u8; 8],
    /// Entry kind.
    pub typeflag: u8,
    /// Link target.
    pub linkname: [u8; 100],
    /// Format magic, `ustar\0`.
    pub magic: [u8; 6],
    /// Format version, `00`.
    pub version: [u8; 2],
    /// Owner user name.
    pub uname: [u8; 32],
    /// Owner group name.
    pub gname: [u8; 32],
    /// Device major number. Never written.
    pub devmajor: [u8; 8],
    /// Device minor number. Never written.
    pub devminor: [u8; 8],
    /// Leading directories of a path longer than 100 bytes.
    pub prefix: [u8; PREFIX_LEN],
    /// Unused; zero.
    pub pad: [u8; 12],
}

impl Default for UstarHeader {
    fn default() -> Self {
        let mut header = UstarHeader::new_zeroed();
        header.magic = *USTAR_MAGIC;
        header.version = *USTAR_VERSION;
        header
    }
}

/// A 512-byte header block.
///
/// Headers produced by [`encode`] always carry a valid checksum. Headers obtained through
/// [`Header::from_bytes`] are raw views and may not.
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(transparent)]
pub struct Header {
    raw: UstarHeader,
}

impl Header {
    /// View raw block bytes as a header.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; BLOCK_SIZE]) -> &Header {
        zerocopy::transmute_ref!(bytes)
    }

    /// The raw block.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        zerocopy::transmute_ref!(&self.raw)
    }

    /// Named field access.
    #[must_use]
    pub fn fields(&self) -> &UstarHeader {
        &self.raw
    }

    /// Sum of all bytes, with the checksum field counted as spaces.
    #[must_use]
    pub fn compute_checksum(&self) -> u64 {
        self.as_bytes()
            .iter()
            .enumerate()
            .map(|(i, &byte)| {
                if CHECKSUM_RANGE.contains(&i) {
                    u64::from(b' ')
                } else {
                    u64::from(byte)
                }
            })
            .sum()
    }

    /// The checksum stored in the header.
    pub fn stored_checksum(&self) -> Result<u64> {
        octal_field(&self.raw.checksum, "checksum")
    }

    /// Verify the stored checksum against the computed one.
    pub fn verify_checksum(&self) -> Result<()> {
        let expected = self.stored_checksum()?;
        let computed = self.compute_checksum();
        if expected == computed {
            Ok(())
        } else {
            Err(ArchiveError::ChecksumMismatch { expected, computed })
        }
    }

    /// True for the end-of-archive marker block.
    #[must_use]
    pub fn is_end_of_archive(&self) -> bool {
        self.compute_checksum() == EMPTY_CHECKSUM
    }

    /// Entry kind from the typeflag byte.
    #[must_use]
    pub fn kind(&self) -> EntryKind {
        EntryKind::from_byte(self.raw.typeflag)
    }

    fn finalize(&mut self) {
        let checksum = self.compute_checksum();
        // at most 512 * 255, always fits six digits
        let digits = format!("{checksum:06o}");
        self.raw.checksum[..6].copy_from_slice(digits.as_bytes());
        self.raw.checksum[6] = b'\0';
        self.raw.checksum[7] = b' ';
    }
}

impl Default for Header {
    fn default() -> Self {
        Self {
            raw: UstarHeader::default(),
        }
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("name", &String::from_utf8_lossy(truncate_null(&self.raw.name)))
            .field(
                "prefix",
                &String::from_utf8_lossy(truncate_null(&self.raw.prefix)),
            )
            .field("kind", &self.kind())
            .field("size", &parse_numeric(&self.raw.size))
            .field("mode", &parse_numeric(&self.raw.mode).map(|m| format!("{m:04o}")))
            .finish_non_exhaustive()
    }
}

/// Outcome of decoding one block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A member header.
    Entry {
        /// The decoded fields.
        descriptor: EntryDescriptor,
        /// The block they were decoded from.
        header: Header,
    },
    /// The all-zero block that terminates an archive. Not an error.
    EndOfArchive,
}

/// Encode a descriptor into a header block with a valid checksum.
///
/// # Errors
///
/// [`ArchiveError::FilenameTooLong`] if the path cannot be split into name/prefix, and
/// [`ArchiveError::FieldOverflow`] if a numeric or text field does not fit.
pub fn encode(descriptor: &EntryDescriptor) -> Result<Header> {
    let (prefix, name) = split_path(&descriptor.relative_path)?;
    let mut header = Header::default();
    let raw = &mut header.raw;

    raw.name[..name.len()].copy_from_slice(name.as_bytes());
    raw.prefix[..prefix.len()].copy_from_slice(prefix.as_bytes());
    write_id_field(&mut raw.mode, u64::from(descriptor.mode), "mode")?;
    write_id_field(&mut raw.uid, u64::from(descriptor.uid), "uid")?;
    write_id_field(&mut raw.gid, u64::from(descriptor.gid), "gid")?;
    write_size_field(&mut raw.size, descriptor.size)?;
    write_octal(&mut raw.mtime[..11], descriptor.mtime, "mtime")?;
    raw.mtime[11] = b' ';
    raw.typeflag = descriptor.kind.to_byte();
    if let Some(target) = &descriptor.link_name {
        write_text(&mut raw.linkname, target, "linkname")?;
    }
    // owner names keep a terminating NUL
    write_text(&mut raw.uname[..31], &descriptor.owner, "uname")?;
    write_text(&mut raw.gname[..31], &descriptor.group, "gname")?;

    header.finalize();
    Ok(header)
}

/// Decode one header block.
///
/// # Errors
///
/// [`ArchiveError::ChecksumMismatch`] for a non-empty block with a bad checksum,
/// [`ArchiveError::UnsupportedMagic`] if the magic does not start with `ustar`, and
/// [`ArchiveError::CorruptedArchive`] for unparseable fields.
pub fn decode(block: &[u8; BLOCK_SIZE]) -> Result<Decoded> {
    let header = Header::from_bytes(block);
    if header.is_end_of_archive() {
        return Ok(Decoded::EndOfArchive);
    }
    header.verify_checksum()?;

    let raw = header.fields();
    if &raw.magic[..5] != b"ustar" {
        return Err(ArchiveError::UnsupportedMagic(raw.magic.to_vec()));
    }

    let name = text_field(&raw.name, "name")?;
    let name = name.trim_end_matches('/');
    let prefix = text_field(&raw.prefix, "prefix")?;
    let relative_path = if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    };
    let link_name = Some(text_field(&raw.linkname, "linkname")?)
        .filter(|l| !l.is_empty())
        .map(str::to_string);

    let descriptor = EntryDescriptor {
        relative_path,
        kind: header.kind(),
        size: numeric_field(&raw.size, "size")?,
        mtime: numeric_field(&raw.mtime, "mtime")?,
        mode: id_field(&raw.mode, "mode")?,
        uid: id_field(&raw.uid, "uid")?,
        gid: id_field(&raw.gid, "gid")?,
        owner: text_field(&raw.uname, "uname")?.to_string(),
        group: text_field(&raw.gname, "gname")?.to_string(),
        link_name,
    };
    Ok(Decoded::Entry {
        descriptor,
        header: *header,
    })
}

/// Split a path into `(prefix, name)` so that both fit their fields.
///
/// Paths of at most 100 bytes go entirely into `name`. Longer paths are split at the rightmost
/// `/` at or before byte 155.
pub fn split_path(path: &str) -> Result<(&str, &str)> {
    let bytes = path.as_bytes();
    if bytes.len() <= NAME_LEN {
        return Ok(("", path));
    }
    let limit = PREFIX_LEN.min(bytes.len() - 1);
    let pos = bytes[..=limit]
        .iter()
        .rposition(|&b| b == b'/')
        .ok_or_else(|| ArchiveError::FilenameTooLong(path.to_string()))?;
    // '/' is ASCII, so both halves are on char boundaries
    let (prefix, name) = (&path[..pos], &path[pos + 1..]);
    if name.is_empty() || name.len() > NAME_LEN || prefix.len() > PREFIX_LEN {
        return Err(ArchiveError::FilenameTooLong(path.to_string()));
    }
    Ok((prefix, name))
}

/// Parse an octal ASCII field.
///
/// Leading spaces are skipped and the value ends at the first space or NUL. An empty field
/// parses as zero.
pub fn parse_octal(bytes: &[u8]) -> Option<u64> {
    let start = bytes.iter().position(|&b| b != b' ').unwrap_or(bytes.len());
    let end = bytes[start..]
        .iter()
        .position(|&b| b == b' ' || b == b'\0')
        .map_or(bytes.len(), |i| start + i);

    bytes[start..end].iter().try_fold(0u64, |value, &byte| {
        if !(b'0'..=b'7').contains(&byte) {
            return None;
        }
        value.checked_mul(8)?.checked_add(u64::from(byte - b'0'))
    })
}

/// Parse a numeric field that may be octal ASCII or GNU base-256.
///
/// Base-256 is signalled by the high bit of the first byte; the rest is a big-endian value.
pub fn parse_numeric(bytes: &[u8]) -> Option<u64> {
    match bytes.first() {
        Some(&first) if first & 0x80 != 0 => {
            bytes[1..].iter().try_fold(u64::from(first & 0x7f), |value, &b| {
                value.checked_mul(256)?.checked_add(u64::from(b))
            })
        }
        _ => parse_octal(bytes),
    }
}

/// Truncate a byte slice at the first NUL.
#[must_use]
pub fn truncate_null(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(pos) => &bytes[..pos],
        None => bytes,
    }
}

fn octal_field(bytes: &[u8], field: &str) -> Result<u64> {
    parse_octal(bytes).ok_or_else(|| invalid_field(bytes, field))
}

fn numeric_field(bytes: &[u8], field: &str) -> Result<u64> {
    parse_numeric(bytes).ok_or_else(|| invalid_field(bytes, field))
}

fn id_field(bytes: &[u8], field: &str) -> Result<u32> {
    let value = numeric_field(bytes, field)?;
    u32::try_from(value).map_err(|_| invalid_field(bytes, field))
}

fn text_field<'a>(bytes: &'a [u8], field: &str) -> Result<&'a str> {
    std::str::from_utf8(truncate_null(bytes))
        .map_err(|_| ArchiveError::corrupted(format!("{field} field is not valid UTF-8")))
}

fn invalid_field(bytes: &[u8], field: &str) -> ArchiveError {
    ArchiveError::corrupted(format!(
        "invalid {field} field: {:?}",
        String::from_utf8_lossy(bytes)
    ))
}

/// Write `value` as zero-padded octal filling `field` exactly.
fn write_octal(field: &mut [u8], value: u64, name: &'static str) -> Result<()> {
    let digits = format!("{value:0width$o}", width = field.len());
    if digits.len() > field.len() {
        return Err(ArchiveError::FieldOverflow {
            field: name,
            value: format!("{value:#o}"),
        });
    }
    field.copy_from_slice(digits.as_bytes());
    Ok(())
}

/// mode/uid/gid: six digits, space, NUL.
fn write_id_field(field: &mut [u8; 8], value: u64, name: &'static str) -> Result<()> {
    write_octal(&mut field[..6], value, name)?;
    field[6] = b' ';
    field[7] = b'\0';
    Ok(())
}

/// Eleven digits and a NUL while the value fits, otherwise all twelve bytes are digits.
fn write_size_field(field: &mut [u8; 12], size: u64) -> Result<()> {
    if size < 1 << 33 {
        write_octal(&mut field[..11], size, "size")?;
        field[11] = b'\0';
        Ok(())
    } else {
        write_octal(field, size, "size")
    }
}

fn write_text(field: &mut [u8], text: &str, name: &'static str) -> Result<()> {
    if text.len() > field.len() {
        return Err(ArchiveError::FieldOverflow {
            field: name,
            value: format!("{text:?}"),
        });
    }
    field[..text.len()].copy_from_slice(text.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::{entry::EntryMetadata, ErrorKind};

    fn descriptor(path: &str) -> EntryDescriptor {
        EntryMetadata::file(path)
            .with_mode(0o740)
            .with_mtime(0)
            .with_owner(1000, "alice")
            .with_group(100, "users")
            .resolve(13)
            .unwrap()
    }

    fn decode_entry(header: &Header) -> EntryDescriptor {
        match decode(header.as_bytes()).unwrap() {
            Decoded::Entry { descriptor, .. } => descriptor,
            Decoded::EndOfArchive => panic!("unexpected end of archive"),
        }
    }

    #[test]
    fn test_header_size() {
        assert_eq!(std::mem::size_of::<UstarHeader>(), BLOCK_SIZE);
        assert_eq!(std::mem::size_of::<Header>(), BLOCK_SIZE);
    }

    #[test]
    fn test_field_layout() {
        let header = encode(&descriptor("foo/hello.txt")).unwrap();
        let bytes = header.as_bytes();
        assert_eq!(&bytes[0..14], b"foo/hello.txt\0");
        assert_eq!(&bytes[100..108], b"000740 \0");
        assert_eq!(&bytes[108..116], b"001750 \0");
        assert_eq!(&bytes[116..124], b"000144 \0");
        assert_eq!(&bytes[124..136], b"00000000015\0");
        assert_eq!(&bytes[136..148], b"00000000000 ");
        assert_eq!(&bytes[154..156], b"\0 ");
        assert_eq!(bytes[156], b'0');
        assert!(bytes[157..257].iter().all(|&b| b == 0));
        assert_eq!(&bytes[257..265], b"ustar\000");
        assert_eq!(&bytes[265..271], b"alice\0");
        assert_eq!(&bytes[297..303], b"users\0");
        assert!(bytes[329..345].iter().all(|&b| b == 0));
        assert!(bytes[500..512].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_checksum_validates() {
        let header = encode(&descriptor("a.txt")).unwrap();
        header.verify_checksum().unwrap();
        assert_eq!(header.stored_checksum().unwrap(), header.compute_checksum());
    }

    #[test]
    fn test_checksum_empty_block() {
        let block = [0u8; BLOCK_SIZE];
        assert_eq!(Header::from_bytes(&block).compute_checksum(), EMPTY_CHECKSUM);
        assert_eq!(decode(&block).unwrap(), Decoded::EndOfArchive);
    }

    #[test]
    fn test_decode_encode_identity() {
        let original = descriptor("foo/hello.txt");
        let header = encode(&original).unwrap();
        assert_eq!(decode_entry(&header), original);
    }

    #[test]
    fn test_decode_link_name() {
        let mut symlink = descriptor("link");
        symlink.kind = EntryKind::Symlink;
        symlink.size = 0;
        symlink.link_name = Some("target/file".into());
        let header = encode(&symlink).unwrap();
        assert_eq!(&header.as_bytes()[157..169], b"target/file\0");
        assert_eq!(decode_entry(&header), symlink);
    }

    #[test]
    fn test_corrupted_checksum() {
        let header = encode(&descriptor("a.txt")).unwrap();
        let mut bytes = *header.as_bytes();
        bytes[0] = b'b';
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, ArchiveError::ChecksumMismatch { .. }));
        assert_eq!(err.kind(), ErrorKind::Corrupted);
    }

    #[test]
    fn test_unsupported_magic() {
        let header = encode(&descriptor("a.txt")).unwrap();
        let mut bytes = *header.as_bytes();
        bytes[257..263].copy_from_slice(b"pkzip\0");
        // refresh the checksum so only the magic is wrong
        let mut fresh = *Header::from_bytes(&bytes);
        fresh.finalize();
        let err = decode(fresh.as_bytes()).unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedMagic(_)));
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_gnu_magic_accepted() {
        let header = encode(&descriptor("a.txt")).unwrap();
        let mut bytes = *header.as_bytes();
        bytes[257..265].copy_from_slice(b"ustar  \0");
        let mut fresh = *Header::from_bytes(&bytes);
        fresh.finalize();
        assert_eq!(decode_entry(&fresh).relative_path, "a.txt");
    }

    #[test]
    fn test_decode_trims_directory_slash() {
        let mut header = Header::default();
        header.raw.name[..5].copy_from_slice(b"mydir");
        header.raw.name[5] = b'/';
        header.raw.typeflag = b'5';
        header.raw.prefix[..3].copy_from_slice(b"top");
        header.finalize();
        let decoded = decode_entry(&header);
        assert_eq!(decoded.relative_path, "top/mydir");
        assert_eq!(decoded.kind, EntryKind::Directory);
    }

    #[test]
    fn test_split_short_path() {
        let path = "a".repeat(100);
        assert_eq!(split_path(&path).unwrap(), ("", path.as_str()));
    }

    #[test]
    fn test_split_150_byte_path() {
        let path = format!("{}/{}", "d".repeat(60), "f".repeat(89));
        assert_eq!(path.len(), 150);
        let (prefix, name) = split_path(&path).unwrap();
        assert_eq!(prefix.len(), 60);
        assert_eq!(name.len(), 89);

        let header = encode(&descriptor(&path)).unwrap();
        assert_eq!(decode_entry(&header).relative_path, path);
    }

    #[test]
    fn test_split_uses_rightmost_separator() {
        let path = format!("{}/{}/{}", "a".repeat(50), "b".repeat(50), "c".repeat(20));
        let (prefix, name) = split_path(&path).unwrap();
        assert_eq!(prefix, format!("{}/{}", "a".repeat(50), "b".repeat(50)));
        assert_eq!(name, "c".repeat(20));
    }

    #[test]
    fn test_split_prefix_exactly_155() {
        let path = format!("{}/{}", "p".repeat(155), "n".repeat(10));
        let (prefix, name) = split_path(&path).unwrap();
        assert_eq!(prefix.len(), PREFIX_LEN);
        assert_eq!(name.len(), 10);
    }

    #[test]
    fn test_split_single_long_segment_fails() {
        let path = "x".repeat(120);
        let err = split_path(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FilenameTooLong);
    }

    #[test]
    fn test_split_name_too_long_fails() {
        // the only separator leaves a 110-byte name
        let path = format!("dir/{}", "n".repeat(110));
        assert!(matches!(
            split_path(&path),
            Err(ArchiveError::FilenameTooLong(_))
        ));
    }

    #[test]
    fn test_split_separator_past_prefix_limit_fails() {
        let path = format!("{}/{}", "p".repeat(160), "n".repeat(10));
        assert!(matches!(
            split_path(&path),
            Err(ArchiveError::FilenameTooLong(_))
        ));
    }

    #[test]
    fn test_large_size_uses_twelve_digits() {
        let mut big = descriptor("big.bin");
        big.size = 1 << 33;
        let header = encode(&big).unwrap();
        assert_eq!(&header.as_bytes()[124..136], b"100000000000");
        assert_eq!(decode_entry(&header).size, 1 << 33);

        big.size = 1 << 36;
        assert!(matches!(
            encode(&big),
            Err(ArchiveError::FieldOverflow { field: "size", .. })
        ));
    }

    #[test]
    fn test_field_overflow() {
        let mut d = descriptor("a");
        d.uid = 0o1000000;
        assert!(matches!(
            encode(&d),
            Err(ArchiveError::FieldOverflow { field: "uid", .. })
        ));

        let mut d = descriptor("a");
        d.owner = "o".repeat(32);
        assert!(matches!(
            encode(&d),
            Err(ArchiveError::FieldOverflow { field: "uname", .. })
        ));
    }

    #[test]
    fn test_parse_octal() {
        assert_eq!(parse_octal(b"000644 \0"), Some(0o644));
        assert_eq!(parse_octal(b"     123 "), Some(0o123));
        assert_eq!(parse_octal(b"\0\0\0\0"), Some(0));
        assert_eq!(parse_octal(b"        "), Some(0));
        assert_eq!(parse_octal(b"77777777777\0"), Some(0o77777777777));
        assert_eq!(parse_octal(b"0000855\0"), None);
        assert_eq!(parse_octal(b"12a4"), None);
    }

    #[test]
    fn test_parse_numeric_base256() {
        assert_eq!(parse_numeric(&[0x80, 0x00, 0x00, 0x01]), Some(1));
        assert_eq!(parse_numeric(&[0x80, 0x00, 0x01, 0x00]), Some(256));
        assert_eq!(parse_numeric(b"0000755\0"), Some(0o755));
    }

    #[test]
    fn test_decode_invalid_octal_is_corruption() {
        let header = encode(&descriptor("a.txt")).unwrap();
        let mut bytes = *header.as_bytes();
        bytes[124..136].copy_from_slice(b"0000000009x\0");
        let mut fresh = *Header::from_bytes(&bytes);
        fresh.finalize();
        assert_eq!(
            decode(fresh.as_bytes()).unwrap_err().kind(),
            ErrorKind::Corrupted
        );
    }

    #[test]
    fn test_truncate_null() {
        assert_eq!(truncate_null(b"hello\0world"), b"hello");
        assert_eq!(truncate_null(b"no null"), b"no null");
        assert_eq!(truncate_null(b"\0"), b"");
    }

    mod proptest_tests {
        use proptest::prelude::*;

        use super::*;

        fn segment() -> impl Strategy<Value = String> {
            proptest::string::string_regex("[a-zA-Z0-9._-]{1,40}").unwrap()
        }

        fn path_strategy() -> impl Strategy<Value = String> {
            proptest::collection::vec(segment(), 1..5).prop_map(|segments| segments.join("/"))
        }

        fn kind_strategy() -> impl Strategy<Value = EntryKind> {
            prop_oneof![
                Just(EntryKind::File),
                Just(EntryKind::Directory),
                Just(EntryKind::Symlink),
                Just(EntryKind::Fifo),
                Just(EntryKind::ContiguousFile),
            ]
        }

        proptest! {
            #[test]
            fn test_decode_encode_roundtrip(
                path in path_strategy(),
                kind in kind_strategy(),
                size in 0u64..(1 << 34),
                mtime in 0u64..(1 << 33),
                mode in 0u32..0o7777,
                uid in 0u32..0o777777,
                gid in 0u32..0o777777,
            ) {
                let descriptor = EntryMetadata::new(path)
                    .with_kind(kind)
                    .with_mtime(mtime)
                    .with_mode(mode)
                    .with_owner(uid, "owner")
                    .with_group(gid, "group")
                    .resolve(size)
                    .unwrap();
                let header = encode(&descriptor).unwrap();
                header.verify_checksum().unwrap();
                match decode(header.as_bytes()).unwrap() {
                    Decoded::Entry { descriptor: decoded, header: decoded_header } => {
                        prop_assert_eq!(decoded, descriptor);
                        prop_assert_eq!(decoded_header, header);
                    }
                    Decoded::EndOfArchive => prop_assert!(false, "encoded header read as EOF"),
                }
            }
        }
    }
}
