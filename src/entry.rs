use std::{borrow::Cow, ffi::CStr, fmt, marker::PhantomData, ops::Range, ptr::NonNull};

use chrono::{DateTime, TimeZone, Utc};

use crate::{
    ffi,
    mode::{Mode, UnixMode},
};

/// The entry's file type, derived from the type bits of its mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// A regular file. Also used for type bits we don't recognize.
    RegularFile,

    /// A symbolic link
    Symlink,

    /// A Unix domain socket
    Socket,

    /// A character device
    CharDevice,

    /// A block device
    BlockDevice,

    /// A directory
    Directory,

    /// A named pipe
    Fifo,
}

impl From<UnixMode> for EntryKind {
    fn from(m: UnixMode) -> Self {
        match m & UnixMode::IFMT {
            UnixMode::IFLNK => Self::Symlink,
            UnixMode::IFSOCK => Self::Socket,
            UnixMode::IFCHR => Self::CharDevice,
            UnixMode::IFBLK => Self::BlockDevice,
            UnixMode::IFDIR => Self::Directory,
            UnixMode::IFIFO => Self::Fifo,
            _ => Self::RegularFile,
        }
    }
}

/// A view of the entry the reader is currently positioned on.
///
/// The engine reuses the underlying header storage for every entry, so an
/// `Entry` borrows the [ArchiveReader](crate::ArchiveReader) and goes away
/// before the next call to
/// [next_header](crate::ArchiveReader::next_header). Use [Entry::metadata]
/// to keep the values around.
pub struct Entry<'a> {
    raw: NonNull<ffi::archive_entry>,
    _reader: PhantomData<&'a mut ()>,
}

impl<'a> Entry<'a> {
    pub(crate) fn new(raw: NonNull<ffi::archive_entry>) -> Self {
        Self {
            raw,
            _reader: PhantomData,
        }
    }

    fn raw(&self) -> *mut ffi::archive_entry {
        self.raw.as_ptr()
    }

    /// Path of the entry, relative to the archive root, as raw bytes.
    pub fn path_bytes(&self) -> &[u8] {
        // SAFETY: the entry is live for as long as `self` borrows the reader
        unsafe {
            let ptr = ffi::archive_entry_pathname(self.raw());
            if ptr.is_null() {
                &[]
            } else {
                CStr::from_ptr(ptr).to_bytes()
            }
        }
    }

    /// Path of the entry, relative to the archive root. May contain `/`
    /// separators. Invalid UTF-8 is replaced.
    pub fn path(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.path_bytes())
    }

    /// Last segment of [Entry::path], ignoring trailing separators:
    /// `name` for both `dir/name` and `dir/name/`.
    pub fn name(&self) -> Cow<'_, str> {
        let path = self.path_bytes();
        String::from_utf8_lossy(&path[base_name(path)])
    }

    /// Size in bytes, as declared by the archive headers.
    ///
    /// This is not necessarily what [ArchiveReader::read_data](crate::ArchiveReader::read_data)
    /// will deliver, for example if the archive is truncated.
    pub fn size(&self) -> Option<u64> {
        // SAFETY: see path_bytes
        unsafe {
            if ffi::archive_entry_size_is_set(self.raw()) == 0 {
                None
            } else {
                Some(ffi::archive_entry_size(self.raw()).max(0) as u64)
            }
        }
    }

    /// The raw `st_mode` of the entry.
    pub fn unix_mode(&self) -> UnixMode {
        // SAFETY: see path_bytes
        UnixMode(unsafe { ffi::archive_entry_mode(self.raw()) } as u32)
    }

    /// File mode, in the `os.FileMode` flavor.
    pub fn mode(&self) -> Mode {
        self.unix_mode().into()
    }

    /// The kind of the entry: file, directory, symlink, etc.
    pub fn kind(&self) -> EntryKind {
        self.unix_mode().into()
    }

    /// True for directory entries.
    pub fn is_dir(&self) -> bool {
        self.kind() == EntryKind::Directory
    }

    /// Permission bits (lowest nine bits of the mode).
    pub fn permissions(&self) -> u32 {
        self.mode().permissions()
    }

    /// Modification time as seconds and nanoseconds since the Unix epoch,
    /// if the archive records one.
    pub fn mtime(&self) -> Option<(i64, u32)> {
        // SAFETY: see path_bytes
        unsafe {
            if ffi::archive_entry_mtime_is_set(self.raw()) == 0 {
                return None;
            }
            let secs = ffi::archive_entry_mtime(self.raw()) as i64;
            let nsecs = ffi::archive_entry_mtime_nsec(self.raw()).clamp(0, 999_999_999) as u32;
            Some((secs, nsecs))
        }
    }

    /// Modification time. Falls back to the Unix epoch if the archive does
    /// not record one.
    pub fn modified(&self) -> DateTime<Utc> {
        self.mtime()
            .and_then(|(secs, nsecs)| Utc.timestamp_opt(secs, nsecs).single())
            .unwrap_or_else(zero_datetime)
    }

    /// Copies everything out of the engine, so it survives the next call to
    /// [next_header](crate::ArchiveReader::next_header).
    pub fn metadata(&self) -> EntryMetadata {
        EntryMetadata {
            path: self.path().into_owned(),
            size: self.size(),
            kind: self.kind(),
            mode: self.mode(),
            mtime: self.mtime(),
        }
    }
}

impl fmt::Debug for Entry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.metadata(), f)
    }
}

/// An owned copy of an [Entry]'s metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    /// See [Entry::path]
    pub path: String,

    /// See [Entry::size]
    pub size: Option<u64>,

    /// See [Entry::kind]
    pub kind: EntryKind,

    /// See [Entry::mode]
    pub mode: Mode,

    /// See [Entry::mtime]
    pub mtime: Option<(i64, u32)>,
}

impl EntryMetadata {
    /// See [Entry::name]
    pub fn name(&self) -> &str {
        // '/' is ASCII, so the range falls on char boundaries
        &self.path[base_name(self.path.as_bytes())]
    }

    /// See [Entry::is_dir]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// See [Entry::modified]
    pub fn modified(&self) -> DateTime<Utc> {
        self.mtime
            .and_then(|(secs, nsecs)| Utc.timestamp_opt(secs, nsecs).single())
            .unwrap_or_else(zero_datetime)
    }
}

/// Range of the last `/`-separated segment. A path made only of separators
/// is its own name.
fn base_name(path: &[u8]) -> Range<usize> {
    let end = path.iter().rposition(|&b| b != b'/').map_or(0, |i| i + 1);
    if end == 0 {
        return 0..path.len();
    }
    let start = path[..end]
        .iter()
        .rposition(|&b| b == b'/')
        .map_or(0, |i| i + 1);
    start..end
}

pub(crate) fn zero_datetime() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}
