#![warn(missing_docs)]

//! rc-archive reads archives as a stream of entries, on top of
//! [libarchive](https://libarchive.org).
//!
//! Give it any byte source: it figures out the compression filters (gzip,
//! bzip2, xz, zstd, ...) and the container format (tar, zip, cpio, 7z, ...)
//! from the data itself, then lets you walk the entries in the order they
//! appear and read each one's decompressed contents through [std::io::Read].
//!
//! ```no_run
//! use std::{fs::File, io::Read};
//! use rc_archive::ArchiveReader;
//!
//! let mut reader = ArchiveReader::new(File::open("logs.tar.gz")?)?;
//! while let Some(entry) = reader.next_entry()? {
//!     let path = entry.path().into_owned();
//!     let mut contents = Vec::new();
//!     reader.read_to_end(&mut contents)?;
//!     println!("{path}: {} bytes", contents.len());
//! }
//! reader.free()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Decoding itself is entirely libarchive's business: this crate feeds it
//! bytes through callbacks and maps what comes back into Rust types.

mod bridge;
mod entry;
mod error;
mod ffi;
mod mode;
mod reader;
mod registry;

pub use entry::{Entry, EntryKind, EntryMetadata};
pub use error::{Error, ErrorKind, SeekError};
pub use mode::{Mode, UnixMode};
pub use reader::{ArchiveReader, ReaderOptions, Whence};
pub use registry::Token;

/// Version string of the libarchive this crate is linked against, e.g.
/// `libarchive 3.7.2`.
pub fn version() -> String {
    // SAFETY: returns a pointer to a static string
    let ptr = unsafe { ffi::archive_version_string() };
    if ptr.is_null() {
        return String::new();
    }
    // SAFETY: non-null and NUL-terminated
    unsafe { std::ffi::CStr::from_ptr(ptr) }
        .to_string_lossy()
        .into_owned()
}
