//! Raw declarations for the parts of libarchive this crate drives.
//!
//! Only the read side is declared. Everything here is `unsafe` to call and
//! is wrapped by [crate::ArchiveReader] and [crate::Entry].

#![allow(non_camel_case_types)]

use libc::{c_char, c_int, c_long, c_void, mode_t, size_t, ssize_t, time_t};

/// Opaque engine instance.
#[repr(C)]
pub(crate) struct archive {
    _private: [u8; 0],
}

/// Opaque per-entry metadata cursor, owned by the engine.
#[repr(C)]
pub(crate) struct archive_entry {
    _private: [u8; 0],
}

pub(crate) const ARCHIVE_EOF: c_int = 1;
pub(crate) const ARCHIVE_OK: c_int = 0;
pub(crate) const ARCHIVE_RETRY: c_int = -10;
pub(crate) const ARCHIVE_WARN: c_int = -20;
pub(crate) const ARCHIVE_FAILED: c_int = -25;
pub(crate) const ARCHIVE_FATAL: c_int = -30;

pub(crate) const ARCHIVE_ERRNO_MISC: c_int = -1;

pub(crate) type archive_open_callback =
    unsafe extern "C" fn(a: *mut archive, client_data: *mut c_void) -> c_int;

pub(crate) type archive_read_callback = unsafe extern "C" fn(
    a: *mut archive,
    client_data: *mut c_void,
    buffer: *mut *const c_void,
) -> ssize_t;

pub(crate) type archive_seek_callback = unsafe extern "C" fn(
    a: *mut archive,
    client_data: *mut c_void,
    offset: i64,
    whence: c_int,
) -> i64;

pub(crate) type archive_close_callback =
    unsafe extern "C" fn(a: *mut archive, client_data: *mut c_void) -> c_int;

// linked by build.rs
extern "C" {
    pub(crate) fn archive_version_string() -> *const c_char;

    pub(crate) fn archive_read_new() -> *mut archive;
    pub(crate) fn archive_read_support_filter_all(a: *mut archive) -> c_int;
    pub(crate) fn archive_read_support_format_all(a: *mut archive) -> c_int;
    pub(crate) fn archive_read_set_seek_callback(
        a: *mut archive,
        cb: Option<archive_seek_callback>,
    ) -> c_int;
    pub(crate) fn archive_read_open(
        a: *mut archive,
        client_data: *mut c_void,
        open: Option<archive_open_callback>,
        read: Option<archive_read_callback>,
        close: Option<archive_close_callback>,
    ) -> c_int;
    pub(crate) fn archive_read_next_header(
        a: *mut archive,
        entry: *mut *mut archive_entry,
    ) -> c_int;
    pub(crate) fn archive_read_data(a: *mut archive, buf: *mut c_void, len: size_t) -> ssize_t;
    pub(crate) fn archive_read_data_skip(a: *mut archive) -> c_int;
    pub(crate) fn archive_read_close(a: *mut archive) -> c_int;
    pub(crate) fn archive_read_free(a: *mut archive) -> c_int;

    pub(crate) fn archive_filter_count(a: *mut archive) -> c_int;
    pub(crate) fn archive_filter_bytes(a: *mut archive, n: c_int) -> i64;
    pub(crate) fn archive_filter_name(a: *mut archive, n: c_int) -> *const c_char;
    pub(crate) fn archive_format_name(a: *mut archive) -> *const c_char;

    pub(crate) fn archive_errno(a: *mut archive) -> c_int;
    pub(crate) fn archive_error_string(a: *mut archive) -> *const c_char;
    pub(crate) fn archive_set_error(a: *mut archive, err: c_int, fmt: *const c_char, ...);

    pub(crate) fn archive_entry_pathname(e: *mut archive_entry) -> *const c_char;
    pub(crate) fn archive_entry_size(e: *mut archive_entry) -> i64;
    pub(crate) fn archive_entry_size_is_set(e: *mut archive_entry) -> c_int;
    pub(crate) fn archive_entry_mode(e: *mut archive_entry) -> mode_t;
    pub(crate) fn archive_entry_mtime(e: *mut archive_entry) -> time_t;
    pub(crate) fn archive_entry_mtime_nsec(e: *mut archive_entry) -> c_long;
    pub(crate) fn archive_entry_mtime_is_set(e: *mut archive_entry) -> c_int;
}
