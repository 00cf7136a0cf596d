//! Adapts a consumer's byte source to the engine's callback protocol.
//!
//! The engine pulls bytes by calling [read_callback] whenever its decode
//! buffers run dry. Callbacks only ever see a pointer to the reader's
//! [Token], which is resolved through the [registry](crate::registry) on
//! each call.

use std::{
    ffi::CString,
    io::{self, Read, SeekFrom},
    ptr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use libc::{c_int, c_void, ssize_t};
use tracing::{trace, warn};

use crate::{ffi, registry, Token};

/// What the registry stores for each reader: the two callbacks that touch
/// the byte source.
pub(crate) trait Callbacks: Send + Sync {
    /// Fills the scratch buffer from the source. Returns the number of bytes
    /// read (or -1) along with a pointer to the start of the scratch buffer.
    fn read(&self, archive: *mut ffi::archive) -> (isize, *const u8);

    /// Repositions the source. Returns the new absolute offset, or 0 on
    /// failure.
    fn seek(&self, offset: i64, whence: i32) -> i64;
}

pub(crate) type SeekFn<R> = fn(&mut R, SeekFrom) -> io::Result<u64>;

/// Owns the byte source and the scratch buffer handed to the engine.
pub(crate) struct Bridge<R> {
    state: Mutex<BridgeState<R>>,
}

struct BridgeState<R> {
    source: R,

    /// The engine keeps a pointer into this between two read callbacks, so
    /// it is allocated once and never resized.
    buffer: Box<[u8]>,

    seek: Option<SeekFn<R>>,

    /// The last source error handed to the engine as -1, until the reader
    /// picks it up
    last_error: Option<io::Error>,
}

impl<R> Bridge<R> {
    pub(crate) fn new(source: R, buffer_size: usize, seek: Option<SeekFn<R>>) -> Self {
        Self {
            state: Mutex::new(BridgeState {
                source,
                buffer: vec![0u8; buffer_size.max(1)].into_boxed_slice(),
                seek,
                last_error: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BridgeState<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_seekable(&self) -> bool {
        self.lock().seek.is_some()
    }

    pub(crate) fn buffer_size(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Takes the source error recorded by the last failed read callback.
    pub(crate) fn take_error(&self) -> Option<io::Error> {
        self.lock().last_error.take()
    }

    pub(crate) fn into_inner(self) -> R {
        self.state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .source
    }
}

impl<R> Callbacks for Bridge<R>
where
    R: Read + Send,
{
    fn read(&self, archive: *mut ffi::archive) -> (isize, *const u8) {
        let mut guard = self.lock();
        let state = &mut *guard;

        loop {
            match state.source.read(&mut state.buffer[..]) {
                Ok(n) => {
                    trace!("read callback: {} bytes from source", n);
                    return (n as isize, state.buffer.as_ptr());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(%e, "read callback: source failed");
                    // SAFETY: the engine passed us its own live handle
                    unsafe { set_error(archive, e.raw_os_error(), &e.to_string()) };
                    state.last_error = Some(e);
                    return (-1, ptr::null());
                }
            }
        }
    }

    fn seek(&self, offset: i64, whence: i32) -> i64 {
        let mut guard = self.lock();
        let state = &mut *guard;

        let Some(seek) = state.seek else {
            return 0;
        };
        let pos = match whence {
            libc::SEEK_SET if offset >= 0 => SeekFrom::Start(offset as u64),
            libc::SEEK_CUR => SeekFrom::Current(offset),
            libc::SEEK_END => SeekFrom::End(offset),
            _ => {
                warn!(%offset, %whence, "seek callback: invalid request");
                return 0;
            }
        };

        match seek(&mut state.source, pos) {
            Ok(abs) => {
                trace!(?pos, %abs, "seek callback");
                i64::try_from(abs).unwrap_or(0)
            }
            Err(e) => {
                warn!(%e, ?pos, "seek callback: source failed");
                0
            }
        }
    }
}

/// Records an error message on the engine, so it shows up in the detail of
/// the error the engine reports next.
///
/// # Safety
///
/// `archive` must be null or a live engine instance.
unsafe fn set_error(archive: *mut ffi::archive, errno: Option<i32>, msg: &str) {
    if archive.is_null() {
        return;
    }
    let msg = CString::new(msg.replace('\0', " ")).unwrap_or_default();
    ffi::archive_set_error(
        archive,
        errno.unwrap_or(ffi::ARCHIVE_ERRNO_MISC),
        c"%s".as_ptr(),
        msg.as_ptr(),
    );
}

/// # Safety
///
/// `client_data` must be null or point to a live [Token].
unsafe fn resolve(client_data: *mut c_void) -> Option<Arc<dyn Callbacks>> {
    if client_data.is_null() {
        return None;
    }
    let token = *(client_data as *const Token);
    let target = registry::resolve(token);
    if target.is_none() {
        warn!(%token, "callback for a reader that is not registered");
    }
    target
}

pub(crate) unsafe extern "C" fn open_callback(
    _archive: *mut ffi::archive,
    _client_data: *mut c_void,
) -> c_int {
    ffi::ARCHIVE_OK
}

pub(crate) unsafe extern "C" fn close_callback(
    _archive: *mut ffi::archive,
    _client_data: *mut c_void,
) -> c_int {
    ffi::ARCHIVE_OK
}

pub(crate) unsafe extern "C" fn read_callback(
    archive: *mut ffi::archive,
    client_data: *mut c_void,
    buffer: *mut *const c_void,
) -> ssize_t {
    let Some(target) = resolve(client_data) else {
        set_error(archive, None, "reader is not registered");
        return -1;
    };

    let (n, data) = target.read(archive);
    if n >= 0 && !buffer.is_null() {
        *buffer = data as *const c_void;
    }
    n
}

pub(crate) unsafe extern "C" fn seek_callback(
    _archive: *mut ffi::archive,
    client_data: *mut c_void,
    offset: i64,
    whence: c_int,
) -> i64 {
    match resolve(client_data) {
        Some(target) => target.seek(offset, whence),
        None => 0,
    }
}
