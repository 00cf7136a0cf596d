use std::{
    ffi::CStr,
    fmt,
    io::{self, Read, Seek, SeekFrom},
    ptr::{self, NonNull},
    sync::Arc,
};

use libc::c_void;
use num_enum::TryFromPrimitive;
use tracing::{debug, trace, warn};

use crate::{
    bridge::{self, Bridge, SeekFn},
    entry::Entry,
    error::{check_read, check_status, error_string, Error, SeekError},
    ffi, registry, Token,
};

/// Base position for [ArchiveReader::seek_whence], using the usual
/// `SEEK_SET` / `SEEK_CUR` / `SEEK_END` numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(i32)]
pub enum Whence {
    /// Relative to offset zero
    Start = 0,
    /// Relative to the reader's logical offset
    Current = 1,
    /// Relative to [ArchiveReader::size]
    End = 2,
}

/// Options for opening an [ArchiveReader].
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    buffer_size: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            buffer_size: Self::DEFAULT_BUFFER_SIZE,
        }
    }
}

impl ReaderOptions {
    /// How many bytes the engine asks the byte source for, at most, per read
    /// callback.
    pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the size of the scratch buffer filled by each read callback.
    /// Values below 1 are bumped to 1.
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Opens a seekable byte source. The engine may seek it, which some
    /// formats (zip, 7z) need to read their central directory.
    pub fn open<R>(&self, source: R) -> Result<ArchiveReader<R>, Error>
    where
        R: Read + Seek + Send + 'static,
    {
        let seek: SeekFn<R> = <R as Seek>::seek;
        ArchiveReader::open_with(source, self, Some(seek))
    }

    /// Opens a byte source that can only be read front to back.
    pub fn open_streaming<R>(&self, source: R) -> Result<ArchiveReader<R>, Error>
    where
        R: Read + Send + 'static,
    {
        ArchiveReader::open_with(source, self, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Positioned before the first header, or on a header whose data hasn't
    /// been read yet
    Opened,

    /// Some data of the current entry has been read
    EntryActive,

    /// The engine reported the end of the archive
    Exhausted,

    /// `close` was called
    Closed,
}

/// Owns the engine instance and its registry slot.
///
/// Dropping it releases both, in that order: the engine may still call back
/// while it is being released.
struct Engine {
    raw: Option<NonNull<ffi::archive>>,

    /// Boxed so the pointer handed to the engine as client data stays put
    token: Box<Token>,
}

// SAFETY: the engine instance is only ever reached through `&mut` of its
// single owner, and libarchive keeps no thread-local state per instance.
unsafe impl Send for Engine {}

impl Engine {
    fn as_ptr(&self) -> *mut ffi::archive {
        self.raw.map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    fn client_data(&mut self) -> *mut c_void {
        &mut *self.token as *mut Token as *mut c_void
    }

    fn free(mut self) -> Result<(), Error> {
        self.release()
    }

    fn release(&mut self) -> Result<(), Error> {
        let Some(raw) = self.raw.take() else {
            return Ok(());
        };

        // SAFETY: `raw` came from archive_read_new and is released only here
        let code = unsafe { ffi::archive_read_free(raw.as_ptr()) };
        registry::deregister(*self.token);
        debug!(token = %self.token, %code, "freed archive");

        if code == ffi::ARCHIVE_FATAL {
            return Err(Error::fatal("could not release archive"));
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(%e, "while dropping archive reader");
        }
    }
}

/// Reads an archive front to back, entry by entry.
///
/// Compression filters (gzip, bzip2, xz, zstd, ...) and the container format
/// (tar, zip, cpio, 7z, ...) are detected by the engine from the stream's
/// leading bytes.
///
/// The reader holds a single cursor: [Self::next_header] moves it to the
/// next entry, and [Self::read_data] (or [std::io::Read]) delivers the
/// decompressed bytes of the entry it is on.
///
/// ```no_run
/// use std::{fs::File, io};
/// use rc_archive::ArchiveReader;
///
/// let mut reader = ArchiveReader::new(File::open("some.tar.gz")?)?;
/// while let Some(entry) = reader.next_entry()? {
///     println!("{} ({:?})", entry.path(), entry.kind());
///     io::copy(&mut reader, &mut io::sink())?;
/// }
/// reader.close()?;
/// reader.free()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
///
/// A reader must not be used from several threads at once; it is [Send] but
/// not [Sync].
pub struct ArchiveReader<R> {
    engine: Engine,
    bridge: Arc<Bridge<R>>,

    /// Logical read offset, advanced by every successful read and moved by
    /// [Self::seek]. Not reset between entries.
    offset: u64,

    state: State,
    headers_read: u64,
}

impl<R> ArchiveReader<R>
where
    R: Read + Seek + Send + 'static,
{
    /// Opens a seekable byte source with default options.
    pub fn new(source: R) -> Result<Self, Error> {
        ReaderOptions::default().open(source)
    }
}

impl<R> ArchiveReader<R>
where
    R: Read + Send + 'static,
{
    /// Opens a non-seekable byte source with default options.
    pub fn new_streaming(source: R) -> Result<Self, Error> {
        ReaderOptions::default().open_streaming(source)
    }

    fn open_with(
        source: R,
        options: &ReaderOptions,
        seek: Option<SeekFn<R>>,
    ) -> Result<Self, Error> {
        let bridge = Arc::new(Bridge::new(source, options.buffer_size, seek));

        // SAFETY: plain constructor
        let raw = NonNull::new(unsafe { ffi::archive_read_new() })
            .ok_or_else(|| Error::fatal("could not allocate archive"))?;

        let token = registry::register(bridge.clone());
        let mut engine = Engine {
            raw: Some(raw),
            token: Box::new(token),
        };
        let client_data = engine.client_data();
        let a = engine.as_ptr();

        // SAFETY: `a` is live, and `client_data` points to the boxed token,
        // which outlives the engine (see Engine::release)
        unsafe {
            let code = ffi::archive_read_support_filter_all(a);
            trace!(%code, "enabled all filters");
            let code = ffi::archive_read_support_format_all(a);
            trace!(%code, "enabled all formats");

            if bridge.is_seekable() {
                check_status(
                    a,
                    ffi::archive_read_set_seek_callback(a, Some(bridge::seek_callback)),
                )?;
            }

            check_status(
                a,
                ffi::archive_read_open(
                    a,
                    client_data,
                    Some(bridge::open_callback),
                    Some(bridge::read_callback),
                    Some(bridge::close_callback),
                ),
            )
            .map_err(|e| with_source_error(&bridge, e))?;
        }

        debug!(
            %token,
            seekable = bridge.is_seekable(),
            buffer_size = bridge.buffer_size(),
            "opened archive"
        );

        Ok(Self {
            engine,
            bridge,
            offset: 0,
            state: State::Opened,
            headers_read: 0,
        })
    }
}

impl<R> ArchiveReader<R> {
    fn ensure_open(&self) -> Result<*mut ffi::archive, Error> {
        if self.state == State::Closed {
            return Err(Error::fatal("reader is closed"));
        }
        Ok(self.engine.as_ptr())
    }

    /// Advances to the next entry.
    ///
    /// Returns [Error::EndOfArchive] once there are no entries left. The
    /// returned [Entry] borrows the reader, since the engine overwrites it on
    /// the next call.
    pub fn next_header(&mut self) -> Result<Entry<'_>, Error> {
        let a = self.ensure_open()?;

        if self.state == State::Exhausted {
            // the engine refuses to be asked twice
            return Err(Error::EndOfArchive);
        }

        let mut raw = ptr::null_mut();
        // SAFETY: `a` is live, `raw` is a valid out-pointer
        let code = unsafe { ffi::archive_read_next_header(a, &mut raw) };
        // SAFETY: `code` was just produced by `a`
        if let Err(e) = unsafe { check_status(a, code) } {
            if e.is_end_of_archive() {
                debug!(headers = self.headers_read, "end of archive");
                self.state = State::Exhausted;
            }
            return Err(with_source_error(&self.bridge, e));
        }

        let raw = NonNull::new(raw).ok_or_else(|| Error::Failed {
            detail: Some("engine returned no entry".into()),
        })?;

        self.state = State::Opened;
        self.headers_read += 1;
        if self.headers_read == 1 {
            debug!(
                format = ?self.format_name(),
                filters = ?self.filter_names(),
                "detected archive layout"
            );
        }

        let entry = Entry::new(raw);
        trace!(path = %entry.path(), size = ?entry.size(), "next header");
        Ok(entry)
    }

    /// Like [Self::next_header], but the end of the archive is `Ok(None)`.
    pub fn next_entry(&mut self) -> Result<Option<Entry<'_>>, Error> {
        match self.next_header() {
            Ok(entry) => Ok(Some(entry)),
            Err(Error::EndOfArchive) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Reads decompressed bytes of the current entry into `buf`.
    ///
    /// Returns [Error::EndOfArchive] when the entry has no bytes left. An
    /// empty `buf` returns `Ok(0)` without asking the engine.
    pub fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let a = self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }
        if self.state == State::Exhausted {
            return Err(Error::EndOfArchive);
        }

        // SAFETY: `a` is live and `buf` is valid for `buf.len()` bytes
        let n = unsafe { ffi::archive_read_data(a, buf.as_mut_ptr() as *mut c_void, buf.len()) };
        trace!(%n, len = buf.len(), "read data");

        match n {
            0 => {
                self.state = State::Opened;
                Err(Error::EndOfArchive)
            }
            n if n < 0 => {
                // SAFETY: `n` was just produced by `a`
                let e = unsafe { check_read(a, n) };
                Err(with_source_error(&self.bridge, e))
            }
            n => {
                self.state = State::EntryActive;
                self.offset += n as u64;
                Ok(n as usize)
            }
        }
    }

    /// Skips whatever is left of the current entry's data.
    pub fn skip_data(&mut self) -> Result<(), Error> {
        let a = self.ensure_open()?;
        if self.state == State::Exhausted {
            return Ok(());
        }
        // SAFETY: `a` is live
        unsafe { check_status(a, ffi::archive_read_data_skip(a)) }
            .map_err(|e| with_source_error(&self.bridge, e))?;
        self.state = State::Opened;
        Ok(())
    }

    /// Moves the logical offset.
    ///
    /// This is bookkeeping only: the engine cannot reposition within a
    /// compressed entry, so the next read still continues where the last one
    /// stopped. [SeekFrom::End] is relative to [Self::size], the number of
    /// bytes consumed so far, not to the end of the entry.
    ///
    /// Fails with [Error::SeekInvalid] if the result would be negative, in
    /// which case the offset is left unchanged.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, Error> {
        let abs = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(self.offset) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.size()) + i128::from(delta),
        };
        if abs < 0 {
            let abs = i64::try_from(abs).unwrap_or(i64::MIN);
            return Err(SeekError::NegativePosition(abs).into());
        }

        self.offset = u64::try_from(abs).unwrap_or(u64::MAX);
        trace!(?pos, offset = %self.offset, "seek");
        Ok(self.offset)
    }

    /// Like [Self::seek], with a raw `whence` as found in C APIs (see
    /// [Whence]). Unknown values fail with [Error::SeekInvalid].
    pub fn seek_whence(&mut self, offset: i64, whence: i32) -> Result<u64, Error> {
        let pos = match Whence::try_from(whence) {
            Ok(Whence::Start) => match u64::try_from(offset) {
                Ok(offset) => SeekFrom::Start(offset),
                Err(_) => return Err(SeekError::NegativePosition(offset).into()),
            },
            Ok(Whence::Current) => SeekFrom::Current(offset),
            Ok(Whence::End) => SeekFrom::End(offset),
            Err(_) => return Err(SeekError::InvalidWhence(whence).into()),
        };
        self.seek(pos)
    }

    /// The logical read offset, see [Self::seek].
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total bytes consumed so far by the first filter of the chain. This is
    /// a running total that grows as the archive is read.
    pub fn size(&self) -> i64 {
        self.filter_bytes(0)
    }

    /// Number of filters in the detected chain, including the pass-through
    /// filter the engine puts at the bottom.
    pub fn filter_count(&self) -> usize {
        // SAFETY: the engine is live for as long as `self`
        let n = unsafe { ffi::archive_filter_count(self.engine.as_ptr()) };
        usize::try_from(n).unwrap_or(0)
    }

    /// Bytes consumed so far by filter `index` (0 is the one closest to the
    /// format reader, `-1` the one closest to the byte source).
    pub fn filter_bytes(&self, index: i32) -> i64 {
        // SAFETY: the engine is live for as long as `self`
        unsafe { ffi::archive_filter_bytes(self.engine.as_ptr(), index) }
    }

    /// Names of the detected filters, from the format reader down to the byte
    /// source (e.g. `["gzip", "none"]`).
    pub fn filter_names(&self) -> Vec<String> {
        let a = self.engine.as_ptr();
        (0..self.filter_count())
            .filter_map(|i| {
                // SAFETY: the engine is live, `i` is within the chain
                let ptr = unsafe { ffi::archive_filter_name(a, i as i32) };
                cstr_to_string(ptr)
            })
            .collect()
    }

    /// Name of the detected container format. Only known once the first
    /// header has been read.
    pub fn format_name(&self) -> Option<String> {
        // SAFETY: the engine is live for as long as `self`
        cstr_to_string(unsafe { ffi::archive_format_name(self.engine.as_ptr()) })
    }

    /// This reader's registry token.
    pub fn token(&self) -> Token {
        *self.engine.token
    }

    /// Tells the engine we're done with the stream.
    ///
    /// After this, [Self::next_header] and [Self::read_data] fail. Closing
    /// twice is a no-op. The reader still needs to be released with
    /// [Self::free] (or dropped).
    pub fn close(&mut self) -> Result<(), Error> {
        if self.state == State::Closed {
            return Ok(());
        }

        let a = self.engine.as_ptr();
        // SAFETY: `a` is live
        let code = unsafe { ffi::archive_read_close(a) };
        self.state = State::Closed;
        debug!(token = %self.token(), %code, "closed archive");

        if code == ffi::ARCHIVE_FATAL {
            // SAFETY: `a` is live
            let detail = unsafe { error_string(a) };
            return Err(Error::Fatal { detail });
        }
        Ok(())
    }

    /// Releases the engine and removes the reader from the registry, closing
    /// it first if needed.
    ///
    /// Dropping the reader does the same thing, but discards errors.
    pub fn free(self) -> Result<(), Error> {
        self.engine.free()
    }

    /// Frees the reader and gives back the byte source.
    pub fn into_inner(self) -> Result<R, Error> {
        let ArchiveReader { engine, bridge, .. } = self;
        engine.free()?;
        let bridge = Arc::try_unwrap(bridge)
            .map_err(|_| Error::fatal("byte source is still in use"))?;
        Ok(bridge.into_inner())
    }
}

impl<R> Read for ArchiveReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.read_data(buf) {
            Ok(n) => Ok(n),
            Err(Error::EndOfArchive) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

impl<R> Seek for ArchiveReader<R> {
    /// See [ArchiveReader::seek] for the (limited) semantics.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        ArchiveReader::seek(self, pos).map_err(Into::into)
    }
}

impl<R> fmt::Debug for ArchiveReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("token", &self.token())
            .field("state", &self.state)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

/// Engine errors caused by a failing byte source carry the source's message.
fn with_source_error<R>(bridge: &Bridge<R>, e: Error) -> Error {
    match bridge.take_error() {
        Some(source) => e.with_source_error(&source),
        None => e,
    }
}

fn cstr_to_string(ptr: *const libc::c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: the engine returns NUL-terminated static or instance-owned strings
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}
