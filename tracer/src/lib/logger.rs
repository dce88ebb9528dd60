use crate::ffi::*;
use once_cell::race::OnceNonZeroUsize;
use std::ffi::CStr;
use std::fmt::{self, Write};
use std::num::NonZeroUsize;
use std::ptr::addr_of;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use vizzy_common::{Operation, TaggedPath, PATH_CAPACITY};

/// Longest line a single record may render to.
pub const LINE_CAPACITY: usize = 256;
/// Consecutive writes allowed to make no progress before
/// a record is given up on.
pub const MAX_WRITE_ATTEMPTS: usize = 64;

/// Rewritten in the image file by the launcher, never at run time.
#[no_mangle]
#[used]
pub static mut VIZZY_LOG_PATH: TaggedPath = TaggedPath::blank();

// Length of the patched path plus one, so that an unpatched
// slot still caches as a non-zero value.
static PATH_LEN: OnceNonZeroUsize = OnceNonZeroUsize::new();

// Records lost to truncation or I/O failure.
static RECORDS_DROPPED: AtomicUsize = AtomicUsize::new(0);

pub fn tagged_destination() -> Option<&'static CStr> {
    //! The log path the launcher patched into this image, if any.
    //! A slot without a terminator is treated like an empty one.
    let field = unsafe { &*addr_of!(VIZZY_LOG_PATH.path) };
    let len = PATH_LEN.get_or_init(|| {
        let mut len = 0;
        while len < PATH_CAPACITY && unsafe { std::ptr::read_volatile(&field[len]) } != 0 {
            len += 1;
        }
        NonZeroUsize::MIN.saturating_add(len)
    }).get() - 1;

    if len == 0 || len == PATH_CAPACITY {
        None
    } else {
        CStr::from_bytes_with_nul(&field[..=len]).ok()
    }
}

/// One observed allocator call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TraceRecord {
    pub op:     Operation,
    pub ptr:    usize,
    pub size:   Option<usize>,
    pub sec:    i64,
    pub usec:   i64,
}

impl TraceRecord {
    /// Stamps a record with the current wall-clock time.
    pub fn now(op: Operation, ptr: usize, size: Option<usize>) -> Self {
        let mut tv = libc::timeval { tv_sec: 0, tv_usec: 0 };
        unsafe { libc::gettimeofday(&mut tv, std::ptr::null_mut()) };
        Self {
            op,
            ptr,
            size,
            sec:    tv.tv_sec as i64,
            usec:   tv.tv_usec as i64,
        }
    }

    /// Renders `sec,usec,op,ptr,size\n`, leaving the size empty for `free`.
    pub fn render<W: Write>(&self, w: &mut W) -> fmt::Result {
        write!(w, "{},{},{},{:#x},", self.sec, self.usec, self.op, self.ptr)?;
        if let Some(size) = self.size {
            write!(w, "{}", size)?;
        }
        w.write_char('\n')
    }
}

/// Fixed-size, stack-allocated line. Writing past the end fails
/// instead of growing, since hooks must not allocate.
pub struct LineBuf<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> LineBuf<N> {
    pub const fn new() -> Self {
        Self { buf: [0; N], len: 0 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl<const N: usize> Write for LineBuf<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.len + s.len();
        if end > N {
            return Err(fmt::Error);
        }
        self.buf[self.len..end].copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum WriteError {
    #[error("no log destination")]
    NoDestination,
    #[error("cannot open log (errno {0})")]
    Open(int),
    #[error("log write stalled with {left} bytes pending after {attempts} attempts")]
    Stalled { attempts: usize, left: usize },
}

/// What became of a record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
    Emitted,
    /// The line did not fit the line buffer.
    Truncated,
    /// No destination: the image was never patched.
    Disabled,
    Failed(WriteError),
}

/// Appends records to a log file, one open/write/close per line.
#[derive(Copy, Clone, Debug)]
pub struct TraceLog<'a> {
    destination: Option<&'a CStr>,
}

impl TraceLog<'static> {
    /// The log this image was patched to write to.
    pub fn tagged() -> Self {
        Self { destination: tagged_destination() }
    }
}

impl<'a> TraceLog<'a> {
    pub const fn to(path: &'a CStr) -> Self {
        Self { destination: Some(path) }
    }

    pub const fn disabled() -> Self {
        Self { destination: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.destination.is_some()
    }

    /// Stamps and appends a record of `op`. errno is left exactly as
    /// the caller had it, whatever happens to the record.
    #[inline(always)]
    pub fn record(&self, op: Operation, ptr: usize, size: Option<usize>) -> Outcome {
        self.record_within::<LINE_CAPACITY>(op, ptr, size)
    }

    pub fn record_within<const N: usize>(&self, op: Operation, ptr: usize, size: Option<usize>) -> Outcome {
        if !self.is_enabled() {
            return Outcome::Disabled;
        }
        let saved = errno();
        let mut line = LineBuf::<N>::new();
        let outcome = match TraceRecord::now(op, ptr, size).render(&mut line) {
            Err(_)  => { Outcome::Truncated },
            Ok(_)   => {
                match self.append(line.as_bytes()) {
                    Ok(_)   => Outcome::Emitted,
                    Err(e)  => Outcome::Failed(e),
                }
            }
        };
        if outcome != Outcome::Emitted {
            RECORDS_DROPPED.fetch_add(1, Ordering::Relaxed);
        }
        set_errno(saved);

        outcome
    }

    /// Appends `line` to the destination, creating the file if needed.
    pub fn append(&self, line: &[u8]) -> Result<(), WriteError> {
        let path = self.destination.ok_or(WriteError::NoDestination)?;
        let fd = unsafe {
            libc::open(
                path.as_ptr(),
                libc::O_WRONLY | libc::O_APPEND | libc::O_CREAT | libc::O_CLOEXEC,
                0o644 as libc::c_uint,
            )
        };
        if fd < 0 {
            return Err(WriteError::Open(errno()));
        }
        let res = write_fully(fd, line);
        unsafe { libc::close(fd) };

        res
    }
}

fn write_fully(fd: int, mut line: &[u8]) -> Result<(), WriteError> {
    // Short writes are resumed as long as they make progress. Writes
    // that make none (zero or error) only get so many chances.
    let mut attempts = 0;
    while !line.is_empty() {
        let n = unsafe { libc::write(fd, line.as_ptr() as *const void, line.len()) };
        if n > 0 {
            line = &line[n as usize..];
            continue;
        }
        attempts += 1;
        if attempts == MAX_WRITE_ATTEMPTS {
            return Err(WriteError::Stalled { attempts, left: line.len() });
        }
    }

    Ok(())
}
