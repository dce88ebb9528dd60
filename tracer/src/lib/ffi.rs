use std::ffi::CStr;

// C-reminiscent types.
pub type size_t     = libc::size_t;
pub type off_t      = libc::off_t;
pub type void       = libc::c_void;
pub type int        = libc::c_int;
pub use libc::c_char;

// Linux utils.
pub use libc::{
    RTLD_NEXT,
    dlsym,
    fputs,
    exit,
    pthread_self,
};

// Type aliases for the several interposed functions.
pub type CMalloc        = unsafe extern "C" fn(size: size_t)                        -> *mut void;
pub type CCalloc        = unsafe extern "C" fn(nobj: size_t, size: size_t)          -> *mut void;
pub type CRealloc       = unsafe extern "C" fn(p: *mut void, size: size_t)          -> *mut void;
pub type CFree          = unsafe extern "C" fn(p: *mut void);
pub type CMmap          = unsafe extern "C" fn( addr:   *mut void,
                                                len:    size_t,
                                                prot:   int,
                                                flags:  int,
                                                fd:     int,
                                                offset: off_t)                      -> *mut void;
pub type CMunmap        = unsafe extern "C" fn(addr: *mut void, len: size_t)        -> int;
pub type CPosixMemalign = unsafe extern "C" fn( memptr: *mut *mut void,
                                                align:  size_t,
                                                size:   size_t)                     -> int;
pub type CAlignedAlloc  = unsafe extern "C" fn(alignment: size_t, size: size_t)     -> *mut void;
pub type CValloc        = unsafe extern "C" fn(size: size_t)                        -> *mut void;
pub type CStrdup        = unsafe extern "C" fn(s: *const c_char)                    -> *mut c_char;

#[inline(always)]
pub fn errno() -> int {
    unsafe { *libc::__errno_location() }
}

#[inline(always)]
pub fn set_errno(value: int) {
    unsafe { *libc::__errno_location() = value; }
}

pub unsafe fn graceful_exit(parts: &[&CStr]) -> ! {
    //! Prints an error message on stderr, then exits with
    //! non-zero code. The message comes in pieces so that
    //! callers never have to allocate in order to build it.
    use libc_stdhandle::stderr;

    let err = stderr();
    fputs(c"vizzy: ".as_ptr(), err);
    for part in parts {
        fputs(part.as_ptr(), err);
    }
    fputs(c"\n".as_ptr(), err);
    exit(1);
}
