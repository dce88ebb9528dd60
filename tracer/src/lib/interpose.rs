use crate::ffi::*;
use crate::hooks;
use crate::logger::TraceLog;
use crate::symbols::SYMBOLS;

// Runs when the loader maps us in, before the host's `main` and before
// it has had the chance to spawn threads. Racing first-use resolution
// is thereby confined to the loader calling back into us.
#[used]
#[link_section = ".init_array"]
static RESOLVE_EARLY: unsafe extern "C" fn() = resolve_early;

unsafe extern "C" fn resolve_early() {
    SYMBOLS.ensure();
    TraceLog::tagged();
}

#[no_mangle]
/// Function interposition is used to catch every entry point of
/// the allocator family. Each export below shadows its libc
/// namesake for the whole process, forwards to the real one
/// and appends a line to the log patched into this image.
///
/// This logic holds across all 10 supported functions, plus the
/// `mmap64` alias.
unsafe extern "C"
fn malloc(size: size_t) -> *mut void {
    hooks::malloc(&TraceLog::tagged(), size)
}

#[no_mangle]
unsafe extern "C"
fn calloc(nobj: size_t, size: size_t) -> *mut void {
    hooks::calloc(&TraceLog::tagged(), nobj, size)
}

#[no_mangle]
unsafe extern "C"
fn realloc(p: *mut void, size: size_t) -> *mut void {
    hooks::realloc(&TraceLog::tagged(), p, size)
}

#[no_mangle]
unsafe extern "C"
fn free(p: *mut void) {
    hooks::free(&TraceLog::tagged(), p)
}

#[no_mangle]
unsafe extern "C"
fn mmap(addr: *mut void, len: size_t, prot: int, flags: int, fd: int, offset: off_t) -> *mut void {
    hooks::mmap(&TraceLog::tagged(), addr, len, prot, flags, fd, offset)
}

// Large-file-support builds (`_FILE_OFFSET_BITS=64`) link against
// `mmap64`. On LP64 it is the very same function as `mmap`, so it
// goes through the `mmap` slot and is recorded as `mmap`.
#[no_mangle]
unsafe extern "C"
fn mmap64(addr: *mut void, len: size_t, prot: int, flags: int, fd: int, offset: off_t) -> *mut void {
    hooks::mmap(&TraceLog::tagged(), addr, len, prot, flags, fd, offset)
}

#[no_mangle]
unsafe extern "C"
fn munmap(addr: *mut void, len: size_t) -> int {
    hooks::munmap(&TraceLog::tagged(), addr, len)
}

#[no_mangle]
unsafe extern "C"
fn posix_memalign(memptr: *mut *mut void, alignment: size_t, size: size_t) -> int {
    hooks::posix_memalign(&TraceLog::tagged(), memptr, alignment, size)
}

#[no_mangle]
unsafe extern "C"
fn aligned_alloc(alignment: size_t, size: size_t) -> *mut void {
    hooks::aligned_alloc(&TraceLog::tagged(), alignment, size)
}

#[no_mangle]
unsafe extern "C"
fn valloc(size: size_t) -> *mut void {
    hooks::valloc(&TraceLog::tagged(), size)
}

#[no_mangle]
unsafe extern "C"
fn strdup(s: *const c_char) -> *mut c_char {
    hooks::strdup(&TraceLog::tagged(), s)
}
