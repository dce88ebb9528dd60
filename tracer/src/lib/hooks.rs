//! The hook bodies. Each one forwards to the real function with the
//! arguments it was given, records what happened, and hands back the
//! real result untouched.
//!
//! Calls served while symbols are still being resolved (the loader
//! calling back into us from `dlsym`) are satisfied from the scratch
//! arena or raw syscalls and are not recorded.

use crate::ffi::*;
use crate::logger::TraceLog;
use crate::symbols::{real, SCRATCH};
use std::mem::size_of;
use vizzy_common::Operation;

const PAGE_SIZE: size_t = 4096;

pub unsafe fn malloc(log: &TraceLog, size: size_t) -> *mut void {
    let Some(malloc) = real::<CMalloc>(Operation::Malloc) else {
        return SCRATCH.alloc(size, 0);
    };
    let p = malloc(size);
    log.record(Operation::Malloc, p as usize, Some(size));

    p
}

pub unsafe fn calloc(log: &TraceLog, nobj: size_t, size: size_t) -> *mut void {
    // The loader's own bookkeeping asks for zeroed memory before
    // `dlsym` has returned anything; the arena is zeroed already.
    let Some(calloc) = real::<CCalloc>(Operation::Calloc) else {
        return match nobj.checked_mul(size) {
            Some(total) => SCRATCH.alloc(total, 0),
            None        => {
                set_errno(libc::ENOMEM);
                std::ptr::null_mut()
            }
        };
    };
    let p = calloc(nobj, size);
    log.record(Operation::Calloc, p as usize, Some(nobj.saturating_mul(size)));

    p
}

pub unsafe fn realloc(log: &TraceLog, p: *mut void, size: size_t) -> *mut void {
    if SCRATCH.contains(p) {
        // Arena blocks cannot grow in place; move them to the real heap.
        let moved = malloc(&TraceLog::disabled(), size);
        if !moved.is_null() {
            std::ptr::copy_nonoverlapping(p as *const u8, moved as *mut u8, size.min(SCRATCH.span_from(p)));
        }
        if !SCRATCH.contains(moved) {
            log.record(Operation::Realloc, moved as usize, Some(size));
        }
        return moved;
    }
    let Some(realloc) = real::<CRealloc>(Operation::Realloc) else {
        if p.is_null() {
            return SCRATCH.alloc(size, 0);
        }
        // Only reachable from inside `dlsym`, with a block the real
        // allocator handed out before we were loaded. Nothing sane to do.
        set_errno(libc::ENOMEM);
        return std::ptr::null_mut();
    };
    let new_p = realloc(p, size);
    log.record(Operation::Realloc, new_p as usize, Some(size));

    new_p
}

pub unsafe fn free(log: &TraceLog, p: *mut void) {
    if p.is_null() || SCRATCH.contains(p) {
        return;
    }
    let Some(free) = real::<CFree>(Operation::Free) else {
        // Leaked rather than handed to an unknown allocator.
        return;
    };
    free(p);
    log.record(Operation::Free, p as usize, None);
}

pub unsafe fn mmap(
    log:    &TraceLog,
    addr:   *mut void,
    len:    size_t,
    prot:   int,
    flags:  int,
    fd:     int,
    offset: off_t,
) -> *mut void {
    let Some(mmap) = real::<CMmap>(Operation::Mmap) else {
        return libc::syscall(
            libc::SYS_mmap,
            addr,
            len,
            prot as libc::c_long,
            flags as libc::c_long,
            fd as libc::c_long,
            offset as libc::c_long,
        ) as *mut void;
    };
    let p = mmap(addr, len, prot, flags, fd, offset);
    log.record(Operation::Mmap, p as usize, Some(len));

    p
}

pub unsafe fn munmap(log: &TraceLog, addr: *mut void, len: size_t) -> int {
    let Some(munmap) = real::<CMunmap>(Operation::Munmap) else {
        return libc::syscall(libc::SYS_munmap, addr, len) as int;
    };
    let res = munmap(addr, len);
    log.record(Operation::Munmap, addr as usize, Some(len));

    res
}

pub unsafe fn posix_memalign(log: &TraceLog, memptr: *mut *mut void, align: size_t, size: size_t) -> int {
    let Some(posix_memalign) = real::<CPosixMemalign>(Operation::PosixMemalign) else {
        if !align.is_power_of_two() || align % size_of::<*mut void>() != 0 {
            return libc::EINVAL;
        }
        let p = SCRATCH.alloc(size, align);
        if p.is_null() {
            return libc::ENOMEM;
        }
        *memptr = p;
        return 0;
    };
    let res = posix_memalign(memptr, align, size);
    // `*memptr` is only meaningful on success.
    let placed = if res == 0 { *memptr } else { std::ptr::null_mut() };
    log.record(Operation::PosixMemalign, placed as usize, Some(size));

    res
}

pub unsafe fn aligned_alloc(log: &TraceLog, align: size_t, size: size_t) -> *mut void {
    let Some(aligned_alloc) = real::<CAlignedAlloc>(Operation::AlignedAlloc) else {
        return SCRATCH.alloc(size, align);
    };
    let p = aligned_alloc(align, size);
    log.record(Operation::AlignedAlloc, p as usize, Some(size));

    p
}

pub unsafe fn valloc(log: &TraceLog, size: size_t) -> *mut void {
    let Some(valloc) = real::<CValloc>(Operation::Valloc) else {
        return SCRATCH.alloc(size, PAGE_SIZE);
    };
    let p = valloc(size);
    log.record(Operation::Valloc, p as usize, Some(size));

    p
}

pub unsafe fn strdup(log: &TraceLog, s: *const c_char) -> *mut c_char {
    let Some(strdup) = real::<CStrdup>(Operation::Strdup) else {
        let len = libc::strlen(s) + 1;
        let dup = SCRATCH.alloc(len, 0) as *mut c_char;
        if !dup.is_null() {
            std::ptr::copy_nonoverlapping(s, dup, len);
        }
        return dup;
    };
    let dup = strdup(s);
    // Measure the copy when there is one, `s` is equally valid otherwise.
    let len = libc::strlen(if dup.is_null() { s } else { dup }) + 1;
    log.record(Operation::Strdup, dup as usize, Some(len));

    dup
}
