use crate::ffi::*;
use std::cell::UnsafeCell;
use std::ffi::CStr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use vizzy_common::Operation;

const SYMBOLS_NUM: usize = Operation::ALL.len();

// Life cycle of the table. Only one thread ever moves it
// out of UNRESOLVED; everybody else waits for RESOLVED.
const UNRESOLVED:   u8 = 0;
const RESOLVING:    u8 = 1;
const RESOLVED:     u8 = 2;

/// What a hook may rely on when it asks for the real functions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// Every symbol has been looked up. A missing one stays missing.
    Ready,
    /// The caller *is* the resolving thread, re-entered from inside
    /// `dlsym`. Only slots filled so far can be used.
    Bootstrapping,
}

fn symbol_name(op: Operation) -> &'static CStr {
    match op {
        Operation::Malloc           => c"malloc",
        Operation::Calloc           => c"calloc",
        Operation::Realloc          => c"realloc",
        Operation::Free             => c"free",
        Operation::Mmap             => c"mmap",
        Operation::Munmap           => c"munmap",
        Operation::PosixMemalign    => c"posix_memalign",
        Operation::AlignedAlloc     => c"aligned_alloc",
        Operation::Valloc           => c"valloc",
        Operation::Strdup           => c"strdup",
    }
}

/// Addresses of the genuine allocator functions, one slot per
/// interposed operation. A zero slot is an unresolved symbol.
pub struct SymbolTable {
    slots:  [AtomicUsize; SYMBOLS_NUM],
    state:  AtomicU8,
    // `pthread_t` of the thread running `dlsym`. Any call arriving
    // from that thread while RESOLVING is the loader calling back.
    owner:  AtomicUsize,
}

pub static SYMBOLS: SymbolTable = SymbolTable::new();

impl SymbolTable {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const EMPTY: AtomicUsize = AtomicUsize::new(0);
        Self {
            slots:  [EMPTY; SYMBOLS_NUM],
            state:  AtomicU8::new(UNRESOLVED),
            owner:  AtomicUsize::new(0),
        }
    }

    /// Makes sure resolution has happened. Cheap after the first call.
    #[inline(always)]
    pub fn ensure(&self) -> Readiness {
        if self.state.load(Ordering::Acquire) == RESOLVED {
            Readiness::Ready
        } else {
            self.resolve_or_wait()
        }
    }

    #[cold]
    fn resolve_or_wait(&self) -> Readiness {
        let me = unsafe { pthread_self() } as usize;
        match self.state.compare_exchange(UNRESOLVED, RESOLVING, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_)           => {
                // We won the election. `dlsym` is thread-safe, but it may
                // allocate, which brings us right back here on this thread.
                self.owner.store(me, Ordering::Release);
                for op in Operation::ALL {
                    unsafe { self.resolve_one(op) };
                }
                self.state.store(RESOLVED, Ordering::Release);
                Readiness::Ready
            },
            Err(RESOLVED)   => { Readiness::Ready },
            Err(_)          => {
                if self.owner.load(Ordering::Acquire) == me {
                    return Readiness::Bootstrapping;
                }
                // The rest of the threads must wait until
                // initialization is complete.
                while self.state.load(Ordering::Acquire) != RESOLVED {
                    std::hint::spin_loop();
                }
                Readiness::Ready
            }
        }
    }

    unsafe fn resolve_one(&self, op: Operation) {
        let slot = &self.slots[op as usize];
        if slot.load(Ordering::Acquire) != 0 {
            return;
        }
        let address = dlsym(RTLD_NEXT, symbol_name(op).as_ptr());
        slot.store(address as usize, Ordering::Release);
    }

    /// Returns the real implementation of `op`, if known.
    ///
    /// # Safety
    /// `F` must be the function pointer type matching `op`'s C signature.
    #[inline(always)]
    pub unsafe fn lookup<F: Copy>(&self, op: Operation) -> Option<F> {
        debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<usize>());
        let address = self.slots[op as usize].load(Ordering::Acquire);
        if address == 0 {
            None
        } else {
            Some(std::mem::transmute_copy::<usize, F>(&address))
        }
    }

    /// Like [`lookup`](Self::lookup), but a missing symbol ends the process.
    ///
    /// # Safety
    /// Same as [`lookup`](Self::lookup).
    #[inline(always)]
    pub unsafe fn require<F: Copy>(&self, op: Operation) -> F {
        match self.lookup(op) {
            Some(f) => f,
            None    => graceful_exit(&[c"cannot resolve the real `", symbol_name(op), c"`, giving up"]),
        }
    }
}

/// Fetches the real function for `op` on behalf of a hook.
///
/// `None` means the caller re-entered from within symbol resolution and
/// must make do without the real allocator.
///
/// # Safety
/// `F` must be the function pointer type matching `op`'s C signature.
#[inline(always)]
pub unsafe fn real<F: Copy>(op: Operation) -> Option<F> {
    match SYMBOLS.ensure() {
        Readiness::Ready            => Some(SYMBOLS.require(op)),
        Readiness::Bootstrapping    => SYMBOLS.lookup(op),
    }
}

pub const SCRATCH_BYTES: usize = 8192;
const SCRATCH_ALIGN: usize = 16;

#[repr(C, align(16))]
struct Arena(UnsafeCell<[u8; SCRATCH_BYTES]>);

/// Memory handed out while the real allocator is still unknown.
///
/// A bump arena: blocks are never reused, so they are always zeroed,
/// and "freeing" one is a no-op.
pub struct Scratch {
    arena:  Arena,
    cursor: AtomicUsize,
}

// Disjoint blocks are carved out with an atomic cursor.
unsafe impl Sync for Scratch {}

pub static SCRATCH: Scratch = Scratch::new();

impl Scratch {
    pub const fn new() -> Self {
        Self {
            arena:  Arena(UnsafeCell::new([0; SCRATCH_BYTES])),
            cursor: AtomicUsize::new(0),
        }
    }

    #[inline(always)]
    fn base(&self) -> usize {
        self.arena.0.get() as usize
    }

    /// Carves `size` bytes aligned to `align`. Returns null when
    /// the arena is exhausted or `align` is not a power of two.
    pub fn alloc(&self, size: size_t, align: size_t) -> *mut void {
        let align = align.max(SCRATCH_ALIGN);
        if !align.is_power_of_two() {
            return std::ptr::null_mut();
        }
        let base = self.base();
        let mut cursor = self.cursor.load(Ordering::Relaxed);
        loop {
            let start = match (base + cursor).checked_add(align - 1) {
                Some(a) => (a & !(align - 1)) - base,
                None    => return std::ptr::null_mut(),
            };
            let end = match start.checked_add(size.max(1)) {
                Some(e) if e <= SCRATCH_BYTES   => e,
                _                               => return std::ptr::null_mut(),
            };
            match self.cursor.compare_exchange_weak(cursor, end, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_)       => return (base + start) as *mut void,
                Err(seen)   => cursor = seen,
            }
        }
    }

    pub fn contains(&self, p: *const void) -> bool {
        let p = p as usize;
        p >= self.base() && p < self.base() + SCRATCH_BYTES
    }

    /// Bytes from `p` up to the end of the arena; an upper bound for
    /// the size of the block `p` points into.
    pub fn span_from(&self, p: *const void) -> usize {
        if self.contains(p) {
            self.base() + SCRATCH_BYTES - p as usize
        } else {
            0
        }
    }
}
