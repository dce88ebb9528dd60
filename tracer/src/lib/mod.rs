#[allow(non_camel_case_types)]
/// Crate is targeting Linux user-space processes which
/// invoke `malloc` and friends. We're doing it via
/// [*function interposition*](https://stackoverflow.com/questions/426230/what-is-the-ld-preload-trick).
/// We thus need the corresponding set of signatures for the
/// functions that are to be interposed.
///
/// This module defines said signatures, along with some assistant
/// type aliases (e.g. `void` instead of `c_void`).
mod ffi;

/// Finds the genuine allocator behind us, once, and keeps the
/// loader happy while that is still under way.
mod symbols;

/// Where records go, and how they are shaped on the way.
pub mod logger;

mod hooks;

/// The exported C symbols. Left out of test builds, where they
/// would take over the test harness' own allocations.
#[cfg(not(test))]
mod interpose;
