//! C FFI for embedding the runtime
//!
//! This module provides a C-compatible API over the heap, the value stack
//! and the external reference table. All public functions use `extern "C"` ABI.
//!
//! # Safety
//!
//! All FFI functions that take raw pointers require:
//! - Non-null pointers (unless documented otherwise)
//! - Valid runtimes created by `reclaim_runtime_new()`
//! - Proper lifetime management (the runtime must outlive all operations)

mod error;
mod refs;
mod runtime_ffi;
mod stack;
mod types;

#[allow(unused_imports)]
pub use error::*;
#[allow(unused_imports)]
pub use refs::*;
#[allow(unused_imports)]
pub use runtime_ffi::*;
#[allow(unused_imports)]
pub use stack::*;
#[allow(unused_imports)]
pub use types::*;

/// Revision of the C ABI. Bumped whenever a function signature or a
/// `#[repr(C)]` enum in this module changes.
pub const RECLAIM_ABI_VERSION: u32 = 1;

/// Crate version as a null-terminated string.
#[unsafe(no_mangle)]
pub extern "C" fn reclaim_version() -> *const std::ffi::c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const std::ffi::c_char
}

/// Hosts compare this against the `RECLAIM_ABI_VERSION` their header was
/// generated with.
#[unsafe(no_mangle)]
pub extern "C" fn reclaim_abi_version() -> u32 {
    RECLAIM_ABI_VERSION
}
