//! Error handling FFI functions.

#![allow(unsafe_op_in_unsafe_fn)]

use super::runtime_ffi::{get_wrapper, get_wrapper_mut};
use super::types::ReclaimRuntime;
use std::ffi::c_char;

/// Get the last error message.
///
/// Returns a pointer to the error message string, or NULL if no error.
/// The returned pointer is valid until the next API call that may set an error.
///
/// # Example (C)
/// ```c
/// if (reclaim_collect(rt) != RECLAIM_RESULT_OK) {
///     printf("Error: %s\n", reclaim_get_error(rt));
/// }
/// ```
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reclaim_get_error(rt: *const ReclaimRuntime) -> *const c_char {
    get_wrapper(rt)
        .and_then(|w| w.last_error.as_ref())
        .map_or(std::ptr::null(), |e| e.as_ptr())
}

/// Clear the last error.
///
/// After calling this, `reclaim_get_error` will return NULL until
/// another error occurs.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reclaim_clear_error(rt: *mut ReclaimRuntime) {
    if let Some(wrapper) = get_wrapper_mut(rt) {
        wrapper.clear_error();
    }
}

/// Check if there is a pending error.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reclaim_has_error(rt: *const ReclaimRuntime) -> bool {
    get_wrapper(rt).is_some_and(|w| w.last_error.is_some())
}
