//! Runtime lifecycle and collection FFI functions.

#![allow(unsafe_op_in_unsafe_fn)]

use super::types::{ReclaimErrorFn, ReclaimResult, ReclaimRuntime, RuntimeWrapper};
use crate::runtime::Runtime;

/// Create a new runtime with the default configuration.
///
/// The returned runtime must be freed with `reclaim_runtime_free()`.
///
/// # Example (C)
/// ```c
/// ReclaimRuntime *rt = reclaim_runtime_new();
/// // ... use rt ...
/// reclaim_runtime_free(rt);
/// ```
#[unsafe(no_mangle)]
pub extern "C" fn reclaim_runtime_new() -> *mut ReclaimRuntime {
    let wrapper = Box::new(RuntimeWrapper::new(Runtime::new()));
    Box::into_raw(wrapper) as *mut ReclaimRuntime
}

/// Free a runtime, reclaiming every object and running every pending
/// finalizer first.
///
/// # Safety
///
/// - `rt` must be a valid pointer returned by `reclaim_runtime_new()`
/// - `rt` must not have been freed already
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reclaim_runtime_free(rt: *mut ReclaimRuntime) {
    if rt.is_null() {
        return;
    }
    let wrapper = Box::from_raw(rt as *mut RuntimeWrapper);
    // finalizer errors cannot be reported past this point
    let _ = wrapper.rt.close();
}

/// Set the error callback function.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reclaim_set_error_callback(
    rt: *mut ReclaimRuntime,
    callback: ReclaimErrorFn,
    userdata: *mut std::ffi::c_void,
) {
    if let Some(wrapper) = get_wrapper_mut(rt) {
        wrapper.error_callback = callback;
        wrapper.error_userdata = userdata;
    }
}

/// Run a full collection cycle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reclaim_collect(rt: *mut ReclaimRuntime) -> ReclaimResult {
    let Some(wrapper) = get_wrapper_mut(rt) else {
        return ReclaimResult::ErrorInvalidArg;
    };
    match wrapper.rt.collect_garbage() {
        Ok(()) => ReclaimResult::Ok,
        Err(e) => wrapper.fail(e),
    }
}

/// Collect if the live-block estimate reached the threshold.
///
/// Returns 1 if a cycle ran, 0 if not, -1 on error.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reclaim_check_gc(rt: *mut ReclaimRuntime) -> i32 {
    let Some(wrapper) = get_wrapper_mut(rt) else {
        return -1;
    };
    match wrapper.rt.check_gc() {
        Ok(ran) => i32::from(ran),
        Err(e) => {
            wrapper.fail(e);
            -1
        }
    }
}

/// Current live-block estimate (0 for a null runtime).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reclaim_blocks(rt: *const ReclaimRuntime) -> usize {
    get_wrapper(rt).map_or(0, |w| w.rt.blocks())
}

/// Helper to get a mutable reference to the wrapper from a raw pointer.
///
/// Returns None if the pointer is null.
pub(crate) unsafe fn get_wrapper_mut(rt: *mut ReclaimRuntime) -> Option<&'static mut RuntimeWrapper> {
    if rt.is_null() {
        None
    } else {
        Some(&mut *(rt as *mut RuntimeWrapper))
    }
}

/// Helper to get an immutable reference to the wrapper from a raw pointer.
///
/// Returns None if the pointer is null.
pub(crate) unsafe fn get_wrapper(rt: *const ReclaimRuntime) -> Option<&'static RuntimeWrapper> {
    if rt.is_null() {
        None
    } else {
        Some(&*(rt as *const RuntimeWrapper))
    }
}
