//! External reference FFI functions.
//!
//! A locked reference keeps its value alive. A held reference does not:
//! once the value is collected the slot reads as collected until the host
//! releases it.

#![allow(unsafe_op_in_unsafe_fn)]

use super::runtime_ffi::{get_wrapper, get_wrapper_mut};
use super::types::{ReclaimRefState, ReclaimResult, ReclaimRuntime};
use crate::runtime::refs::{RefId, RefMode};

/// Pop the top value and store it in the reference table.
///
/// Returns the reference id, `-1` for nil (which needs no slot) or `-2`
/// on error.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reclaim_ref(rt: *mut ReclaimRuntime, lock: bool) -> i32 {
    let Some(wrapper) = get_wrapper_mut(rt) else {
        return RefId::NONE.0;
    };
    let Some(value) = wrapper.rt.pop() else {
        wrapper.set_error("reference of an empty stack");
        return RefId::NONE.0;
    };
    let mode = if lock { RefMode::Lock } else { RefMode::Hold };
    match wrapper.rt.acquire_ref(value, mode) {
        Ok(id) => id.0,
        Err(e) => {
            wrapper.fail(e);
            RefId::NONE.0
        }
    }
}

/// Push the referent of `r`.
///
/// Returns false, pushing nothing, when the referent was collected or `r`
/// names no slot.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reclaim_getref(rt: *mut ReclaimRuntime, r: i32) -> bool {
    let Some(wrapper) = get_wrapper_mut(rt) else {
        return false;
    };
    let Some(value) = wrapper.rt.get_ref(RefId(r)) else {
        return false;
    };
    match wrapper.rt.push(value) {
        Ok(()) => true,
        Err(e) => {
            wrapper.fail(e);
            false
        }
    }
}

/// Release `r`, returning its slot to the free list.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reclaim_unref(rt: *mut ReclaimRuntime, r: i32) -> ReclaimResult {
    let Some(wrapper) = get_wrapper_mut(rt) else {
        return ReclaimResult::ErrorInvalidArg;
    };
    match wrapper.rt.release_ref(RefId(r)) {
        Ok(()) => ReclaimResult::Ok,
        Err(e) => wrapper.fail(e),
    }
}

/// Switch `r` between locked and held.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reclaim_set_ref_mode(
    rt: *mut ReclaimRuntime,
    r: i32,
    lock: bool,
) -> ReclaimResult {
    let Some(wrapper) = get_wrapper_mut(rt) else {
        return ReclaimResult::ErrorInvalidArg;
    };
    let mode = if lock { RefMode::Lock } else { RefMode::Hold };
    match wrapper.rt.set_ref_mode(RefId(r), mode) {
        Ok(()) => ReclaimResult::Ok,
        Err(e) => wrapper.fail(e),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn reclaim_ref_state(rt: *const ReclaimRuntime, r: i32) -> ReclaimRefState {
    get_wrapper(rt).map_or(ReclaimRefState::Free, |w| w.rt.ref_state(RefId(r)).into())
}
