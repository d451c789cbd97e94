//! Value stack FFI functions.
//!
//! Values pushed from C live on the current thread's stack, so everything
//! between the bottom and the top is a root for the collector.

#![allow(unsafe_op_in_unsafe_fn)]

use super::runtime_ffi::{get_wrapper, get_wrapper_mut};
use super::types::{ReclaimResult, ReclaimRuntime, ReclaimType};
use crate::runtime::value::Value;
use std::ffi::c_char;

// =============================================================================
// Push Functions
// =============================================================================

/// Push a nil value onto the stack.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reclaim_push_nil(rt: *mut ReclaimRuntime) -> ReclaimResult {
    push(rt, |_| Ok(Value::Nil))
}

/// Push a number onto the stack.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reclaim_push_number(rt: *mut ReclaimRuntime, value: f64) -> ReclaimResult {
    push(rt, |_| Ok(Value::Number(value)))
}

/// Push a string onto the stack.
///
/// The bytes are interned; the caller keeps ownership of `str`, which does
/// not need to be null-terminated. A null `str` pushes nil.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reclaim_push_string(
    rt: *mut ReclaimRuntime,
    str: *const c_char,
    len: usize,
) -> ReclaimResult {
    if str.is_null() {
        return reclaim_push_nil(rt);
    }
    let bytes = std::slice::from_raw_parts(str as *const u8, len);
    push(rt, |w| w.rt.intern(bytes).map(Value::String))
}

/// Create an empty table and push it onto the stack.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reclaim_new_table(rt: *mut ReclaimRuntime) -> ReclaimResult {
    push(rt, |w| w.rt.new_table(0).map(Value::Table))
}

unsafe fn push(
    rt: *mut ReclaimRuntime,
    make: impl FnOnce(&mut super::types::RuntimeWrapper) -> Result<Value, crate::RuntimeError>,
) -> ReclaimResult {
    let Some(wrapper) = get_wrapper_mut(rt) else {
        return ReclaimResult::ErrorInvalidArg;
    };
    match make(wrapper).and_then(|v| wrapper.rt.push(v)) {
        Ok(()) => ReclaimResult::Ok,
        Err(e) => wrapper.fail(e),
    }
}

// =============================================================================
// Stack Operations
// =============================================================================

/// Pop `count` values from the stack. Popping more than the stack holds
/// empties it.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reclaim_pop(rt: *mut ReclaimRuntime, count: usize) {
    if let Some(wrapper) = get_wrapper_mut(rt) {
        let top = wrapper.rt.top().saturating_sub(count);
        // shrinking never fails
        let _ = wrapper.rt.set_top(top);
    }
}

/// Number of values on the stack.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reclaim_get_top(rt: *const ReclaimRuntime) -> i32 {
    get_wrapper(rt).map_or(0, |w| w.rt.top() as i32)
}

/// Resolve a stack index (negative indices count from the top).
pub(crate) fn resolve_index(stack_len: usize, index: i32) -> Option<usize> {
    if index >= 0 {
        let idx = index as usize;
        if idx < stack_len { Some(idx) } else { None }
    } else {
        let offset = index.unsigned_abs() as usize;
        if offset <= stack_len {
            Some(stack_len - offset)
        } else {
            None
        }
    }
}

pub(crate) unsafe fn value_at(rt: *const ReclaimRuntime, index: i32) -> Option<Value> {
    let wrapper = get_wrapper(rt)?;
    let idx = resolve_index(wrapper.rt.top(), index)?;
    wrapper.rt.stack_value(idx)
}

// =============================================================================
// Type Checking and Conversion
// =============================================================================

/// Type of the value at `index`, or `None` if the index is out of range.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reclaim_type(rt: *const ReclaimRuntime, index: i32) -> ReclaimType {
    value_at(rt, index).map_or(ReclaimType::None, |v| ReclaimType::from(&v))
}

/// The number at `index`, or 0.0 when it is not a number.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reclaim_to_number(rt: *const ReclaimRuntime, index: i32) -> f64 {
    value_at(rt, index)
        .and_then(|v| v.as_number())
        .unwrap_or(0.0)
}
