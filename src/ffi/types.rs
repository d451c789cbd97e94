//! FFI type definitions for the C API.

use std::ffi::c_char;

use crate::error::RuntimeError;
use crate::runtime::Runtime;
use crate::runtime::refs::RefState;
use crate::runtime::value::Value;

/// Result codes for FFI operations.
///
/// These map to the `ReclaimResult` enum in C.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimResult {
    /// Operation succeeded
    Ok = 0,
    /// Error raised by a finalizer or other called code
    ErrorRuntime = 1,
    /// Out of memory (heap limit or reference table overflow)
    ErrorMemory = 2,
    /// Invalid argument passed to function
    ErrorInvalidArg = 3,
    /// Reference id does not name a live slot
    ErrorInvalidRef = 4,
    ErrorStackOverflow = 5,
}

impl ReclaimResult {
    pub fn is_ok(self) -> bool {
        self == ReclaimResult::Ok
    }

    pub fn is_err(self) -> bool {
        self != ReclaimResult::Ok
    }
}

impl From<&RuntimeError> for ReclaimResult {
    fn from(e: &RuntimeError) -> Self {
        match e {
            RuntimeError::Memory(_) => ReclaimResult::ErrorMemory,
            RuntimeError::StackOverflow => ReclaimResult::ErrorStackOverflow,
            RuntimeError::InvalidRef(_) => ReclaimResult::ErrorInvalidRef,
            RuntimeError::InvalidTag(_) | RuntimeError::InvalidKey(_) | RuntimeError::Config(_) => {
                ReclaimResult::ErrorInvalidArg
            }
            RuntimeError::NotCallable(_) | RuntimeError::NoExecutor | RuntimeError::Runtime(_) => {
                ReclaimResult::ErrorRuntime
            }
        }
    }
}

/// Value type as seen from C. `None` means "no value at that index".
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimType {
    None = -1,
    Nil = 0,
    Number = 1,
    String = 2,
    Userdata = 3,
    Table = 4,
    Function = 5,
}

impl From<&Value> for ReclaimType {
    fn from(v: &Value) -> Self {
        match v {
            Value::Nil => ReclaimType::Nil,
            Value::Number(_) => ReclaimType::Number,
            Value::String(_) => ReclaimType::String,
            Value::Userdata(_) => ReclaimType::Userdata,
            Value::Table(_) => ReclaimType::Table,
            Value::Closure(_) | Value::Native(_) | Value::Mark(_) | Value::Proto(_) => {
                ReclaimType::Function
            }
        }
    }
}

/// Reference slot state as seen from C.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimRefState {
    /// Not a slot currently owned by the host
    Free = 0,
    Locked = 1,
    Held = 2,
    Collected = 3,
}

impl From<Option<RefState>> for ReclaimRefState {
    fn from(state: Option<RefState>) -> Self {
        match state {
            None => ReclaimRefState::Free,
            Some(RefState::Locked) => ReclaimRefState::Locked,
            Some(RefState::Held) => ReclaimRefState::Held,
            Some(RefState::Collected) => ReclaimRefState::Collected,
        }
    }
}

/// Error callback function type.
///
/// Called when an error occurs, with the error message and user data.
pub type ReclaimErrorFn =
    Option<unsafe extern "C" fn(message: *const c_char, userdata: *mut std::ffi::c_void)>;

/// Opaque runtime instance type.
///
/// All operations require a valid `ReclaimRuntime` pointer created by
/// `reclaim_runtime_new()`.
#[repr(C)]
pub struct ReclaimRuntime {
    _private: [u8; 0],
}

/// Internal wrapper that holds the Rust runtime and FFI state.
pub(crate) struct RuntimeWrapper {
    pub rt: Runtime,
    /// Last error message (as CString for FFI compatibility)
    pub last_error: Option<std::ffi::CString>,
    pub error_callback: ReclaimErrorFn,
    pub error_userdata: *mut std::ffi::c_void,
}

impl RuntimeWrapper {
    pub fn new(rt: Runtime) -> Self {
        Self {
            rt,
            last_error: None,
            error_callback: None,
            error_userdata: std::ptr::null_mut(),
        }
    }

    /// Set an error message and optionally call the error callback.
    pub fn set_error(&mut self, message: impl Into<String>) {
        let c_msg = std::ffi::CString::new(message.into()).unwrap_or_default();

        if let Some(callback) = self.error_callback {
            unsafe {
                callback(c_msg.as_ptr(), self.error_userdata);
            }
        }

        self.last_error = Some(c_msg);
    }

    /// Record `e` as the last error and map it to a result code.
    pub fn fail(&mut self, e: RuntimeError) -> ReclaimResult {
        let code = ReclaimResult::from(&e);
        self.set_error(e.to_string());
        code
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }
}
