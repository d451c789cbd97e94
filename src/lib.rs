//! Reclaim - a mark-and-sweep heap for an embeddable dynamic-language runtime
//!
//! This library provides the object model, the collector and the external
//! reference table. For C/C++ embedding, use the FFI module functions.

pub mod config;
pub mod error;
pub mod ffi;
pub mod gc;
pub mod runtime;
pub mod workload;

// Re-export commonly used types
pub use config::{RuntimeConfig, StatsFormat};
pub use error::RuntimeError;
pub use gc::{FreedCounts, GcStats};
pub use runtime::call::{CallFrame, NativeFn, ScriptExecutor};
pub use runtime::object::ProtoSpec;
pub use runtime::refs::{RefId, RefMode, RefState};
pub use runtime::tagmethod::TagEvent;
pub use runtime::value::Value;
pub use runtime::{CriticalSection, Runtime};

// Re-export FFI types for C bindings
pub use ffi::*;
