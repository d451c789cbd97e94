//! Runtime error type shared by the heap, the collector and the host API.

use thiserror::Error;

/// Errors surfaced to callers of the runtime.
///
/// Consistency violations inside the collector (a locked reference found
/// unmarked, a corrupt free link, a broken thread ring) are not represented
/// here: they panic, because the heap bookkeeping can no longer be trusted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("not enough memory: {0}")]
    Memory(String),
    #[error("stack overflow")]
    StackOverflow,
    #[error("attempt to call a {0} value")]
    NotCallable(&'static str),
    #[error("no script executor attached to call a script closure")]
    NoExecutor,
    #[error("invalid tag: {0}")]
    InvalidTag(u32),
    #[error("invalid table key: {0}")]
    InvalidKey(&'static str),
    #[error("invalid reference: {0}")]
    InvalidRef(i32),
    /// Error raised by interpreted or native code, including finalizers.
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("config error: {0}")]
    Config(String),
}

impl RuntimeError {
    pub fn runtime(message: impl Into<String>) -> Self {
        RuntimeError::Runtime(message.into())
    }
}

impl From<RuntimeError> for String {
    fn from(e: RuntimeError) -> Self {
        e.to_string()
    }
}
