//! The call primitive used to run tag methods and finalizers.
//!
//! Native functions run directly. Script closures are handed to the attached
//! `ScriptExecutor`, which stands in for the bytecode interpreter.

use super::object::ClosureKind;
use super::value::Value;
use super::{ProtoId, Runtime};
use crate::error::RuntimeError;

/// A host function callable from the runtime.
pub type NativeFn = fn(&mut Runtime, &CallFrame) -> Result<(), RuntimeError>;

/// Where a call's arguments live on the current thread's stack.
#[derive(Debug, Clone, Copy)]
pub struct CallFrame {
    /// The callee (a closure or a bare native function)
    pub func: Value,
    /// Stack index of the first argument
    pub base: usize,
    pub nargs: usize,
}

/// Interpreter seam: runs script closures and names prototypes.
pub trait ScriptExecutor {
    fn call(&self, rt: &mut Runtime, proto: ProtoId, frame: &CallFrame)
        -> Result<(), RuntimeError>;

    /// Declared name of the function a prototype was compiled from.
    fn function_name(&self, _rt: &Runtime, _proto: ProtoId) -> Option<String> {
        None
    }
}

impl Runtime {
    /// Call `func` with `args`.
    ///
    /// A marker for the callee and the arguments are pushed on the current
    /// thread's stack for the duration of the call, so they stay rooted if
    /// the callee triggers a collection. The stack top is restored whether
    /// the call succeeds or fails.
    pub fn call(&mut self, func: Value, args: &[Value]) -> Result<(), RuntimeError> {
        let thread = self.threads.current_id();
        let saved_top = self.threads.current().top();
        let result = self.dispatch(func, args, saved_top);
        if let Some(t) = self.threads.get_mut(thread) {
            t.top = saved_top.min(t.stack.len());
        }
        result
    }

    fn dispatch(
        &mut self,
        func: Value,
        args: &[Value],
        saved_top: usize,
    ) -> Result<(), RuntimeError> {
        let kind = match func {
            Value::Closure(c) => match self.heap.closures.get(c) {
                Some(closure) => closure.kind,
                None => return Err(RuntimeError::runtime("call of a reclaimed closure")),
            },
            Value::Native(f) => ClosureKind::Native(f),
            other => return Err(RuntimeError::NotCallable(other.type_name())),
        };

        let marker = match func {
            Value::Closure(c) => Value::Mark(c),
            other => other,
        };
        {
            let t = self.threads.current_mut();
            t.ensure(args.len() + 1)?;
            t.push(marker)?;
            for &arg in args {
                t.push(arg)?;
            }
        }
        let frame = CallFrame {
            func,
            base: saved_top + 1,
            nargs: args.len(),
        };

        match kind {
            ClosureKind::Native(f) => f(self, &frame),
            ClosureKind::Script(proto) => {
                let executor = self.executor.clone().ok_or(RuntimeError::NoExecutor)?;
                executor.call(self, proto, &frame)
            }
        }
    }

    /// Argument `i` of a call in progress, nil when absent.
    pub fn arg(&self, frame: &CallFrame, i: usize) -> Value {
        if i >= frame.nargs {
            return Value::Nil;
        }
        self.threads
            .current()
            .get(frame.base + i)
            .unwrap_or(Value::Nil)
    }

    /// Upvalue `i` of the closure being called, nil when absent.
    pub fn upvalue(&self, frame: &CallFrame, i: usize) -> Value {
        frame
            .func
            .as_closure()
            .and_then(|c| self.heap.closures.get(c))
            .and_then(|c| c.upvalues.get(i).copied())
            .unwrap_or(Value::Nil)
    }

    /// Best-effort name of a function value for messages.
    pub fn function_name(&self, func: Value) -> String {
        let proto = func
            .as_closure()
            .and_then(|c| self.heap.closures.get(c))
            .and_then(|c| c.proto());
        match (proto, &self.executor) {
            (Some(p), Some(executor)) => executor
                .function_name(self, p)
                .unwrap_or_else(|| "?".to_string()),
            (Some(_), None) => "?".to_string(),
            (None, _) => "native".to_string(),
        }
    }
}
