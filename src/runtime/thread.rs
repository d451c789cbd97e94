//! Cooperative threads sharing one heap.
//!
//! Threads form a circular doubly linked ring. They are not heap objects:
//! they are created and closed explicitly by the host and every live thread
//! is a root for the collector.

use super::arena::{Arena, Id};
use super::value::Value;
use super::TableId;
use crate::error::RuntimeError;

pub type ThreadId = Id<Thread>;

pub struct Thread {
    /// Physical stack; slots at and above `top` are stale
    pub(crate) stack: Vec<Value>,
    pub(crate) top: usize,
    max_stack: usize,
    pub globals: TableId,
    pub(crate) prev: ThreadId,
    pub(crate) next: ThreadId,
    /// Whether debug hooks may run on this thread
    pub allow_hooks: bool,
}

impl Thread {
    pub fn top(&self) -> usize {
        self.top
    }

    /// Live stack region.
    pub fn live(&self) -> &[Value] {
        &self.stack[..self.top]
    }

    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    /// Make room for `n` more values above the top.
    pub fn ensure(&mut self, n: usize) -> Result<(), RuntimeError> {
        let needed = self.top + n;
        if needed <= self.stack.len() {
            return Ok(());
        }
        if needed > self.max_stack {
            return Err(RuntimeError::StackOverflow);
        }
        let new_len = (self.stack.len() * 2).max(needed).min(self.max_stack);
        self.stack.resize(new_len, Value::Nil);
        Ok(())
    }

    pub fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        self.ensure(1)?;
        self.stack[self.top] = value;
        self.top += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Value> {
        if self.top == 0 {
            return None;
        }
        self.top -= 1;
        Some(self.stack[self.top])
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.live().get(index).copied()
    }

    /// Move the top; growing fills the new slots with nil.
    pub fn set_top(&mut self, top: usize) -> Result<(), RuntimeError> {
        if top > self.top {
            self.ensure(top - self.top)?;
            self.stack[self.top..top].fill(Value::Nil);
        }
        self.top = top;
        Ok(())
    }
}

/// The circular list of threads plus the one currently running.
pub struct ThreadRing {
    threads: Arena<Thread>,
    current: ThreadId,
}

impl ThreadRing {
    pub fn new(globals: TableId, initial_stack: usize, max_stack: usize) -> Self {
        let mut threads = Arena::new();
        let main = threads.insert(Thread::detached(globals, initial_stack, max_stack));
        let thread = threads.get_mut(main).expect("fresh thread");
        thread.prev = main;
        thread.next = main;
        Self {
            threads,
            current: main,
        }
    }

    pub fn current_id(&self) -> ThreadId {
        self.current
    }

    pub fn current(&self) -> &Thread {
        self.threads
            .get(self.current)
            .expect("current thread is always live")
    }

    pub fn current_mut(&mut self) -> &mut Thread {
        self.threads
            .get_mut(self.current)
            .expect("current thread is always live")
    }

    pub fn get(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.get(id)
    }

    pub fn get_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        self.threads.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Create a thread after the current one, sharing its globals.
    pub fn spawn(&mut self, initial_stack: usize) -> ThreadId {
        let current = self.current;
        let (globals, max_stack, next) = {
            let cur = self.current();
            (cur.globals, cur.max_stack, cur.next)
        };
        let id = self
            .threads
            .insert(Thread::detached(globals, initial_stack, max_stack));
        let thread = self.threads.get_mut(id).expect("fresh thread");
        thread.prev = current;
        thread.next = next;
        self.current_mut().next = id;
        if let Some(n) = self.threads.get_mut(next) {
            n.prev = id;
        }
        id
    }

    pub fn switch_to(&mut self, id: ThreadId) -> bool {
        if self.threads.contains(id) {
            self.current = id;
            true
        } else {
            false
        }
    }

    /// Unlink and drop a thread. The last thread cannot be closed; closing
    /// the current thread makes its successor current.
    pub fn close(&mut self, id: ThreadId) -> bool {
        let Some(thread) = self.threads.get(id) else {
            return false;
        };
        if thread.next == id {
            return false;
        }
        let (prev, next) = (thread.prev, thread.next);
        if let Some(p) = self.threads.get_mut(prev) {
            p.next = next;
        }
        if let Some(n) = self.threads.get_mut(next) {
            n.prev = prev;
        }
        if self.current == id {
            self.current = next;
        }
        self.threads.remove(id);
        true
    }

    /// Visit every thread once, starting at the current one and following
    /// `next` until the walk returns to it.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut Thread)) {
        let start = self.current;
        let mut id = start;
        loop {
            let thread = self
                .threads
                .get_mut(id)
                .expect("thread ring links a dead thread");
            f(thread);
            let next = thread.next;
            let back = self
                .threads
                .get(next)
                .map(|n| n.prev)
                .expect("thread ring links a dead thread");
            assert!(back == id, "thread ring is corrupt: broken prev link");
            id = next;
            if id == start {
                break;
            }
        }
    }
}

impl Thread {
    fn detached(globals: TableId, initial_stack: usize, max_stack: usize) -> Self {
        // prev/next are patched by the ring right after insertion
        let placeholder = Id::placeholder();
        Self {
            stack: vec![Value::Nil; initial_stack],
            top: 0,
            max_stack,
            globals,
            prev: placeholder,
            next: placeholder,
            allow_hooks: true,
        }
    }
}
