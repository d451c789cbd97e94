//! Finalization dispatcher for reclaimed userdata.

use log::warn;

use super::LOG_TARGET;
use crate::error::RuntimeError;
use crate::runtime::tagmethod::TagEvent;
use crate::runtime::value::Value;
use crate::runtime::{ClosureId, Runtime};

/// Outcome of one dispatch round.
#[derive(Debug, Default)]
pub(crate) struct Finalized {
    pub ran: usize,
    pub freed: usize,
    /// Reference slots left pointing at a freed userdata
    pub refs_collected: usize,
    pub first_error: Option<RuntimeError>,
}

impl Runtime {
    /// Run the `gc` method of every tag on its pending userdata, highest
    /// tag first, freeing each userdata after its call. A failing
    /// finalizer is logged and does not stop the rest.
    pub(crate) fn run_finalizers(&mut self) -> Finalized {
        let mut out = Finalized::default();
        for tag in (0..self.tags.len()).rev() {
            while let Some(udata) = self
                .tags
                .get_mut(tag)
                .ok()
                .and_then(|entry| entry.collected.pop())
            {
                if let Ok(Some(method)) = self.tags.method(tag, TagEvent::Gc) {
                    out.ran += 1;
                    if let Err(e) = self.call_gc_method(method, Value::Userdata(udata)) {
                        warn!(
                            target: LOG_TARGET,
                            "finalizer {} for tag {} failed: {}",
                            self.function_name(Value::Closure(method)),
                            tag,
                            e
                        );
                        out.first_error.get_or_insert(e);
                    }
                }
                if let Some(u) = self.heap.udata.remove(udata) {
                    self.heap.release_blocks(u.block_size());
                    out.freed += 1;
                }
                // a finalizer may have taken a reference to its argument
                out.refs_collected += self.refs.collect_referent(Value::Userdata(udata));
            }
        }
        out
    }

    /// Call a `gc` tag method with debug hooks suspended on the calling
    /// thread.
    pub(crate) fn call_gc_method(
        &mut self,
        method: ClosureId,
        arg: Value,
    ) -> Result<(), RuntimeError> {
        let thread = self.threads.current_id();
        let saved = self.allow_hooks();
        self.set_allow_hooks(false);
        let result = self.call(Value::Closure(method), &[arg]);
        if let Some(t) = self.threads.get_mut(thread) {
            t.allow_hooks = saved;
        }
        result
    }
}
