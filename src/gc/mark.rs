//! Root enumeration and the mark engine.
//!
//! Tables and closures are queued on two worklists when first reached and
//! traversed later, closures first. Prototypes are marked eagerly when the
//! first closure over them is reached.

use crate::runtime::object::{MARKED, TraceMark};
use crate::runtime::table::NodeKey;
use crate::runtime::value::Value;
use crate::runtime::{ClosureId, Heap, ProtoId, Runtime, StrId, TableId, UdataId};

/// Pending compound objects.
#[derive(Default)]
pub(crate) struct Worklists {
    tables: Vec<TableId>,
    closures: Vec<ClosureId>,
}

impl Worklists {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.closures.is_empty()
    }
}

fn mark_string(heap: &mut Heap, id: StrId) {
    if let Some(s) = heap.strings.get_mut(id) {
        if s.marked == 0 {
            s.marked = MARKED;
        }
    }
}

fn mark_udata(heap: &mut Heap, id: UdataId) {
    if let Some(u) = heap.udata.get_mut(id) {
        if u.marked == 0 {
            u.marked = MARKED;
        }
    }
}

pub(crate) fn mark_table(heap: &mut Heap, work: &mut Worklists, id: TableId) {
    if let Some(t) = heap.tables.get_mut(id) {
        if t.mark == TraceMark::Unmarked {
            t.mark = TraceMark::Queued;
            work.tables.push(id);
        }
    }
}

pub(crate) fn mark_closure(heap: &mut Heap, work: &mut Worklists, id: ClosureId) {
    let Some(c) = heap.closures.get_mut(id) else {
        return;
    };
    if c.mark != TraceMark::Unmarked {
        return;
    }
    c.mark = TraceMark::Queued;
    let proto = c.proto();
    work.closures.push(id);
    if let Some(p) = proto {
        mark_proto(heap, p);
    }
}

/// Mark a prototype and everything it references, nested prototypes
/// included, on an explicit stack.
fn mark_proto(heap: &mut Heap, root: ProtoId) {
    let Heap {
        strings, protos, ..
    } = heap;
    let mut pending = vec![root];
    while let Some(id) = pending.pop() {
        let Some(p) = protos.get_mut(id) else {
            continue;
        };
        if p.marked {
            continue;
        }
        p.marked = true;
        let names = std::iter::once(p.source)
            .chain(p.kstr.iter().copied())
            .chain(p.locvars.iter().map(|l| l.name));
        for s in names {
            if let Some(s) = strings.get_mut(s) {
                if s.marked == 0 {
                    s.marked = MARKED;
                }
            }
        }
        pending.extend(p.kproto.iter().copied());
    }
}

pub(crate) fn mark_value(heap: &mut Heap, work: &mut Worklists, value: Value) {
    match value {
        Value::String(s) => mark_string(heap, s),
        Value::Userdata(u) => mark_udata(heap, u),
        Value::Table(t) => mark_table(heap, work, t),
        Value::Closure(c) | Value::Mark(c) => mark_closure(heap, work, c),
        Value::Proto(p) => mark_proto(heap, p),
        Value::Nil | Value::Number(_) | Value::Native(_) => {}
    }
}

fn traverse_closure(heap: &mut Heap, work: &mut Worklists, id: ClosureId) {
    let upvalues = match heap.closures.get_mut(id) {
        Some(c) => {
            c.mark = TraceMark::Traversed;
            std::mem::take(&mut c.upvalues)
        }
        None => return,
    };
    for &v in &upvalues {
        mark_value(heap, work, v);
    }
    if let Some(c) = heap.closures.get_mut(id) {
        c.upvalues = upvalues;
    }
}

/// Mark live keys and values. Nodes with a nil value lose their key
/// (become dead) here. Number keys hold no reference and are skipped.
fn traverse_table(heap: &mut Heap, work: &mut Worklists, id: TableId) {
    let mut nodes = match heap.tables.get_mut(id) {
        Some(t) => {
            t.mark = TraceMark::Traversed;
            std::mem::take(&mut t.nodes)
        }
        None => return,
    };
    for node in nodes.iter_mut() {
        let NodeKey::Live(key) = node.key else {
            continue;
        };
        if node.val.is_nil() {
            node.key = NodeKey::Dead;
            continue;
        }
        if !key.is_number() {
            mark_value(heap, work, key);
        }
        mark_value(heap, work, node.val);
    }
    if let Some(t) = heap.tables.get_mut(id) {
        t.nodes = nodes;
    }
}

/// Drain both worklists, preferring closures.
pub(crate) fn propagate(heap: &mut Heap, work: &mut Worklists) -> usize {
    let mut traversed = 0;
    loop {
        if let Some(c) = work.closures.pop() {
            traverse_closure(heap, work, c);
        } else if let Some(t) = work.tables.pop() {
            traverse_table(heap, work, t);
        } else {
            break;
        }
        traversed += 1;
    }
    traversed
}

impl Heap {
    /// Whether marking reached the object behind `value`. Values without
    /// a heap object always count as marked.
    pub(crate) fn is_marked(&self, value: &Value) -> bool {
        match *value {
            Value::String(s) => self.strings.get(s).is_some_and(|s| s.marked > 0),
            Value::Userdata(u) => self.udata.get(u).is_some_and(|u| u.marked > 0),
            Value::Table(t) => self.tables.get(t).is_some_and(|t| t.mark.is_marked()),
            Value::Closure(c) | Value::Mark(c) => {
                self.closures.get(c).is_some_and(|c| c.mark.is_marked())
            }
            Value::Proto(p) => self.protos.get(p).is_some_and(|p| p.marked),
            Value::Nil | Value::Number(_) | Value::Native(_) => true,
        }
    }
}

impl Runtime {
    /// Mark everything reachable from the roots. Returns the number of
    /// compound objects traversed.
    pub(crate) fn mark_all(&mut self) -> usize {
        let mut work = Worklists::default();
        let heap = &mut self.heap;

        for entry in self.tags.iter() {
            if let Some(name) = entry.name {
                mark_string(heap, name);
            }
            for c in entry.methods() {
                mark_closure(heap, &mut work, c);
            }
        }

        let clear_cap = self.config.stack_clear_cap;
        self.threads.for_each_mut(|thread| {
            mark_table(heap, &mut work, thread.globals);
            for &v in thread.live() {
                mark_value(heap, &mut work, v);
            }
            let top = thread.top;
            let limit = thread.stack.len().min(top + clear_cap);
            thread.stack[top..limit].fill(Value::Nil);
        });

        for v in self.refs.locked() {
            mark_value(heap, &mut work, v);
        }
        mark_table(heap, &mut work, self.type2tag);

        let traversed = propagate(heap, &mut work);
        debug_assert!(work.is_empty());
        traversed
    }
}
