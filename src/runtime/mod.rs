//! Object model and the runtime context.
//!
//! `Runtime` owns one heap plus everything the collector treats as a root.
//! Every operation takes the runtime explicitly, so independent runtimes can
//! coexist in one process.

pub mod arena;
pub mod call;
pub mod intern;
pub mod object;
pub mod refs;
pub mod table;
pub mod tagmethod;
pub mod thread;
pub mod value;

use std::hash::Hasher;
use std::rc::Rc;

use fnv::FnvHasher;
use serde::Serialize;

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::gc::GcState;

use arena::{Arena, Id};
use call::{NativeFn, ScriptExecutor};
use intern::InternTable;
use object::{Closure, ClosureKind, FIXMARK, LuaString, MARKED, Proto, ProtoSpec, TraceMark, Userdata};
use refs::{RefId, RefMode, RefState, RefTable};
use table::Table;
use tagmethod::{BASIC_TYPE_NAMES, NUM_TAGS, TagEvent, TagTable, USERDATA_TAG};
use thread::{ThreadId, ThreadRing};
use value::Value;

pub type StrId = Id<LuaString>;
pub type UdataId = Id<Userdata>;
pub type TableId = Id<Table>;
pub type ClosureId = Id<Closure>;
pub type ProtoId = Id<Proto>;

/// Host hook taken around a whole collection cycle. No-op by default.
pub trait CriticalSection {
    fn enter(&self) {}
    fn leave(&self) {}
}

pub struct NoLock;

impl CriticalSection for NoLock {}

/// Object storage: one arena per kind plus the two intern tables.
pub struct Heap {
    pub(crate) strings: Arena<LuaString>,
    pub(crate) udata: Arena<Userdata>,
    pub(crate) tables: Arena<Table>,
    pub(crate) closures: Arena<Closure>,
    pub(crate) protos: Arena<Proto>,
    pub(crate) strt: InternTable<LuaString>,
    pub(crate) udt: InternTable<Userdata>,
    /// Live-block estimate (bytes)
    pub(crate) nblocks: usize,
}

/// Live object counts per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapCounts {
    pub strings: usize,
    pub userdata: usize,
    pub tables: usize,
    pub closures: usize,
    pub protos: usize,
}

impl Heap {
    fn new(intern_size: usize) -> Self {
        Self {
            strings: Arena::new(),
            udata: Arena::new(),
            tables: Arena::new(),
            closures: Arena::new(),
            protos: Arena::new(),
            strt: InternTable::new(intern_size),
            udt: InternTable::new(intern_size),
            nblocks: 0,
        }
    }

    pub fn counts(&self) -> HeapCounts {
        HeapCounts {
            strings: self.strings.len(),
            userdata: self.udata.len(),
            tables: self.tables.len(),
            closures: self.closures.len(),
            protos: self.protos.len(),
        }
    }

    /// Whether `value` refers to an object that has not been reclaimed.
    pub fn is_live(&self, value: &Value) -> bool {
        match *value {
            Value::String(s) => self.strings.contains(s),
            Value::Userdata(u) => self.udata.contains(u),
            Value::Table(t) => self.tables.contains(t),
            Value::Closure(c) | Value::Mark(c) => self.closures.contains(c),
            Value::Proto(p) => self.protos.contains(p),
            Value::Nil | Value::Number(_) | Value::Native(_) => true,
        }
    }

    pub(crate) fn release_blocks(&mut self, size: usize) {
        self.nblocks = self.nblocks.saturating_sub(size);
    }
}

fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

fn hash_udata(payload: usize, tag: u32) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write_usize(payload);
    hasher.write_u32(tag);
    hasher.finish()
}

fn reclaimed(kind: &str) -> RuntimeError {
    RuntimeError::runtime(format!("reference to a reclaimed {}", kind))
}

pub struct Runtime {
    pub(crate) heap: Heap,
    pub(crate) threads: ThreadRing,
    pub(crate) tags: TagTable,
    pub(crate) refs: RefTable,
    /// Maps type and tag names to tag numbers; a root
    pub(crate) type2tag: TableId,
    event_names: Vec<StrId>,
    pub(crate) buffer: Vec<u8>,
    pub(crate) gc: GcState,
    pub(crate) executor: Option<Rc<dyn ScriptExecutor>>,
    pub(crate) lock: Box<dyn CriticalSection>,
    pub(crate) config: RuntimeConfig,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default()).expect("default configuration is valid")
    }

    pub fn with_config(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        let mut heap = Heap::new(config.initial_string_table_size);
        let globals = Table::new(0);
        heap.nblocks += globals.block_size();
        let globals = heap.tables.insert(globals);
        let type2tag = Table::new(NUM_TAGS as usize);
        heap.nblocks += type2tag.block_size();
        let type2tag = heap.tables.insert(type2tag);

        let mut rt = Self {
            heap,
            threads: ThreadRing::new(globals, config.initial_stack, config.max_stack),
            tags: TagTable::new(),
            refs: RefTable::new(config.ref_capacity),
            type2tag,
            event_names: Vec::with_capacity(TagEvent::COUNT),
            buffer: Vec::new(),
            gc: GcState::new(config.initial_threshold),
            executor: None,
            lock: Box::new(NoLock),
            config,
        };

        for (tag, name) in BASIC_TYPE_NAMES.iter().enumerate() {
            let s = rt.intern_fixed(name)?;
            rt.tags.get_mut(tag as u32)?.name = Some(s);
            rt.table_set(type2tag, Value::String(s), Value::Number(tag as f64))?;
        }
        for event in TagEvent::ALL {
            let s = rt.intern_fixed(event.name())?;
            rt.event_names.push(s);
        }
        Ok(rt)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Live-block estimate.
    pub fn blocks(&self) -> usize {
        self.heap.nblocks
    }

    pub fn set_executor(&mut self, executor: Rc<dyn ScriptExecutor>) {
        self.executor = Some(executor);
    }

    pub fn clear_executor(&mut self) {
        self.executor = None;
    }

    pub fn set_critical_section(&mut self, lock: Box<dyn CriticalSection>) {
        self.lock = lock;
    }

    fn charge(&mut self, size: usize) -> Result<(), RuntimeError> {
        if let Some(limit) = self.config.heap_limit {
            if self.heap.nblocks + size > limit {
                return Err(RuntimeError::Memory(format!(
                    "heap limit of {} blocks exceeded",
                    limit
                )));
            }
        }
        self.heap.nblocks += size;
        Ok(())
    }

    /// Objects created by finalizers must survive the sweep in progress.
    fn birth_mark(&self) -> TraceMark {
        if self.gc.collecting {
            TraceMark::Traversed
        } else {
            TraceMark::Unmarked
        }
    }

    // ---- strings and userdata ----

    pub fn intern(&mut self, bytes: &[u8]) -> Result<StrId, RuntimeError> {
        let hash = hash_bytes(bytes);
        let strings = &self.heap.strings;
        let found = self.heap.strt.find(hash, |id| {
            strings.get(id).is_some_and(|s| &*s.bytes == bytes)
        });
        if let Some(id) = found {
            // a dead string looked up by a finalizer is revived
            if self.gc.collecting {
                if let Some(s) = self.heap.strings.get_mut(id) {
                    if s.marked == 0 {
                        s.marked = MARKED;
                    }
                }
            }
            return Ok(id);
        }

        let s = LuaString {
            bytes: bytes.into(),
            hash,
            marked: if self.gc.collecting { MARKED } else { 0 },
        };
        self.charge(s.block_size())?;
        let id = self.heap.strings.insert(s);
        self.heap.strt.insert(hash, id);
        if self.heap.strt.needs_growth() {
            let Heap { strings, strt, .. } = &mut self.heap;
            let size = strt.size() * 2;
            strt.resize(size, |id| strings.get(id).map_or(0, |s| s.hash))?;
        }
        Ok(id)
    }

    pub fn intern_str(&mut self, s: &str) -> Result<StrId, RuntimeError> {
        self.intern(s.as_bytes())
    }

    /// Intern a string that survives every collection except collect-all.
    pub fn intern_fixed(&mut self, s: &str) -> Result<StrId, RuntimeError> {
        let id = self.intern_str(s)?;
        if let Some(s) = self.heap.strings.get_mut(id) {
            s.marked = FIXMARK;
        }
        Ok(id)
    }

    pub fn string(&self, id: StrId) -> Option<&LuaString> {
        self.heap.strings.get(id)
    }

    /// Userdata interned by (payload, tag).
    pub fn new_userdata(&mut self, payload: usize, tag: u32) -> Result<UdataId, RuntimeError> {
        if tag != USERDATA_TAG && !(NUM_TAGS..self.tags.len()).contains(&tag) {
            return Err(RuntimeError::InvalidTag(tag));
        }
        let hash = hash_udata(payload, tag);
        let udata = &self.heap.udata;
        let found = self.heap.udt.find(hash, |id| {
            udata
                .get(id)
                .is_some_and(|u| u.payload == payload && u.tag == tag)
        });
        if let Some(id) = found {
            return Ok(id);
        }

        let u = Userdata {
            payload,
            tag,
            hash,
            marked: 0,
        };
        self.charge(u.block_size())?;
        let id = self.heap.udata.insert(u);
        self.heap.udt.insert(hash, id);
        if self.heap.udt.needs_growth() {
            let Heap { udata, udt, .. } = &mut self.heap;
            let size = udt.size() * 2;
            udt.resize(size, |id| udata.get(id).map_or(0, |u| u.hash))?;
        }
        Ok(id)
    }

    pub fn userdata(&self, id: UdataId) -> Option<&Userdata> {
        self.heap.udata.get(id)
    }

    pub fn string_table_size(&self) -> usize {
        self.heap.strt.size()
    }

    pub fn udata_table_size(&self) -> usize {
        self.heap.udt.size()
    }

    // ---- tables ----

    pub fn new_table(&mut self, size_hint: usize) -> Result<TableId, RuntimeError> {
        let mut table = Table::new(size_hint);
        table.mark = self.birth_mark();
        self.charge(table.block_size())?;
        Ok(self.heap.tables.insert(table))
    }

    pub fn table(&self, id: TableId) -> Option<&Table> {
        self.heap.tables.get(id)
    }

    pub fn table_get(&self, id: TableId, key: Value) -> Result<Value, RuntimeError> {
        let table = self.heap.tables.get(id).ok_or_else(|| reclaimed("table"))?;
        Ok(table.get(&key))
    }

    pub fn table_set(&mut self, id: TableId, key: Value, val: Value) -> Result<(), RuntimeError> {
        let table = self
            .heap
            .tables
            .get_mut(id)
            .ok_or_else(|| reclaimed("table"))?;
        let before = table.block_size();
        table.set(key, val)?;
        let after = table.block_size();
        if after >= before {
            self.heap.nblocks += after - before;
        } else {
            self.heap.release_blocks(before - after);
        }
        Ok(())
    }

    pub fn table_next(
        &self,
        id: TableId,
        key: Value,
    ) -> Result<Option<(Value, Value)>, RuntimeError> {
        let table = self.heap.tables.get(id).ok_or_else(|| reclaimed("table"))?;
        table.next(&key)
    }

    pub fn table_len(&self, id: TableId) -> Result<usize, RuntimeError> {
        let table = self.heap.tables.get(id).ok_or_else(|| reclaimed("table"))?;
        Ok(table.len())
    }

    pub fn globals(&self) -> TableId {
        self.threads.current().globals
    }

    pub fn get_global(&mut self, name: &str) -> Result<Value, RuntimeError> {
        let key = self.intern_str(name)?;
        self.table_get(self.globals(), Value::String(key))
    }

    pub fn set_global(&mut self, name: &str, val: Value) -> Result<(), RuntimeError> {
        let key = self.intern_str(name)?;
        self.table_set(self.globals(), Value::String(key), val)
    }

    // ---- functions ----

    pub fn new_native_closure(
        &mut self,
        func: NativeFn,
        upvalues: Vec<Value>,
    ) -> Result<ClosureId, RuntimeError> {
        self.alloc_closure(ClosureKind::Native(func), upvalues)
    }

    pub fn new_script_closure(
        &mut self,
        proto: ProtoId,
        upvalues: Vec<Value>,
    ) -> Result<ClosureId, RuntimeError> {
        if !self.heap.protos.contains(proto) {
            return Err(reclaimed("prototype"));
        }
        self.alloc_closure(ClosureKind::Script(proto), upvalues)
    }

    fn alloc_closure(
        &mut self,
        kind: ClosureKind,
        upvalues: Vec<Value>,
    ) -> Result<ClosureId, RuntimeError> {
        let closure = Closure {
            kind,
            upvalues,
            mark: self.birth_mark(),
        };
        self.charge(closure.block_size())?;
        Ok(self.heap.closures.insert(closure))
    }

    pub fn closure(&self, id: ClosureId) -> Option<&Closure> {
        self.heap.closures.get(id)
    }

    pub fn new_proto(&mut self, spec: ProtoSpec) -> Result<ProtoId, RuntimeError> {
        let source = match spec.source {
            Some(s) => s,
            None => self.intern_str("?")?,
        };
        let strings_ok = std::iter::once(source)
            .chain(spec.kstr.iter().copied())
            .chain(spec.locvars.iter().map(|l| l.name))
            .all(|s| self.heap.strings.contains(s));
        if !strings_ok || !spec.kproto.iter().all(|&p| self.heap.protos.contains(p)) {
            return Err(reclaimed("prototype constant"));
        }
        let proto = Proto {
            source,
            line_defined: spec.line_defined,
            code: spec.code,
            kstr: spec.kstr,
            kproto: spec.kproto,
            locvars: spec.locvars,
            marked: self.gc.collecting,
        };
        self.charge(proto.block_size())?;
        Ok(self.heap.protos.insert(proto))
    }

    pub fn proto(&self, id: ProtoId) -> Option<&Proto> {
        self.heap.protos.get(id)
    }

    // ---- threads and the value stack ----

    pub fn current_thread(&self) -> ThreadId {
        self.threads.current_id()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn spawn_thread(&mut self) -> ThreadId {
        self.threads.spawn(self.config.initial_stack)
    }

    pub fn switch_thread(&mut self, id: ThreadId) -> Result<(), RuntimeError> {
        if self.threads.switch_to(id) {
            Ok(())
        } else {
            Err(RuntimeError::runtime("switch to a closed thread"))
        }
    }

    pub fn close_thread(&mut self, id: ThreadId) -> Result<(), RuntimeError> {
        if self.threads.close(id) {
            Ok(())
        } else {
            Err(RuntimeError::runtime("cannot close this thread"))
        }
    }

    pub fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        self.threads.current_mut().push(value)
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.threads.current_mut().pop()
    }

    pub fn top(&self) -> usize {
        self.threads.current().top()
    }

    pub fn set_top(&mut self, top: usize) -> Result<(), RuntimeError> {
        self.threads.current_mut().set_top(top)
    }

    pub fn stack_value(&self, index: usize) -> Option<Value> {
        self.threads.current().get(index)
    }

    pub fn allow_hooks(&self) -> bool {
        self.threads.current().allow_hooks
    }

    pub fn set_allow_hooks(&mut self, allow: bool) {
        self.threads.current_mut().allow_hooks = allow;
    }

    // ---- tags ----

    /// Register a new userdata tag under `name`.
    pub fn new_tag(&mut self, name: &str) -> Result<u32, RuntimeError> {
        let s = self.intern_str(name)?;
        if !self.table_get(self.type2tag, Value::String(s))?.is_nil() {
            return Err(RuntimeError::runtime(format!(
                "type name '{}' already exists",
                name
            )));
        }
        let tag = self.tags.push(s);
        self.table_set(self.type2tag, Value::String(s), Value::Number(tag as f64))?;
        Ok(tag)
    }

    /// Tag registered under a type or tag name.
    pub fn type_tag(&mut self, name: &str) -> Result<Option<u32>, RuntimeError> {
        let s = self.intern_str(name)?;
        Ok(self
            .table_get(self.type2tag, Value::String(s))?
            .as_number()
            .map(|n| n as u32))
    }

    pub fn tag_name(&self, tag: u32) -> Option<String> {
        let name = self.tags.get(tag).ok()?.name?;
        self.string(name).map(|s| s.to_str_lossy())
    }

    pub fn tag_of(&self, value: Value) -> u32 {
        use tagmethod::{FUNCTION_TAG, NIL_TAG, NUMBER_TAG, STRING_TAG, TABLE_TAG};
        match value {
            Value::Nil => NIL_TAG,
            Value::Number(_) => NUMBER_TAG,
            Value::String(_) => STRING_TAG,
            Value::Userdata(u) => self.userdata(u).map_or(USERDATA_TAG, |u| u.tag),
            Value::Table(_) => TABLE_TAG,
            Value::Closure(_) | Value::Native(_) | Value::Mark(_) | Value::Proto(_) => FUNCTION_TAG,
        }
    }

    pub fn tag_count(&self) -> u32 {
        self.tags.len()
    }

    /// Install a tag method, returning the previous one.
    pub fn set_tag_method(
        &mut self,
        tag: u32,
        event: TagEvent,
        method: Option<ClosureId>,
    ) -> Result<Option<ClosureId>, RuntimeError> {
        if let Some(c) = method {
            if !self.heap.closures.contains(c) {
                return Err(reclaimed("closure"));
            }
        }
        self.tags.set_method(tag, event, method)
    }

    pub fn tag_method(&self, tag: u32, event: TagEvent) -> Result<Option<ClosureId>, RuntimeError> {
        self.tags.method(tag, event)
    }

    pub fn set_finalizer(
        &mut self,
        tag: u32,
        closure: ClosureId,
    ) -> Result<Option<ClosureId>, RuntimeError> {
        self.set_tag_method(tag, TagEvent::Gc, Some(closure))
    }

    /// Event named by an interned string.
    pub fn event_by_name(&self, name: StrId) -> Option<TagEvent> {
        self.event_names
            .iter()
            .position(|&s| s == name)
            .map(|i| TagEvent::ALL[i])
    }

    // ---- external references ----

    /// Store `value` in the reference table. The referent must still be
    /// live.
    pub fn acquire_ref(&mut self, value: Value, mode: RefMode) -> Result<RefId, RuntimeError> {
        if !self.heap.is_live(&value) {
            return Err(reclaimed(value.type_name()));
        }
        self.refs.acquire(value, mode)
    }

    pub fn get_ref(&self, id: RefId) -> Option<Value> {
        self.refs.get(id)
    }

    pub fn ref_state(&self, id: RefId) -> Option<RefState> {
        self.refs.state(id)
    }

    pub fn set_ref_mode(&mut self, id: RefId, mode: RefMode) -> Result<(), RuntimeError> {
        self.refs.set_mode(id, mode)
    }

    pub fn release_ref(&mut self, id: RefId) -> Result<(), RuntimeError> {
        self.refs.release(id)
    }

    pub fn refs_in_use(&self) -> usize {
        self.refs.in_use()
    }

    // ---- scratch buffer ----

    /// Scratch buffer of at least `min_len` bytes.
    pub fn buffer(&mut self, min_len: usize) -> Result<&mut [u8], RuntimeError> {
        let len = self.buffer.len();
        if min_len > len {
            self.buffer
                .try_reserve_exact(min_len - len)
                .map_err(|e| RuntimeError::Memory(format!("scratch buffer: {}", e)))?;
            self.buffer.resize(min_len, 0);
            self.heap.nblocks += min_len - len;
        }
        Ok(&mut self.buffer[..])
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
