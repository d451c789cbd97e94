//! Tags, tag-method events and per-tag pending-finalization lists.

use super::{ClosureId, StrId, UdataId};
use crate::error::RuntimeError;

pub const USERDATA_TAG: u32 = 0;
/// The `gc` method of this tag is the post-collection notification hook.
pub const NIL_TAG: u32 = 1;
pub const NUMBER_TAG: u32 = 2;
pub const STRING_TAG: u32 = 3;
pub const TABLE_TAG: u32 = 4;
pub const FUNCTION_TAG: u32 = 5;
/// Number of predefined tags; `new_tag` numbers from here.
pub const NUM_TAGS: u32 = 6;

pub const BASIC_TYPE_NAMES: [&str; NUM_TAGS as usize] =
    ["userdata", "nil", "number", "string", "table", "function"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagEvent {
    GetTable,
    SetTable,
    Index,
    GetGlobal,
    SetGlobal,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Unm,
    Lt,
    Concat,
    Gc,
    Function,
}

impl TagEvent {
    pub const COUNT: usize = 15;

    pub const ALL: [TagEvent; Self::COUNT] = [
        TagEvent::GetTable,
        TagEvent::SetTable,
        TagEvent::Index,
        TagEvent::GetGlobal,
        TagEvent::SetGlobal,
        TagEvent::Add,
        TagEvent::Sub,
        TagEvent::Mul,
        TagEvent::Div,
        TagEvent::Pow,
        TagEvent::Unm,
        TagEvent::Lt,
        TagEvent::Concat,
        TagEvent::Gc,
        TagEvent::Function,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TagEvent::GetTable => "gettable",
            TagEvent::SetTable => "settable",
            TagEvent::Index => "index",
            TagEvent::GetGlobal => "getglobal",
            TagEvent::SetGlobal => "setglobal",
            TagEvent::Add => "add",
            TagEvent::Sub => "sub",
            TagEvent::Mul => "mul",
            TagEvent::Div => "div",
            TagEvent::Pow => "pow",
            TagEvent::Unm => "unm",
            TagEvent::Lt => "lt",
            TagEvent::Concat => "concat",
            TagEvent::Gc => "gc",
            TagEvent::Function => "function",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.name() == name)
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Whether `event` may carry a handler on `tag`.
///
/// Finalization only exists for userdata tags; the nil tag additionally
/// owns the post-collection hook.
pub fn valid_event(tag: u32, event: TagEvent) -> bool {
    match event {
        TagEvent::Gc => tag == USERDATA_TAG || tag == NIL_TAG || tag >= NUM_TAGS,
        _ => true,
    }
}

/// Per-tag record.
#[derive(Debug, Default)]
pub struct TagEntry {
    pub name: Option<StrId>,
    methods: [Option<ClosureId>; TagEvent::COUNT],
    /// Userdata found unreachable and waiting for this tag's finalizer
    pub(crate) collected: Vec<UdataId>,
}

impl TagEntry {
    pub fn method(&self, event: TagEvent) -> Option<ClosureId> {
        self.methods[event.index()]
    }

    pub fn methods(&self) -> impl Iterator<Item = ClosureId> + '_ {
        self.methods.iter().flatten().copied()
    }

    pub fn pending(&self) -> usize {
        self.collected.len()
    }
}

pub struct TagTable {
    entries: Vec<TagEntry>,
}

impl TagTable {
    /// Table with the predefined tags, names not yet interned.
    pub fn new() -> Self {
        Self {
            entries: (0..NUM_TAGS).map(|_| TagEntry::default()).collect(),
        }
    }

    /// Number of registered tags.
    pub fn len(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, tag: u32) -> Result<&TagEntry, RuntimeError> {
        self.entries
            .get(tag as usize)
            .ok_or(RuntimeError::InvalidTag(tag))
    }

    pub fn get_mut(&mut self, tag: u32) -> Result<&mut TagEntry, RuntimeError> {
        self.entries
            .get_mut(tag as usize)
            .ok_or(RuntimeError::InvalidTag(tag))
    }

    pub fn push(&mut self, name: StrId) -> u32 {
        self.entries.push(TagEntry {
            name: Some(name),
            ..TagEntry::default()
        });
        self.len() - 1
    }

    pub fn method(&self, tag: u32, event: TagEvent) -> Result<Option<ClosureId>, RuntimeError> {
        Ok(self.get(tag)?.method(event))
    }

    /// Install a handler, returning the previous one.
    pub fn set_method(
        &mut self,
        tag: u32,
        event: TagEvent,
        method: Option<ClosureId>,
    ) -> Result<Option<ClosureId>, RuntimeError> {
        let entry = self.get_mut(tag)?;
        if !valid_event(tag, event) {
            return Err(RuntimeError::runtime(format!(
                "cannot set `{}' tag method for tag {}",
                event.name(),
                tag
            )));
        }
        Ok(std::mem::replace(&mut entry.methods[event.index()], method))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TagEntry> {
        self.entries.iter()
    }

    /// Userdata waiting for finalization across all tags.
    pub fn pending(&self) -> usize {
        self.entries.iter().map(|e| e.collected.len()).sum()
    }
}

impl Default for TagTable {
    fn default() -> Self {
        Self::new()
    }
}
