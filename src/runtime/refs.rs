//! External reference table: host-held handles into the heap.
//!
//! A slot is locked (a root), held (alive only while reachable through
//! something else) or collected (its held referent was reclaimed). Free
//! slots thread a singly linked free list through the array.

use serde::Serialize;

use super::value::Value;
use crate::error::RuntimeError;

/// Integer handle returned to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefId(pub i32);

impl RefId {
    /// Reference to nil; always dereferences to nil.
    pub const NIL: RefId = RefId(-1);
    /// Never names a slot.
    pub const NONE: RefId = RefId(-2);

    fn slot(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefMode {
    Lock,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefState {
    Locked,
    Held,
    Collected,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Lock(Value),
    Hold(Value),
    Collected,
    Free { next: Option<u32> },
}

pub struct RefTable {
    slots: Vec<Slot>,
    free: Option<u32>,
    capacity: usize,
}

impl RefTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: None,
            capacity,
        }
    }

    /// Allocated slots, free ones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots currently owned by the host (locked, held or collected).
    pub fn in_use(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| !matches!(s, Slot::Free { .. }))
            .count()
    }

    pub fn acquire(&mut self, value: Value, mode: RefMode) -> Result<RefId, RuntimeError> {
        if value.is_nil() {
            return Ok(RefId::NIL);
        }
        let index = match self.free {
            Some(head) => {
                let next = match self.slots.get(head as usize) {
                    Some(Slot::Free { next }) => *next,
                    _ => panic!("reference free list is corrupt: head {} is not free", head),
                };
                self.free = next;
                head as usize
            }
            None => {
                if self.slots.len() >= self.capacity {
                    return Err(RuntimeError::Memory("reference table overflow".to_string()));
                }
                self.slots.push(Slot::Collected);
                self.slots.len() - 1
            }
        };
        self.slots[index] = match mode {
            RefMode::Lock => Slot::Lock(value),
            RefMode::Hold => Slot::Hold(value),
        };
        Ok(RefId(index as i32))
    }

    /// The referent, or `None` once collected or when `id` names no slot.
    pub fn get(&self, id: RefId) -> Option<Value> {
        if id == RefId::NIL {
            return Some(Value::Nil);
        }
        match self.slots.get(id.slot()?)? {
            Slot::Lock(v) | Slot::Hold(v) => Some(*v),
            Slot::Collected | Slot::Free { .. } => None,
        }
    }

    pub fn state(&self, id: RefId) -> Option<RefState> {
        match self.slots.get(id.slot()?)? {
            Slot::Lock(_) => Some(RefState::Locked),
            Slot::Hold(_) => Some(RefState::Held),
            Slot::Collected => Some(RefState::Collected),
            Slot::Free { .. } => None,
        }
    }

    /// Promote a held slot to locked or demote a locked one to held.
    pub fn set_mode(&mut self, id: RefId, mode: RefMode) -> Result<(), RuntimeError> {
        let slot = id
            .slot()
            .and_then(|i| self.slots.get_mut(i))
            .ok_or(RuntimeError::InvalidRef(id.0))?;
        let value = match slot {
            Slot::Lock(v) | Slot::Hold(v) => *v,
            Slot::Collected | Slot::Free { .. } => return Err(RuntimeError::InvalidRef(id.0)),
        };
        *slot = match mode {
            RefMode::Lock => Slot::Lock(value),
            RefMode::Hold => Slot::Hold(value),
        };
        Ok(())
    }

    /// Return a slot to the free list. Releasing `RefId::NIL` does nothing.
    pub fn release(&mut self, id: RefId) -> Result<(), RuntimeError> {
        if id == RefId::NIL {
            return Ok(());
        }
        let index = id.slot().ok_or(RuntimeError::InvalidRef(id.0))?;
        match self.slots.get(index) {
            Some(Slot::Lock(_) | Slot::Hold(_) | Slot::Collected) => {}
            _ => return Err(RuntimeError::InvalidRef(id.0)),
        }
        self.slots[index] = Slot::Free { next: self.free };
        self.free = Some(index as u32);
        Ok(())
    }

    /// Referents of locked slots.
    pub fn locked(&self) -> impl Iterator<Item = Value> + '_ {
        self.slots.iter().filter_map(|s| match s {
            Slot::Lock(v) => Some(*v),
            _ => None,
        })
    }

    /// Turn every locked or held slot referring to `value` into a collected
    /// one. Used when an object is freed outside the mark phase.
    pub fn collect_referent(&mut self, value: Value) -> usize {
        let mut collected = 0;
        for slot in &mut self.slots {
            if let Slot::Lock(v) | Slot::Hold(v) = slot {
                if *v == value {
                    *slot = Slot::Collected;
                    collected += 1;
                }
            }
        }
        collected
    }

    /// Consistency pass after marking: held slots whose referent was not
    /// reached become collected. Returns how many did.
    ///
    /// Panics if a locked referent is unmarked or the free list is corrupt.
    pub fn invalidate(&mut self, is_marked: impl Fn(&Value) -> bool) -> usize {
        let n = self.slots.len();
        let free_link_ok = |slots: &[Slot], link: Option<u32>| match link {
            None => true,
            Some(i) => (i as usize) < n && matches!(slots[i as usize], Slot::Free { .. }),
        };
        let mut collected = 0;
        for i in 0..n {
            match self.slots[i] {
                Slot::Hold(v) if !is_marked(&v) => {
                    self.slots[i] = Slot::Collected;
                    collected += 1;
                }
                Slot::Lock(v) => {
                    assert!(is_marked(&v), "locked reference {} was not marked", i);
                }
                Slot::Free { next } => {
                    assert!(
                        free_link_ok(&self.slots, next),
                        "reference free list is corrupt at slot {}",
                        i
                    );
                }
                Slot::Hold(_) | Slot::Collected => {}
            }
        }
        assert!(
            free_link_ok(&self.slots, self.free),
            "reference free list head is corrupt"
        );
        collected
    }
}
