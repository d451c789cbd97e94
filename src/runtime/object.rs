//! Heap object layouts and their mark states.
//!
//! Strings and userdata carry a small integer mark (0 = unmarked,
//! 1 = reached this cycle, `FIXMARK` = permanent). Tables and closures carry
//! a `TraceMark` that tells "queued for traversal" apart from "unmarked", so
//! a cyclic reference can never enqueue the same object twice. Prototypes
//! use a plain flag.

use std::mem::size_of;

use super::call::NativeFn;
use super::value::Value;
use super::{ProtoId, StrId};

/// Mark value of a reached string or userdata.
pub const MARKED: u8 = 1;
/// Strings at or above this mark are never collected outside collect-all mode.
pub const FIXMARK: u8 = 2;

/// Mark state of tables and closures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceMark {
    #[default]
    Unmarked,
    /// Reached and waiting on a worklist
    Queued,
    /// Reached and traversed
    Traversed,
}

impl TraceMark {
    pub fn is_marked(self) -> bool {
        self != TraceMark::Unmarked
    }
}

/// An interned byte string.
#[derive(Debug)]
pub struct LuaString {
    pub bytes: Box<[u8]>,
    pub hash: u64,
    pub marked: u8,
}

impl LuaString {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_str_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn is_fixed(&self) -> bool {
        self.marked >= FIXMARK
    }

    pub fn block_size(&self) -> usize {
        size_of::<Self>() + self.bytes.len()
    }
}

/// An opaque host payload with a tag, interned by (payload, tag).
#[derive(Debug)]
pub struct Userdata {
    pub payload: usize,
    pub tag: u32,
    pub hash: u64,
    pub marked: u8,
}

impl Userdata {
    pub fn block_size(&self) -> usize {
        size_of::<Self>()
    }
}

/// What a closure runs when called.
#[derive(Clone, Copy)]
pub enum ClosureKind {
    Native(NativeFn),
    Script(ProtoId),
}

/// A function value plus its captured upvalues.
pub struct Closure {
    pub kind: ClosureKind,
    pub upvalues: Vec<Value>,
    pub mark: TraceMark,
}

impl Closure {
    pub fn proto(&self) -> Option<ProtoId> {
        match self.kind {
            ClosureKind::Script(p) => Some(p),
            ClosureKind::Native(_) => None,
        }
    }

    pub fn block_size(&self) -> usize {
        size_of::<Self>() + self.upvalues.len() * size_of::<Value>()
    }
}

/// Local-variable descriptor: name and the line where its scope ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocVar {
    pub name: StrId,
    pub end_line: u32,
}

/// Compiled function metadata.
#[derive(Debug)]
pub struct Proto {
    pub source: StrId,
    pub line_defined: u32,
    pub code: Vec<u8>,
    pub kstr: Vec<StrId>,
    pub kproto: Vec<ProtoId>,
    pub locvars: Vec<LocVar>,
    pub marked: bool,
}

impl Proto {
    pub fn block_size(&self) -> usize {
        size_of::<Self>()
            + self.code.len()
            + self.kstr.len() * size_of::<StrId>()
            + self.kproto.len() * size_of::<ProtoId>()
            + self.locvars.len() * size_of::<LocVar>()
    }
}

/// Everything needed to create a prototype.
#[derive(Debug, Clone, Default)]
pub struct ProtoSpec {
    pub source: Option<StrId>,
    pub line_defined: u32,
    pub code: Vec<u8>,
    pub kstr: Vec<StrId>,
    pub kproto: Vec<ProtoId>,
    pub locvars: Vec<LocVar>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_mark() {
        assert!(!TraceMark::Unmarked.is_marked());
        assert!(TraceMark::Queued.is_marked());
        assert!(TraceMark::Traversed.is_marked());
        assert_eq!(TraceMark::default(), TraceMark::Unmarked);
    }

    #[test]
    fn test_string_fixed() {
        let s = LuaString {
            bytes: b"and".to_vec().into_boxed_slice(),
            hash: 0,
            marked: FIXMARK,
        };
        assert!(s.is_fixed());
        assert_eq!(s.block_size(), size_of::<LuaString>() + 3);
        assert_eq!(s.to_str_lossy(), "and");
    }
}
