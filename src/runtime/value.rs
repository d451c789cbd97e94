use std::fmt;

use super::call::NativeFn;
use super::{ClosureId, ProtoId, StrId, TableId, UdataId};

/// A tagged value.
///
/// Numbers and native function pointers are stored inline; every other
/// variant is a handle into one of the heap arenas.
#[derive(Clone, Copy)]
pub enum Value {
    Nil,
    Number(f64),
    String(StrId),
    Userdata(UdataId),
    Table(TableId),
    Closure(ClosureId),
    /// Compiled function prototype (only seen in constants and by the compiler)
    Proto(ProtoId),
    Native(NativeFn),
    /// Stack marker for a closure whose call is in progress
    Mark(ClosureId),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    /// Whether the value refers to a collectable heap object.
    pub fn is_collectable(&self) -> bool {
        !matches!(self, Value::Nil | Value::Number(_) | Value::Native(_))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<StrId> {
        match self {
            Value::String(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_userdata(&self) -> Option<UdataId> {
        match self {
            Value::Userdata(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<TableId> {
        match self {
            Value::Table(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<ClosureId> {
        match self {
            Value::Closure(c) | Value::Mark(c) => Some(*c),
            _ => None,
        }
    }

    /// Get the type name of this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Userdata(_) => "userdata",
            Value::Table(_) => "table",
            Value::Closure(_) | Value::Native(_) | Value::Mark(_) => "function",
            Value::Proto(_) => "proto",
        }
    }

    /// Raw equality: numbers by value, everything else by identity.
    pub fn raw_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Userdata(a), Value::Userdata(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a == b,
            (Value::Closure(a), Value::Closure(b)) => a == b,
            (Value::Proto(a), Value::Proto(b)) => a == b,
            (Value::Native(a), Value::Native(b)) => *a as usize == *b as usize,
            (Value::Mark(a), Value::Mark(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.raw_eq(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Number(n) => write!(f, "Number({})", n),
            Value::String(id) => write!(f, "String({:?})", id),
            Value::Userdata(id) => write!(f, "Userdata({:?})", id),
            Value::Table(id) => write!(f, "Table({:?})", id),
            Value::Closure(id) => write!(f, "Closure({:?})", id),
            Value::Proto(id) => write!(f, "Proto({:?})", id),
            Value::Native(func) => write!(f, "Native({:#x})", *func as usize),
            Value::Mark(id) => write!(f, "Mark({:?})", id),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<StrId> for Value {
    fn from(id: StrId) -> Self {
        Value::String(id)
    }
}

impl From<TableId> for Value {
    fn from(id: TableId) -> Self {
        Value::Table(id)
    }
}

impl From<ClosureId> for Value {
    fn from(id: ClosureId) -> Self {
        Value::Closure(id)
    }
}

impl From<UdataId> for Value {
    fn from(id: UdataId) -> Self {
        Value::Userdata(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;

    #[test]
    fn test_number_equality() {
        assert_eq!(Value::Number(42.0), Value::Number(42.0));
        assert_ne!(Value::Number(1.0), Value::Nil);
        assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));
    }

    #[test]
    fn test_type_names() {
        let mut rt = Runtime::new();
        let s = rt.intern_str("x").unwrap();
        let t = rt.new_table(0).unwrap();
        assert_eq!(Value::Nil.type_name(), "nil");
        assert_eq!(Value::Number(1.0).type_name(), "number");
        assert_eq!(Value::String(s).type_name(), "string");
        assert_eq!(Value::Table(t).type_name(), "table");
    }

    #[test]
    fn test_identity_equality() {
        let mut rt = Runtime::new();
        let a = rt.new_table(0).unwrap();
        let b = rt.new_table(0).unwrap();
        assert_eq!(Value::Table(a), Value::Table(a));
        assert_ne!(Value::Table(a), Value::Table(b));
        assert!(Value::Table(a).is_collectable());
        assert!(!Value::Number(0.0).is_collectable());
    }

    #[test]
    fn test_mark_reports_closure() {
        let mut rt = Runtime::new();
        let c = rt.new_native_closure(|_, _| Ok(()), vec![]).unwrap();
        assert_eq!(Value::Mark(c).as_closure(), Some(c));
        assert_eq!(Value::Mark(c).type_name(), "function");
    }
}
