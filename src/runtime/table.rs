//! Associative array with an open-addressed node vector.
//!
//! Assigning nil to an existing key keeps the node (key alive, value nil) so
//! an in-progress `next` traversal stays valid. The collector turns such
//! nodes into `NodeKey::Dead` while it traverses the table, which drops the
//! key reference without breaking probe sequences.

use std::hash::Hasher;
use std::mem::size_of;

use fnv::FnvHasher;

use super::object::TraceMark;
use super::value::Value;
use crate::error::RuntimeError;

const MIN_NODES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKey {
    Empty,
    Live(Value),
    /// Former key removed by the collector; lookups probe past it
    Dead,
}

#[derive(Debug, Clone, Copy)]
pub struct Node {
    pub key: NodeKey,
    pub val: Value,
}

impl Node {
    const EMPTY: Node = Node {
        key: NodeKey::Empty,
        val: Value::Nil,
    };
}

pub struct Table {
    pub(crate) nodes: Vec<Node>,
    /// Nodes whose key is not `Empty`
    used: usize,
    pub mark: TraceMark,
}

/// Hash a key. Nil and NaN cannot be keys.
pub fn hash_key(key: &Value) -> Result<u64, RuntimeError> {
    let mut hasher = FnvHasher::default();
    match key {
        Value::Nil => return Err(RuntimeError::InvalidKey("nil")),
        Value::Number(n) => {
            if n.is_nan() {
                return Err(RuntimeError::InvalidKey("NaN"));
            }
            // -0.0 and 0.0 are the same key
            let n = if *n == 0.0 { 0.0 } else { *n };
            hasher.write_u8(1);
            hasher.write_u64(n.to_bits());
        }
        Value::String(id) => {
            hasher.write_u8(2);
            hasher.write_u64(id.to_bits());
        }
        Value::Userdata(id) => {
            hasher.write_u8(3);
            hasher.write_u64(id.to_bits());
        }
        Value::Table(id) => {
            hasher.write_u8(4);
            hasher.write_u64(id.to_bits());
        }
        Value::Closure(id) | Value::Mark(id) => {
            hasher.write_u8(5);
            hasher.write_u64(id.to_bits());
        }
        Value::Proto(id) => {
            hasher.write_u8(6);
            hasher.write_u64(id.to_bits());
        }
        Value::Native(func) => {
            hasher.write_u8(7);
            hasher.write_usize(*func as usize);
        }
    }
    Ok(hasher.finish())
}

impl Table {
    pub fn new(size_hint: usize) -> Self {
        let capacity = if size_hint == 0 {
            0
        } else {
            Self::capacity_for(size_hint)
        };
        Self {
            nodes: vec![Node::EMPTY; capacity],
            used: 0,
            mark: TraceMark::Unmarked,
        }
    }

    /// Smallest power of two that holds `live` entries under 75% load.
    fn capacity_for(live: usize) -> usize {
        (live * 4 / 3 + 1).next_power_of_two().max(MIN_NODES)
    }

    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Number of keys with a non-nil value.
    pub fn len(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n.key, NodeKey::Live(_)) && !n.val.is_nil())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nodes holding a key whose value was set to nil.
    pub fn dead_key_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n.key, NodeKey::Live(_)) && n.val.is_nil())
            .count()
    }

    fn find(&self, key: &Value, hash: u64) -> Option<usize> {
        if self.nodes.is_empty() {
            return None;
        }
        let mask = self.nodes.len() - 1;
        let mut i = hash as usize & mask;
        for _ in 0..self.nodes.len() {
            match &self.nodes[i].key {
                NodeKey::Empty => return None,
                NodeKey::Live(k) if k.raw_eq(key) => return Some(i),
                _ => {}
            }
            i = (i + 1) & mask;
        }
        None
    }

    pub fn get(&self, key: &Value) -> Value {
        let Ok(hash) = hash_key(key) else {
            return Value::Nil;
        };
        self.find(key, hash)
            .map(|i| self.nodes[i].val)
            .unwrap_or(Value::Nil)
    }

    pub fn set(&mut self, key: Value, val: Value) -> Result<(), RuntimeError> {
        let hash = hash_key(&key)?;
        if let Some(i) = self.find(&key, hash) {
            self.nodes[i].val = val;
            return Ok(());
        }
        if val.is_nil() {
            return Ok(());
        }
        if (self.used + 1) * 4 > self.nodes.len() * 3 {
            self.rehash();
        }
        self.insert_new(key, val, hash);
        Ok(())
    }

    fn insert_new(&mut self, key: Value, val: Value, hash: u64) {
        let mask = self.nodes.len() - 1;
        let mut i = hash as usize & mask;
        loop {
            match self.nodes[i].key {
                NodeKey::Empty => {
                    self.used += 1;
                    break;
                }
                NodeKey::Dead => break,
                NodeKey::Live(_) => i = (i + 1) & mask,
            }
        }
        self.nodes[i] = Node {
            key: NodeKey::Live(key),
            val,
        };
    }

    /// Rebuild the node vector from entries with non-nil values.
    fn rehash(&mut self) {
        let live: Vec<(Value, Value)> = self.iter().collect();
        self.nodes = vec![Node::EMPTY; Self::capacity_for(live.len() + 1)];
        self.used = 0;
        for (key, val) in live {
            if let Ok(hash) = hash_key(&key) {
                self.insert_new(key, val, hash);
            }
        }
    }

    /// Entry following `key` in slot order (`Nil` starts the traversal).
    pub fn next(&self, key: &Value) -> Result<Option<(Value, Value)>, RuntimeError> {
        let start = if key.is_nil() {
            0
        } else {
            let hash = hash_key(key)?;
            self.find(key, hash)
                .ok_or(RuntimeError::InvalidKey("invalid key to next"))?
                + 1
        };
        Ok(self.nodes[start.min(self.nodes.len())..]
            .iter()
            .find_map(|n| match n.key {
                NodeKey::Live(k) if !n.val.is_nil() => Some((k, n.val)),
                _ => None,
            }))
    }

    /// Live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.nodes.iter().filter_map(|n| match n.key {
            NodeKey::Live(k) if !n.val.is_nil() => Some((k, n.val)),
            _ => None,
        })
    }

    pub fn block_size(&self) -> usize {
        size_of::<Self>() + self.nodes.len() * size_of::<Node>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    #[test]
    fn test_set_get() {
        let mut t = Table::new(0);
        t.set(num(1.0), num(10.0)).unwrap();
        t.set(num(2.0), num(20.0)).unwrap();
        assert_eq!(t.get(&num(1.0)), num(10.0));
        assert_eq!(t.get(&num(2.0)), num(20.0));
        assert_eq!(t.get(&num(3.0)), Value::Nil);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_invalid_keys() {
        let mut t = Table::new(0);
        assert_eq!(
            t.set(Value::Nil, num(1.0)),
            Err(RuntimeError::InvalidKey("nil"))
        );
        assert_eq!(
            t.set(num(f64::NAN), num(1.0)),
            Err(RuntimeError::InvalidKey("NaN"))
        );
        assert_eq!(t.get(&Value::Nil), Value::Nil);
    }

    #[test]
    fn test_negative_zero_key() {
        let mut t = Table::new(0);
        t.set(num(0.0), num(1.0)).unwrap();
        assert_eq!(t.get(&num(-0.0)), num(1.0));
    }

    #[test]
    fn test_nil_assignment_leaves_dead_key() {
        let mut t = Table::new(4);
        t.set(num(1.0), num(1.0)).unwrap();
        t.set(num(1.0), Value::Nil).unwrap();
        assert_eq!(t.len(), 0);
        assert_eq!(t.dead_key_count(), 1);
        assert_eq!(t.get(&num(1.0)), Value::Nil);
        // reassigning revives the same node
        t.set(num(1.0), num(2.0)).unwrap();
        assert_eq!(t.dead_key_count(), 0);
        assert_eq!(t.get(&num(1.0)), num(2.0));
    }

    #[test]
    fn test_growth_keeps_entries() {
        let mut t = Table::new(0);
        for i in 0..200 {
            t.set(num(i as f64), num((i * 2) as f64)).unwrap();
        }
        assert_eq!(t.len(), 200);
        assert!(t.capacity() * 3 >= 200 * 4);
        for i in 0..200 {
            assert_eq!(t.get(&num(i as f64)), num((i * 2) as f64));
        }
    }

    #[test]
    fn test_lookup_probes_past_dead_nodes() {
        let mut t = Table::new(0);
        for i in 0..3 {
            t.set(num(i as f64), num(1.0)).unwrap();
        }
        for node in t.nodes.iter_mut() {
            if node.key == NodeKey::Live(num(0.0)) {
                node.key = NodeKey::Dead;
                node.val = Value::Nil;
            }
        }
        assert_eq!(t.get(&num(1.0)), num(1.0));
        assert_eq!(t.get(&num(2.0)), num(1.0));
        assert_eq!(t.get(&num(0.0)), Value::Nil);
    }

    #[test]
    fn test_next_traversal() {
        let mut t = Table::new(0);
        for i in 0..5 {
            t.set(num(i as f64), num(1.0)).unwrap();
        }
        let mut seen = 0;
        let mut key = Value::Nil;
        while let Some((k, _)) = t.next(&key).unwrap() {
            seen += 1;
            key = k;
        }
        assert_eq!(seen, 5);
        assert!(t.next(&num(99.0)).is_err());
    }

    #[test]
    fn test_next_survives_nil_assignment() {
        let mut t = Table::new(0);
        for i in 0..4 {
            t.set(num(i as f64), num(1.0)).unwrap();
        }
        let (first, _) = t.next(&Value::Nil).unwrap().unwrap();
        t.set(first, Value::Nil).unwrap();
        assert!(t.next(&first).is_ok());
    }
}
