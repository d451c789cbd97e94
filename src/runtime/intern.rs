//! Deduplicating hash tables for strings and userdata.
//!
//! The table only stores ids; content comparison and hashes are supplied by
//! the caller because the objects themselves live in the heap arenas.

use super::arena::Id;
use crate::error::RuntimeError;

pub struct InternTable<T> {
    buckets: Vec<Vec<Id<T>>>,
    nuse: usize,
}

impl<T> InternTable<T> {
    /// Create a table with `size` buckets, rounded up to a power of two.
    pub fn new(size: usize) -> Self {
        let size = size.max(1).next_power_of_two();
        Self {
            buckets: (0..size).map(|_| Vec::new()).collect(),
            nuse: 0,
        }
    }

    /// Bucket count.
    pub fn size(&self) -> usize {
        self.buckets.len()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.nuse
    }

    pub fn is_empty(&self) -> bool {
        self.nuse == 0
    }

    fn bucket(&self, hash: u64) -> usize {
        hash as usize & (self.buckets.len() - 1)
    }

    /// First entry in the bucket of `hash` accepted by `matches`.
    pub fn find(&self, hash: u64, mut matches: impl FnMut(Id<T>) -> bool) -> Option<Id<T>> {
        self.buckets[self.bucket(hash)]
            .iter()
            .copied()
            .find(|&id| matches(id))
    }

    /// Add an entry; the caller has already checked it is not present.
    pub fn insert(&mut self, hash: u64, id: Id<T>) {
        let b = self.bucket(hash);
        self.buckets[b].push(id);
        self.nuse += 1;
    }

    /// Whether the load factor calls for doubling.
    pub fn needs_growth(&self) -> bool {
        self.nuse > self.buckets.len()
    }

    /// Redistribute every entry over `new_size` buckets.
    pub fn resize(
        &mut self,
        new_size: usize,
        hash_of: impl Fn(Id<T>) -> u64,
    ) -> Result<(), RuntimeError> {
        let new_size = new_size.max(1).next_power_of_two();
        let mut buckets: Vec<Vec<Id<T>>> = Vec::new();
        buckets
            .try_reserve_exact(new_size)
            .map_err(|e| RuntimeError::Memory(format!("intern table resize: {}", e)))?;
        buckets.extend((0..new_size).map(|_| Vec::new()));
        let mask = new_size - 1;
        for id in self.buckets.drain(..).flatten() {
            buckets[hash_of(id) as usize & mask].push(id);
        }
        self.buckets = buckets;
        Ok(())
    }

    /// Halve the bucket count when fewer than a quarter of the buckets'
    /// worth of entries remain and the halved table still holds at least
    /// `floor` buckets.
    /// Returns whether a resize happened.
    pub fn shrink_if_sparse(
        &mut self,
        floor: usize,
        hash_of: impl Fn(Id<T>) -> u64,
    ) -> Result<bool, RuntimeError> {
        let size = self.buckets.len();
        if self.nuse < size / 4 && size / 2 >= floor {
            self.resize(size / 2, hash_of)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Single pass over every bucket chain; entries for which `keep`
    /// returns false are unlinked.
    pub fn retain(&mut self, mut keep: impl FnMut(Id<T>) -> bool) {
        let mut removed = 0;
        for bucket in &mut self.buckets {
            bucket.retain(|&id| {
                let k = keep(id);
                if !k {
                    removed += 1;
                }
                k
            });
        }
        self.nuse -= removed;
    }

    pub fn ids(&self) -> impl Iterator<Item = Id<T>> + '_ {
        self.buckets.iter().flatten().copied()
    }
}
