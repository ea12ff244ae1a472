//! An open-addressed hashtable keyed by interned string identity, used for
//! globals, object fields, and class method tables.
//!
//! Keys are always `ObjRef`s known to point at an interned `String` object;
//! comparing keys for the same logical name is therefore pointer equality,
//! never a byte comparison (except in `find_string`, whose whole job is to
//! locate the canonical interned copy of a not-yet-interned byte sequence).

use crate::object::ObjRef;
use crate::value::Value;

const MAX_LOAD: f64 = 0.75;

#[derive(Clone)]
struct Entry {
    key: Option<ObjRef>,
    value: Value,
}

/// `true` once a slot has held an entry that was later deleted; probes must
/// continue past a tombstone, but a tombstone's slot may be reused on
/// insert.
fn is_tombstone(entry: &Entry) -> bool {
    entry.key.is_none() && matches!(entry.value, Value::Bool(true))
}

#[derive(Clone, Default)]
pub struct Table {
    entries: Vec<Option<Entry>>,
    count: usize,
    tombstones: usize,
}

impl Table {
    pub fn new() -> Table {
        Table { entries: Vec::new(), count: 0, tombstones: 0 }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Linear probe from `hash % capacity`, returning the index of the slot
    /// that either holds `key` or is where `key` belongs. The first
    /// tombstone seen is remembered and returned only if no live match
    /// turns up later in the probe sequence, matching the table's find
    /// semantics.
    fn find_slot(entries: &[Option<Entry>], key: ObjRef, hash: u32) -> usize {
        let capacity = entries.len();
        let mut index = hash as usize % capacity;
        let mut tombstone: Option<usize> = None;
        loop {
            match &entries[index] {
                None => return tombstone.unwrap_or(index),
                Some(entry) if is_tombstone(entry) => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Some(entry) => {
                    if let Some(entry_key) = entry.key {
                        if entry_key.same_as(&key) {
                            return index;
                        }
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }

    fn key_hash(key: ObjRef) -> u32 {
        key.as_string().map(|s| s.hash).unwrap_or(0)
    }

    fn grow(&mut self, new_capacity: usize) {
        let mut new_entries: Vec<Option<Entry>> = vec![None; new_capacity];
        let mut new_count = 0;
        for slot in self.entries.drain(..) {
            if let Some(entry) = slot {
                if let Some(key) = entry.key {
                    let index = Self::find_slot(&new_entries, key, Self::key_hash(key));
                    new_entries[index] = Some(entry);
                    new_count += 1;
                }
            }
        }
        self.entries = new_entries;
        self.count = new_count;
        self.tombstones = 0;
    }

    fn ensure_capacity(&mut self) {
        if self.capacity() == 0 {
            self.grow(8);
            return;
        }
        if (self.count + self.tombstones + 1) as f64 > self.capacity() as f64 * MAX_LOAD {
            self.grow(self.capacity() * 2);
        }
    }

    /// Inserts or overwrites `key -> value`. Returns `true` if this created
    /// a new entry, `false` if it overwrote an existing one.
    pub fn set(&mut self, key: ObjRef, value: Value) -> bool {
        self.ensure_capacity();
        let hash = Self::key_hash(key);
        let index = Self::find_slot(&self.entries, key, hash);
        let is_new = match &self.entries[index] {
            None => true,
            Some(entry) if is_tombstone(entry) => {
                self.tombstones -= 1;
                true
            }
            Some(_) => false,
        };
        if is_new {
            self.count += 1;
        }
        self.entries[index] = Some(Entry { key: Some(key), value });
        is_new
    }

    pub fn get(&self, key: ObjRef) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let hash = Self::key_hash(key);
        let index = Self::find_slot(&self.entries, key, hash);
        match &self.entries[index] {
            Some(entry) if entry.key.is_some() => Some(entry.value),
            _ => None,
        }
    }

    /// Deletes `key`, leaving a tombstone so later probes for colliding keys
    /// keep working. Returns `true` if a live entry was removed.
    pub fn delete(&mut self, key: ObjRef) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let hash = Self::key_hash(key);
        let index = Self::find_slot(&self.entries, key, hash);
        match &self.entries[index] {
            Some(entry) if entry.key.is_some() => {
                self.entries[index] = Some(Entry { key: None, value: Value::Bool(true) });
                self.count -= 1;
                self.tombstones += 1;
                true
            }
            _ => false,
        }
    }

    /// Finds the already-interned string equal to `bytes`, if any. This is
    /// the one place the table is probed by content rather than by
    /// identity, since interning exists precisely to turn repeated content
    /// into a single identity.
    pub fn find_string(&self, bytes: &str, hash: u32) -> Option<ObjRef> {
        if self.entries.is_empty() {
            return None;
        }
        let capacity = self.capacity();
        let mut index = hash as usize % capacity;
        loop {
            match &self.entries[index] {
                None => return None,
                Some(entry) if is_tombstone(entry) => {}
                Some(entry) => {
                    if let Some(key) = entry.key {
                        if let Some(existing) = key.as_str() {
                            if existing == bytes {
                                return Some(key);
                            }
                        }
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }

    /// Copies every live entry of `other` into `self`, overwriting
    /// conflicting keys. Used to implement class inheritance (`Inherit`).
    pub fn add_all(&mut self, other: &Table) {
        for slot in &other.entries {
            if let Some(entry) = slot {
                if let Some(key) = entry.key {
                    self.set(key, entry.value);
                }
            }
        }
    }

    /// Iterates every live `(key, value)` pair. Used by the collector to
    /// trace a table's entries, and by the weak string-intern prune.
    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, Value)> + '_ {
        self.entries.iter().filter_map(|slot| {
            slot.as_ref().and_then(|entry| entry.key.map(|key| (key, entry.value)))
        })
    }

    /// Removes every live entry whose key is not marked. Used to prune the
    /// weak string-intern table after the trace phase and before sweep.
    pub fn retain_marked_keys(&mut self) {
        for slot in &mut self.entries {
            if let Some(entry) = slot {
                if let Some(key) = entry.key {
                    if !key.is_marked() {
                        *slot = Some(Entry { key: None, value: Value::Bool(true) });
                        self.count -= 1;
                        self.tombstones += 1;
                    }
                }
            }
        }
    }
}

/// FNV-1a, as specified for string hashing. Matches the reference
/// implementation's constants exactly so string hashes are a pure function
/// of bytes, independent of insertion order.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    const FNV_OFFSET_BASIS: u32 = 2166136261;
    const FNV_PRIME: u32 = 16777619;
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fnv1a_known_vectors() {
        assert_eq!(fnv1a(b""), 2166136261);
        assert_eq!(fnv1a(b"a"), 0x050c5d7f);
    }
}
