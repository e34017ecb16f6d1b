//! Open-addressed hash table keyed by values
//!
//! Linear probing over a power-of-two entry array, 0.75 load factor,
//! tombstones on delete. An empty slot has a `nil` key and a `nil` value; a
//! tombstone has a `nil` key and a `true` value (so probe sequences keep
//! walking across deleted entries). `nil` itself is therefore not usable as
//! a key; the runtime only ever keys tables by strings and numbers.
//!
//! Key hashing needs the heap (string hashes live on the interned string
//! object), so lookups take a `&Heap` alongside the key.

use crate::heap::Heap;
use crate::object::ObjRef;
use crate::value::{Value, values_equal};

const TABLE_MAX_LOAD: f64 = 0.75;

/// FNV-1a over a byte slice.
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &byte in bytes {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

fn hash_value(heap: &Heap, value: Value) -> u32 {
    if value.is_bool() {
        if value.as_bool() { 3 } else { 5 }
    } else if value.is_nil() {
        hash_bytes(&[])
    } else if value.is_number() {
        hash_bytes(&value.as_number().to_bits().to_le_bytes())
    } else if value.is_obj() {
        match heap.string_if(value.as_obj()) {
            Some(s) => s.hash,
            None => 0,
        }
    } else {
        0
    }
}

#[derive(Clone, Copy)]
struct Entry {
    key: Value,
    value: Value,
}

const EMPTY: Entry = Entry {
    key: Value::NIL,
    value: Value::NIL,
};

/// Hash table from `Value` keys to `Value` values.
pub struct Table {
    /// Live entries plus tombstones; bounds the probe length.
    count: usize,
    entries: Vec<Entry>,
}

impl Default for Table {
    fn default() -> Table {
        Table::new()
    }
}

impl Table {
    pub fn new() -> Table {
        Table {
            count: 0,
            entries: Vec::new(),
        }
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of live entries (tombstones excluded).
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.key.is_nil()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0 || self.len() == 0
    }

    fn find_entry(entries: &[Entry], heap: &Heap, key: Value) -> usize {
        let mask = entries.len() - 1;
        let mut index = hash_value(heap, key) as usize & mask;
        let mut tombstone: Option<usize> = None;

        loop {
            let entry = &entries[index];
            if entry.key.is_nil() {
                if entry.value.is_nil() {
                    // Truly empty.
                    return tombstone.unwrap_or(index);
                }
                // Tombstone; keep probing but remember the first one.
                if tombstone.is_none() {
                    tombstone = Some(index);
                }
            } else if values_equal(entry.key, key) {
                return index;
            }
            index = (index + 1) & mask;
        }
    }

    pub fn get(&self, heap: &Heap, key: Value) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let index = Table::find_entry(&self.entries, heap, key);
        let entry = &self.entries[index];
        if entry.key.is_nil() {
            None
        } else {
            Some(entry.value)
        }
    }

    /// Insert or overwrite. Returns true when the key was not present.
    pub fn set(&mut self, heap: &Heap, key: Value, value: Value) -> bool {
        if (self.count + 1) as f64 > self.capacity() as f64 * TABLE_MAX_LOAD {
            let capacity = if self.capacity() < 8 {
                8
            } else {
                self.capacity() * 2
            };
            self.adjust_capacity(heap, capacity);
        }

        let index = Table::find_entry(&self.entries, heap, key);
        let entry = &mut self.entries[index];
        let is_new_key = entry.key.is_nil();
        // Reusing a tombstone does not change the probe-length count.
        if is_new_key && entry.value.is_nil() {
            self.count += 1;
        }
        entry.key = key;
        entry.value = value;
        is_new_key
    }

    /// Remove a key, leaving a tombstone. Returns false if absent.
    pub fn delete(&mut self, heap: &Heap, key: Value) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = Table::find_entry(&self.entries, heap, key);
        let entry = &mut self.entries[index];
        if entry.key.is_nil() {
            return false;
        }
        entry.key = Value::NIL;
        entry.value = Value::TRUE;
        true
    }

    fn adjust_capacity(&mut self, heap: &Heap, capacity: usize) {
        let old = std::mem::replace(&mut self.entries, vec![EMPTY; capacity]);
        self.count = 0;
        for entry in &old {
            if entry.key.is_nil() {
                continue;
            }
            let index = Table::find_entry(&self.entries, heap, entry.key);
            self.entries[index] = *entry;
            self.count += 1;
        }
    }

    /// Copy every live entry of `other` into this table.
    pub fn extend_from(&mut self, heap: &Heap, other: &Table) {
        for i in 0..other.capacity() {
            if let Some((key, value)) = other.entry_at(i) {
                self.set(heap, key, value);
            }
        }
    }

    /// Look up an interned string by content without allocating.
    pub fn find_string(&self, heap: &Heap, chars: &str, hash: u32) -> Option<ObjRef> {
        if self.count == 0 {
            return None;
        }
        let mask = self.capacity() - 1;
        let mut index = hash as usize & mask;
        loop {
            let entry = &self.entries[index];
            if entry.key.is_nil() {
                // Stop at a truly empty slot; skip over tombstones.
                if entry.value.is_nil() {
                    return None;
                }
            } else if entry.key.is_obj() {
                let r = entry.key.as_obj();
                if let Some(s) = heap.string_if(r) {
                    if s.hash == hash && &*s.chars == chars {
                        return Some(r);
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    /// The (key, value) pair at raw slot `i`, skipping empties and
    /// tombstones. Used by GC marking and iteration.
    pub fn entry_at(&self, i: usize) -> Option<(Value, Value)> {
        let entry = self.entries.get(i)?;
        if entry.key.is_nil() {
            None
        } else {
            Some((entry.key, entry.value))
        }
    }

    /// Raw slot count, for use with `entry_at`.
    pub fn slots(&self) -> usize {
        self.capacity()
    }

    /// Iterate live entries.
    pub fn iter(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.entries
            .iter()
            .filter(|e| !e.key.is_nil())
            .map(|e| (e.key, e.value))
    }

    /// Delete every entry whose key is an unmarked heap object. This is the
    /// weak-reference sweep the intern table runs before the object sweep.
    pub(crate) fn remove_unmarked_keys(&mut self, heap: &Heap) {
        for entry in &mut self.entries {
            if entry.key.is_obj() && !heap.is_marked(entry.key.as_obj()) {
                entry.key = Value::NIL;
                entry.value = Value::TRUE;
            }
        }
    }

    /// Estimated payload size in bytes, for allocation accounting.
    pub(crate) fn byte_size(&self) -> usize {
        self.capacity() * std::mem::size_of::<Entry>()
    }
}
