//! Open-addressed hash table keyed by interned strings, used both for
//! globals/class-method tables and as the backing store for `Dict`
//! values. Linear probing, tombstones, power-of-two capacity, grown
//! whenever the load factor would exceed 0.75.

use crate::common::object::{Obj, ObjKind};
use crate::common::value::{values_equal, Value};

const MAX_LOAD: f64 = 0.75;

struct Entry {
    key: Option<*mut Obj>,
    value: Value,
}

pub struct Table {
    entries: Vec<Entry>,
    count: usize,
}

impl Default for Table {
    fn default() -> Table {
        Table::new()
    }
}

fn key_hash(key: *mut Obj) -> u32 {
    // SAFETY: every key stored in a Table is an interned ObjString kept
    // alive for the Table's lifetime.
    match unsafe { &(*key).kind } {
        ObjKind::String(s) => s.hash,
        _ => unreachable!("Table keys are always interned strings"),
    }
}

impl Table {
    pub fn new() -> Table {
        Table {
            entries: Vec::new(),
            count: 0,
        }
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

    fn find_slot(entries: &[Entry], capacity: usize, key: *mut Obj) -> usize {
        let mask = (capacity - 1) as u32;
        let mut index = key_hash(key) & mask;
        let mut first_tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index as usize];
            match entry.key {
                None => {
                    if entry.value.is_nil() {
                        // genuinely empty
                        return first_tombstone.unwrap_or(index as usize);
                    } else if first_tombstone.is_none() {
                        first_tombstone = Some(index as usize);
                    }
                }
                Some(k) if k == key => return index as usize,
                Some(_) => {}
            }
            index = (index + 1) & mask;
        }
    }

    fn grow(&mut self, new_capacity: usize) {
        let mut new_entries: Vec<Entry> = (0..new_capacity)
            .map(|_| Entry {
                key: None,
                value: Value::nil(),
            })
            .collect();
        let mut new_count = 0;
        for entry in self.entries.drain(..) {
            if let Some(key) = entry.key {
                let slot = Table::find_slot(&new_entries, new_capacity, key);
                new_entries[slot] = Entry {
                    key: Some(key),
                    value: entry.value,
                };
                new_count += 1;
            }
        }
        self.entries = new_entries;
        self.count = new_count;
    }

    /// Returns `true` if `key` was newly inserted (not previously present).
    pub fn set(&mut self, key: *mut Obj, value: Value) -> bool {
        if (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD {
            let new_capacity = if self.capacity() < 8 {
                8
            } else {
                self.capacity() * 2
            };
            self.grow(new_capacity);
        }
        let slot = Table::find_slot(&self.entries, self.capacity(), key);
        let entry = &mut self.entries[slot];
        let is_new_key = entry.key.is_none();
        if is_new_key && entry.value.is_nil() {
            self.count += 1;
        }
        entry.key = Some(key);
        entry.value = value;
        is_new_key
    }

    pub fn get(&self, key: *mut Obj) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let slot = Table::find_slot(&self.entries, self.capacity(), key);
        let entry = &self.entries[slot];
        entry.key.map(|_| entry.value)
    }

    /// Deletes `key`, leaving a tombstone (`key = None, value = true`)
    /// so later probes for colliding keys don't terminate early.
    pub fn delete(&mut self, key: *mut Obj) -> bool {
        if self.count == 0 {
            return false;
        }
        let slot = Table::find_slot(&self.entries, self.capacity(), key);
        let entry = &mut self.entries[slot];
        if entry.key.is_none() {
            return false;
        }
        entry.key = None;
        entry.value = Value::bool(true);
        true
    }

    /// Interning lookup: find an already-interned string with these
    /// exact bytes and hash, without needing a heap-allocated key first.
    pub fn find_string(&self, chars: &str, hash: u32) -> Option<*mut Obj> {
        if self.count == 0 {
            return None;
        }
        let mask = (self.capacity() - 1) as u32;
        let mut index = hash & mask;
        loop {
            let entry = &self.entries[index as usize];
            match entry.key {
                None if entry.value.is_nil() => return None,
                Some(k) => {
                    // SAFETY: k is an interned, alive ObjString.
                    let matches = match unsafe { &(*k).kind } {
                        ObjKind::String(s) => s.hash == hash && s.chars == chars,
                        _ => unreachable!("Table keys are always interned strings"),
                    };
                    if matches {
                        return Some(k);
                    }
                }
                _ => {}
            }
            index = (index + 1) & mask;
        }
    }

    /// Shallow copy of every entry from `from` into `self`, used by
    /// `OP_INHERIT` to flatten a superclass's method table into the
    /// subclass's own.
    pub fn add_all(&mut self, from: &Table) {
        for entry in &from.entries {
            if let Some(key) = entry.key {
                self.set(key, entry.value);
            }
        }
    }

    /// Tombstones every key the predicate rejects. Used by the GC to
    /// drop interned strings with no other surviving reference: the
    /// intern table holds weak references, so white (unmarked) strings
    /// must be unlinked before the sweep frees their backing objects.
    pub fn retain(&mut self, mut keep: impl FnMut(*mut Obj) -> bool) {
        for entry in &mut self.entries {
            if let Some(key) = entry.key {
                if !keep(key) {
                    entry.key = None;
                    entry.value = Value::bool(true);
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (*mut Obj, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.key.map(|k| (k, e.value)))
    }

    /// Element-wise comparison for `Dict` equality: same key set, equal
    /// values under `values_equal`.
    pub fn structurally_equal(&self, other: &Table) -> bool {
        if self.count != other.count {
            return false;
        }
        self.iter().all(|(key, value)| match other.get(key) {
            Some(other_value) => values_equal(value, other_value),
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::vm::heap::Heap;

    #[test]
    fn get_returns_none_for_a_missing_key() {
        let mut heap = Heap::new(false);
        let table = Table::new();
        let key = heap.copy_string("missing");
        assert_eq!(table.get(key), None);
    }

    #[test]
    fn set_reports_whether_the_key_is_new() {
        let mut heap = Heap::new(false);
        let mut table = Table::new();
        let key = heap.copy_string("x");
        assert!(table.set(key, Value::number(1.0)));
        assert!(!table.set(key, Value::number(2.0)));
        assert_eq!(table.get(key).unwrap().as_number(), 2.0);
    }

    #[test]
    fn delete_leaves_a_tombstone_that_does_not_break_later_probes() {
        let mut heap = Heap::new(false);
        let mut table = Table::new();
        let a = heap.copy_string("a");
        let b = heap.copy_string("b");
        table.set(a, Value::number(1.0));
        table.set(b, Value::number(2.0));
        assert!(table.delete(a));
        // b must still be reachable even though probing may have walked
        // through a's now-tombstoned slot.
        assert_eq!(table.get(b).unwrap().as_number(), 2.0);
        assert_eq!(table.get(a), None);
    }

    #[test]
    fn grows_past_the_load_factor() {
        let mut heap = Heap::new(false);
        let mut table = Table::new();
        let mut keys = Vec::new();
        for i in 0..100 {
            let key = heap.copy_string(&format!("k{i}"));
            keys.push(key);
            table.set(key, Value::number(i as f64));
        }
        assert_eq!(table.len(), 100);
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(table.get(*key).unwrap().as_number(), i as f64);
        }
    }
}
