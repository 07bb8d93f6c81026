// Open-addressing hash table shared by the globals environment and the
// string-interning pool (spec 4.2). Linear probing, tombstones on delete,
// load factor capped at 0.75 against raw capacity (tombstones count toward
// load — a known, intentional limitation carried over from the spec rather
// than "fixed", since replacing it would shift rehash points the tests
// don't expect).

use std::rc::Rc;

use crate::common::value::ObjString;
use crate::common::value::Value;

const MAX_LOAD: f64 = 0.75;

#[derive(Clone)]
struct Entry {
    key: Option<Rc<ObjString>>,
    value: Value,
}

impl Entry {
    fn empty() -> Entry {
        Entry { key: None, value: Value::Nil }
    }

    fn is_truly_empty(&self) -> bool {
        self.key.is_none() && matches!(self.value, Value::Nil)
    }

    fn is_tombstone(&self) -> bool {
        self.key.is_none() && matches!(self.value, Value::Bool(true))
    }
}

pub struct Table {
    entries: Vec<Entry>,
    count: usize,
}

impl Table {
    pub fn new() -> Table {
        Table { entries: Vec::new(), count: 0 }
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn grow_capacity(cap: usize) -> usize {
        if cap < 8 { 8 } else { cap * 2 }
    }

    /// Probe from `hash mod cap`, returning the index of the matching
    /// occupied entry, the first tombstone seen (if the key isn't found),
    /// or the first truly-empty slot.
    fn find_entry(entries: &[Entry], key: &Rc<ObjString>) -> usize {
        let cap = entries.len();
        let mut index = (key.hash as usize) % cap;
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            match &entry.key {
                Some(k) if Rc::ptr_eq(k, key) => return index,
                None => {
                    if entry.is_tombstone() {
                        if tombstone.is_none() {
                            tombstone = Some(index);
                        }
                    } else {
                        return tombstone.unwrap_or(index);
                    }
                }
                Some(_) => {}
            }
            index = (index + 1) % cap;
        }
    }

    fn grow(&mut self, new_capacity: usize) {
        let mut new_entries = vec![Entry::empty(); new_capacity];
        let mut count = 0;
        for entry in self.entries.drain(..) {
            if let Some(key) = entry.key {
                let idx = Self::find_entry(&new_entries, &key);
                new_entries[idx] = Entry { key: Some(key), value: entry.value };
                count += 1;
            }
        }
        self.entries = new_entries;
        self.count = count;
    }

    /// Inserts or overwrites `key`. Returns `true` if `key` was not already
    /// present.
    pub fn set(&mut self, key: Rc<ObjString>, value: Value) -> bool {
        if (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD {
            let new_cap = Self::grow_capacity(self.capacity());
            self.grow(new_cap);
        }

        let idx = Self::find_entry(&self.entries, &key);
        let is_new_key = self.entries[idx].key.is_none();
        if is_new_key && self.entries[idx].is_truly_empty() {
            self.count += 1;
        }
        self.entries[idx] = Entry { key: Some(key), value };
        is_new_key
    }

    pub fn get(&self, key: &Rc<ObjString>) -> Option<&Value> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = Self::find_entry(&self.entries, key);
        self.entries[idx].key.as_ref().map(|_| &self.entries[idx].value)
    }

    /// Converts the entry to a tombstone. Does not decrement `count`:
    /// tombstones must keep counting against load so probe chains stay
    /// bounded.
    pub fn delete(&mut self, key: &Rc<ObjString>) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let idx = Self::find_entry(&self.entries, key);
        if self.entries[idx].key.is_none() {
            return false;
        }
        self.entries[idx] = Entry { key: None, value: Value::Bool(true) };
        true
    }

    /// Content-based probe used only by the interner to locate an existing
    /// interned string without first holding a handle to compare against.
    pub fn find_string(&self, chars: &str, hash: u32) -> Option<Rc<ObjString>> {
        if self.entries.is_empty() {
            return None;
        }
        let cap = self.capacity();
        let mut index = (hash as usize) % cap;
        loop {
            let entry = &self.entries[index];
            match &entry.key {
                None if entry.is_truly_empty() => return None,
                Some(k) if k.hash == hash && k.chars == chars => return Some(k.clone()),
                _ => {}
            }
            index = (index + 1) % cap;
        }
    }
}

impl Default for Table {
    fn default() -> Table {
        Table::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::value::fnv1a_hash;

    fn key(chars: &str) -> Rc<ObjString> {
        Rc::new(ObjString { chars: chars.to_string(), hash: fnv1a_hash(chars.as_bytes()) })
    }

    #[test]
    fn set_then_get_roundtrips() {
        let mut table = Table::new();
        let k = key("answer");
        assert!(table.set(k.clone(), Value::Number(42.0)));
        assert_eq!(table.get(&k), Some(&Value::Number(42.0)));
    }

    #[test]
    fn set_existing_key_returns_false_and_overwrites() {
        let mut table = Table::new();
        let k = key("x");
        assert!(table.set(k.clone(), Value::Number(1.0)));
        assert!(!table.set(k.clone(), Value::Number(2.0)));
        assert_eq!(table.get(&k), Some(&Value::Number(2.0)));
    }

    #[test]
    fn deleted_key_is_a_miss_but_does_not_break_later_probes() {
        let mut table = Table::new();
        let a = key("a");
        let b = key("b");
        table.set(a.clone(), Value::Number(1.0));
        table.set(b.clone(), Value::Number(2.0));
        assert!(table.delete(&a));
        assert_eq!(table.get(&a), None);
        assert_eq!(table.get(&b), Some(&Value::Number(2.0)));
    }

    #[test]
    fn find_string_locates_by_content_without_a_handle() {
        let mut table = Table::new();
        let k = key("shared");
        table.set(k, Value::Nil);
        let hash = fnv1a_hash("shared".as_bytes());
        assert!(table.find_string("shared", hash).is_some());
        assert!(table.find_string("different", fnv1a_hash(b"different")).is_none());
    }

    #[test]
    fn grows_past_many_insertions_without_losing_entries() {
        let mut table = Table::new();
        let keys: Vec<_> = (0..200).map(|i| key(&format!("key{i}"))).collect();
        for (i, k) in keys.iter().enumerate() {
            table.set(k.clone(), Value::Number(i as f64));
        }
        for (i, k) in keys.iter().enumerate() {
            assert_eq!(table.get(k), Some(&Value::Number(i as f64)));
        }
    }
}
