use std::rc::Rc;

use super::value::QString;

const INITIAL_CAPACITY: usize = 8;
const MAX_LOAD_FACTOR: f64 = 0.75;

struct Entry<V> {
    key: Option<Rc<QString>>,
    /// `None` with `key: None` is a never-used slot; `Some` with `key: None`
    /// is a tombstone a probe must still walk past.
    value: Option<V>,
}

impl<V> Entry<V> {
    fn empty() -> Self {
        Self {
            key: None,
            value: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.key.is_none() && self.value.is_none()
    }

    fn is_tombstone(&self) -> bool {
        self.key.is_none() && self.value.is_some()
    }
}

/// Open-addressed hash table keyed by interned strings, linear-probed with
/// tombstone deletion. Grounded on the classic clox `Table`: same FNV-1a
/// hash, same 0.75 load factor, same "remember the first tombstone" probe.
pub struct HashTable<V> {
    entries: Vec<Entry<V>>,
    count: usize,
}

impl<V: Clone> Default for HashTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> HashTable<V> {
    pub fn new() -> Self {
        Self {
            entries: (0..INITIAL_CAPACITY).map(|_| Entry::empty()).collect(),
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

    /// Finds the slot `key` belongs in: an occupied slot with a matching key,
    /// or the first empty/tombstone slot encountered along the probe
    /// sequence (reusing the earliest tombstone so deletes don't leak
    /// capacity).
    fn find_slot(entries: &[Entry<V>], key: &str, hash: u32) -> usize {
        let capacity = entries.len();
        let mut index = hash as usize % capacity;
        let mut tombstone: Option<usize> = None;
        loop {
            let entry = &entries[index];
            match &entry.key {
                Some(existing) if existing.as_str() == key => return index,
                None if entry.is_tombstone() => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                None => return tombstone.unwrap_or(index),
                Some(_) => {}
            }
            index = (index + 1) % capacity;
        }
    }

    fn grow(&mut self, capacity: usize) {
        let mut new_entries: Vec<Entry<V>> = (0..capacity).map(|_| Entry::empty()).collect();
        for entry in self.entries.drain(..) {
            if let (Some(key), Some(value)) = (entry.key, entry.value) {
                let index = Self::find_slot(&new_entries, key.as_str(), key.hash());
                new_entries[index] = Entry {
                    key: Some(key),
                    value: Some(value),
                };
            }
        }
        self.entries = new_entries;
    }

    pub fn get(&self, key: &str, hash: u32) -> Option<&V> {
        if self.count == 0 {
            return None;
        }
        let index = Self::find_slot(&self.entries, key, hash);
        self.entries[index].value.as_ref()
    }

    pub fn contains(&self, key: &str, hash: u32) -> bool {
        self.get(key, hash).is_some()
    }

    /// Inserts or overwrites. Returns `true` iff `key` was newly added.
    pub fn insert(&mut self, key: Rc<QString>, value: V) -> bool {
        if (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD_FACTOR {
            self.grow(self.capacity() * 2);
        }
        let index = Self::find_slot(&self.entries, key.as_str(), key.hash());
        let is_new = self.entries[index].is_empty();
        if is_new {
            self.count += 1;
        }
        self.entries[index] = Entry {
            key: Some(key),
            value: Some(value),
        };
        is_new
    }

    /// Writes a tombstone over the entry for `key`. Returns `true` iff a live
    /// entry was removed.
    pub fn delete(&mut self, key: &str, hash: u32) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = Self::find_slot(&self.entries, key, hash);
        if self.entries[index].key.is_none() {
            return false;
        }
        self.entries[index] = Entry {
            key: None,
            value: Some(self.entries[index].value.take().unwrap()),
        };
        self.count -= 1;
        true
    }

    pub fn get_mut(&mut self, key: &str, hash: u32) -> Option<&mut V> {
        if self.count == 0 {
            return None;
        }
        let index = Self::find_slot(&self.entries, key, hash);
        self.entries[index].value.as_mut()
    }
}

/// Deduplicates `QString`s by byte content so that equal string constants
/// across (and within) chunks share one allocation. An optimization over the
/// byte-equality contract `HashTable` already provides, not a requirement of
/// it (see the design notes on string interning).
#[derive(Default)]
pub struct Interner {
    table: HashTable<Rc<QString>>,
}

impl Interner {
    pub fn new() -> Self {
        Self {
            table: HashTable::new(),
        }
    }

    pub fn intern(&mut self, s: &str) -> Rc<QString> {
        let hash = super::value::fnv1a(s.as_bytes());
        if let Some(existing) = self.table.get(s, hash) {
            return Rc::clone(existing);
        }
        let rc = Rc::new(QString::new(s));
        self.table.insert(Rc::clone(&rc), Rc::clone(&rc));
        rc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_reports_new_vs_overwrite() {
        let mut table: HashTable<i32> = HashTable::new();
        let key = Rc::new(QString::new("x"));
        assert!(table.insert(Rc::clone(&key), 1));
        assert!(!table.insert(Rc::clone(&key), 2));
        assert_eq!(table.get("x", key.hash()), Some(&2));
    }

    #[test]
    fn delete_then_reinsert_reuses_tombstone() {
        let mut table: HashTable<i32> = HashTable::new();
        let key = Rc::new(QString::new("x"));
        table.insert(Rc::clone(&key), 1);
        assert!(table.delete("x", key.hash()));
        assert_eq!(table.get("x", key.hash()), None);
        assert!(table.insert(Rc::clone(&key), 2));
        assert_eq!(table.get("x", key.hash()), Some(&2));
    }

    #[test]
    fn grows_past_load_factor() {
        let mut table: HashTable<usize> = HashTable::new();
        let keys: Vec<_> = (0..100)
            .map(|i| Rc::new(QString::new(format!("key{i}"))))
            .collect();
        for (i, key) in keys.iter().enumerate() {
            table.insert(Rc::clone(key), i);
        }
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(table.get(key.as_str(), key.hash()), Some(&i));
        }
    }

    #[test]
    fn interner_shares_allocations() {
        let mut interner = Interner::new();
        let a = interner.intern("hello");
        let b = interner.intern("hello");
        assert!(Rc::ptr_eq(&a, &b));
    }
}
