//! In-memory store variant. No persistence; state dies with the process.

use std::collections::HashMap;
use std::hash::Hash;

use crate::{Store, StoreError};

/// A [`Store`] backed by a plain `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryStore<K, V> {
    records: HashMap<K, V>,
}

impl<K: Eq + Hash, V> MemoryStore<K, V> {
    pub fn new() -> Self {
        MemoryStore {
            records: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V: Clone> Store<K, V> for MemoryStore<K, V> {
    fn list(&self) -> Result<Vec<V>, StoreError> {
        Ok(self.records.values().cloned().collect())
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.records.len())
    }

    fn get(&self, key: &K) -> Result<V, StoreError> {
        self.records.get(key).cloned().ok_or(StoreError::NotFound)
    }

    fn put(&mut self, key: K, value: V) -> Result<(), StoreError> {
        self.records.insert(key, value);
        Ok(())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_roundtrip() {
        let mut store: MemoryStore<String, u32> = MemoryStore::new();
        store.put("a".into(), 1).unwrap();
        assert_eq!(store.get(&"a".to_string()).unwrap(), 1);

        // Put replaces.
        store.put("a".into(), 2).unwrap();
        assert_eq!(store.get(&"a".to_string()).unwrap(), 2);
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let store: MemoryStore<String, u32> = MemoryStore::new();
        assert!(matches!(
            store.get(&"nope".to_string()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_list_returns_exactly_the_stored_values() {
        let mut store: MemoryStore<String, u32> = MemoryStore::new();
        store.put("a".into(), 1).unwrap();
        store.put("b".into(), 2).unwrap();
        store.put("c".into(), 3).unwrap();

        let mut values = store.list().unwrap();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2, 3]);
        assert_eq!(store.count().unwrap(), 3);
    }
}
