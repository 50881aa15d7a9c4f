use crate::{check_key, Record, RecordStore, Result, Upsert};
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::Arc;

/// An in-memory record store
///
/// Records live in a sharded map, so writers to different keys rarely share a
/// lock. Nothing survives a restart.
#[derive(Clone, Default)]
pub struct MemStore {
    map: Arc<DashMap<String, String>>,
}

impl MemStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemStore {
    fn get(&self, key: &str) -> Result<Option<Record>> {
        Ok(self
            .map
            .get(key)
            .map(|entry| Record::new(entry.key().as_str(), entry.value().as_str())))
    }

    fn list(&self) -> Result<Vec<Record>> {
        let mut records: Vec<Record> = self
            .map
            .iter()
            .map(|entry| Record::new(entry.key().as_str(), entry.value().as_str()))
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    fn upsert(&self, key: String, value: String) -> Result<(Record, Upsert)> {
        check_key(&key)?;

        // the entry holds the shard lock, so check-and-write is one step
        let outcome = match self.map.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                entry.insert(value.clone());
                Upsert::Updated
            }
            Entry::Vacant(entry) => {
                entry.insert(value.clone());
                Upsert::Created
            }
        };

        Ok((Record { key, value }, outcome))
    }
}
