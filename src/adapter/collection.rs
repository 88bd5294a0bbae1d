//! In-memory collection engine
//!
//! Shared by the memory and file adapters. Records keep the sequence
//! number of their first insert, which defines the native order.
//! Unique indexes map the canonical JSON of a value to the owning id
//! (numbers by value, so `4` and `4.0` collide); missing and null
//! values are not indexed.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use super::errors::{AdapterError, AdapterResult};
use super::QueryWindow;
use crate::filter::{canonical, Filter};
use crate::record::Record;

struct Entry {
    seq: u64,
    record: Record,
}

/// Records of one collection plus their unique indexes
#[derive(Default)]
pub(crate) struct Collection {
    entries: HashMap<String, Entry>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
    indexes: BTreeMap<String, HashMap<String, String>>,
}

fn index_key(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(v) => Some(canonical(v).to_string()),
    }
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.entries.get(id).map(|e| &e.record)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Fails if `record` collides with another record on an indexed field
    pub fn check_unique(&self, record: &Record) -> AdapterResult<()> {
        for (field, index) in &self.indexes {
            if let Some(key) = index_key(record.get(field)) {
                match index.get(&key) {
                    Some(owner) if owner != &record.id => {
                        return Err(AdapterError::unique(field, key));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Inserts or replaces a record after checking unique indexes
    pub fn put(&mut self, record: Record) -> AdapterResult<()> {
        self.check_unique(&record)?;
        self.write(record);
        Ok(())
    }

    /// Inserts or replaces a record without checks (log replay)
    pub fn write(&mut self, record: Record) {
        let seq = match self.entries.get(&record.id) {
            Some(existing) => {
                let seq = existing.seq;
                let old = existing.record.clone();
                self.unindex(&old);
                seq
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.order.insert(seq, record.id.clone());
                seq
            }
        };
        self.index(&record);
        self.entries.insert(record.id.clone(), Entry { seq, record });
    }

    pub fn remove(&mut self, id: &str) -> Option<Record> {
        let entry = self.entries.remove(id)?;
        self.order.remove(&entry.seq);
        self.unindex(&entry.record);
        Some(entry.record)
    }

    /// Drops every record; indexes stay declared
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        for index in self.indexes.values_mut() {
            index.clear();
        }
    }

    fn index(&mut self, record: &Record) {
        for (field, index) in self.indexes.iter_mut() {
            if let Some(key) = index_key(record.get(field)) {
                index.insert(key, record.id.clone());
            }
        }
    }

    fn unindex(&mut self, record: &Record) {
        for (field, index) in self.indexes.iter_mut() {
            if let Some(key) = index_key(record.get(field)) {
                if index.get(&key) == Some(&record.id) {
                    index.remove(&key);
                }
            }
        }
    }

    /// Builds a unique index over `field`, failing on existing collisions
    pub fn ensure_unique(&mut self, field: &str) -> AdapterResult<()> {
        if self.indexes.contains_key(field) {
            return Ok(());
        }

        let mut index = HashMap::new();
        for record in self.records() {
            if let Some(key) = index_key(record.get(field)) {
                if index.insert(key.clone(), record.id.clone()).is_some() {
                    return Err(AdapterError::unique(field, key));
                }
            }
        }

        self.indexes.insert(field.to_string(), index);
        Ok(())
    }

    /// Records in native order
    pub fn records(&self) -> impl Iterator<Item = &Record> + '_ {
        self.order
            .values()
            .filter_map(move |id| self.entries.get(id).map(|e| &e.record))
    }

    fn matching<'a>(&'a self, filter: &'a Filter) -> Box<dyn Iterator<Item = &'a Record> + 'a> {
        // `_id` lookups skip the scan
        if let Some(id) = filter.id() {
            return Box::new(self.get(id).into_iter().filter(move |r| filter.matches(r)));
        }
        Box::new(self.records().filter(move |r| filter.matches(r)))
    }

    pub fn query(&self, filter: &Filter, window: QueryWindow) -> Vec<Record> {
        let skipped = self.matching(filter).skip(window.skip as usize);
        match window.limit {
            Some(limit) => skipped.take(limit as usize).cloned().collect(),
            None => skipped.cloned().collect(),
        }
    }

    pub fn count(&self, filter: &Filter) -> u64 {
        self.matching(filter).count() as u64
    }

    pub fn matching_ids(&self, filter: &Filter) -> Vec<String> {
        self.matching(filter).map(|r| r.id.clone()).collect()
    }

    /// First matching record whose sequence number is past `after`
    pub fn next_after(&self, filter: &Filter, after: Option<u64>) -> Option<(u64, Record)> {
        let start = after.map_or(0, |seq| seq + 1);
        self.order
            .range(start..)
            .filter_map(|(seq, id)| self.entries.get(id).map(|e| (*seq, &e.record)))
            .find(|(_, record)| filter.matches(record))
            .map(|(seq, record)| (seq, record.clone()))
    }
}
