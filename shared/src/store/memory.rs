use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};

use super::{matches_all, DocumentStore, Fields, Filter, WriteMode};
use crate::error::StoreError;

/// Process-local store with the same semantics as the DynamoDB one.
/// Documents iterate in id order.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Fields>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn write(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_string()).or_default();

        match (mode, docs.entry(id.to_string())) {
            (WriteMode::Overwrite, Entry::Occupied(mut doc)) => {
                doc.insert(fields);
            }
            (WriteMode::Overwrite | WriteMode::Merge, Entry::Vacant(slot)) => {
                slot.insert(fields);
            }
            (WriteMode::Merge | WriteMode::Update, Entry::Occupied(mut doc)) => {
                doc.get_mut().extend(fields);
            }
            (WriteMode::Update, Entry::Vacant(_)) => {
                return Err(StoreError::MissingDocument {
                    collection: collection.to_string(),
                    id: id.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>, StoreError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> Result<Vec<(String, Fields)>, StoreError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, fields)| matches_all(filters, fields))
                    .map(|(id, fields)| (id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        if let Some(docs) = self.collections.write().get_mut(collection) {
            docs.remove(id);
        }
        Ok(())
    }
}
