//! Typed access to the document database.
//!
//! `DocumentStore` is the untyped backend seam (field maps keyed by
//! collection and id). `DocumentGateway` sits on top of it and only speaks
//! in record types implementing [`Document`]. Every successful write through
//! the gateway publishes a [`hub::ChangeNotice`] that drives live
//! subscriptions.

pub mod dynamo;
pub mod hub;
#[cfg(any(test, feature = "testing"))]
pub mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::StoreError;
use hub::{ChangeHub, Subscription};

pub type Fields = serde_json::Map<String, Value>;

/// A record type bound to one collection.
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: &'static str;
    /// Partial-update shape; unset fields must be skipped when serialized.
    type Patch: Serialize + Send + Sync;
}

/// A document tagged with its id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record<D> {
    pub id: String,
    #[serde(flatten)]
    pub data: D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the whole document.
    Overwrite,
    /// Upsert, keeping fields not present in the write.
    Merge,
    /// Merge into an existing document; fails if it is absent.
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
}

/// One predicate of a conjunctive query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(field: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// Evaluates the predicate the way the backend does. A missing field
    /// never matches.
    pub fn matches(&self, fields: &Fields) -> bool {
        let Some(actual) = fields.get(&self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => values_equal(actual, &self.value),
            FilterOp::Ne => !values_equal(actual, &self.value),
            FilterOp::Lt => compare(actual, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

pub fn matches_all(filters: &[Filter], fields: &Fields) -> bool {
    filters.iter().all(|f| f.matches(fields))
}

/// Raw backend operations over untyped field maps.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn write(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        mode: WriteMode,
    ) -> Result<(), StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>, StoreError>;

    /// Every document of `collection` matching all `filters`.
    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> Result<Vec<(String, Fields)>, StoreError>;

    /// Deleting an absent document succeeds.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct DocumentGateway {
    store: Arc<dyn DocumentStore>,
    hub: Arc<ChangeHub>,
}

impl DocumentGateway {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            hub: Arc::new(ChangeHub::new()),
        }
    }

    pub fn hub(&self) -> &Arc<ChangeHub> {
        &self.hub
    }

    /// Overwrites the document at `id`, or creates one under a fresh id.
    pub async fn put<D: Document>(&self, data: &D, id: Option<&str>) -> Result<String, StoreError> {
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.write::<D, _>(&id, data, WriteMode::Overwrite).await?;
        Ok(id)
    }

    /// Upserts at `id`, leaving fields absent from `data` untouched.
    pub async fn put_merged<D: Document>(&self, data: &D, id: &str) -> Result<(), StoreError> {
        self.write::<D, _>(id, data, WriteMode::Merge).await
    }

    /// Merge-writes `partial` into an existing document.
    pub async fn patch<D: Document>(&self, id: &str, partial: &D::Patch) -> Result<(), StoreError> {
        self.write::<D, _>(id, partial, WriteMode::Update).await
    }

    pub async fn get_all<D: Document>(&self) -> Result<Vec<Record<D>>, StoreError> {
        self.query(&[]).await
    }

    pub async fn query<D: Document>(&self, filters: &[Filter]) -> Result<Vec<Record<D>>, StoreError> {
        self.store
            .query(D::COLLECTION, filters)
            .await?
            .into_iter()
            .map(|(id, fields)| decode(id, fields))
            .collect()
    }

    pub async fn get_one<D: Document>(&self, id: &str) -> Result<Option<Record<D>>, StoreError> {
        match self.store.get(D::COLLECTION, id).await? {
            Some(fields) => decode(id.to_string(), fields).map(Some),
            None => Ok(None),
        }
    }

    pub async fn remove<D: Document>(&self, id: &str) -> Result<(), StoreError> {
        self.store.delete(D::COLLECTION, id).await?;
        self.hub.notify(D::COLLECTION, id);
        Ok(())
    }

    /// Opens a live feed over `D::COLLECTION`. `on_update` receives the full
    /// matching result set once immediately and again after every change.
    pub fn subscribe<D, F>(&self, filters: Vec<Filter>, on_update: F) -> Subscription
    where
        D: Document,
        F: Fn(Vec<Record<D>>) + Send + Sync + 'static,
    {
        hub::watch_collection(self.clone(), filters, on_update)
    }

    /// Opens a live feed over one document. `None` means absent, whether the
    /// document was deleted or never existed.
    pub fn subscribe_one<D, F>(&self, id: &str, on_update: F) -> Subscription
    where
        D: Document,
        F: Fn(Option<Record<D>>) + Send + Sync + 'static,
    {
        hub::watch_document(self.clone(), id.to_string(), on_update)
    }

    async fn write<D: Document, T: Serialize>(
        &self,
        id: &str,
        data: &T,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        let fields = match serde_json::to_value(data) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(StoreError::write(D::COLLECTION, "document must be a map of fields")),
            Err(e) => return Err(StoreError::write(D::COLLECTION, e)),
        };
        self.store.write(D::COLLECTION, id, fields, mode).await?;
        self.hub.notify(D::COLLECTION, id);
        Ok(())
    }
}

fn decode<D: Document>(id: String, fields: Fields) -> Result<Record<D>, StoreError> {
    match serde_json::from_value(Value::Object(fields)) {
        Ok(data) => Ok(Record { id, data }),
        Err(source) => Err(StoreError::Decode {
            collection: D::COLLECTION.to_string(),
            id,
            source,
        }),
    }
}
