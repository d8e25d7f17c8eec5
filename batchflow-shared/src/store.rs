//! Generic document store traits for pluggable storage backends.
//!
//! Builders only depend on this contract: keyed queries, distinct values, counting, an index hint and
//! batched upserts. The trait uses `async_trait` to stay object safe, so builders hold their stores as
//! `Arc<dyn Store>`.

use std::error::Error as StdError;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::record::{Record, lookup_path};

/// Error type for store operations (boxed for object safety)
pub type StoreError = Box<dyn StdError + Send + Sync + 'static>;

/// Type alias for a lazily evaluated query result.
pub type RecordStream = Pin<Box<dyn Stream<Item = std::result::Result<Record, StoreError>> + Send>>;

/// Criteria is the minimal query contract between the builders and the stores.
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    /// Matches every record.
    All,
    /// Matches records whose field (dotted path) equals the value.
    Eq { field: String, value: Value },
    /// Matches records whose field (dotted path) equals any of the values.
    In { field: String, values: Vec<Value> },
}

impl Criteria {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Criteria::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Builds an `In` criteria, an empty value set is rejected since it can never match.
    pub fn any_of(field: impl Into<String>, values: Vec<Value>) -> Result<Self> {
        let field = field.into();
        if values.is_empty() {
            return Err(Error::Criteria(format!(
                "empty value set for field {field}"
            )));
        }
        Ok(Criteria::In { field, values })
    }

    /// Evaluates the criteria against a record.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Criteria::All => true,
            Criteria::Eq { field, value } => lookup_path(record, field) == Some(value),
            Criteria::In { field, values } => {
                lookup_path(record, field).is_some_and(|found| values.contains(found))
            }
        }
    }
}

/// Store defines the document store interface used as source and target of a builder.
#[async_trait]
pub trait Store: Send + Sync {
    /// Name of the store, typically the collection name.
    fn name(&self) -> &str;

    /// The field that uniquely identifies a document in this store.
    fn key(&self) -> &str;

    /// The field that holds the last modification time of a document.
    fn last_updated_field(&self) -> &str;

    /// Connects to the backend. Calling it on a connected store is a no-op.
    async fn connect(&self) -> std::result::Result<(), StoreError>;

    /// Queries the documents matching the criteria. When `properties` is set only the referenced
    /// top-level fields are returned.
    async fn query(
        &self,
        criteria: Criteria,
        properties: Option<Vec<String>>,
    ) -> std::result::Result<RecordStream, StoreError>;

    /// Returns the distinct values of a field, in first-seen order. Documents holding an explicit null
    /// contribute `Value::Null`, documents without the field are skipped.
    async fn distinct(&self, field: &str) -> std::result::Result<Vec<Value>, StoreError>;

    /// Counts the documents matching the criteria.
    async fn count(&self, criteria: Criteria) -> std::result::Result<u64, StoreError>;

    /// Ensures an index exists on the field. Returns false if the index could not be created.
    async fn ensure_index(&self, field: &str) -> std::result::Result<bool, StoreError>;

    /// Upserts the documents: each one replaces the stored document with the same [Store::key], or is
    /// inserted.
    async fn update(&self, docs: Vec<Record>) -> std::result::Result<(), StoreError>;
}
