//! Core store state and implementation.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use batchflow_shared::record::{KeyValue, Record, Value, retain_paths};
use batchflow_shared::store::{Criteria, RecordStream, Store, StoreError};
use parking_lot::RwLock;

use super::error::SimpleStoreError;
use super::error_injector::StoreErrorInjector;

const DEFAULT_LAST_UPDATED_FIELD: &str = "last_updated";

/// Internal state of the store.
#[derive(Debug, Default)]
struct StoreState {
    /// Documents in insertion order.
    docs: Vec<Record>,
    /// Fields an index was requested for.
    indexes: HashSet<String>,
    /// Every batch passed to update, in call order.
    update_batches: Vec<Vec<Record>>,
}

/// Simple in-memory document store for testing.
///
/// This provides a store that implements the `Store` trait and allows for error injection to test
/// negative cases. Clones share the same state.
#[derive(Clone)]
pub struct SimpleStore {
    /// Shared store state.
    state: Arc<RwLock<StoreState>>,
    /// Store name.
    name: String,
    /// Key field.
    key: String,
    /// Last updated field.
    last_updated_field: String,
    /// Error injector for testing.
    error_injector: Arc<StoreErrorInjector>,
    /// Number of successful connect calls.
    connects: Arc<AtomicUsize>,
}

impl std::fmt::Debug for SimpleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleStore")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("state", &self.state)
            .finish()
    }
}

impl SimpleStore {
    /// Create a new store keyed by `key`.
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self::with_last_updated_field(name, key, DEFAULT_LAST_UPDATED_FIELD)
    }

    /// Create a new store with a custom last updated field.
    pub fn with_last_updated_field(
        name: impl Into<String>,
        key: impl Into<String>,
        last_updated_field: impl Into<String>,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            name: name.into(),
            key: key.into(),
            last_updated_field: last_updated_field.into(),
            error_injector: Arc::new(StoreErrorInjector::new()),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get the error injector for this store.
    ///
    /// Use this to inject errors for testing.
    pub fn error_injector(&self) -> &Arc<StoreErrorInjector> {
        &self.error_injector
    }

    /// Insert a document directly, bypassing the upsert path. Non-object values are ignored.
    pub fn insert(&self, doc: Value) {
        if let Value::Object(doc) = doc {
            self.state.write().docs.push(doc);
        }
    }

    /// Get all documents as a snapshot (for testing).
    pub fn snapshot(&self) -> Vec<Record> {
        self.state.read().docs.clone()
    }

    /// Get the document with the given key value.
    pub fn get(&self, key: &KeyValue) -> Option<Record> {
        self.state
            .read()
            .docs
            .iter()
            .find(|doc| doc.get(&self.key) == Some(key.as_value()))
            .cloned()
    }

    /// Every batch passed to update, in call order.
    pub fn update_batches(&self) -> Vec<Vec<Record>> {
        self.state.read().update_batches.clone()
    }

    /// Fields that have been indexed.
    pub fn indexes(&self) -> HashSet<String> {
        self.state.read().indexes.clone()
    }

    /// Number of successful connect calls.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::Relaxed)
    }

    /// Get the number of documents in the store.
    pub fn len(&self) -> usize {
        self.state.read().docs.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.state.read().docs.is_empty()
    }
}

#[async_trait]
impl Store for SimpleStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn last_updated_field(&self) -> &str {
        &self.last_updated_field
    }

    async fn connect(&self) -> Result<(), StoreError> {
        if self.error_injector.should_fail_connect() {
            return Err(Box::new(SimpleStoreError::Connect(
                "injected failure".to_string(),
            )));
        }
        self.connects.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn query(
        &self,
        criteria: Criteria,
        properties: Option<Vec<String>>,
    ) -> Result<RecordStream, StoreError> {
        self.error_injector.apply_query_latency().await;

        if self.error_injector.should_fail_query() {
            return Err(Box::new(SimpleStoreError::Query(
                "injected failure".to_string(),
            )));
        }

        let matched: Vec<Result<Record, StoreError>> = self
            .state
            .read()
            .docs
            .iter()
            .filter(|doc| criteria.matches(doc))
            .map(|doc| match &properties {
                Some(paths) => Ok(retain_paths(doc, paths)),
                None => Ok(doc.clone()),
            })
            .collect();

        Ok(Box::pin(futures::stream::iter(matched)))
    }

    async fn distinct(&self, field: &str) -> Result<Vec<Value>, StoreError> {
        if self.error_injector.should_fail_distinct() {
            return Err(Box::new(SimpleStoreError::Distinct(
                "injected failure".to_string(),
            )));
        }

        let mut values: Vec<Value> = Vec::new();
        for doc in self.state.read().docs.iter() {
            if let Some(value) = doc.get(field)
                && !values.contains(value)
            {
                values.push(value.clone());
            }
        }
        Ok(values)
    }

    async fn count(&self, criteria: Criteria) -> Result<u64, StoreError> {
        if self.error_injector.should_fail_count() {
            return Err(Box::new(SimpleStoreError::Count(
                "injected failure".to_string(),
            )));
        }

        let count = self
            .state
            .read()
            .docs
            .iter()
            .filter(|doc| criteria.matches(doc))
            .count();
        Ok(count as u64)
    }

    async fn ensure_index(&self, field: &str) -> Result<bool, StoreError> {
        if self.error_injector.should_refuse_index() {
            return Ok(false);
        }
        self.state.write().indexes.insert(field.to_string());
        Ok(true)
    }

    async fn update(&self, docs: Vec<Record>) -> Result<(), StoreError> {
        self.error_injector.apply_update_latency().await;

        if self.error_injector.should_fail_update() {
            return Err(Box::new(SimpleStoreError::Update(
                "injected failure".to_string(),
            )));
        }

        if docs.iter().any(|doc| doc.get(&self.key).is_none()) {
            return Err(Box::new(SimpleStoreError::Update(format!(
                "missing key {}",
                self.key
            ))));
        }

        let mut state = self.state.write();
        state.update_batches.push(docs.clone());
        for doc in docs {
            let key = doc.get(&self.key).cloned();
            let position = state
                .docs
                .iter()
                .position(|existing| existing.get(&self.key) == key.as_ref());
            // the new document replaces the existing one in place
            match position.and_then(|idx| state.docs.get_mut(idx)) {
                Some(existing) => *existing = doc,
                None => state.docs.push(doc),
            }
        }
        Ok(())
    }
}
