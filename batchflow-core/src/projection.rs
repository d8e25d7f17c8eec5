//! Projection builder: combines the documents of several source stores into one document per key value
//! in a target store.
//!
//! Key values are read from the sources (or taken from an allow-list) and processed in chunks. For every
//! chunk each source is queried for the documents with those key values, the selected fields are renamed
//! into the target's vocabulary and the partial documents are merged per key by the
//! [merge engine](crate::merge) before being committed to the target.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use batchflow_shared::record::{INTERNAL_ID_FIELD, KeyValue, Record, Value};
use batchflow_shared::store::{Criteria, Store};
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::builder::{Builder, ItemStream};
use crate::chunker::group_slice;
use crate::commit::commit;
use crate::error::{Error, Result};
use crate::merge::merge_by_key;

mod mapping;
pub use mapping::FieldsToProject;
use mapping::Projection;

const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Declarative settings of a [ProjectionBuilder], typically read from a JSON or YAML document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectionConfig {
    /// One entry per source store, a list of field names or a target → source field mapping.
    #[serde(default)]
    pub fields_to_project: Option<Value>,
    /// Limits the run to these key values.
    #[serde(default)]
    pub query_by_key: Vec<Value>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            fields_to_project: None,
            query_by_key: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// A source store and the fields projected from it.
struct Source {
    store: Arc<dyn Store>,
    projection: Projection,
}

/// ProjectionBuilder builds one target document per key value out of the documents of its sources.
///
/// Each item of the builder is the list of partial documents of one chunk of key values, so a single
/// transform merges every document of those keys.
pub struct ProjectionBuilder {
    sources: Vec<Source>,
    target: Arc<dyn Store>,
    query_by_key: Vec<KeyValue>,
    chunk_size: NonZeroUsize,
}

impl ProjectionBuilder {
    /// Creates the builder. `fields_to_project`, when given, must have one entry per source store. An
    /// empty `query_by_key` processes every key value found in the sources, repeated entries are
    /// processed once.
    ///
    /// Only the inputs are validated, the stores are not touched before the builder connects.
    pub fn new(
        source_stores: Vec<Arc<dyn Store>>,
        target_store: Arc<dyn Store>,
        fields_to_project: Option<Vec<FieldsToProject>>,
        query_by_key: Vec<KeyValue>,
        chunk_size: usize,
    ) -> Result<Self> {
        let chunk_size = NonZeroUsize::new(chunk_size)
            .ok_or_else(|| Error::Config("chunk size must be greater than 0".to_string()))?;

        let fields: Vec<Option<FieldsToProject>> = match fields_to_project {
            None => source_stores.iter().map(|_| None).collect(),
            Some(fields) if fields.len() != source_stores.len() => {
                return Err(Error::Config(format!(
                    "fields to project has {} entries but there are {} source stores",
                    fields.len(),
                    source_stores.len()
                )));
            }
            Some(fields) => fields.into_iter().map(Some).collect(),
        };

        let mut seen = HashSet::new();
        let query_by_key: Vec<KeyValue> = query_by_key
            .into_iter()
            .filter(|key_value| seen.insert(key_value.clone()))
            .collect();

        let target_key = target_store.key().to_string();
        let sources = source_stores
            .into_iter()
            .zip(fields)
            .map(|(store, fields)| {
                let projection = Projection::new(fields, &target_key, store.key());
                Source { store, projection }
            })
            .collect();

        Ok(Self {
            sources,
            target: target_store,
            query_by_key,
            chunk_size,
        })
    }

    /// Creates the builder from its declarative settings.
    pub fn from_config(
        source_stores: Vec<Arc<dyn Store>>,
        target_store: Arc<dyn Store>,
        config: ProjectionConfig,
    ) -> Result<Self> {
        let fields_to_project = match &config.fields_to_project {
            None | Some(Value::Null) => None,
            Some(Value::Array(entries)) => Some(
                entries
                    .iter()
                    .map(FieldsToProject::try_from)
                    .collect::<Result<Vec<_>>>()?,
            ),
            Some(other) => {
                return Err(Error::Config(format!(
                    "fields to project must be a list with one entry per source store, got {other}"
                )));
            }
        };

        let query_by_key = config
            .query_by_key
            .into_iter()
            .map(KeyValue::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Config(format!("invalid query_by_key entry: {e}")))?;

        Self::new(
            source_stores,
            target_store,
            fields_to_project,
            query_by_key,
            config.chunk_size,
        )
    }

    /// Asks every source to index its key field, a source that can not do so is only reported.
    pub async fn ensure_indexes(&self) -> Result<()> {
        let mut all_indexed = true;
        for source in &self.sources {
            let store = &source.store;
            let indexed = store.ensure_index(store.key()).await.map_err(|e| {
                Error::Source(format!("failed to ensure index on {}: {e}", store.name()))
            })?;
            all_indexed &= indexed;
        }

        if !all_indexed {
            warn!("Missing indices for key fields on source stores");
        }
        Ok(())
    }

    /// Key values to process: the allow-list when given, else the union of the key values of all
    /// sources in first-seen order. Null or non scalar key values are skipped.
    async fn key_values(&self) -> Result<Vec<KeyValue>> {
        if !self.query_by_key.is_empty() {
            return Ok(self.query_by_key.clone());
        }

        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for source in &self.sources {
            let store = &source.store;
            let values = store.distinct(store.key()).await.map_err(|e| {
                Error::Source(format!("failed to read key values of {}: {e}", store.name()))
            })?;

            let mut skipped = 0;
            for value in values {
                match KeyValue::new(value) {
                    Some(key_value) => {
                        if seen.insert(key_value.clone()) {
                            keys.push(key_value);
                        }
                    }
                    None => skipped += 1,
                }
            }
            if skipped > 0 {
                warn!(
                    store = store.name(),
                    key = store.key(),
                    skipped,
                    "Skipping null key values"
                );
            }
        }

        debug!(num_keys = keys.len(), "Distinct key values found");
        Ok(keys)
    }

    /// Fetches the projected documents of every source for one chunk of key values.
    async fn fetch_chunk(&self, keys: Vec<KeyValue>) -> Result<Vec<Record>> {
        let values: Vec<Value> = keys.into_iter().map(KeyValue::into_value).collect();
        let mut items = Vec::new();

        for source in &self.sources {
            let store = &source.store;
            let criteria = Criteria::any_of(store.key(), values.clone())?;

            let count = store.count(criteria.clone()).await.map_err(|e| {
                Error::Source(format!("failed to count documents of {}: {e}", store.name()))
            })?;
            let properties = source.projection.properties();
            debug!(
                store = store.name(),
                count,
                ?properties,
                "Querying documents for key chunk"
            );

            let mut docs = store.query(criteria, properties).await.map_err(|e| {
                Error::Source(format!("failed to query {}: {e}", store.name()))
            })?;
            while let Some(doc) = docs.next().await {
                let doc = doc.map_err(|e| {
                    Error::Source(format!("failed to read from {}: {e}", store.name()))
                })?;
                items.push(self.project(source, doc)?);
            }
        }

        Ok(items)
    }

    /// Renames the fields of a source document and tags it with its key value under the target key.
    fn project(&self, source: &Source, doc: Record) -> Result<Record> {
        let store = &source.store;
        let key_value = doc.get(store.key()).cloned().ok_or_else(|| {
            Error::Source(format!(
                "document of {} has no key field {}",
                store.name(),
                store.key()
            ))
        })?;

        let mut item = source.projection.apply(doc);
        item.shift_remove(INTERNAL_ID_FIELD);
        item.shift_remove(store.last_updated_field());
        item.insert(self.target.key().to_string(), key_value);
        Ok(item)
    }
}

impl Builder for ProjectionBuilder {
    type Item = Vec<Record>;
    type Output = Vec<Record>;

    fn chunk_size(&self) -> usize {
        self.chunk_size.get()
    }

    async fn connect(&self) -> Result<()> {
        self.target.connect().await.map_err(|e| {
            Error::Target(format!("failed to connect {}: {e}", self.target.name()))
        })?;
        for source in &self.sources {
            source.store.connect().await.map_err(|e| {
                Error::Source(format!("failed to connect {}: {e}", source.store.name()))
            })?;
        }
        self.ensure_indexes().await
    }

    async fn get_items(&self) -> Result<ItemStream<'_, Vec<Record>>> {
        info!(sources = self.sources.len(), "Starting projection get_items");
        let keys = self.key_values().await?;
        let key_chunks = group_slice(&keys, self.chunk_size);

        let items = futures::stream::iter(key_chunks).then(move |keys| self.fetch_chunk(keys));
        Ok(Box::pin(items))
    }

    fn process_item(&self, item: Vec<Record>) -> Result<Vec<Record>> {
        merge_by_key(item, self.target.key())
    }

    async fn update_targets(&self, items: Vec<Vec<Record>>) -> Result<()> {
        let records: Vec<Record> = items.into_iter().flatten().collect();
        let committed = commit(self.target.as_ref(), records).await?;
        info!(store = self.target.name(), committed, "Updated target");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use batchflow_testing::simplestore::SimpleStore;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::Settings;
    use crate::pipeline::{RunSummary, run};

    fn stores() -> (SimpleStore, SimpleStore, SimpleStore) {
        let a = SimpleStore::new("a", "k");
        a.insert(json!({"_id": 1, "k": 1, "a": "foo", "last_updated": "2020-01-01T00:00:00Z"}));
        let b = SimpleStore::new("b", "k");
        b.insert(json!({"_id": 2, "k": 1, "b": "bar"}));
        b.insert(json!({"_id": 3, "k": 2, "b": "baz"}));
        let target = SimpleStore::new("summary", "k");
        (a, b, target)
    }

    fn dyn_stores(stores: &[&SimpleStore]) -> Vec<Arc<dyn Store>> {
        stores
            .iter()
            .map(|store| Arc::new((*store).clone()) as Arc<dyn Store>)
            .collect()
    }

    fn without_timestamp(mut record: Record) -> Record {
        record.remove("last_updated");
        record
    }

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    async fn run_builder(builder: ProjectionBuilder) -> RunSummary {
        run(
            Arc::new(builder),
            &Settings { num_workers: 2 },
            CancellationToken::new(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_project_all_fields() {
        let (a, b, target) = stores();
        let builder = ProjectionBuilder::new(
            dyn_stores(&[&a, &b]),
            Arc::new(target.clone()),
            None,
            vec![],
            10,
        )
        .unwrap();

        let summary = run_builder(builder).await;
        assert_eq!(summary, RunSummary { items: 1, chunks: 1 });

        let docs = target.snapshot();
        assert_eq!(docs.len(), 2);
        // a single timestamp for the whole run
        assert_eq!(docs[0].get("last_updated"), docs[1].get("last_updated"));
        assert_ne!(
            docs[0].get("last_updated"),
            Some(&json!("2020-01-01T00:00:00Z"))
        );

        let docs: Vec<Record> = docs.into_iter().map(without_timestamp).collect();
        assert_eq!(
            docs,
            vec![
                record(json!({"k": 1, "a": "foo", "b": "bar"})),
                record(json!({"k": 2, "b": "baz"})),
            ]
        );
        assert_eq!(target.update_batches().len(), 1);
    }

    #[tokio::test]
    async fn test_renamed_fields() {
        let (a, b, target) = stores();
        let config: ProjectionConfig = serde_json::from_value(json!({
            "fields_to_project": [{"renamedA": "a"}, {"b": "b"}],
            "chunk_size": 10,
        }))
        .unwrap();
        let builder =
            ProjectionBuilder::from_config(dyn_stores(&[&a, &b]), Arc::new(target.clone()), config)
                .unwrap();

        run_builder(builder).await;

        let doc = target.get(&KeyValue::from(1_i64)).map(without_timestamp);
        assert_eq!(
            doc,
            Some(record(json!({"renamedA": "foo", "k": 1, "b": "bar"})))
        );
        let doc = target.get(&KeyValue::from(2_i64)).map(without_timestamp);
        assert_eq!(doc, Some(record(json!({"b": "baz", "k": 2}))));
    }

    #[tokio::test]
    async fn test_source_key_is_renamed_to_target_key() {
        let source = SimpleStore::new("tasks", "task_id");
        source.insert(json!({"task_id": "mp-1", "energy": -1.5}));
        source.insert(json!({"task_id": "mp-2", "energy": -2.5}));
        let target = SimpleStore::new("materials", "material_id");

        let builder = ProjectionBuilder::new(
            dyn_stores(&[&source]),
            Arc::new(target.clone()),
            None,
            vec![],
            1,
        )
        .unwrap();
        let summary = run_builder(builder).await;
        assert_eq!(summary, RunSummary { items: 2, chunks: 2 });

        let doc = target.get(&KeyValue::from("mp-2")).map(without_timestamp);
        assert_eq!(
            doc,
            Some(record(
                json!({"task_id": "mp-2", "energy": -2.5, "material_id": "mp-2"})
            ))
        );
    }

    #[tokio::test]
    async fn test_query_by_key_limits_the_run() {
        let (a, b, target) = stores();
        let config = ProjectionConfig {
            query_by_key: vec![json!(2)],
            ..Default::default()
        };
        let builder =
            ProjectionBuilder::from_config(dyn_stores(&[&a, &b]), Arc::new(target.clone()), config)
                .unwrap();

        run_builder(builder).await;

        let docs: Vec<Record> = target.snapshot().into_iter().map(without_timestamp).collect();
        assert_eq!(docs, vec![record(json!({"k": 2, "b": "baz"}))]);
    }

    #[tokio::test]
    async fn test_null_key_values_are_skipped() {
        let (a, b, target) = stores();
        a.insert(json!({"k": null, "a": "orphan"}));
        let builder = ProjectionBuilder::new(
            dyn_stores(&[&a, &b]),
            Arc::new(target.clone()),
            None,
            vec![],
            10,
        )
        .unwrap();

        let keys = builder.key_values().await.unwrap();
        assert_eq!(keys, vec![KeyValue::from(1_i64), KeyValue::from(2_i64)]);

        run_builder(builder).await;
        assert_eq!(target.len(), 2);
    }

    #[tokio::test]
    async fn test_key_chunks_follow_chunk_size() {
        let source = SimpleStore::new("tasks", "k");
        for k in 0..5 {
            source.insert(json!({"k": k, "v": k * 10}));
        }
        let target = SimpleStore::new("summary", "k");
        let builder = ProjectionBuilder::new(
            dyn_stores(&[&source]),
            Arc::new(target.clone()),
            Some(vec![FieldsToProject::Fields(vec!["v".to_string()])]),
            vec![],
            2,
        )
        .unwrap();

        let items: Vec<Vec<Record>> = builder
            .get_items()
            .await
            .unwrap()
            .map(|item| item.unwrap())
            .collect()
            .await;
        let sizes: Vec<usize> = items.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(items[2], vec![record(json!({"v": 40, "k": 4}))]);
    }

    #[tokio::test]
    async fn test_connect_ensures_indexes() {
        let (a, b, target) = stores();
        b.error_injector().refuse_indexes(true);
        let builder = ProjectionBuilder::new(
            dyn_stores(&[&a, &b]),
            Arc::new(target.clone()),
            None,
            vec![],
            10,
        )
        .unwrap();

        // a refused index is not an error
        builder.connect().await.unwrap();
        assert!(a.indexes().contains("k"));
        assert!(b.indexes().is_empty());
        assert_eq!(target.connect_count(), 1);
        assert_eq!(a.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_constructor_rejects_invalid_inputs() {
        let (a, b, target) = stores();

        let err = ProjectionBuilder::new(
            dyn_stores(&[&a, &b]),
            Arc::new(target.clone()),
            Some(vec![FieldsToProject::Fields(vec!["a".to_string()])]),
            vec![],
            10,
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::Config(_)));

        let err = ProjectionBuilder::new(
            dyn_stores(&[&a, &b]),
            Arc::new(target.clone()),
            None,
            vec![],
            0,
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::Config(_)));

        let config = ProjectionConfig {
            fields_to_project: Some(json!({"a": "a"})),
            ..Default::default()
        };
        let err =
            ProjectionBuilder::from_config(dyn_stores(&[&a, &b]), Arc::new(target.clone()), config)
                .err()
                .unwrap();
        assert!(matches!(err, Error::Config(_)));

        let config = ProjectionConfig {
            query_by_key: vec![json!({"nested": 1})],
            ..Default::default()
        };
        let err =
            ProjectionBuilder::from_config(dyn_stores(&[&a, &b]), Arc::new(target.clone()), config)
                .err()
                .unwrap();
        assert!(matches!(err, Error::Config(msg) if msg.contains("not a valid key value")));

        // no store was touched
        assert_eq!(a.connect_count() + b.connect_count() + target.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_repeated_allowed_keys_are_processed_once() {
        let (a, b, target) = stores();
        let builder = ProjectionBuilder::new(
            dyn_stores(&[&a, &b]),
            Arc::new(target.clone()),
            None,
            vec![
                KeyValue::from(1_i64),
                KeyValue::from(2_i64),
                KeyValue::from(1_i64),
            ],
            2,
        )
        .unwrap();

        let summary = run_builder(builder).await;
        assert_eq!(summary, RunSummary { items: 1, chunks: 1 });

        let batches = target.update_batches();
        assert_eq!(batches.len(), 1);
        let keys: Vec<Option<&Value>> = batches[0].iter().map(|doc| doc.get("k")).collect();
        assert_eq!(keys, vec![Some(&json!(1)), Some(&json!(2))]);
    }

    #[test]
    fn test_config_rejects_unknown_fields() {
        let parsed = serde_json::from_value::<ProjectionConfig>(json!({
            "field_to_project": [["a"], ["b"]],
        }));
        let err = parsed.unwrap_err();
        assert!(err.to_string().contains("unknown field `field_to_project`"));
    }

    #[tokio::test]
    async fn test_distinct_failure_fails_the_run() {
        let (a, b, target) = stores();
        a.error_injector().fail_distincts(1);
        let builder = ProjectionBuilder::new(
            dyn_stores(&[&a, &b]),
            Arc::new(target.clone()),
            None,
            vec![],
            10,
        )
        .unwrap();

        let err = run(
            Arc::new(builder),
            &Settings { num_workers: 1 },
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Source(msg) if msg.contains("failed to read key values of a")));
        assert!(target.update_batches().is_empty());
    }

    #[tokio::test]
    async fn test_count_failure_fails_the_run() {
        let (a, b, target) = stores();
        b.error_injector().fail_counts(1);
        let builder = ProjectionBuilder::new(
            dyn_stores(&[&a, &b]),
            Arc::new(target.clone()),
            None,
            vec![],
            10,
        )
        .unwrap();

        let err = run(
            Arc::new(builder),
            &Settings { num_workers: 1 },
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(
            matches!(err, Error::Source(msg) if msg.contains("failed to count documents of b"))
        );
        assert!(target.update_batches().is_empty());
    }

    #[tokio::test]
    async fn test_source_failure_fails_the_run() {
        let (a, b, target) = stores();
        b.error_injector().fail_queries(1);
        let builder = ProjectionBuilder::new(
            dyn_stores(&[&a, &b]),
            Arc::new(target.clone()),
            None,
            vec![],
            10,
        )
        .unwrap();

        let err = run(
            Arc::new(builder),
            &Settings { num_workers: 1 },
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Source(msg) if msg.contains("failed to query b")));
        assert!(target.is_empty());
    }

    #[tokio::test]
    async fn test_config_defaults() {
        let config: ProjectionConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, ProjectionConfig::default());
        assert_eq!(config.chunk_size, 1000);
    }
}
