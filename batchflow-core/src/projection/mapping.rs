use batchflow_shared::record::{Record, Value, lookup_path};

use crate::error::{Error, Result};

/// FieldsToProject selects the fields of one source store that end up in the target documents.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldsToProject {
    /// Field names copied as is, `["a", "b"]` is the same as `{"a": "a", "b": "b"}`.
    Fields(Vec<String>),
    /// Pairs of (target field, source field path), in the order given.
    Mapping(Vec<(String, String)>),
}

impl FieldsToProject {
    fn into_pairs(self) -> Vec<(String, String)> {
        match self {
            FieldsToProject::Fields(fields) => fields
                .into_iter()
                .map(|field| (field.clone(), field))
                .collect(),
            FieldsToProject::Mapping(pairs) => pairs,
        }
    }
}

impl TryFrom<&Value> for FieldsToProject {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self> {
        match value {
            Value::Array(fields) => fields
                .iter()
                .map(|field| {
                    field.as_str().map(str::to_string).ok_or_else(|| {
                        Error::Config(format!("field to project {field} is not a string"))
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(FieldsToProject::Fields),
            Value::Object(mapping) => mapping
                .iter()
                .map(|(target, source)| {
                    source
                        .as_str()
                        .map(|source| (target.clone(), source.to_string()))
                        .ok_or_else(|| {
                            Error::Config(format!(
                                "source field {source} for target field {target} is not a string"
                            ))
                        })
                })
                .collect::<Result<Vec<_>>>()
                .map(FieldsToProject::Mapping),
            other => Err(Error::Config(format!(
                "fields to project must be a list or a mapping, got {other}"
            ))),
        }
    }
}

/// Projection is the resolved form of [FieldsToProject] for one source store.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Projection {
    /// Every field of the source documents is kept under its own name.
    All,
    /// Target fields filled from source field paths. Always maps the target key to the source key.
    Mapped(Vec<(String, String)>),
}

impl Projection {
    pub(crate) fn new(fields: Option<FieldsToProject>, target_key: &str, source_key: &str) -> Self {
        let mut pairs = match fields {
            Some(fields) => fields.into_pairs(),
            None => return Projection::All,
        };
        if pairs.is_empty() {
            return Projection::All;
        }

        match pairs.iter_mut().find(|(target, _)| target == target_key) {
            Some((_, source)) => *source = source_key.to_string(),
            None => pairs.push((target_key.to_string(), source_key.to_string())),
        }
        Projection::Mapped(pairs)
    }

    /// The source fields to fetch, `None` fetches whole documents.
    pub(crate) fn properties(&self) -> Option<Vec<String>> {
        match self {
            Projection::All => None,
            Projection::Mapped(pairs) => Some(pairs.iter().map(|(_, src)| src.clone()).collect()),
        }
    }

    /// Renames the fields of a source document. A source path that can not be resolved yields null.
    pub(crate) fn apply(&self, doc: Record) -> Record {
        match self {
            Projection::All => doc,
            Projection::Mapped(pairs) => pairs
                .iter()
                .map(|(target, source)| {
                    let value = lookup_path(&doc, source).cloned().unwrap_or(Value::Null);
                    (target.clone(), value)
                })
                .collect(),
        }
    }
}
