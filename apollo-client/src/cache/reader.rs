//! Reconstruction of response data from records.

use std::collections::HashSet;

use displaydoc::Display;
use indexmap::IndexMap;
use thiserror::Error;

use crate::cache::key_resolver::CacheKeyResolver;
use crate::cache::record::CacheKey;
use crate::cache::record::Record;
use crate::cache::record::RecordValue;
use crate::cache::storage::NormalizedCache;
use crate::json_ext::Object;
use crate::json_ext::TYPENAME;
use crate::json_ext::Value;
use crate::spec::Field;
use crate::spec::FieldKind;
use crate::spec::Selection;

/// Where the reader loads records from.
pub(crate) trait RecordSource {
    fn load_record(&self, key: &CacheKey) -> Option<Record>;
}

impl RecordSource for dyn NormalizedCache + '_ {
    fn load_record(&self, key: &CacheKey) -> Option<Record> {
        NormalizedCache::load_record(self, key)
    }
}

impl RecordSource for IndexMap<CacheKey, Record> {
    fn load_record(&self, key: &CacheKey) -> Option<Record> {
        self.get(key).cloned()
    }
}

/// Why the cache could not answer an operation.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq)]
pub(crate) enum ReadError {
    /// missing record '{0}'
    MissingRecord(CacheKey),
    /// missing field '{field}' in record '{key}'
    MissingField { key: CacheKey, field: String },
    /// unexpected value for field '{field}' in record '{key}'
    UnexpectedValue { key: CacheKey, field: String },
}

/// Data read from the cache.
#[derive(Debug, Default)]
pub(crate) struct ReadResult {
    pub(crate) data: Object,
    /// Keys of every field read.
    pub(crate) dependent_keys: HashSet<String>,
    /// Every record the data was read from.
    pub(crate) records: IndexMap<CacheKey, Record>,
}

pub(crate) struct Reader<'a, S: ?Sized> {
    source: &'a S,
    variables: &'a Object,
    resolver: &'a dyn CacheKeyResolver,
    result: ReadResult,
}

impl<'a, S> Reader<'a, S>
where
    S: RecordSource + ?Sized,
{
    pub(crate) fn new(
        source: &'a S,
        variables: &'a Object,
        resolver: &'a dyn CacheKeyResolver,
    ) -> Self {
        Self {
            source,
            variables,
            resolver,
            result: ReadResult::default(),
        }
    }

    pub(crate) fn read(
        mut self,
        root: &CacheKey,
        selections: &[Selection],
    ) -> Result<ReadResult, ReadError> {
        let data = self.read_object(root, selections)?;
        self.result.data = data;
        Ok(self.result)
    }

    fn load(&mut self, key: &CacheKey) -> Result<Record, ReadError> {
        let record = self
            .source
            .load_record(key)
            .ok_or_else(|| ReadError::MissingRecord(key.clone()))?;
        self.result
            .records
            .entry(key.clone())
            .or_insert_with(|| record.clone());
        Ok(record)
    }

    fn read_object(
        &mut self,
        key: &CacheKey,
        selections: &[Selection],
    ) -> Result<Object, ReadError> {
        let record = self.load(key)?;
        let mut object = Object::new();
        self.read_selections(&record, selections, &mut object)?;
        Ok(object)
    }

    fn read_selections(
        &mut self,
        record: &Record,
        selections: &[Selection],
        object: &mut Object,
    ) -> Result<(), ReadError> {
        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    let value = self.read_field(record, field)?;
                    insert_merged(object, &field.response_name, value);
                }
                Selection::Fragment(fragment) => {
                    let typename = match record.field(TYPENAME) {
                        Some(RecordValue::Scalar(Value::String(typename))) => {
                            Some(typename.as_str())
                        }
                        _ => None,
                    };
                    if fragment.applies_to(typename) {
                        self.read_selections(record, &fragment.selections, object)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn read_field(&mut self, record: &Record, field: &Field) -> Result<Value, ReadError> {
        if let FieldKind::Object(selections) = &field.kind {
            if let Some(key) = self.resolver.from_field_arguments(field, self.variables) {
                if self.source.load_record(&key).is_some() {
                    return Ok(Value::Object(self.read_object(&key, selections)?));
                }
            }
        }

        let field_key = field.cache_key(self.variables);
        self.result
            .dependent_keys
            .insert(record.key().field_key(&field_key));
        match record.field(&field_key) {
            Some(value) => self.read_value(record, field, &field.kind, value),
            None if field.nullable => Ok(Value::Null),
            None => Err(ReadError::MissingField {
                key: record.key().clone(),
                field: field_key,
            }),
        }
    }

    fn read_value(
        &mut self,
        record: &Record,
        field: &Field,
        kind: &FieldKind,
        value: &RecordValue,
    ) -> Result<Value, ReadError> {
        match (kind, value) {
            (_, RecordValue::Scalar(Value::Null)) => Ok(Value::Null),
            (FieldKind::Scalar, RecordValue::Scalar(value)) => Ok(value.clone()),
            (FieldKind::Object(selections), RecordValue::Reference(key)) => {
                Ok(Value::Object(self.read_object(key, selections)?))
            }
            (FieldKind::List(item), RecordValue::List(items)) => items
                .iter()
                .map(|value| self.read_value(record, field, item, value))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            _ => Err(ReadError::UnexpectedValue {
                key: record.key().clone(),
                field: field.field_name.clone(),
            }),
        }
    }
}

/// Insert a field value, merging it with the value already read for the same response name
/// through another selection.
fn insert_merged(object: &mut Object, name: &str, value: Value) {
    if let Value::Object(incoming) = value {
        if let Some(Value::Object(existing)) = object.get_mut(name) {
            for (key, value) in incoming {
                insert_merged(existing, key.as_str(), value);
            }
            return;
        }
        object.insert(name, Value::Object(incoming));
    } else {
        object.insert(name, value);
    }
}
