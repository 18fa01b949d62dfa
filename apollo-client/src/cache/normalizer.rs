//! Flattening of response data into records.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::cache::key_resolver::CacheKeyResolver;
use crate::cache::record::CacheKey;
use crate::cache::record::Record;
use crate::cache::record::RecordValue;
use crate::error::CacheError;
use crate::json_ext::Object;
use crate::json_ext::TYPENAME;
use crate::json_ext::Value;
use crate::spec::Field;
use crate::spec::FieldKind;
use crate::spec::Selection;

/// Records produced from the data of one response.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct NormalizedResponse {
    /// Records in the order they were first reached, the root record first.
    pub(crate) records: IndexMap<CacheKey, Record>,
    /// Keys of every field written.
    pub(crate) dependent_keys: HashSet<String>,
}

impl NormalizedResponse {
    pub(crate) fn into_records(self) -> Vec<Record> {
        self.records.into_values().collect()
    }
}

pub(crate) struct Normalizer<'a> {
    variables: &'a Object,
    resolver: &'a dyn CacheKeyResolver,
    response: NormalizedResponse,
}

impl<'a> Normalizer<'a> {
    pub(crate) fn new(variables: &'a Object, resolver: &'a dyn CacheKeyResolver) -> Self {
        Self {
            variables,
            resolver,
            response: NormalizedResponse::default(),
        }
    }

    pub(crate) fn normalize(
        mut self,
        root: CacheKey,
        selections: &[Selection],
        data: &Object,
    ) -> Result<NormalizedResponse, CacheError> {
        self.normalize_object(root, selections, data)?;
        Ok(self.response)
    }

    fn normalize_object(
        &mut self,
        key: CacheKey,
        selections: &[Selection],
        object: &Object,
    ) -> Result<(), CacheError> {
        // reserve the slot so that parents come before their children
        self.response
            .records
            .entry(key.clone())
            .or_insert_with(|| Record::new(key.clone()));

        let mut record = Record::new(key.clone());
        self.normalize_selections(&mut record, selections, object)?;

        if let Some(existing) = self.response.records.get_mut(&key) {
            existing.merge_with(record);
        }
        Ok(())
    }

    fn normalize_selections(
        &mut self,
        record: &mut Record,
        selections: &[Selection],
        object: &Object,
    ) -> Result<(), CacheError> {
        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    let Some(value) = object.get(field.response_name.as_str()) else {
                        continue;
                    };
                    let field_key = field.cache_key(self.variables);
                    let path = record.key().child(&field_key);
                    let value = self.normalize_value(field, &field.kind, value, path)?;
                    self.response
                        .dependent_keys
                        .insert(record.key().field_key(&field_key));
                    record.set_field(field_key, value);
                }
                Selection::Fragment(fragment) => {
                    let typename = object.get(TYPENAME).and_then(Value::as_str);
                    if fragment.applies_to(typename) {
                        self.normalize_selections(record, &fragment.selections, object)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn normalize_value(
        &mut self,
        field: &Field,
        kind: &FieldKind,
        value: &Value,
        path: CacheKey,
    ) -> Result<RecordValue, CacheError> {
        match (kind, value) {
            (_, Value::Null) => Ok(RecordValue::Scalar(Value::Null)),
            (FieldKind::Scalar, value) => Ok(RecordValue::Scalar(value.clone())),
            (FieldKind::Object(selections), Value::Object(object)) => {
                let key = self
                    .resolver
                    .from_field_record(field, object)
                    .unwrap_or(path);
                self.normalize_object(key.clone(), selections, object)?;
                Ok(RecordValue::Reference(key))
            }
            (FieldKind::List(item), Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(index, value)| {
                    self.normalize_value(field, item, value, path.child(&index.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(RecordValue::List),
            (FieldKind::Object(_), _) => Err(CacheError::Normalization(format!(
                "expected an object for field '{}' at '{path}'",
                field.response_name
            ))),
            (FieldKind::List(_), _) => Err(CacheError::Normalization(format!(
                "expected a list for field '{}' at '{path}'",
                field.response_name
            ))),
        }
    }
}
