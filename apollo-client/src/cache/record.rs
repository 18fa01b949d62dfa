use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use crate::json_ext::Value;

const QUERY_ROOT: &str = "QUERY_ROOT";
const MUTATION_ROOT: &str = "MUTATION_ROOT";

/// Identity of a record in the normalized cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn query_root() -> Self {
        Self(QUERY_ROOT.to_string())
    }

    pub fn mutation_root() -> Self {
        Self(MUTATION_ROOT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the record holding the value of a field of this record that has no identity of its
    /// own.
    pub(crate) fn child(&self, field: &str) -> Self {
        Self(format!("{}.{field}", self.0))
    }

    /// Key of a field of this record, as reported in changed and dependent key sets.
    pub(crate) fn field_key(&self, field: &str) -> String {
        format!("{}.{field}", self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Value of a record field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordValue {
    /// Any JSON leaf, including `null` and custom scalars.
    Scalar(Value),
    /// Reference to another record.
    Reference(CacheKey),
    List(Vec<RecordValue>),
}

impl From<Value> for RecordValue {
    fn from(value: Value) -> Self {
        RecordValue::Scalar(value)
    }
}

impl From<CacheKey> for RecordValue {
    fn from(key: CacheKey) -> Self {
        RecordValue::Reference(key)
    }
}

/// A flat map of the fields of one entity of the normalized cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    key: CacheKey,
    fields: IndexMap<String, RecordValue>,
}

impl Record {
    pub fn new(key: impl Into<CacheKey>) -> Self {
        Self {
            key: key.into(),
            fields: IndexMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<RecordValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn field(&self, name: &str) -> Option<&RecordValue> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &RecordValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn set_field(&mut self, name: String, value: RecordValue) {
        self.fields.insert(name, value);
    }

    /// Merge the fields of `other` into this record, the incoming value winning on conflict.
    ///
    /// Returns `<recordKey>.<fieldName>` for every field that was added or whose value changed.
    pub fn merge_with(&mut self, other: Record) -> HashSet<String> {
        let mut changed = HashSet::new();
        for (name, value) in other.fields {
            match self.fields.get(&name) {
                Some(existing) if *existing == value => {}
                _ => {
                    changed.insert(self.key.field_key(&name));
                    self.fields.insert(name, value);
                }
            }
        }
        changed
    }

    /// Keys of every field of the record, as reported when the record is first stored.
    pub(crate) fn field_keys(&self) -> HashSet<String> {
        self.fields
            .keys()
            .map(|name| self.key.field_key(name))
            .collect()
    }
}
