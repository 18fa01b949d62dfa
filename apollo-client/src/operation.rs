//! Operation descriptors, as emitted by the code generator.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::cache::record::CacheKey;
use crate::json_ext::Object;
use crate::spec::Selection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Query,
    Mutation,
}

impl OperationKind {
    /// Key of the record holding the root fields of operations of this kind.
    pub fn root_key(&self) -> CacheKey {
        match self {
            OperationKind::Query => CacheKey::query_root(),
            OperationKind::Mutation => CacheKey::mutation_root(),
        }
    }
}

/// Name of an operation, as written in its document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationName(String);

impl OperationName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for OperationName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// An immutable GraphQL operation: its document, variables and field selections.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    kind: OperationKind,
    name: OperationName,
    document: String,
    operation_id: String,
    variables: Object,
    selections: Arc<Vec<Selection>>,
}

#[buildstructor::buildstructor]
impl Operation {
    /// Create an operation.
    ///
    /// The operation identifier defaults to the SHA-256 of the document, variables default to an
    /// empty object and the kind defaults to a query.
    #[builder(visibility = "pub")]
    fn new(
        kind: Option<OperationKind>,
        name: String,
        document: String,
        operation_id: Option<String>,
        variables: Option<Object>,
        selections: Vec<Selection>,
    ) -> Self {
        let operation_id = operation_id.unwrap_or_else(|| hex::encode(Sha256::digest(&document)));
        Self {
            kind: kind.unwrap_or(OperationKind::Query),
            name: OperationName(name),
            document,
            operation_id,
            variables: variables.unwrap_or_default(),
            selections: Arc::new(selections),
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn name(&self) -> &OperationName {
        &self.name
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn variables(&self) -> &Object {
        &self.variables
    }

    pub fn selections(&self) -> &[Selection] {
        &self.selections
    }

    pub fn root_key(&self) -> CacheKey {
        self.kind.root_key()
    }

    pub fn is_query(&self) -> bool {
        self.kind == OperationKind::Query
    }
}
