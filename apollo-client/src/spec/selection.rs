use serde_json_bytes::ByteString;

use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;

/// A node of the field-selection descriptor tree of an operation.
///
/// The tree is what the code generator emits for every operation: the normalizer and the reader
/// walk it alongside the response data to flatten it into records and to read it back.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Field(Field),
    /// Fields that only apply when the concrete `__typename` of the object is one of
    /// `type_conditions`.
    Fragment(Fragment),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub type_conditions: Vec<String>,
    pub selections: Vec<Selection>,
}

/// The shape of a field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Any leaf value, including custom scalars and enums.
    Scalar,
    /// A composite value with its own selection set.
    Object(Vec<Selection>),
    /// An ordered list of items of the given kind.
    List(Box<FieldKind>),
}

/// Value of a field argument as written in the query document.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// A literal.
    Value(Value),
    /// A reference to an operation variable, by name.
    Variable(String),
    /// An input object whose fields may contain variables.
    Object(Vec<(String, Argument)>),
    /// A list whose items may contain variables.
    List(Vec<Argument>),
}

impl Argument {
    pub fn variable(name: impl Into<String>) -> Self {
        Argument::Variable(name.into())
    }

    /// Resolves variable references against the operation variables. Missing variables are `null`.
    pub(crate) fn resolve(&self, variables: &Object) -> Value {
        match self {
            Argument::Value(value) => value.clone(),
            Argument::Variable(name) => variables
                .get(name.as_str())
                .cloned()
                .unwrap_or(Value::Null),
            Argument::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, argument)| {
                        (ByteString::from(name.as_str()), argument.resolve(variables))
                    })
                    .collect(),
            ),
            Argument::List(items) => {
                Value::Array(items.iter().map(|item| item.resolve(variables)).collect())
            }
        }
    }
}

impl<T> From<T> for Argument
where
    T: Into<Value>,
{
    fn from(value: T) -> Self {
        Argument::Value(value.into())
    }
}

/// A field of a selection set.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Name of the field in the response, the alias if there is one.
    pub response_name: String,
    /// Name of the field in the schema.
    pub field_name: String,
    pub arguments: Vec<(String, Argument)>,
    pub nullable: bool,
    pub kind: FieldKind,
}

impl Field {
    pub fn new(field_name: impl Into<String>, kind: FieldKind) -> Self {
        let field_name = field_name.into();
        Self {
            response_name: field_name.clone(),
            field_name,
            arguments: Vec::new(),
            nullable: false,
            kind,
        }
    }

    pub fn scalar(field_name: impl Into<String>) -> Self {
        Self::new(field_name, FieldKind::Scalar)
    }

    pub fn object(field_name: impl Into<String>, selections: Vec<Selection>) -> Self {
        Self::new(field_name, FieldKind::Object(selections))
    }

    pub fn list(field_name: impl Into<String>, item: FieldKind) -> Self {
        Self::new(field_name, FieldKind::List(Box::new(item)))
    }

    pub fn typename() -> Self {
        Self::scalar(crate::json_ext::TYPENAME)
    }

    pub fn alias(mut self, response_name: impl Into<String>) -> Self {
        self.response_name = response_name.into();
        self
    }

    pub fn argument(mut self, name: impl Into<String>, argument: impl Into<Argument>) -> Self {
        self.arguments.push((name.into(), argument.into()));
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Name under which the field is stored in a record.
    ///
    /// Arguments are folded into the name after resolving variables, with keys sorted, so that the
    /// same field queried with different arguments never shares a slot:
    /// `hero({"episode":"JEDI"})`.
    pub fn cache_key(&self, variables: &Object) -> String {
        if self.arguments.is_empty() {
            return self.field_name.clone();
        }
        let arguments: Object = self
            .arguments
            .iter()
            .map(|(name, argument)| (ByteString::from(name.as_str()), argument.resolve(variables)))
            .collect();
        format!(
            "{}({})",
            self.field_name,
            Value::Object(arguments).to_canonical_string()
        )
    }
}

impl From<Field> for Selection {
    fn from(field: Field) -> Self {
        Selection::Field(field)
    }
}

impl Selection {
    pub fn fragment<I, S>(type_conditions: I, selections: Vec<Selection>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Selection::Fragment(Fragment {
            type_conditions: type_conditions.into_iter().map(Into::into).collect(),
            selections,
        })
    }
}

impl Fragment {
    pub(crate) fn applies_to(&self, typename: Option<&str>) -> bool {
        typename.is_some_and(|typename| self.type_conditions.iter().any(|t| t == typename))
    }
}
