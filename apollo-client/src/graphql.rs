//! Types related to GraphQL responses.

use std::collections::HashSet;

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ApolloError;
use crate::json_ext::Object;
use crate::json_ext::Value;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
/// The error location
pub struct Location {
    /// The line number
    pub line: u32,
    /// The column number
    pub column: u32,
}

/// A [GraphQL error](https://spec.graphql.org/October2021/#sec-Errors)
/// as may be found in the `errors` field of a GraphQL [`Response`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[non_exhaustive]
pub struct Error {
    /// The error message.
    pub message: String,

    /// The locations of the error in the GraphQL document of the originating request.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,

    /// The optional GraphQL extensions for this error.
    #[serde(skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

impl Error {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// The result of an operation, either read from the normalized cache or received from the server.
#[derive(Clone, Debug, PartialEq)]
pub struct Response<D = Value> {
    /// Typed data, absent on a cache miss or when the server returned none.
    pub data: Option<D>,

    /// GraphQL errors returned by the server. Present independently of `data`.
    pub errors: Vec<Error>,

    /// Whether the response was served from the normalized cache.
    pub from_cache: bool,

    /// Field keys (`<recordKey>.<fieldName>`) touched while producing this response.
    pub dependent_keys: HashSet<String>,
}

impl<D> Default for Response<D> {
    fn default() -> Self {
        Self {
            data: None,
            errors: Vec::new(),
            from_cache: false,
            dependent_keys: HashSet::new(),
        }
    }
}

impl<D> Response<D> {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl Response<Value> {
    /// Create a response from the raw body of an HTTP response.
    ///
    /// The body must be a JSON object carrying `data`, `errors` or both. Only the top-level shape
    /// is checked here; the data is checked against the selections when it is normalized.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ApolloError> {
        let value: Value = serde_json::from_slice(bytes).map_err(ApolloError::parse)?;
        let Value::Object(mut object) = value else {
            return Err(ApolloError::parse("response is not an object"));
        };

        let has_data = object.contains_key("data");
        let data = match object.remove("data") {
            None | Some(Value::Null) => None,
            Some(data @ Value::Object(_)) => Some(data),
            Some(_) => return Err(ApolloError::parse("'data' is not an object")),
        };
        let errors = match object.remove("errors") {
            None | Some(Value::Null) => None,
            Some(errors) => Some(
                serde_json_bytes::from_value::<Vec<Error>>(errors)
                    .map_err(|error| ApolloError::parse(format!("invalid 'errors': {error}")))?,
            ),
        };
        if !has_data && errors.is_none() {
            return Err(ApolloError::parse(
                "response carries neither 'data' nor 'errors'",
            ));
        }

        Ok(Response {
            data,
            errors: errors.unwrap_or_default(),
            ..Default::default()
        })
    }

    /// Decode the data into its typed form.
    pub(crate) fn into_typed<D>(self) -> Result<Response<D>, ApolloError>
    where
        D: DeserializeOwned,
    {
        let data = self
            .data
            .map(serde_json_bytes::from_value::<D>)
            .transpose()
            .map_err(|error| ApolloError::parse(format!("could not decode data: {error}")))?;
        Ok(Response {
            data,
            errors: self.errors,
            from_cache: self.from_cache,
            dependent_keys: self.dependent_keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn data_and_errors() {
        let response = Response::from_bytes(
            br#"{"data":{"hero":null},"errors":[{"message":"boom","locations":[{"line":1,"column":3}]}]}"#,
        )
        .unwrap();

        assert_eq!(response.data, Some(json!({"hero": null})));
        assert!(response.has_errors());
        assert_eq!(
            response.errors[0].locations,
            vec![Location { line: 1, column: 3 }]
        );
        assert!(!response.from_cache);
    }

    #[test]
    fn errors_without_data() {
        let response = Response::from_bytes(br#"{"errors":[{"message":"denied"}]}"#).unwrap();
        assert_eq!(response.data, None);
        assert_eq!(response.errors, vec![Error::new("denied")]);
    }

    #[test]
    fn malformed_bodies() {
        for body in [
            &b"not json"[..],
            br#"[1, 2]"#,
            br#"{"data": "hero"}"#,
            br#"{"extensions": {}}"#,
            br#"{"errors": "denied"}"#,
        ] {
            let error = Response::from_bytes(body).unwrap_err();
            assert!(
                matches!(error, ApolloError::Parse { .. }),
                "{}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn typed_decoding() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Hero {
            name: String,
        }
        #[derive(Deserialize, Debug, PartialEq)]
        struct Data {
            hero: Hero,
        }

        let response = Response {
            data: Some(json!({"hero": {"name": "R2-D2"}})),
            ..Default::default()
        };
        let typed = response.clone().into_typed::<Data>().unwrap();
        assert_eq!(typed.data.unwrap().hero.name, "R2-D2");

        let error = Response {
            data: Some(json!({"hero": 1})),
            ..Default::default()
        }
        .into_typed::<Data>()
        .unwrap_err();
        assert!(matches!(error, ApolloError::Parse { .. }));
    }
}
