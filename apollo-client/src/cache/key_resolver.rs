use crate::cache::record::CacheKey;
use crate::json_ext::Object;
use crate::json_ext::TYPENAME;
use crate::json_ext::ValueExt;
use crate::spec::Field;

/// Decides the identity of objects in the normalized cache.
///
/// Objects without an identity are stored under the path they were reached through, so two
/// queries returning the same entity through different fields only share a record when the
/// resolver gives it a key.
pub trait CacheKeyResolver: Send + Sync {
    /// Key of an object found in a response, `None` to fall back to its path.
    fn from_field_record(&self, field: &Field, object: &Object) -> Option<CacheKey> {
        let _ = field;
        let typename = object.get(TYPENAME)?.as_str()?;
        let id = object.get("id")?.as_key_fragment()?;
        Some(CacheKey::new(format!("{typename}:{id}")))
    }

    /// Key of the record an object field reads from, computed from its arguments before looking
    /// the field up. Lets a query such as `hero(id: "1000")` read an entity cached by another
    /// query.
    fn from_field_arguments(&self, field: &Field, variables: &Object) -> Option<CacheKey> {
        let _ = (field, variables);
        None
    }
}

/// Resolver identifying objects by `__typename` and `id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCacheKeyResolver;

impl CacheKeyResolver for DefaultCacheKeyResolver {}

/// Resolver storing every object under its path.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathCacheKeyResolver;

impl CacheKeyResolver for PathCacheKeyResolver {
    fn from_field_record(&self, _field: &Field, _object: &Object) -> Option<CacheKey> {
        None
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    fn object(value: serde_json_bytes::Value) -> Object {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn default_resolver_uses_typename_and_id() {
        let field = Field::object("hero", vec![]);
        let resolver = DefaultCacheKeyResolver;

        assert_eq!(
            resolver.from_field_record(&field, &object(json!({"__typename": "Droid", "id": "2001"}))),
            Some(CacheKey::new("Droid:2001"))
        );
        assert_eq!(
            resolver.from_field_record(&field, &object(json!({"__typename": "Human", "id": 1000}))),
            Some(CacheKey::new("Human:1000"))
        );
        assert_eq!(
            resolver.from_field_record(&field, &object(json!({"id": "2001"}))),
            None
        );
        assert_eq!(
            resolver.from_field_record(&field, &object(json!({"__typename": "Droid", "id": null}))),
            None
        );
        assert_eq!(resolver.from_field_arguments(&field, &Object::new()), None);
    }

    #[test]
    fn path_resolver_never_identifies() {
        let field = Field::object("hero", vec![]);
        assert_eq!(
            PathCacheKeyResolver
                .from_field_record(&field, &object(json!({"__typename": "Droid", "id": "2001"}))),
            None
        );
    }
}
