//! Entities: a key plus a typed property map.

use std::collections::BTreeMap;

use crate::error::Error;
use crate::key::Key;
use crate::value::Value;

/// One property: its value and whether the server should index it
/// (default true; a `noindex` tag or call sets it false).
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub value: Value,
    pub indexed: bool,
}

impl Property {
    pub fn new(value: Value) -> Self {
        Property {
            value,
            indexed: true,
        }
    }

    pub fn noindex(mut self) -> Self {
        self.indexed = false;
        self
    }
}

/// A record of named, typed properties plus its key.
///
/// `BTreeMap` gives a stable iteration order, which keeps wire encoding and
/// test fixtures deterministic — the server does not require any particular
/// property order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Entity {
    key: Option<Key>,
    properties: BTreeMap<String, Property>,
}

impl Entity {
    pub fn empty() -> Self {
        Entity::default()
    }

    pub fn from_properties(properties: BTreeMap<String, Property>) -> Self {
        Entity {
            key: None,
            properties,
        }
    }

    pub fn with_key(mut self, key: Key) -> Self {
        self.key = Some(key);
        self
    }

    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn set_key(&mut self, key: Key) {
        self.key = Some(key);
    }

    pub fn get(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn insert(&mut self, name: String, property: Property) {
        self.properties.insert(name, property);
    }

    pub fn properties_ref(&self) -> impl Iterator<Item = (&String, &Property)> {
        self.properties.iter()
    }

    pub fn into_properties(self) -> BTreeMap<String, Property> {
        self.properties
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Reflects a record into a property map.
///
/// Implemented by `#[derive(StoreEntity)]`, or by hand for types outside this
/// crate.
pub trait IntoEntity {
    fn into_entity(&self) -> Result<Entity, Error>;
}

/// Re-materialises a property map into a caller-supplied record location.
pub trait FromEntity: Sized {
    fn from_entity(entity: &Entity, out: &mut Self) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn noindex_marks_the_property_not_indexed() {
        let prop = Property::new(Value::Integer(1)).noindex();
        assert!(!prop.indexed);
        assert!(Property::new(Value::Integer(1)).indexed);
    }

    #[test]
    fn unknown_properties_are_ignored_on_lookup() {
        let mut props = BTreeMap::new();
        props.insert("known".to_string(), Property::new(Value::Integer(1)));
        let entity = Entity::from_properties(props);
        assert!(entity.get("unknown").is_none());
        assert!(entity.get("known").is_some());
    }

    #[test]
    fn key_round_trips_through_with_key_and_set_key() {
        let key = crate::key::Key::name("Thing", "a", None);
        let mut entity = Entity::empty().with_key(key.clone());
        assert_eq!(entity.key(), Some(&key));

        let other = crate::key::Key::name("Thing", "b", None);
        entity.set_key(other.clone());
        assert_eq!(entity.key(), Some(&other));
    }
}
