//! Exercises the `#[derive(StoreEntity)]` tag grammar end to end: name
//! overrides, `skip`, `noindex`, `omitempty`, `flatten`, and the `key` alias.

use chrono::{TimeZone, Utc};
use datastore::{Entity, FromEntity, IntoEntity, Key, StoreEntity};

#[derive(Debug, Clone, PartialEq, Default, StoreEntity)]
struct Address {
    #[datastore(name = "city_name")]
    city: String,
    zip: String,
}

#[derive(Debug, Clone, PartialEq, Default, StoreEntity)]
struct Person {
    #[datastore(key)]
    key: Option<Key>,
    name: String,
    #[datastore(noindex)]
    notes: String,
    #[datastore(omitempty)]
    nickname: String,
    #[datastore(skip)]
    cache_only: i64,
    #[datastore(flatten)]
    address: Address,
}

#[test]
fn round_trips_every_supported_field_kind() {
    let person = Person {
        key: None,
        name: "Ada".to_string(),
        notes: "do not index me".to_string(),
        nickname: "".to_string(),
        cache_only: 999,
        address: Address {
            city: "London".to_string(),
            zip: "W1".to_string(),
        },
    };

    let entity = person.into_entity().unwrap();

    // `skip` fields never appear on the wire.
    assert!(entity.get("cache_only").is_none());
    // `omitempty` drops a zero-valued field.
    assert!(entity.get("nickname").is_none());
    // `noindex` propagates to the property's indexed flag.
    assert!(!entity.get("notes").unwrap().indexed);
    // `flatten` emits child properties under `address.<name>`, honouring the
    // child's own name override.
    assert!(entity.get("address.city_name").is_some());
    assert!(entity.get("address.zip").is_some());

    let mut decoded = Person::default();
    FromEntity::from_entity(&entity, &mut decoded).unwrap();

    assert_eq!(decoded.name, "Ada");
    assert_eq!(decoded.notes, "do not index me");
    assert_eq!(decoded.nickname, ""); // zero value, since omitempty dropped it
    assert_eq!(decoded.cache_only, 0); // never encoded, stays at zero value
    assert_eq!(decoded.address.city, "London");
    assert_eq!(decoded.address.zip, "W1");
}

#[test]
fn omitempty_preserves_a_non_zero_value() {
    let person = Person {
        nickname: "Lovelace".to_string(),
        ..Default::default()
    };
    let entity = person.into_entity().unwrap();
    assert!(entity.get("nickname").is_some());
}

#[test]
fn key_tagged_field_is_populated_on_decode_and_ignored_on_encode() {
    let key = Key::name("Person", "ada", None);
    let person = Person {
        key: Some(key.clone()),
        name: "Ada".to_string(),
        ..Default::default()
    };

    let entity = person.into_entity().unwrap();
    // The __key__ alias never becomes a regular property.
    assert!(entity.get("key").is_none());

    let entity = entity.with_key(key.clone());
    let mut decoded = Person::default();
    FromEntity::from_entity(&entity, &mut decoded).unwrap();
    assert_eq!(decoded.key, Some(key));
}

#[test]
fn unknown_properties_are_ignored_and_missing_ones_stay_zero_valued() {
    let mut entity = Entity::empty();
    entity.insert(
        "name".to_string(),
        datastore::Property::new(datastore::Value::String("Grace".to_string())),
    );
    entity.insert(
        "an_unrelated_property_the_server_happens_to_store".to_string(),
        datastore::Property::new(datastore::Value::Integer(1)),
    );

    let mut decoded = Person::default();
    FromEntity::from_entity(&entity, &mut decoded).unwrap();
    assert_eq!(decoded.name, "Grace");
    assert_eq!(decoded.notes, "");
}

#[derive(Debug, Clone, PartialEq, Default, StoreEntity)]
struct WithArrayAndTimestamp {
    tags: Vec<String>,
    created_at: chrono::DateTime<Utc>,
}

#[test]
fn arrays_and_timestamps_round_trip() {
    let value = WithArrayAndTimestamp {
        tags: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        created_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
    };
    let entity = value.into_entity().unwrap();
    let mut decoded = WithArrayAndTimestamp::default();
    FromEntity::from_entity(&entity, &mut decoded).unwrap();
    assert_eq!(decoded.tags, value.tags);
    assert_eq!(
        decoded.created_at.timestamp_micros(),
        value.created_at.timestamp_micros()
    );
}

#[derive(Debug, Clone, PartialEq, Default, StoreEntity)]
struct WithKeyReference {
    owner: Option<Key>,
}

#[test]
fn key_valued_properties_round_trip() {
    let owner = Key::name("User", "bob", None);
    let value = WithKeyReference {
        owner: Some(owner.clone()),
    };
    let entity = value.into_entity().unwrap();
    let mut decoded = WithKeyReference::default();
    FromEntity::from_entity(&entity, &mut decoded).unwrap();
    assert_eq!(decoded.owner, Some(owner));
}
