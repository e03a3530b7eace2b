//! The JSON wire schema and the conversions between it and the domain
//! types in [`crate::key`], [`crate::value`], [`crate::entity`].
//!
//! Request/response envelopes are modelled as ordinary `serde`-derived
//! structs; the recursive, tagged `propertyValue` shape is instead built and
//! parsed through a pair of free functions (`value_to_json` /
//! `value_from_json`) operating directly on `serde_json::Value` rather than
//! a fully typed schema, since that payload's shape is server-defined.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::entity::{Entity, Property};
use crate::error::Error;
use crate::key::{Identifier, Key as DomainKey};
use crate::value::Value as DomainValue;

// ---- Key -------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PartitionId {
    #[serde(
        rename = "namespaceId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub namespace_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathElement {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_id")]
    pub id: Option<i64>,
}

/// The server serialises numeric ids as decimal strings to dodge JSON's
/// 53-bit number precision; we always emit strings but accept numbers too
/// on the way in.
mod opt_id {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrNum {
        Str(String),
        Num(i64),
    }

    pub fn serialize<S>(id: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match id {
            Some(v) => serializer.serialize_str(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt = Option::<StrOrNum>::deserialize(deserializer)?;
        match opt {
            None => Ok(None),
            Some(StrOrNum::Num(n)) => Ok(Some(n)),
            Some(StrOrNum::Str(s)) => s.parse::<i64>().map(Some).map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Key {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<PathElement>,
    #[serde(
        rename = "partitionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub partition_id: Option<PartitionId>,
}

impl From<&DomainKey> for Key {
    fn from(key: &DomainKey) -> Self {
        let path = key
            .path()
            .iter()
            .map(|elem| match &elem.id {
                Identifier::Name(name) => PathElement {
                    kind: elem.kind.clone(),
                    name: Some(name.clone()),
                    id: None,
                },
                Identifier::Id(id) => PathElement {
                    kind: elem.kind.clone(),
                    name: None,
                    id: Some(*id),
                },
                Identifier::Incomplete => PathElement {
                    kind: elem.kind.clone(),
                    name: None,
                    id: None,
                },
            })
            .collect();

        let partition_id = key.namespace().map(|ns| PartitionId {
            namespace_id: Some(ns.to_string()),
        });

        Key { path, partition_id }
    }
}

impl TryFrom<Key> for DomainKey {
    type Error = Error;

    fn try_from(wire: Key) -> Result<Self, Error> {
        if wire.path.is_empty() {
            return Err(Error::invalid_key("key path must have at least one element"));
        }
        let namespace = wire.partition_id.and_then(|p| p.namespace_id);

        let mut key: Option<DomainKey> = None;
        for elem in wire.path {
            let identifier = match (elem.name, elem.id) {
                (Some(name), _) => Identifier::Name(name),
                (None, Some(id)) => Identifier::Id(id),
                (None, None) => Identifier::Incomplete,
            };
            let parent = key.as_ref();
            key = Some(match identifier {
                Identifier::Name(name) => DomainKey::name(elem.kind.clone(), name, parent),
                Identifier::Id(id) => DomainKey::id(elem.kind.clone(), id, parent),
                Identifier::Incomplete => DomainKey::incomplete(elem.kind.clone(), parent),
            });
        }
        let mut key = key.expect("checked non-empty path above");
        if let Some(ns) = namespace {
            key = key.with_namespace(ns);
        }
        Ok(key)
    }
}

// ---- Value (propertyValue) -------------------------------------------

/// Encodes a domain [`DomainValue`] into its wire `propertyValue` JSON shape.
/// Rejects arrays of arrays at this boundary.
pub fn value_to_json(value: &DomainValue, indexed: bool) -> Result<Json, Error> {
    let mut obj = Map::new();
    match value {
        DomainValue::Null => {
            obj.insert("nullValue".to_string(), Json::Null);
        }
        DomainValue::Boolean(b) => {
            obj.insert("booleanValue".to_string(), Json::Bool(*b));
        }
        DomainValue::Integer(i) => {
            obj.insert("integerValue".to_string(), Json::String(i.to_string()));
        }
        DomainValue::Double(d) => {
            obj.insert(
                "doubleValue".to_string(),
                serde_json::Number::from_f64(*d)
                    .map(Json::Number)
                    .ok_or_else(|| Error::invalid_entity_type("double value is NaN or infinite"))?,
            );
        }
        DomainValue::String(s) => {
            obj.insert("stringValue".to_string(), Json::String(s.clone()));
        }
        DomainValue::Timestamp(t) => {
            obj.insert(
                "timestampValue".to_string(),
                Json::String(t.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)),
            );
        }
        DomainValue::Blob(bytes) => {
            obj.insert(
                "blobValue".to_string(),
                Json::String(base64_engine_encode(bytes)),
            );
        }
        DomainValue::Key(key) => {
            let wire_key = Key::from(key);
            obj.insert(
                "keyValue".to_string(),
                serde_json::to_value(wire_key).expect("key wire shape always serialises"),
            );
        }
        DomainValue::Entity(entity) => {
            obj.insert("entityValue".to_string(), entity_to_json(entity)?);
        }
        DomainValue::Array(values) => {
            if values.iter().any(|v| matches!(v, DomainValue::Array(_))) {
                return Err(Error::invalid_entity_type(
                    "arrays of arrays are not supported",
                ));
            }
            // excludeFromIndexes is carried per-element in the server schema;
            // array-valued properties apply the outer indexed flag to each.
            let elements = values
                .iter()
                .map(|v| value_to_json(v, indexed))
                .collect::<Result<Vec<_>, _>>()?;
            let mut array_obj = Map::new();
            array_obj.insert("values".to_string(), Json::Array(elements));
            obj.insert("arrayValue".to_string(), Json::Object(array_obj));
            return Ok(Json::Object(obj));
        }
    }
    if !indexed {
        obj.insert("excludeFromIndexes".to_string(), Json::Bool(true));
    }
    Ok(Json::Object(obj))
}

pub fn value_from_json(json: &Json) -> Result<DomainValue, Error> {
    let obj = json
        .as_object()
        .ok_or_else(|| Error::invalid_entity_type("propertyValue must be a JSON object"))?;

    if obj.contains_key("nullValue") {
        return Ok(DomainValue::Null);
    }
    if let Some(b) = obj.get("booleanValue") {
        return Ok(DomainValue::Boolean(
            b.as_bool()
                .ok_or_else(|| Error::invalid_entity_type("booleanValue is not a bool"))?,
        ));
    }
    if let Some(i) = obj.get("integerValue") {
        let parsed = match i {
            Json::String(s) => s
                .parse::<i64>()
                .map_err(|e| Error::invalid_entity_type(format!("bad integerValue: {e}")))?,
            Json::Number(n) => n
                .as_i64()
                .ok_or_else(|| Error::invalid_entity_type("integerValue out of range"))?,
            _ => return Err(Error::invalid_entity_type("integerValue has unexpected type")),
        };
        return Ok(DomainValue::Integer(parsed));
    }
    if let Some(d) = obj.get("doubleValue") {
        return Ok(DomainValue::Double(
            d.as_f64()
                .ok_or_else(|| Error::invalid_entity_type("doubleValue is not a number"))?,
        ));
    }
    if let Some(s) = obj.get("stringValue") {
        return Ok(DomainValue::String(
            s.as_str()
                .ok_or_else(|| Error::invalid_entity_type("stringValue is not a string"))?
                .to_string(),
        ));
    }
    if let Some(t) = obj.get("timestampValue") {
        let raw = t
            .as_str()
            .ok_or_else(|| Error::invalid_entity_type("timestampValue is not a string"))?;
        let parsed = chrono::DateTime::parse_from_rfc3339(raw)
            .map_err(|e| Error::invalid_entity_type(format!("bad timestampValue: {e}")))?;
        return Ok(DomainValue::Timestamp(parsed.with_timezone(&chrono::Utc)));
    }
    if let Some(b) = obj.get("blobValue") {
        let raw = b
            .as_str()
            .ok_or_else(|| Error::invalid_entity_type("blobValue is not a string"))?;
        let bytes = base64_engine_decode(raw)
            .map_err(|e| Error::invalid_entity_type(format!("bad blobValue: {e}")))?;
        return Ok(DomainValue::Blob(bytes));
    }
    if let Some(k) = obj.get("keyValue") {
        let wire_key: Key = serde_json::from_value(k.clone())
            .map_err(|e| Error::invalid_key(format!("bad keyValue: {e}")))?;
        return Ok(DomainValue::Key(DomainKey::try_from(wire_key)?));
    }
    if let Some(e) = obj.get("entityValue") {
        return Ok(DomainValue::Entity(entity_from_json(e)?));
    }
    if let Some(a) = obj.get("arrayValue") {
        let values = a
            .get("values")
            .and_then(Json::as_array)
            .cloned()
            .unwrap_or_default();
        let decoded = values
            .iter()
            .map(value_from_json)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(DomainValue::Array(decoded));
    }
    Err(Error::invalid_entity_type(
        "propertyValue carries no recognised tag",
    ))
}

fn base64_engine_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn base64_engine_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(s)
}

// ---- Entity ------------------------------------------------------------

pub fn entity_to_json(entity: &Entity) -> Result<Json, Error> {
    let mut obj = Map::new();
    if let Some(key) = entity.key() {
        let wire_key = Key::from(key);
        obj.insert(
            "key".to_string(),
            serde_json::to_value(wire_key).expect("key wire shape always serialises"),
        );
    }
    let mut properties = Map::new();
    for (name, prop) in entity.properties_ref() {
        properties.insert(name.clone(), value_to_json(&prop.value, prop.indexed)?);
    }
    obj.insert("properties".to_string(), Json::Object(properties));
    Ok(Json::Object(obj))
}

pub fn entity_from_json(json: &Json) -> Result<Entity, Error> {
    let obj = json
        .as_object()
        .ok_or_else(|| Error::invalid_entity_type("entity must be a JSON object"))?;

    let properties = obj
        .get("properties")
        .and_then(Json::as_object)
        .cloned()
        .unwrap_or_default();
    let mut map = BTreeMap::new();
    for (name, raw) in properties {
        let indexed = !raw
            .get("excludeFromIndexes")
            .and_then(Json::as_bool)
            .unwrap_or(false);
        let value = value_from_json(&raw)?;
        map.insert(name, Property { value, indexed });
    }
    let mut entity = Entity::from_properties(map);

    if let Some(k) = obj.get("key") {
        if !k.is_null() {
            let wire_key: Key = serde_json::from_value(k.clone())
                .map_err(|e| Error::invalid_key(format!("bad entity key: {e}")))?;
            entity.set_key(DomainKey::try_from(wire_key)?);
        }
    }
    Ok(entity)
}

// ---- Filters & query -----------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyReference {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindExpression {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Projection {
    pub property: PropertyReference,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyOrder {
    pub property: PropertyReference,
    pub direction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyFilter {
    pub property: PropertyReference,
    pub op: String,
    pub value: Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeFilter {
    pub op: String,
    pub filters: Vec<Filter>,
}

/// Modelled as an optional-fields "oneof", the same shape the real wire
/// protocol uses for its tagged unions.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Filter {
    #[serde(
        rename = "compositeFilter",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub composite_filter: Option<Box<CompositeFilter>>,
    #[serde(
        rename = "propertyFilter",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub property_filter: Option<PropertyFilter>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Query {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kind: Vec<KindExpression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<PropertyOrder>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projection: Vec<Projection>,
    #[serde(
        rename = "distinctOn",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub distinct_on: Vec<PropertyReference>,
    #[serde(
        rename = "startCursor",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub start_cursor: Option<String>,
    #[serde(
        rename = "endCursor",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub end_cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i32>,
}

// ---- Transaction / read options ------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReadOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    #[serde(
        rename = "readConsistency",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub read_consistency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReadWrite {
    #[serde(
        rename = "previousTransaction",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub previous_transaction: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReadOnly {}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TransactionOptions {
    #[serde(
        rename = "readWrite",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub read_write: Option<ReadWrite>,
    #[serde(
        rename = "readOnly",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub read_only: Option<ReadOnly>,
}

// ---- Mutations -----------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Mutation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upsert: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<Json>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MutationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
    #[serde(default, rename = "conflictDetected")]
    pub conflict_detected: bool,
}

// ---- Request / response envelopes ---------------------------------------

#[derive(Debug, Clone, Serialize, Default)]
pub struct CommitRequest {
    pub mode: String,
    pub mutations: Vec<Mutation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CommitResponse {
    #[serde(default, rename = "mutationResults")]
    pub mutation_results: Vec<MutationResult>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct LookupRequest {
    pub keys: Vec<Key>,
    #[serde(rename = "readOptions", skip_serializing_if = "Option::is_none")]
    pub read_options: Option<ReadOptions>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EntityResult {
    pub entity: Json,
    /// Resumes immediately after this specific result, independent of the
    /// batch's overall `endCursor`.
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LookupResponse {
    #[serde(default)]
    pub found: Vec<EntityResult>,
    #[serde(default)]
    pub missing: Vec<EntityResult>,
    #[serde(default)]
    pub deferred: Vec<Key>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct RunQueryRequest {
    pub query: Query,
    #[serde(rename = "partitionId", skip_serializing_if = "Option::is_none")]
    pub partition_id: Option<PartitionId>,
    #[serde(rename = "readOptions", skip_serializing_if = "Option::is_none")]
    pub read_options: Option<ReadOptions>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct QueryResultBatch {
    #[serde(default, rename = "entityResults")]
    pub entity_results: Vec<EntityResult>,
    #[serde(default, rename = "endCursor")]
    pub end_cursor: Option<String>,
    #[serde(default, rename = "moreResults")]
    pub more_results: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RunQueryResponse {
    pub batch: QueryResultBatch,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct AllocateIdsRequest {
    pub keys: Vec<Key>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AllocateIdsResponse {
    #[serde(default)]
    pub keys: Vec<Key>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ReserveIdsRequest {
    pub keys: Vec<Key>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReserveIdsResponse {}

#[derive(Debug, Clone, Serialize, Default)]
pub struct BeginTransactionRequest {
    #[serde(rename = "transactionOptions", skip_serializing_if = "Option::is_none")]
    pub transaction_options: Option<TransactionOptions>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BeginTransactionResponse {
    pub transaction: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct RollbackRequest {
    pub transaction: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RollbackResponse {}
