//! Key identity: kind chain, optional name/id, optional namespace.

use std::fmt;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::wire;

/// The identifier of one path element: a name, a numeric id, or incomplete
/// (neither set — "assign one on write").
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Identifier {
    Name(String),
    Id(i64),
    Incomplete,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PathElement {
    pub kind: String,
    pub id: Identifier,
}

/// An ordered path of `(kind, identifier)` elements plus an optional
/// namespace. Value-typed and immutable after construction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    path: Vec<PathElement>,
    namespace: Option<String>,
}

impl Key {
    fn with_parent(kind: impl Into<String>, id: Identifier, parent: Option<&Key>) -> Self {
        let mut path = parent.map(|p| p.path.clone()).unwrap_or_default();
        path.push(PathElement {
            kind: kind.into(),
            id,
        });
        let namespace = parent.and_then(|p| p.namespace.clone());
        Key { path, namespace }
    }

    pub fn name(kind: impl Into<String>, name: impl Into<String>, parent: Option<&Key>) -> Self {
        Self::with_parent(kind, Identifier::Name(name.into()), parent)
    }

    pub fn id(kind: impl Into<String>, id: i64, parent: Option<&Key>) -> Self {
        Self::with_parent(kind, Identifier::Id(id), parent)
    }

    pub fn incomplete(kind: impl Into<String>, parent: Option<&Key>) -> Self {
        Self::with_parent(kind, Identifier::Incomplete, parent)
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn path(&self) -> &[PathElement] {
        &self.path
    }

    /// The final path element's kind, i.e. this key's own kind.
    pub fn kind(&self) -> &str {
        &self
            .path
            .last()
            .expect("a key's path always has at least one element")
            .kind
    }

    /// A key is complete iff no path element is incomplete.
    pub fn incomplete_tail(&self) -> bool {
        matches!(
            self.path.last().map(|e| &e.id),
            Some(Identifier::Incomplete)
        )
    }

    pub fn is_complete(&self) -> bool {
        self.path.iter().all(|e| e.id != Identifier::Incomplete)
    }

    pub fn parent(&self) -> Option<Key> {
        if self.path.len() <= 1 {
            return None;
        }
        Some(Key {
            path: self.path[..self.path.len() - 1].to_vec(),
            namespace: self.namespace.clone(),
        })
    }

    /// The canonical textual form `[namespace]/Kind,"name"/Kind,id`.
    pub fn to_canonical_string(&self) -> String {
        let mut out = String::new();
        if let Some(ns) = &self.namespace {
            out.push('[');
            out.push_str(ns);
            out.push(']');
        }
        for elem in &self.path {
            out.push('/');
            out.push_str(&elem.kind);
            out.push(',');
            match &elem.id {
                Identifier::Name(name) => {
                    out.push('"');
                    out.push_str(name);
                    out.push('"');
                }
                Identifier::Id(id) => out.push_str(&id.to_string()),
                Identifier::Incomplete => out.push('0'),
            }
        }
        out
    }

    /// Opaque URL-safe encoding: a JSON-then-base64 dump of the wire
    /// path+partition representation.
    pub fn encode(&self) -> String {
        let wire_key = wire::Key::from(self);
        let json = serde_json::to_vec(&wire_key).expect("key wire shape always serialises");
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(encoded: &str) -> Result<Self, Error> {
        let json = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| Error::invalid_key(format!("not valid base64: {e}")))?;
        let wire_key: wire::Key = serde_json::from_slice(&json)
            .map_err(|e| Error::invalid_key(format!("not a valid key encoding: {e}")))?;
        Key::try_from(wire_key)
    }
}

impl Identifier {
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Identifier::Incomplete)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical_string())
    }
}

// Keys round-trip through serde as their opaque encoded string, matching the
// entity codec's treatment of key-valued properties at the Rust-type level
// (the wire `keyValue` shape itself is handled in `wire::Key`).
impl Serialize for Key {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.encode().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        Key::decode(&encoded).map_err(serde::de::Error::custom)
    }
}
