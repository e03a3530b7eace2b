//! A client for a hosted REST-over-HTTPS document/entity store in the
//! Google Cloud Datastore style: entity codec, authenticated HTTP
//! transport with retry, batched operations, declarative queries, a
//! cursor-driven iterator, and a transaction coordinator with
//! optimistic-concurrency retry.
//!
//! Library code never installs a global `tracing` subscriber; the
//! embedding application owns that.

pub mod auth;
mod backoff;
pub mod client;
pub mod entity;
pub mod error;
pub mod iterator;
pub mod key;
pub mod operations;
pub mod query;
pub mod transaction;
pub mod transport;
pub mod value;
mod wire;

pub use auth::{StaticTokenSource, TokenSource};
pub use client::{Client, ClientConfig};
pub use entity::{Entity, FromEntity, IntoEntity, Property};
pub use error::{Error, MultiError, ValueError};
pub use iterator::QueryIterator;
pub use key::{Identifier, Key, PathElement};
pub use operations::MutationOp;
pub use query::{Direction, FilterOp, Query, KEY_PROPERTY};
pub use transaction::{PendingKey, Transaction, TransactionMode, TransactionOptions};
pub use value::{Bytes, FromValue, IntoValue, IsZero, Value};

pub use datastore_derive::StoreEntity;
