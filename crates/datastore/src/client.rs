//! The client facade: construction options and the top-level CRUD,
//! batch, query, and transaction surface built on the operation engine.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::TokenSource;
use crate::entity::{Entity, FromEntity, IntoEntity};
use crate::error::{Error, MultiError};
use crate::iterator::QueryIterator;
use crate::key::Key;
use crate::operations::{Engine, MutationOp};
use crate::query::Query;
use crate::transaction::{run_in_transaction, Transaction, TransactionMode, TransactionOptions};

const DEFAULT_ENDPOINT: &str = "https://datastore.googleapis.com/v1/";

/// Construction options for [`Client`]: captured by value and
/// attached to the client instance, with no process-global configuration.
pub struct ClientConfig {
    pub endpoint: Option<Url>,
    pub database_id: Option<String>,
    pub auth_source: Arc<dyn TokenSource>,
    pub http_client: Option<reqwest::Client>,
    pub request_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(auth_source: Arc<dyn TokenSource>) -> Self {
        ClientConfig {
            endpoint: None,
            database_id: None,
            auth_source,
            http_client: None,
            request_timeout: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn with_database_id(mut self, database_id: impl Into<String>) -> Self {
        self.database_id = Some(database_id.into());
        self
    }

    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = Some(http_client);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// The top-level entry point: CRUD, batch, query, and transaction
/// operations over a single project/database.
#[derive(Debug, Clone)]
pub struct Client {
    engine: Engine,
}

impl Client {
    /// Builds a client from `config`, resolving the project id via the
    /// configured `TokenSource`.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let endpoint = match &config.endpoint {
            Some(url) => url.clone(),
            None => Url::parse(DEFAULT_ENDPOINT)
                .expect("default endpoint constant is a valid URL"),
        };
        let http = config.http_client.unwrap_or_default();
        let mut transport = crate::transport::Transport::new(http, endpoint, config.database_id);
        if let Some(timeout) = config.request_timeout {
            transport = transport.with_request_timeout(timeout);
        }
        let engine = Engine::new(transport, config.auth_source);
        Ok(Client { engine })
    }

    // ---- Single-entity CRUD -------------------------------------------------

    pub async fn get<T: FromEntity>(
        &self,
        key: &Key,
        dst: &mut T,
        cancellation: &CancellationToken,
    ) -> Result<(), Error> {
        let entity = self.engine.lookup_one(key, None, cancellation).await?;
        FromEntity::from_entity(&entity, dst)
    }

    pub async fn put<T: IntoEntity>(
        &self,
        key: &Key,
        record: &T,
        cancellation: &CancellationToken,
    ) -> Result<Key, Error> {
        let entity = record.into_entity()?.with_key(key.clone());
        self.engine.put(&entity, cancellation).await
    }

    pub async fn delete(&self, key: &Key, cancellation: &CancellationToken) -> Result<(), Error> {
        self.engine.delete(key, cancellation).await
    }

    // ---- Batch CRUD ----------------------------------------------------------

    /// Looks up `keys`, decoding each found entity into the matching slot of
    /// `dsts`. Per-element failures (not found, decode errors) surface as
    /// `Error::Multi`; whole-request failures (transport, auth, malformed
    /// response) short-circuit and surface directly.
    pub async fn get_multi<T: FromEntity>(
        &self,
        keys: &[Key],
        dsts: &mut [T],
        cancellation: &CancellationToken,
    ) -> Result<(), Error> {
        assert_eq!(keys.len(), dsts.len(), "keys and destinations must be the same length");
        let (entities, mut errors) = self.engine.lookup(keys, None, cancellation).await?;
        for (i, entity) in entities.into_iter().enumerate() {
            match entity {
                Some(entity) => {
                    if let Err(e) = FromEntity::from_entity(&entity, &mut dsts[i]) {
                        errors.set(i, e);
                    }
                }
                None => {
                    if errors.get(i).is_none() {
                        errors.set(i, Error::NoSuchEntity);
                    }
                }
            }
        }
        match errors.into_option() {
            Some(errors) => Err(Error::Multi(errors)),
            None => Ok(()),
        }
    }

    pub async fn put_multi<T: IntoEntity>(
        &self,
        keys: &[Key],
        records: &[T],
        cancellation: &CancellationToken,
    ) -> Result<Vec<Key>, Error> {
        assert_eq!(keys.len(), records.len(), "keys and records must be the same length");
        let mut entities = Vec::with_capacity(keys.len());
        let mut encode_errors = MultiError::new(vec![None; keys.len()]);
        for (i, (key, record)) in keys.iter().zip(records.iter()).enumerate() {
            match record.into_entity() {
                Ok(entity) => entities.push(entity.with_key(key.clone())),
                Err(e) => {
                    encode_errors.set(i, e);
                    entities.push(Entity::empty().with_key(key.clone()));
                }
            }
        }
        if let Some(errors) = encode_errors.into_option() {
            return Err(Error::Multi(errors));
        }

        let (keys_out, errors) = self.engine.put_multi(&entities, cancellation).await?;
        if let Some(errors) = errors.into_option() {
            return Err(Error::Multi(errors));
        }
        keys_out
            .into_iter()
            .map(|k| k.ok_or_else(|| Error::protocol("commit response carried no key")))
            .collect()
    }

    pub async fn delete_multi(
        &self,
        keys: &[Key],
        cancellation: &CancellationToken,
    ) -> Result<(), Error> {
        let errors = self.engine.delete_multi(keys, cancellation).await?;
        match errors.into_option() {
            Some(errors) => Err(Error::Multi(errors)),
            None => Ok(()),
        }
    }

    /// The generic heterogeneous-mutation operation:
    /// applies a mix of inserts/updates/upserts/deletes in one commit and
    /// returns the resolved key for every mutation that carries one.
    pub async fn mutate(
        &self,
        ops: &[MutationOp],
        cancellation: &CancellationToken,
    ) -> Result<Vec<Option<Key>>, Error> {
        let (keys, errors) = self.engine.mutate(ops, cancellation).await?;
        match errors.into_option() {
            Some(errors) => Err(Error::Multi(errors)),
            None => Ok(keys),
        }
    }

    // ---- Ids -------------------------------------------------------------

    pub async fn allocate_ids(
        &self,
        keys: &[Key],
        cancellation: &CancellationToken,
    ) -> Result<Vec<Key>, Error> {
        self.engine.allocate_ids(keys, cancellation).await
    }

    pub async fn reserve_ids(
        &self,
        keys: &[Key],
        cancellation: &CancellationToken,
    ) -> Result<(), Error> {
        self.engine.reserve_ids(keys, cancellation).await
    }

    // ---- Query -------------------------------------------------------------

    /// Starts a lazily-paginated, cursor-driven iteration over `query`.
    /// The iterator issues its first `RunQuery` call on the first call to
    /// `next`.
    pub fn run(&self, query: Query) -> QueryIterator<'_> {
        QueryIterator::new(&self.engine, query, None)
    }

    // ---- Transactions --------------------------------------------------------

    /// Begins a transaction directly; the caller is responsible for
    /// eventually calling `commit` or `rollback` on it. Prefer
    /// [`Client::run_in_transaction`] unless manual control is required.
    pub async fn new_transaction(
        &self,
        mode: TransactionMode,
        cancellation: &CancellationToken,
    ) -> Result<Transaction<'_>, Error> {
        Transaction::begin(&self.engine, mode, None, cancellation).await
    }

    /// Runs `f` inside a transaction, retrying on server-reported conflicts
    /// up to `opts.max_attempts` times.
    pub async fn run_in_transaction<F, Fut, T>(
        &self,
        opts: TransactionOptions,
        cancellation: &CancellationToken,
        f: F,
    ) -> Result<T, Error>
    where
        F: FnMut(&mut Transaction<'_>) -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        run_in_transaction(&self.engine, opts, cancellation, f).await
    }
}
