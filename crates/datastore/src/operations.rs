//! The operation engine: request construction, batching to respect
//! server limits, and per-element error aggregation, built on top of the
//! HTTP transport and the entity/key codecs.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::TokenSource;
use crate::entity::Entity;
use crate::error::{Error, MultiError};
use crate::key::Key;
use crate::query::Query;
use crate::transport::Transport;
use crate::wire;

pub const MAX_LOOKUP_KEYS: usize = 1000;
pub const MAX_MUTATIONS: usize = 500;
pub const MAX_ALLOCATE: usize = 500;
pub const MAX_RESERVE: usize = 500;

/// Bounds the number of deferred-key follow-up rounds a single lookup call
/// will perform before giving up on the still-deferred keys.
const MAX_DEFERRED_ROUNDS: u32 = 5;

/// One typed mutation to apply as part of a commit.
#[derive(Debug, Clone)]
pub enum MutationOp {
    Insert(Entity),
    Update(Entity),
    Upsert(Entity),
    Delete(Key),
}

impl MutationOp {
    pub fn key(&self) -> Option<Key> {
        match self {
            MutationOp::Insert(e) | MutationOp::Update(e) | MutationOp::Upsert(e) => {
                e.key().cloned()
            }
            MutationOp::Delete(k) => Some(k.clone()),
        }
    }

    pub(crate) fn to_wire(&self) -> Result<wire::Mutation, Error> {
        Ok(match self {
            MutationOp::Insert(e) => wire::Mutation {
                insert: Some(wire::entity_to_json(e)?),
                ..Default::default()
            },
            MutationOp::Update(e) => wire::Mutation {
                update: Some(wire::entity_to_json(e)?),
                ..Default::default()
            },
            MutationOp::Upsert(e) => wire::Mutation {
                upsert: Some(wire::entity_to_json(e)?),
                ..Default::default()
            },
            MutationOp::Delete(k) => {
                if !k.is_complete() {
                    return Err(Error::invalid_key("key is incomplete, Delete requires a complete key"));
                }
                wire::Mutation {
                    delete: Some(
                        serde_json::to_value(wire::Key::from(k))
                            .expect("key wire shape always serialises"),
                    ),
                    ..Default::default()
                }
            }
        })
    }
}

/// Wraps the transport and a credential source, exposing the Lookup / Commit
/// / RunQuery / AllocateIds / ReserveIds / BeginTransaction / Rollback
/// operations that the client facade and the transaction coordinator
/// both build on.
#[derive(Debug, Clone)]
pub struct Engine {
    transport: Transport,
    auth: Arc<dyn TokenSource>,
}

impl Engine {
    pub fn new(transport: Transport, auth: Arc<dyn TokenSource>) -> Self {
        Engine { transport, auth }
    }

    // ---- Lookup ----------------------------------------------------------

    pub async fn lookup_one(
        &self,
        key: &Key,
        transaction: Option<&str>,
        cancellation: &CancellationToken,
    ) -> Result<Entity, Error> {
        let (mut results, mut errors) = self
            .lookup(std::slice::from_ref(key), transaction, cancellation)
            .await?;
        if let Some(err) = errors.0.remove(0) {
            return Err(err);
        }
        results.remove(0).ok_or(Error::NoSuchEntity)
    }

    pub async fn lookup(
        &self,
        keys: &[Key],
        transaction: Option<&str>,
        cancellation: &CancellationToken,
    ) -> Result<(Vec<Option<Entity>>, MultiError), Error> {
        let mut results: Vec<Option<Entity>> = vec![None; keys.len()];
        let mut errors = MultiError::new(vec![None; keys.len()]);

        // Incomplete keys can never name an existing entity; reject them
        // client-side rather than sending them to Lookup.
        let mut complete_keys = Vec::with_capacity(keys.len());
        let mut complete_indices = Vec::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            if key.is_complete() {
                complete_keys.push(key.clone());
                complete_indices.push(i);
            } else {
                errors.set(i, Error::invalid_key("key is incomplete, Get requires a complete key"));
            }
        }

        for (chunk, local_indices) in chunked_with_indices(&complete_keys, MAX_LOOKUP_KEYS) {
            let indices: Vec<usize> = local_indices.iter().map(|&li| complete_indices[li]).collect();
            self.lookup_chunk_into(
                &chunk,
                &indices,
                &mut results,
                &mut errors,
                transaction,
                cancellation,
            )
            .await?;
        }

        Ok((results, errors))
    }

    async fn lookup_chunk_into(
        &self,
        keys: &[Key],
        indices: &[usize],
        results: &mut [Option<Entity>],
        errors: &mut MultiError,
        transaction: Option<&str>,
        cancellation: &CancellationToken,
    ) -> Result<(), Error> {
        let by_encoded: HashMap<String, usize> = indices
            .iter()
            .zip(keys.iter())
            .map(|(&idx, k)| (k.to_canonical_string(), idx))
            .collect();

        let mut pending = keys.to_vec();
        for _ in 0..MAX_DEFERRED_ROUNDS {
            if pending.is_empty() {
                return Ok(());
            }
            let resp = self.lookup_raw(&pending, transaction, cancellation).await?;

            for er in &resp.found {
                let entity = wire::entity_from_json(&er.entity)?;
                if let Some(key) = entity.key() {
                    if let Some(&idx) = by_encoded.get(&key.to_canonical_string()) {
                        results[idx] = Some(entity.clone());
                    }
                }
            }
            for er in &resp.missing {
                let entity = wire::entity_from_json(&er.entity)?;
                if let Some(key) = entity.key() {
                    if let Some(&idx) = by_encoded.get(&key.to_canonical_string()) {
                        errors.set(idx, Error::NoSuchEntity);
                    }
                }
            }

            pending = resp
                .deferred
                .into_iter()
                .map(Key::try_from)
                .collect::<Result<Vec<_>, _>>()?;
        }

        for key in &pending {
            if let Some(&idx) = by_encoded.get(&key.to_canonical_string()) {
                errors.set(idx, Error::protocol("lookup deferred past retry budget"));
            }
        }
        Ok(())
    }

    async fn lookup_raw(
        &self,
        keys: &[Key],
        transaction: Option<&str>,
        cancellation: &CancellationToken,
    ) -> Result<wire::LookupResponse, Error> {
        let req = wire::LookupRequest {
            keys: keys.iter().map(wire::Key::from).collect(),
            read_options: transaction.map(|t| wire::ReadOptions {
                transaction: Some(t.to_string()),
                read_consistency: None,
            }),
        };
        self.transport
            .call("lookup", &req, self.auth.as_ref(), cancellation)
            .await
    }

    // ---- Commit / mutations -----------------------------------------------

    pub async fn put(&self, entity: &Entity, cancellation: &CancellationToken) -> Result<Key, Error> {
        let ops = [MutationOp::Upsert(entity.clone())];
        let (mut keys, mut errors) = self.mutate_many(&ops, cancellation).await?;
        if let Some(err) = errors.0.remove(0) {
            return Err(err);
        }
        keys.remove(0)
            .ok_or_else(|| Error::protocol("commit response carried no key"))
    }

    pub async fn put_multi(
        &self,
        entities: &[Entity],
        cancellation: &CancellationToken,
    ) -> Result<(Vec<Option<Key>>, MultiError), Error> {
        let ops: Vec<MutationOp> = entities.iter().cloned().map(MutationOp::Upsert).collect();
        self.mutate_many(&ops, cancellation).await
    }

    pub async fn delete(&self, key: &Key, cancellation: &CancellationToken) -> Result<(), Error> {
        let ops = [MutationOp::Delete(key.clone())];
        let (_, mut errors) = self.mutate_many(&ops, cancellation).await?;
        if let Some(err) = errors.0.remove(0) {
            return Err(err);
        }
        Ok(())
    }

    pub async fn delete_multi(
        &self,
        keys: &[Key],
        cancellation: &CancellationToken,
    ) -> Result<MultiError, Error> {
        let ops: Vec<MutationOp> = keys.iter().cloned().map(MutationOp::Delete).collect();
        let (_, errors) = self.mutate_many(&ops, cancellation).await?;
        Ok(errors)
    }

    /// The generic heterogeneous-mutation operation:
    /// non-transactional, immediate commit of a mix of Insert/Update/Upsert/
    /// Delete, with per-element encode errors reported via `MultiError` and
    /// whole-request failures short-circuiting the batch.
    pub async fn mutate(
        &self,
        ops: &[MutationOp],
        cancellation: &CancellationToken,
    ) -> Result<(Vec<Option<Key>>, MultiError), Error> {
        self.mutate_many(ops, cancellation).await
    }

    async fn mutate_many(
        &self,
        ops: &[MutationOp],
        cancellation: &CancellationToken,
    ) -> Result<(Vec<Option<Key>>, MultiError), Error> {
        let mut results: Vec<Option<Key>> = vec![None; ops.len()];
        let mut errors = MultiError::new(vec![None; ops.len()]);

        let mut wire_muts = Vec::with_capacity(ops.len());
        let mut global_indices = Vec::with_capacity(ops.len());
        let mut echo_keys = Vec::with_capacity(ops.len());
        for (i, op) in ops.iter().enumerate() {
            match op.to_wire() {
                Ok(w) => {
                    wire_muts.push(w);
                    global_indices.push(i);
                    echo_keys.push(op.key());
                }
                Err(e) => errors.set(i, e),
            }
        }

        let mut offset = 0;
        while offset < wire_muts.len() {
            let end = (offset + MAX_MUTATIONS).min(wire_muts.len());
            let chunk = wire_muts[offset..end].to_vec();
            let resp = self
                .commit(chunk, "NON_TRANSACTIONAL", None, cancellation)
                .await?;
            for (pos, mr) in resp.mutation_results.iter().enumerate() {
                let global = global_indices[offset + pos];
                let resolved = match &mr.key {
                    Some(wk) => Some(Key::try_from(wk.clone())?),
                    None => echo_keys[offset + pos].clone(),
                };
                results[global] = resolved;
            }
            offset = end;
        }

        Ok((results, errors))
    }

    /// The raw Commit call, reused directly by the transaction
    /// coordinator for its single accumulated-mutations commit. Server-
    /// reported conflicts are reclassified as [`Error::ConcurrentTransaction`].
    pub async fn commit(
        &self,
        mutations: Vec<wire::Mutation>,
        mode: &str,
        transaction: Option<String>,
        cancellation: &CancellationToken,
    ) -> Result<wire::CommitResponse, Error> {
        let req = wire::CommitRequest {
            mode: mode.to_string(),
            mutations,
            transaction,
        };
        self.transport
            .call("commit", &req, self.auth.as_ref(), cancellation)
            .await
            .map_err(classify_commit_error)
    }

    // ---- Ids ---------------------------------------------------------------

    pub async fn allocate_ids(
        &self,
        keys: &[Key],
        cancellation: &CancellationToken,
    ) -> Result<Vec<Key>, Error> {
        let mut out = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(MAX_ALLOCATE) {
            let req = wire::AllocateIdsRequest {
                keys: chunk.iter().map(wire::Key::from).collect(),
            };
            let resp: wire::AllocateIdsResponse = self
                .transport
                .call("allocateIds", &req, self.auth.as_ref(), cancellation)
                .await?;
            for wk in resp.keys {
                out.push(Key::try_from(wk)?);
            }
        }
        Ok(out)
    }

    pub async fn reserve_ids(
        &self,
        keys: &[Key],
        cancellation: &CancellationToken,
    ) -> Result<(), Error> {
        for chunk in keys.chunks(MAX_RESERVE) {
            let req = wire::ReserveIdsRequest {
                keys: chunk.iter().map(wire::Key::from).collect(),
            };
            let _resp: wire::ReserveIdsResponse = self
                .transport
                .call("reserveIds", &req, self.auth.as_ref(), cancellation)
                .await?;
        }
        Ok(())
    }

    // ---- Query / transaction lifecycle -------------------------------------

    pub async fn run_query(
        &self,
        query: &Query,
        transaction: Option<&str>,
        cancellation: &CancellationToken,
    ) -> Result<wire::RunQueryResponse, Error> {
        let req = wire::RunQueryRequest {
            query: query.to_wire()?,
            partition_id: query.namespace_ref().map(|ns| wire::PartitionId {
                namespace_id: Some(ns.to_string()),
            }),
            read_options: transaction.map(|t| wire::ReadOptions {
                transaction: Some(t.to_string()),
                read_consistency: None,
            }),
        };
        self.transport
            .call("runQuery", &req, self.auth.as_ref(), cancellation)
            .await
    }

    pub async fn begin_transaction(
        &self,
        options: wire::TransactionOptions,
        cancellation: &CancellationToken,
    ) -> Result<String, Error> {
        let req = wire::BeginTransactionRequest {
            transaction_options: Some(options),
        };
        let resp: wire::BeginTransactionResponse = self
            .transport
            .call("beginTransaction", &req, self.auth.as_ref(), cancellation)
            .await?;
        Ok(resp.transaction)
    }

    pub async fn rollback(
        &self,
        transaction: &str,
        cancellation: &CancellationToken,
    ) -> Result<(), Error> {
        let req = wire::RollbackRequest {
            transaction: transaction.to_string(),
        };
        let _resp: wire::RollbackResponse = self
            .transport
            .call("rollback", &req, self.auth.as_ref(), cancellation)
            .await?;
        Ok(())
    }
}

fn classify_commit_error(err: Error) -> Error {
    match &err {
        Error::ServerError { status, body } if *status == 409 || body.contains("ABORTED") => {
            Error::ConcurrentTransaction {
                detail: body.clone(),
            }
        }
        _ => err,
    }
}

/// Splits `items` into chunks of at most `size`, pairing each chunk with the
/// original indices of its elements so batch callers can scatter results
/// back to the right position.
fn chunked_with_indices<T: Clone>(items: &[T], size: usize) -> Vec<(Vec<T>, Vec<usize>)> {
    items
        .chunks(size)
        .scan(0usize, |offset, chunk| {
            let indices: Vec<usize> = (*offset..*offset + chunk.len()).collect();
            *offset += chunk.len();
            Some((chunk.to_vec(), indices))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_preserves_order_and_indices() {
        let items: Vec<i32> = (0..1250).collect();
        let chunks = chunked_with_indices(&items, 1000);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].0.len(), 1000);
        assert_eq!(chunks[1].0.len(), 250);
        assert_eq!(chunks[1].1[0], 1000);
    }
}
