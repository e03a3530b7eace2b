//! The transaction coordinator: begin/commit/rollback state machine,
//! client-side mutation accumulation, and conflict-retry.

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

use crate::backoff;
use crate::entity::Entity;
use crate::error::Error;
use crate::key::Key;
use crate::operations::{Engine, MutationOp};
use crate::wire;

/// Read-write (the default) accumulates mutations for a single commit;
/// read-only takes a snapshot and must not accumulate any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadWrite,
    ReadOnly,
}

impl Default for TransactionMode {
    fn default() -> Self {
        TransactionMode::ReadWrite
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Committed,
    RolledBack,
}

/// A key that resolves once its owning transaction commits.
/// Reading it before commit returns `None`; a caller that needs the
/// resolved key should read it only after `Transaction::commit` returns.
#[derive(Debug, Clone, Default)]
pub struct PendingKey(Arc<OnceLock<Key>>);

impl PendingKey {
    fn new() -> Self {
        PendingKey(Arc::new(OnceLock::new()))
    }

    fn resolve(&self, key: Key) {
        // Best-effort: a pending key is only ever resolved once, by the
        // transaction that created it.
        let _ = self.0.set(key);
    }

    pub fn key(&self) -> Option<&Key> {
        self.0.get()
    }
}

/// Options for [`run_in_transaction`].
#[derive(Debug, Clone, Copy)]
pub struct TransactionOptions {
    pub mode: TransactionMode,
    pub max_attempts: u32,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        TransactionOptions {
            mode: TransactionMode::ReadWrite,
            max_attempts: 3,
        }
    }
}

/// A single transaction attempt. Not safe for
/// concurrent use by multiple callers; the caller must serialise access.
#[derive(Debug)]
pub struct Transaction<'a> {
    engine: &'a Engine,
    id: String,
    mode: TransactionMode,
    state: State,
    pending: Vec<(MutationOp, PendingKey)>,
}

impl<'a> Transaction<'a> {
    /// Issues `BeginTransaction` and returns an open transaction handle.
    pub async fn begin(
        engine: &'a Engine,
        mode: TransactionMode,
        previous_transaction: Option<String>,
        cancellation: &CancellationToken,
    ) -> Result<Transaction<'a>, Error> {
        let options = match mode {
            TransactionMode::ReadWrite => wire::TransactionOptions {
                read_write: Some(wire::ReadWrite {
                    previous_transaction,
                }),
                read_only: None,
            },
            TransactionMode::ReadOnly => wire::TransactionOptions {
                read_write: None,
                read_only: Some(wire::ReadOnly {}),
            },
        };
        let id = engine.begin_transaction(options, cancellation).await?;
        tracing::debug!(transaction = %id, ?mode, "began transaction");
        Ok(Transaction {
            engine,
            id,
            mode,
            state: State::Open,
            pending: Vec::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Reads a single entity within this transaction's snapshot.
    pub async fn get(
        &self,
        key: &Key,
        cancellation: &CancellationToken,
    ) -> Result<Entity, Error> {
        self.require_open()?;
        self.engine.lookup_one(key, Some(&self.id), cancellation).await
    }

    /// Accumulates a mutation client-side; nothing is sent to the server
    /// until [`Transaction::commit`]. Returns a [`PendingKey`]
    /// that resolves once commit succeeds.
    pub fn mutate(&mut self, op: MutationOp) -> Result<PendingKey, Error> {
        self.require_open()?;
        let pending = PendingKey::new();
        self.pending.push((op, pending.clone()));
        Ok(pending)
    }

    /// Sends all accumulated mutations in a single `Commit` call with
    /// `mode=TRANSACTIONAL`, resolving pending keys from the
    /// server's mutation-result vector.
    pub async fn commit(mut self, cancellation: &CancellationToken) -> Result<(), Error> {
        self.require_open()?;
        if self.mode == TransactionMode::ReadOnly && !self.pending.is_empty() {
            return Err(Error::invalid_transaction_state(
                "read-only transactions cannot accumulate mutations",
            ));
        }

        let wire_mutations = self
            .pending
            .iter()
            .map(|(op, _)| op.to_wire())
            .collect::<Result<Vec<_>, _>>()?;

        let resp = self
            .engine
            .commit(
                wire_mutations,
                "TRANSACTIONAL",
                Some(self.id.clone()),
                cancellation,
            )
            .await?;

        for ((op, pending), result) in self.pending.iter().zip(resp.mutation_results.iter()) {
            let resolved = match &result.key {
                Some(wk) => Some(Key::try_from(wk.clone())?),
                None => op.key(),
            };
            if let Some(key) = resolved {
                pending.resolve(key);
            }
        }

        self.state = State::Committed;
        tracing::debug!(transaction = %self.id, "committed transaction");
        Ok(())
    }

    /// Discards accumulated mutations and informs the server.
    pub async fn rollback(mut self, cancellation: &CancellationToken) -> Result<(), Error> {
        self.require_open()?;
        self.engine.rollback(&self.id, cancellation).await?;
        self.pending.clear();
        self.state = State::RolledBack;
        Ok(())
    }

    fn require_open(&self) -> Result<(), Error> {
        match self.state {
            State::Open => Ok(()),
            State::Committed => Err(Error::invalid_transaction_state(
                "transaction already committed",
            )),
            State::RolledBack => Err(Error::invalid_transaction_state(
                "transaction already rolled back",
            )),
        }
    }
}

/// Wraps begin/commit with retry-on-conflict:
/// on a server-reported abort, the coordinator begins a fresh transaction
/// and re-invokes `f` up to `opts.max_attempts` times total.
pub async fn run_in_transaction<F, Fut, T>(
    engine: &Engine,
    opts: TransactionOptions,
    cancellation: &CancellationToken,
    mut f: F,
) -> Result<T, Error>
where
    F: FnMut(&mut Transaction<'_>) -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let retry_schedule = backoff::new(opts.max_attempts, backoff::DEFAULT_BASE, backoff::DEFAULT_CAP);
    let mut attempt: u32 = 0;
    let mut previous_transaction: Option<String> = None;

    loop {
        attempt += 1;
        if cancellation.is_cancelled() {
            return Err(Error::Canceled);
        }

        let mut txn =
            Transaction::begin(engine, opts.mode, previous_transaction.take(), cancellation).await?;

        let value = match f(&mut txn).await {
            Ok(value) => value,
            Err(err) => {
                // The closure's own errors are never retried; only a commit
                // conflict is. Best-effort rollback of the still-open
                // transaction before propagating.
                let _ = txn.rollback(cancellation).await;
                return Err(err);
            }
        };

        let txn_id = txn.id().to_string();
        match txn.commit(cancellation).await {
            Ok(()) => return Ok(value),
            Err(err) if err.is_conflict() => {
                tracing::warn!(transaction = %txn_id, attempt, "transaction aborted, retrying");
                if attempt >= opts.max_attempts {
                    return Err(Error::TransactionRetriesExhausted {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                let delay = retry_schedule.next(attempt).unwrap_or(backoff::DEFAULT_CAP);
                let jittered = backoff::jitter(delay, backoff::DEFAULT_JITTER);
                backoff::sleep_cancellable(jittered, cancellation).await?;
                previous_transaction = Some(txn_id);
            }
            Err(err) => return Err(err),
        }
    }
}
