//! Lazy, cursor-driven result stream over RunQuery.

use tokio_util::sync::CancellationToken;

use crate::entity::FromEntity;
use crate::error::Error;
use crate::key::Key;
use crate::operations::Engine;
use crate::query::Query;
use crate::wire;

/// Drives repeated `RunQuery` calls as its buffer empties, handing results
/// to the caller one at a time. Keys-only queries deliver entities with no
/// properties; callers pass `None` as the destination in that case.
pub struct QueryIterator<'a> {
    engine: &'a Engine,
    query: Query,
    transaction: Option<String>,
    buffer: std::vec::IntoIter<wire::EntityResult>,
    batch_cursor: Option<String>,
    end_cursor: Option<String>,
    last_delivered_cursor: Option<String>,
    done: bool,
}

impl<'a> QueryIterator<'a> {
    pub(crate) fn new(engine: &'a Engine, query: Query, transaction: Option<String>) -> Self {
        QueryIterator {
            engine,
            query,
            transaction,
            buffer: Vec::new().into_iter(),
            batch_cursor: None,
            end_cursor: None,
            last_delivered_cursor: None,
            done: false,
        }
    }

    /// Decodes the next result into `dst` (ignored for keys-only queries,
    /// where callers should pass `None`), returning its key, or
    /// [`Error::Done`] once the stream is exhausted.
    pub async fn next<T: FromEntity>(
        &mut self,
        dst: Option<&mut T>,
        cancellation: &CancellationToken,
    ) -> Result<Key, Error> {
        loop {
            if let Some(result) = self.buffer.next() {
                let entity = wire::entity_from_json(&result.entity)?;
                let key = entity
                    .key()
                    .cloned()
                    .ok_or_else(|| Error::protocol("query result entity carried no key"))?;
                if let Some(dst) = dst {
                    FromEntity::from_entity(&entity, dst)?;
                }
                self.last_delivered_cursor = result.cursor.or_else(|| self.batch_cursor.clone());
                return Ok(key);
            }

            if self.done {
                return Err(Error::Done);
            }

            self.fetch_next_batch(cancellation).await?;
        }
    }

    async fn fetch_next_batch(&mut self, cancellation: &CancellationToken) -> Result<(), Error> {
        let query = if let Some(cursor) = &self.end_cursor {
            self.query.clone().start_cursor(cursor.clone())
        } else {
            self.query.clone()
        };

        let resp = self
            .engine
            .run_query(&query, self.transaction.as_deref(), cancellation)
            .await?;

        self.end_cursor = resp.batch.end_cursor.clone();
        self.batch_cursor = resp.batch.end_cursor;
        self.done = resp.batch.more_results != "NOT_FINISHED";
        self.buffer = resp.batch.entity_results.into_iter();
        Ok(())
    }

    /// The cursor that, used as a start cursor on a new query, resumes
    /// immediately after the last delivered entity. Fails if no
    /// entity has been delivered yet.
    pub fn cursor(&self) -> Result<String, Error> {
        self.last_delivered_cursor
            .clone()
            .or_else(|| self.end_cursor.clone())
            .ok_or_else(|| Error::protocol("cursor requested before any result was delivered"))
    }
}
