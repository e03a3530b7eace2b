//! Error taxonomy for the client.
//!
//! One flat `thiserror`-derived enum of `kind`s, `#[error(...)]` messages,
//! and `#[from]` conversions for the transport/serde causes that actually
//! occur at the call sites.

use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid key: {detail}")]
    InvalidKey { detail: String },

    #[error("invalid entity type: {detail}")]
    InvalidEntityType { detail: String },

    #[error("no such entity")]
    NoSuchEntity,

    #[error("concurrent transaction: commit was aborted by the server: {detail}")]
    ConcurrentTransaction { detail: String },

    #[error("invalid transaction state: {detail}")]
    InvalidTransactionState { detail: String },

    #[error("transaction failed after {attempts} attempts: {source}")]
    TransactionRetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("transport error after exhausting retries: {source}")]
    TransportError {
        #[source]
        source: reqwest::Error,
    },

    #[error("server error ({status}): {body}")]
    ServerError { status: u16, body: String },

    #[error("auth error: {detail}")]
    AuthError { detail: String },

    #[error("operation canceled")]
    Canceled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    #[error("configuration error: {detail}")]
    ConfigurationError { detail: String },

    #[error("malformed server response: {detail}")]
    Protocol { detail: String },

    /// Sentinel delivered by iterators when the result stream is exhausted.
    #[error("no more results")]
    Done,

    #[error("{0}")]
    Multi(#[from] MultiError),
}

impl Error {
    pub fn invalid_key(detail: impl Into<String>) -> Self {
        Error::InvalidKey {
            detail: detail.into(),
        }
    }

    pub fn invalid_entity_type(detail: impl Into<String>) -> Self {
        Error::InvalidEntityType {
            detail: detail.into(),
        }
    }

    pub fn invalid_transaction_state(detail: impl Into<String>) -> Self {
        Error::InvalidTransactionState {
            detail: detail.into(),
        }
    }

    pub fn protocol(detail: impl Into<String>) -> Self {
        Error::Protocol {
            detail: detail.into(),
        }
    }

    /// Whether this error represents a server-reported transaction conflict,
    /// the only category `RunInTransaction` retries.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::ConcurrentTransaction { .. })
    }
}

/// A value-level decode/encode failure, reported before it is known which
/// property name it belongs to. `StoreEntity`-derived code annotates these
/// with the property name and promotes them to [`Error::InvalidEntityType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueError(pub String);

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ValueError {}

impl ValueError {
    pub fn new(detail: impl Into<String>) -> Self {
        ValueError(detail.into())
    }
}

/// An index-aligned vector of optional errors returned by batch operations
///. `position[i]` is `None` iff element `i` succeeded.
#[derive(Debug, Default)]
pub struct MultiError(pub Vec<Option<Error>>);

impl MultiError {
    pub fn new(errors: Vec<Option<Error>>) -> Self {
        MultiError(errors)
    }

    /// Returns `Some(self)` if at least one element failed, otherwise `None` —
    /// batch calls surface a `MultiError` only when the batch wasn't a clean
    /// success.
    pub fn into_option(self) -> Option<Self> {
        if self.0.iter().any(Option::is_some) {
            Some(self)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Error> {
        self.0.get(index).and_then(|entry| entry.as_ref())
    }

    pub fn set(&mut self, index: usize, err: Error) {
        self.0[index] = Some(err);
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failures: Vec<(usize, &Error)> = self
            .0
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i, e)))
            .collect();

        match failures.split_first() {
            None => write!(f, "(0 errors)"),
            Some(((index, first), rest)) => {
                write!(f, "element {index}: {first}")?;
                if !rest.is_empty() {
                    write!(f, " (and {} other error(s))", rest.len())?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for MultiError {}
