//! Primary error type for burrow operations.
//!
//! Structured variants for the conditions the engine can actually report,
//! with classification helpers so embedders can route them. Lookups that
//! merely find nothing return `Option`, not an error; everything here is
//! either protocol misuse, staleness, identity violation, or I/O.

use std::path::PathBuf;

use burrow_types::{Oid, Seed, Severity, Token};
use thiserror::Error;

/// Primary error type for burrow operations.
#[derive(Error, Debug)]
pub enum BurrowError {
    // === Identity ===
    /// A caller-supplied oid already names a row in its scope.
    #[error("oid collision: row {oid} already exists")]
    OidCollision { oid: Oid },

    /// A row scope is in caller-assigned-id mode and no id was supplied.
    #[error("row scope {scope} requires caller-assigned ids")]
    CallerAssignedScope { scope: Token },

    /// An oid named a row the store does not hold.
    #[error("no such row: {oid}")]
    NoSuchRow { oid: Oid },

    /// An oid named a table the store does not hold.
    #[error("no such table: {oid}")]
    NoSuchTable { oid: Oid },

    // === Protocol misuse ===
    /// A second durable commit was started while one is in flight.
    #[error("a commit is already in flight for this store")]
    CommitInFlight,

    /// The store is read-only (a port, or a commit is in flight).
    #[error("store is read-only: {reason}")]
    StoreReadOnly { reason: &'static str },

    /// `do_more` was called on a thumb that already finished.
    #[error("thumb already finished")]
    ThumbFinished,

    /// `do_more` was called on a cancelled or failed thumb.
    #[error("thumb is broken")]
    ThumbBroken,

    /// A sorted-column search was issued against a column that is not the
    /// active sort column.
    #[error("table is not sorted on column {column}")]
    NotSorted { column: Token },

    // === Staleness / lifetime ===
    /// A strict cursor observed a seed change in its collection.
    #[error("cursor is stale: snapshot seed {snapshot}, collection seed {current}")]
    StaleCursor { snapshot: Seed, current: Seed },

    /// A handle outlived its store.
    #[error("store has been closed")]
    StoreClosed,

    // === Durability ===
    /// File I/O error during commit or open.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot image could not be decoded.
    #[error("snapshot is malformed: '{path}': {detail}")]
    SnapshotCorrupt { path: PathBuf, detail: String },

    // === Internal ===
    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl BurrowError {
    /// Severity reported to the [`burrow_types::Env`] hook for this error.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        Severity::Error
    }

    /// Whether this error is the caller holding the protocol wrong, as
    /// opposed to an environmental failure.
    #[must_use]
    pub const fn is_protocol_misuse(&self) -> bool {
        matches!(
            self,
            Self::CommitInFlight
                | Self::StoreReadOnly { .. }
                | Self::ThumbFinished
                | Self::ThumbBroken
                | Self::NotSorted { .. }
                | Self::CallerAssignedScope { .. }
        )
    }

    /// Whether retrying the same call later can succeed without the caller
    /// changing anything (commit in flight, stale cursor after resync).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CommitInFlight | Self::StoreReadOnly { .. } | Self::StaleCursor { .. }
        )
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a snapshot-corrupt error.
    pub fn corrupt(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::SnapshotCorrupt {
            path: path.into(),
            detail: detail.into(),
        }
    }
}

/// Result type alias using `BurrowError`.
pub type Result<T> = std::result::Result<T, BurrowError>;
