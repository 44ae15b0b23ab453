//! Engine for the burrow row/table store.
//!
//! A [`Store`] owns a token namespace, an arena of rows, and a directory of
//! tables. Tables hold row memberships by [`Oid`]; rows hold cells keyed by
//! column token. Anything whose cost cannot be bounded synchronously (open,
//! sort, index build, multi-column search, commit, import) hands back a
//! [`Thumb`] the caller polls to completion.
//!
//! Every fallible call threads an explicit [`Env`] context carrying the
//! error/warning counters and the optional condition hook.

pub mod atom;
pub mod commit;
pub mod cursor;
pub mod row;
pub mod snapshot;
pub mod store;
pub mod table;
pub mod thumb;

pub use burrow_error::{BurrowError, Result};
pub use burrow_types::{Blob, BlobCmp, BlobForm, Env, Oid, Seed, Severity, Token, default_cmp};

pub use commit::CommitLevel;
pub use cursor::{Collection, PortTableCursor, RowCellCursor, TableRowCursor};
pub use row::{Cell, Row, RowBuf};
pub use store::{Port, Store};
pub use table::{SearchHit, SearchHits, Table};
pub use thumb::{Progress, Thumb};

use burrow_error::BurrowError as Error;

/// Record `err` on the env and hand it back, so error paths read as
/// `return Err(raise(env, ...))`.
pub(crate) fn raise(env: &Env, err: Error) -> Error {
    env.note_error(&err);
    err
}
