//! Public API facade for burrow.
//!
//! Burrow is an embeddable row/table store: named columns are atomized into
//! [`Token`]s, rows live in a store-owned arena addressed by [`Oid`], and
//! tables hold ordered (optionally sorted and indexed) memberships of those
//! rows. Long-running operations (open, sort, index build, search, commit,
//! import) return a [`Thumb`] that the caller polls; everything else is
//! synchronous.
//!
//! ```
//! use burrow::{Blob, Env, Store};
//!
//! # fn main() -> burrow::Result<()> {
//! let env = Env::new();
//! let store = Store::in_memory();
//!
//! let person = store.intern(&env, "person")?;
//! let contacts = store.intern(&env, "contacts")?;
//! let name = store.intern(&env, "name")?;
//!
//! let table = store.new_table(&env, person, contacts, true)?;
//! let row = table.new_row(&env, None)?;
//! row.add_column(&env, name, Blob::text("ada"))?;
//!
//! table.sort_by_column(&env, Some(name))?.finish(&env)?;
//! let range = table.search_one_sorted_column(&env, name, &Blob::text("a"))?;
//! assert_eq!(range, 0..1);
//! # Ok(())
//! # }
//! ```

pub use burrow_core::{
    Blob, BlobCmp, BlobForm, Cell, Collection, CommitLevel, Env, Oid, Port, PortTableCursor,
    Progress, Row, RowBuf, RowCellCursor, SearchHit, SearchHits, Seed, Severity, Store, Table,
    TableRowCursor, Thumb, Token, default_cmp,
};
pub use burrow_error::{BurrowError, Result};
