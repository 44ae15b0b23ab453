//! Cursors over collections.
//!
//! Three collections expose the same protocol: a row's cells, a table's
//! member rows, and a port's table directory. Each cursor snapshots the
//! collection's seed when it first observes it. By default a cursor is
//! self-healing: on a seed mismatch it relocates by the identity of the last
//! item it yielded (the item after it comes next; if that item is gone, the
//! cursor steps back one position) and adopts the new seed. A strict cursor
//! (`set_fail_on_seed_out_of_sync(true)`) errors with `StaleCursor` instead.
//!
//! Value overwrites never move a seed, so cursors survive them without any
//! resync at all.

use burrow_error::{BurrowError, Result};
use burrow_types::{Env, Oid, Seed, Token};

use crate::raise;
use crate::row::{Cell, Row};
use crate::store::{Port, Store, WeakShared, upgrade};
use crate::table::Table;

/// Anything a cursor can walk: a counted, seed-versioned collection.
pub trait Collection {
    /// Current item count.
    fn count(&self, env: &Env) -> Result<usize>;
    /// Membership/order version counter.
    fn seed(&self, env: &Env) -> Result<Seed>;
}

impl Collection for Row {
    fn count(&self, env: &Env) -> Result<usize> {
        Row::count(self, env)
    }

    fn seed(&self, env: &Env) -> Result<Seed> {
        Row::seed(self, env)
    }
}

impl Collection for Table {
    fn count(&self, env: &Env) -> Result<usize> {
        Table::count(self, env)
    }

    fn seed(&self, env: &Env) -> Result<Seed> {
        Table::seed(self, env)
    }
}

// ---------------------------------------------------------------------------
// Shared position/staleness bookkeeping
// ---------------------------------------------------------------------------

/// Position, snapshot seed, and last-yielded identity of one cursor. `K` is
/// the identity type of the items (column token, row oid, table oid).
#[derive(Debug)]
struct CursorCore<K> {
    seed: Option<Seed>,
    pos: usize,
    last: Option<K>,
    strict: bool,
}

impl<K: Copy> CursorCore<K> {
    fn new() -> Self {
        Self {
            seed: None,
            pos: 0,
            last: None,
            strict: false,
        }
    }

    /// Reconcile with the collection's current seed before reading.
    ///
    /// `locate` maps the last-yielded identity to its current position, if it
    /// is still a member.
    fn sync(&mut self, current: Seed, locate: impl FnOnce(K) -> Option<usize>) -> Result<()> {
        match self.seed {
            None => self.seed = Some(current),
            Some(snapshot) if snapshot == current => {}
            Some(snapshot) => {
                if self.strict {
                    return Err(BurrowError::StaleCursor { snapshot, current });
                }
                self.pos = match self.last.and_then(locate) {
                    Some(at) => at + 1,
                    // The last item was removed; step back so the item that
                    // slid into its place is not skipped.
                    None => self.pos.saturating_sub(1),
                };
                self.seed = Some(current);
            }
        }
        Ok(())
    }

    fn advance(&mut self, key: K) {
        self.last = Some(key);
        self.pos += 1;
    }

    fn seek(&mut self, pos: usize) {
        self.pos = pos;
        self.last = None;
    }
}

// ---------------------------------------------------------------------------
// Row cell cursor
// ---------------------------------------------------------------------------

/// Walks a row's cells in their iteration order.
#[derive(Debug)]
pub struct RowCellCursor {
    store: WeakShared,
    row: Oid,
    core: CursorCore<Token>,
}

impl Row {
    /// Cursor over this row's cells.
    #[must_use]
    pub fn cell_cursor(&self) -> RowCellCursor {
        RowCellCursor {
            store: self.store.clone(),
            row: self.oid,
            core: CursorCore::new(),
        }
    }
}

impl RowCellCursor {
    /// Yield the next cell, or `None` when exhausted.
    pub fn next(&mut self, env: &Env) -> Result<Option<Cell>> {
        let shared = upgrade(env, &self.store)?;
        let inner = shared.read();
        let row = inner
            .rows
            .get(&self.row)
            .ok_or_else(|| raise(env, BurrowError::NoSuchRow { oid: self.row }))?;
        self.core
            .sync(row.seed, |column| {
                row.cells.iter().position(|c| c.column == column)
            })
            .map_err(|e| raise(env, e))?;
        let Some(cell) = row.cells.get(self.core.pos) else {
            return Ok(None);
        };
        let cell = cell.clone();
        self.core.advance(cell.column);
        Ok(Some(cell))
    }

    /// Current position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.core.pos
    }

    /// Jump to an absolute position; the next `next` yields the item there.
    pub fn seek(&mut self, pos: usize) {
        self.core.seek(pos);
    }

    /// Strict mode: error on a seed change instead of resynchronizing.
    pub fn set_fail_on_seed_out_of_sync(&mut self, strict: bool) {
        self.core.strict = strict;
    }
}

// ---------------------------------------------------------------------------
// Table row cursor
// ---------------------------------------------------------------------------

/// Walks a table's member rows in the table's current order.
#[derive(Debug)]
pub struct TableRowCursor {
    store: WeakShared,
    table: Oid,
    core: CursorCore<Oid>,
}

impl Table {
    /// Cursor over this table's member rows.
    #[must_use]
    pub fn row_cursor(&self) -> TableRowCursor {
        TableRowCursor {
            store: self.store.clone(),
            table: self.oid,
            core: CursorCore::new(),
        }
    }
}

impl TableRowCursor {
    /// Yield the next member row, or `None` when exhausted.
    pub fn next(&mut self, env: &Env) -> Result<Option<Row>> {
        let shared = upgrade(env, &self.store)?;
        let inner = shared.read();
        let table = inner.table_data(self.table).map_err(|e| raise(env, e))?;
        self.core
            .sync(table.seed, |oid| table.position_of(oid))
            .map_err(|e| raise(env, e))?;
        let Some(oid) = table.members.get(self.core.pos).copied() else {
            return Ok(None);
        };
        self.core.advance(oid);
        Ok(Some(Row {
            store: self.store.clone(),
            oid,
        }))
    }

    #[must_use]
    pub fn pos(&self) -> usize {
        self.core.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.core.seek(pos);
    }

    /// Strict mode: error on a seed change instead of resynchronizing.
    pub fn set_fail_on_seed_out_of_sync(&mut self, strict: bool) {
        self.core.strict = strict;
    }
}

// ---------------------------------------------------------------------------
// Directory cursor
// ---------------------------------------------------------------------------

/// Walks the tables matching a (scope, kind) filter in oid order. `None` in
/// either filter dimension is a wildcard across that dimension.
#[derive(Debug)]
pub struct PortTableCursor {
    store: WeakShared,
    scope: Option<Token>,
    kind: Option<Token>,
    core: CursorCore<Oid>,
}

impl PortTableCursor {
    pub(crate) fn new(store: WeakShared, scope: Option<Token>, kind: Option<Token>) -> Self {
        Self {
            store,
            scope,
            kind,
            core: CursorCore::new(),
        }
    }

    /// Yield the next matching table, or `None` when exhausted.
    pub fn next(&mut self, env: &Env) -> Result<Option<Table>> {
        let shared = upgrade(env, &self.store)?;
        let inner = shared.read();
        let matched = inner.tables_matching(self.scope, self.kind);
        self.core
            .sync(inner.dir_seed, |oid| {
                matched.iter().position(|m| *m == oid)
            })
            .map_err(|e| raise(env, e))?;
        let Some(oid) = matched.get(self.core.pos).copied() else {
            return Ok(None);
        };
        self.core.advance(oid);
        Ok(Some(Table {
            store: self.store.clone(),
            oid,
        }))
    }

    #[must_use]
    pub fn pos(&self) -> usize {
        self.core.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.core.seek(pos);
    }

    /// Strict mode: error on a seed change instead of resynchronizing.
    pub fn set_fail_on_seed_out_of_sync(&mut self, strict: bool) {
        self.core.strict = strict;
    }
}

// Directory count/seed, so callers can treat the filtered directory as a
// collection the way tables and rows are.
impl Store {
    /// Number of tables matching the filter.
    #[must_use]
    pub fn table_count(&self, scope: Option<Token>, kind: Option<Token>) -> usize {
        self.shared.read().tables_matching(scope, kind).len()
    }

    /// Directory version counter; moves when tables are created.
    #[must_use]
    pub fn directory_seed(&self) -> Seed {
        self.shared.read().dir_seed
    }
}

impl Port {
    /// Number of tables matching the filter.
    #[must_use]
    pub fn table_count(&self, scope: Option<Token>, kind: Option<Token>) -> usize {
        self.shared.read().tables_matching(scope, kind).len()
    }

    /// Directory version counter; moves when tables are created.
    #[must_use]
    pub fn directory_seed(&self) -> Seed {
        self.shared.read().dir_seed
    }
}
