//! Tables: ordered, optionally sorted/indexed collections of row memberships.
//!
//! A table holds member oids only; the cell data lives in the store's row
//! arena. Two orders are maintained: `members` (the observable order, sorted
//! when a sort is active) and `insertion` (the base insertion/move order the
//! table returns to when the sort column is unset).
//!
//! Sorting is total and deterministic: rows missing the sort column order
//! first, then the comparator on the column value, then oid as tie-break.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;

use burrow_error::{BurrowError, Result};
use burrow_types::{Blob, BlobCmp, Env, Oid, Seed, Token, default_cmp, prefix_matches};
use tracing::debug;

use crate::raise;
use crate::row::{Row, RowData};
use crate::store::{StoreInner, WeakShared, try_upgrade, upgrade};
use crate::thumb::{Job, Step, Thumb};

pub(crate) type Rows = BTreeMap<Oid, RowData>;

/// Rows collected/scanned per `do_more` increment.
const CHUNK: usize = 128;

// ---------------------------------------------------------------------------
// Table data
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub(crate) struct SortState {
    pub(crate) column: Token,
    pub(crate) cmp: BlobCmp,
    /// Caller-supplied comparator; disables the byte-index fast path.
    pub(crate) custom: bool,
}

impl std::fmt::Debug for SortState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortState")
            .field("column", &self.column)
            .field("custom", &self.custom)
            .finish()
    }
}

/// Sorted (key bytes, oid) pairs for one indexed column. Rows missing the
/// column are not present. Valid for the default bytewise comparator only.
#[derive(Debug, Default)]
pub(crate) struct ColumnIndex {
    pub(crate) dirty: bool,
    pub(crate) entries: Vec<(Vec<u8>, Oid)>,
}

impl ColumnIndex {
    pub(crate) fn byte_size(&self) -> usize {
        self.entries
            .iter()
            .map(|(k, _)| k.capacity() + std::mem::size_of::<Oid>())
            .sum()
    }
}

#[derive(Debug)]
pub(crate) struct TableData {
    pub(crate) oid: Oid,
    pub(crate) row_scope: Token,
    pub(crate) kind: Token,
    pub(crate) unique: bool,
    /// Observable order.
    pub(crate) members: Vec<Oid>,
    /// Base insertion/move order, restored when the sort is unset.
    pub(crate) insertion: Vec<Oid>,
    pub(crate) seed: Seed,
    pub(crate) sort: Option<SortState>,
    pub(crate) indices: HashMap<Token, ColumnIndex>,
    /// Columns that get an index built the next time they become the sort
    /// column.
    pub(crate) index_on_sort: HashSet<Token>,
    /// Nested batch labels, call-stack discipline.
    pub(crate) batch: Vec<String>,
    pub(crate) needs_resort: bool,
}

impl TableData {
    pub(crate) fn new(oid: Oid, row_scope: Token, kind: Token, unique: bool) -> Self {
        Self {
            oid,
            row_scope,
            kind,
            unique,
            members: Vec::new(),
            insertion: Vec::new(),
            seed: Seed::default(),
            sort: None,
            indices: HashMap::new(),
            index_on_sort: HashSet::new(),
            batch: Vec::new(),
            needs_resort: false,
        }
    }

    pub(crate) fn in_batch(&self) -> bool {
        !self.batch.is_empty()
    }

    pub(crate) fn position_of(&self, oid: Oid) -> Option<usize> {
        self.members.iter().position(|m| *m == oid)
    }
}

// ---------------------------------------------------------------------------
// Ordering helpers
// ---------------------------------------------------------------------------

fn key<'a>(rows: &'a Rows, oid: Oid, column: Token) -> Option<&'a Blob> {
    rows.get(&oid).and_then(|r| r.cell(column)).map(|c| &c.value)
}

/// Total order: missing key first, then comparator, then oid.
fn order(rows: &Rows, st: &SortState, a: Oid, b: Oid) -> Ordering {
    let ka = key(rows, a, st.column);
    let kb = key(rows, b, st.column);
    let by_key = match (ka, kb) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(ka), Some(kb)) => (st.cmp)(ka, kb),
    };
    by_key.then_with(|| a.cmp(&b))
}

/// Insertion position for `oid` in the sorted `members`.
fn insert_pos(rows: &Rows, st: &SortState, members: &[Oid], oid: Oid) -> usize {
    members.partition_point(|m| order(rows, st, *m, oid) == Ordering::Less)
}

fn sorted_order(rows: &Rows, st: &SortState, members: &[Oid]) -> Vec<Oid> {
    let mut out = members.to_vec();
    out.sort_by(|a, b| order(rows, st, *a, *b));
    out
}

fn rebuild_index(rows: &Rows, members: &[Oid], column: Token) -> Vec<(Vec<u8>, Oid)> {
    let mut entries: Vec<(Vec<u8>, Oid)> = members
        .iter()
        .filter_map(|m| key(rows, *m, column).map(|k| (k.as_bytes().to_vec(), *m)))
        .collect();
    entries.sort();
    entries
}

// ---------------------------------------------------------------------------
// Store-side table mutation
// ---------------------------------------------------------------------------

impl StoreInner {
    /// React to a cell mutation on `row_oid`'s `column`: dirty any index on
    /// that column, and reposition the row in member tables sorted on it.
    /// Seed moves only where the observable order actually changed.
    pub(crate) fn touch_column(&mut self, row_oid: Oid, column: Token) {
        let Some(table_oids) = self.rows.get(&row_oid).map(|r| r.tables.clone()) else {
            return;
        };
        let Self { rows, tables, .. } = self;
        for toid in table_oids {
            let Some(table) = tables.get_mut(&toid) else {
                continue;
            };
            if let Some(ix) = table.indices.get_mut(&column) {
                ix.dirty = true;
            }
            let Some(st) = table.sort.clone().filter(|s| s.column == column) else {
                continue;
            };
            if table.in_batch() {
                table.needs_resort = true;
                continue;
            }
            let Some(old) = table.position_of(row_oid) else {
                continue;
            };
            table.members.remove(old);
            let new = insert_pos(rows, &st, &table.members, row_oid);
            table.members.insert(new, row_oid);
            if new != old {
                table.seed.bump();
            }
        }
    }

    pub(crate) fn table_add_row(&mut self, table_oid: Oid, row_oid: Oid) -> Result<()> {
        if !self.rows.contains_key(&row_oid) {
            return Err(BurrowError::NoSuchRow { oid: row_oid });
        }
        if !self.tables.contains_key(&table_oid) {
            return Err(BurrowError::NoSuchTable { oid: table_oid });
        }
        let Self { rows, tables, .. } = self;
        let table = tables.get_mut(&table_oid).expect("checked above");
        if table.position_of(row_oid).is_some() {
            // Idempotent membership: count and seed untouched.
            return Ok(());
        }
        table.insertion.push(row_oid);
        match (&table.sort, table.in_batch()) {
            (Some(st), false) => {
                let st = st.clone();
                let pos = insert_pos(rows, &st, &table.members, row_oid);
                table.members.insert(pos, row_oid);
            }
            (Some(_), true) => {
                table.members.push(row_oid);
                table.needs_resort = true;
            }
            (None, _) => table.members.push(row_oid),
        }
        for ix in table.indices.values_mut() {
            ix.dirty = true;
        }
        table.seed.bump();
        rows.get_mut(&row_oid)
            .expect("checked above")
            .tables
            .push(table_oid);
        self.mark_dirty();
        Ok(())
    }

    pub(crate) fn table_cut_row(&mut self, table_oid: Oid, row_oid: Oid) -> Result<()> {
        let table = self
            .tables
            .get_mut(&table_oid)
            .ok_or(BurrowError::NoSuchTable { oid: table_oid })?;
        let Some(pos) = table.position_of(row_oid) else {
            // Cutting an absent row is a no-op.
            return Ok(());
        };
        table.members.remove(pos);
        table.insertion.retain(|m| *m != row_oid);
        for ix in table.indices.values_mut() {
            ix.dirty = true;
        }
        table.seed.bump();
        if let Some(row) = self.rows.get_mut(&row_oid) {
            row.tables.retain(|t| *t != table_oid);
        }
        self.mark_dirty();
        Ok(())
    }

    pub(crate) fn table_move_row(
        &mut self,
        table_oid: Oid,
        row_oid: Oid,
        hint_from: Option<usize>,
        to: usize,
    ) -> Result<usize> {
        let table = self
            .tables
            .get_mut(&table_oid)
            .ok_or(BurrowError::NoSuchTable { oid: table_oid })?;
        // Verify the hint before trusting it; it is an optimization, not a
        // correctness requirement.
        let from = match hint_from {
            Some(h) if table.members.get(h) == Some(&row_oid) => h,
            _ => table
                .position_of(row_oid)
                .ok_or(BurrowError::NoSuchRow { oid: row_oid })?,
        };
        if table.sort.is_some() {
            // Moving rows is only legal on an unsorted table.
            return Ok(from);
        }
        let to = to.min(table.members.len().saturating_sub(1));
        if from == to {
            return Ok(to);
        }
        let moved = table.members.remove(from);
        table.members.insert(to, moved);
        table.insertion = table.members.clone();
        table.seed.bump();
        self.mark_dirty();
        Ok(to)
    }

    pub(crate) fn table_new_row(&mut self, table_oid: Oid, hint: Option<Oid>) -> Result<Oid> {
        let scope = self
            .tables
            .get(&table_oid)
            .ok_or(BurrowError::NoSuchTable { oid: table_oid })?
            .row_scope;
        let oid = match hint {
            Some(oid) => {
                if self.rows.contains_key(&oid) {
                    return Err(BurrowError::OidCollision { oid });
                }
                oid
            }
            None => {
                if self.caller_assigned.contains(&scope) {
                    return Err(BurrowError::CallerAssignedScope { scope });
                }
                Oid::new(scope, self.alloc_id(scope))
            }
        };
        self.rows.insert(oid, RowData::default());
        self.table_add_row(table_oid, oid)?;
        Ok(oid)
    }

    /// Full re-sort at the end of the outermost batch. Indices stay dirty and
    /// rebuild lazily on next use; results are identical either way.
    pub(crate) fn table_end_batch_resort(&mut self, table_oid: Oid) {
        let Self { rows, tables, .. } = self;
        let Some(table) = tables.get_mut(&table_oid) else {
            return;
        };
        if !table.needs_resort {
            return;
        }
        table.needs_resort = false;
        if let Some(st) = table.sort.clone() {
            let new = sorted_order(rows, &st, &table.members);
            if new != table.members {
                table.members = new;
                table.seed.bump();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Table handle
// ---------------------------------------------------------------------------

/// Handle to a store-resident table.
#[derive(Debug, Clone)]
pub struct Table {
    pub(crate) store: WeakShared,
    pub(crate) oid: Oid,
}

impl Table {
    #[must_use]
    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn row_scope(&self, env: &Env) -> Result<Token> {
        self.read(env, |t| t.row_scope)
    }

    pub fn kind(&self, env: &Env) -> Result<Token> {
        self.read(env, |t| t.kind)
    }

    /// Current member count.
    pub fn count(&self, env: &Env) -> Result<usize> {
        self.read(env, |t| t.members.len())
    }

    pub fn is_empty(&self, env: &Env) -> Result<bool> {
        Ok(self.count(env)? == 0)
    }

    /// Membership/order version counter.
    pub fn seed(&self, env: &Env) -> Result<Seed> {
        self.read(env, |t| t.seed)
    }

    /// Active sort column, if any.
    pub fn sort_column(&self, env: &Env) -> Result<Option<Token>> {
        self.read(env, |t| t.sort.as_ref().map(|s| s.column))
    }

    /// Create a row in this table's row scope and add it as a member.
    ///
    /// With no hint the store assigns a fresh id (an error in a
    /// caller-assigned-id scope); a caller-supplied oid is used verbatim and
    /// collides if it already names a row.
    pub fn new_row(&self, env: &Env, hint: Option<Oid>) -> Result<Row> {
        let shared = upgrade(env, &self.store)?;
        let mut inner = shared.write();
        inner.ensure_mutable().map_err(|e| raise(env, e))?;
        let oid = inner
            .table_new_row(self.oid, hint)
            .map_err(|e| raise(env, e))?;
        Ok(Row {
            store: self.store.clone(),
            oid,
        })
    }

    /// Add an existing row as a member. Adding a present row is a no-op.
    pub fn add_row(&self, env: &Env, row: &Row) -> Result<()> {
        let shared = upgrade(env, &self.store)?;
        let mut inner = shared.write();
        inner.ensure_mutable().map_err(|e| raise(env, e))?;
        inner
            .table_add_row(self.oid, row.oid)
            .map_err(|e| raise(env, e))
    }

    /// Remove a member. Cutting an absent row is a no-op.
    pub fn cut_row(&self, env: &Env, row: &Row) -> Result<()> {
        let shared = upgrade(env, &self.store)?;
        let mut inner = shared.write();
        inner.ensure_mutable().map_err(|e| raise(env, e))?;
        inner
            .table_cut_row(self.oid, row.oid)
            .map_err(|e| raise(env, e))
    }

    /// Membership test; returns the row's current position when present.
    pub fn has_row(&self, env: &Env, row: &Row) -> Result<Option<usize>> {
        self.read(env, |t| t.position_of(row.oid))
    }

    /// Zero-based positional access under the current order.
    pub fn row_at(&self, env: &Env, position: usize) -> Result<Option<Row>> {
        let oid = self.read(env, |t| t.members.get(position).copied())?;
        Ok(oid.map(|oid| Row {
            store: self.store.clone(),
            oid,
        }))
    }

    /// Reorder a member of an unsorted table; returns the row's resulting
    /// position. On a sorted table this is a no-op returning the current
    /// position. `hint_from` is advisory and is verified before use.
    pub fn move_row(
        &self,
        env: &Env,
        row: &Row,
        hint_from: Option<usize>,
        to: usize,
    ) -> Result<usize> {
        let shared = upgrade(env, &self.store)?;
        let mut inner = shared.write();
        inner.ensure_mutable().map_err(|e| raise(env, e))?;
        inner
            .table_move_row(self.oid, row.oid, hint_from, to)
            .map_err(|e| raise(env, e))
    }

    /// Switch the active sort column (engine default comparator), or unset
    /// it with `None` to return to insertion/move order.
    pub fn sort_by_column(&self, env: &Env, column: Option<Token>) -> Result<Thumb<Table>> {
        self.start_sort(env, column.map(|c| (c, default_cmp(), false)))
    }

    /// Switch the active sort column using a caller-supplied comparator.
    pub fn sort_by_comparator(
        &self,
        env: &Env,
        column: Token,
        cmp: BlobCmp,
    ) -> Result<Thumb<Table>> {
        self.start_sort(env, Some((column, cmp, true)))
    }

    fn start_sort(&self, env: &Env, target: Option<(Token, BlobCmp, bool)>) -> Result<Thumb<Table>> {
        let shared = upgrade(env, &self.store)?;
        let inner = shared.read();
        inner.ensure_mutable().map_err(|e| raise(env, e))?;
        drop(inner);
        Ok(Thumb::new(SortJob {
            store: self.store.clone(),
            handle: self.clone(),
            target,
            phase: SortPhase::Start,
        }))
    }

    /// Build an index on `column`.
    pub fn add_index(&self, env: &Env, column: Token) -> Result<Thumb<()>> {
        let shared = upgrade(env, &self.store)?;
        let inner = shared.read();
        inner.ensure_mutable().map_err(|e| raise(env, e))?;
        drop(inner);
        Ok(Thumb::new(IndexJob {
            store: self.store.clone(),
            table_oid: self.oid,
            column,
            seed: None,
            entries: Vec::new(),
            next: 0,
        }))
    }

    /// Drop the index on `column`, if any.
    pub fn cut_index(&self, env: &Env, column: Token) -> Result<()> {
        let shared = upgrade(env, &self.store)?;
        let mut inner = shared.write();
        inner.ensure_mutable().map_err(|e| raise(env, e))?;
        let table = inner.table_data_mut(self.oid).map_err(|e| raise(env, e))?;
        if table.indices.remove(&column).is_some() {
            inner.mark_dirty();
        }
        Ok(())
    }

    pub fn has_index(&self, env: &Env, column: Token) -> Result<bool> {
        self.read(env, |t| t.indices.contains_key(&column))
    }

    /// Lazily build an index the next time `column` becomes the sort column,
    /// if not already indexed.
    pub fn enable_index_on_sort(&self, env: &Env, column: Token) -> Result<()> {
        let shared = upgrade(env, &self.store)?;
        let mut inner = shared.write();
        inner.ensure_mutable().map_err(|e| raise(env, e))?;
        let table = inner.table_data_mut(self.oid).map_err(|e| raise(env, e))?;
        if table.index_on_sort.insert(column) {
            inner.mark_dirty();
        }
        Ok(())
    }

    /// Prefix search on the active sort column.
    ///
    /// Returns the contiguous `[first, last)` position range whose value at
    /// `column` has `prefix` as a prefix under the active comparator; empty
    /// range positioned at the insertion point when nothing matches. Errors
    /// with `NotSorted` unless `column` is the active sort column.
    pub fn search_one_sorted_column(
        &self,
        env: &Env,
        column: Token,
        prefix: &Blob,
    ) -> Result<Range<usize>> {
        let shared = upgrade(env, &self.store)?;
        let mut inner = shared.write();
        let inner = &mut *inner;
        // An open batch may have left members in append order; settle the
        // deferred re-sort before binary-searching them.
        inner.table_end_batch_resort(self.oid);
        let TableSplit { rows, table } = split_table(inner, self.oid).map_err(|e| raise(env, e))?;
        let Some(st) = table.sort.clone() else {
            return Err(raise(env, BurrowError::NotSorted { column }));
        };
        if st.column != column {
            return Err(raise(env, BurrowError::NotSorted { column }));
        }

        // Index fast path: valid only for the default comparator, and only
        // when the entries are current.
        if !st.custom {
            if let Some(ix) = table.indices.get_mut(&column) {
                if ix.dirty {
                    ix.entries = rebuild_index(rows, &table.members, column);
                    ix.dirty = false;
                }
                fn trunc(k: &[u8], n: usize) -> &[u8] {
                    &k[..k.len().min(n)]
                }
                let p = prefix.as_bytes();
                let lo = ix.entries.partition_point(|(k, _)| trunc(k, p.len()) < p);
                let hi = ix.entries.partition_point(|(k, _)| trunc(k, p.len()) <= p);
                let offset = table.members.len() - ix.entries.len();
                return Ok(offset + lo..offset + hi);
            }
        }

        let lo = table.members.partition_point(|m| match key(rows, *m, column) {
            None => true,
            Some(k) => (st.cmp)(&k.truncated(prefix.len()), prefix) == Ordering::Less,
        });
        let hi = table.members.partition_point(|m| match key(rows, *m, column) {
            None => true,
            Some(k) => (st.cmp)(&k.truncated(prefix.len()), prefix) != Ordering::Greater,
        });
        Ok(lo..hi)
    }

    /// Prefix search across an arbitrary column set; long-running because it
    /// cannot use the single active index. `cmp` defaults to the engine's
    /// bytewise comparator.
    pub fn search_many_columns(
        &self,
        env: &Env,
        prefix: &Blob,
        columns: &[Token],
        cmp: Option<BlobCmp>,
    ) -> Result<Thumb<SearchHits>> {
        let shared = upgrade(env, &self.store)?;
        let inner = shared.read();
        let table = inner.table_data(self.oid).map_err(|e| raise(env, e))?;
        let snapshot = table.members.clone();
        drop(inner);
        Ok(Thumb::new(SearchJob {
            store: self.store.clone(),
            prefix: prefix.clone(),
            columns: columns.to_vec(),
            cmp: cmp.unwrap_or_else(default_cmp),
            snapshot,
            next: 0,
            hits: Vec::new(),
        }))
    }

    /// Suspend incremental re-sort maintenance for bulk mutation.
    ///
    /// Batches nest by call-stack discipline; `label` identifies the pair for
    /// diagnostics. Results are identical with or without batching.
    pub fn start_batch(&self, env: &Env, label: &str) -> Result<()> {
        let shared = upgrade(env, &self.store)?;
        let mut inner = shared.write();
        inner.ensure_mutable().map_err(|e| raise(env, e))?;
        let table = inner.table_data_mut(self.oid).map_err(|e| raise(env, e))?;
        table.batch.push(label.to_owned());
        Ok(())
    }

    /// End the innermost batch. Ending the last nested batch triggers one
    /// full re-sort instead of the suspended incremental ones.
    pub fn end_batch(&self, env: &Env, label: &str) -> Result<()> {
        let shared = upgrade(env, &self.store)?;
        let mut inner = shared.write();
        inner.ensure_mutable().map_err(|e| raise(env, e))?;
        let table = inner.table_data_mut(self.oid).map_err(|e| raise(env, e))?;
        match table.batch.pop() {
            None => {
                env.note_warning(&format!("end_batch({label}) without start_batch"));
                return Ok(());
            }
            Some(top) if top != label => {
                env.note_warning(&format!("end_batch({label}) closes batch {top:?}"));
            }
            Some(_) => {}
        }
        if !table.in_batch() {
            inner.table_end_batch_resort(self.oid);
        }
        Ok(())
    }

    fn read<T>(&self, env: &Env, f: impl FnOnce(&TableData) -> T) -> Result<T> {
        let shared = upgrade(env, &self.store)?;
        let inner = shared.read();
        let table = inner.table_data(self.oid).map_err(|e| raise(env, e))?;
        Ok(f(table))
    }
}

/// Split borrow of the row arena and one table, so repositioning can read
/// rows while mutating the table.
struct TableSplit<'a> {
    rows: &'a Rows,
    table: &'a mut TableData,
}

fn split_table(inner: &mut StoreInner, oid: Oid) -> Result<TableSplit<'_>> {
    let StoreInner { rows, tables, .. } = inner;
    let table = tables
        .get_mut(&oid)
        .ok_or(BurrowError::NoSuchTable { oid })?;
    Ok(TableSplit { rows, table })
}

impl StoreInner {
    pub(crate) fn table_data(&self, oid: Oid) -> Result<&TableData> {
        self.tables.get(&oid).ok_or(BurrowError::NoSuchTable { oid })
    }

    pub(crate) fn table_data_mut(&mut self, oid: Oid) -> Result<&mut TableData> {
        self.tables
            .get_mut(&oid)
            .ok_or(BurrowError::NoSuchTable { oid })
    }
}

// ---------------------------------------------------------------------------
// Search results
// ---------------------------------------------------------------------------

/// One matching (row, column) pair from a multi-column search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchHit {
    pub row: Oid,
    pub column: Token,
}

/// Result of [`Table::search_many_columns`].
#[derive(Debug, Clone, Default)]
pub struct SearchHits {
    pub hits: Vec<SearchHit>,
}

impl SearchHits {
    /// Distinct matching rows, in scan order.
    #[must_use]
    pub fn rows(&self) -> Vec<Oid> {
        let mut seen = Vec::new();
        for hit in &self.hits {
            if !seen.contains(&hit.row) {
                seen.push(hit.row);
            }
        }
        seen
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

enum SortPhase {
    Start,
    Collect { seed: Seed, next: usize },
}

struct SortJob {
    store: WeakShared,
    handle: Table,
    /// `None` unsets the sort (restores insertion/move order).
    target: Option<(Token, BlobCmp, bool)>,
    phase: SortPhase,
}

impl Job for SortJob {
    type Output = Table;

    fn step(&mut self, _env: &Env) -> Result<Step<Table>> {
        let shared = try_upgrade(&self.store)?;
        let mut inner = shared.write();
        let inner = &mut *inner;
        inner.ensure_mutable()?;
        let oid = self.handle.oid;

        let Some((column, cmp, custom)) = self.target.clone() else {
            // Unsort is a single increment: restore the base order.
            let table = inner.table_data_mut(oid)?;
            if table.sort.take().is_some() {
                if table.members != table.insertion {
                    table.members = table.insertion.clone();
                    table.seed.bump();
                }
                table.needs_resort = false;
                inner.mark_dirty();
            }
            return Ok(Step::Done(self.handle.clone()));
        };

        let member_count = inner.table_data(oid)?.members.len();
        let total = member_count as u64 / CHUNK as u64 + 2;

        match &mut self.phase {
            SortPhase::Start => {
                let seed = inner.table_data(oid)?.seed;
                self.phase = SortPhase::Collect { seed, next: 0 };
                Ok(Step::Progress { current: 1, total })
            }
            SortPhase::Collect { seed, next } => {
                let table = inner.table_data(oid)?;
                if table.seed != *seed {
                    // Membership changed underneath the sort: start over.
                    *seed = table.seed;
                    *next = 0;
                    return Ok(Step::Progress { current: 1, total });
                }
                // Walking members in CHUNK strides warms nothing here (the
                // compare pass below re-reads the arena) but bounds the work
                // a single do_more call performs on huge tables.
                *next = (*next + CHUNK).min(member_count);
                if *next < member_count {
                    return Ok(Step::Progress {
                        current: 1 + (*next / CHUNK) as u64,
                        total,
                    });
                }

                let st = SortState {
                    column,
                    cmp,
                    custom,
                };
                let TableSplit { rows, table } = split_table(inner, oid)?;
                let new = sorted_order(rows, &st, &table.members);
                let changed = new != table.members;
                table.members = new;
                table.needs_resort = false;
                if changed {
                    table.seed.bump();
                }
                if table.index_on_sort.contains(&column) && !table.indices.contains_key(&column) {
                    let entries = rebuild_index(rows, &table.members, column);
                    table.indices.insert(
                        column,
                        ColumnIndex {
                            dirty: false,
                            entries,
                        },
                    );
                }
                table.sort = Some(st);
                debug!(table = %oid, column = %column, changed, "sort installed");
                inner.mark_dirty();
                Ok(Step::Done(self.handle.clone()))
            }
        }
    }
}

struct IndexJob {
    store: WeakShared,
    table_oid: Oid,
    column: Token,
    seed: Option<Seed>,
    entries: Vec<(Vec<u8>, Oid)>,
    next: usize,
}

impl Job for IndexJob {
    type Output = ();

    fn step(&mut self, _env: &Env) -> Result<Step<()>> {
        let shared = try_upgrade(&self.store)?;
        let mut inner = shared.write();
        let inner = &mut *inner;
        inner.ensure_mutable()?;
        let TableSplit { rows, table } = split_table(inner, self.table_oid)?;

        if self.seed != Some(table.seed) {
            self.seed = Some(table.seed);
            self.entries.clear();
            self.next = 0;
        }
        let members = &table.members;
        let end = (self.next + CHUNK).min(members.len());
        for m in &members[self.next..end] {
            if let Some(k) = key(rows, *m, self.column) {
                self.entries.push((k.as_bytes().to_vec(), *m));
            }
        }
        self.next = end;
        if self.next < members.len() {
            return Ok(Step::Progress {
                current: (self.next / CHUNK) as u64,
                total: (members.len() / CHUNK) as u64 + 1,
            });
        }
        let mut entries = std::mem::take(&mut self.entries);
        entries.sort();
        table.indices.insert(
            self.column,
            ColumnIndex {
                dirty: false,
                entries,
            },
        );
        debug!(table = %self.table_oid, column = %self.column, "index built");
        inner.mark_dirty();
        Ok(Step::Done(()))
    }
}

struct SearchJob {
    store: WeakShared,
    prefix: Blob,
    columns: Vec<Token>,
    cmp: BlobCmp,
    snapshot: Vec<Oid>,
    next: usize,
    hits: Vec<SearchHit>,
}

impl Job for SearchJob {
    type Output = SearchHits;

    fn step(&mut self, _env: &Env) -> Result<Step<SearchHits>> {
        let shared = try_upgrade(&self.store)?;
        let inner = shared.read();
        let end = (self.next + CHUNK).min(self.snapshot.len());
        for oid in &self.snapshot[self.next..end] {
            let Some(row) = inner.rows.get(oid) else {
                // Cut since the snapshot was taken; skip.
                continue;
            };
            for column in &self.columns {
                if let Some(cell) = row.cell(*column) {
                    if prefix_matches(&self.cmp, &cell.value, &self.prefix) {
                        self.hits.push(SearchHit {
                            row: *oid,
                            column: *column,
                        });
                    }
                }
            }
        }
        self.next = end;
        if self.next < self.snapshot.len() {
            Ok(Step::Progress {
                current: (self.next / CHUNK) as u64,
                total: (self.snapshot.len() / CHUNK) as u64 + 1,
            })
        } else {
            Ok(Step::Done(SearchHits {
                hits: std::mem::take(&mut self.hits),
            }))
        }
    }
}
