//! Rows and cells.
//!
//! A store-resident row is arena data owned by the store and addressed by
//! [`Oid`]; the public [`Row`] is a thin handle (weak store reference plus
//! oid), so one row shared by several tables is the same data through every
//! handle. A [`RowBuf`] is the detached staging form: an independently owned
//! cell set with copy-only semantics that never aliases store state.
//!
//! Seed discipline (the part cursor staleness depends on): a row's seed moves
//! when a column is added or cut, never when an existing column's value is
//! overwritten. Mutations to the active sort column of a member table
//! reposition the row there and move that table's seed only if the order
//! actually changed.

use burrow_error::{BurrowError, Result};
use burrow_types::{Blob, Env, Oid, Seed, Token};

use crate::raise;
use crate::store::{StoreInner, WeakShared, upgrade};

/// One column's value in a row.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Cell {
    /// Column identifier.
    pub column: Token,
    /// Stored value.
    pub value: Blob,
}

impl Cell {
    #[must_use]
    pub fn new(column: Token, value: Blob) -> Self {
        Self { column, value }
    }
}

/// What a cell upsert did, so callers can apply the seed asymmetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CellChange {
    Inserted,
    ValueChanged,
    Unchanged,
}

/// Arena payload of one store-resident row.
#[derive(Debug, Default)]
pub(crate) struct RowData {
    /// Cells in insertion/column order; columns unique.
    pub(crate) cells: Vec<Cell>,
    /// Cell-membership version counter.
    pub(crate) seed: Seed,
    /// Oids of tables currently holding this row (the explicit refcount).
    pub(crate) tables: Vec<Oid>,
}

impl RowData {
    pub(crate) fn cell(&self, column: Token) -> Option<&Cell> {
        self.cells.iter().find(|c| c.column == column)
    }

    pub(crate) fn upsert(&mut self, column: Token, value: Blob) -> CellChange {
        match self.cells.iter_mut().find(|c| c.column == column) {
            Some(cell) if cell.value == value => CellChange::Unchanged,
            Some(cell) => {
                cell.value = value;
                CellChange::ValueChanged
            }
            None => {
                self.cells.push(Cell::new(column, value));
                CellChange::Inserted
            }
        }
    }

    /// Remove a column; returns whether it was present.
    pub(crate) fn cut(&mut self, column: Token) -> bool {
        let before = self.cells.len();
        self.cells.retain(|c| c.column != column);
        self.cells.len() != before
    }

    pub(crate) fn column_set(&self) -> Vec<Token> {
        self.cells.iter().map(|c| c.column).collect()
    }
}

// ---------------------------------------------------------------------------
// Store-side cell mutation
// ---------------------------------------------------------------------------

impl StoreInner {
    pub(crate) fn row_cells(&self, oid: Oid) -> Result<Vec<Cell>> {
        self.rows
            .get(&oid)
            .map(|r| r.cells.clone())
            .ok_or(BurrowError::NoSuchRow { oid })
    }

    pub(crate) fn upsert_cell(&mut self, oid: Oid, column: Token, value: Blob) -> Result<()> {
        let row = self
            .rows
            .get_mut(&oid)
            .ok_or(BurrowError::NoSuchRow { oid })?;
        let change = row.upsert(column, value);
        if change == CellChange::Unchanged {
            return Ok(());
        }
        if change == CellChange::Inserted {
            row.seed.bump();
        }
        self.mark_dirty();
        self.touch_column(oid, column);
        Ok(())
    }

    pub(crate) fn cut_cell(&mut self, oid: Oid, column: Token) -> Result<()> {
        let row = self
            .rows
            .get_mut(&oid)
            .ok_or(BurrowError::NoSuchRow { oid })?;
        if !row.cut(column) {
            return Ok(());
        }
        row.seed.bump();
        self.mark_dirty();
        self.touch_column(oid, column);
        Ok(())
    }

    pub(crate) fn cut_all_cells(&mut self, oid: Oid) -> Result<()> {
        let row = self
            .rows
            .get_mut(&oid)
            .ok_or(BurrowError::NoSuchRow { oid })?;
        if row.cells.is_empty() {
            return Ok(());
        }
        let columns = row.column_set();
        row.cells.clear();
        row.seed.bump();
        self.mark_dirty();
        for column in columns {
            self.touch_column(oid, column);
        }
        Ok(())
    }

    /// Merge or replace a row's cell set.
    ///
    /// `replace = false` is `union_from`: every incoming cell overwrites or
    /// inserts, nothing is removed. `replace = true` is `assign_from`: the
    /// row becomes an exact duplicate of `incoming`. When the column set is
    /// unchanged, the row's own iteration order and seed are preserved.
    pub(crate) fn apply_cells(&mut self, oid: Oid, incoming: &[Cell], replace: bool) -> Result<()> {
        let row = self
            .rows
            .get_mut(&oid)
            .ok_or(BurrowError::NoSuchRow { oid })?;

        let mut touched = Vec::new();
        let mut membership_changed = false;

        if replace {
            let old_set = row.column_set();
            for old in &row.cells {
                let replacement = incoming.iter().find(|c| c.column == old.column);
                match replacement {
                    None => {
                        membership_changed = true;
                        touched.push(old.column);
                    }
                    Some(new) if new.value != old.value => touched.push(old.column),
                    Some(_) => {}
                }
            }
            for new in incoming {
                if !old_set.contains(&new.column) {
                    membership_changed = true;
                    touched.push(new.column);
                }
            }
            if membership_changed {
                row.cells = incoming.to_vec();
            } else {
                for cell in &mut row.cells {
                    if let Some(new) = incoming.iter().find(|c| c.column == cell.column) {
                        cell.value = new.value.clone();
                    }
                }
            }
        } else {
            for new in incoming {
                match row.upsert(new.column, new.value.clone()) {
                    CellChange::Inserted => {
                        membership_changed = true;
                        touched.push(new.column);
                    }
                    CellChange::ValueChanged => touched.push(new.column),
                    CellChange::Unchanged => {}
                }
            }
        }

        if touched.is_empty() {
            return Ok(());
        }
        if membership_changed {
            row.seed.bump();
        }
        self.mark_dirty();
        touched.sort_unstable();
        touched.dedup();
        for column in touched {
            self.touch_column(oid, column);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row handle
// ---------------------------------------------------------------------------

/// Handle to a store-resident row.
///
/// Cheap to clone; holds the store weakly, so it reports `StoreClosed` after
/// the store is dropped rather than keeping it alive.
#[derive(Debug, Clone)]
pub struct Row {
    pub(crate) store: WeakShared,
    pub(crate) oid: Oid,
}

impl Row {
    #[must_use]
    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// Scope component of the row's oid.
    #[must_use]
    pub fn scope(&self) -> Token {
        self.oid.scope
    }

    /// Number of cells.
    pub fn count(&self, env: &Env) -> Result<usize> {
        let shared = upgrade(env, &self.store)?;
        let inner = shared.read();
        Ok(self.data(env, &inner)?.cells.len())
    }

    pub fn is_empty(&self, env: &Env) -> Result<bool> {
        Ok(self.count(env)? == 0)
    }

    /// Cell-membership version counter.
    pub fn seed(&self, env: &Env) -> Result<Seed> {
        let shared = upgrade(env, &self.store)?;
        let inner = shared.read();
        Ok(self.data(env, &inner)?.seed)
    }

    /// Read one cell's value.
    pub fn cell(&self, env: &Env, column: Token) -> Result<Option<Blob>> {
        let shared = upgrade(env, &self.store)?;
        let inner = shared.read();
        Ok(self.data(env, &inner)?.cell(column).map(|c| c.value.clone()))
    }

    /// Snapshot of all cells in iteration order.
    pub fn cells(&self, env: &Env) -> Result<Vec<Cell>> {
        let shared = upgrade(env, &self.store)?;
        let inner = shared.read();
        Ok(self.data(env, &inner)?.cells.clone())
    }

    /// Create the cell if absent (empty value) and return its current value.
    pub fn ensure_cell(&self, env: &Env, column: Token) -> Result<Blob> {
        let shared = upgrade(env, &self.store)?;
        let mut inner = shared.write();
        inner.ensure_mutable().map_err(|e| raise(env, e))?;
        if let Some(cell) = self
            .data(env, &inner)?
            .cell(column)
            .map(|c| c.value.clone())
        {
            return Ok(cell);
        }
        inner
            .upsert_cell(self.oid, column, Blob::default())
            .map_err(|e| raise(env, e))?;
        Ok(Blob::default())
    }

    /// Insert or overwrite one cell (idempotent upsert).
    pub fn add_column(&self, env: &Env, column: Token, value: Blob) -> Result<()> {
        let shared = upgrade(env, &self.store)?;
        let mut inner = shared.write();
        inner.ensure_mutable().map_err(|e| raise(env, e))?;
        inner
            .upsert_cell(self.oid, column, value)
            .map_err(|e| raise(env, e))
    }

    /// Remove one column. Removing an absent column is a no-op.
    pub fn cut_column(&self, env: &Env, column: Token) -> Result<()> {
        let shared = upgrade(env, &self.store)?;
        let mut inner = shared.write();
        inner.ensure_mutable().map_err(|e| raise(env, e))?;
        inner.cut_cell(self.oid, column).map_err(|e| raise(env, e))
    }

    /// Remove every column.
    pub fn cut_all_columns(&self, env: &Env) -> Result<()> {
        let shared = upgrade(env, &self.store)?;
        let mut inner = shared.write();
        inner.ensure_mutable().map_err(|e| raise(env, e))?;
        inner.cut_all_cells(self.oid).map_err(|e| raise(env, e))
    }

    /// Structural merge: copy every cell of `other` into `self`, overwriting
    /// same-column cells and adding missing columns.
    pub fn union_from(&self, env: &Env, other: &Self) -> Result<()> {
        let cells = other.cells(env)?;
        self.apply(env, &cells, false)
    }

    /// Make `self` an exact duplicate of `other`'s cell set.
    pub fn assign_from(&self, env: &Env, other: &Self) -> Result<()> {
        let cells = other.cells(env)?;
        self.apply(env, &cells, true)
    }

    /// Structural merge from a detached staging row.
    pub fn union_from_buf(&self, env: &Env, buf: &RowBuf) -> Result<()> {
        self.apply(env, buf.cells(), false)
    }

    /// Replace from a detached staging row.
    pub fn assign_from_buf(&self, env: &Env, buf: &RowBuf) -> Result<()> {
        self.apply(env, buf.cells(), true)
    }

    /// Copy this row's cells into a detached staging row.
    pub fn to_buf(&self, env: &Env) -> Result<RowBuf> {
        Ok(RowBuf {
            cells: self.cells(env)?,
        })
    }

    fn apply(&self, env: &Env, cells: &[Cell], replace: bool) -> Result<()> {
        let shared = upgrade(env, &self.store)?;
        let mut inner = shared.write();
        inner.ensure_mutable().map_err(|e| raise(env, e))?;
        inner
            .apply_cells(self.oid, cells, replace)
            .map_err(|e| raise(env, e))
    }

    fn data<'a>(&self, env: &Env, inner: &'a StoreInner) -> Result<&'a RowData> {
        inner
            .rows
            .get(&self.oid)
            .ok_or_else(|| raise(env, BurrowError::NoSuchRow { oid: self.oid }))
    }
}

// ---------------------------------------------------------------------------
// Detached staging row
// ---------------------------------------------------------------------------

/// An independently owned cell set with no oid and no store backing.
///
/// Used for staging copies; operations are infallible because nothing here
/// can be stale, shared, or read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowBuf {
    cells: Vec<Cell>,
}

impl RowBuf {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[must_use]
    pub fn cell(&self, column: Token) -> Option<&Blob> {
        self.cells
            .iter()
            .find(|c| c.column == column)
            .map(|c| &c.value)
    }

    #[must_use]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn add_column(&mut self, column: Token, value: Blob) {
        match self.cells.iter_mut().find(|c| c.column == column) {
            Some(cell) => cell.value = value,
            None => self.cells.push(Cell::new(column, value)),
        }
    }

    pub fn cut_column(&mut self, column: Token) {
        self.cells.retain(|c| c.column != column);
    }

    pub fn cut_all_columns(&mut self) {
        self.cells.clear();
    }

    /// Copy every cell of `other` into `self`, overwriting same-column cells.
    pub fn union_from(&mut self, other: &Self) {
        for cell in &other.cells {
            self.add_column(cell.column, cell.value.clone());
        }
    }

    /// Become an exact duplicate of `other`'s cell set.
    pub fn assign_from(&mut self, other: &Self) {
        self.cells = other.cells.clone();
    }
}
