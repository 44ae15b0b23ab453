//! Durable snapshot image.
//!
//! The on-disk format is a single serde_json document written to a temp file
//! and renamed into place, so a reader sees either the previous image or the
//! new one, never a torn write. Seeds and index entries are not persisted:
//! they are run-time state, rebuilt fresh (or lazily) on open. Caller-supplied
//! sort comparators do not survive a snapshot; a persisted sort column
//! reopens under the engine's default comparator.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use burrow_error::{BurrowError, Result};
use burrow_types::{Oid, Token};
use serde::{Deserialize, Serialize};

use crate::atom::AtomTable;
use crate::commit::CommitState;
use crate::row::{Cell, RowData};
use crate::store::StoreInner;
use crate::table::{ColumnIndex, SortState, TableData};

pub(crate) const MAGIC: &str = "burrow.snapshot";
pub(crate) const VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SnapshotDoc {
    pub magic: String,
    pub version: u32,
    pub atoms: Vec<(u32, String)>,
    pub next_ids: Vec<(Token, u32)>,
    pub caller_assigned: Vec<Token>,
    pub rows: Vec<RowSnap>,
    pub tables: Vec<TableSnap>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RowSnap {
    pub oid: Oid,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct TableSnap {
    pub oid: Oid,
    pub row_scope: Token,
    pub kind: Token,
    pub unique: bool,
    pub members: Vec<Oid>,
    pub insertion: Vec<Oid>,
    pub sort_column: Option<Token>,
    pub indexed: Vec<Token>,
    pub index_on_sort: Vec<Token>,
}

/// Flatten live store state into a snapshot document.
pub(crate) fn encode(inner: &StoreInner) -> SnapshotDoc {
    let mut next_ids: Vec<(Token, u32)> = inner
        .next_ids
        .iter()
        .map(|(scope, id)| (*scope, *id))
        .collect();
    next_ids.sort_by_key(|(scope, _)| *scope);
    let mut caller_assigned: Vec<Token> = inner.caller_assigned.iter().copied().collect();
    caller_assigned.sort();

    SnapshotDoc {
        magic: MAGIC.to_owned(),
        version: VERSION,
        atoms: inner.atoms.to_pairs(),
        next_ids,
        caller_assigned,
        rows: inner
            .rows
            .iter()
            .map(|(oid, row)| RowSnap {
                oid: *oid,
                cells: row.cells.clone(),
            })
            .collect(),
        tables: inner
            .tables
            .values()
            .map(|t| {
                let mut indexed: Vec<Token> = t.indices.keys().copied().collect();
                indexed.sort();
                let mut index_on_sort: Vec<Token> = t.index_on_sort.iter().copied().collect();
                index_on_sort.sort();
                TableSnap {
                    oid: t.oid,
                    row_scope: t.row_scope,
                    kind: t.kind,
                    unique: t.unique,
                    members: t.members.clone(),
                    insertion: t.insertion.clone(),
                    sort_column: t.sort.as_ref().map(|s| s.column),
                    indexed,
                    index_on_sort,
                }
            })
            .collect(),
    }
}

/// Rebuild store state from a decoded snapshot document.
pub(crate) fn install(
    doc: SnapshotDoc,
    path: Option<PathBuf>,
    readonly: bool,
) -> Result<StoreInner> {
    let origin = path.clone().unwrap_or_else(|| PathBuf::from("<memory>"));
    if doc.magic != MAGIC {
        return Err(BurrowError::corrupt(origin, "bad magic"));
    }
    if doc.version != VERSION {
        return Err(BurrowError::corrupt(
            origin,
            format!("unsupported version {}", doc.version),
        ));
    }
    let atoms = AtomTable::from_pairs(doc.atoms)
        .ok_or_else(|| BurrowError::corrupt(origin.clone(), "non-dense token table"))?;

    let mut inner = StoreInner {
        atoms,
        rows: Default::default(),
        tables: Default::default(),
        next_ids: doc.next_ids.into_iter().collect(),
        caller_assigned: doc.caller_assigned.into_iter().collect(),
        commit: CommitState::Clean,
        dir_seed: Default::default(),
        readonly,
        path,
        mem_image: None,
    };

    for row in doc.rows {
        inner.rows.insert(
            row.oid,
            RowData {
                cells: row.cells,
                ..Default::default()
            },
        );
    }

    for snap in doc.tables {
        let mut table = TableData::new(snap.oid, snap.row_scope, snap.kind, snap.unique);
        for member in &snap.members {
            let row = inner.rows.get_mut(member).ok_or_else(|| {
                BurrowError::corrupt(origin.clone(), format!("table {} references missing row {member}", snap.oid))
            })?;
            row.tables.push(snap.oid);
        }
        table.members = snap.members;
        table.insertion = snap.insertion;
        table.sort = snap.sort_column.map(|column| SortState {
            column,
            cmp: burrow_types::default_cmp(),
            custom: false,
        });
        for column in snap.indexed {
            // Entries rebuild lazily on first use.
            table.indices.insert(
                column,
                ColumnIndex {
                    dirty: true,
                    entries: Vec::new(),
                },
            );
        }
        table.index_on_sort = snap.index_on_sort.into_iter().collect();
        if inner.tables.insert(snap.oid, table).is_some() {
            return Err(BurrowError::corrupt(
                origin,
                format!("duplicate table oid {}", snap.oid),
            ));
        }
    }

    Ok(inner)
}

pub(crate) fn to_bytes(doc: &SnapshotDoc) -> Result<Vec<u8>> {
    serde_json::to_vec(doc).map_err(|e| BurrowError::internal(format!("snapshot encode: {e}")))
}

pub(crate) fn from_bytes(origin: &Path, bytes: &[u8]) -> Result<SnapshotDoc> {
    serde_json::from_slice(bytes).map_err(|e| BurrowError::corrupt(origin, e.to_string()))
}

pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Write `bytes` next to `path` and rename into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = temp_path(path);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Record of a removed/unused set of rows, used by compress to report what it
/// dropped.
pub(crate) fn unreferenced_rows(inner: &StoreInner) -> HashSet<Oid> {
    inner
        .rows
        .iter()
        .filter(|(_, row)| row.tables.is_empty())
        .map(|(oid, _)| *oid)
        .collect()
}
