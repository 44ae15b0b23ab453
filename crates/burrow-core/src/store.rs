//! Ports and stores.
//!
//! A [`Store`] owns the token namespace, the row arena, and the table
//! directory, behind one `parking_lot::RwLock` so distinct call contexts on
//! distinct threads can share it. A [`Port`] is the read-only face: either a
//! live view over a store's structures ([`Store::as_port`]) or a reader over
//! the last committed image ([`Port::open`]), to which uncommitted store
//! state is invisible.
//!
//! Closing (dropping) a store invalidates every row, table, and cursor
//! handle derived from it; handles hold the lock weakly and report
//! `StoreClosed` instead of keeping the store alive.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use burrow_error::{BurrowError, Result};
use burrow_types::{Blob, Env, Oid, Seed, Token};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::atom::AtomTable;
use crate::commit::{self, CommitLevel, CommitState};
use crate::cursor::PortTableCursor;
use crate::raise;
use crate::row::{Cell, Row, RowData};
use crate::snapshot;
use crate::table::{Table, TableData};
use crate::thumb::{Job, Step, Thumb};

pub(crate) type Shared = Arc<RwLock<StoreInner>>;
pub(crate) type WeakShared = Weak<RwLock<StoreInner>>;

/// Upgrade a weak store reference or report `StoreClosed`.
pub(crate) fn upgrade(env: &Env, weak: &WeakShared) -> Result<Shared> {
    weak.upgrade()
        .ok_or_else(|| raise(env, BurrowError::StoreClosed))
}

/// Upgrade without touching the env counters. For job steps, whose errors
/// are counted once at the thumb boundary.
pub(crate) fn try_upgrade(weak: &WeakShared) -> Result<Shared> {
    weak.upgrade().ok_or(BurrowError::StoreClosed)
}

// ---------------------------------------------------------------------------
// Interior
// ---------------------------------------------------------------------------

pub(crate) struct StoreInner {
    pub(crate) atoms: AtomTable,
    pub(crate) rows: BTreeMap<Oid, RowData>,
    pub(crate) tables: BTreeMap<Oid, TableData>,
    /// Per-scope id allocator; rows and tables share the id space.
    pub(crate) next_ids: HashMap<Token, u32>,
    /// Scopes where `new_row` requires a caller-supplied oid.
    pub(crate) caller_assigned: HashSet<Token>,
    pub(crate) commit: CommitState,
    /// Version counter of the table directory (bumped on table creation).
    pub(crate) dir_seed: Seed,
    /// Snapshot ports are read-only for their whole lifetime.
    pub(crate) readonly: bool,
    pub(crate) path: Option<PathBuf>,
    /// Committed image for path-less stores.
    pub(crate) mem_image: Option<Vec<u8>>,
}

impl StoreInner {
    fn fresh(path: Option<PathBuf>) -> Self {
        Self {
            atoms: AtomTable::new(),
            rows: BTreeMap::new(),
            tables: BTreeMap::new(),
            next_ids: HashMap::new(),
            caller_assigned: HashSet::new(),
            commit: CommitState::Clean,
            dir_seed: Seed::default(),
            readonly: false,
            path,
            mem_image: None,
        }
    }

    /// Reject mutation on snapshot ports and while a commit is in flight.
    pub(crate) fn ensure_mutable(&self) -> Result<()> {
        if self.readonly {
            return Err(BurrowError::StoreReadOnly {
                reason: "snapshot port",
            });
        }
        if matches!(self.commit, CommitState::Committing(_)) {
            return Err(BurrowError::StoreReadOnly {
                reason: "commit in flight",
            });
        }
        Ok(())
    }

    pub(crate) fn mark_dirty(&mut self) {
        debug_assert!(
            !matches!(self.commit, CommitState::Committing(_)),
            "mutation slipped past the commit guard"
        );
        if self.commit == CommitState::Clean {
            self.commit = CommitState::Dirty;
        }
    }

    /// Next unused id in `scope`, skipping ids taken by caller-assigned rows
    /// or tables.
    pub(crate) fn alloc_id(&mut self, scope: Token) -> u32 {
        let mut id = self.next_ids.get(&scope).copied().unwrap_or(1);
        loop {
            let oid = Oid::new(scope, id);
            if !self.rows.contains_key(&oid) && !self.tables.contains_key(&oid) {
                break;
            }
            id += 1;
        }
        self.next_ids.insert(scope, id + 1);
        id
    }

    /// Table oids matching the (scope, kind) filter, in oid order. `None`
    /// acts as a wildcard across that dimension only.
    pub(crate) fn tables_matching(&self, scope: Option<Token>, kind: Option<Token>) -> Vec<Oid> {
        self.tables
            .values()
            .filter(|t| scope.is_none_or(|s| t.row_scope == s))
            .filter(|t| kind.is_none_or(|k| t.kind == k))
            .map(|t| t.oid)
            .collect()
    }

    /// Create-or-coalesce per the uniqueness contract: a unique request
    /// returns any existing table for the pair; a non-unique request still
    /// returns an existing table that was marked unique.
    pub(crate) fn new_table_inner(
        &mut self,
        scope: Token,
        kind: Token,
        must_be_unique: bool,
    ) -> Oid {
        let existing = self.tables_matching(Some(scope), Some(kind));
        if must_be_unique {
            if let Some(oid) = existing.first() {
                return *oid;
            }
        } else if let Some(oid) = existing
            .iter()
            .find(|oid| self.tables[*oid].unique)
        {
            return *oid;
        }
        let oid = Oid::new(scope, self.alloc_id(scope));
        self.tables
            .insert(oid, TableData::new(oid, scope, kind, must_be_unique));
        self.dir_seed.bump();
        self.mark_dirty();
        debug!(table = %oid, scope = %scope, kind = %kind, unique = must_be_unique, "table created");
        oid
    }

    fn index_bytes(&self) -> usize {
        self.tables
            .values()
            .flat_map(|t| t.indices.values())
            .map(|ix| ix.byte_size())
            .sum()
    }

    /// Drop index entry buffers; they rebuild lazily on next use.
    fn purge_indices(&mut self) -> usize {
        let freed = self.index_bytes();
        for table in self.tables.values_mut() {
            for ix in table.indices.values_mut() {
                ix.entries = Vec::new();
                ix.dirty = true;
            }
        }
        freed
    }

    /// Return slack capacity held by membership and cell vectors.
    fn purge_slack(&mut self) -> usize {
        let mut freed = 0;
        for table in self.tables.values_mut() {
            freed += (table.members.capacity() - table.members.len()) * std::mem::size_of::<Oid>();
            freed +=
                (table.insertion.capacity() - table.insertion.len()) * std::mem::size_of::<Oid>();
            table.members.shrink_to_fit();
            table.insertion.shrink_to_fit();
        }
        for row in self.rows.values_mut() {
            freed += (row.cells.capacity() - row.cells.len()) * std::mem::size_of::<Cell>();
            row.cells.shrink_to_fit();
        }
        freed
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// The mutable container: a port plus mutation, token allocation, and commit
/// control.
pub struct Store {
    pub(crate) shared: Shared,
}

impl Store {
    /// A store with no backing path; commits target an in-process image.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            shared: Arc::new(RwLock::new(StoreInner::fresh(None))),
        }
    }

    /// Open a store at `path` as a resumable operation. A missing file
    /// yields a fresh store that will commit to that path.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Thumb<Store> {
        Thumb::new(StoreOpenJob {
            core: OpenCore::new(path.into()),
        })
    }

    /// Open a store at `path`, driving the open thumb to completion.
    pub fn open_now(env: &Env, path: impl Into<PathBuf>) -> Result<Store> {
        Self::open(path).finish(env)
    }

    /// Live read-only view over this store's structures.
    #[must_use]
    pub fn as_port(&self) -> Port {
        Port {
            shared: Arc::clone(&self.shared),
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<PathBuf> {
        self.shared.read().path.clone()
    }

    /// Close the store. Any uncommitted changes are discarded; all handles
    /// derived from this store become invalid. Dropping the store has the
    /// same effect.
    pub fn close(self) {}

    // --- token namespace ---

    /// Look up `name`, allocating a token if absent.
    pub fn intern(&self, env: &Env, name: &str) -> Result<Token> {
        let mut inner = self.shared.write();
        if let Some(token) = inner.atoms.query(name) {
            return Ok(token);
        }
        inner.ensure_mutable().map_err(|e| raise(env, e))?;
        if !name.is_ascii() {
            env.note_warning(&format!("interning non-ASCII name {name:?}"));
        }
        let token = inner.atoms.intern(name);
        inner.mark_dirty();
        Ok(token)
    }

    /// Look up `name` without allocating.
    #[must_use]
    pub fn query(&self, name: &str) -> Option<Token> {
        self.shared.read().atoms.query(name)
    }

    /// Reverse token lookup.
    #[must_use]
    pub fn resolve(&self, token: Token) -> Option<String> {
        self.shared.read().atoms.resolve(token).map(str::to_owned)
    }

    // --- table directory ---

    /// Create a table, or coalesce onto an existing one per the uniqueness
    /// contract.
    pub fn new_table(
        &self,
        env: &Env,
        scope: Token,
        kind: Token,
        must_be_unique: bool,
    ) -> Result<Table> {
        let mut inner = self.shared.write();
        inner.ensure_mutable().map_err(|e| raise(env, e))?;
        let oid = inner.new_table_inner(scope, kind, must_be_unique);
        Ok(Table {
            store: Arc::downgrade(&self.shared),
            oid,
        })
    }

    #[must_use]
    pub fn get_table(&self, oid: Oid) -> Option<Table> {
        self.as_port().get_table(oid)
    }

    #[must_use]
    pub fn has_table(&self, oid: Oid) -> bool {
        self.shared.read().tables.contains_key(&oid)
    }

    #[must_use]
    pub fn has_row(&self, oid: Oid) -> bool {
        self.shared.read().rows.contains_key(&oid)
    }

    /// Handle to an existing row.
    #[must_use]
    pub fn get_row(&self, oid: Oid) -> Option<Row> {
        self.as_port().get_row(oid)
    }

    /// An arbitrary table matching (scope, kind); callers needing a
    /// deterministic walk use [`Store::table_cursor`].
    #[must_use]
    pub fn get_table_kind(&self, scope: Token, kind: Token) -> Option<Table> {
        self.as_port().get_table_kind(scope, kind)
    }

    /// Cursor over tables matching the filter; `None` is a wildcard across
    /// that dimension only.
    #[must_use]
    pub fn table_cursor(&self, scope: Option<Token>, kind: Option<Token>) -> PortTableCursor {
        PortTableCursor::new(Arc::downgrade(&self.shared), scope, kind)
    }

    // --- row-scope id assignment mode ---

    /// Whether `new_row` in `scope` requires a caller-supplied oid.
    #[must_use]
    pub fn row_scope_has_caller_assigned_ids(&self, scope: Token) -> bool {
        self.shared.read().caller_assigned.contains(&scope)
    }

    /// Require caller-supplied oids for `new_row` in `scope`. Already
    /// assigned ids stay valid.
    pub fn set_caller_assigned_ids(&self, env: &Env, scope: Token) -> Result<()> {
        let mut inner = self.shared.write();
        inner.ensure_mutable().map_err(|e| raise(env, e))?;
        if inner.caller_assigned.insert(scope) {
            inner.mark_dirty();
        }
        Ok(())
    }

    /// Let the store allocate ids for `new_row` in `scope`.
    pub fn set_store_assigned_ids(&self, env: &Env, scope: Token) -> Result<()> {
        let mut inner = self.shared.write();
        inner.ensure_mutable().map_err(|e| raise(env, e))?;
        if inner.caller_assigned.remove(&scope) {
            inner.mark_dirty();
        }
        Ok(())
    }

    // --- import ---

    /// Copy tables and rows matching `scope_filter` (`None` = all) from
    /// `source` into this store. Imported content always receives new
    /// identities here; there is no identity-based merge.
    pub fn import(
        &self,
        env: &Env,
        scope_filter: Option<Token>,
        source: &Port,
    ) -> Result<Thumb<()>> {
        if Arc::ptr_eq(&self.shared, &source.shared) {
            return Err(raise(
                env,
                BurrowError::internal("cannot import a store into itself"),
            ));
        }
        self.shared
            .read()
            .ensure_mutable()
            .map_err(|e| raise(env, e))?;
        let tables = source.shared.read().tables_matching(scope_filter, None);
        if tables.is_empty() {
            return Ok(Thumb::ready(()));
        }
        Ok(Thumb::new(ImportJob {
            dest: Arc::downgrade(&self.shared),
            source: Arc::downgrade(&source.shared),
            tables,
            next: 0,
            row_map: HashMap::new(),
        }))
    }

    // --- commit ---

    /// Synchronous best-effort commit. May defer all or part of the write
    /// transparently: failures and an in-flight durable commit leave the
    /// store dirty for the next commit rather than erroring.
    pub fn small_commit(&self, env: &Env) -> Result<()> {
        let mut inner = self.shared.write();
        match inner.commit {
            CommitState::Clean | CommitState::Committing(_) => return Ok(()),
            CommitState::Dirty => {}
        }
        let doc = snapshot::encode(&inner);
        let bytes = match snapshot::to_bytes(&doc) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "small commit deferred");
                env.note_warning(&e);
                return Ok(());
            }
        };
        if let Some(path) = inner.path.clone() {
            if let Err(e) = snapshot::write_atomic(&path, &bytes) {
                warn!(path = %path.display(), error = %e, "small commit deferred");
                env.note_warning(&e);
                return Ok(());
            }
        } else {
            inner.mem_image = Some(bytes);
        }
        inner.commit = CommitState::Clean;
        debug!("small commit applied");
        Ok(())
    }

    /// Durable commit of all outstanding changes.
    pub fn large_commit(&self, env: &Env) -> Result<Thumb<()>> {
        commit::begin(env, &self.shared, CommitLevel::Large)
    }

    /// Durable commit at a session boundary.
    pub fn session_commit(&self, env: &Env) -> Result<Thumb<()>> {
        commit::begin(env, &self.shared, CommitLevel::Session)
    }

    /// Durable commit that also reclaims space (drops rows no table holds).
    pub fn compress_commit(&self, env: &Env) -> Result<Thumb<()>> {
        commit::begin(env, &self.shared, CommitLevel::Compress)
    }

    /// Reader over this store's last committed image: the backing file for a
    /// path store, the in-process image for an in-memory one. Errors when
    /// nothing has been committed yet.
    pub fn committed_port(&self, env: &Env) -> Result<Port> {
        let (path, image) = {
            let inner = self.shared.read();
            (inner.path.clone(), inner.mem_image.clone())
        };
        let doc = match (&path, image) {
            (Some(p), _) => {
                let bytes = std::fs::read(p).map_err(|e| raise(env, e.into()))?;
                snapshot::from_bytes(p, &bytes).map_err(|e| raise(env, e))?
            }
            (None, Some(bytes)) => snapshot::from_bytes(Path::new("<memory>"), &bytes)
                .map_err(|e| raise(env, e))?,
            (None, None) => {
                return Err(raise(
                    env,
                    BurrowError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "no committed image",
                    )),
                ));
            }
        };
        let inner = snapshot::install(doc, path, true).map_err(|e| raise(env, e))?;
        Ok(Port {
            shared: Arc::new(RwLock::new(inner)),
        })
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.shared.read().commit == CommitState::Dirty
    }

    #[must_use]
    pub fn is_committing(&self) -> bool {
        matches!(self.shared.read().commit, CommitState::Committing(_))
    }

    // --- purge hierarchy ---

    /// Cheapest tier: drop rebuilt caches. Returns bytes reclaimed.
    pub fn idle_purge(&self, _env: &Env) -> usize {
        self.shared.write().purge_indices()
    }

    /// Reclaim up to `target_bytes`, cheapest caches first. May reclaim
    /// less than requested; never fails.
    pub fn session_purge(&self, _env: &Env, target_bytes: usize) -> usize {
        let mut inner = self.shared.write();
        let mut freed = inner.purge_indices();
        if freed < target_bytes {
            freed += inner.purge_slack();
        }
        freed
    }

    /// Last-resort tier: reclaim everything reclaimable.
    pub fn panic_purge(&self, _env: &Env) -> usize {
        let mut inner = self.shared.write();
        let freed = inner.purge_indices() + inner.purge_slack();
        warn!(freed, "panic purge");
        freed
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.read();
        f.debug_struct("Store")
            .field("path", &inner.path)
            .field("tables", &inner.tables.len())
            .field("rows", &inner.rows.len())
            .field("commit", &inner.commit)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// Read-only database view.
pub struct Port {
    pub(crate) shared: Shared,
}

impl Port {
    /// Open a reader over the last committed image at `path` as a resumable
    /// operation. Uncommitted state of any live store on the same path is
    /// invisible here.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Thumb<Port> {
        Thumb::new(PortOpenJob {
            core: OpenCore::new(path.into()),
        })
    }

    /// Open a reader, driving the open thumb to completion.
    pub fn open_now(env: &Env, path: impl Into<PathBuf>) -> Result<Port> {
        Self::open(path).finish(env)
    }

    /// Look up `name` without allocating. On a port, `intern` and `query`
    /// coincide: there is no allocation path.
    #[must_use]
    pub fn query(&self, name: &str) -> Option<Token> {
        self.shared.read().atoms.query(name)
    }

    /// Alias of [`Port::query`]; a read-only port cannot allocate.
    #[must_use]
    pub fn intern(&self, name: &str) -> Option<Token> {
        self.query(name)
    }

    #[must_use]
    pub fn resolve(&self, token: Token) -> Option<String> {
        self.shared.read().atoms.resolve(token).map(str::to_owned)
    }

    #[must_use]
    pub fn get_table(&self, oid: Oid) -> Option<Table> {
        let inner = self.shared.read();
        inner.tables.contains_key(&oid).then(|| Table {
            store: Arc::downgrade(&self.shared),
            oid,
        })
    }

    #[must_use]
    pub fn has_table(&self, oid: Oid) -> bool {
        self.shared.read().tables.contains_key(&oid)
    }

    #[must_use]
    pub fn has_row(&self, oid: Oid) -> bool {
        self.shared.read().rows.contains_key(&oid)
    }

    #[must_use]
    pub fn get_row(&self, oid: Oid) -> Option<Row> {
        let inner = self.shared.read();
        inner.rows.contains_key(&oid).then(|| Row {
            store: Arc::downgrade(&self.shared),
            oid,
        })
    }

    /// An arbitrary table matching (scope, kind).
    #[must_use]
    pub fn get_table_kind(&self, scope: Token, kind: Token) -> Option<Table> {
        let inner = self.shared.read();
        inner
            .tables_matching(Some(scope), Some(kind))
            .first()
            .map(|oid| Table {
                store: Arc::downgrade(&self.shared),
                oid: *oid,
            })
    }

    /// Cursor over tables matching the filter; `None` is a wildcard across
    /// that dimension only.
    #[must_use]
    pub fn table_cursor(&self, scope: Option<Token>, kind: Option<Token>) -> PortTableCursor {
        PortTableCursor::new(Arc::downgrade(&self.shared), scope, kind)
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.read();
        f.debug_struct("Port")
            .field("path", &inner.path)
            .field("tables", &inner.tables.len())
            .field("readonly", &inner.readonly)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Open jobs
// ---------------------------------------------------------------------------

enum OpenPhase {
    Read,
    Decode { bytes: Vec<u8> },
}

struct OpenCore {
    path: PathBuf,
    phase: OpenPhase,
}

impl OpenCore {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            phase: OpenPhase::Read,
        }
    }

    fn step(&mut self, readonly: bool) -> Result<Step<Shared>> {
        match &mut self.phase {
            OpenPhase::Read => {
                if !self.path.exists() {
                    if readonly {
                        return Err(BurrowError::Io(std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            format!("no committed image at '{}'", self.path.display()),
                        )));
                    }
                    // Fresh store that will commit here.
                    let inner = StoreInner::fresh(Some(self.path.clone()));
                    return Ok(Step::Done(Arc::new(RwLock::new(inner))));
                }
                let bytes = std::fs::read(&self.path)?;
                self.phase = OpenPhase::Decode { bytes };
                Ok(Step::Progress {
                    current: 1,
                    total: 2,
                })
            }
            OpenPhase::Decode { bytes } => {
                let doc = snapshot::from_bytes(&self.path, bytes)?;
                let inner = snapshot::install(doc, Some(self.path.clone()), readonly)?;
                debug!(path = %self.path.display(), readonly, "store image opened");
                Ok(Step::Done(Arc::new(RwLock::new(inner))))
            }
        }
    }
}

struct StoreOpenJob {
    core: OpenCore,
}

impl Job for StoreOpenJob {
    type Output = Store;

    fn step(&mut self, _env: &Env) -> Result<Step<Store>> {
        Ok(match self.core.step(false)? {
            Step::Done(shared) => Step::Done(Store { shared }),
            Step::Progress { current, total } => Step::Progress { current, total },
        })
    }
}

struct PortOpenJob {
    core: OpenCore,
}

impl Job for PortOpenJob {
    type Output = Port;

    fn step(&mut self, _env: &Env) -> Result<Step<Port>> {
        Ok(match self.core.step(true)? {
            Step::Done(shared) => Step::Done(Port { shared }),
            Step::Progress { current, total } => Step::Progress { current, total },
        })
    }
}

// ---------------------------------------------------------------------------
// Import job
// ---------------------------------------------------------------------------

/// One source table copied per increment. Rows shared between imported
/// tables keep their sharing in the destination via the oid remap; their
/// identities are always new.
struct ImportJob {
    dest: WeakShared,
    source: WeakShared,
    tables: Vec<Oid>,
    next: usize,
    row_map: HashMap<Oid, Oid>,
}

struct TableCopy {
    scope_name: String,
    kind_name: String,
    unique: bool,
    rows: Vec<(Oid, Vec<(String, Blob)>)>,
}

impl Job for ImportJob {
    type Output = ();

    fn step(&mut self, _env: &Env) -> Result<Step<()>> {
        if self.next >= self.tables.len() {
            return Ok(Step::Done(()));
        }
        let table_oid = self.tables[self.next];
        self.next += 1;

        // Copy everything needed out of the source, then release its lock
        // before touching the destination.
        let copy = {
            let source = try_upgrade(&self.source)?;
            let inner = source.read();
            let table = inner.table_data(table_oid)?;
            let name = |t: Token| {
                inner
                    .atoms
                    .resolve(t)
                    .map_or_else(|| format!("tok{}", t.get()), str::to_owned)
            };
            TableCopy {
                scope_name: name(table.row_scope),
                kind_name: name(table.kind),
                unique: table.unique,
                rows: table
                    .members
                    .iter()
                    .filter_map(|oid| {
                        inner.rows.get(oid).map(|row| {
                            (
                                *oid,
                                row.cells
                                    .iter()
                                    .map(|c| (name(c.column), c.value.clone()))
                                    .collect(),
                            )
                        })
                    })
                    .collect(),
            }
        };

        let dest = try_upgrade(&self.dest)?;
        let mut inner = dest.write();
        inner.ensure_mutable()?;
        let scope = inner.atoms.intern(&copy.scope_name);
        let kind = inner.atoms.intern(&copy.kind_name);
        let dest_table = inner.new_table_inner(scope, kind, copy.unique);
        for (src_oid, cells) in copy.rows {
            let dest_oid = match self.row_map.get(&src_oid) {
                Some(oid) => *oid,
                None => {
                    // Always a new identity; the id-assignment mode of the
                    // scope does not apply to imports.
                    let oid = Oid::new(scope, inner.alloc_id(scope));
                    let mut data = RowData::default();
                    for (column_name, value) in cells {
                        let column = inner.atoms.intern(&column_name);
                        data.upsert(column, value);
                    }
                    inner.rows.insert(oid, data);
                    self.row_map.insert(src_oid, oid);
                    oid
                }
            };
            inner.table_add_row(dest_table, dest_oid)?;
        }
        inner.mark_dirty();
        debug!(source = %table_oid, dest = %dest_table, "table imported");

        if self.next >= self.tables.len() {
            Ok(Step::Done(()))
        } else {
            Ok(Step::Progress {
                current: self.next as u64,
                total: self.tables.len() as u64,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_types::Blob;

    fn setup() -> (Env, Store, Token, Token, Token) {
        let env = Env::new();
        let store = Store::in_memory();
        let scope = store.intern(&env, "card").unwrap();
        let kind = store.intern(&env, "deck").unwrap();
        let col = store.intern(&env, "name").unwrap();
        (env, store, scope, kind, col)
    }

    #[test]
    fn intern_twice_returns_same_token() {
        let (env, store, ..) = setup();
        let a = store.intern(&env, "x").unwrap();
        let b = store.intern(&env, "x").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.query("x"), Some(a));
        assert_eq!(store.resolve(a).as_deref(), Some("x"));
    }

    #[test]
    fn query_unknown_is_none() {
        let (_env, store, ..) = setup();
        assert_eq!(store.query("never-interned"), None);
    }

    #[test]
    fn new_table_unique_coalesces() {
        let (env, store, scope, kind, _) = setup();
        let a = store.new_table(&env, scope, kind, true).unwrap();
        let b = store.new_table(&env, scope, kind, true).unwrap();
        assert_eq!(a.oid(), b.oid());
    }

    #[test]
    fn non_unique_request_returns_prior_unique_table() {
        let (env, store, scope, kind, _) = setup();
        let unique = store.new_table(&env, scope, kind, true).unwrap();
        let later = store.new_table(&env, scope, kind, false).unwrap();
        assert_eq!(unique.oid(), later.oid());
    }

    #[test]
    fn non_unique_tables_can_duplicate() {
        let (env, store, scope, kind, _) = setup();
        let a = store.new_table(&env, scope, kind, false).unwrap();
        let b = store.new_table(&env, scope, kind, false).unwrap();
        assert_ne!(a.oid(), b.oid());
        // A later unique request coalesces onto one of them.
        let c = store.new_table(&env, scope, kind, true).unwrap();
        assert!(c.oid() == a.oid() || c.oid() == b.oid());
    }

    #[test]
    fn caller_assigned_mode_requires_hint() {
        let (env, store, scope, kind, _) = setup();
        let table = store.new_table(&env, scope, kind, true).unwrap();
        store.set_caller_assigned_ids(&env, scope).unwrap();
        assert!(store.row_scope_has_caller_assigned_ids(scope));

        let err = table.new_row(&env, None).unwrap_err();
        assert!(matches!(err, BurrowError::CallerAssignedScope { .. }));

        let oid = Oid::new(scope, 77);
        let row = table.new_row(&env, Some(oid)).unwrap();
        assert_eq!(row.oid(), oid);

        // Mode switch does not invalidate the assigned id.
        store.set_store_assigned_ids(&env, scope).unwrap();
        assert!(store.has_row(oid));
        let auto = table.new_row(&env, None).unwrap();
        assert_ne!(auto.oid(), oid);
    }

    #[test]
    fn caller_oid_collision_is_an_error() {
        let (env, store, scope, kind, _) = setup();
        let table = store.new_table(&env, scope, kind, true).unwrap();
        let oid = Oid::new(scope, 5);
        table.new_row(&env, Some(oid)).unwrap();
        let err = table.new_row(&env, Some(oid)).unwrap_err();
        assert!(matches!(err, BurrowError::OidCollision { .. }));
        assert_eq!(env.error_count(), 1);
    }

    #[test]
    fn store_assigned_ids_skip_caller_assigned_ones() {
        let (env, store, scope, kind, _) = setup();
        let table = store.new_table(&env, scope, kind, true).unwrap();
        // Table itself took an id in this scope; pick one well past it.
        table.new_row(&env, Some(Oid::new(scope, 2))).unwrap();
        let a = table.new_row(&env, None).unwrap();
        let b = table.new_row(&env, None).unwrap();
        assert_ne!(a.oid(), b.oid());
        assert!(a.oid().id != 2 && b.oid().id != 2);
    }

    #[test]
    fn mutation_marks_dirty() {
        let (env, store, scope, kind, col) = setup();
        // Interning allocated tokens, which must reach the next image.
        assert!(store.is_dirty());
        store.small_commit(&env).unwrap();
        assert!(!store.is_dirty());
        let table = store.new_table(&env, scope, kind, true).unwrap();
        assert!(store.is_dirty());
        store.small_commit(&env).unwrap();
        assert!(!store.is_dirty());
        let row = table.new_row(&env, None).unwrap();
        row.add_column(&env, col, Blob::text("v")).unwrap();
        assert!(store.is_dirty());
    }

    #[test]
    fn committed_port_reads_the_in_memory_image() {
        let (env, store, scope, kind, _) = setup();
        assert!(store.committed_port(&env).is_err());
        store.new_table(&env, scope, kind, true).unwrap();
        store.small_commit(&env).unwrap();
        store.intern(&env, "later").unwrap();
        let port = store.committed_port(&env).unwrap();
        assert!(port.query("card").is_some());
        assert_eq!(port.query("later"), None);
        let mut cursor = port.table_cursor(Some(scope), None);
        let mut seen = 0;
        while cursor.next(&env).unwrap().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 1);
    }

    #[test]
    fn second_commit_thumb_is_rejected() {
        let (env, store, scope, kind, _) = setup();
        store.new_table(&env, scope, kind, true).unwrap();
        let mut first = store.large_commit(&env).unwrap();
        let err = store.large_commit(&env).unwrap_err();
        assert!(matches!(err, BurrowError::CommitInFlight));
        // Finish the first; a new one may start.
        while !first.do_more(&env).unwrap().done {}
        assert!(!store.is_dirty());
        store.large_commit(&env).unwrap().finish(&env).unwrap();
    }

    #[test]
    fn mutation_rejected_while_committing() {
        let (env, store, scope, kind, _) = setup();
        let table = store.new_table(&env, scope, kind, true).unwrap();
        let mut thumb = store.large_commit(&env).unwrap();
        thumb.do_more(&env).unwrap();
        let err = table.new_row(&env, None).unwrap_err();
        assert!(matches!(err, BurrowError::StoreReadOnly { .. }));
        while !thumb.do_more(&env).unwrap().done {}
        table.new_row(&env, None).unwrap();
    }

    #[test]
    fn cancelled_commit_restores_dirty() {
        let (env, store, scope, kind, _) = setup();
        store.new_table(&env, scope, kind, true).unwrap();
        let mut thumb = store.large_commit(&env).unwrap();
        thumb.do_more(&env).unwrap();
        thumb.cancel();
        assert!(thumb.is_broken());
        assert!(store.is_dirty());
        assert!(!store.is_committing());
    }

    #[test]
    fn import_assigns_new_identities() {
        let env = Env::new();
        let source = Store::in_memory();
        let s_scope = source.intern(&env, "card").unwrap();
        let s_kind = source.intern(&env, "deck").unwrap();
        let s_col = source.intern(&env, "name").unwrap();
        let s_table = source.new_table(&env, s_scope, s_kind, true).unwrap();
        let s_row = s_table.new_row(&env, None).unwrap();
        s_row.add_column(&env, s_col, Blob::text("ada")).unwrap();

        let dest = Store::in_memory();
        // Pre-existing content the import must not collide with.
        let d_scope = dest.intern(&env, "card").unwrap();
        let d_kind = dest.intern(&env, "deck").unwrap();
        let d_table = dest.new_table(&env, d_scope, d_kind, false).unwrap();
        let d_row = d_table.new_row(&env, None).unwrap();

        let thumb = dest.import(&env, None, &source.as_port()).unwrap();
        thumb.finish(&env).unwrap();

        // Existing row untouched, imported row has a fresh identity.
        assert!(dest.has_row(d_row.oid()));
        let imported = dest.table_cursor(Some(d_scope), None);
        let mut found = 0;
        let mut cursor = imported;
        while let Some(table) = cursor.next(&env).unwrap() {
            found += table.count(&env).unwrap();
        }
        assert_eq!(found, 2);
        let col = dest.query("name").unwrap();
        let hits = dest
            .shared
            .read()
            .rows
            .values()
            .filter(|r| r.cell(col).is_some_and(|c| c.value == Blob::text("ada")))
            .count();
        assert_eq!(hits, 1);
    }

    #[test]
    fn import_from_self_is_rejected() {
        let (env, store, ..) = setup();
        let port = store.as_port();
        assert!(store.import(&env, None, &port).is_err());
    }

    #[test]
    fn purge_tiers_reclaim_and_never_fail() {
        let (env, store, scope, kind, col) = setup();
        let table = store.new_table(&env, scope, kind, true).unwrap();
        for i in 0..10 {
            let row = table.new_row(&env, None).unwrap();
            row.add_column(&env, col, Blob::text(&format!("v{i}"))).unwrap();
        }
        table.add_index(&env, col).unwrap().finish(&env).unwrap();
        let freed = store.idle_purge(&env);
        assert!(freed > 0);
        // Second pass has nothing left in that tier.
        assert_eq!(store.idle_purge(&env), 0);
        let _ = store.session_purge(&env, usize::MAX);
        let _ = store.panic_purge(&env);
    }
}
