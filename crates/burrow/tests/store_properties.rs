//! End-to-end behavior of the public surface: seed discipline, ordering,
//! membership, merges, search, cursors, and token allocation.

use burrow::{Blob, BurrowError, Env, Row, Store, Table, Token};

struct Fixture {
    env: Env,
    store: Store,
    table: Table,
    name: Token,
    mail: Token,
}

fn fixture() -> Fixture {
    let env = Env::new();
    let store = Store::in_memory();
    let person = store.intern(&env, "person").unwrap();
    let contacts = store.intern(&env, "contacts").unwrap();
    let name = store.intern(&env, "name").unwrap();
    let mail = store.intern(&env, "mail").unwrap();
    let table = store.new_table(&env, person, contacts, true).unwrap();
    Fixture {
        env,
        store,
        table,
        name,
        mail,
    }
}

impl Fixture {
    fn named_row(&self, value: &str) -> Row {
        let row = self.table.new_row(&self.env, None).unwrap();
        row.add_column(&self.env, self.name, Blob::text(value))
            .unwrap();
        row
    }

    /// Sort-column values in table order; rows without the column are
    /// skipped.
    fn names_in_order(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut cursor = self.table.row_cursor();
        while let Some(row) = cursor.next(&self.env).unwrap() {
            if let Some(value) = row.cell(&self.env, self.name).unwrap() {
                out.push(value.as_text().unwrap().to_owned());
            }
        }
        out
    }
}

// === seed discipline ===

#[test]
fn seed_moves_once_per_membership_change_and_never_for_plain_edits() {
    let f = fixture();
    let row = f.named_row("ada");
    let s0 = f.table.seed(&f.env).unwrap();

    // Value edits on an unsorted table leave the seed alone.
    row.add_column(&f.env, f.name, Blob::text("grace")).unwrap();
    row.add_column(&f.env, f.mail, Blob::text("g@x")).unwrap();
    assert_eq!(f.table.seed(&f.env).unwrap(), s0);

    // One cut, one bump.
    f.table.cut_row(&f.env, &row).unwrap();
    let s1 = f.table.seed(&f.env).unwrap();
    assert_ne!(s1, s0);

    // One add, one bump.
    f.table.add_row(&f.env, &row).unwrap();
    let s2 = f.table.seed(&f.env).unwrap();
    assert_ne!(s2, s1);
}

#[test]
fn editing_the_sort_column_bumps_only_when_order_changes() {
    let f = fixture();
    f.named_row("b");
    let row = f.named_row("m");
    f.named_row("x");
    f.table
        .sort_by_column(&f.env, Some(f.name))
        .unwrap()
        .finish(&f.env)
        .unwrap();
    let sorted = f.table.seed(&f.env).unwrap();

    // Still between "b" and "x": position unchanged, seed unchanged.
    row.add_column(&f.env, f.name, Blob::text("n")).unwrap();
    assert_eq!(f.table.seed(&f.env).unwrap(), sorted);
    assert_eq!(f.names_in_order(), vec!["b", "n", "x"]);

    // Moves to the front: order changed, seed moved.
    row.add_column(&f.env, f.name, Blob::text("a")).unwrap();
    assert_ne!(f.table.seed(&f.env).unwrap(), sorted);
    assert_eq!(f.names_in_order(), vec!["a", "b", "x"]);
}

// === ordering ===

#[test]
fn sorted_order_is_total_with_oid_tiebreak() {
    let f = fixture();
    let b1 = f.named_row("b");
    f.named_row("a");
    let b2 = f.named_row("b");
    f.named_row("c");
    // A row missing the sort column orders first.
    let blank = f.table.new_row(&f.env, None).unwrap();

    f.table
        .sort_by_column(&f.env, Some(f.name))
        .unwrap()
        .finish(&f.env)
        .unwrap();

    assert_eq!(f.table.row_at(&f.env, 0).unwrap().unwrap().oid(), blank.oid());
    // Equal values fall back to oid order.
    let pos_b1 = f.table.has_row(&f.env, &b1).unwrap().unwrap();
    let pos_b2 = f.table.has_row(&f.env, &b2).unwrap().unwrap();
    assert!(pos_b1 < pos_b2);
    assert_eq!(f.names_in_order(), vec!["a", "b", "b", "c"]);
}

#[test]
fn unsetting_the_sort_restores_insertion_order() {
    let f = fixture();
    for v in ["c", "a", "b"] {
        f.named_row(v);
    }
    f.table
        .sort_by_column(&f.env, Some(f.name))
        .unwrap()
        .finish(&f.env)
        .unwrap();
    assert_eq!(f.names_in_order(), vec!["a", "b", "c"]);

    f.table
        .sort_by_column(&f.env, None)
        .unwrap()
        .finish(&f.env)
        .unwrap();
    assert_eq!(f.names_in_order(), vec!["c", "a", "b"]);
}

#[test]
fn move_row_reorders_unsorted_tables_only() {
    let f = fixture();
    let a = f.named_row("a");
    f.named_row("b");
    f.named_row("c");

    let landed = f.table.move_row(&f.env, &a, Some(0), 2).unwrap();
    assert_eq!(landed, 2);
    assert_eq!(f.names_in_order(), vec!["b", "c", "a"]);

    f.table
        .sort_by_column(&f.env, Some(f.name))
        .unwrap()
        .finish(&f.env)
        .unwrap();
    // On a sorted table a move is a benign no-op reporting the current spot.
    let pos = f.table.has_row(&f.env, &a).unwrap().unwrap();
    assert_eq!(f.table.move_row(&f.env, &a, None, 0).unwrap(), pos);
    assert_eq!(f.names_in_order(), vec!["a", "b", "c"]);
}

// === membership ===

#[test]
fn add_row_is_idempotent() {
    let f = fixture();
    let row = f.named_row("ada");
    let count = f.table.count(&f.env).unwrap();
    let seed = f.table.seed(&f.env).unwrap();

    f.table.add_row(&f.env, &row).unwrap();
    assert_eq!(f.table.count(&f.env).unwrap(), count);
    assert_eq!(f.table.seed(&f.env).unwrap(), seed);
}

#[test]
fn one_row_shared_by_two_tables_is_the_same_data() {
    let f = fixture();
    let person = f.store.query("person").unwrap();
    let starred = f.store.intern(&f.env, "starred").unwrap();
    let other = f.store.new_table(&f.env, person, starred, true).unwrap();

    let row = f.named_row("ada");
    other.add_row(&f.env, &row).unwrap();

    // Edit through the second table's view of the row.
    let through_other = other.row_at(&f.env, 0).unwrap().unwrap();
    through_other
        .add_column(&f.env, f.mail, Blob::text("ada@x"))
        .unwrap();
    assert_eq!(
        row.cell(&f.env, f.mail).unwrap(),
        Some(Blob::text("ada@x"))
    );

    // Cutting from one table leaves the other's membership intact.
    f.table.cut_row(&f.env, &row).unwrap();
    assert_eq!(other.count(&f.env).unwrap(), 1);
    assert!(f.store.has_row(row.oid()));
}

// === merges ===

#[test]
fn union_prefers_the_later_source() {
    let f = fixture();
    let r1 = f.table.new_row(&f.env, None).unwrap();
    r1.add_column(&f.env, f.name, Blob::text("from-r1")).unwrap();
    r1.add_column(&f.env, f.mail, Blob::text("r1@x")).unwrap();
    let r2 = f.table.new_row(&f.env, None).unwrap();
    r2.add_column(&f.env, f.mail, Blob::text("r2@x")).unwrap();

    let r3 = f.table.new_row(&f.env, None).unwrap();
    r3.union_from(&f.env, &r1).unwrap();
    r3.union_from(&f.env, &r2).unwrap();

    // Columns only in r1 survive; columns in both take r2's value.
    assert_eq!(r3.cell(&f.env, f.name).unwrap(), Some(Blob::text("from-r1")));
    assert_eq!(r3.cell(&f.env, f.mail).unwrap(), Some(Blob::text("r2@x")));
}

#[test]
fn assign_makes_an_exact_duplicate() {
    let f = fixture();
    let src = f.named_row("ada");
    let dst = f.table.new_row(&f.env, None).unwrap();
    dst.add_column(&f.env, f.mail, Blob::text("gone@x")).unwrap();

    dst.assign_from(&f.env, &src).unwrap();
    assert_eq!(dst.cell(&f.env, f.name).unwrap(), Some(Blob::text("ada")));
    assert_eq!(dst.cell(&f.env, f.mail).unwrap(), None);
    assert_eq!(dst.count(&f.env).unwrap(), src.count(&f.env).unwrap());
}

// === search ===

#[test]
fn prefix_search_on_the_sorted_column() {
    let f = fixture();
    for v in ["ab", "ac", "b", "ba"] {
        f.named_row(v);
    }
    f.table
        .sort_by_column(&f.env, Some(f.name))
        .unwrap()
        .finish(&f.env)
        .unwrap();

    let range = f
        .table
        .search_one_sorted_column(&f.env, f.name, &Blob::text("a"))
        .unwrap();
    assert_eq!(range, 0..2);

    let miss = f
        .table
        .search_one_sorted_column(&f.env, f.name, &Blob::text("z"))
        .unwrap();
    assert!(miss.is_empty());
    assert_eq!(miss.start, 4);
}

#[test]
fn search_requires_the_active_sort_column() {
    let f = fixture();
    f.named_row("ada");
    let err = f
        .table
        .search_one_sorted_column(&f.env, f.name, &Blob::text("a"))
        .unwrap_err();
    assert!(matches!(err, BurrowError::NotSorted { .. }));
    assert_eq!(f.env.error_count(), 1);
}

#[test]
fn indexed_search_agrees_with_the_scan() {
    let f = fixture();
    for v in ["ab", "ac", "b", "ba", "aa"] {
        f.named_row(v);
    }
    f.table
        .sort_by_column(&f.env, Some(f.name))
        .unwrap()
        .finish(&f.env)
        .unwrap();
    let scanned = f
        .table
        .search_one_sorted_column(&f.env, f.name, &Blob::text("a"))
        .unwrap();

    f.table
        .add_index(&f.env, f.name)
        .unwrap()
        .finish(&f.env)
        .unwrap();
    let indexed = f
        .table
        .search_one_sorted_column(&f.env, f.name, &Blob::text("a"))
        .unwrap();
    assert_eq!(indexed, scanned);

    // Mutate, then search again: the lazy rebuild must still agree.
    f.named_row("ad");
    let rebuilt = f
        .table
        .search_one_sorted_column(&f.env, f.name, &Blob::text("a"))
        .unwrap();
    assert_eq!(rebuilt, 0..4);
}

#[test]
fn search_during_a_batch_sees_sorted_positions() {
    let f = fixture();
    f.table
        .sort_by_column(&f.env, Some(f.name))
        .unwrap()
        .finish(&f.env)
        .unwrap();

    f.table.start_batch(&f.env, "load").unwrap();
    for v in ["b", "ab", "ac", "ba"] {
        f.named_row(v);
    }
    // Members sit in append order until the batch settles; the search must
    // answer against sorted positions anyway.
    let range = f
        .table
        .search_one_sorted_column(&f.env, f.name, &Blob::text("a"))
        .unwrap();
    assert_eq!(range, 0..2);
    for pos in range {
        let row = f.table.row_at(&f.env, pos).unwrap().unwrap();
        let value = row.cell(&f.env, f.name).unwrap().unwrap();
        assert!(value.as_bytes().starts_with(b"a"));
    }
    f.table.end_batch(&f.env, "load").unwrap();
    assert_eq!(f.names_in_order(), vec!["ab", "ac", "b", "ba"]);
}

#[test]
fn multi_column_search_finds_hits_across_columns() {
    let f = fixture();
    let r1 = f.named_row("ada");
    r1.add_column(&f.env, f.mail, Blob::text("ada@x")).unwrap();
    let r2 = f.table.new_row(&f.env, None).unwrap();
    r2.add_column(&f.env, f.mail, Blob::text("adjacent@x"))
        .unwrap();
    f.named_row("grace");

    let hits = f
        .table
        .search_many_columns(&f.env, &Blob::text("ad"), &[f.name, f.mail], None)
        .unwrap()
        .finish(&f.env)
        .unwrap();
    // r1 matches on both columns, r2 on mail only.
    assert_eq!(hits.hits.len(), 3);
    assert_eq!(hits.rows(), vec![r1.oid(), r2.oid()]);
}

// === cursors ===

#[test]
fn cursor_survives_removal_of_the_row_under_it() {
    let f = fixture();
    f.named_row("a");
    f.named_row("b");
    f.named_row("c");

    let mut cursor = f.table.row_cursor();
    let first = cursor.next(&f.env).unwrap().unwrap();

    // Remove position 0 through another handle mid-walk.
    f.table.cut_row(&f.env, &first).unwrap();
    assert_eq!(f.table.count(&f.env).unwrap(), 2);

    let mut rest = Vec::new();
    while let Some(row) = cursor.next(&f.env).unwrap() {
        rest.push(row.cell(&f.env, f.name).unwrap().unwrap());
    }
    assert_eq!(rest, vec![Blob::text("b"), Blob::text("c")]);
}

// === batches ===

#[test]
fn batched_mutation_ends_in_the_same_order_as_unbatched() {
    let f = fixture();
    f.table
        .sort_by_column(&f.env, Some(f.name))
        .unwrap()
        .finish(&f.env)
        .unwrap();

    f.table.start_batch(&f.env, "load").unwrap();
    for v in ["d", "b", "e", "a", "c"] {
        f.named_row(v);
    }
    f.table.end_batch(&f.env, "load").unwrap();

    assert_eq!(f.names_in_order(), vec!["a", "b", "c", "d", "e"]);
}

#[test]
fn mismatched_batch_labels_warn_but_proceed() {
    let f = fixture();
    f.table.start_batch(&f.env, "outer").unwrap();
    f.table.end_batch(&f.env, "wrong").unwrap();
    assert_eq!(f.env.warning_count(), 1);
    assert_eq!(f.env.error_count(), 0);
}

// === token allocation ===

#[test]
fn intern_is_stable_and_query_never_allocates() {
    let env = Env::new();
    let store = Store::in_memory();
    let a = store.intern(&env, "x").unwrap();
    let b = store.intern(&env, "x").unwrap();
    assert_eq!(a, b);

    assert_eq!(store.query("y"), None);
    // The failed query did not allocate: a later intern of a different name
    // gets the next token after "x".
    let c = store.intern(&env, "z").unwrap();
    assert_eq!(c.get(), a.get() + 1);
}

// === env conditions ===

#[test]
fn hook_sees_errors_and_counters_accumulate() {
    let f = fixture();
    let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = std::rc::Rc::clone(&seen);
    f.env.set_hook(move |severity, message| {
        sink.borrow_mut().push((severity, message.to_owned()));
    });

    let bogus = f.named_row("x");
    f.table.cut_row(&f.env, &bogus).unwrap();
    let err = f
        .table
        .new_row(&f.env, Some(f.named_row("y").oid()))
        .unwrap_err();
    assert!(matches!(err, BurrowError::OidCollision { .. }));
    assert_eq!(f.env.error_count(), 1);
    assert_eq!(seen.borrow().len(), 1);

    f.env.clear_counters();
    assert_eq!(f.env.error_count(), 0);
}
