/// End-to-end tests for minidb: ordering, uniqueness, capacity, persistence
/// and the on-disk format.
use std::collections::BTreeSet;
use std::path::Path;

use minidb::format::{
    EMAIL_SIZE, LEAF_NODE_CELL_SIZE, LEAF_NODE_HEADER_SIZE, LEAF_NODE_MAX_CELLS, PAGE_SIZE,
    USERNAME_SIZE,
};
use minidb::{DbError, ExecuteResult, Row, SplitPolicy, Table, TableConfig};
use proptest::prelude::*;

fn row(id: u32) -> Row {
    Row::new(id, format!("user{id}"), format!("person{id}@example.com"))
}

fn ids(table: &mut Table) -> Vec<u32> {
    table.select_all().unwrap().into_iter().map(|r| r.id).collect()
}

fn open(path: &Path, config: TableConfig) -> Table {
    Table::open_with(path, config).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn scan_is_sorted_for_any_insert_order(
        keys in prop::collection::vec(0u32..2_000, 0..400),
        split in any::<bool>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let policy = if split { SplitPolicy::Split } else { SplitPolicy::Reject };
        let config = TableConfig::default()
            .with_internal_max_keys(4)
            .with_split_policy(policy);
        let mut table = open(&dir.path().join("prop.db"), config);

        let mut stored = BTreeSet::new();
        for key in keys {
            match table.insert(&row(key)).unwrap() {
                ExecuteResult::Success => {
                    prop_assert!(stored.insert(key));
                }
                ExecuteResult::DuplicateKey => {
                    prop_assert!(stored.contains(&key));
                }
                ExecuteResult::TableFull => {
                    prop_assert_eq!(policy, SplitPolicy::Reject);
                    prop_assert_eq!(stored.len(), LEAF_NODE_MAX_CELLS);
                }
            }
        }

        let scanned = table.select_all().unwrap();
        let expected: Vec<Row> = stored.iter().map(|&k| row(k)).collect();
        prop_assert_eq!(scanned, expected);
    }
}

#[test]
fn test_duplicate_keeps_first_row() {
    let dir = tempfile::tempdir().unwrap();
    let mut table = Table::open(dir.path().join("dup.db")).unwrap();

    assert_eq!(table.insert(&row(7)).unwrap(), ExecuteResult::Success);
    let other = Row::new(7, "mallory", "mallory@example.com");
    assert_eq!(table.insert(&other).unwrap(), ExecuteResult::DuplicateKey);

    assert_eq!(table.select_all().unwrap(), vec![row(7)]);
}

fn check_capacity_boundary(policy: SplitPolicy) {
    let dir = tempfile::tempdir().unwrap();
    let config = TableConfig::default().with_split_policy(policy);
    let mut table = open(&dir.path().join("cap.db"), config);

    for id in 1..=LEAF_NODE_MAX_CELLS as u32 {
        assert_eq!(table.insert(&row(id)).unwrap(), ExecuteResult::Success);
    }
    assert_eq!(table.page_count(), 1);

    let next = LEAF_NODE_MAX_CELLS as u32 + 1;
    match policy {
        SplitPolicy::Reject => {
            assert_eq!(table.insert(&row(next)).unwrap(), ExecuteResult::TableFull);
            assert_eq!(table.page_count(), 1);
            assert_eq!(ids(&mut table).len(), LEAF_NODE_MAX_CELLS);
        }
        SplitPolicy::Split => {
            assert_eq!(table.insert(&row(next)).unwrap(), ExecuteResult::Success);
            assert_eq!(table.page_count(), 3);
            let tree = table.dump_tree().unwrap();
            assert!(tree.starts_with("- internal (size 1)\n"));
            assert_eq!(tree.matches("- leaf (size 27)").count(), 2);
            assert_eq!(ids(&mut table), (1..=next).collect::<Vec<_>>());
        }
    }
}

#[test]
fn test_capacity_boundary_reject() {
    check_capacity_boundary(SplitPolicy::Reject);
}

#[test]
fn test_capacity_boundary_split() {
    check_capacity_boundary(SplitPolicy::Split);
}

#[test]
fn test_persistence_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("persist.db");

    {
        let mut table = Table::open(&path).unwrap();
        for id in (1..=1000).rev() {
            assert_eq!(table.insert(&row(id)).unwrap(), ExecuteResult::Success);
        }
        table.close().unwrap();
    }

    let len = std::fs::metadata(&path).unwrap().len();
    assert_eq!(len % PAGE_SIZE as u64, 0);

    let mut table = Table::open(&path).unwrap();
    assert_eq!(table.page_count() as u64, len / PAGE_SIZE as u64);
    assert_eq!(ids(&mut table), (1..=1000).collect::<Vec<_>>());
    assert_eq!(table.get(500).unwrap(), Some(row(500)));
    assert_eq!(table.insert(&row(500)).unwrap(), ExecuteResult::DuplicateKey);
}

#[test]
fn test_multi_level_tree_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deep.db");
    let config = TableConfig::default()
        .with_max_pages(400)
        .with_internal_max_keys(3);

    let keys: Vec<u32> = (0..1500).map(|i| (i * 7_919) % 10_007).collect();
    let before = {
        let mut table = open(&path, config.clone());
        for &key in &keys {
            assert_eq!(table.insert(&row(key)).unwrap(), ExecuteResult::Success);
        }
        let tree = table.dump_tree().unwrap();
        // Root, at least two internal levels, then leaves.
        assert!(tree.contains("\n    - internal"));
        table.close().unwrap();
        tree
    };

    let mut table = open(&path, config);
    assert_eq!(table.dump_tree().unwrap(), before);

    let mut expected = keys.clone();
    expected.sort_unstable();
    assert_eq!(ids(&mut table), expected);

    // Keep growing after the reopen.
    for key in 20_000..20_200 {
        assert_eq!(table.insert(&row(key)).unwrap(), ExecuteResult::Success);
    }
    expected.extend(20_000..20_200);
    assert_eq!(ids(&mut table), expected);
}

#[test]
fn test_long_strings_truncate_to_width() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trunc.db");
    let long = Row::new(1, "n".repeat(USERNAME_SIZE + 10), "m".repeat(EMAIL_SIZE + 10));

    let mut table = Table::open(&path).unwrap();
    assert_eq!(table.insert(&long).unwrap(), ExecuteResult::Success);
    table.close().unwrap();

    let mut table = Table::open(&path).unwrap();
    let got = table.get(1).unwrap().unwrap();
    assert_eq!(got.username, "n".repeat(USERNAME_SIZE));
    assert_eq!(got.email, "m".repeat(EMAIL_SIZE));
}

#[test]
fn test_page_ceiling_refuses_split() {
    let dir = tempfile::tempdir().unwrap();
    let config = TableConfig::default().with_max_pages(3);
    let mut table = open(&dir.path().join("ceiling.db"), config);

    // The first split uses all three pages.
    for id in 1..=LEAF_NODE_MAX_CELLS as u32 + 1 {
        assert_eq!(table.insert(&row(id)).unwrap(), ExecuteResult::Success);
    }
    assert_eq!(table.page_count(), 3);

    // Fill the right leaf, then the next split has nowhere to go.
    let mut id = LEAF_NODE_MAX_CELLS as u32 + 2;
    while table.insert(&row(id)).unwrap() == ExecuteResult::Success {
        id += 1;
    }
    let tree = table.dump_tree().unwrap();
    assert_eq!(table.insert(&row(id)).unwrap(), ExecuteResult::TableFull);
    assert_eq!(table.dump_tree().unwrap(), tree);
    assert_eq!(table.page_count(), 3);
    assert_eq!(ids(&mut table), (1..id).collect::<Vec<_>>());

    // Keys that land in a leaf with room still go in.
    assert_eq!(table.insert(&row(0)).unwrap(), ExecuteResult::Success);
}

#[test]
fn test_huge_page_limit_opens_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("huge.db");
    let config = TableConfig::default().with_max_pages(u32::MAX - 1);
    assert!(config.validate().is_ok());

    let mut table = open(&path, config.clone());
    for id in 1..=60 {
        assert_eq!(table.insert(&row(id)).unwrap(), ExecuteResult::Success);
    }
    table.close().unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 3 * PAGE_SIZE as u64);

    let mut table = open(&path, config);
    assert_eq!(ids(&mut table), (1..=60).collect::<Vec<_>>());
}

#[test]
fn test_failed_dump_leaf_does_not_grow_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dump.db");

    let mut table = Table::open(&path).unwrap();
    table.insert(&row(1)).unwrap();
    assert!(matches!(table.dump_leaf(50), Err(DbError::PageNotAllocated(50))));
    assert_eq!(table.page_count(), 1);
    table.close().unwrap();

    assert_eq!(std::fs::metadata(&path).unwrap().len(), PAGE_SIZE as u64);
}

#[test]
fn test_rejects_partial_page_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.db");
    std::fs::write(&path, vec![0u8; PAGE_SIZE + 100]).unwrap();

    assert!(matches!(Table::open(&path), Err(DbError::Corrupt(_))));
}

#[test]
fn test_rejects_unknown_root_tag() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tag.db");
    let mut page = vec![0u8; PAGE_SIZE];
    page[0] = 0x2a;
    page[1] = 1;
    std::fs::write(&path, page).unwrap();

    assert!(matches!(Table::open(&path), Err(DbError::Corrupt(_))));
}

#[test]
fn test_on_disk_leaf_layout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("layout.db");

    let mut table = Table::open(&path).unwrap();
    table.insert(&Row::new(0x0102, "ab", "c@d")).unwrap();
    table.close().unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len(), PAGE_SIZE);
    // Leaf tag, root flag, parent 0, one cell.
    assert_eq!(bytes[..LEAF_NODE_HEADER_SIZE], [1, 1, 0, 0, 0, 0, 1, 0, 0, 0]);

    let cell = &bytes[LEAF_NODE_HEADER_SIZE..LEAF_NODE_HEADER_SIZE + LEAF_NODE_CELL_SIZE];
    // Key slot is little-endian, the row's id slot big-endian.
    assert_eq!(cell[..8], [0x02, 0x01, 0, 0, 0, 0, 0, 0]);
    assert_eq!(cell[8..16], [0, 0, 0, 0, 0, 0, 0x01, 0x02]);
    assert_eq!(&cell[16..18], b"ab");
    assert_eq!(&cell[36..39], b"c@d");
    assert!(bytes[LEAF_NODE_HEADER_SIZE + LEAF_NODE_CELL_SIZE..]
        .iter()
        .all(|&b| b == 0));
}

#[test]
fn test_same_inserts_produce_identical_files() {
    let dir = tempfile::tempdir().unwrap();
    let write = |name: &str| {
        let path = dir.path().join(name);
        let mut table = Table::open(&path).unwrap();
        for id in (0..300).map(|i| (i * 37) % 301) {
            table.insert(&row(id)).unwrap();
        }
        table.close().unwrap();
        std::fs::read(path).unwrap()
    };

    assert_eq!(write("a.db"), write("b.db"));
}
