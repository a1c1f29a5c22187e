//! Ordered traversal over the table's leaves.
//!
//! A [`Cursor`] is a plain position: it owns no page memory and resolves
//! itself against the [`Pager`] on every access. Moving past the last cell
//! of a leaf climbs parent pointers to the next sibling subtree and descends
//! to its leftmost leaf.

use tracing::trace;

use crate::btree;
use crate::error::{DbError, Result};
use crate::node;
use crate::pager::{PageNumber, Pager};
use crate::record::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub page_num: PageNumber,
    pub cell_num: u32,
    /// Set once the cursor has moved past the last row.
    pub end_of_table: bool,
}

impl Cursor {
    /// Position at the first row, or at end of table when there is none.
    pub fn start(pager: &mut Pager, root_page: PageNumber) -> Result<Self> {
        let page_num = btree::leftmost_leaf(pager, root_page)?;
        let mut cursor = Cursor {
            page_num,
            cell_num: 0,
            end_of_table: false,
        };
        cursor.skip_exhausted_leaf(pager)?;
        trace!(page_num = cursor.page_num, end = cursor.end_of_table, "cursor at start");
        Ok(cursor)
    }

    /// Position one past the last row of the rightmost leaf.
    pub fn end(pager: &mut Pager, root_page: PageNumber) -> Result<Self> {
        let page_num = btree::rightmost_leaf(pager, root_page)?;
        let cell_num = node::leaf_num_cells(&pager.get_page(page_num)?.data[..])?;
        Ok(Cursor {
            page_num,
            cell_num,
            end_of_table: true,
        })
    }

    /// Position at `key`, or at the first row after it when absent.
    pub fn find(pager: &mut Pager, root_page: PageNumber, key: u32) -> Result<Self> {
        let slot = btree::find(pager, root_page, key)?;
        let mut cursor = Cursor {
            page_num: slot.page_num,
            cell_num: slot.cell_num,
            end_of_table: false,
        };
        cursor.skip_exhausted_leaf(pager)?;
        Ok(cursor)
    }

    /// Step to the next row in key order.
    pub fn advance(&mut self, pager: &mut Pager) -> Result<()> {
        if self.end_of_table {
            return Ok(());
        }
        self.cell_num += 1;
        self.skip_exhausted_leaf(pager)?;
        trace!(
            page_num = self.page_num,
            cell_num = self.cell_num,
            end = self.end_of_table,
            "cursor advanced"
        );
        Ok(())
    }

    /// The serialized row under the cursor.
    pub fn value<'a>(&self, pager: &'a mut Pager) -> Result<&'a [u8]> {
        let data = &pager.get_page(self.page_num)?.data[..];
        self.check_in_bounds(data)?;
        node::leaf_value(data, self.cell_num)
    }

    pub fn key(&self, pager: &mut Pager) -> Result<u32> {
        let data = &pager.get_page(self.page_num)?.data[..];
        self.check_in_bounds(data)?;
        node::leaf_key(data, self.cell_num)
    }

    pub fn row(&self, pager: &mut Pager) -> Result<Row> {
        Row::deserialize(self.value(pager)?)
    }

    fn check_in_bounds(&self, data: &[u8]) -> Result<()> {
        let num_cells = node::leaf_num_cells(data)?;
        if self.end_of_table || self.cell_num >= num_cells {
            return Err(DbError::Corrupt(format!(
                "cursor at page {} cell {} is past the last row",
                self.page_num, self.cell_num
            )));
        }
        Ok(())
    }

    /// While the cursor sits past its leaf's last cell, move to the first
    /// cell of the next leaf. Sets `end_of_table` when no leaf follows.
    fn skip_exhausted_leaf(&mut self, pager: &mut Pager) -> Result<()> {
        for _ in 0..=pager.max_pages() {
            let num_cells = node::leaf_num_cells(&pager.get_page(self.page_num)?.data[..])?;
            if self.cell_num < num_cells {
                return Ok(());
            }
            match next_leaf(pager, self.page_num)? {
                Some(page_num) => {
                    self.page_num = page_num;
                    self.cell_num = 0;
                }
                None => {
                    self.end_of_table = true;
                    return Ok(());
                }
            }
        }
        Err(DbError::Corrupt("leaf chain does not terminate".into()))
    }
}

/// The leaf after `page_num` in key order, found by climbing to the first
/// ancestor with a later child.
fn next_leaf(pager: &mut Pager, mut page_num: PageNumber) -> Result<Option<PageNumber>> {
    for _ in 0..=pager.max_pages() {
        let data = &pager.get_page(page_num)?.data[..];
        if node::is_root(data)? {
            return Ok(None);
        }
        let parent = node::parent(data)?;

        let parent_data = &pager.get_page(parent)?.data[..];
        let num_keys = node::internal_num_keys(parent_data)?;
        let mut index = None;
        for i in 0..=num_keys {
            if node::internal_child(parent_data, i)? == page_num {
                index = Some(i);
                break;
            }
        }
        let index = index.ok_or_else(|| {
            DbError::Corrupt(format!("page {page_num} is not a child of its parent {parent}"))
        })?;

        if index < num_keys {
            let sibling = node::internal_child(parent_data, index + 1)?;
            return btree::leftmost_leaf(pager, sibling).map(Some);
        }
        page_num = parent;
    }
    Err(DbError::Corrupt("parent chain does not reach the root".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::{ExecuteResult, ROOT_PAGE};
    use crate::config::TableConfig;
    use tempfile::TempDir;

    fn tree_with_keys(keys: impl IntoIterator<Item = u32>) -> (TempDir, Pager) {
        let dir = tempfile::tempdir().unwrap();
        let mut pager = Pager::open(dir.path().join("cursor.db"), 100).unwrap();
        btree::initialize_root(&mut pager).unwrap();
        let config = TableConfig::default().with_internal_max_keys(3);
        for key in keys {
            let row = Row::new(key, format!("u{key}"), format!("u{key}@example.com"));
            assert_eq!(
                btree::insert(&mut pager, &config, &row).unwrap(),
                ExecuteResult::Success
            );
        }
        (dir, pager)
    }

    fn collect(pager: &mut Pager, mut cursor: Cursor) -> Vec<u32> {
        let mut keys = Vec::new();
        while !cursor.end_of_table {
            keys.push(cursor.key(pager).unwrap());
            cursor.advance(pager).unwrap();
        }
        keys
    }

    #[test]
    fn test_empty_table_starts_at_end() {
        let (_dir, mut pager) = tree_with_keys([]);
        let cursor = Cursor::start(&mut pager, ROOT_PAGE).unwrap();
        assert!(cursor.end_of_table);
        assert!(cursor.value(&mut pager).is_err());
    }

    #[test]
    fn test_scan_single_leaf() {
        let (_dir, mut pager) = tree_with_keys([3, 1, 2]);
        let cursor = Cursor::start(&mut pager, ROOT_PAGE).unwrap();
        assert_eq!(collect(&mut pager, cursor), vec![1, 2, 3]);
    }

    #[test]
    fn test_scan_crosses_leaves_and_levels() {
        let (_dir, mut pager) = tree_with_keys((1..=500).rev());
        let cursor = Cursor::start(&mut pager, ROOT_PAGE).unwrap();
        assert_eq!(collect(&mut pager, cursor), (1..=500).collect::<Vec<_>>());
    }

    #[test]
    fn test_find_positions_at_key_or_successor() {
        let (_dir, mut pager) = tree_with_keys((1..=200).map(|k| k * 2));

        let cursor = Cursor::find(&mut pager, ROOT_PAGE, 100).unwrap();
        assert_eq!(cursor.key(&mut pager).unwrap(), 100);
        assert_eq!(cursor.row(&mut pager).unwrap().username, "u100");

        // Odd keys are absent; the cursor lands on the next even one, even
        // when that is in the following leaf.
        for key in (1..400).step_by(2) {
            let cursor = Cursor::find(&mut pager, ROOT_PAGE, key).unwrap();
            assert_eq!(cursor.key(&mut pager).unwrap(), key + 1);
        }

        let past = Cursor::find(&mut pager, ROOT_PAGE, 401).unwrap();
        assert!(past.end_of_table);
    }

    #[test]
    fn test_end_is_past_last_row() {
        let (_dir, mut pager) = tree_with_keys(1..=120);
        let mut cursor = Cursor::end(&mut pager, ROOT_PAGE).unwrap();
        assert!(cursor.end_of_table);

        let data = pager.get_page(cursor.page_num).unwrap().data.clone();
        assert_eq!(cursor.cell_num, node::leaf_num_cells(&data[..]).unwrap());
        assert_eq!(node::leaf_key(&data[..], cursor.cell_num - 1).unwrap(), 120);

        cursor.advance(&mut pager).unwrap();
        assert!(cursor.end_of_table);
    }
}
