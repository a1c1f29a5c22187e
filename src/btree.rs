// B+tree engine for the table.
//
// - Key search: binary search inside leaves, separator search inside
//   internal nodes
// - Insertion with leaf splitting and recursive internal splitting
// - Root growth: the root always stays on page 0, its old contents move to
//   a freshly allocated left child
// - Diagnostic dumps of a leaf or the whole tree
//
// Internal node invariant: key[i] is the maximum key in the subtree of
// child[i]; the right child covers everything above the last key.

use std::fmt::Write as _;

use tracing::{debug, trace, warn};

use crate::config::{SplitPolicy, TableConfig};
use crate::error::{DbError, Result};
use crate::format::{
    self, NodeType, INTERNAL_NODE_CELL_SIZE, INTERNAL_NODE_HEADER_SIZE, INTERNAL_NODE_MAX_KEYS,
    LEAF_NODE_CELL_SIZE, LEAF_NODE_HEADER_SIZE, LEAF_NODE_LEFT_SPLIT_COUNT, LEAF_NODE_MAX_CELLS,
    LEAF_NODE_VALUE_OFFSET,
};
use crate::node;
use crate::pager::{Page, PageNumber, Pager};
use crate::record::Row;

/// The root never moves.
pub const ROOT_PAGE: PageNumber = 0;

/// Outcome of an insert that did not hit an I/O or corruption error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteResult {
    Success,
    TableFull,
    DuplicateKey,
}

/// A (leaf page, cell index) position produced by a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafSlot {
    pub page_num: PageNumber,
    pub cell_num: u32,
}

type Cell = [u8; LEAF_NODE_CELL_SIZE];

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// Initialize page 0 of an empty file as a root leaf.
pub fn initialize_root(pager: &mut Pager) -> Result<()> {
    let page = pager.get_page_mut(ROOT_PAGE)?;
    node::initialize_leaf(&mut page.data[..])?;
    node::set_root(&mut page.data[..], true)?;
    node::set_parent(&mut page.data[..], ROOT_PAGE)
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Locate the leaf slot where `key` is, or where it would be inserted.
pub fn find(pager: &mut Pager, root_page: PageNumber, key: u32) -> Result<LeafSlot> {
    let mut page_num = root_page;
    let mut depth = 0u32;

    loop {
        let data = &pager.get_page(page_num)?.data[..];
        match node::node_type(data)? {
            NodeType::Leaf => {
                let cell_num = leaf_find(data, key)?;
                trace!(key, page_num, cell_num, "found leaf slot");
                return Ok(LeafSlot { page_num, cell_num });
            }
            NodeType::Internal => {
                let child_index = internal_find_child(data, key)?;
                page_num = node::internal_child(data, child_index)?;
            }
        }

        depth += 1;
        if depth > pager.max_pages() {
            return Err(DbError::Corrupt("tree descent does not terminate".into()));
        }
    }
}

/// Binary search over a leaf's sorted keys. Returns the slot holding `key`,
/// or the slot where it belongs when absent.
pub fn leaf_find(data: &[u8], key: u32) -> Result<u32> {
    let mut low = 0u32;
    let mut high = node::leaf_num_cells(data)?;

    while low != high {
        let mid = low + (high - low) / 2;
        let key_at_mid = node::leaf_key(data, mid)?;
        if key == key_at_mid {
            return Ok(mid);
        }
        if key < key_at_mid {
            high = mid;
        } else {
            low = mid + 1;
        }
    }

    Ok(low)
}

/// Index of the child to descend into: the first separator >= `key`, or the
/// right child (index `num_keys`) when `key` is above every separator.
pub fn internal_find_child(data: &[u8], key: u32) -> Result<u32> {
    let mut low = 0u32;
    let mut high = node::internal_num_keys(data)?;

    while low < high {
        let mid = low + (high - low) / 2;
        if node::internal_key(data, mid)? >= key {
            high = mid;
        } else {
            low = mid + 1;
        }
    }

    Ok(low)
}

/// The largest key stored under `page_num`.
pub fn node_max_key(pager: &mut Pager, mut page_num: PageNumber) -> Result<u32> {
    for _ in 0..=pager.max_pages() {
        let data = &pager.get_page(page_num)?.data[..];
        match node::node_type(data)? {
            NodeType::Leaf => {
                let num_cells = node::leaf_num_cells(data)?;
                if num_cells == 0 {
                    return Err(DbError::Corrupt(format!(
                        "empty leaf {page_num} has no max key"
                    )));
                }
                return node::leaf_key(data, num_cells - 1);
            }
            NodeType::Internal => page_num = node::internal_right_child(data)?,
        }
    }
    Err(DbError::Corrupt("tree descent does not terminate".into()))
}

/// Follow child 0 down to the leftmost leaf.
pub fn leftmost_leaf(pager: &mut Pager, page_num: PageNumber) -> Result<PageNumber> {
    descend(pager, page_num, |_| Ok(0))
}

/// Follow the right child down to the rightmost leaf.
pub fn rightmost_leaf(pager: &mut Pager, page_num: PageNumber) -> Result<PageNumber> {
    descend(pager, page_num, node::internal_num_keys)
}

fn descend(
    pager: &mut Pager,
    mut page_num: PageNumber,
    pick: impl Fn(&[u8]) -> Result<u32>,
) -> Result<PageNumber> {
    for _ in 0..=pager.max_pages() {
        let data = &pager.get_page(page_num)?.data[..];
        match node::node_type(data)? {
            NodeType::Leaf => return Ok(page_num),
            NodeType::Internal => {
                let index = pick(data)?;
                page_num = node::internal_child(data, index)?;
            }
        }
    }
    Err(DbError::Corrupt("tree descent does not terminate".into()))
}

// ---------------------------------------------------------------------------
// Insertion
// ---------------------------------------------------------------------------

/// Insert a row keyed by its id.
pub fn insert(pager: &mut Pager, config: &TableConfig, row: &Row) -> Result<ExecuteResult> {
    let key = row.id;
    let slot = find(pager, ROOT_PAGE, key)?;

    let num_cells = {
        let data = &pager.get_page(slot.page_num)?.data[..];
        let num_cells = node::leaf_num_cells(data)?;
        if slot.cell_num < num_cells && node::leaf_key(data, slot.cell_num)? == key {
            return Ok(ExecuteResult::DuplicateKey);
        }
        num_cells
    };

    if (num_cells as usize) < LEAF_NODE_MAX_CELLS {
        leaf_insert(pager, slot, key, row)?;
        return Ok(ExecuteResult::Success);
    }

    match config.split_policy {
        SplitPolicy::Reject => {
            debug!(key, page_num = slot.page_num, "leaf full and splitting disabled");
            Ok(ExecuteResult::TableFull)
        }
        SplitPolicy::Split => {
            let needed = pages_needed_for_split(pager, config, slot.page_num)?;
            if !pager.has_room_for(needed) {
                warn!(
                    key,
                    needed,
                    max_pages = pager.max_pages(),
                    "split would exceed the page limit"
                );
                return Ok(ExecuteResult::TableFull);
            }
            leaf_split_and_insert(pager, config, slot, key, row)?;
            Ok(ExecuteResult::Success)
        }
    }
}

/// Insert into a leaf that has room, shifting later cells right.
fn leaf_insert(pager: &mut Pager, slot: LeafSlot, key: u32, row: &Row) -> Result<()> {
    let data = &mut pager.get_page_mut(slot.page_num)?.data[..];
    let num_cells = node::leaf_num_cells(data)?;

    node::shift_leaf_cells_right(data, slot.cell_num, num_cells)?;
    node::set_leaf_num_cells(data, num_cells + 1)?;
    node::set_leaf_key(data, slot.cell_num, key)?;
    row.serialize(node::leaf_value_mut(data, slot.cell_num)?)
}

/// Count the pages a split starting at `leaf_page` will allocate: one
/// sibling per splitting node, plus one more if the root splits.
fn pages_needed_for_split(
    pager: &mut Pager,
    config: &TableConfig,
    leaf_page: PageNumber,
) -> Result<u32> {
    let mut needed = 1;
    let mut page_num = leaf_page;

    for _ in 0..=pager.max_pages() {
        let data = &pager.get_page(page_num)?.data[..];
        if node::is_root(data)? {
            return Ok(needed + 1);
        }
        let parent = node::parent(data)?;
        let parent_keys = node::internal_num_keys(&pager.get_page(parent)?.data[..])?;
        if parent_keys < internal_capacity(config) {
            return Ok(needed);
        }
        needed += 1;
        page_num = parent;
    }
    Err(DbError::Corrupt("parent chain does not reach the root".into()))
}

fn internal_capacity(config: &TableConfig) -> u32 {
    config.internal_max_keys.min(INTERNAL_NODE_MAX_KEYS as u32)
}

/// Split a full leaf into itself and a new right sibling, placing the new
/// cell in whichever half keeps keys ordered, then update the parent.
fn leaf_split_and_insert(
    pager: &mut Pager,
    config: &TableConfig,
    slot: LeafSlot,
    key: u32,
    row: &Row,
) -> Result<()> {
    let old_page = slot.page_num;
    let (mut cells, was_root, old_parent) = {
        let data = &pager.get_page(old_page)?.data[..];
        (read_leaf_cells(data)?, node::is_root(data)?, node::parent(data)?)
    };

    let mut new_cell = [0u8; LEAF_NODE_CELL_SIZE];
    format::write_le_u64(&mut new_cell, 0, key as u64);
    row.serialize(&mut new_cell[LEAF_NODE_VALUE_OFFSET..])?;
    cells.insert(slot.cell_num as usize, new_cell);

    let (left, right) = cells.split_at(LEAF_NODE_LEFT_SPLIT_COUNT);
    let left_max = format::read_le_u64(&left[left.len() - 1], 0) as u32;

    let new_page = pager.unused_page_num();
    {
        let data = &mut pager.get_page_mut(new_page)?.data[..];
        node::initialize_leaf(data)?;
        node::set_root(data, false)?;
        node::set_parent(data, old_parent)?;
        write_leaf_cells(data, right)?;
    }
    write_leaf_cells(&mut pager.get_page_mut(old_page)?.data[..], left)?;

    debug!(
        old_page,
        new_page,
        left = left.len(),
        right = right.len(),
        "split leaf"
    );

    if was_root {
        create_new_root(pager, new_page)
    } else {
        internal_insert_split_child(pager, config, old_parent, old_page, left_max, new_page)
    }
}

fn read_leaf_cells(data: &[u8]) -> Result<Vec<Cell>> {
    let num_cells = node::leaf_num_cells(data)?;
    let mut cells = Vec::with_capacity(num_cells as usize + 1);
    for i in 0..num_cells {
        let cell = Cell::try_from(node::leaf_cell(data, i)?)
            .map_err(|_| DbError::Corrupt(format!("leaf cell {i} has the wrong size")))?;
        cells.push(cell);
    }
    Ok(cells)
}

/// Replace the cells of a leaf, zeroing the unused tail of the page.
fn write_leaf_cells(data: &mut [u8], cells: &[Cell]) -> Result<()> {
    for (i, cell) in cells.iter().enumerate() {
        node::leaf_cell_mut(data, i as u32)?.copy_from_slice(cell);
    }
    node::set_leaf_num_cells(data, cells.len() as u32)?;
    data[LEAF_NODE_HEADER_SIZE + cells.len() * LEAF_NODE_CELL_SIZE..].fill(0);
    Ok(())
}

/// Record in `parent` that `child` split into (`child`, `new_child`), where
/// `child` now ends at `child_max`. Splits the parent if it overflows.
fn internal_insert_split_child(
    pager: &mut Pager,
    config: &TableConfig,
    parent: PageNumber,
    child: PageNumber,
    child_max: u32,
    new_child: PageNumber,
) -> Result<()> {
    let (mut children, mut keys, parent_is_root, grandparent) = {
        let data = &pager.get_page(parent)?.data[..];
        let (children, keys) = read_internal(data)?;
        (children, keys, node::is_root(data)?, node::parent(data)?)
    };

    let index = children
        .iter()
        .position(|&c| c == child)
        .ok_or_else(|| {
            DbError::Corrupt(format!("page {child} is not a child of its parent {parent}"))
        })?;

    // The old separator (if any) now bounds new_child, which inherits the
    // upper half of child's keys.
    keys.insert(index, child_max);
    children.insert(index + 1, new_child);

    if keys.len() as u32 <= internal_capacity(config) {
        write_internal(&mut pager.get_page_mut(parent)?.data[..], &children, &keys)?;
        node::set_parent(&mut pager.get_page_mut(new_child)?.data[..], parent)?;
        return Ok(());
    }

    // Split by child count, the upper half taking the ceiling.
    let right_children = (children.len() + 1) / 2;
    let left_children = children.len() - right_children;
    let promoted = keys[left_children - 1];

    let new_page = pager.unused_page_num();
    {
        let data = &mut pager.get_page_mut(new_page)?.data[..];
        node::initialize_internal(data)?;
        node::set_root(data, false)?;
        node::set_parent(data, grandparent)?;
        write_internal(data, &children[left_children..], &keys[left_children..])?;
    }
    write_internal(
        &mut pager.get_page_mut(parent)?.data[..],
        &children[..left_children],
        &keys[..left_children - 1],
    )?;

    for &c in &children[..left_children] {
        node::set_parent(&mut pager.get_page_mut(c)?.data[..], parent)?;
    }
    for &c in &children[left_children..] {
        node::set_parent(&mut pager.get_page_mut(c)?.data[..], new_page)?;
    }

    debug!(
        parent,
        new_page,
        left = left_children,
        right = right_children,
        "split internal node"
    );

    if parent_is_root {
        create_new_root(pager, new_page)
    } else {
        internal_insert_split_child(pager, config, grandparent, parent, promoted, new_page)
    }
}

/// Children (right child last) and separator keys of an internal node.
fn read_internal(data: &[u8]) -> Result<(Vec<PageNumber>, Vec<u32>)> {
    let num_keys = node::internal_num_keys(data)?;
    let mut children = Vec::with_capacity(num_keys as usize + 2);
    let mut keys = Vec::with_capacity(num_keys as usize + 1);
    for i in 0..num_keys {
        children.push(node::internal_child(data, i)?);
        keys.push(node::internal_key(data, i)?);
    }
    children.push(node::internal_right_child(data)?);
    Ok((children, keys))
}

/// Rewrite an internal node from `children` (right child last) and
/// `keys`, where `keys.len() + 1 == children.len()`.
fn write_internal(data: &mut [u8], children: &[PageNumber], keys: &[u32]) -> Result<()> {
    if keys.len() + 1 != children.len() {
        return Err(DbError::Corrupt(format!(
            "internal node with {} keys needs {} children, got {}",
            keys.len(),
            keys.len() + 1,
            children.len()
        )));
    }

    node::set_internal_num_keys(data, keys.len() as u32)?;
    for (i, (&child, &key)) in children.iter().zip(keys).enumerate() {
        node::set_internal_cell(data, i as u32, child, key)?;
    }
    node::set_internal_right_child(data, children[keys.len()])?;
    data[INTERNAL_NODE_HEADER_SIZE + keys.len() * INTERNAL_NODE_CELL_SIZE..].fill(0);
    Ok(())
}

/// Grow the tree by one level. The root's contents move to a new left
/// child and page 0 becomes an internal node over (left, `right_child`).
fn create_new_root(pager: &mut Pager, right_child: PageNumber) -> Result<()> {
    let root_copy = pager.get_page(ROOT_PAGE)?.data.clone();
    let left_page = pager.unused_page_num();

    let left_type = {
        let data = &mut pager.get_page_mut(left_page)?.data[..];
        data.copy_from_slice(&root_copy[..]);
        node::set_root(data, false)?;
        node::set_parent(data, ROOT_PAGE)?;
        node::node_type(data)?
    };

    if left_type == NodeType::Internal {
        let (children, _) = read_internal(&root_copy[..])?;
        for child in children {
            node::set_parent(&mut pager.get_page_mut(child)?.data[..], left_page)?;
        }
    }
    node::set_parent(&mut pager.get_page_mut(right_child)?.data[..], ROOT_PAGE)?;

    let left_max = node_max_key(pager, left_page)?;
    let data = &mut pager.get_page_mut(ROOT_PAGE)?.data[..];
    data.fill(0);
    node::initialize_internal(data)?;
    node::set_root(data, true)?;
    node::set_parent(data, ROOT_PAGE)?;
    write_internal(data, &[left_page, right_child], &[left_max])?;

    debug!(left_page, right_child, left_max, "created new root");
    Ok(())
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Load a page that already belongs to the table, never allocating one.
fn allocated_page(pager: &mut Pager, page_num: PageNumber) -> Result<&Page> {
    if page_num >= pager.page_count() {
        return Err(DbError::PageNotAllocated(page_num));
    }
    pager.get_page(page_num)
}

/// List the keys of one leaf: `leaf (size N)` then `  - i : key` lines.
pub fn dump_leaf(pager: &mut Pager, page_num: PageNumber) -> Result<String> {
    let data = &allocated_page(pager, page_num)?.data[..];
    if node::node_type(data)? != NodeType::Leaf {
        return Err(DbError::Corrupt(format!("page {page_num} is not a leaf")));
    }

    let num_cells = node::leaf_num_cells(data)?;
    let mut out = String::new();
    let _ = writeln!(out, "leaf (size {num_cells})");
    for i in 0..num_cells {
        let _ = writeln!(out, "  - {i} : {}", node::leaf_key(data, i)?);
    }
    Ok(out)
}

/// Render the subtree at `page_num`, indenting two spaces per level.
pub fn dump_tree(pager: &mut Pager, page_num: PageNumber) -> Result<String> {
    let mut out = String::new();
    dump_node(pager, page_num, 0, &mut out)?;
    Ok(out)
}

fn dump_node(
    pager: &mut Pager,
    page_num: PageNumber,
    level: usize,
    out: &mut String,
) -> Result<()> {
    if level > pager.max_pages() as usize {
        return Err(DbError::Corrupt("tree descent does not terminate".into()));
    }

    let indent = "  ".repeat(level);
    let data = allocated_page(pager, page_num)?.data.clone();
    match node::node_type(&data[..])? {
        NodeType::Leaf => {
            let num_cells = node::leaf_num_cells(&data[..])?;
            let _ = writeln!(out, "{indent}- leaf (size {num_cells})");
            for i in 0..num_cells {
                let _ = writeln!(out, "{indent}  - {}", node::leaf_key(&data[..], i)?);
            }
        }
        NodeType::Internal => {
            let (children, keys) = read_internal(&data[..])?;
            let _ = writeln!(out, "{indent}- internal (size {})", keys.len());
            for (child, key) in children.iter().zip(&keys) {
                dump_node(pager, *child, level + 1, out)?;
                let _ = writeln!(out, "{indent}  - key {key}");
            }
            if let Some(&right) = children.last() {
                dump_node(pager, right, level + 1, out)?;
            }
        }
    }
    Ok(())
}
