// Node codec: typed accessors over a raw page buffer.
//
// Every accessor takes the page as a byte slice and checks the field it
// touches against the slice length, so a corrupt counter or an out-of-range
// cell index surfaces as `DbError::Corrupt` instead of a panic.

use crate::error::{DbError, Result};
use crate::format::{
    self, NodeType, INTERNAL_NODE_CELL_SIZE, INTERNAL_NODE_CHILD_SIZE, INTERNAL_NODE_HEADER_SIZE,
    INTERNAL_NODE_MAX_KEYS, INTERNAL_NODE_NUM_KEYS_OFFSET, INTERNAL_NODE_RIGHT_CHILD_OFFSET,
    IS_ROOT_OFFSET, LEAF_NODE_CELL_SIZE, LEAF_NODE_HEADER_SIZE, LEAF_NODE_KEY_OFFSET,
    LEAF_NODE_KEY_SIZE, LEAF_NODE_MAX_CELLS, LEAF_NODE_NUM_CELLS_OFFSET, LEAF_NODE_VALUE_OFFSET,
    LEAF_NODE_VALUE_SIZE, NODE_TYPE_OFFSET, PARENT_POINTER_OFFSET,
};
use crate::pager::PageNumber;

fn check(buf: &[u8], offset: usize, len: usize) -> Result<()> {
    if offset + len > buf.len() {
        return Err(DbError::Corrupt(format!(
            "field at {offset}..{} extends beyond {}-byte page",
            offset + len,
            buf.len()
        )));
    }
    Ok(())
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32> {
    check(buf, offset, 4)?;
    Ok(format::read_le_u32(buf, offset))
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) -> Result<()> {
    check(buf, offset, 4)?;
    format::write_le_u32(buf, offset, value);
    Ok(())
}

/// Keys live in an 8-byte slot holding the zero-extended u32.
fn read_key(buf: &[u8], offset: usize) -> Result<u32> {
    check(buf, offset, LEAF_NODE_KEY_SIZE)?;
    let raw = format::read_le_u64(buf, offset);
    u32::try_from(raw).map_err(|_| DbError::Corrupt(format!("key {raw} does not fit in 32 bits")))
}

fn write_key(buf: &mut [u8], offset: usize, key: u32) -> Result<()> {
    check(buf, offset, LEAF_NODE_KEY_SIZE)?;
    format::write_le_u64(buf, offset, key as u64);
    Ok(())
}

// ---------------------------------------------------------------------------
// Common header
// ---------------------------------------------------------------------------

pub fn node_type(buf: &[u8]) -> Result<NodeType> {
    check(buf, NODE_TYPE_OFFSET, 1)?;
    NodeType::from_tag(buf[NODE_TYPE_OFFSET])
}

pub fn set_node_type(buf: &mut [u8], node_type: NodeType) -> Result<()> {
    check(buf, NODE_TYPE_OFFSET, 1)?;
    buf[NODE_TYPE_OFFSET] = node_type.to_tag();
    Ok(())
}

pub fn is_root(buf: &[u8]) -> Result<bool> {
    check(buf, IS_ROOT_OFFSET, 1)?;
    Ok(buf[IS_ROOT_OFFSET] != 0)
}

pub fn set_root(buf: &mut [u8], is_root: bool) -> Result<()> {
    check(buf, IS_ROOT_OFFSET, 1)?;
    buf[IS_ROOT_OFFSET] = u8::from(is_root);
    Ok(())
}

pub fn parent(buf: &[u8]) -> Result<PageNumber> {
    read_u32(buf, PARENT_POINTER_OFFSET)
}

pub fn set_parent(buf: &mut [u8], parent: PageNumber) -> Result<()> {
    write_u32(buf, PARENT_POINTER_OFFSET, parent)
}

// ---------------------------------------------------------------------------
// Leaf nodes
// ---------------------------------------------------------------------------

pub fn leaf_num_cells(buf: &[u8]) -> Result<u32> {
    let count = read_u32(buf, LEAF_NODE_NUM_CELLS_OFFSET)?;
    if count as usize > LEAF_NODE_MAX_CELLS {
        return Err(DbError::Corrupt(format!(
            "leaf cell count {count} exceeds capacity {LEAF_NODE_MAX_CELLS}"
        )));
    }
    Ok(count)
}

pub fn set_leaf_num_cells(buf: &mut [u8], count: u32) -> Result<()> {
    if count as usize > LEAF_NODE_MAX_CELLS {
        return Err(DbError::Corrupt(format!(
            "leaf cell count {count} exceeds capacity {LEAF_NODE_MAX_CELLS}"
        )));
    }
    write_u32(buf, LEAF_NODE_NUM_CELLS_OFFSET, count)
}

/// Byte offset of leaf cell `cell_num` within the page.
pub fn leaf_cell_offset(cell_num: u32) -> Result<usize> {
    let index = cell_num as usize;
    if index >= LEAF_NODE_MAX_CELLS {
        return Err(DbError::Corrupt(format!(
            "leaf cell index {cell_num} out of range"
        )));
    }
    Ok(LEAF_NODE_HEADER_SIZE + index * LEAF_NODE_CELL_SIZE)
}

pub fn leaf_cell(buf: &[u8], cell_num: u32) -> Result<&[u8]> {
    let offset = leaf_cell_offset(cell_num)?;
    check(buf, offset, LEAF_NODE_CELL_SIZE)?;
    Ok(&buf[offset..offset + LEAF_NODE_CELL_SIZE])
}

pub fn leaf_cell_mut(buf: &mut [u8], cell_num: u32) -> Result<&mut [u8]> {
    let offset = leaf_cell_offset(cell_num)?;
    check(buf, offset, LEAF_NODE_CELL_SIZE)?;
    Ok(&mut buf[offset..offset + LEAF_NODE_CELL_SIZE])
}

pub fn leaf_key(buf: &[u8], cell_num: u32) -> Result<u32> {
    read_key(buf, leaf_cell_offset(cell_num)? + LEAF_NODE_KEY_OFFSET)
}

pub fn set_leaf_key(buf: &mut [u8], cell_num: u32, key: u32) -> Result<()> {
    write_key(buf, leaf_cell_offset(cell_num)? + LEAF_NODE_KEY_OFFSET, key)
}

pub fn leaf_value(buf: &[u8], cell_num: u32) -> Result<&[u8]> {
    let offset = leaf_cell_offset(cell_num)? + LEAF_NODE_VALUE_OFFSET;
    check(buf, offset, LEAF_NODE_VALUE_SIZE)?;
    Ok(&buf[offset..offset + LEAF_NODE_VALUE_SIZE])
}

pub fn leaf_value_mut(buf: &mut [u8], cell_num: u32) -> Result<&mut [u8]> {
    let offset = leaf_cell_offset(cell_num)? + LEAF_NODE_VALUE_OFFSET;
    check(buf, offset, LEAF_NODE_VALUE_SIZE)?;
    Ok(&mut buf[offset..offset + LEAF_NODE_VALUE_SIZE])
}

/// Move cells `from..num_cells` one slot to the right, opening a gap at
/// `from`. The caller must have room for `num_cells + 1` cells.
pub fn shift_leaf_cells_right(buf: &mut [u8], from: u32, num_cells: u32) -> Result<()> {
    if from >= num_cells {
        return Ok(());
    }
    let start = leaf_cell_offset(from)?;
    let end = leaf_cell_offset(num_cells - 1)? + LEAF_NODE_CELL_SIZE;
    check(buf, start + LEAF_NODE_CELL_SIZE, end - start)?;
    leaf_cell_offset(num_cells)?;
    buf.copy_within(start..end, start + LEAF_NODE_CELL_SIZE);
    Ok(())
}

/// Set the type tag and zero the cell count. The root flag and parent
/// pointer are left for the caller to set.
pub fn initialize_leaf(buf: &mut [u8]) -> Result<()> {
    set_node_type(buf, NodeType::Leaf)?;
    set_leaf_num_cells(buf, 0)
}

// ---------------------------------------------------------------------------
// Internal nodes
// ---------------------------------------------------------------------------

pub fn internal_num_keys(buf: &[u8]) -> Result<u32> {
    let count = read_u32(buf, INTERNAL_NODE_NUM_KEYS_OFFSET)?;
    if count as usize > INTERNAL_NODE_MAX_KEYS {
        return Err(DbError::Corrupt(format!(
            "internal key count {count} exceeds capacity {INTERNAL_NODE_MAX_KEYS}"
        )));
    }
    Ok(count)
}

pub fn set_internal_num_keys(buf: &mut [u8], count: u32) -> Result<()> {
    if count as usize > INTERNAL_NODE_MAX_KEYS {
        return Err(DbError::Corrupt(format!(
            "internal key count {count} exceeds capacity {INTERNAL_NODE_MAX_KEYS}"
        )));
    }
    write_u32(buf, INTERNAL_NODE_NUM_KEYS_OFFSET, count)
}

pub fn internal_right_child(buf: &[u8]) -> Result<PageNumber> {
    read_u32(buf, INTERNAL_NODE_RIGHT_CHILD_OFFSET)
}

pub fn set_internal_right_child(buf: &mut [u8], page_num: PageNumber) -> Result<()> {
    write_u32(buf, INTERNAL_NODE_RIGHT_CHILD_OFFSET, page_num)
}

pub fn internal_cell_offset(cell_num: u32) -> Result<usize> {
    let index = cell_num as usize;
    if index >= INTERNAL_NODE_MAX_KEYS {
        return Err(DbError::Corrupt(format!(
            "internal cell index {cell_num} out of range"
        )));
    }
    Ok(INTERNAL_NODE_HEADER_SIZE + index * INTERNAL_NODE_CELL_SIZE)
}

/// Child pointer `child_num`. Index `num_keys` resolves to the right child.
pub fn internal_child(buf: &[u8], child_num: u32) -> Result<PageNumber> {
    let num_keys = internal_num_keys(buf)?;
    if child_num > num_keys {
        return Err(DbError::Corrupt(format!(
            "child index {child_num} past {num_keys} keys"
        )));
    }
    if child_num == num_keys {
        internal_right_child(buf)
    } else {
        read_u32(buf, internal_cell_offset(child_num)?)
    }
}

pub fn set_internal_child(buf: &mut [u8], child_num: u32, page_num: PageNumber) -> Result<()> {
    let num_keys = internal_num_keys(buf)?;
    if child_num > num_keys {
        return Err(DbError::Corrupt(format!(
            "child index {child_num} past {num_keys} keys"
        )));
    }
    if child_num == num_keys {
        set_internal_right_child(buf, page_num)
    } else {
        write_u32(buf, internal_cell_offset(child_num)?, page_num)
    }
}

pub fn internal_key(buf: &[u8], key_num: u32) -> Result<u32> {
    read_key(buf, internal_cell_offset(key_num)? + INTERNAL_NODE_CHILD_SIZE)
}

pub fn set_internal_key(buf: &mut [u8], key_num: u32, key: u32) -> Result<()> {
    write_key(buf, internal_cell_offset(key_num)? + INTERNAL_NODE_CHILD_SIZE, key)
}

/// Write a full (child, key) cell at `cell_num`.
pub fn set_internal_cell(
    buf: &mut [u8],
    cell_num: u32,
    child: PageNumber,
    key: u32,
) -> Result<()> {
    let offset = internal_cell_offset(cell_num)?;
    write_u32(buf, offset, child)?;
    write_key(buf, offset + INTERNAL_NODE_CHILD_SIZE, key)
}

/// Set the type tag, zero the key count, and clear the right child. Page 0
/// is always the root, so a right child of 0 means "none yet".
pub fn initialize_internal(buf: &mut [u8]) -> Result<()> {
    set_node_type(buf, NodeType::Internal)?;
    set_internal_num_keys(buf, 0)?;
    set_internal_right_child(buf, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PAGE_SIZE;

    fn leaf_with_keys(keys: &[u32]) -> Vec<u8> {
        let mut page = vec![0u8; PAGE_SIZE];
        initialize_leaf(&mut page).unwrap();
        for (i, &key) in keys.iter().enumerate() {
            set_leaf_key(&mut page, i as u32, key).unwrap();
            leaf_value_mut(&mut page, i as u32).unwrap()[0] = key as u8;
        }
        set_leaf_num_cells(&mut page, keys.len() as u32).unwrap();
        page
    }

    #[test]
    fn test_initialize_leaf() {
        let mut page = vec![0xFFu8; PAGE_SIZE];
        initialize_leaf(&mut page).unwrap();
        assert_eq!(page[0], 1);
        assert_eq!(node_type(&page).unwrap(), NodeType::Leaf);
        assert_eq!(leaf_num_cells(&page).unwrap(), 0);
        // Root flag and parent are the caller's business.
        assert_eq!(page[1], 0xFF);
    }

    #[test]
    fn test_header_fields() {
        let mut page = vec![0u8; PAGE_SIZE];
        initialize_leaf(&mut page).unwrap();
        set_root(&mut page, true).unwrap();
        set_parent(&mut page, 7).unwrap();

        assert!(is_root(&page).unwrap());
        assert_eq!(parent(&page).unwrap(), 7);
        assert_eq!(page[..6], [1, 1, 7, 0, 0, 0]);
    }

    #[test]
    fn test_leaf_cell_layout() {
        let page = leaf_with_keys(&[10, 20]);
        assert_eq!(page[6..10], [2, 0, 0, 0]);
        // First cell key at offset 10, second at 10 + 76.
        assert_eq!(page[10], 10);
        assert_eq!(page[10 + LEAF_NODE_CELL_SIZE], 20);
        assert_eq!(leaf_key(&page, 1).unwrap(), 20);
        assert_eq!(leaf_value(&page, 1).unwrap()[0], 20);
        assert_eq!(leaf_cell(&page, 0).unwrap().len(), LEAF_NODE_CELL_SIZE);
    }

    #[test]
    fn test_shift_leaf_cells() {
        let mut page = leaf_with_keys(&[10, 20, 30]);
        shift_leaf_cells_right(&mut page, 1, 3).unwrap();
        assert_eq!(leaf_key(&page, 0).unwrap(), 10);
        assert_eq!(leaf_key(&page, 2).unwrap(), 20);
        assert_eq!(leaf_key(&page, 3).unwrap(), 30);
        assert_eq!(leaf_value(&page, 3).unwrap()[0], 30);
    }

    #[test]
    fn test_corrupt_cell_count() {
        let mut page = vec![0u8; PAGE_SIZE];
        initialize_leaf(&mut page).unwrap();
        format::write_le_u32(&mut page, LEAF_NODE_NUM_CELLS_OFFSET, 1000);
        assert!(matches!(leaf_num_cells(&page), Err(DbError::Corrupt(_))));
        assert!(leaf_cell_offset(LEAF_NODE_MAX_CELLS as u32).is_err());
    }

    #[test]
    fn test_short_buffer_is_corrupt() {
        let page = vec![1u8; 4];
        assert!(matches!(parent(&page), Err(DbError::Corrupt(_))));
        assert!(leaf_key(&page, 0).is_err());
    }

    #[test]
    fn test_internal_children() {
        let mut page = vec![0u8; PAGE_SIZE];
        initialize_internal(&mut page).unwrap();
        assert_eq!(node_type(&page).unwrap(), NodeType::Internal);

        set_internal_num_keys(&mut page, 2).unwrap();
        set_internal_cell(&mut page, 0, 3, 15).unwrap();
        set_internal_cell(&mut page, 1, 4, 40).unwrap();
        set_internal_right_child(&mut page, 5).unwrap();

        assert_eq!(internal_child(&page, 0).unwrap(), 3);
        assert_eq!(internal_child(&page, 1).unwrap(), 4);
        assert_eq!(internal_child(&page, 2).unwrap(), 5);
        assert!(internal_child(&page, 3).is_err());
        assert_eq!(internal_key(&page, 1).unwrap(), 40);

        set_internal_child(&mut page, 2, 9).unwrap();
        assert_eq!(internal_right_child(&page).unwrap(), 9);
        set_internal_key(&mut page, 0, 16).unwrap();
        assert_eq!(internal_key(&page, 0).unwrap(), 16);
    }

    #[test]
    fn test_oversized_key_slot_is_corrupt() {
        let mut page = leaf_with_keys(&[1]);
        format::write_le_u64(&mut page, LEAF_NODE_HEADER_SIZE, u64::MAX);
        assert!(matches!(leaf_key(&page, 0), Err(DbError::Corrupt(_))));
    }
}
