// On-disk layout constants for the table file.
//
// The file is a sequence of PAGE_SIZE pages. Every page that belongs to the
// tree starts with a common node header followed by either a leaf body
// (cell count + packed key/row cells) or an internal body (key count, right
// child, packed child/key cells).

use std::fmt::Write as _;

use crate::error::{DbError, Result};

/// Size of every page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Default ceiling on the number of pages the pager will address.
pub const DEFAULT_MAX_PAGES: u32 = 100;

// ---------------------------------------------------------------------------
// Row layout
// ---------------------------------------------------------------------------

pub const ID_SIZE: usize = 8;
pub const USERNAME_SIZE: usize = 20;
pub const EMAIL_SIZE: usize = 40;
pub const ID_OFFSET: usize = 0;
pub const USERNAME_OFFSET: usize = ID_OFFSET + ID_SIZE;
pub const EMAIL_OFFSET: usize = USERNAME_OFFSET + USERNAME_SIZE;
pub const ROW_SIZE: usize = ID_SIZE + USERNAME_SIZE + EMAIL_SIZE;

// ---------------------------------------------------------------------------
// Common node header
// ---------------------------------------------------------------------------

pub const NODE_TYPE_SIZE: usize = 1;
pub const NODE_TYPE_OFFSET: usize = 0;
pub const IS_ROOT_SIZE: usize = 1;
pub const IS_ROOT_OFFSET: usize = NODE_TYPE_OFFSET + NODE_TYPE_SIZE;
pub const PARENT_POINTER_SIZE: usize = 4;
pub const PARENT_POINTER_OFFSET: usize = IS_ROOT_OFFSET + IS_ROOT_SIZE;
pub const COMMON_NODE_HEADER_SIZE: usize = NODE_TYPE_SIZE + IS_ROOT_SIZE + PARENT_POINTER_SIZE;

// ---------------------------------------------------------------------------
// Leaf node
// ---------------------------------------------------------------------------

pub const LEAF_NODE_NUM_CELLS_SIZE: usize = 4;
pub const LEAF_NODE_NUM_CELLS_OFFSET: usize = COMMON_NODE_HEADER_SIZE;
pub const LEAF_NODE_HEADER_SIZE: usize = COMMON_NODE_HEADER_SIZE + LEAF_NODE_NUM_CELLS_SIZE;

pub const LEAF_NODE_KEY_SIZE: usize = 8;
pub const LEAF_NODE_KEY_OFFSET: usize = 0;
pub const LEAF_NODE_VALUE_SIZE: usize = ROW_SIZE;
pub const LEAF_NODE_VALUE_OFFSET: usize = LEAF_NODE_KEY_OFFSET + LEAF_NODE_KEY_SIZE;
pub const LEAF_NODE_CELL_SIZE: usize = LEAF_NODE_KEY_SIZE + LEAF_NODE_VALUE_SIZE;
pub const LEAF_NODE_SPACE_FOR_CELLS: usize = PAGE_SIZE - LEAF_NODE_HEADER_SIZE;
pub const LEAF_NODE_MAX_CELLS: usize = LEAF_NODE_SPACE_FOR_CELLS / LEAF_NODE_CELL_SIZE;

/// Cells moved to the new right sibling when a full leaf splits. The upper
/// half takes the ceiling of the `LEAF_NODE_MAX_CELLS + 1` cells.
pub const LEAF_NODE_RIGHT_SPLIT_COUNT: usize = (LEAF_NODE_MAX_CELLS + 2) / 2;
pub const LEAF_NODE_LEFT_SPLIT_COUNT: usize = LEAF_NODE_MAX_CELLS + 1 - LEAF_NODE_RIGHT_SPLIT_COUNT;

// ---------------------------------------------------------------------------
// Internal node
// ---------------------------------------------------------------------------

pub const INTERNAL_NODE_NUM_KEYS_SIZE: usize = 4;
pub const INTERNAL_NODE_NUM_KEYS_OFFSET: usize = COMMON_NODE_HEADER_SIZE;
pub const INTERNAL_NODE_RIGHT_CHILD_SIZE: usize = 4;
pub const INTERNAL_NODE_RIGHT_CHILD_OFFSET: usize =
    INTERNAL_NODE_NUM_KEYS_OFFSET + INTERNAL_NODE_NUM_KEYS_SIZE;
pub const INTERNAL_NODE_HEADER_SIZE: usize =
    COMMON_NODE_HEADER_SIZE + INTERNAL_NODE_NUM_KEYS_SIZE + INTERNAL_NODE_RIGHT_CHILD_SIZE;

pub const INTERNAL_NODE_CHILD_SIZE: usize = 4;
pub const INTERNAL_NODE_KEY_SIZE: usize = LEAF_NODE_KEY_SIZE;
pub const INTERNAL_NODE_CELL_SIZE: usize = INTERNAL_NODE_CHILD_SIZE + INTERNAL_NODE_KEY_SIZE;
pub const INTERNAL_NODE_MAX_KEYS: usize =
    (PAGE_SIZE - INTERNAL_NODE_HEADER_SIZE) / INTERNAL_NODE_CELL_SIZE;

const _: () = assert!(ROW_SIZE == ID_SIZE + USERNAME_SIZE + EMAIL_SIZE);
const _: () = assert!(EMAIL_OFFSET + EMAIL_SIZE == ROW_SIZE);
const _: () = assert!(LEAF_NODE_MAX_CELLS >= 2);
const _: () =
    assert!(LEAF_NODE_HEADER_SIZE + LEAF_NODE_MAX_CELLS * LEAF_NODE_CELL_SIZE <= PAGE_SIZE);
const _: () = assert!(LEAF_NODE_LEFT_SPLIT_COUNT >= 1 && LEAF_NODE_RIGHT_SPLIT_COUNT >= 1);
const _: () = assert!(
    INTERNAL_NODE_HEADER_SIZE + INTERNAL_NODE_MAX_KEYS * INTERNAL_NODE_CELL_SIZE <= PAGE_SIZE
);

/// Node type tag stored in byte 0 of every tree page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Internal,
    Leaf,
}

impl NodeType {
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::Internal),
            1 => Ok(Self::Leaf),
            _ => Err(DbError::Corrupt(format!("invalid node type tag: {tag:#04x}"))),
        }
    }

    pub fn to_tag(self) -> u8 {
        match self {
            Self::Internal => 0,
            Self::Leaf => 1,
        }
    }
}

// Byte-order helpers. Callers check bounds before calling these.

pub fn read_le_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

pub fn write_le_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn read_le_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

pub fn write_le_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

pub fn read_be_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}

pub fn write_be_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
}

/// Render the layout constants, one `NAME: value` per line.
pub fn layout_constants() -> String {
    let mut out = String::new();
    let entries = [
        ("ROW_SIZE", ROW_SIZE),
        ("COMMON_NODE_HEADER_SIZE", COMMON_NODE_HEADER_SIZE),
        ("LEAF_NODE_HEADER_SIZE", LEAF_NODE_HEADER_SIZE),
        ("LEAF_NODE_CELL_SIZE", LEAF_NODE_CELL_SIZE),
        ("LEAF_NODE_SPACE_FOR_CELLS", LEAF_NODE_SPACE_FOR_CELLS),
        ("LEAF_NODE_MAX_CELLS", LEAF_NODE_MAX_CELLS),
        ("INTERNAL_NODE_HEADER_SIZE", INTERNAL_NODE_HEADER_SIZE),
        ("INTERNAL_NODE_CELL_SIZE", INTERNAL_NODE_CELL_SIZE),
        ("INTERNAL_NODE_MAX_KEYS", INTERNAL_NODE_MAX_KEYS),
    ];
    for (name, value) in entries {
        let _ = writeln!(out, "{name}: {value}");
    }
    out
}
