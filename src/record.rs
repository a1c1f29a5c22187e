use std::fmt;

use crate::error::{DbError, Result};
use crate::format::{
    self, EMAIL_OFFSET, EMAIL_SIZE, ID_OFFSET, ROW_SIZE, USERNAME_OFFSET, USERNAME_SIZE,
};

/// The one row schema the table stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub id: u32,
    pub username: String,
    pub email: String,
}

impl Row {
    pub fn new(id: u32, username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            email: email.into(),
        }
    }

    /// Serialize into a `ROW_SIZE` destination. Strings longer than their
    /// slot are silently truncated; shorter ones are zero-padded.
    pub fn serialize(&self, dest: &mut [u8]) -> Result<()> {
        if dest.len() < ROW_SIZE {
            return Err(DbError::Corrupt(format!(
                "row slot is {} bytes, need {ROW_SIZE}",
                dest.len()
            )));
        }

        self.write_into(&mut dest[..ROW_SIZE]);
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; ROW_SIZE] {
        let mut buf = [0u8; ROW_SIZE];
        self.write_into(&mut buf);
        buf
    }

    fn write_into(&self, dest: &mut [u8]) {
        format::write_be_u64(dest, ID_OFFSET, self.id as u64);
        write_fixed(&mut dest[USERNAME_OFFSET..USERNAME_OFFSET + USERNAME_SIZE], &self.username);
        write_fixed(&mut dest[EMAIL_OFFSET..EMAIL_OFFSET + EMAIL_SIZE], &self.email);
    }

    /// Decode a row. Each string field ends at its first zero byte.
    pub fn deserialize(src: &[u8]) -> Result<Self> {
        if src.len() < ROW_SIZE {
            return Err(DbError::Corrupt(format!(
                "row slot is {} bytes, need {ROW_SIZE}",
                src.len()
            )));
        }

        let raw_id = format::read_be_u64(src, ID_OFFSET);
        let id = u32::try_from(raw_id)
            .map_err(|_| DbError::Corrupt(format!("row id {raw_id} does not fit in 32 bits")))?;

        Ok(Self {
            id,
            username: read_fixed(&src[USERNAME_OFFSET..USERNAME_OFFSET + USERNAME_SIZE]),
            email: read_fixed(&src[EMAIL_OFFSET..EMAIL_OFFSET + EMAIL_SIZE]),
        })
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.id, self.username, self.email)
    }
}

fn write_fixed(slot: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(slot.len());
    slot[..len].copy_from_slice(&bytes[..len]);
    slot[len..].fill(0);
}

fn read_fixed(slot: &[u8]) -> String {
    let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
    String::from_utf8_lossy(&slot[..end]).into_owned()
}
