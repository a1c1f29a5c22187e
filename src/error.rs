use thiserror::Error;

/// Top-level error type for minidb.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database is corrupt: {0}")]
    Corrupt(String),

    #[error("tried to fetch page number out of bounds: {page_num} (max {max_pages})")]
    PageOutOfBounds { page_num: u32, max_pages: u32 },

    #[error("tried to flush page {0}, which was never loaded")]
    PageNotLoaded(u32),

    #[error("page {0} is not part of the table")]
    PageNotAllocated(u32),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, DbError>;
