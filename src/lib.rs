pub mod btree;
pub mod config;
pub mod cursor;
pub mod error;
pub mod format;
pub mod node;
pub mod pager;
pub mod record;
pub mod statement;
pub mod table;

pub use btree::ExecuteResult;
pub use config::{SplitPolicy, TableConfig};
pub use cursor::Cursor;
pub use error::{DbError, Result};
pub use record::Row;
pub use table::Table;
