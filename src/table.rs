use std::path::Path;

use tracing::debug;

use crate::btree::{self, ExecuteResult, ROOT_PAGE};
use crate::config::TableConfig;
use crate::cursor::Cursor;
use crate::error::{DbError, Result};
use crate::format::NodeType;
use crate::node;
use crate::pager::{PageNumber, Pager};
use crate::record::Row;

/// A handle on the single table stored in one file.
pub struct Table {
    pager: Pager,
    config: TableConfig,
    root_page_num: PageNumber,
}

impl Table {
    /// Open or create a table with the default configuration.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, TableConfig::default())
    }

    /// Open or create a table. A new file gets an empty root leaf on page 0.
    pub fn open_with<P: AsRef<Path>>(path: P, config: TableConfig) -> Result<Self> {
        config.validate()?;
        let mut pager = Pager::open(path, config.max_pages)?;

        if pager.page_count() == 0 {
            btree::initialize_root(&mut pager)?;
            debug!(path = %pager.path().display(), "initialized empty table");
        } else {
            let data = &pager.get_page(ROOT_PAGE)?.data[..];
            node::node_type(data)?;
            if !node::is_root(data)? {
                return Err(DbError::Corrupt("page 0 is not marked as the root".into()));
            }
        }

        Ok(Table {
            pager,
            config,
            root_page_num: ROOT_PAGE,
        })
    }

    pub fn insert(&mut self, row: &Row) -> Result<ExecuteResult> {
        btree::insert(&mut self.pager, &self.config, row)
    }

    /// All rows in ascending id order.
    pub fn select_all(&mut self) -> Result<Vec<Row>> {
        self.scan().collect()
    }

    /// Iterate rows in ascending id order.
    pub fn scan(&mut self) -> Rows<'_> {
        Rows {
            pager: &mut self.pager,
            root_page_num: self.root_page_num,
            cursor: None,
            done: false,
        }
    }

    /// Look up a single row by id.
    pub fn get(&mut self, id: u32) -> Result<Option<Row>> {
        let cursor = self.find(id)?;
        if cursor.end_of_table || cursor.key(&mut self.pager)? != id {
            return Ok(None);
        }
        cursor.row(&mut self.pager).map(Some)
    }

    pub fn find(&mut self, key: u32) -> Result<Cursor> {
        Cursor::find(&mut self.pager, self.root_page_num, key)
    }

    pub fn start(&mut self) -> Result<Cursor> {
        Cursor::start(&mut self.pager, self.root_page_num)
    }

    pub fn end(&mut self) -> Result<Cursor> {
        Cursor::end(&mut self.pager, self.root_page_num)
    }

    pub fn advance(&mut self, cursor: &mut Cursor) -> Result<()> {
        cursor.advance(&mut self.pager)
    }

    pub fn row_at(&mut self, cursor: &Cursor) -> Result<Row> {
        cursor.row(&mut self.pager)
    }

    /// Write dirty pages without closing.
    pub fn flush(&mut self) -> Result<()> {
        self.pager.flush()
    }

    /// Flush every resident page and release the file.
    pub fn close(self) -> Result<()> {
        self.pager.close()
    }

    pub fn dump_leaf(&mut self, page_num: PageNumber) -> Result<String> {
        btree::dump_leaf(&mut self.pager, page_num)
    }

    pub fn dump_tree(&mut self) -> Result<String> {
        btree::dump_tree(&mut self.pager, self.root_page_num)
    }

    /// The `.btree` listing: the flat leaf format while the root is a leaf,
    /// the indented tree once it has split.
    pub fn btree_listing(&mut self) -> Result<String> {
        let root = &self.pager.get_page(self.root_page_num)?.data[..];
        match node::node_type(root)? {
            NodeType::Leaf => self.dump_leaf(self.root_page_num),
            NodeType::Internal => self.dump_tree(),
        }
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn root_page_num(&self) -> PageNumber {
        self.root_page_num
    }

    pub fn page_count(&self) -> u32 {
        self.pager.page_count()
    }
}

/// Iterator returned by [`Table::scan`]. Stops after the first error.
pub struct Rows<'a> {
    pager: &'a mut Pager,
    root_page_num: PageNumber,
    cursor: Option<Cursor>,
    done: bool,
}

impl Rows<'_> {
    fn step(&mut self) -> Result<Option<Row>> {
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.advance(self.pager)?;
        } else {
            self.cursor = Some(Cursor::start(self.pager, self.root_page_num)?);
        }

        match self.cursor {
            Some(cursor) if !cursor.end_of_table => cursor.row(self.pager).map(Some),
            _ => Ok(None),
        }
    }
}

impl Iterator for Rows<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
