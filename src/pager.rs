use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{DbError, Result};
use crate::format::PAGE_SIZE;

/// Zero-based page number within the table file.
pub type PageNumber = u32;

/// A page of data from the table file.
#[derive(Debug, Clone)]
pub struct Page {
    pub data: Box<[u8; PAGE_SIZE]>,
    pub dirty: bool,
}

impl Page {
    fn zeroed() -> Self {
        Page {
            data: Box::new([0u8; PAGE_SIZE]),
            dirty: false,
        }
    }
}

/// The Pager maps page numbers to cached buffers, loading them lazily from
/// the backing file and writing them back on flush.
pub struct Pager {
    file: File,
    path: PathBuf,
    file_length: u64,
    /// One past the highest page number ever touched (or present on disk).
    num_pages: u32,
    max_pages: u32,
    /// Resident pages, filled on first access.
    pages: BTreeMap<PageNumber, Page>,
}

impl Pager {
    /// Open or create a table file.
    pub fn open<P: AsRef<Path>>(path: P, max_pages: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_length = file.metadata()?.len();
        if file_length % PAGE_SIZE as u64 != 0 {
            return Err(DbError::Corrupt(
                "db file is not a whole number of pages".into(),
            ));
        }

        let file_pages = file_length / PAGE_SIZE as u64;
        if file_pages > max_pages as u64 {
            return Err(DbError::Corrupt(format!(
                "db file holds {file_pages} pages, more than the limit of {max_pages}"
            )));
        }

        debug!(path = %path.display(), file_pages, "opened pager");

        Ok(Pager {
            file,
            path,
            file_length,
            num_pages: file_pages as u32,
            max_pages,
            pages: BTreeMap::new(),
        })
    }

    /// Get a page by page number, loading it on first access.
    pub fn get_page(&mut self, page_num: PageNumber) -> Result<&Page> {
        self.load_page(page_num).map(|page| &*page)
    }

    /// Get a mutable reference to a page. The page is marked dirty.
    pub fn get_page_mut(&mut self, page_num: PageNumber) -> Result<&mut Page> {
        let page = self.load_page(page_num)?;
        page.dirty = true;
        Ok(page)
    }

    fn load_page(&mut self, page_num: PageNumber) -> Result<&mut Page> {
        if page_num >= self.max_pages {
            return Err(DbError::PageOutOfBounds {
                page_num,
                max_pages: self.max_pages,
            });
        }

        if !self.pages.contains_key(&page_num) {
            let page = self.read_page_from_file(page_num)?;
            self.pages.insert(page_num, page);

            if page_num >= self.num_pages {
                self.num_pages = page_num + 1;
            }
        }

        self.pages
            .get_mut(&page_num)
            .ok_or(DbError::PageNotLoaded(page_num))
    }

    fn read_page_from_file(&mut self, page_num: PageNumber) -> Result<Page> {
        let mut page = Page::zeroed();
        let offset = page_num as u64 * PAGE_SIZE as u64;
        if offset < self.file_length {
            // The last page may have been flushed short.
            let available = (self.file_length - offset).min(PAGE_SIZE as u64) as usize;
            self.file.seek(SeekFrom::Start(offset))?;
            self.file.read_exact(&mut page.data[..available])?;
            debug!(page_num, bytes = available, "loaded page from disk");
        }
        Ok(page)
    }

    /// Write the first `byte_len` bytes of a cached page back to its offset.
    pub fn flush_page(&mut self, page_num: PageNumber, byte_len: usize) -> Result<()> {
        if byte_len > PAGE_SIZE {
            return Err(DbError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot flush {byte_len} bytes of a {PAGE_SIZE}-byte page"),
            )));
        }

        let page = self
            .pages
            .get_mut(&page_num)
            .ok_or(DbError::PageNotLoaded(page_num))?;

        let offset = page_num as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&page.data[..byte_len])?;
        if byte_len == PAGE_SIZE {
            page.dirty = false;
        }

        self.file_length = self.file_length.max(offset + byte_len as u64);
        debug!(page_num, bytes = byte_len, "flushed page");
        Ok(())
    }

    /// Write all dirty pages to disk.
    pub fn flush(&mut self) -> Result<()> {
        let dirty: Vec<PageNumber> = self
            .pages
            .iter()
            .filter(|(_, page)| page.dirty)
            .map(|(&num, _)| num)
            .collect();

        for page_num in dirty {
            self.flush_page(page_num, PAGE_SIZE)?;
        }
        self.file.sync_all()?;
        Ok(())
    }

    /// Flush every resident page in page-number order and release the file.
    pub fn close(mut self) -> Result<()> {
        let resident: Vec<PageNumber> = self.pages.keys().copied().collect();
        for page_num in resident {
            self.flush_page(page_num, PAGE_SIZE)?;
        }
        self.file.sync_all()?;
        debug!(path = %self.path.display(), pages = self.num_pages, "closed pager");
        Ok(())
    }

    /// The next page number that has never been used. Pages are never freed,
    /// so this is always one past the end.
    pub fn unused_page_num(&self) -> PageNumber {
        self.num_pages
    }

    /// Whether `count` more pages can be allocated under the ceiling.
    pub fn has_room_for(&self, count: u32) -> bool {
        self.num_pages as u64 + count as u64 <= self.max_pages as u64
    }

    /// Get total number of pages.
    pub fn page_count(&self) -> u32 {
        self.num_pages
    }

    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    pub fn is_resident(&self, page_num: PageNumber) -> bool {
        self.pages.contains_key(&page_num)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
