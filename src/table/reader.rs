//! Opens a table file and serves reads. The full index is loaded at open;
//! entries are read from disk on demand through a cloned file handle, so
//! concurrent iterators never contend.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt};

use super::builder::{CASTAGNOLI, FOOTER_ENCODED_LENGTH};
use super::properties::TableProperties;
use super::InternalIterator;
use crate::error::Result;
use crate::format::InternalKeyComparator;

struct IndexEntry {
    key: Vec<u8>,
    offset: u64,
}

pub struct Table {
    file: File,
    path: PathBuf,
    icomp: InternalKeyComparator,
    index: Vec<IndexEntry>,
    properties: TableProperties,
    data_size: u64,
}

impl Table {
    /// Opens a table file, verifying the footer checksum and loading the
    /// index and properties into memory.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < FOOTER_ENCODED_LENGTH {
            return Err(crate::corruption!(
                "table file too short: {}",
                path.display()
            ));
        }

        file.seek(SeekFrom::End(-(FOOTER_ENCODED_LENGTH as i64)))?;
        let index_offset = file.read_u64::<BigEndian>()?;
        let props_offset = file.read_u64::<BigEndian>()?;
        let checksum = file.read_u32::<BigEndian>()?;

        let trailer_end = file_size - FOOTER_ENCODED_LENGTH;
        if index_offset > props_offset || props_offset > trailer_end {
            return Err(crate::corruption!(
                "table footer out of bounds: {}",
                path.display()
            ));
        }

        let mut trailer = vec![0u8; (trailer_end - index_offset) as usize];
        file.seek(SeekFrom::Start(index_offset))?;
        file.read_exact(&mut trailer)?;
        if CASTAGNOLI.checksum(&trailer) != checksum {
            return Err(crate::corruption!(
                "table footer checksum mismatch: {}",
                path.display()
            ));
        }

        let index_len = (props_offset - index_offset) as usize;
        let mut cursor = Cursor::new(&trailer[..index_len]);
        let count = cursor.read_u32::<BigEndian>()? as usize;
        let mut index = Vec::with_capacity(count);
        for _ in 0..count {
            let offset = cursor.read_u64::<BigEndian>()?;
            let key_len = cursor.read_u32::<BigEndian>()? as usize;
            let mut key = vec![0u8; key_len];
            cursor.read_exact(&mut key)?;
            index.push(IndexEntry { key, offset });
        }

        let props_region = &trailer[index_len..];
        let mut cursor = Cursor::new(props_region);
        let properties = TableProperties::decode_from(&mut cursor)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            icomp: InternalKeyComparator,
            index,
            properties,
            data_size: index_offset,
        })
    }

    pub fn properties(&self) -> &TableProperties {
        &self.properties
    }

    pub fn num_entries(&self) -> u64 {
        self.index.len() as u64
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The byte offset of the first entry with key >= target, or the size
    /// of the entry region when no entry qualifies.
    pub fn approximate_offset_of(&self, target: &[u8]) -> u64 {
        let pos = self
            .index
            .partition_point(|entry| self.icomp.compare(&entry.key, target) == Ordering::Less);
        match self.index.get(pos) {
            Some(entry) => entry.offset,
            None => self.data_size,
        }
    }

    /// Creates an iterator with its own file handle.
    pub fn iter(self: &Arc<Self>) -> Result<TableIterator> {
        let file = self.file.try_clone()?;
        Ok(TableIterator {
            table: self.clone(),
            file,
            pos: self.index.len(),
            key: Vec::new(),
            value: Vec::new(),
            status: Ok(()),
        })
    }
}

pub struct TableIterator {
    table: Arc<Table>,
    file: File,
    pos: usize,
    key: Vec<u8>,
    value: Vec<u8>,
    status: Result<()>,
}

impl TableIterator {
    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    fn load(&mut self) {
        if self.pos >= self.table.index.len() {
            return;
        }
        if let Err(e) = self.load_entry(self.table.index[self.pos].offset) {
            self.status = Err(e);
            self.pos = self.table.index.len();
        }
    }

    fn load_entry(&mut self, offset: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        let key_len = self.file.read_u32::<BigEndian>()? as usize;
        let value_len = self.file.read_u32::<BigEndian>()? as usize;
        if offset + 8 + (key_len + value_len) as u64 > self.table.data_size {
            return Err(crate::corruption!(
                "table entry out of bounds: {}",
                self.table.path.display()
            ));
        }
        self.key.resize(key_len, 0);
        self.file.read_exact(&mut self.key)?;
        self.value.resize(value_len, 0);
        self.file.read_exact(&mut self.value)?;
        Ok(())
    }
}

impl InternalIterator for TableIterator {
    fn valid(&self) -> bool {
        self.pos < self.table.index.len()
    }

    fn seek(&mut self, target: &[u8]) {
        self.status = Ok(());
        self.pos = self
            .table
            .index
            .partition_point(|entry| self.table.icomp.compare(&entry.key, target) == Ordering::Less);
        self.load();
    }

    fn seek_for_prev(&mut self, target: &[u8]) {
        self.status = Ok(());
        let bound = self
            .table
            .index
            .partition_point(|entry| self.table.icomp.compare(&entry.key, target) != Ordering::Greater);
        if bound == 0 {
            self.pos = self.table.index.len();
            return;
        }
        self.pos = bound - 1;
        self.load();
    }

    fn seek_to_first(&mut self) {
        self.status = Ok(());
        self.pos = 0;
        self.load();
    }

    fn seek_to_last(&mut self) {
        self.status = Ok(());
        if self.table.index.is_empty() {
            self.pos = 0;
            return;
        }
        self.pos = self.table.index.len() - 1;
        self.load();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.pos += 1;
        self.load();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if self.pos == 0 {
            self.pos = self.table.index.len();
            return;
        }
        self.pos -= 1;
        self.load();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.key
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.value
    }

    fn status(&self) -> Result<()> {
        self.status.clone()
    }
}

/// An iterator over nothing, standing in where a caller expects a stream
/// but no files exist.
#[derive(Default)]
pub struct EmptyIterator;

impl InternalIterator for EmptyIterator {
    fn valid(&self) -> bool {
        false
    }
    fn seek(&mut self, _target: &[u8]) {}
    fn seek_for_prev(&mut self, _target: &[u8]) {}
    fn seek_to_first(&mut self) {}
    fn seek_to_last(&mut self) {}
    fn next(&mut self) {}
    fn prev(&mut self) {}
    fn key(&self) -> &[u8] {
        unreachable!("empty iterator has no entries")
    }
    fn value(&self) -> &[u8] {
        unreachable!("empty iterator has no entries")
    }
    fn status(&self) -> Result<()> {
        Ok(())
    }
}
