use std::collections::HashMap;
use std::sync::Arc;

use super::cache::{ReadOptions, TableCache};
use super::reader::{Table, TableIterator};
use crate::error::Result;
use crate::manifest::meta::{DependenceMap, FileMetaData};

/// One open table with its iterator, memoized for the duration of a build.
pub struct CachedTable {
    pub meta: Arc<FileMetaData>,
    pub table: Arc<Table>,
    pub iter: TableIterator,
}

/// Memoizes open iterators and metadata lookups keyed by file number
/// across a single build or scan. Lives entirely within one call.
pub struct IteratorCache<'a> {
    dependence_map: &'a DependenceMap,
    table_cache: &'a TableCache,
    options: ReadOptions,
    entries: HashMap<u64, CachedTable>,
}

impl<'a> IteratorCache<'a> {
    pub fn new(dependence_map: &'a DependenceMap, table_cache: &'a TableCache) -> Self {
        Self {
            dependence_map,
            table_cache,
            // Build reads are one-shot; keep them out of the shared cache.
            options: ReadOptions {
                no_io: false,
                fill_cache: false,
            },
            entries: HashMap::new(),
        }
    }

    /// Resolves a file number through the dependence map and opens it.
    pub fn get(&mut self, file_number: u64) -> Result<&mut CachedTable> {
        if !self.entries.contains_key(&file_number) {
            let meta = self.dependence_map.get(&file_number).cloned().ok_or_else(|| {
                crate::corruption!("dependence file {file_number} missing")
            })?;
            let entry = self.open(meta)?;
            self.entries.insert(file_number, entry);
        }
        Ok(self.entries.get_mut(&file_number).unwrap())
    }

    /// Opens a file the caller already holds metadata for; input files need
    /// not appear in the dependence map.
    pub fn get_for_meta(&mut self, meta: &Arc<FileMetaData>) -> Result<&mut CachedTable> {
        if !self.entries.contains_key(&meta.file_number) {
            let entry = self.open(meta.clone())?;
            self.entries.insert(meta.file_number, entry);
        }
        Ok(self.entries.get_mut(&meta.file_number).unwrap())
    }

    pub fn file_meta(&mut self, file_number: u64) -> Result<Arc<FileMetaData>> {
        if let Some(entry) = self.entries.get(&file_number) {
            return Ok(entry.meta.clone());
        }
        self.dependence_map
            .get(&file_number)
            .cloned()
            .ok_or_else(|| crate::corruption!("dependence file {file_number} missing"))
    }

    fn open(&self, meta: Arc<FileMetaData>) -> Result<CachedTable> {
        let table = self.table_cache.find_table(&self.options, meta.file_number)?;
        let iter = table.iter()?;
        Ok(CachedTable { meta, table, iter })
    }
}
