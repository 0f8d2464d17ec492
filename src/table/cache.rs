//! The shared table-handle cache and the map-aware point lookup.
//!
//! `get` on a data table feeds records to the `GetContext`. On a map table
//! it walks the intervals that may contain the key in ascending order,
//! narrows the search key to each interval's lower bound, raises the
//! context's sequence/type floor to the interval's upper bound, and
//! recurses into every link target, which may itself be a map table.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::get_context::GetContext;
use super::properties::TableProperties;
use super::reader::{Table, TableIterator};
use super::{table_file_name, InternalIterator};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::format::{extract_footer, extract_user_key, set_footer, InternalKeyComparator};
use crate::manifest::meta::{DependenceMap, FileMetaData, FilePurpose};
use crate::map::element::MapSstElement;

#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Serve only from already-open tables; a miss returns `Incomplete`.
    pub no_io: bool,
    /// Retain newly opened tables in the cache.
    pub fill_cache: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            no_io: false,
            fill_cache: true,
        }
    }
}

/// Maps file numbers to open tables. Concurrent readers share one cache;
/// failed opens are never retained, so transient errors recover on retry.
pub struct TableCache {
    config: Config,
    icomp: InternalKeyComparator,
    tables: RwLock<HashMap<u64, Arc<Table>>>,
}

impl TableCache {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            icomp: InternalKeyComparator,
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn find_table(&self, options: &ReadOptions, file_number: u64) -> Result<Arc<Table>> {
        if let Some(table) = self.tables.read()?.get(&file_number) {
            return Ok(table.clone());
        }
        if options.no_io {
            return Err(Error::Incomplete(format!(
                "table {file_number} not in cache and io disabled"
            )));
        }
        let path = table_file_name(&self.config.dir, file_number);
        let table = Arc::new(Table::open(&path)?);
        if options.fill_cache {
            self.tables
                .write()?
                .entry(file_number)
                .or_insert_with(|| table.clone());
        }
        Ok(table)
    }

    pub fn evict(&self, file_number: u64) {
        if let Ok(mut tables) = self.tables.write() {
            tables.remove(&file_number);
        }
    }

    /// An iterator over the file's raw entries: records for a data table,
    /// encoded interval elements for a map table.
    pub fn new_iterator(&self, options: &ReadOptions, f: &FileMetaData) -> Result<TableIterator> {
        let table = self.find_table(options, f.file_number)?;
        table.iter()
    }

    pub fn get_table_properties(
        &self,
        options: &ReadOptions,
        file_number: u64,
    ) -> Result<TableProperties> {
        let table = self.find_table(options, file_number)?;
        Ok(table.properties().clone())
    }

    /// Point lookup through one file. `k` is an encoded internal key; the
    /// context accumulates the outcome and must outlive the whole
    /// multi-level query.
    pub fn get(
        &self,
        options: &ReadOptions,
        f: &FileMetaData,
        dependence_map: &DependenceMap,
        k: &[u8],
        context: &mut GetContext,
    ) -> Result<()> {
        let table = match self.find_table(options, f.file_number) {
            Ok(table) => table,
            Err(e) if e.is_incomplete() => {
                // Couldn't rule the key out without io.
                context.mark_key_may_exist();
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        match f.purpose {
            FilePurpose::Data => self.get_from_data(&table, k, context),
            FilePurpose::Map => {
                if dependence_map.is_empty() {
                    return Err(crate::corruption!("composite sst dependence files missing"));
                }
                self.get_from_map(options, &table, dependence_map, k, context)
            }
        }
    }

    fn get_from_data(&self, table: &Arc<Table>, k: &[u8], context: &mut GetContext) -> Result<()> {
        let mut iter = table.iter()?;
        iter.seek(k);
        while iter.valid() {
            if !context.save_value(iter.key(), iter.value())? {
                break;
            }
            iter.next();
        }
        iter.status()
    }

    fn get_from_map(
        &self,
        options: &ReadOptions,
        table: &Arc<Table>,
        dependence_map: &DependenceMap,
        k: &[u8],
        context: &mut GetContext,
    ) -> Result<()> {
        let mut iter = table.iter()?;
        iter.seek(k);
        while iter.valid() {
            let element = MapSstElement::decode(iter.key(), iter.value())?;
            let mut find_k = k.to_vec();

            let smallest = element.smallest_key.as_slice();
            let cmp = self.icomp.compare(smallest, k);
            let before_smallest = if element.include_smallest {
                cmp == Ordering::Greater
            } else {
                cmp != Ordering::Less
            };
            if before_smallest {
                if self
                    .icomp
                    .user_compare(extract_user_key(smallest), extract_user_key(k))
                    != Ordering::Equal
                {
                    // k precedes this map's contribution for its user key.
                    return Ok(());
                }
                debug_assert!(extract_footer(k) > extract_footer(smallest));
                if element.include_smallest {
                    find_k = smallest.to_vec();
                } else {
                    let footer = extract_footer(smallest);
                    if footer == 0 {
                        // No representable key sorts after the bound within
                        // the same user key.
                        return Ok(());
                    }
                    find_k = smallest.to_vec();
                    set_footer(&mut find_k, footer - 1);
                }
            }

            let is_largest_user_key = self
                .icomp
                .user_compare(extract_user_key(&element.largest_key), extract_user_key(k))
                == Ordering::Equal;
            let floor_backup = context.min_seq_and_type();
            if is_largest_user_key {
                // Shrink visibility to the interval bound so the recursion
                // cannot observe records past it.
                let footer = extract_footer(&element.largest_key);
                if footer == u64::MAX && !element.include_largest {
                    iter.next();
                    continue;
                }
                context.set_min_seq_and_type(
                    floor_backup.max(footer + u64::from(!element.include_largest)),
                );
            }

            for target in &element.link {
                let dependence = dependence_map.get(&target.file_number).ok_or_else(|| {
                    crate::corruption!("map sst dependence file {} missing", target.file_number)
                })?;
                self.get(options, dependence, dependence_map, &find_k, context)?;
                if context.is_finished() {
                    // Found or deleted: restoring the floor is unnecessary.
                    return Ok(());
                }
            }

            context.set_min_seq_and_type(floor_backup);
            if !is_largest_user_key {
                break;
            }
            iter.next();
        }
        iter.status()
    }
}
