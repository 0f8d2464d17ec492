pub mod builder;
pub mod cache;
pub mod get_context;
pub mod iterator_cache;
pub mod properties;
pub mod reader;

use std::path::{Path, PathBuf};

pub use builder::TableBuilder;
pub use cache::{ReadOptions, TableCache};
pub use get_context::{GetContext, GetState};
pub use iterator_cache::IteratorCache;
pub use properties::TableProperties;
pub use reader::{Table, TableIterator};

use crate::error::Result;

/// A positioned cursor over internal-key ordered entries. Seeks and steps
/// never return errors directly; a failed operation leaves the iterator
/// invalid with the error retained in `status`.
pub trait InternalIterator {
    fn valid(&self) -> bool;
    /// Positions at the first entry with key >= target.
    fn seek(&mut self, target: &[u8]);
    /// Positions at the last entry with key <= target.
    fn seek_for_prev(&mut self, target: &[u8]);
    fn seek_to_first(&mut self);
    fn seek_to_last(&mut self);
    fn next(&mut self);
    fn prev(&mut self);
    /// Only valid while `valid()` is true.
    fn key(&self) -> &[u8];
    fn value(&self) -> &[u8];
    fn status(&self) -> Result<()>;
}

pub fn table_file_name(dir: &Path, file_number: u64) -> PathBuf {
    dir.join(format!("{file_number:06}.sst"))
}
