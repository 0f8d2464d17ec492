//! Writes a table file. Map tables reuse the data layout; their entries are
//! encoded interval elements instead of user records.
//!
//! ## File layout
//!
//! ```text
//! +--------------------------------------------------+
//! | entries: key_len u32 | value_len u32 | key | val |
//! +--------------------------------------------------+
//! | index: count u32, per entry offset u64,          |
//! |        key_len u32, key                          |
//! +--------------------------------------------------+
//! | properties record                                |
//! +--------------------------------------------------+
//! | footer: index_offset u64 | props_offset u64      |
//! |         | crc32(index..props) u32                |
//! +--------------------------------------------------+
//! ```

use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, WriteBytesExt};
use crc::{Crc, CRC_32_ISCSI};

use super::properties::TableProperties;
use crate::error::Result;
use crate::format::InternalKeyComparator;

pub(crate) const FOOTER_ENCODED_LENGTH: u64 = 8 + 8 + 4;
pub(crate) const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// A handle to a table file being written. Entries must be added in strict
/// internal-key order.
pub struct TableBuilder {
    file: File,
    path: PathBuf,
    icomp: InternalKeyComparator,
    index: Vec<(Vec<u8>, u64)>,
    offset: u64,
    last_key: Vec<u8>,
}

impl TableBuilder {
    pub fn new(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            icomp: InternalKeyComparator,
            index: Vec::new(),
            offset: 0,
            last_key: Vec::new(),
        })
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        debug_assert!(
            self.last_key.is_empty()
                || self.icomp.compare(&self.last_key, key) != Ordering::Greater
        );
        let mut entry = Vec::with_capacity(8 + key.len() + value.len());
        entry.write_u32::<BigEndian>(key.len() as u32).unwrap();
        entry.write_u32::<BigEndian>(value.len() as u32).unwrap();
        entry.extend_from_slice(key);
        entry.extend_from_slice(value);
        self.file.write_all(&entry)?;

        self.index.push((key.to_vec(), self.offset));
        self.offset += entry.len() as u64;

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        Ok(())
    }

    pub fn num_entries(&self) -> u64 {
        self.index.len() as u64
    }

    pub fn file_size(&self) -> u64 {
        self.offset
    }

    /// Writes the index, properties and footer, then syncs the file. The
    /// returned properties carry the final entry count.
    pub fn finish(
        &mut self,
        mut properties: TableProperties,
        use_fsync: bool,
    ) -> Result<(u64, TableProperties)> {
        properties.num_entries = self.index.len() as u64;

        let index_offset = self.offset;
        let mut trailer = Vec::new();
        trailer
            .write_u32::<BigEndian>(self.index.len() as u32)
            .unwrap();
        for (key, offset) in &self.index {
            trailer.write_u64::<BigEndian>(*offset).unwrap();
            trailer.write_u32::<BigEndian>(key.len() as u32).unwrap();
            trailer.extend_from_slice(key);
        }
        let props_offset = index_offset + trailer.len() as u64;
        properties.encode_into(&mut trailer);

        let checksum = CASTAGNOLI.checksum(&trailer);
        trailer.write_u64::<BigEndian>(index_offset).unwrap();
        trailer.write_u64::<BigEndian>(props_offset).unwrap();
        trailer.write_u32::<BigEndian>(checksum).unwrap();

        self.file.write_all(&trailer)?;
        self.file.flush()?;
        if use_fsync {
            self.file.sync_all()?;
        } else {
            self.file.sync_data()?;
        }

        let file_size = self.offset + trailer.len() as u64;
        Ok((file_size, properties))
    }

    /// Drops the partially written output.
    pub fn abandon(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{InternalKey, ValueType};
    use crate::tmpfs::TempDir;

    #[test]
    fn test_abandon_removes_file() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("000001.sst");

        let mut builder = TableBuilder::new(&path).expect("Failed to create builder");
        builder
            .add(
                InternalKey::new(b"a", 1, ValueType::Value).encode(),
                b"value",
            )
            .expect("Failed to add");
        assert!(path.exists());

        builder.abandon();
        assert!(!path.exists());
    }
}
