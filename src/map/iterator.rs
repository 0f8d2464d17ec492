//! Presents a sorted array of file metadata, mixing data and map tables,
//! as one iterator over encoded map elements. Map-table positions delegate
//! to a lazily created sub-iterator; data-table positions synthesize a
//! single element wrapping the whole file. Compactions stream their inputs
//! through this.

use std::cmp::Ordering;
use std::sync::Arc;

use super::element::{LinkTarget, MapSstElement};
use crate::error::Result;
use crate::format::InternalKeyComparator;
use crate::manifest::meta::{FileMetaData, FilePurpose};
use crate::table::cache::{ReadOptions, TableCache};
use crate::table::reader::{EmptyIterator, TableIterator};
use crate::table::InternalIterator;

pub struct CompositeIterator<'a> {
    files: &'a [Arc<FileMetaData>],
    table_cache: &'a TableCache,
    options: ReadOptions,
    icomp: InternalKeyComparator,
    where_: usize,
    sub: Option<TableIterator>,
    key_buf: Vec<u8>,
    value_buf: Vec<u8>,
    status: Result<()>,
}

impl<'a> CompositeIterator<'a> {
    pub fn new(
        files: &'a [Arc<FileMetaData>],
        table_cache: &'a TableCache,
        options: ReadOptions,
    ) -> Self {
        assert!(!files.is_empty());
        Self {
            files,
            table_cache,
            options,
            icomp: InternalKeyComparator,
            where_: files.len(),
            sub: None,
            key_buf: Vec::new(),
            value_buf: Vec::new(),
            status: Ok(()),
        }
    }

    fn is_map(&self, index: usize) -> bool {
        self.files[index].purpose == FilePurpose::Map
    }

    fn init_sub_iterator(&mut self) -> bool {
        match self
            .table_cache
            .new_iterator(&self.options, &self.files[self.where_])
        {
            Ok(iter) => {
                self.sub = Some(iter);
                true
            }
            Err(e) => {
                self.status = Err(e);
                self.sub = None;
                self.where_ = self.files.len();
                false
            }
        }
    }

    /// Steps forward to the next file, landing on its first entry.
    fn advance_forward(&mut self) {
        loop {
            self.where_ += 1;
            if self.where_ >= self.files.len() {
                self.where_ = self.files.len();
                self.sub = None;
                return;
            }
            if !self.is_map(self.where_) {
                self.sub = None;
                self.update();
                return;
            }
            if !self.init_sub_iterator() {
                return;
            }
            let sub = self.sub.as_mut().unwrap();
            sub.seek_to_first();
            if sub.valid() {
                self.update();
                return;
            }
            if let Err(e) = sub.status() {
                self.status = Err(e);
                self.sub = None;
                self.where_ = self.files.len();
                return;
            }
            // An empty map table; skip it.
        }
    }

    /// Steps backward to the previous file, landing on its last entry.
    fn advance_backward(&mut self) {
        loop {
            if self.where_ == 0 {
                self.where_ = self.files.len();
                self.sub = None;
                return;
            }
            self.where_ -= 1;
            if !self.is_map(self.where_) {
                self.sub = None;
                self.update();
                return;
            }
            if !self.init_sub_iterator() {
                return;
            }
            let sub = self.sub.as_mut().unwrap();
            sub.seek_to_last();
            if sub.valid() {
                self.update();
                return;
            }
            if let Err(e) = sub.status() {
                self.status = Err(e);
                self.sub = None;
                self.where_ = self.files.len();
                return;
            }
        }
    }

    fn update(&mut self) {
        if let Some(sub) = &self.sub {
            self.key_buf.clear();
            self.key_buf.extend_from_slice(sub.key());
            self.value_buf.clear();
            self.value_buf.extend_from_slice(sub.value());
        } else {
            let f = &self.files[self.where_];
            let element = MapSstElement {
                smallest_key: f.smallest.encode().to_vec(),
                largest_key: f.largest.encode().to_vec(),
                include_smallest: true,
                include_largest: true,
                no_records: false,
                link: vec![LinkTarget::new(f.file_number, f.file_size)],
            };
            self.key_buf = element.key().to_vec();
            element.encode_value(&mut self.value_buf);
        }
    }
}

impl InternalIterator for CompositeIterator<'_> {
    fn valid(&self) -> bool {
        self.where_ < self.files.len()
    }

    fn seek(&mut self, target: &[u8]) {
        self.status = Ok(());
        self.where_ = self
            .files
            .partition_point(|f| self.icomp.compare(f.largest.encode(), target) == Ordering::Less);
        if self.where_ >= self.files.len() {
            self.sub = None;
            return;
        }
        if self.is_map(self.where_) {
            if !self.init_sub_iterator() {
                return;
            }
            let sub = self.sub.as_mut().unwrap();
            sub.seek(target);
            if !sub.valid() {
                if let Err(e) = sub.status() {
                    self.status = Err(e);
                    self.sub = None;
                    self.where_ = self.files.len();
                    return;
                }
                self.sub = None;
                self.advance_forward();
                return;
            }
        } else {
            self.sub = None;
        }
        self.update();
    }

    fn seek_for_prev(&mut self, target: &[u8]) {
        self.status = Ok(());
        let bound = self
            .files
            .partition_point(|f| self.icomp.compare(f.largest.encode(), target) != Ordering::Greater);
        self.where_ = bound;
        self.sub = None;
        // The file straddling the target may still hold entries at or
        // before it; every earlier file's entries qualify outright.
        if bound < self.files.len() && self.is_map(bound) {
            if !self.init_sub_iterator() {
                return;
            }
            let sub = self.sub.as_mut().unwrap();
            sub.seek_for_prev(target);
            if sub.valid() {
                self.update();
                return;
            }
            if let Err(e) = sub.status() {
                self.status = Err(e);
                self.sub = None;
                self.where_ = self.files.len();
                return;
            }
            self.sub = None;
        }
        self.advance_backward();
    }

    fn seek_to_first(&mut self) {
        self.status = Ok(());
        self.where_ = 0;
        if self.is_map(self.where_) {
            if !self.init_sub_iterator() {
                return;
            }
            let sub = self.sub.as_mut().unwrap();
            sub.seek_to_first();
            if !sub.valid() {
                if let Err(e) = sub.status() {
                    self.status = Err(e);
                    self.sub = None;
                    self.where_ = self.files.len();
                    return;
                }
                self.sub = None;
                self.advance_forward();
                return;
            }
        } else {
            self.sub = None;
        }
        self.update();
    }

    fn seek_to_last(&mut self) {
        self.status = Ok(());
        self.where_ = self.files.len() - 1;
        if self.is_map(self.where_) {
            if !self.init_sub_iterator() {
                return;
            }
            let sub = self.sub.as_mut().unwrap();
            sub.seek_to_last();
            if !sub.valid() {
                if let Err(e) = sub.status() {
                    self.status = Err(e);
                    self.sub = None;
                    self.where_ = self.files.len();
                    return;
                }
                self.sub = None;
                self.advance_backward();
                return;
            }
        } else {
            self.sub = None;
        }
        self.update();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        if let Some(sub) = &mut self.sub {
            sub.next();
            if sub.valid() {
                self.update();
                return;
            }
            if let Err(e) = sub.status() {
                self.status = Err(e);
                self.sub = None;
                self.where_ = self.files.len();
                return;
            }
            self.sub = None;
        }
        self.advance_forward();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if let Some(sub) = &mut self.sub {
            sub.prev();
            if sub.valid() {
                self.update();
                return;
            }
            if let Err(e) = sub.status() {
                self.status = Err(e);
                self.sub = None;
                self.where_ = self.files.len();
                return;
            }
            self.sub = None;
        }
        self.advance_backward();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.key_buf
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.value_buf
    }

    fn status(&self) -> Result<()> {
        self.status.clone()
    }
}

/// Builds the element stream for a file array. An empty array yields an
/// empty iterator; a single map file iterates its raw entries directly.
pub fn new_composite_iterator<'a>(
    files: &'a [Arc<FileMetaData>],
    table_cache: &'a TableCache,
    options: ReadOptions,
) -> Result<Box<dyn InternalIterator + 'a>> {
    if files.is_empty() {
        Ok(Box::new(EmptyIterator))
    } else if files.len() == 1 && files[0].purpose == FilePurpose::Map {
        let iter = table_cache.new_iterator(&options, &files[0])?;
        Ok(Box::new(iter))
    } else {
        Ok(Box::new(CompositeIterator::new(
            files,
            table_cache,
            options,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::format::{InternalKey, ValueType};
    use crate::table::builder::TableBuilder;
    use crate::table::properties::TableProperties;
    use crate::table::table_file_name;
    use crate::tmpfs::TempDir;
    use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

    fn ikey(user_key: &[u8], seq: u64) -> Vec<u8> {
        InternalKey::new(user_key, seq, ValueType::Value)
            .encode()
            .to_vec()
    }

    struct TestEnv {
        _dir: TempDir,
        config: Config,
        cache: TableCache,
        next_file_number: AtomicU64,
    }

    impl TestEnv {
        fn new() -> Self {
            let dir = TempDir::new().expect("Failed to create temp dir");
            let config = Config::new(dir.path());
            let cache = TableCache::new(config.clone());
            Self {
                _dir: dir,
                config,
                cache,
                next_file_number: AtomicU64::new(1),
            }
        }

        fn write_data_file(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Arc<FileMetaData> {
            let file_number = self.next_file_number.fetch_add(1, AtomicOrdering::SeqCst);
            let path = table_file_name(&self.config.dir, file_number);
            let mut builder = TableBuilder::new(&path).expect("Failed to create builder");
            for (key, value) in entries {
                builder.add(key, value).expect("Failed to add entry");
            }
            let (file_size, _) = builder
                .finish(TableProperties::default(), false)
                .expect("Failed to finish table");
            Arc::new(FileMetaData {
                file_number,
                path_id: 0,
                file_size,
                smallest: InternalKey::decode_from(&entries.first().unwrap().0),
                largest: InternalKey::decode_from(&entries.last().unwrap().0),
                smallest_seqno: 1,
                largest_seqno: 9,
                purpose: FilePurpose::Data,
                dependence: vec![],
                read_amp: 0,
                creation_time: 0,
            })
        }

        fn write_map_file(&self, elements: &[MapSstElement]) -> Arc<FileMetaData> {
            let file_number = self.next_file_number.fetch_add(1, AtomicOrdering::SeqCst);
            let path = table_file_name(&self.config.dir, file_number);
            let mut builder = TableBuilder::new(&path).expect("Failed to create builder");
            let mut buf = Vec::new();
            for element in elements {
                element.encode_value(&mut buf);
                builder.add(element.key(), &buf).expect("Failed to add");
            }
            let properties = TableProperties {
                purpose: FilePurpose::Map,
                num_entries: 0,
                dependence: vec![100],
                read_amp: 1,
                creation_time: 0,
            };
            let (file_size, _) = builder
                .finish(properties, false)
                .expect("Failed to finish table");
            Arc::new(FileMetaData {
                file_number,
                path_id: 0,
                file_size,
                smallest: InternalKey::decode_from(&elements.first().unwrap().smallest_key),
                largest: InternalKey::decode_from(&elements.last().unwrap().largest_key),
                smallest_seqno: 1,
                largest_seqno: 9,
                purpose: FilePurpose::Map,
                dependence: vec![100],
                read_amp: 1,
                creation_time: 0,
            })
        }
    }

    fn element(smallest: Vec<u8>, largest: Vec<u8>, link: u64) -> MapSstElement {
        MapSstElement {
            smallest_key: smallest,
            largest_key: largest,
            include_smallest: true,
            include_largest: true,
            no_records: false,
            link: vec![LinkTarget::new(link, 0)],
        }
    }

    /// One data file, a map file with two entries, another data file.
    fn mixed_files(env: &TestEnv) -> Vec<Arc<FileMetaData>> {
        let f1 = env.write_data_file(&[
            (ikey(b"a", 5), b"va".to_vec()),
            (ikey(b"c", 5), b"vc".to_vec()),
        ]);
        let map = env.write_map_file(&[
            element(ikey(b"d", 9), ikey(b"f", 2), 100),
            element(ikey(b"g", 9), ikey(b"i", 2), 100),
        ]);
        let f2 = env.write_data_file(&[
            (ikey(b"j", 5), b"vj".to_vec()),
            (ikey(b"l", 5), b"vl".to_vec()),
        ]);
        vec![f1, map, f2]
    }

    fn collect_keys(iter: &mut dyn InternalIterator) -> Vec<Vec<u8>> {
        let mut keys = Vec::new();
        iter.seek_to_first();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        keys
    }

    #[test]
    fn test_forward_traversal_mixes_synthesized_and_real_elements() {
        let env = TestEnv::new();
        let files = mixed_files(&env);
        let mut iter =
            CompositeIterator::new(&files, &env.cache, ReadOptions::default());

        let keys = collect_keys(&mut iter);
        assert_eq!(
            keys,
            vec![ikey(b"c", 5), ikey(b"f", 2), ikey(b"i", 2), ikey(b"l", 5)]
        );
        assert!(iter.status().is_ok());
    }

    #[test]
    fn test_data_positions_synthesize_whole_file_elements() {
        let env = TestEnv::new();
        let files = mixed_files(&env);
        let mut iter =
            CompositeIterator::new(&files, &env.cache, ReadOptions::default());

        iter.seek_to_first();
        assert!(iter.valid());
        let element = MapSstElement::decode(iter.key(), iter.value()).unwrap();
        assert_eq!(element.smallest_key, ikey(b"a", 5));
        assert_eq!(element.largest_key, ikey(b"c", 5));
        assert!(element.include_smallest && element.include_largest);
        assert!(!element.no_records);
        assert_eq!(element.link.len(), 1);
        assert_eq!(element.link[0].file_number, files[0].file_number);
    }

    #[test]
    fn test_seek_descends_into_map_positions() {
        let env = TestEnv::new();
        let files = mixed_files(&env);
        let mut iter =
            CompositeIterator::new(&files, &env.cache, ReadOptions::default());

        iter.seek(&ikey(b"e", 9));
        assert!(iter.valid());
        assert_eq!(iter.key(), ikey(b"f", 2).as_slice());

        iter.seek(&ikey(b"g", 9));
        assert!(iter.valid());
        assert_eq!(iter.key(), ikey(b"i", 2).as_slice());

        iter.seek(&ikey(b"k", 9));
        assert!(iter.valid());
        assert_eq!(iter.key(), ikey(b"l", 5).as_slice());

        iter.seek(&ikey(b"z", 9));
        assert!(!iter.valid());
    }

    #[test]
    fn test_seek_for_prev_descends_into_map_positions() {
        let env = TestEnv::new();
        let files = mixed_files(&env);
        let mut iter =
            CompositeIterator::new(&files, &env.cache, ReadOptions::default());

        iter.seek_for_prev(&ikey(b"g", 9));
        assert!(iter.valid());
        assert_eq!(iter.key(), ikey(b"f", 2).as_slice());

        iter.seek_for_prev(&ikey(b"z", 1));
        assert!(iter.valid());
        assert_eq!(iter.key(), ikey(b"l", 5).as_slice());

        iter.seek_for_prev(&ikey(b"a", 9));
        assert!(!iter.valid());
    }

    #[test]
    fn test_backward_traversal() {
        let env = TestEnv::new();
        let files = mixed_files(&env);
        let mut iter =
            CompositeIterator::new(&files, &env.cache, ReadOptions::default());

        let mut keys = Vec::new();
        iter.seek_to_last();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.prev();
        }
        keys.reverse();
        assert_eq!(
            keys,
            vec![ikey(b"c", 5), ikey(b"f", 2), ikey(b"i", 2), ikey(b"l", 5)]
        );
    }

    #[test]
    fn test_factory_shortcuts() {
        let env = TestEnv::new();

        let empty: Vec<Arc<FileMetaData>> = Vec::new();
        let mut iter =
            new_composite_iterator(&empty, &env.cache, ReadOptions::default()).unwrap();
        iter.seek_to_first();
        assert!(!iter.valid());

        // A single map file iterates its raw entries.
        let map = env.write_map_file(&[
            element(ikey(b"d", 9), ikey(b"f", 2), 100),
            element(ikey(b"g", 9), ikey(b"i", 2), 100),
        ]);
        let single = vec![map];
        let mut iter =
            new_composite_iterator(&single, &env.cache, ReadOptions::default()).unwrap();
        let keys = collect_keys(iter.as_mut());
        assert_eq!(keys, vec![ikey(b"f", 2), ikey(b"i", 2)]);
    }
}
