//! Builds the interval partition for a set of input files and either emits
//! a new map table or recognizes that none is needed.
//!
//! Inputs are loaded per level (level 0 per file, to preserve overlap),
//! reduced to one partition by repeatedly merging the adjacent pair with
//! the smallest combined size, then carved by deletion ranges and extended
//! by caller-created files. The finished partition is checked for elision
//! before anything is written.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use itertools::Itertools as _;

use super::element::MapSstElement;
use super::emitter::MapElementEmitter;
use super::partition::{partition_ranges, PartitionType};
use super::range::RangeWithDepend;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::format::{
    extract_footer, extract_sequence, extract_user_key, InternalKeyComparator, Range,
    MAX_SEQUENCE_NUMBER,
};
use crate::manifest::edit::{VersionEdit, UNOWNED_LEVEL};
use crate::manifest::meta::{BoundBuilder, DependenceMap, FileMetaData, FilePurpose};
use crate::table::builder::TableBuilder;
use crate::table::cache::TableCache;
use crate::table::iterator_cache::IteratorCache;
use crate::table::properties::TableProperties;
use crate::table::{table_file_name, InternalIterator};

/// One level's contribution to a build. Level 0 files may overlap each
/// other; files of any other level must be sorted and disjoint.
#[derive(Debug, Clone)]
pub struct CompactionInputFiles {
    pub level: i32,
    pub files: Vec<Arc<FileMetaData>>,
}

#[derive(Debug, Default)]
pub struct BuildOutput {
    /// The new map file, when one was written.
    pub file_meta: Option<FileMetaData>,
    pub properties: Option<TableProperties>,
    /// Every input file the edit removed from its level.
    pub deleted_files: BTreeSet<u64>,
}

/// A degenerate interval that exactly and exclusively wraps one data file,
/// making an index over it superfluous.
fn is_preface_range(range: &Range, f: &FileMetaData, icomp: &InternalKeyComparator) -> bool {
    f.purpose == FilePurpose::Data
        && range.include_start
        && icomp.compare(&range.start, f.smallest.encode()) == Ordering::Equal
        && icomp.user_compare(extract_user_key(&range.limit), f.largest.user_key())
            == Ordering::Equal
        && if f.largest.sequence() == MAX_SEQUENCE_NUMBER {
            extract_sequence(&range.limit) == MAX_SEQUENCE_NUMBER
        } else {
            range.include_limit && extract_footer(&range.limit) == f.largest.footer()
        }
}

fn load_range_with_depend(
    ranges: &mut Vec<RangeWithDepend>,
    bounds: &mut BoundBuilder,
    iterator_cache: &mut IteratorCache,
    files: &[Arc<FileMetaData>],
) -> Result<()> {
    for f in files {
        let entry = iterator_cache.get_for_meta(f)?;
        if f.purpose == FilePurpose::Map {
            let iter = &mut entry.iter;
            iter.seek_to_first();
            while iter.valid() {
                let element = MapSstElement::decode(iter.key(), iter.value())
                    .map_err(|_| crate::corruption!("map sst invalid key or value"))?;
                ranges.push(RangeWithDepend::from_element(&element));
                iter.next();
            }
            iter.status()?;
        } else {
            ranges.push(RangeWithDepend::from_file(f));
        }
        bounds.update(f);
        bounds.creation_time = bounds
            .creation_time
            .max(entry.table.properties().creation_time);
    }
    Ok(())
}

fn delete_input_file(
    edit: &mut VersionEdit,
    deleted_files: &mut BTreeSet<u64>,
    level: i32,
    f: &FileMetaData,
) {
    edit.delete_file(level, f.file_number);
    deleted_files.insert(f.file_number);
}

fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        total += entry?.metadata()?.len();
    }
    Ok(total)
}

pub struct MapBuilder<'a> {
    job_id: u64,
    config: &'a Config,
    table_cache: &'a TableCache,
    next_file_number: &'a AtomicU64,
    icomp: InternalKeyComparator,
}

impl<'a> MapBuilder<'a> {
    pub fn new(
        job_id: u64,
        config: &'a Config,
        table_cache: &'a TableCache,
        next_file_number: &'a AtomicU64,
    ) -> Self {
        Self {
            job_id,
            config,
            table_cache,
            next_file_number,
            icomp: InternalKeyComparator,
        }
    }

    /// Transforms the inputs into a minimal interval partition and emits
    /// either a new map table or a direct file-set edit. On failure the
    /// edit is left untouched and any partial output file is removed.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &self,
        inputs: &[CompactionInputFiles],
        deleted_range: &[Range],
        added_files: &[Arc<FileMetaData>],
        output_level: i32,
        output_path_id: u32,
        dependence_map: &DependenceMap,
        edit: &mut VersionEdit,
    ) -> Result<BuildOutput> {
        let mut iterator_cache = IteratorCache::new(dependence_map, self.table_cache);
        let mut level_ranges: VecDeque<Vec<RangeWithDepend>> = VecDeque::new();
        let mut bounds = BoundBuilder::new(self.icomp);
        let mut input_range_count = 0usize;

        for level_files in inputs {
            if level_files.files.is_empty() {
                continue;
            }
            if level_files.level == 0 {
                for f in &level_files.files {
                    let mut ranges = Vec::new();
                    load_range_with_depend(
                        &mut ranges,
                        &mut bounds,
                        &mut iterator_cache,
                        std::slice::from_ref(f),
                    )?;
                    input_range_count += ranges.len();
                    if !ranges.is_empty() {
                        level_ranges.push_back(ranges);
                    }
                }
            } else {
                debug_assert!(level_files
                    .files
                    .iter()
                    .tuple_windows()
                    .all(|(a, b)| self.icomp.compare_key(&a.largest, &b.largest)
                        != Ordering::Greater));
                let mut ranges = Vec::new();
                load_range_with_depend(
                    &mut ranges,
                    &mut bounds,
                    &mut iterator_cache,
                    &level_files.files,
                )?;
                input_range_count += ranges.len();
                if !ranges.is_empty() {
                    level_ranges.push_back(ranges);
                }
            }
        }

        // Reduce to one partition, always merging the adjacent pair with
        // the smallest combined size to keep intermediates small.
        while level_ranges.len() > 1 {
            let mut union_at = 0;
            let mut min_sum = level_ranges[0].len() + level_ranges[1].len();
            for i in 1..level_ranges.len() - 1 {
                let sum = level_ranges[i].len() + level_ranges[i + 1].len();
                if sum < min_sum {
                    min_sum = sum;
                    union_at = i;
                }
            }
            let merged = partition_ranges(
                &level_ranges[union_at],
                &level_ranges[union_at + 1],
                &self.icomp,
                PartitionType::Merge,
            );
            level_ranges[union_at] = merged;
            level_ranges.remove(union_at + 1);
        }

        if !level_ranges.is_empty() && !deleted_range.is_empty() {
            let masks: Vec<RangeWithDepend> = deleted_range
                .iter()
                .map(RangeWithDepend::from_deletion)
                .collect();
            debug_assert!(masks
                .iter()
                .tuple_windows()
                .all(|(a, b)| self.icomp.compare_key(&a.point[1], &b.point[1])
                    != Ordering::Greater));
            let front = partition_ranges(
                &level_ranges[0],
                &masks,
                &self.icomp,
                PartitionType::Delete,
            );
            if front.is_empty() {
                level_ranges.pop_front();
            } else {
                level_ranges[0] = front;
            }
        }

        if !added_files.is_empty() {
            debug_assert!(added_files
                .iter()
                .tuple_windows()
                .all(|(a, b)| self.icomp.compare_key(&a.largest, &b.largest) != Ordering::Greater));
            let mut ranges = Vec::new();
            load_range_with_depend(&mut ranges, &mut bounds, &mut iterator_cache, added_files)?;
            if level_ranges.is_empty() {
                level_ranges.push_back(ranges);
            } else {
                let merged = partition_ranges(
                    &level_ranges[0],
                    &ranges,
                    &self.icomp,
                    PartitionType::Merge,
                );
                level_ranges[0] = merged;
            }
        }

        let mut output = BuildOutput::default();

        if level_ranges.is_empty() {
            // Everything was deleted.
            for input_level in inputs {
                for f in &input_level.files {
                    delete_input_file(edit, &mut output.deleted_files, input_level.level, f);
                }
            }
            return Ok(output);
        }
        let ranges = level_ranges.pop_front().unwrap();

        // Level 0 outputs must keep per-file sequence ranges disjoint, so
        // elision is only sound above level 0 or for a single interval.
        if output_level != 0 || ranges.len() == 1 {
            let mut sst_live: HashMap<u64, Arc<FileMetaData>> = HashMap::new();
            let mut build_map_sst = false;
            for r in &ranges {
                if r.dependence.len() > 1 {
                    build_map_sst = true;
                    break;
                }
                let f = iterator_cache.file_meta(r.dependence[0].file_number)?;
                let range = Range::new(
                    r.point[0].encode().to_vec(),
                    r.point[1].encode().to_vec(),
                    r.include[0],
                    r.include[1],
                );
                if !is_preface_range(&range, &f, &self.icomp) {
                    build_map_sst = true;
                    break;
                }
                sst_live.insert(f.file_number, f);
            }
            if !build_map_sst {
                // Every interval wraps exactly one data file; move them
                // instead of indexing them.
                for input_level in inputs {
                    for f in &input_level.files {
                        if sst_live.remove(&f.file_number).is_some() {
                            if output_level != input_level.level {
                                delete_input_file(
                                    edit,
                                    &mut output.deleted_files,
                                    input_level.level,
                                    f,
                                );
                                edit.add_file(output_level, f);
                            }
                        } else {
                            delete_input_file(
                                edit,
                                &mut output.deleted_files,
                                input_level.level,
                                f,
                            );
                        }
                    }
                }
                for f in sst_live.into_values() {
                    edit.add_file(output_level, &f);
                }
                return Ok(output);
            }
        }

        if inputs.len() == 1
            && inputs[0].files.len() == 1
            && inputs[0].files[0].purpose == FilePurpose::Map
            && ranges.len() == input_range_count
            && ranges.iter().all(|r| r.stable)
        {
            // The new map would equal the input map.
            return Ok(output);
        }

        debug_assert!(ranges
            .iter()
            .tuple_windows()
            .all(|(a, b)| self.icomp.compare_key(&a.point[1], &b.point[1]) != Ordering::Greater));

        let (file_meta, properties) =
            self.write_output_file(&bounds, &ranges, &mut iterator_cache, output_path_id)?;

        for input_level in inputs {
            for f in &input_level.files {
                delete_input_file(edit, &mut output.deleted_files, input_level.level, f);
            }
        }
        for f in added_files {
            edit.add_file(UNOWNED_LEVEL, f);
        }
        edit.add_file(output_level, &file_meta);

        output.file_meta = Some(file_meta);
        output.properties = Some(properties);
        Ok(output)
    }

    fn write_output_file(
        &self,
        bounds: &BoundBuilder,
        ranges: &[RangeWithDepend],
        iterator_cache: &mut IteratorCache,
        output_path_id: u32,
    ) -> Result<(FileMetaData, TableProperties)> {
        let file_number = self.next_file_number.fetch_add(1, AtomicOrdering::SeqCst);
        let fname = table_file_name(&self.config.dir, file_number);

        let mut builder = match TableBuilder::new(&fname) {
            Ok(builder) => builder,
            Err(e) => {
                tracing::error!(
                    job_id = self.job_id,
                    file_number,
                    error = %e,
                    "creating map table file failed"
                );
                return Err(e);
            }
        };

        let creation_time = if bounds.creation_time == 0 {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0)
        } else {
            bounds.creation_time
        };

        let mut emitter = MapElementEmitter::new(ranges, iterator_cache);
        emitter.seek_to_first();
        let mut failure: Option<Error> = None;
        while emitter.valid() {
            if let Err(e) = builder.add(emitter.key(), emitter.value()) {
                failure = Some(e);
                break;
            }
            emitter.next();
        }
        if failure.is_none() {
            failure = emitter.status().err();
        }
        let dependence = emitter.dependence();
        let read_amp = emitter.read_amp() as u32;
        if let Some(e) = failure {
            builder.abandon();
            return Err(e);
        }

        let properties = TableProperties {
            purpose: FilePurpose::Map,
            num_entries: 0,
            dependence,
            read_amp,
            creation_time,
        };
        let (file_size, properties) = match builder.finish(properties, self.config.use_fsync) {
            Ok(finished) => finished,
            Err(e) => {
                builder.abandon();
                return Err(e);
            }
        };

        let file_meta = FileMetaData {
            file_number,
            path_id: output_path_id,
            file_size,
            smallest: bounds.smallest.clone(),
            largest: bounds.largest.clone(),
            smallest_seqno: bounds.smallest_seqno,
            largest_seqno: bounds.largest_seqno,
            purpose: FilePurpose::Map,
            dependence: properties.dependence.clone(),
            read_amp: properties.read_amp,
            creation_time,
        };

        if let Some(limit) = self.config.max_allowed_space {
            let used = dir_size(&self.config.dir)?;
            if used > limit {
                tracing::warn!(
                    job_id = self.job_id,
                    used,
                    limit,
                    "space budget exceeded after writing map table"
                );
                return Err(Error::SpaceLimit(format!(
                    "{used} bytes used of {limit} allowed"
                )));
            }
        }

        tracing::info!(
            job_id = self.job_id,
            file_number,
            entries = properties.num_entries,
            bytes = file_size,
            "generated map table"
        );
        Ok((file_meta, properties))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{InternalKey, ValueType};
    use crate::map::element::LinkTarget;
    use crate::table::get_context::{GetContext, GetState};
    use crate::table::cache::ReadOptions;
    use crate::tmpfs::TempDir;

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

        fn builder(&self) -> MapBuilder<'_> {
            MapBuilder::new(1, &self.config, &self.cache, &self.next_file_number)
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

            let seqnos: Vec<u64> = entries
                .iter()
                .map(|(key, _)| extract_sequence(key))
                .collect();
            Arc::new(FileMetaData {
                file_number,
                path_id: 0,
                file_size,
                smallest: InternalKey::decode_from(&entries.first().unwrap().0),
                largest: InternalKey::decode_from(&entries.last().unwrap().0),
                smallest_seqno: seqnos.iter().copied().min().unwrap(),
                largest_seqno: seqnos.iter().copied().max().unwrap(),
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
            let mut dependence: BTreeSet<u64> = BTreeSet::new();
            let mut read_amp = 0;
            for element in elements {
                element.encode_value(&mut buf);
                builder.add(element.key(), &buf).expect("Failed to add");
                dependence.extend(element.link.iter().map(|l| l.file_number));
                read_amp = read_amp.max(element.link.len() as u32);
            }
            let properties = TableProperties {
                purpose: FilePurpose::Map,
                num_entries: 0,
                dependence: dependence.iter().copied().collect(),
                read_amp,
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
                smallest_seqno: 0,
                largest_seqno: 0,
                purpose: FilePurpose::Map,
                dependence: dependence.into_iter().collect(),
                read_amp,
                creation_time: 0,
            })
        }

        fn sst_count(&self) -> usize {
            fs::read_dir(&self.config.dir).unwrap().count()
        }

        fn get(
            &self,
            f: &Arc<FileMetaData>,
            dependence_map: &DependenceMap,
            user_key: &[u8],
            snapshot: u64,
        ) -> GetState {
            let mut context = GetContext::new(user_key, snapshot);
            let k = context.lookup_key();
            self.cache
                .get(&ReadOptions::default(), f, dependence_map, &k, &mut context)
                .expect("Lookup failed");
            context.state().clone()
        }
    }

    fn dependence_map(files: &[&Arc<FileMetaData>]) -> DependenceMap {
        files
            .iter()
            .map(|f| (f.file_number, Arc::clone(f)))
            .collect()
    }

    fn entries_between(start: u8, end: u8, seq: u64) -> Vec<(Vec<u8>, Vec<u8>)> {
        (start..=end)
            .map(|c| {
                let user_key = vec![c];
                let value = format!("value_{}", c as char).into_bytes();
                (ikey(&user_key, seq), value)
            })
            .collect()
    }

    #[test]
    fn test_preface_elision_moves_file() {
        let env = TestEnv::new();
        let f1 = env.write_data_file(&entries_between(b'a', b'z', 5));

        let inputs = [CompactionInputFiles {
            level: 1,
            files: vec![f1.clone()],
        }];
        let mut edit = VersionEdit::new();
        let output = env
            .builder()
            .build(
                &inputs,
                &[],
                &[],
                2,
                0,
                &dependence_map(&[&f1]),
                &mut edit,
            )
            .expect("Build failed");

        assert!(output.file_meta.is_none());
        assert_eq!(edit.deleted(), &[(1, f1.file_number)]);
        assert_eq!(edit.added().len(), 1);
        assert_eq!(edit.added()[0].0, 2);
        assert_eq!(edit.added()[0].1.file_number, f1.file_number);
        assert!(output.deleted_files.contains(&f1.file_number));
        // No new table file was written.
        assert_eq!(env.sst_count(), 1);
    }

    #[test]
    fn test_preface_elision_same_level_is_noop() {
        let env = TestEnv::new();
        let f1 = env.write_data_file(&entries_between(b'a', b'z', 5));

        let inputs = [CompactionInputFiles {
            level: 2,
            files: vec![f1.clone()],
        }];
        let mut edit = VersionEdit::new();
        let output = env
            .builder()
            .build(
                &inputs,
                &[],
                &[],
                2,
                0,
                &dependence_map(&[&f1]),
                &mut edit,
            )
            .expect("Build failed");

        assert!(output.file_meta.is_none());
        assert!(edit.is_empty());
    }

    #[test]
    fn test_stable_map_rewrite_is_noop() {
        let env = TestEnv::new();
        let elements = vec![
            MapSstElement {
                smallest_key: ikey(b"a", 9),
                largest_key: ikey(b"f", 2),
                include_smallest: true,
                include_largest: true,
                no_records: false,
                link: vec![LinkTarget::new(100, 0), LinkTarget::new(101, 0)],
            },
            MapSstElement {
                smallest_key: ikey(b"g", 9),
                largest_key: ikey(b"p", 2),
                include_smallest: true,
                include_largest: true,
                no_records: false,
                link: vec![LinkTarget::new(101, 0), LinkTarget::new(102, 0)],
            },
        ];
        let map = env.write_map_file(&elements);

        let inputs = [CompactionInputFiles {
            level: 1,
            files: vec![map.clone()],
        }];
        let mut edit = VersionEdit::new();
        let output = env
            .builder()
            .build(&inputs, &[], &[], 1, 0, &DependenceMap::new(), &mut edit)
            .expect("Build failed");

        assert!(output.file_meta.is_none());
        assert!(edit.is_empty());
        assert_eq!(env.sst_count(), 1);
    }

    #[test]
    fn test_overlapping_inputs_build_map() {
        let env = TestEnv::new();
        let f1 = env.write_data_file(&entries_between(b'a', b'p', 5));
        let f2 = env.write_data_file(&entries_between(b'h', b'z', 3));

        let inputs = [
            CompactionInputFiles {
                level: 1,
                files: vec![f1.clone()],
            },
            CompactionInputFiles {
                level: 2,
                files: vec![f2.clone()],
            },
        ];
        let deps = dependence_map(&[&f1, &f2]);
        let mut edit = VersionEdit::new();
        let output = env
            .builder()
            .build(&inputs, &[], &[], 2, 0, &deps, &mut edit)
            .expect("Build failed");

        let file_meta = output.file_meta.expect("expected a new map file");
        assert_eq!(file_meta.purpose, FilePurpose::Map);
        assert_eq!(
            file_meta.dependence,
            vec![f1.file_number, f2.file_number]
        );
        assert_eq!(file_meta.read_amp, 2);
        assert_eq!(file_meta.smallest.user_key(), b"a");
        assert_eq!(file_meta.largest.user_key(), b"z");

        let properties = output.properties.expect("expected properties");
        assert_eq!(properties.num_entries, 3);

        // The edit replaces both inputs with the map at the output level.
        assert_eq!(
            edit.deleted(),
            &[(1, f1.file_number), (2, f2.file_number)]
        );
        assert_eq!(edit.added().len(), 1);
        assert_eq!(edit.added()[0].0, 2);
        assert_eq!(edit.added()[0].1.file_number, file_meta.file_number);

        // Decode the written entries: three intervals, the middle one
        // linking both files in input order.
        let table = std::sync::Arc::new(
            crate::table::reader::Table::open(&table_file_name(
                &env.config.dir,
                file_meta.file_number,
            ))
            .expect("Failed to open map table"),
        );
        let mut iter = table.iter().expect("Failed to iterate");
        let mut elements = Vec::new();
        iter.seek_to_first();
        while iter.valid() {
            elements.push(MapSstElement::decode(iter.key(), iter.value()).unwrap());
            iter.next();
        }
        assert_eq!(elements.len(), 3);
        assert_eq!(
            elements[0]
                .link
                .iter()
                .map(|l| l.file_number)
                .collect::<Vec<_>>(),
            vec![f1.file_number]
        );
        assert_eq!(
            elements[1]
                .link
                .iter()
                .map(|l| l.file_number)
                .collect::<Vec<_>>(),
            vec![f1.file_number, f2.file_number]
        );
        assert_eq!(
            elements[2]
                .link
                .iter()
                .map(|l| l.file_number)
                .collect::<Vec<_>>(),
            vec![f2.file_number]
        );
        assert!(elements.iter().all(|e| !e.no_records));
    }

    #[test]
    fn test_lookup_through_map_matches_direct_query() {
        let env = TestEnv::new();
        let f1 = env.write_data_file(&entries_between(b'a', b'p', 5));
        let f2 = env.write_data_file(&entries_between(b'h', b'z', 3));

        let inputs = [
            CompactionInputFiles {
                level: 1,
                files: vec![f1.clone()],
            },
            CompactionInputFiles {
                level: 2,
                files: vec![f2.clone()],
            },
        ];
        let deps = dependence_map(&[&f1, &f2]);
        let mut edit = VersionEdit::new();
        let output = env
            .builder()
            .build(&inputs, &[], &[], 2, 0, &deps, &mut edit)
            .expect("Build failed");
        let map_meta = Arc::new(output.file_meta.unwrap());

        // Every key readable directly must read identically through the
        // indirection.
        for c in b'a'..=b'z' {
            let user_key = [c];
            let through_map = env.get(&map_meta, &deps, &user_key, 10);
            let direct_f1 = env.get(&f1, &deps, &user_key, 10);
            let direct_f2 = env.get(&f2, &deps, &user_key, 10);
            let direct = if direct_f1 != GetState::NotFound {
                direct_f1
            } else {
                direct_f2
            };
            assert_eq!(through_map, direct, "mismatch at key {:?}", c as char);
        }
    }

    #[test]
    fn test_deletion_range_carves_gap() {
        let env = TestEnv::new();
        let f1 = env.write_data_file(&entries_between(b'a', b'z', 5));

        let inputs = [CompactionInputFiles {
            level: 1,
            files: vec![f1.clone()],
        }];
        let deleted = [Range::new(ikey(b"m", 9), ikey(b"p", 1), true, true)];
        let deps = dependence_map(&[&f1]);
        let mut edit = VersionEdit::new();
        let output = env
            .builder()
            .build(&inputs, &deleted, &[], 2, 0, &deps, &mut edit)
            .expect("Build failed");

        let map_meta = Arc::new(output.file_meta.expect("expected a map file"));

        // Deleted keys are gone through the map, surviving ones remain.
        for c in b'a'..=b'z' {
            let user_key = [c];
            let state = env.get(&map_meta, &deps, &user_key, 10);
            if (b'm'..=b'p').contains(&c) {
                assert_eq!(state, GetState::NotFound, "key {:?}", c as char);
            } else {
                assert!(
                    matches!(state, GetState::Found(_)),
                    "key {:?}",
                    c as char
                );
            }
        }
    }

    #[test]
    fn test_deleting_everything_emits_only_deletes() {
        let env = TestEnv::new();
        let f1 = env.write_data_file(&entries_between(b'c', b'f', 5));

        let inputs = [CompactionInputFiles {
            level: 1,
            files: vec![f1.clone()],
        }];
        let deleted = [Range::new(ikey(b"a", 9), ikey(b"z", 1), true, true)];
        let mut edit = VersionEdit::new();
        let output = env
            .builder()
            .build(
                &inputs,
                &deleted,
                &[],
                2,
                0,
                &dependence_map(&[&f1]),
                &mut edit,
            )
            .expect("Build failed");

        assert!(output.file_meta.is_none());
        assert_eq!(edit.deleted(), &[(1, f1.file_number)]);
        assert!(edit.added().is_empty());
        assert_eq!(env.sst_count(), 1);
    }

    #[test]
    fn test_added_files_register_at_unowned_level() {
        let env = TestEnv::new();
        let f1 = env.write_data_file(&entries_between(b'a', b'p', 5));
        let f3 = env.write_data_file(&entries_between(b'h', b'z', 7));

        let inputs = [CompactionInputFiles {
            level: 1,
            files: vec![f1.clone()],
        }];
        let deps = dependence_map(&[&f1, &f3]);
        let mut edit = VersionEdit::new();
        let output = env
            .builder()
            .build(&inputs, &[], &[f3.clone()], 2, 0, &deps, &mut edit)
            .expect("Build failed");

        let file_meta = output.file_meta.expect("expected a map file");
        assert_eq!(
            file_meta.dependence,
            vec![f1.file_number, f3.file_number]
        );

        let unowned: Vec<u64> = edit
            .added()
            .iter()
            .filter(|(level, _)| *level == UNOWNED_LEVEL)
            .map(|(_, f)| f.file_number)
            .collect();
        assert_eq!(unowned, vec![f3.file_number]);
        assert!(edit
            .added()
            .iter()
            .any(|(level, f)| *level == 2 && f.file_number == file_meta.file_number));
    }

    #[test]
    fn test_disjoint_added_file_elides_to_output_level() {
        let env = TestEnv::new();
        let f1 = env.write_data_file(&entries_between(b'a', b'm', 5));
        let f3 = env.write_data_file(&entries_between(b'n', b'z', 7));

        let inputs = [CompactionInputFiles {
            level: 1,
            files: vec![f1.clone()],
        }];
        let deps = dependence_map(&[&f1, &f3]);
        let mut edit = VersionEdit::new();
        let output = env
            .builder()
            .build(&inputs, &[], &[f3.clone()], 2, 0, &deps, &mut edit)
            .expect("Build failed");

        // Both intervals wrap their file exactly, so no map is needed: the
        // input moves and the added file lands at the output level.
        assert!(output.file_meta.is_none());
        assert_eq!(edit.deleted(), &[(1, f1.file_number)]);
        let mut added: Vec<(i32, u64)> = edit
            .added()
            .iter()
            .map(|(level, f)| (*level, f.file_number))
            .collect();
        added.sort();
        assert_eq!(added, vec![(2, f1.file_number), (2, f3.file_number)]);
    }

    #[test]
    fn test_missing_dependence_fails_and_abandons_output() {
        let env = TestEnv::new();
        let elements = vec![MapSstElement {
            smallest_key: ikey(b"a", 9),
            largest_key: ikey(b"z", 1),
            include_smallest: true,
            include_largest: true,
            no_records: false,
            link: vec![LinkTarget::new(998, 0), LinkTarget::new(999, 0)],
        }];
        let map = env.write_map_file(&elements);
        let files_before = env.sst_count();

        let inputs = [CompactionInputFiles {
            level: 1,
            files: vec![map.clone()],
        }];
        // The deletion forces a rewrite, which must probe the missing link.
        let deleted = [Range::new(ikey(b"m", 9), ikey(b"p", 1), true, true)];
        let mut edit = VersionEdit::new();
        let result = env.builder().build(
            &inputs,
            &deleted,
            &[],
            1,
            0,
            &DependenceMap::new(),
            &mut edit,
        );

        assert!(matches!(result, Err(Error::Corruption(_))));
        assert!(edit.is_empty());
        // The partial output was removed.
        assert_eq!(env.sst_count(), files_before);
    }

    #[test]
    fn test_level0_groups_elide_per_file() {
        let env = TestEnv::new();
        let f1 = env.write_data_file(&entries_between(b'a', b'c', 5));
        let f2 = env.write_data_file(&entries_between(b'd', b'f', 6));
        let f3 = env.write_data_file(&entries_between(b'g', b'i', 7));

        let inputs = [CompactionInputFiles {
            level: 0,
            files: vec![f1.clone(), f2.clone(), f3.clone()],
        }];
        let deps = dependence_map(&[&f1, &f2, &f3]);
        let mut edit = VersionEdit::new();
        let output = env
            .builder()
            .build(&inputs, &[], &[], 3, 0, &deps, &mut edit)
            .expect("Build failed");

        // Three disjoint prefaces: every file moves, nothing is written.
        assert!(output.file_meta.is_none());
        assert_eq!(edit.deleted().len(), 3);
        assert_eq!(edit.added().len(), 3);
        assert!(edit.added().iter().all(|(level, _)| *level == 3));
    }

    #[test]
    fn test_space_limit_surfaces_after_write() {
        let env = TestEnv::new();
        let f1 = env.write_data_file(&entries_between(b'a', b'p', 5));
        let f2 = env.write_data_file(&entries_between(b'h', b'z', 3));

        let config = env.config.clone().max_allowed_space(1);
        let builder = MapBuilder::new(1, &config, &env.cache, &env.next_file_number);

        let inputs = [
            CompactionInputFiles {
                level: 1,
                files: vec![f1.clone()],
            },
            CompactionInputFiles {
                level: 2,
                files: vec![f2.clone()],
            },
        ];
        let deps = dependence_map(&[&f1, &f2]);
        let mut edit = VersionEdit::new();
        let result = builder.build(&inputs, &[], &[], 2, 0, &deps, &mut edit);

        assert!(matches!(result, Err(Error::SpaceLimit(_))));
        assert!(edit.is_empty());
    }
}
