//! Streams a finished partition as encoded map entries.
//!
//! Adjacent intervals sharing an endpoint are coalesced on the way out, and
//! every unstable interval is probed against its link targets to estimate
//! per-target byte contributions and recompute the `no_records` hint.

use std::cmp::Ordering;
use std::collections::HashSet;

use itertools::Itertools as _;

use super::element::{LinkTarget, MapSstElement};
use super::range::RangeWithDepend;
use crate::error::{Error, Result};
use crate::format::InternalKeyComparator;
use crate::table::iterator_cache::IteratorCache;
use crate::table::InternalIterator;

/// Order-preserving merge of a successor's link targets, deduplicating by
/// file number.
fn merge_depend(link: &mut Vec<LinkTarget>, other: &[LinkTarget]) {
    let mut insert_pos = link.len();
    for target in other.iter().rev() {
        match link[..insert_pos]
            .iter()
            .position(|l| l.file_number == target.file_number)
        {
            None => link.insert(insert_pos, target.clone()),
            Some(pos) => insert_pos = pos,
        }
    }
}

/// Probes every link target of an interval, setting its advisory size to
/// the approximate byte span of surviving records. Returns whether the
/// interval ended up with no records at all.
fn estimate_link_sizes(
    iterator_cache: &mut IteratorCache,
    icomp: &InternalKeyComparator,
    start: &[u8],
    end: &[u8],
    include_start: bool,
    include_end: bool,
    link: &mut [LinkTarget],
    dependence_build: &mut HashSet<u64>,
) -> Result<bool> {
    let mut no_records = true;
    for target in link.iter_mut() {
        dependence_build.insert(target.file_number);
        let entry = iterator_cache.get(target.file_number)?;
        let iter = &mut entry.iter;

        target.size = 0;
        iter.seek(start);
        if !iter.valid() {
            iter.status()?;
            continue;
        }
        if !include_start && icomp.compare(iter.key(), start) == Ordering::Equal {
            iter.next();
            if !iter.valid() {
                iter.status()?;
                continue;
            }
        }
        let first = iter.key().to_vec();

        iter.seek_for_prev(end);
        if !iter.valid() {
            iter.status()?;
            continue;
        }
        if !include_end && icomp.compare(iter.key(), end) == Ordering::Equal {
            iter.prev();
            if !iter.valid() {
                iter.status()?;
                continue;
            }
        }
        let last = iter.key().to_vec();

        if icomp.compare(&first, &last) != Ordering::Greater {
            let start_offset = entry.table.approximate_offset_of(&first);
            let end_offset = entry.table.approximate_offset_of(&last);
            target.size = end_offset - start_offset;
            no_records = false;
        }
    }
    Ok(no_records)
}

/// Iterates the final range vector in order, producing the `(key, value)`
/// entries of the new map table.
pub struct MapElementEmitter<'a, 'b> {
    ranges: &'a [RangeWithDepend],
    iterator_cache: &'a mut IteratorCache<'b>,
    icomp: InternalKeyComparator,
    where_: usize,
    element: MapSstElement,
    buffer: Vec<u8>,
    dependence_build: HashSet<u64>,
    read_amp: usize,
    status: Result<()>,
    valid: bool,
}

impl<'a, 'b> MapElementEmitter<'a, 'b> {
    pub fn new(ranges: &'a [RangeWithDepend], iterator_cache: &'a mut IteratorCache<'b>) -> Self {
        Self {
            ranges,
            iterator_cache,
            icomp: InternalKeyComparator,
            where_: 0,
            element: MapSstElement::default(),
            buffer: Vec::new(),
            dependence_build: HashSet::new(),
            read_amp: 0,
            status: Ok(()),
            valid: false,
        }
    }

    pub fn seek_to_first(&mut self) {
        self.where_ = 0;
        self.prepare_next();
    }

    pub fn next(&mut self) {
        self.prepare_next();
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn key(&self) -> &[u8] {
        &self.element.largest_key
    }

    pub fn value(&self) -> &[u8] {
        &self.buffer
    }

    pub fn status(&self) -> Result<()> {
        self.status.clone()
    }

    /// Every file number any emitted interval links to, sorted.
    pub fn dependence(&self) -> Vec<u64> {
        self.dependence_build.iter().copied().sorted().collect()
    }

    pub fn read_amp(&self) -> usize {
        self.read_amp
    }

    fn fail(&mut self, e: Error) {
        self.status = Err(e);
        self.valid = false;
    }

    fn prepare_next(&mut self) {
        if self.where_ >= self.ranges.len() {
            self.valid = false;
            return;
        }
        let range = &self.ranges[self.where_];
        self.element.smallest_key = range.point[0].encode().to_vec();
        self.element.largest_key = range.point[1].encode().to_vec();
        debug_assert!(
            self.icomp
                .compare(&self.element.smallest_key, &self.element.largest_key)
                != Ordering::Greater
        );
        self.element.include_smallest = range.include[0];
        self.element.include_largest = range.include[1];
        self.element.no_records = range.no_records;
        self.element.link = range.dependence.clone();
        let mut stable = range.stable;
        self.where_ += 1;

        // A successor opening exactly at our start point extends us; it can
        // only follow a degenerate single-point interval.
        if let Some(next) = self.ranges.get(self.where_) {
            if self
                .icomp
                .compare(&self.element.smallest_key, next.point[0].encode())
                == Ordering::Equal
            {
                debug_assert!(
                    self.element.include_smallest
                        && self.element.include_largest
                        && !next.include[0]
                );
                debug_assert!(
                    self.icomp
                        .compare(&self.element.smallest_key, &self.element.largest_key)
                        == Ordering::Equal
                );
                self.element.largest_key = next.point[1].encode().to_vec();
                self.element.include_largest = next.include[1];
                merge_depend(&mut self.element.link, &next.dependence);
                stable = false;
                self.where_ += 1;
            }
        }
        // A degenerate single-point successor sitting on our open end point
        // closes it.
        if let Some(next) = self.ranges.get(self.where_) {
            if self
                .icomp
                .compare(&self.element.largest_key, next.point[1].encode())
                == Ordering::Equal
            {
                debug_assert!(!self.element.include_largest && next.include[0] && next.include[1]);
                debug_assert!(
                    self.icomp.compare_key(&next.point[0], &next.point[1]) == Ordering::Equal
                );
                self.element.include_largest = true;
                merge_depend(&mut self.element.link, &next.dependence);
                stable = false;
                self.where_ += 1;
            }
        }

        if stable {
            for target in &self.element.link {
                self.dependence_build.insert(target.file_number);
            }
        } else {
            let start = self.element.smallest_key.clone();
            let end = self.element.largest_key.clone();
            match estimate_link_sizes(
                self.iterator_cache,
                &self.icomp,
                &start,
                &end,
                self.element.include_smallest,
                self.element.include_largest,
                &mut self.element.link,
                &mut self.dependence_build,
            ) {
                Ok(no_records) => self.element.no_records = no_records,
                Err(e) => {
                    self.fail(e);
                    return;
                }
            }
        }

        self.read_amp = self.read_amp.max(self.element.link.len());
        self.element.encode_value(&mut self.buffer);
        self.valid = true;
    }
}
