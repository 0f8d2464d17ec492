//! The interval partition operator.
//!
//! Combines two sorted, non-overlapping range vectors into one by sweeping
//! their boundary events in order:
//!
//! ```text
//! a: [ -------- )      [ -------- ]
//! b:       ( -------------- ]
//! r: [ -- ]( -- )[ -- )[ -- ]( -- ]
//! ```
//!
//! `Merge` keeps every key covered by either side and concatenates
//! dependence lists where both are active. `Delete` subtracts the second
//! vector, whose intervals carry no dependence and act as masks.

use std::cmp::Ordering;

use super::range::{comp_include, is_empty_map_element, RangeWithDepend};
use crate::format::{InternalKey, InternalKeyComparator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionType {
    Merge,
    Delete,
}

/// Identity of the input interval an output boundary was cut from. An
/// output interval keeps `stable` only when both its boundaries come from
/// the same input interval.
type Source = Option<(u8, usize)>;

struct Sweep {
    icomp: InternalKeyComparator,
    output: Vec<RangeWithDepend>,
    source: Source,
}

impl Sweep {
    fn put_left(&mut self, key: &InternalKey, include: bool, source: Source) {
        debug_assert!(self.output.last().map_or(true, |back| {
            self.icomp.compare_key(&back.point[1], key) == Ordering::Less
                || !back.include[1]
                || !include
        }));
        let mut range = RangeWithDepend::default();
        range.point[0] = key.clone();
        range.include[0] = include;
        self.output.push(range);
        self.source = source;
    }

    fn put_right(&mut self, key: &InternalKey, include: bool, source: Source) {
        let back = self.output.last_mut().unwrap();
        if back.dependence.is_empty()
            || (self.icomp.compare_key(key, &back.point[0]) == Ordering::Equal
                && (!back.include[0] || !include))
        {
            self.output.pop();
            return;
        }
        back.point[1] = key.clone();
        back.include[1] = include;
        debug_assert!(
            self.icomp.compare_key(&back.point[0], &back.point[1]) != Ordering::Greater
        );
        if is_empty_map_element(back, &self.icomp) {
            self.output.pop();
            return;
        }
        if self.source.is_none() || source.is_none() || self.source != source {
            back.stable = false;
        }
    }

    fn put_depend(
        &mut self,
        partition_type: PartitionType,
        a: Option<&RangeWithDepend>,
        b: Option<&RangeWithDepend>,
    ) {
        let back = self.output.last_mut().unwrap();
        debug_assert!(a.is_some() || b.is_some());
        match partition_type {
            PartitionType::Merge => {
                if let Some(a) = a {
                    back.dependence = a.dependence.clone();
                    if let Some(b) = b {
                        back.stable = false;
                        back.dependence.extend(b.dependence.iter().cloned());
                    } else {
                        back.no_records = a.no_records;
                        back.stable = a.stable;
                    }
                } else {
                    let b = b.unwrap();
                    back.no_records = b.no_records;
                    back.stable = b.stable;
                    back.dependence = b.dependence.clone();
                }
                debug_assert!(!back.dependence.is_empty());
            }
            PartitionType::Delete => {
                if let Some(b) = b {
                    debug_assert!(b.dependence.is_empty());
                } else {
                    let a = a.unwrap();
                    back.no_records = a.no_records;
                    back.stable = a.stable;
                    back.dependence = a.dependence.clone();
                }
            }
        }
    }
}

/// Partitions two sorted non-overlapping range vectors. Both inputs must be
/// non-empty.
pub fn partition_ranges(
    ranges_a: &[RangeWithDepend],
    ranges_b: &[RangeWithDepend],
    icomp: &InternalKeyComparator,
    partition_type: PartitionType,
) -> Vec<RangeWithDepend> {
    assert!(!ranges_a.is_empty() && !ranges_b.is_empty());
    let mut sweep = Sweep {
        icomp: *icomp,
        output: Vec::new(),
        source: None,
    };
    // Cursor state per side: the range index and which of its two bounds
    // comes next (0 = lower, 1 = upper, i.e. currently inside the range).
    let (mut ai, mut bi) = (0usize, 0usize);
    let (mut ab, mut bb) = (0usize, 0usize);
    loop {
        let c: i32 = if ai < ranges_a.len() && bi < ranges_b.len() {
            let ord = icomp.compare_key(&ranges_a[ai].point[ab], &ranges_b[bi].point[bb]);
            match comp_include(ord, ab, ranges_a[ai].include[ab], bb, ranges_b[bi].include[bb]) {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            }
        } else if ai < ranges_a.len() {
            -1
        } else {
            1
        };
        let ac = (c <= 0) as usize;
        let bc = (c >= 0) as usize;
        match (ab, bb, ac, bc) {
            // out a, out b, enter a
            (0, 0, 1, 0) => {
                let a = &ranges_a[ai];
                sweep.put_left(&a.point[0], a.include[0], Some((0, ai)));
                sweep.put_depend(partition_type, Some(a), None);
            }
            // in a, out b, leave a
            (1, 0, 1, 0) => {
                let a = &ranges_a[ai];
                sweep.put_right(&a.point[1], a.include[1], Some((0, ai)));
            }
            // out a, out b, enter b
            (0, 0, 0, 1) => {
                let b = &ranges_b[bi];
                sweep.put_left(&b.point[0], b.include[0], Some((1, bi)));
                sweep.put_depend(partition_type, None, Some(b));
            }
            // out a, in b, leave b
            (0, 1, 0, 1) => {
                let b = &ranges_b[bi];
                sweep.put_right(&b.point[1], b.include[1], Some((1, bi)));
            }
            // in a, out b, begin b
            (1, 0, 0, 1) => {
                let b = &ranges_b[bi];
                sweep.put_right(&b.point[0], !b.include[0], None);
                sweep.put_left(&b.point[0], b.include[0], Some((1, bi)));
                sweep.put_depend(partition_type, Some(&ranges_a[ai]), Some(b));
            }
            // in a, in b, leave b
            (1, 1, 0, 1) => {
                let b = &ranges_b[bi];
                sweep.put_right(&b.point[1], b.include[1], Some((1, bi)));
                sweep.put_left(&b.point[1], !b.include[1], None);
                sweep.put_depend(partition_type, Some(&ranges_a[ai]), None);
            }
            // out a, in b, begin a
            (0, 1, 1, 0) => {
                let a = &ranges_a[ai];
                sweep.put_right(&a.point[0], !a.include[0], None);
                sweep.put_left(&a.point[0], a.include[0], Some((0, ai)));
                sweep.put_depend(partition_type, Some(a), Some(&ranges_b[bi]));
            }
            // in a, in b, leave a
            (1, 1, 1, 0) => {
                let a = &ranges_a[ai];
                sweep.put_right(&a.point[1], a.include[1], Some((0, ai)));
                sweep.put_left(&a.point[1], !a.include[1], None);
                sweep.put_depend(partition_type, None, Some(&ranges_b[bi]));
            }
            // out a, out b, enter both
            (0, 0, 1, 1) => {
                let a = &ranges_a[ai];
                sweep.put_left(&a.point[0], a.include[0], None);
                sweep.put_depend(partition_type, Some(a), Some(&ranges_b[bi]));
            }
            // in a, in b, leave both
            (1, 1, 1, 1) => {
                let a = &ranges_a[ai];
                sweep.put_right(&a.point[1], a.include[1], None);
            }
            _ => unreachable!("cursor state ({ab}, {bb}, {ac}, {bc})"),
        }
        ai += (ab + ac) / 2;
        bi += (bb + bc) / 2;
        ab = (ab + ac) % 2;
        bb = (bb + bc) % 2;
        if ai == ranges_a.len() && bi == ranges_b.len() {
            break;
        }
    }
    sweep.output
}
