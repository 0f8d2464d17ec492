//! The in-memory partition element and its boundary ordering.

use std::cmp::Ordering;

use super::element::{LinkTarget, MapSstElement};
use crate::format::{
    extract_sequence, extract_user_key, InternalKey, InternalKeyComparator, Range, ValueType,
    MAX_SEQUENCE_NUMBER,
};
use crate::manifest::meta::FileMetaData;

/// One interval of the partition under construction: two boundary keys with
/// inclusion flags and the files contributing records inside.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeWithDepend {
    pub point: [InternalKey; 2],
    pub include: [bool; 2],
    /// No live records are known to fall inside the interval.
    pub no_records: bool,
    /// The interval was lifted verbatim from an input map entry and has not
    /// been modified since.
    pub stable: bool,
    pub dependence: Vec<LinkTarget>,
}

impl RangeWithDepend {
    pub fn from_file(f: &FileMetaData) -> Self {
        debug_assert!(f.smallest.sequence() != MAX_SEQUENCE_NUMBER);
        let point_1 = if f.largest.sequence() == MAX_SEQUENCE_NUMBER {
            InternalKey::new(f.largest.user_key(), MAX_SEQUENCE_NUMBER, ValueType::Deletion)
        } else {
            f.largest.clone()
        };
        Self {
            point: [f.smallest.clone(), point_1],
            include: [true, true],
            no_records: false,
            stable: false,
            dependence: vec![LinkTarget::new(f.file_number, 0)],
        }
    }

    pub fn from_element(element: &MapSstElement) -> Self {
        Self {
            point: [
                InternalKey::decode_from(&element.smallest_key),
                InternalKey::decode_from(&element.largest_key),
            ],
            include: [element.include_smallest, element.include_largest],
            no_records: element.no_records,
            stable: true,
            dependence: element.link.clone(),
        }
    }

    pub fn from_deletion(range: &Range) -> Self {
        let mut out = RangeWithDepend::default();
        if extract_sequence(&range.start) == MAX_SEQUENCE_NUMBER {
            out.point[0] = InternalKey::new(
                extract_user_key(&range.start),
                MAX_SEQUENCE_NUMBER,
                ValueType::Deletion,
            );
            out.include[0] = false;
        } else {
            out.point[0] = InternalKey::decode_from(&range.start);
            out.include[0] = range.include_start;
        }
        if extract_sequence(&range.limit) == MAX_SEQUENCE_NUMBER {
            out.point[1] = InternalKey::new(
                extract_user_key(&range.limit),
                MAX_SEQUENCE_NUMBER,
                ValueType::Deletion,
            );
            out.include[1] = true;
        } else {
            out.point[1] = InternalKey::decode_from(&range.limit);
            out.include[1] = range.include_limit;
        }
        out
    }
}

/// A degenerate single-point interval synthesized around a max-sequence
/// upper bound. It indexes no reachable record and is dropped on emission.
pub fn is_empty_map_element(range: &RangeWithDepend, icomp: &InternalKeyComparator) -> bool {
    if range.dependence.len() != 1 {
        return false;
    }
    if icomp.user_compare(range.point[0].user_key(), range.point[1].user_key()) != Ordering::Equal {
        return false;
    }
    range.point[1].sequence() == MAX_SEQUENCE_NUMBER
}

/// Tie-break for boundary events at the same key. `side` 0 is a lower
/// bound, 1 an upper bound. At a shared coordinate a closing boundary
/// precedes an opening one iff the closer is exclusive and the opener
/// inclusive, and symmetrically; like-for-like boundaries are equal.
pub fn comp_include(
    c: Ordering,
    a_side: usize,
    a_include: bool,
    b_side: usize,
    b_include: bool,
) -> Ordering {
    if c != Ordering::Equal {
        return c;
    }
    match (a_side, a_include, b_side, b_include) {
        // a: [   [   (   )   )   [
        // b: (   )   ]   ]   (   ]
        (0, true, 0, false)
        | (0, true, 1, false)
        | (0, false, 1, true)
        | (1, false, 1, true)
        | (1, false, 0, false)
        | (0, true, 1, true) => Ordering::Less,
        // a: (   )   ]   ]   (   ]
        // b: [   [   (   )   )   [
        (0, false, 0, true)
        | (1, false, 0, true)
        | (1, true, 0, false)
        | (1, true, 1, false)
        | (0, false, 1, false)
        | (1, true, 0, true) => Ordering::Greater,
        // a: [   ]   (   )
        // b: [   ]   (   )
        _ => Ordering::Equal,
    }
}
