//! The on-disk shape of one map table entry.
//!
//! A map entry describes a half-open/closed interval of the key space and
//! the files contributing records inside it. The entry's table key is the
//! encoded `largest_key`, which makes `lower_bound` seeks land on the first
//! interval that may contain a search key. The value packs the rest:
//!
//! ```text
//! varint(flags) || varint(link_count) || len_prefixed(smallest_key)
//!               || link_count x varint(file_number)
//! ```

use crate::error::Result;
use crate::format::{
    get_length_prefixed_slice, get_varint64, put_length_prefixed_slice, put_varint64,
};

pub const INCLUDE_SMALLEST_BIT: u64 = 0;
pub const INCLUDE_LARGEST_BIT: u64 = 1;
pub const NO_RECORDS_BIT: u64 = 2;
/// Reserved for intervals unbounded below. Decoding rejects it.
pub const NO_SMALLEST_BIT: u64 = 3;

/// A file contributing records to an interval. `size` is an advisory byte
/// estimate used for read-amplification heuristics; it is never serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTarget {
    pub file_number: u64,
    pub size: u64,
}

impl LinkTarget {
    pub fn new(file_number: u64, size: u64) -> Self {
        Self { file_number, size }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapSstElement {
    pub smallest_key: Vec<u8>,
    pub largest_key: Vec<u8>,
    pub include_smallest: bool,
    pub include_largest: bool,
    /// Hint that no live records fall inside the interval. Consumers may
    /// skip heavy work but must not assume absolute emptiness.
    pub no_records: bool,
    pub link: Vec<LinkTarget>,
}

impl MapSstElement {
    /// The entry's table key.
    pub fn key(&self) -> &[u8] {
        &self.largest_key
    }

    pub fn encode_value(&self, buf: &mut Vec<u8>) {
        buf.clear();
        let mut flags = 0u64;
        if self.include_smallest {
            flags |= 1 << INCLUDE_SMALLEST_BIT;
        }
        if self.include_largest {
            flags |= 1 << INCLUDE_LARGEST_BIT;
        }
        if self.no_records {
            flags |= 1 << NO_RECORDS_BIT;
        }
        put_varint64(buf, flags);
        put_varint64(buf, self.link.len() as u64);
        put_length_prefixed_slice(buf, &self.smallest_key);
        for target in &self.link {
            put_varint64(buf, target.file_number);
        }
    }

    pub fn decode(key: &[u8], value: &[u8]) -> Result<Self> {
        let mut input = value;
        let err = || crate::corruption!("map sst invalid link value");

        let flags = get_varint64(&mut input).ok_or_else(err)?;
        let link_count = get_varint64(&mut input).ok_or_else(err)?;
        if (flags >> NO_SMALLEST_BIT) & 1 != 0 {
            return Err(err());
        }
        let smallest_key = get_length_prefixed_slice(&mut input).ok_or_else(err)?;

        let mut link = Vec::with_capacity(link_count as usize);
        for _ in 0..link_count {
            let file_number = get_varint64(&mut input).ok_or_else(err)?;
            link.push(LinkTarget::new(file_number, 0));
        }

        Ok(MapSstElement {
            smallest_key: smallest_key.to_vec(),
            largest_key: key.to_vec(),
            include_smallest: (flags >> INCLUDE_SMALLEST_BIT) & 1 != 0,
            include_largest: (flags >> INCLUDE_LARGEST_BIT) & 1 != 0,
            no_records: (flags >> NO_RECORDS_BIT) & 1 != 0,
            link,
        })
    }
}
