use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::format::{InternalKey, InternalKeyComparator, SequenceNumber, MAX_SEQUENCE_NUMBER};

/// What a table file stores: records, or the interval index over other
/// files' records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FilePurpose {
    Data = 0,
    Map = 1,
}

impl FilePurpose {
    pub fn from_u8(v: u8) -> Option<FilePurpose> {
        match v {
            0 => Some(FilePurpose::Data),
            1 => Some(FilePurpose::Map),
            _ => None,
        }
    }
}

/// Resolves file numbers to metadata for the duration of one operation.
pub type DependenceMap = HashMap<u64, Arc<FileMetaData>>;

#[derive(Debug, Clone, PartialEq)]
pub struct FileMetaData {
    pub file_number: u64,
    pub path_id: u32,
    pub file_size: u64,
    pub smallest: InternalKey,
    pub largest: InternalKey,
    pub smallest_seqno: SequenceNumber,
    pub largest_seqno: SequenceNumber,
    pub purpose: FilePurpose,
    /// Link targets declared inside a map file, sorted by file number.
    /// Empty for data files.
    pub dependence: Vec<u64>,
    /// The maximum number of link targets any single interval references.
    pub read_amp: u32,
    pub creation_time: u64,
}

impl FileMetaData {
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.write_u64::<BigEndian>(self.file_number).unwrap();
        buf.write_u32::<BigEndian>(self.path_id).unwrap();
        buf.write_u64::<BigEndian>(self.file_size).unwrap();

        let smallest = self.smallest.encode();
        buf.write_u32::<BigEndian>(smallest.len() as u32).unwrap();
        buf.extend_from_slice(smallest);

        let largest = self.largest.encode();
        buf.write_u32::<BigEndian>(largest.len() as u32).unwrap();
        buf.extend_from_slice(largest);

        buf.write_u64::<BigEndian>(self.smallest_seqno).unwrap();
        buf.write_u64::<BigEndian>(self.largest_seqno).unwrap();
        buf.write_u8(self.purpose as u8).unwrap();

        buf.write_u32::<BigEndian>(self.dependence.len() as u32)
            .unwrap();
        for number in &self.dependence {
            buf.write_u64::<BigEndian>(*number).unwrap();
        }

        buf.write_u32::<BigEndian>(self.read_amp).unwrap();
        buf.write_u64::<BigEndian>(self.creation_time).unwrap();
    }

    pub fn decode_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let file_number = cursor.read_u64::<BigEndian>()?;
        let path_id = cursor.read_u32::<BigEndian>()?;
        let file_size = cursor.read_u64::<BigEndian>()?;

        let smallest_len = cursor.read_u32::<BigEndian>()? as usize;
        let mut smallest = vec![0u8; smallest_len];
        cursor.read_exact(&mut smallest)?;

        let largest_len = cursor.read_u32::<BigEndian>()? as usize;
        let mut largest = vec![0u8; largest_len];
        cursor.read_exact(&mut largest)?;

        let smallest_seqno = cursor.read_u64::<BigEndian>()?;
        let largest_seqno = cursor.read_u64::<BigEndian>()?;
        let purpose = FilePurpose::from_u8(cursor.read_u8()?)
            .ok_or_else(|| crate::corruption!("invalid file purpose"))?;

        let dependence_count = cursor.read_u32::<BigEndian>()? as usize;
        let mut dependence = Vec::with_capacity(dependence_count);
        for _ in 0..dependence_count {
            dependence.push(cursor.read_u64::<BigEndian>()?);
        }

        let read_amp = cursor.read_u32::<BigEndian>()?;
        let creation_time = cursor.read_u64::<BigEndian>()?;

        Ok(FileMetaData {
            file_number,
            path_id,
            file_size,
            smallest: InternalKey::decode_from(&smallest),
            largest: InternalKey::decode_from(&largest),
            smallest_seqno,
            largest_seqno,
            purpose,
            dependence,
            read_amp,
            creation_time,
        })
    }
}

/// Accumulates the union of input file bounds while loading ranges.
#[derive(Debug)]
pub struct BoundBuilder {
    icomp: InternalKeyComparator,
    pub smallest: InternalKey,
    pub largest: InternalKey,
    pub smallest_seqno: SequenceNumber,
    pub largest_seqno: SequenceNumber,
    pub creation_time: u64,
}

impl BoundBuilder {
    pub fn new(icomp: InternalKeyComparator) -> Self {
        Self {
            icomp,
            smallest: InternalKey::default(),
            largest: InternalKey::default(),
            smallest_seqno: MAX_SEQUENCE_NUMBER,
            largest_seqno: 0,
            creation_time: 0,
        }
    }

    pub fn update(&mut self, f: &FileMetaData) {
        if self.smallest.is_unset()
            || self.icomp.compare_key(&f.smallest, &self.smallest) == std::cmp::Ordering::Less
        {
            self.smallest = f.smallest.clone();
        }
        if self.largest.is_unset()
            || self.icomp.compare_key(&f.largest, &self.largest) == std::cmp::Ordering::Greater
        {
            self.largest = f.largest.clone();
        }
        self.smallest_seqno = self.smallest_seqno.min(f.smallest_seqno);
        self.largest_seqno = self.largest_seqno.max(f.largest_seqno);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ValueType;

    fn create_test_meta() -> FileMetaData {
        FileMetaData {
            file_number: 42,
            path_id: 0,
            file_size: 4096,
            smallest: InternalKey::new(b"aardvark", 11, ValueType::Value),
            largest: InternalKey::new(b"zebra", 3, ValueType::Value),
            smallest_seqno: 3,
            largest_seqno: 11,
            purpose: FilePurpose::Data,
            dependence: vec![],
            read_amp: 0,
            creation_time: 1700000000,
        }
    }

    #[test]
    fn test_meta_roundtrip() {
        let original = create_test_meta();
        let mut buf = Vec::new();
        original.encode_into(&mut buf);

        let mut cursor = Cursor::new(buf.as_slice());
        let decoded = FileMetaData::decode_from(&mut cursor).expect("Failed to decode");

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_map_meta_roundtrip() {
        let mut original = create_test_meta();
        original.purpose = FilePurpose::Map;
        original.dependence = vec![7, 12, 40];
        original.read_amp = 2;

        let mut buf = Vec::new();
        original.encode_into(&mut buf);

        let mut cursor = Cursor::new(buf.as_slice());
        let decoded = FileMetaData::decode_from(&mut cursor).expect("Failed to decode");

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_bound_builder_union() {
        let mut bounds = BoundBuilder::new(InternalKeyComparator);

        let mut left = create_test_meta();
        left.smallest = InternalKey::new(b"bat", 5, ValueType::Value);
        left.largest = InternalKey::new(b"cat", 5, ValueType::Value);
        left.smallest_seqno = 5;
        left.largest_seqno = 5;

        let mut right = create_test_meta();
        right.smallest = InternalKey::new(b"ant", 9, ValueType::Value);
        right.largest = InternalKey::new(b"dog", 2, ValueType::Value);
        right.smallest_seqno = 2;
        right.largest_seqno = 9;

        bounds.update(&left);
        bounds.update(&right);

        assert_eq!(bounds.smallest.user_key(), b"ant");
        assert_eq!(bounds.largest.user_key(), b"dog");
        assert_eq!(bounds.smallest_seqno, 2);
        assert_eq!(bounds.largest_seqno, 9);
    }
}
