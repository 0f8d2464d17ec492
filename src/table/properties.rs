use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::manifest::meta::FilePurpose;

/// File-level properties written behind the index region of every table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableProperties {
    pub purpose: FilePurpose,
    pub num_entries: u64,
    /// For map tables: every file number any interval links to, sorted.
    pub dependence: Vec<u64>,
    /// For map tables: the maximum link count of any single interval.
    pub read_amp: u32,
    pub creation_time: u64,
}

impl Default for TableProperties {
    fn default() -> Self {
        Self {
            purpose: FilePurpose::Data,
            num_entries: 0,
            dependence: Vec::new(),
            read_amp: 0,
            creation_time: 0,
        }
    }
}

impl TableProperties {
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.write_u8(self.purpose as u8).unwrap();
        buf.write_u64::<BigEndian>(self.num_entries).unwrap();

        buf.write_u32::<BigEndian>(self.dependence.len() as u32)
            .unwrap();
        for number in &self.dependence {
            buf.write_u64::<BigEndian>(*number).unwrap();
        }

        buf.write_u32::<BigEndian>(self.read_amp).unwrap();
        buf.write_u64::<BigEndian>(self.creation_time).unwrap();
    }

    pub fn decode_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let purpose = FilePurpose::from_u8(cursor.read_u8()?)
            .ok_or_else(|| crate::corruption!("invalid table purpose"))?;
        let num_entries = cursor.read_u64::<BigEndian>()?;

        let dependence_count = cursor.read_u32::<BigEndian>()? as usize;
        let mut dependence = Vec::with_capacity(dependence_count);
        for _ in 0..dependence_count {
            dependence.push(cursor.read_u64::<BigEndian>()?);
        }

        let read_amp = cursor.read_u32::<BigEndian>()?;
        let creation_time = cursor.read_u64::<BigEndian>()?;

        Ok(TableProperties {
            purpose,
            num_entries,
            dependence,
            read_amp,
            creation_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_roundtrip() {
        let original = TableProperties {
            purpose: FilePurpose::Map,
            num_entries: 12,
            dependence: vec![3, 5, 9],
            read_amp: 2,
            creation_time: 1700000000,
        };

        let mut buf = Vec::new();
        original.encode_into(&mut buf);

        let mut cursor = Cursor::new(buf.as_slice());
        let decoded = TableProperties::decode_from(&mut cursor).expect("Failed to decode");

        assert_eq!(decoded, original);
    }
}
