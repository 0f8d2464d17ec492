use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::meta::FileMetaData;
use crate::error::Result;

const ADD_FILE: u8 = 0x01;
const DELETE_FILE: u8 = 0x02;

/// Files created by the caller ahead of a build are registered at this
/// sentinel level; the caller's bookkeeping assigns them a real level when
/// the edit commits.
pub const UNOWNED_LEVEL: i32 = -1;

/// A batch of file additions and deletions produced by one build. The
/// surrounding version store owns commit atomicity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionEdit {
    added: Vec<(i32, FileMetaData)>,
    deleted: Vec<(i32, u64)>,
}

impl VersionEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, level: i32, f: &FileMetaData) {
        self.added.push((level, f.clone()));
    }

    pub fn delete_file(&mut self, level: i32, file_number: u64) {
        self.deleted.push((level, file_number));
    }

    pub fn added(&self) -> &[(i32, FileMetaData)] {
        &self.added
    }

    pub fn deleted(&self) -> &[(i32, u64)] {
        &self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        for (level, f) in &self.added {
            buf.write_u8(ADD_FILE).unwrap();
            buf.write_i32::<BigEndian>(*level).unwrap();
            f.encode_into(&mut buf);
        }

        for (level, file_number) in &self.deleted {
            buf.write_u8(DELETE_FILE).unwrap();
            buf.write_i32::<BigEndian>(*level).unwrap();
            buf.write_u64::<BigEndian>(*file_number).unwrap();
        }

        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(buf);
        let mut edit = VersionEdit::new();

        while (cursor.position() as usize) < buf.len() {
            let record_type = cursor.read_u8()?;
            match record_type {
                ADD_FILE => {
                    let level = cursor.read_i32::<BigEndian>()?;
                    let f = FileMetaData::decode_from(&mut cursor)?;
                    edit.added.push((level, f));
                }

                DELETE_FILE => {
                    let level = cursor.read_i32::<BigEndian>()?;
                    let file_number = cursor.read_u64::<BigEndian>()?;
                    edit.deleted.push((level, file_number));
                }

                _ => {
                    return Err(crate::corruption!(
                        "invalid version edit record type: {record_type}"
                    ))
                }
            }
        }

        Ok(edit)
    }
}
