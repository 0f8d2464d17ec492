use crate::error::Result;
use crate::format::{
    extract_footer, extract_user_key, InternalKey, SequenceNumber, ValueType, VALUE_TYPE_FOR_SEEK,
};

/// Outcome of a point lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetState {
    NotFound,
    Found(Vec<u8>),
    Deleted,
}

/// Carries one point lookup through the table stack. Tracks the snapshot
/// the caller reads at and the sequence/type floor raised while descending
/// through map intervals: records whose footer falls below the floor are
/// invisible to the current branch of the recursion.
pub struct GetContext {
    user_key: Vec<u8>,
    snapshot: SequenceNumber,
    min_seq_and_type: u64,
    key_may_exist: bool,
    state: GetState,
}

impl GetContext {
    pub fn new(user_key: &[u8], snapshot: SequenceNumber) -> Self {
        Self {
            user_key: user_key.to_vec(),
            snapshot,
            min_seq_and_type: 0,
            key_may_exist: false,
            state: GetState::NotFound,
        }
    }

    /// The internal key to seek with: positioned just before every record
    /// of the user key visible at the snapshot.
    pub fn lookup_key(&self) -> Vec<u8> {
        InternalKey::new(&self.user_key, self.snapshot, VALUE_TYPE_FOR_SEEK)
            .encode()
            .to_vec()
    }

    pub fn user_key(&self) -> &[u8] {
        &self.user_key
    }

    pub fn snapshot(&self) -> SequenceNumber {
        self.snapshot
    }

    pub fn min_seq_and_type(&self) -> u64 {
        self.min_seq_and_type
    }

    pub fn set_min_seq_and_type(&mut self, floor: u64) {
        self.min_seq_and_type = floor;
    }

    /// Offers one record to the lookup. Returns whether the caller should
    /// keep scanning the current table.
    pub fn save_value(&mut self, ikey: &[u8], value: &[u8]) -> Result<bool> {
        if extract_user_key(ikey) != self.user_key.as_slice() {
            return Ok(false);
        }
        let footer = extract_footer(ikey);
        if footer < self.min_seq_and_type {
            // Entries of one user key iterate newest first, so everything
            // after this one is below the floor too.
            return Ok(false);
        }
        match ValueType::from_u8((footer & 0xff) as u8) {
            Some(ValueType::Value) => {
                self.state = GetState::Found(value.to_vec());
                Ok(false)
            }
            Some(ValueType::Deletion) => {
                self.state = GetState::Deleted;
                Ok(false)
            }
            None => Err(crate::corruption!(
                "unknown value type {}",
                footer & 0xff
            )),
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self.state, GetState::NotFound)
    }

    pub fn state(&self) -> &GetState {
        &self.state
    }

    /// The found value, if the lookup landed on a live record.
    pub fn value(&self) -> Option<&[u8]> {
        match &self.state {
            GetState::Found(value) => Some(value),
            _ => None,
        }
    }

    /// Set when a cache-only read could not rule the key out.
    pub fn mark_key_may_exist(&mut self) {
        self.key_may_exist = true;
    }

    pub fn key_may_exist(&self) -> bool {
        self.key_may_exist
    }
}
