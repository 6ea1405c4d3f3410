//! Per-block string table
//!
//! Maps each distinct string to a dense id in first-seen order. Id 0 is
//! reserved by the format and always serialized as the empty string, so
//! [`StringTable::add`] never returns it (an actual empty string gets an id
//! of its own).

use ahash::AHashMap;
use prost::encoding::encoded_len_varint;

#[derive(Debug, Default, Clone)]
pub struct StringTable {
    ids: AHashMap<String, u32>,
    size: usize,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `s`, adding it if it is not yet in the table
    pub fn add(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.ids.get(s) {
            return id;
        }
        let id = self.ids.len() as u32 + 1;
        self.ids.insert(s.to_owned(), id);
        // field tag, length prefix, bytes
        self.size += 1 + encoded_len_varint(s.len() as u64) + s.len();
        id
    }

    /// Number of strings added, not counting the reserved entry
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Approximate encoded size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.size = 0;
    }

    /// All entries in id order, starting with the reserved empty string
    pub fn to_vec(&self) -> Vec<Vec<u8>> {
        let mut entries = vec![Vec::new(); self.ids.len() + 1];
        for (s, &id) in &self.ids {
            entries[id as usize] = s.as_bytes().to_vec();
        }
        entries
    }
}
