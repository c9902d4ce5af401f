use std::collections::HashSet;
use std::io::{Read, Write};

use super::{len_u32, Decode, Encode, FieldReader, FieldWriter, Validate};
use crate::error::{Error, ErrorContext, Result};

pub const INDEX_HEADER_SIZE: usize = 16;
const INDEX_ENTRY_SIZE: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub file_id: u64,
    /// absolute offset of the file entry in the archive
    pub offset: u64,
}

/// file id -> entry offset table
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileIndex {
    pub first_entry_offset: u64,
    pub entries: Vec<IndexEntry>,
}

impl FileIndex {
    pub fn find(&self, file_id: u64) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| e.file_id == file_id)
    }
}

impl Validate for FileIndex {
    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.entries {
            if entry.file_id == 0 {
                return Err(Error::validation(
                    "index entry without a file id",
                    ErrorContext::new("FileID", 0, "non-zero id"),
                ));
            }
            if !seen.insert(entry.file_id) {
                return Err(Error::validation(
                    "file id indexed twice",
                    ErrorContext::new("FileID", entry.file_id, "unique id"),
                ));
            }
        }
        Ok(())
    }
}

impl Encode for FileIndex {
    fn encoded_len(&self) -> usize {
        INDEX_HEADER_SIZE + self.entries.len() * INDEX_ENTRY_SIZE
    }

    fn encode_to<W: Write>(&self, w: &mut FieldWriter<W>) -> Result<()> {
        w.u32("EntryCount", len_u32("EntryCount", self.entries.len())?)?;
        w.u32("Reserved", 0)?;
        w.u64("FirstEntryOffset", self.first_entry_offset)?;
        for entry in &self.entries {
            w.u64("FileID", entry.file_id)?;
            w.u64("Offset", entry.offset)?;
        }
        Ok(())
    }
}

impl Decode for FileIndex {
    fn decode_from<R: Read>(r: &mut FieldReader<R>) -> Result<Self> {
        let count = r.u32("EntryCount")?;
        let reserved = r.u32("Reserved")?;
        if reserved != 0 {
            return Err(Error::corruption(
                "reserved field is not zero",
                ErrorContext::new("Reserved", reserved, "0"),
            ));
        }
        let first_entry_offset = r.u64("FirstEntryOffset")?;
        let mut entries = Vec::with_capacity((count as usize).min(4096));
        for _ in 0..count {
            entries.push(IndexEntry {
                file_id: r.u64("FileID")?,
                offset: r.u64("Offset")?,
            });
        }
        Ok(Self {
            first_entry_offset,
            entries,
        })
    }
}
