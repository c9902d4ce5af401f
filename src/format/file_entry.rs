use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::{Read, Write};

use super::{
    into_corruption, len_u16, len_u32, Decode, Encode, FieldReader, FieldWriter, HashEntry,
    OptionalDataEntry, OptionalDataType, PathEntry, Validate,
};
use crate::error::{Error, ErrorContext, Result};
use crate::tags::{TagOwner, TagStore};

/// size of the fixed part of an encoded file entry
pub const FILE_ENTRY_FIXED_SIZE: usize = 64;

pub const FILE_TYPE_REGULAR: u16 = 0;
/// types at or above this value mark special metadata files
pub const FILE_TYPE_SPECIAL_MIN: u16 = 65000;
/// special file holding the serialized path metadata entries
pub const FILE_TYPE_PATH_METADATA: u16 = 65001;

/// one logical file, reachable through one or more paths
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FileEntry {
    pub file_id: u64,
    pub original_size: u64,
    pub stored_size: u64,
    pub raw_checksum: u32,
    pub stored_checksum: u32,
    pub file_version: u32,
    pub metadata_version: u32,
    pub file_type: u16,
    pub compression_type: u8,
    pub compression_level: u8,
    pub encryption_type: u8,
    pub paths: Vec<PathEntry>,
    pub hashes: Vec<HashEntry>,
    pub optional_data: Vec<OptionalDataEntry>,
    pub tags: TagStore,
    /// package path -> path metadata key; lookup only, never persisted
    pub path_metadata_links: BTreeMap<String, String>,
}

impl FileEntry {
    pub fn new(file_id: u64) -> Self {
        Self {
            file_id,
            file_version: 1,
            metadata_version: 1,
            ..Self::default()
        }
    }

    /// add a path, normalizing it; adding an existing path is a no-op
    pub fn add_path(&mut self, raw: &str) -> Result<&PathEntry> {
        let entry = PathEntry::new(raw)?;
        let idx = match self.paths.iter().position(|p| *p == entry) {
            Some(idx) => idx,
            None => {
                self.paths.push(entry);
                self.paths.len() - 1
            }
        };
        Ok(&self.paths[idx])
    }

    pub fn has_path(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p.path == path)
    }

    pub fn primary_path(&self) -> Option<&str> {
        self.paths.first().map(|p| p.as_str())
    }

    pub fn is_special(&self) -> bool {
        self.file_type >= FILE_TYPE_SPECIAL_MIN
    }

    pub fn optional(&self, data_type: OptionalDataType) -> Option<&OptionalDataEntry> {
        self.optional_data.iter().find(|o| o.data_type == data_type)
    }

    /// replace the blob of `data_type`, or append one
    pub fn set_optional(&mut self, data_type: OptionalDataType, data: Vec<u8>) -> Result<()> {
        let entry = OptionalDataEntry::new(data_type, data)?;
        match self.optional_data.iter_mut().find(|o| o.data_type == data_type) {
            Some(slot) => *slot = entry,
            None => self.optional_data.push(entry),
        }
        Ok(())
    }

    pub fn remove_optional(&mut self, data_type: OptionalDataType) -> Option<OptionalDataEntry> {
        let idx = self
            .optional_data
            .iter()
            .position(|o| o.data_type == data_type)?;
        Some(self.optional_data.remove(idx))
    }

    /// total encoded size of the optional data region, entry headers included
    pub fn optional_data_len(&self) -> usize {
        self.optional_data.iter().map(Encode::encoded_len).sum()
    }

    /// rebuild the tag store from the tags blob
    pub fn load_tags(&mut self) -> Result<()> {
        let mut blobs = self
            .optional_data
            .iter()
            .filter(|o| o.data_type == OptionalDataType::TagsData);
        let tags = match blobs.next() {
            Some(blob) => TagStore::decode_blob(&blob.data)?,
            None => TagStore::new(),
        };
        if blobs.next().is_some() {
            return Err(Error::corruption(
                "file entry carries more than one tags blob",
                ErrorContext::new("OptionalData", "2+ tags entries", "at most one"),
            ));
        }
        self.tags = tags;
        Ok(())
    }

    /// optional data as it will be written, with the tags blob refreshed
    fn persisted_optional_data(&self) -> Result<Cow<'_, [OptionalDataEntry]>> {
        let blob = self.tags.encode_blob()?;
        let current = self.optional(OptionalDataType::TagsData);
        let unchanged = match current {
            Some(entry) => entry.data == blob,
            None => blob.is_empty(),
        };
        if unchanged {
            return Ok(Cow::Borrowed(self.optional_data.as_slice()));
        }

        let mut out: Vec<OptionalDataEntry> = self
            .optional_data
            .iter()
            .filter(|o| o.data_type != OptionalDataType::TagsData)
            .cloned()
            .collect();
        if !blob.is_empty() {
            out.insert(0, OptionalDataEntry::new(OptionalDataType::TagsData, blob)?);
        }
        Ok(Cow::Owned(out))
    }

    fn paths_len(&self) -> usize {
        self.paths.iter().map(Encode::encoded_len).sum()
    }

    fn hashes_len(&self) -> usize {
        self.hashes.iter().map(Encode::encoded_len).sum()
    }
}

impl TagOwner for FileEntry {
    fn tags(&self) -> &TagStore {
        &self.tags
    }

    fn tags_mut(&mut self) -> &mut TagStore {
        &mut self.tags
    }

    fn sync_tags(&mut self) -> Result<()> {
        if let Cow::Owned(updated) = self.persisted_optional_data()? {
            self.optional_data = updated;
        }
        Ok(())
    }
}

impl Validate for FileEntry {
    fn validate(&self) -> Result<()> {
        if self.file_id == 0 {
            return Err(Error::validation(
                "file id must be set",
                ErrorContext::new("FileID", 0, "non-zero id"),
            ));
        }
        if self.paths.is_empty() {
            return Err(Error::validation(
                "file entry has no paths",
                ErrorContext::new("PathCount", 0, "at least one path"),
            ));
        }
        len_u16("PathCount", self.paths.len())?;
        if self.hashes.len() > u8::MAX as usize {
            return Err(Error::validation(
                "too many hashes",
                ErrorContext::new("HashCount", self.hashes.len(), "at most 255"),
            ));
        }
        for path in &self.paths {
            path.validate()?;
        }
        for hash in &self.hashes {
            hash.validate()?;
        }
        for entry in &self.optional_data {
            entry.validate()?;
        }
        len_u16("HashDataLen", self.hashes_len())?;
        len_u16("OptionalDataLen", self.optional_data_len())?;
        Ok(())
    }
}

impl Encode for FileEntry {
    fn encoded_len(&self) -> usize {
        let optional: usize = match self.persisted_optional_data() {
            Ok(data) => data.iter().map(Encode::encoded_len).sum(),
            Err(_) => self.optional_data_len(),
        };
        FILE_ENTRY_FIXED_SIZE + self.paths_len() + self.hashes_len() + optional
    }

    fn encode_to<W: Write>(&self, w: &mut FieldWriter<W>) -> Result<()> {
        let optional = self.persisted_optional_data()?;

        let path_count = len_u16("PathCount", self.paths.len())?;
        let hash_count = u8::try_from(self.hashes.len()).map_err(|_| {
            Error::validation(
                "too many hashes",
                ErrorContext::new("HashCount", self.hashes.len(), "at most 255"),
            )
        })?;
        let paths_len = len_u32("HashDataOffset", self.paths_len())?;
        let hash_data_len = len_u16("HashDataLen", self.hashes_len())?;
        let optional_data_len = len_u16(
            "OptionalDataLen",
            optional.iter().map(Encode::encoded_len).sum(),
        )?;
        let optional_data_offset = paths_len + hash_data_len as u32;

        w.u64("FileID", self.file_id)?;
        w.u64("OriginalSize", self.original_size)?;
        w.u64("StoredSize", self.stored_size)?;
        w.u32("RawChecksum", self.raw_checksum)?;
        w.u32("StoredChecksum", self.stored_checksum)?;
        w.u32("FileVersion", self.file_version)?;
        w.u32("MetadataVersion", self.metadata_version)?;
        w.u16("PathCount", path_count)?;
        w.u16("Type", self.file_type)?;
        w.u8("CompressionType", self.compression_type)?;
        w.u8("CompressionLevel", self.compression_level)?;
        w.u8("EncryptionType", self.encryption_type)?;
        w.u8("HashCount", hash_count)?;
        w.u32("HashDataOffset", paths_len)?;
        w.u16("HashDataLen", hash_data_len)?;
        w.u16("OptionalDataLen", optional_data_len)?;
        w.u32("OptionalDataOffset", optional_data_offset)?;
        w.u32("Reserved", 0)?;

        for path in &self.paths {
            path.encode_to(w)?;
        }
        for hash in &self.hashes {
            hash.encode_to(w)?;
        }
        for entry in optional.iter() {
            entry.encode_to(w)?;
        }
        Ok(())
    }
}

/// skip forward to a declared offset within the variable section
fn seek_to<R: Read>(
    r: &mut FieldReader<R>,
    field: &str,
    position: u64,
    declared: u64,
) -> Result<()> {
    if declared < position {
        return Err(Error::corruption(
            format!("{} points into already decoded data", field),
            ErrorContext::new(field, declared, format!("at least {}", position)),
        ));
    }
    r.skip(field, declared - position)
}

impl Decode for FileEntry {
    fn decode_from<R: Read>(r: &mut FieldReader<R>) -> Result<Self> {
        let start = r.consumed();
        let file_id = r.u64("FileID")?;
        let original_size = r.u64("OriginalSize")?;
        let stored_size = r.u64("StoredSize")?;
        let raw_checksum = r.u32("RawChecksum")?;
        let stored_checksum = r.u32("StoredChecksum")?;
        let file_version = r.u32("FileVersion")?;
        let metadata_version = r.u32("MetadataVersion")?;
        let path_count = r.u16("PathCount")?;
        let file_type = r.u16("Type")?;
        let compression_type = r.u8("CompressionType")?;
        let compression_level = r.u8("CompressionLevel")?;
        let encryption_type = r.u8("EncryptionType")?;
        let hash_count = r.u8("HashCount")?;
        let hash_data_offset = r.u32("HashDataOffset")?;
        let hash_data_len = r.u16("HashDataLen")?;
        let optional_data_len = r.u16("OptionalDataLen")?;
        let optional_data_offset = r.u32("OptionalDataOffset")?;
        let reserved = r.u32("Reserved")?;
        if reserved != 0 {
            return Err(Error::corruption(
                "reserved field is not zero",
                ErrorContext::new("Reserved", reserved, "0"),
            ));
        }

        let variable = start + FILE_ENTRY_FIXED_SIZE as u64;

        let mut paths = Vec::with_capacity(path_count.min(64) as usize);
        for _ in 0..path_count {
            paths.push(PathEntry::decode_from(r)?);
        }

        let position = r.consumed() - variable;
        seek_to(r, "HashDataOffset", position, hash_data_offset as u64)?;
        let hashes_start = r.consumed();
        let mut hashes = Vec::with_capacity(hash_count as usize);
        for _ in 0..hash_count {
            hashes.push(HashEntry::decode_from(r)?);
        }
        let hashes_read = r.consumed() - hashes_start;
        if hashes_read != hash_data_len as u64 {
            return Err(Error::corruption(
                "hash region size does not match its declared length",
                ErrorContext::new("HashDataLen", hash_data_len, hashes_read.to_string()),
            ));
        }

        let position = r.consumed() - variable;
        seek_to(r, "OptionalDataOffset", position, optional_data_offset as u64)?;
        let optional_start = r.consumed();
        let mut optional_data = Vec::new();
        while r.consumed() - optional_start < optional_data_len as u64 {
            optional_data.push(OptionalDataEntry::decode_from(r)?);
        }
        let optional_read = r.consumed() - optional_start;
        if optional_read != optional_data_len as u64 {
            return Err(Error::corruption(
                "optional data overruns its declared length",
                ErrorContext::new("OptionalDataLen", optional_data_len, optional_read.to_string()),
            ));
        }

        let mut entry = FileEntry {
            file_id,
            original_size,
            stored_size,
            raw_checksum,
            stored_checksum,
            file_version,
            metadata_version,
            file_type,
            compression_type,
            compression_level,
            encryption_type,
            paths,
            hashes,
            optional_data,
            tags: TagStore::new(),
            path_metadata_links: BTreeMap::new(),
        };
        entry.load_tags().map_err(into_corruption)?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::tags::TagValueType;

    fn sample() -> FileEntry {
        let mut entry = FileEntry::new(7);
        entry.add_path("docs/readme.md").unwrap();
        entry.add_path("/alias/readme.md").unwrap();
        entry.original_size = 5;
        entry.stored_size = 5;
        entry.raw_checksum = crc32fast::hash(b"hello");
        entry.stored_checksum = entry.raw_checksum;
        entry.hashes.push(HashEntry::sha256(b"hello"));
        entry
            .set_optional(OptionalDataType::SolidGroupId, vec![0, 0, 0, 1])
            .unwrap();
        entry
            .tags
            .add("lang", "en", TagValueType::Language)
            .unwrap();
        entry.tags.add("rev", 3i64, TagValueType::Integer).unwrap();
        entry.sync_tags().unwrap();
        entry
    }

    #[test]
    fn test_round_trip() {
        let entry = sample();
        entry.validate().unwrap();
        let bytes = entry.encode().unwrap();
        assert_eq!(bytes.len(), entry.encoded_len());

        let (decoded, consumed) = FileEntry::decode(&bytes[..]).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(consumed, bytes.len() as u64);
    }

    #[test]
    fn test_layout_fields_recomputed() {
        let entry = sample();
        let bytes = entry.encode().unwrap();

        let u16_at = |off: usize| u16::from_le_bytes([bytes[off], bytes[off + 1]]);
        let u32_at =
            |off: usize| u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]]);

        let paths_len = ("/docs/readme.md".len() + 2 + "/alias/readme.md".len() + 2) as u32;
        assert_eq!(u16_at(40), 2, "path count");
        assert_eq!(bytes[47], 1, "hash count");
        assert_eq!(u32_at(48), paths_len, "hash data offset");
        assert_eq!(u16_at(52), 36, "hash data len");
        assert_eq!(u16_at(54) as usize, entry.optional_data_len());
        assert_eq!(u32_at(56), paths_len + 36, "optional data offset");
        assert_eq!(u32_at(60), 0, "reserved");
    }

    #[test]
    fn test_encode_refreshes_unsynced_tags() {
        let mut entry = sample();
        entry.tags.add("fresh", true, TagValueType::Boolean).unwrap();
        let bytes = entry.encode().unwrap();
        // in-memory side channel untouched until sync
        let stale = entry.optional(OptionalDataType::TagsData).unwrap();
        assert_eq!(TagStore::decode_blob(&stale.data).unwrap().len(), 2);

        let (decoded, _) = FileEntry::decode(&bytes[..]).unwrap();
        assert!(decoded.tags.has("fresh"));
    }

    #[test]
    fn test_sync_removes_empty_blob() {
        let mut entry = sample();
        entry.tags.clear();
        entry.sync_tags().unwrap();
        assert!(entry.optional(OptionalDataType::TagsData).is_none());
        assert!(entry.optional(OptionalDataType::SolidGroupId).is_some());
    }

    #[test]
    fn test_truncated_entry_is_corruption() {
        let bytes = sample().encode().unwrap();
        for len in [0, 10, FILE_ENTRY_FIXED_SIZE, bytes.len() - 1] {
            let err = FileEntry::decode(&bytes[..len]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Corruption, "prefix {}", len);
        }
    }

    #[test]
    fn test_bad_tags_blob_is_corruption() {
        let mut entry = FileEntry::new(1);
        entry.add_path("a").unwrap();
        let mut bytes = entry.encode().unwrap();

        let region = OptionalDataEntry::new(
            OptionalDataType::TagsData,
            vec![1, 0, b'k', 0x55, 0, 0, 0, 0],
        )
        .unwrap()
        .encode()
        .unwrap();
        bytes[54..56].copy_from_slice(&(region.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&region);

        let err = FileEntry::decode(&bytes[..]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corruption);
        assert_eq!(err.context().unwrap().field, "TagValueType");
    }

    #[test]
    fn test_validate() {
        let mut entry = sample();
        entry.file_id = 0;
        assert_eq!(entry.validate().unwrap_err().context().unwrap().field, "FileID");

        let entry = FileEntry::new(3);
        assert_eq!(entry.validate().unwrap_err().kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_special_types() {
        let mut entry = FileEntry::new(9);
        assert!(!entry.is_special());
        entry.file_type = FILE_TYPE_PATH_METADATA;
        assert!(entry.is_special());
    }
}
