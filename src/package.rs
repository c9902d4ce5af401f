//! in-memory package and its on-disk image
//!
//! image layout: header, then each file entry followed by its data, then the
//! file index, the optional comment and any signatures. file data of an
//! opened package stays in the archive until it is read or rewritten.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::cancel::Cancellation;
use crate::compression::{CompressionSetting, CompressionType, PackageStats};
use crate::config::Config;
use crate::error::{Error, ErrorContext, IoResultExt, Result};
use crate::format::{
    decode_path_metadata_file, encode_path_metadata_file, into_corruption, Decode, Encode,
    FieldReader, FieldWriter, FileEntry, FileIndex, HashEntry, HeaderFlags, IndexEntry,
    PackageComment, PackageHeader, Signature, Validate, FILE_ENTRY_FIXED_SIZE,
    FILE_TYPE_PATH_METADATA, HEADER_SIZE,
};
use crate::graph::PathMetadataGraph;
use crate::path;
use crate::safe_write::{SafeWrite, WriteOptions, WriteReport};
use crate::tags::{Tag, TagOwner};

const COPY_CHUNK: usize = 64 * 1024;

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// where a file's bytes live
#[derive(Clone, Debug, PartialEq, Eq)]
enum FileData {
    Memory(Vec<u8>),
    /// byte range in the package's source archive
    Archive { offset: u64, len: u64 },
}

impl FileData {
    fn len(&self) -> u64 {
        match self {
            FileData::Memory(bytes) => bytes.len() as u64,
            FileData::Archive { len, .. } => *len,
        }
    }
}

#[derive(Clone, Debug)]
struct StoredFile {
    entry: FileEntry,
    data: FileData,
}

/// path of the special file holding the path metadata entries
const PATH_METADATA_FILE: &str = "/.nvpk/path-metadata";

/// offsets computed before anything is written
struct Layout {
    header: PackageHeader,
    metadata_file: Option<StoredFile>,
    /// data offset per file, in write order
    data_offsets: Vec<u64>,
    index: FileIndex,
    total: u64,
}

#[derive(Debug)]
pub struct Package {
    source: Option<PathBuf>,
    header: PackageHeader,
    comment: Option<String>,
    files: Vec<StoredFile>,
    path_metadata: PathMetadataGraph,
    signatures: Vec<Signature>,
    next_file_id: u64,
}

impl Default for Package {
    fn default() -> Self {
        Self::new()
    }
}

impl Package {
    pub fn new() -> Self {
        let now = now_nanos();
        Self {
            source: None,
            header: PackageHeader {
                created_time: now,
                modified_time: now,
                ..PackageHeader::default()
            },
            comment: None,
            files: Vec::new(),
            path_metadata: PathMetadataGraph::new(),
            signatures: Vec::new(),
            next_file_id: 1,
        }
    }

    /// a new package stamped with the configured identifiers
    pub fn with_config(config: &Config) -> Self {
        let mut pkg = Self::new();
        pkg.header.vendor_id = config.package.vendor_id;
        pkg.header.app_id = config.package.app_id;
        pkg
    }

    /// read a package image, checking cancellation between entries
    pub fn open(path: impl AsRef<Path>, cancel: &Cancellation) -> Result<Self> {
        let path = path.as_ref();
        cancel.check("open package")?;

        let file = File::open(path).with_path(path)?;
        let file_len = file.metadata().with_path(path)?.len();
        let mut r = BufReader::new(file);

        let (header, _) = PackageHeader::decode(&mut r)?;
        header.validate().map_err(into_corruption)?;

        let index_end = header.index_start.checked_add(header.index_size);
        if header.index_start < HEADER_SIZE as u64 || index_end.map_or(true, |end| end > file_len) {
            return Err(Error::corruption(
                "file index lies outside the archive",
                ErrorContext::new(
                    "IndexStart",
                    header.index_start,
                    format!("an index within {} bytes", file_len),
                ),
            ));
        }
        r.seek(SeekFrom::Start(header.index_start)).with_path(path)?;
        let (index, index_len) = FileIndex::decode(&mut r)?;
        if index_len != header.index_size {
            return Err(Error::corruption(
                "file index size does not match the header",
                ErrorContext::new("IndexSize", header.index_size, index_len.to_string()),
            ));
        }
        index.validate().map_err(into_corruption)?;

        let mut pkg = Package {
            source: Some(path.to_path_buf()),
            header,
            comment: None,
            files: Vec::with_capacity(index.entries.len()),
            path_metadata: PathMetadataGraph::new(),
            signatures: Vec::new(),
            next_file_id: 1,
        };

        let mut seen_paths = HashSet::new();
        for slot in &index.entries {
            cancel.check("open package")?;
            if slot.offset.saturating_add(FILE_ENTRY_FIXED_SIZE as u64) > file_len {
                return Err(Error::corruption(
                    "file entry offset beyond end of archive",
                    ErrorContext::new("Offset", slot.offset, format!("below {}", file_len)),
                ));
            }
            r.seek(SeekFrom::Start(slot.offset)).with_path(path)?;
            let mut fr = FieldReader::new(&mut r);
            let entry = FileEntry::decode_from(&mut fr)?;
            let data_offset = slot.offset + fr.consumed();

            if entry.file_id != slot.file_id {
                return Err(Error::corruption(
                    "file entry does not match its index slot",
                    ErrorContext::new("FileID", entry.file_id, slot.file_id.to_string()),
                ));
            }
            entry.validate().map_err(into_corruption)?;
            if data_offset.saturating_add(entry.stored_size) > file_len {
                return Err(Error::corruption(
                    "file data runs past the end of the archive",
                    ErrorContext::new(
                        "StoredSize",
                        entry.stored_size,
                        format!("at most {}", file_len.saturating_sub(data_offset)),
                    ),
                ));
            }
            let after = entry.file_id.checked_add(1).ok_or_else(|| {
                Error::corruption(
                    "file id leaves no room for another file",
                    ErrorContext::new("FileID", entry.file_id, "below u64::MAX"),
                )
            })?;
            pkg.next_file_id = pkg.next_file_id.max(after);
            for p in &entry.paths {
                if !seen_paths.insert(p.path.clone()) {
                    return Err(Error::corruption(
                        "path stored by more than one file entry",
                        ErrorContext::new("Path", &p.path, "a path unique across entries"),
                    ));
                }
            }

            if entry.file_type == FILE_TYPE_PATH_METADATA {
                let bytes = FieldReader::new(&mut r).bytes("PathMetadata", entry.stored_size as usize)?;
                verify_checksum(&entry, &bytes)?;
                let entries = decode_path_metadata_file(&bytes)?;
                pkg.path_metadata =
                    PathMetadataGraph::from_entries(entries).map_err(into_corruption)?;
                continue;
            }

            pkg.files.push(StoredFile {
                data: FileData::Archive {
                    offset: data_offset,
                    len: entry.stored_size,
                },
                entry,
            });
        }

        if pkg.header.has_comment() {
            r.seek(SeekFrom::Start(pkg.header.comment_start)).with_path(path)?;
            let (comment, _) = PackageComment::decode(&mut r)?;
            pkg.comment = Some(comment.text);
        }

        if pkg.header.signature_offset != 0 {
            r.seek(SeekFrom::Start(pkg.header.signature_offset)).with_path(path)?;
            let mut fr = FieldReader::new(&mut r);
            while pkg.header.signature_offset + fr.consumed() < file_len {
                let signature = Signature::decode_from(&mut fr)?;
                signature.validate().map_err(into_corruption)?;
                pkg.signatures.push(signature);
            }
        }

        for stored in &mut pkg.files {
            pkg.path_metadata.associate_all(&mut stored.entry);
        }

        debug!(
            path = %path.display(),
            files = pkg.files.len(),
            path_metadata = pkg.path_metadata.len(),
            signatures = pkg.signatures.len(),
            "opened package"
        );
        Ok(pkg)
    }

    pub fn header(&self) -> &PackageHeader {
        &self.header
    }

    /// archive this package was opened from or last written to
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn vendor_id(&self) -> u32 {
        self.header.vendor_id
    }

    pub fn set_vendor_id(&mut self, vendor_id: u32) {
        self.header.vendor_id = vendor_id;
    }

    pub fn app_id(&self) -> u64 {
        self.header.app_id
    }

    pub fn set_app_id(&mut self, app_id: u64) {
        self.header.app_id = app_id;
    }

    /// regular file entries in insertion order
    pub fn files(&self) -> impl Iterator<Item = &FileEntry> {
        self.files.iter().map(|f| &f.entry)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    fn position(&self, raw: &str) -> Result<usize> {
        let normalized = path::normalize(raw)?;
        self.files
            .iter()
            .position(|f| f.entry.has_path(&normalized))
            .ok_or(Error::FileNotFound(normalized))
    }

    /// store `data` under `path`, returning the new file id
    pub fn add_file(&mut self, path: &str, data: impl Into<Vec<u8>>) -> Result<u64> {
        let data = data.into();
        let file_id = self.next_file_id;
        let next_file_id = file_id.checked_add(1).ok_or_else(exhausted_ids)?;
        let mut entry = FileEntry::new(file_id);
        let normalized = entry.add_path(path)?.path.clone();
        if path::is_dir(&normalized) {
            return Err(Error::validation(
                "cannot store data under a directory path",
                ErrorContext::new("Path", &normalized, "a file path"),
            ));
        }
        if self.files.iter().any(|f| f.entry.has_path(&normalized)) {
            return Err(Error::validation(
                "path already present in package",
                ErrorContext::new("Path", &normalized, "a path not yet in the package"),
            ));
        }

        let checksum = crc32fast::hash(&data);
        entry.original_size = data.len() as u64;
        entry.stored_size = data.len() as u64;
        entry.raw_checksum = checksum;
        entry.stored_checksum = checksum;
        entry.hashes.push(HashEntry::sha256(&data));
        self.path_metadata.associate_all(&mut entry);

        self.next_file_id = next_file_id;
        debug!(path = %normalized, file_id, size = data.len(), "added file");
        self.files.push(StoredFile {
            entry,
            data: FileData::Memory(data),
        });
        Ok(file_id)
    }

    /// make an existing file reachable under another path
    pub fn add_path(&mut self, existing: &str, alias: &str) -> Result<()> {
        let normalized = path::normalize(alias)?;
        if self.files.iter().any(|f| f.entry.has_path(&normalized)) {
            return Err(Error::validation(
                "path already present in package",
                ErrorContext::new("Path", &normalized, "a path not yet in the package"),
            ));
        }
        let idx = self.position(existing)?;
        let entry = &mut self.files[idx].entry;
        entry.add_path(&normalized)?;
        self.path_metadata.associate_all(entry);
        Ok(())
    }

    pub fn remove_file(&mut self, path: &str) -> Result<FileEntry> {
        let idx = self.position(path)?;
        Ok(self.files.remove(idx).entry)
    }

    pub fn file_by_path(&self, path: &str) -> Option<&FileEntry> {
        self.position(path).ok().map(|idx| &self.files[idx].entry)
    }

    /// mutable access, e.g. for editing tags
    pub fn file_by_path_mut(&mut self, path: &str) -> Option<&mut FileEntry> {
        let idx = self.position(path).ok()?;
        Some(&mut self.files[idx].entry)
    }

    pub fn file_by_id(&self, file_id: u64) -> Option<&FileEntry> {
        self.files
            .iter()
            .map(|f| &f.entry)
            .find(|e| e.file_id == file_id)
    }

    /// file content, checked against the stored checksum
    pub fn read_file(&self, path: &str, cancel: &Cancellation) -> Result<Vec<u8>> {
        let stored = &self.files[self.position(path)?];
        let entry = &stored.entry;
        if entry.compression_type != 0 {
            let name = CompressionType::from_code(entry.compression_type)
                .map_or_else(|| entry.compression_type.to_string(), |c| c.to_string());
            return Err(Error::unsupported(
                format!("{} is compressed with {}", path, name),
                ErrorContext::new("CompressionType", entry.compression_type, "0 (uncompressed)"),
            ));
        }
        if entry.encryption_type != 0 {
            return Err(Error::unsupported(
                format!("{} is encrypted", path),
                ErrorContext::new("EncryptionType", entry.encryption_type, "0 (unencrypted)"),
            ));
        }
        let bytes = match &stored.data {
            FileData::Memory(bytes) => bytes.clone(),
            FileData::Archive { offset, len } => {
                let source = self.archive_path()?;
                let mut file = File::open(source).with_path(source)?;
                file.seek(SeekFrom::Start(*offset)).with_path(source)?;
                let mut out = Vec::with_capacity(*len as usize);
                copy_range(&mut file, &mut out, *len, cancel)?;
                out
            }
        };
        verify_checksum(&stored.entry, &bytes)?;
        Ok(bytes)
    }

    /// paths matching a glob pattern, e.g. `/assets/**/*.png`
    pub fn find(&self, pattern: &str) -> Result<Vec<&str>> {
        let rooted = if pattern.starts_with('/') {
            pattern.to_string()
        } else {
            format!("/{}", pattern)
        };
        let matcher = glob::Pattern::new(&rooted).map_err(|e| {
            Error::validation(
                "invalid glob pattern",
                ErrorContext::new("Pattern", pattern, e.msg),
            )
        })?;
        Ok(self
            .files
            .iter()
            .flat_map(|f| f.entry.paths.iter())
            .map(|p| p.as_str())
            .filter(|p| matcher.matches(p))
            .collect())
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// set or clear the package comment
    pub fn set_comment(&mut self, comment: Option<String>) -> Result<()> {
        if let Some(text) = &comment {
            PackageComment::new(text.as_str()).validate()?;
        }
        self.comment = comment.filter(|c| !c.is_empty());
        Ok(())
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    pub fn append_signature(&mut self, signature: Signature) -> Result<()> {
        signature.validate()?;
        if signature.kind().is_none() {
            return Err(Error::unsupported(
                "unknown signature type",
                ErrorContext::new("SignatureType", signature.signature_type, "1..=4"),
            ));
        }
        self.signatures.push(signature);
        Ok(())
    }

    pub fn path_metadata(&self) -> &PathMetadataGraph {
        &self.path_metadata
    }

    /// mutable graph access; call `relink` after adding entries for existing files
    pub fn path_metadata_mut(&mut self) -> &mut PathMetadataGraph {
        &mut self.path_metadata
    }

    /// refresh every file's links into the path metadata graph
    pub fn relink(&mut self) {
        for stored in &mut self.files {
            stored.entry.path_metadata_links.clear();
            self.path_metadata.associate_all(&mut stored.entry);
        }
    }

    /// effective tags of the file stored at `path`
    pub fn file_tags(&self, path: &str) -> Result<Vec<Tag>> {
        let idx = self.position(path)?;
        Ok(self.path_metadata.file_effective_tags(&self.files[idx].entry))
    }

    pub fn stats(&self) -> PackageStats {
        let mut stats = PackageStats::new();
        for stored in &self.files {
            let path = stored.entry.primary_path().unwrap_or_default();
            stats.add(path, stored.entry.original_size);
        }
        stats
    }

    fn archive_path(&self) -> Result<&Path> {
        self.source.as_deref().ok_or_else(|| {
            Error::validation(
                "package has no backing archive",
                ErrorContext::new("Source", "none", "an opened or written package"),
            )
        })
    }

    /// rewrite the archive this package came from
    pub fn write(&mut self, cancel: &Cancellation) -> Result<WriteReport> {
        let target = self.archive_path()?.to_path_buf();
        self.safe_write(&target, true, cancel)
    }

    /// write the package to `target` atomically with default settings
    pub fn safe_write(
        &mut self,
        target: impl AsRef<Path>,
        overwrite: bool,
        cancel: &Cancellation,
    ) -> Result<WriteReport> {
        let options = WriteOptions {
            overwrite,
            ..WriteOptions::default()
        };
        self.commit(target.as_ref(), options, CompressionSetting::Auto, cancel)
    }

    /// write the package to `target` using configured write settings
    pub fn write_with(
        &mut self,
        target: impl AsRef<Path>,
        config: &Config,
        overwrite: bool,
        cancel: &Cancellation,
    ) -> Result<WriteReport> {
        let options = config.write.options(overwrite);
        self.commit(target.as_ref(), options, config.write.compression, cancel)
    }

    fn commit(
        &mut self,
        target: &Path,
        options: WriteOptions,
        compression: CompressionSetting,
        cancel: &Cancellation,
    ) -> Result<WriteReport> {
        let compression = compression.resolve(&self.stats());
        let layout = self.layout(compression)?;

        let mut engine = SafeWrite::new(target, options);
        let report = engine.commit(layout.total, cancel, |out| {
            self.write_image(&layout, out, cancel)
        })?;

        // data now lives in the new archive
        for (stored, offset) in self.files.iter_mut().zip(&layout.data_offsets) {
            stored.data = FileData::Archive {
                offset: *offset,
                len: stored.data.len(),
            };
            stored.entry.sync_tags()?;
        }
        self.header = layout.header;
        self.source = Some(target.to_path_buf());

        debug!(
            target = %target.display(),
            files = self.files.len(),
            compression = %compression,
            "package committed"
        );
        Ok(report)
    }

    fn layout(&self, compression: CompressionType) -> Result<Layout> {
        let mut seen_paths = HashSet::new();
        for stored in &self.files {
            stored.entry.validate()?;
            if stored.entry.file_id == u64::MAX {
                return Err(Error::validation(
                    "file id is reserved",
                    ErrorContext::new("FileID", u64::MAX, "below u64::MAX"),
                ));
            }
            for p in &stored.entry.paths {
                if !seen_paths.insert(p.path.as_str()) {
                    return Err(Error::validation(
                        "path used by more than one file",
                        ErrorContext::new("Path", &p.path, "a path unique across files"),
                    ));
                }
            }
        }

        let metadata_file = if self.path_metadata.is_empty() {
            None
        } else {
            if seen_paths.contains(PATH_METADATA_FILE) {
                return Err(Error::validation(
                    "path is reserved for the path metadata file",
                    ErrorContext::new("Path", PATH_METADATA_FILE, "any other path"),
                ));
            }
            let bytes = encode_path_metadata_file(self.path_metadata.iter())?;
            let file_id = self
                .files
                .iter()
                .map(|f| f.entry.file_id)
                .max()
                .unwrap_or(0)
                .max(self.next_file_id.saturating_sub(1))
                .checked_add(1)
                .filter(|id| *id != u64::MAX)
                .ok_or_else(exhausted_ids)?;
            let mut entry = FileEntry::new(file_id);
            entry.add_path(PATH_METADATA_FILE)?;
            entry.file_type = FILE_TYPE_PATH_METADATA;
            entry.original_size = bytes.len() as u64;
            entry.stored_size = bytes.len() as u64;
            entry.raw_checksum = crc32fast::hash(&bytes);
            entry.stored_checksum = entry.raw_checksum;
            Some(StoredFile {
                entry,
                data: FileData::Memory(bytes),
            })
        };

        let mut offset = HEADER_SIZE as u64;
        let mut data_offsets = Vec::with_capacity(self.files.len());
        let mut index = FileIndex {
            first_entry_offset: offset,
            entries: Vec::with_capacity(self.files.len() + 1),
        };
        for stored in self.files.iter().chain(metadata_file.iter()) {
            index.entries.push(IndexEntry {
                file_id: stored.entry.file_id,
                offset,
            });
            let data_offset = offset + stored.entry.encoded_len() as u64;
            data_offsets.push(data_offset);
            offset = data_offset + stored.data.len();
        }
        if index.entries.is_empty() {
            index.first_entry_offset = 0;
        }

        let mut header = self.header.clone();
        header.index_start = offset;
        header.index_size = index.encoded_len() as u64;
        offset += header.index_size;

        match &self.comment {
            Some(text) => {
                let size = PackageComment::new(text.as_str()).encoded_len() as u64;
                header.comment_start = offset;
                header.comment_size = size as u32;
                offset += size;
            }
            None => {
                header.comment_start = 0;
                header.comment_size = 0;
            }
        }

        if self.signatures.is_empty() {
            header.signature_offset = 0;
        } else {
            header.signature_offset = offset;
            offset += self
                .signatures
                .iter()
                .map(|s| s.encoded_len() as u64)
                .sum::<u64>();
        }

        let flags = &mut header.flags;
        flags.set(HeaderFlags::HAS_SIGNATURES, !self.signatures.is_empty());
        flags.set(HeaderFlags::HAS_COMMENT, self.comment.is_some());
        flags.set(
            HeaderFlags::HAS_PER_FILE_TAGS,
            self.files.iter().any(|f| !f.entry.tags.is_empty()),
        );
        flags.set(HeaderFlags::HAS_SPECIAL_METADATA, metadata_file.is_some());
        flags.set(
            HeaderFlags::HAS_EXTENDED_ATTRS,
            self.path_metadata
                .iter()
                .any(|e| !e.filesystem.extended_attrs.is_empty()),
        );
        flags.set(
            HeaderFlags::HAS_COMPRESSED_FILES,
            self.files.iter().any(|f| f.entry.compression_type != 0),
        );
        flags.set(
            HeaderFlags::HAS_ENCRYPTED_FILES,
            self.files.iter().any(|f| f.entry.encryption_type != 0),
        );
        flags.set_compression(compression.code());
        header.modified_time = now_nanos();

        data_offsets.truncate(self.files.len());
        Ok(Layout {
            header,
            metadata_file,
            data_offsets,
            index,
            total: offset,
        })
    }

    fn write_image(&self, layout: &Layout, out: &mut dyn Write, cancel: &Cancellation) -> Result<()> {
        let mut w = FieldWriter::new(out);
        let needs_archive = self
            .files
            .iter()
            .any(|f| matches!(f.data, FileData::Archive { .. }));
        let mut archive = if needs_archive {
            let source = self.archive_path()?;
            Some(File::open(source).with_path(source)?)
        } else {
            None
        };

        layout.header.encode_to(&mut w)?;
        for stored in self.files.iter().chain(layout.metadata_file.iter()) {
            cancel.check("write package")?;
            stored.entry.encode_to(&mut w)?;
            match (&stored.data, archive.as_mut()) {
                (FileData::Memory(bytes), _) => w.bytes("FileData", bytes)?,
                (FileData::Archive { offset, len }, Some(file)) => {
                    file.seek(SeekFrom::Start(*offset))
                        .with_field("FileData", "seekable source archive")?;
                    copy_range(file, w.get_mut(), *len, cancel)?;
                }
                (FileData::Archive { offset, .. }, None) => {
                    return Err(Error::validation(
                        "file data refers to an archive that is not open",
                        ErrorContext::new("Offset", offset, "an opened source archive"),
                    ));
                }
            }
        }
        layout.index.encode_to(&mut w)?;
        if let Some(text) = &self.comment {
            PackageComment::new(text.as_str()).encode_to(&mut w)?;
        }
        for signature in &self.signatures {
            signature.encode_to(&mut w)?;
        }
        Ok(())
    }
}

/// copy exactly `len` bytes, checking cancellation per chunk
fn copy_range<R: Read, W: Write>(
    src: &mut R,
    dst: &mut W,
    len: u64,
    cancel: &Cancellation,
) -> Result<()> {
    let mut r = FieldReader::new(src);
    let mut remaining = len;
    while remaining > 0 {
        cancel.check("copy file data")?;
        let step = remaining.min(COPY_CHUNK as u64) as usize;
        let chunk = r.bytes("FileData", step)?;
        dst.write_all(&chunk)
            .with_field("FileData", "written successfully")?;
        remaining -= step as u64;
    }
    Ok(())
}

fn exhausted_ids() -> Error {
    Error::validation(
        "no file ids left",
        ErrorContext::new("FileID", u64::MAX, "an unused id below u64::MAX"),
    )
}

fn verify_checksum(entry: &FileEntry, bytes: &[u8]) -> Result<()> {
    let actual = crc32fast::hash(bytes);
    if actual != entry.stored_checksum {
        return Err(Error::corruption(
            format!(
                "checksum mismatch for {}",
                entry.primary_path().unwrap_or("<unnamed>")
            ),
            ErrorContext::new(
                "StoredChecksum",
                format!("{:08x}", actual),
                format!("{:08x}", entry.stored_checksum),
            ),
        ));
    }
    Ok(())
}
