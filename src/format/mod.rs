//! binary structures of the .nvpk format
//!
//! every structure is little-endian. encoders recompute count and length
//! fields from the payload they actually write; decoders treat declared
//! lengths as untrusted and report short input as corruption.

mod comment;
mod file_entry;
mod hash_entry;
mod header;
mod index;
mod optional_data;
mod path_entry;
mod path_metadata;
mod reader;
mod signature;
mod writer;

use std::io::{Read, Write};

use crate::error::{Error, ErrorContext, Result};

pub use comment::PackageComment;
pub use file_entry::{
    FileEntry, FILE_ENTRY_FIXED_SIZE, FILE_TYPE_PATH_METADATA, FILE_TYPE_REGULAR,
    FILE_TYPE_SPECIAL_MIN,
};
pub use hash_entry::{HashEntry, HashPurpose, HashType};
pub use header::{HeaderFlags, PackageHeader, FORMAT_VERSION, HEADER_SIZE, MAGIC};
pub use index::{FileIndex, IndexEntry, INDEX_HEADER_SIZE};
pub use optional_data::{OptionalDataEntry, OptionalDataType};
pub use path_entry::PathEntry;
pub use path_metadata::{
    decode_path_metadata_file, encode_path_metadata_file, AclEntry, AclKind, FileSystemMeta,
    Inheritance, PathMetadataEntry, PathType,
};
pub use reader::FieldReader;
pub use signature::{Signature, SignatureType, SIGNATURE_HEADER_SIZE};
pub use writer::FieldWriter;

/// serialize a structure
pub trait Encode {
    /// exact number of bytes `encode_to` will write
    fn encoded_len(&self) -> usize;

    fn encode_to<W: Write>(&self, w: &mut FieldWriter<W>) -> Result<()>;

    fn encode(&self) -> Result<Vec<u8>> {
        let mut w = FieldWriter::new(Vec::with_capacity(self.encoded_len()));
        self.encode_to(&mut w)?;
        Ok(w.into_inner())
    }

    /// encode into any writer, returning the bytes written
    fn write_to<W: Write>(&self, writer: W) -> Result<u64> {
        let mut w = FieldWriter::new(writer);
        self.encode_to(&mut w)?;
        Ok(w.written())
    }
}

/// deserialize a structure
pub trait Decode: Sized {
    fn decode_from<R: Read>(r: &mut FieldReader<R>) -> Result<Self>;

    /// decode one value, returning it with the number of bytes consumed
    fn decode<R: Read>(reader: R) -> Result<(Self, u64)> {
        let mut r = FieldReader::new(reader);
        let value = Self::decode_from(&mut r)?;
        Ok((value, r.consumed()))
    }
}

/// structural invariants shared by in-memory mutation and post-decode checks
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// length of a payload that must fit a u16 prefix
pub(crate) fn len_u16(field: &str, len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| {
        Error::validation(
            format!("{} too long", field),
            ErrorContext::new(field, len, format!("at most {} bytes", u16::MAX)),
        )
    })
}

/// length of a payload that must fit a u32 prefix
pub(crate) fn len_u32(field: &str, len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        Error::validation(
            format!("{} too long", field),
            ErrorContext::new(field, len, format!("at most {} bytes", u32::MAX)),
        )
    })
}

/// turn a validation failure on decoded bytes into corruption
pub(crate) fn into_corruption(err: Error) -> Error {
    match err {
        Error::Validation { message, context } => Error::Corruption { message, context },
        other => other,
    }
}
