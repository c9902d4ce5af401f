use std::io::{Read, Write};

use super::{Decode, Encode, FieldReader, FieldWriter, Validate};
use crate::error::{Error, ErrorContext, Result};

/// "NVPK" read as a little-endian u32
pub const MAGIC: u32 = 0x4E56_504B;
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 112;

/// package header flag bits
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct HeaderFlags(pub u32);

impl HeaderFlags {
    pub const HAS_SIGNATURES: u32 = 1 << 0;
    pub const HAS_COMPRESSED_FILES: u32 = 1 << 1;
    pub const HAS_ENCRYPTED_FILES: u32 = 1 << 2;
    pub const HAS_EXTENDED_ATTRS: u32 = 1 << 3;
    pub const HAS_COMMENT: u32 = 1 << 4;
    pub const HAS_PER_FILE_TAGS: u32 = 1 << 5;
    pub const HAS_SPECIAL_METADATA: u32 = 1 << 6;
    pub const METADATA_ONLY: u32 = 1 << 7;

    const COMPRESSION_SHIFT: u32 = 8;
    const COMPRESSION_MASK: u32 = 0xFF << Self::COMPRESSION_SHIFT;

    pub fn contains(self, bit: u32) -> bool {
        self.0 & bit == bit
    }

    pub fn set(&mut self, bit: u32, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    /// package compression type code, bits 8-15
    pub fn compression(self) -> u8 {
        ((self.0 & Self::COMPRESSION_MASK) >> Self::COMPRESSION_SHIFT) as u8
    }

    pub fn set_compression(&mut self, code: u8) {
        self.0 = (self.0 & !Self::COMPRESSION_MASK) | ((code as u32) << Self::COMPRESSION_SHIFT);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageHeader {
    pub magic: u32,
    pub format_version: u32,
    pub flags: HeaderFlags,
    pub package_data_version: u32,
    pub metadata_version: u32,
    pub package_crc: u32,
    /// unix nanoseconds
    pub created_time: u64,
    pub modified_time: u64,
    pub locale_id: u32,
    pub reserved: u32,
    pub app_id: u64,
    pub vendor_id: u32,
    pub creator_id: u32,
    pub index_start: u64,
    pub index_size: u64,
    pub archive_chain_id: u64,
    pub archive_part_info: u32,
    pub comment_size: u32,
    pub comment_start: u64,
    pub signature_offset: u64,
}

impl Default for PackageHeader {
    fn default() -> Self {
        Self {
            magic: MAGIC,
            format_version: FORMAT_VERSION,
            flags: HeaderFlags::default(),
            package_data_version: 1,
            metadata_version: 1,
            package_crc: 0,
            created_time: 0,
            modified_time: 0,
            locale_id: 0,
            reserved: 0,
            app_id: 0,
            vendor_id: 0,
            creator_id: 0,
            index_start: 0,
            index_size: 0,
            archive_chain_id: 0,
            // single-part archive: part 1 of 1
            archive_part_info: 0x0001_0001,
            comment_size: 0,
            comment_start: 0,
            signature_offset: 0,
        }
    }
}

impl PackageHeader {
    pub fn has_comment(&self) -> bool {
        self.flags.contains(HeaderFlags::HAS_COMMENT)
    }

    pub fn has_signatures(&self) -> bool {
        self.signature_offset != 0
    }
}

impl Validate for PackageHeader {
    fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(Error::validation(
                "not a novuspack archive",
                ErrorContext::new("Magic", format!("{:#010x}", self.magic), format!("{:#010x}", MAGIC)),
            ));
        }
        if self.format_version != FORMAT_VERSION {
            return Err(Error::validation(
                "unsupported format version",
                ErrorContext::new("FormatVersion", self.format_version, FORMAT_VERSION.to_string()),
            ));
        }
        if self.reserved != 0 {
            return Err(Error::validation(
                "reserved field is not zero",
                ErrorContext::new("Reserved", self.reserved, "0"),
            ));
        }
        Ok(())
    }
}

impl Encode for PackageHeader {
    fn encoded_len(&self) -> usize {
        HEADER_SIZE
    }

    fn encode_to<W: Write>(&self, w: &mut FieldWriter<W>) -> Result<()> {
        w.u32("Magic", self.magic)?;
        w.u32("FormatVersion", self.format_version)?;
        w.u32("Flags", self.flags.0)?;
        w.u32("PackageDataVersion", self.package_data_version)?;
        w.u32("MetadataVersion", self.metadata_version)?;
        w.u32("PackageCRC", self.package_crc)?;
        w.u64("CreatedTime", self.created_time)?;
        w.u64("ModifiedTime", self.modified_time)?;
        w.u32("LocaleID", self.locale_id)?;
        w.u32("Reserved", self.reserved)?;
        w.u64("AppID", self.app_id)?;
        w.u32("VendorID", self.vendor_id)?;
        w.u32("CreatorID", self.creator_id)?;
        w.u64("IndexStart", self.index_start)?;
        w.u64("IndexSize", self.index_size)?;
        w.u64("ArchiveChainID", self.archive_chain_id)?;
        w.u32("ArchivePartInfo", self.archive_part_info)?;
        w.u32("CommentSize", self.comment_size)?;
        w.u64("CommentStart", self.comment_start)?;
        w.u64("SignatureOffset", self.signature_offset)
    }
}

impl Decode for PackageHeader {
    fn decode_from<R: Read>(r: &mut FieldReader<R>) -> Result<Self> {
        Ok(Self {
            magic: r.u32("Magic")?,
            format_version: r.u32("FormatVersion")?,
            flags: HeaderFlags(r.u32("Flags")?),
            package_data_version: r.u32("PackageDataVersion")?,
            metadata_version: r.u32("MetadataVersion")?,
            package_crc: r.u32("PackageCRC")?,
            created_time: r.u64("CreatedTime")?,
            modified_time: r.u64("ModifiedTime")?,
            locale_id: r.u32("LocaleID")?,
            reserved: r.u32("Reserved")?,
            app_id: r.u64("AppID")?,
            vendor_id: r.u32("VendorID")?,
            creator_id: r.u32("CreatorID")?,
            index_start: r.u64("IndexStart")?,
            index_size: r.u64("IndexSize")?,
            archive_chain_id: r.u64("ArchiveChainID")?,
            archive_part_info: r.u32("ArchivePartInfo")?,
            comment_size: r.u32("CommentSize")?,
            comment_start: r.u64("CommentStart")?,
            signature_offset: r.u64("SignatureOffset")?,
        })
    }
}
