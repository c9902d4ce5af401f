use std::io::{Read, Write};

use super::{len_u16, Decode, Encode, FieldReader, FieldWriter, Validate};
use crate::error::{Error, ErrorContext, Result};

/// kind of side-channel blob carried by a file entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OptionalDataType {
    TagsData,
    PathEncoding,
    PathFlags,
    CompressionDictionary,
    SolidGroupId,
    FileSystemFlags,
    WindowsAttributes,
    ExtendedAttributes,
    Acl,
    Other(u8),
}

impl OptionalDataType {
    pub fn code(self) -> u8 {
        match self {
            OptionalDataType::TagsData => 0x00,
            OptionalDataType::PathEncoding => 0x01,
            OptionalDataType::PathFlags => 0x02,
            OptionalDataType::CompressionDictionary => 0x03,
            OptionalDataType::SolidGroupId => 0x04,
            OptionalDataType::FileSystemFlags => 0x05,
            OptionalDataType::WindowsAttributes => 0x06,
            OptionalDataType::ExtendedAttributes => 0x07,
            OptionalDataType::Acl => 0x08,
            OptionalDataType::Other(n) => n,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => OptionalDataType::TagsData,
            0x01 => OptionalDataType::PathEncoding,
            0x02 => OptionalDataType::PathFlags,
            0x03 => OptionalDataType::CompressionDictionary,
            0x04 => OptionalDataType::SolidGroupId,
            0x05 => OptionalDataType::FileSystemFlags,
            0x06 => OptionalDataType::WindowsAttributes,
            0x07 => OptionalDataType::ExtendedAttributes,
            0x08 => OptionalDataType::Acl,
            n => OptionalDataType::Other(n),
        }
    }
}

/// one typed blob: `data_type:u8 | data_length:u16 | data`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptionalDataEntry {
    pub data_type: OptionalDataType,
    pub data_length: u16,
    pub data: Vec<u8>,
}

impl OptionalDataEntry {
    pub const HEADER_SIZE: usize = 3;

    pub fn new(data_type: OptionalDataType, data: Vec<u8>) -> Result<Self> {
        let data_length = len_u16("DataLength", data.len())?;
        Ok(Self {
            data_type,
            data_length,
            data,
        })
    }
}

impl Validate for OptionalDataEntry {
    fn validate(&self) -> Result<()> {
        if self.data.is_empty() {
            return Err(Error::validation(
                "optional data is empty",
                ErrorContext::new("Data", "0 bytes", "non-empty data"),
            ));
        }
        if self.data_length as usize != self.data.len() {
            return Err(Error::validation(
                "data length does not match data",
                ErrorContext::new("DataLength", self.data_length, self.data.len().to_string()),
            ));
        }
        Ok(())
    }
}

impl Encode for OptionalDataEntry {
    fn encoded_len(&self) -> usize {
        Self::HEADER_SIZE + self.data.len()
    }

    fn encode_to<W: Write>(&self, w: &mut FieldWriter<W>) -> Result<()> {
        let len = len_u16("DataLength", self.data.len())?;
        w.u8("DataType", self.data_type.code())?;
        w.u16("DataLength", len)?;
        w.bytes("Data", &self.data)
    }
}

impl Decode for OptionalDataEntry {
    fn decode_from<R: Read>(r: &mut FieldReader<R>) -> Result<Self> {
        let data_type = OptionalDataType::from_code(r.u8("DataType")?);
        let data_length = r.u16("DataLength")?;
        let data = r.bytes("Data", data_length as usize)?;
        Ok(Self {
            data_type,
            data_length,
            data,
        })
    }
}
