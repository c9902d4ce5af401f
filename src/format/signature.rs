use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use super::{len_u16, len_u32, Decode, Encode, FieldReader, FieldWriter, Validate};
use crate::error::{Error, ErrorContext, Result};

/// fixed part of a signature block: type, size, flags, timestamp, comment length
pub const SIGNATURE_HEADER_SIZE: usize = 18;

/// known signature algorithms; the block itself stays opaque
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignatureType {
    MlDsa,
    SlhDsa,
    Pgp,
    X509,
}

impl SignatureType {
    pub fn code(self) -> u32 {
        match self {
            SignatureType::MlDsa => 0x01,
            SignatureType::SlhDsa => 0x02,
            SignatureType::Pgp => 0x03,
            SignatureType::X509 => 0x04,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0x01 => Some(SignatureType::MlDsa),
            0x02 => Some(SignatureType::SlhDsa),
            0x03 => Some(SignatureType::Pgp),
            0x04 => Some(SignatureType::X509),
            _ => None,
        }
    }
}

/// an appendable authentication block
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Signature {
    pub signature_type: u32,
    pub signature_size: u32,
    pub signature_flags: u32,
    /// unix seconds
    pub signature_timestamp: u32,
    pub comment_length: u16,
    pub comment: String,
    pub data: Vec<u8>,
}

impl Signature {
    /// a signature stamped with the current time
    pub fn new(signature_type: SignatureType, data: Vec<u8>) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        Self {
            signature_type: signature_type.code(),
            signature_size: data.len() as u32,
            signature_flags: 0,
            signature_timestamp: now,
            comment_length: 0,
            comment: String::new(),
            data,
        }
    }

    /// attach a comment; Validation when it does not fit CommentLength
    pub fn with_comment(mut self, comment: impl Into<String>) -> Result<Self> {
        let comment = comment.into();
        self.comment_length = len_u16("CommentLength", comment.len())?;
        self.comment = comment;
        Ok(self)
    }

    pub fn with_timestamp(mut self, timestamp: u32) -> Self {
        self.signature_timestamp = timestamp;
        self
    }

    pub fn kind(&self) -> Option<SignatureType> {
        SignatureType::from_code(self.signature_type)
    }

    pub fn has_flag(&self, bit: u32) -> bool {
        self.signature_flags & (1 << bit) != 0
    }

    pub fn set_flag(&mut self, bit: u32) {
        self.signature_flags |= 1 << bit;
    }

    pub fn clear_flag(&mut self, bit: u32) {
        self.signature_flags &= !(1 << bit);
    }

    /// refresh the length fields from the payload
    pub fn update_lengths(&mut self) -> Result<()> {
        self.comment_length = len_u16("CommentLength", self.comment.len())?;
        self.signature_size = len_u32("SignatureSize", self.data.len())?;
        Ok(())
    }
}

impl Validate for Signature {
    fn validate(&self) -> Result<()> {
        if self.signature_type == 0 {
            return Err(Error::validation(
                "signature type must be set",
                ErrorContext::new("SignatureType", 0, "non-zero value"),
            ));
        }
        if self.data.is_empty() {
            return Err(Error::validation(
                "signature data is empty",
                ErrorContext::new("SignatureData", "0 bytes", "non-empty data"),
            ));
        }
        if self.signature_size as usize != self.data.len() {
            return Err(Error::validation(
                "signature size does not match data",
                ErrorContext::new(
                    "SignatureSize",
                    self.signature_size,
                    self.data.len().to_string(),
                ),
            ));
        }
        if self.comment_length as usize != self.comment.len() {
            return Err(Error::validation(
                "comment length does not match comment",
                ErrorContext::new(
                    "CommentLength",
                    self.comment_length,
                    self.comment.len().to_string(),
                ),
            ));
        }
        Ok(())
    }
}

impl Encode for Signature {
    fn encoded_len(&self) -> usize {
        SIGNATURE_HEADER_SIZE + self.comment.len() + self.data.len()
    }

    fn encode_to<W: Write>(&self, w: &mut FieldWriter<W>) -> Result<()> {
        let comment_length = len_u16("CommentLength", self.comment.len())?;
        let signature_size = len_u32("SignatureSize", self.data.len())?;

        w.u32("SignatureType", self.signature_type)?;
        w.u32("SignatureSize", signature_size)?;
        w.u32("SignatureFlags", self.signature_flags)?;
        w.u32("SignatureTimestamp", self.signature_timestamp)?;
        w.u16("CommentLength", comment_length)?;
        w.bytes("SignatureComment", self.comment.as_bytes())?;
        w.bytes("SignatureData", &self.data)
    }
}

impl Decode for Signature {
    fn decode_from<R: Read>(r: &mut FieldReader<R>) -> Result<Self> {
        let signature_type = r.u32("SignatureType")?;
        let signature_size = r.u32("SignatureSize")?;
        let signature_flags = r.u32("SignatureFlags")?;
        let signature_timestamp = r.u32("SignatureTimestamp")?;
        let comment_length = r.u16("CommentLength")?;
        let comment = r.string("SignatureComment", comment_length as usize)?;
        let data = r.bytes("SignatureData", signature_size as usize)?;

        Ok(Self {
            signature_type,
            signature_size,
            signature_flags,
            signature_timestamp,
            comment_length,
            comment,
            data,
        })
    }
}
