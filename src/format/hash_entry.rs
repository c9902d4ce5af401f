use std::io::{Read, Write};

use sha2::{Digest, Sha256};

use super::{len_u16, Decode, Encode, FieldReader, FieldWriter, Validate};
use crate::error::{Error, ErrorContext, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HashType {
    Sha256,
    Sha512,
    Blake3,
    Xxh3,
    Other(u8),
}

impl HashType {
    pub fn code(self) -> u8 {
        match self {
            HashType::Sha256 => 0x00,
            HashType::Sha512 => 0x01,
            HashType::Blake3 => 0x02,
            HashType::Xxh3 => 0x03,
            HashType::Other(n) => n,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => HashType::Sha256,
            0x01 => HashType::Sha512,
            0x02 => HashType::Blake3,
            0x03 => HashType::Xxh3,
            n => HashType::Other(n),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HashPurpose {
    ContentVerification,
    Deduplication,
    IntegrityCheck,
    Other(u8),
}

impl HashPurpose {
    pub fn code(self) -> u8 {
        match self {
            HashPurpose::ContentVerification => 0x00,
            HashPurpose::Deduplication => 0x01,
            HashPurpose::IntegrityCheck => 0x02,
            HashPurpose::Other(n) => n,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => HashPurpose::ContentVerification,
            0x01 => HashPurpose::Deduplication,
            0x02 => HashPurpose::IntegrityCheck,
            n => HashPurpose::Other(n),
        }
    }
}

/// a typed digest attached to a file entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashEntry {
    pub hash_type: HashType,
    pub hash_purpose: HashPurpose,
    pub data: Vec<u8>,
}

impl HashEntry {
    /// sha-256 of `content` for content verification
    pub fn sha256(content: &[u8]) -> Self {
        Self {
            hash_type: HashType::Sha256,
            hash_purpose: HashPurpose::ContentVerification,
            data: Sha256::digest(content).to_vec(),
        }
    }

    pub fn hex(&self) -> String {
        hex::encode(&self.data)
    }
}

impl Validate for HashEntry {
    fn validate(&self) -> Result<()> {
        if self.data.is_empty() {
            return Err(Error::validation(
                "hash data is empty",
                ErrorContext::new("HashData", "0 bytes", "non-empty digest"),
            ));
        }
        len_u16("HashLength", self.data.len())?;
        Ok(())
    }
}

impl Encode for HashEntry {
    fn encoded_len(&self) -> usize {
        4 + self.data.len()
    }

    fn encode_to<W: Write>(&self, w: &mut FieldWriter<W>) -> Result<()> {
        let len = len_u16("HashLength", self.data.len())?;
        w.u8("HashType", self.hash_type.code())?;
        w.u8("HashPurpose", self.hash_purpose.code())?;
        w.u16("HashLength", len)?;
        w.bytes("HashData", &self.data)
    }
}

impl Decode for HashEntry {
    fn decode_from<R: Read>(r: &mut FieldReader<R>) -> Result<Self> {
        let hash_type = HashType::from_code(r.u8("HashType")?);
        let hash_purpose = HashPurpose::from_code(r.u8("HashPurpose")?);
        let len = r.u16("HashLength")?;
        let data = r.bytes("HashData", len as usize)?;
        Ok(Self {
            hash_type,
            hash_purpose,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_round_trip() {
        let entry = HashEntry::sha256(b"hello");
        assert_eq!(
            entry.hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        let bytes = entry.encode().unwrap();
        let (decoded, consumed) = HashEntry::decode(&bytes[..]).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(consumed, 36);
    }

    #[test]
    fn test_unknown_codes_preserved() {
        let bytes = [0x7f, 0x09, 0x01, 0x00, 0xee];
        let (decoded, _) = HashEntry::decode(&bytes[..]).unwrap();
        assert_eq!(decoded.hash_type, HashType::Other(0x7f));
        assert_eq!(decoded.hash_purpose, HashPurpose::Other(0x09));
        assert_eq!(decoded.encode().unwrap(), bytes);
    }

    #[test]
    fn test_empty_digest_invalid() {
        let entry = HashEntry {
            hash_type: HashType::Sha256,
            hash_purpose: HashPurpose::IntegrityCheck,
            data: vec![],
        };
        assert!(entry.validate().is_err());
    }
}
