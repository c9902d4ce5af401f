use std::io::{Read, Write};

use super::{len_u32, Decode, Encode, FieldReader, FieldWriter, Validate};
use crate::error::{Error, ErrorContext, Result};

/// package comment: `length:u32 | utf-8 text + nul | reserved:3`
///
/// the length counts the trailing nul.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackageComment {
    pub text: String,
}

impl PackageComment {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Validate for PackageComment {
    fn validate(&self) -> Result<()> {
        if self.text.contains('\0') {
            return Err(Error::validation(
                "comment contains a nul byte",
                ErrorContext::new("Comment", self.text.escape_default(), "no embedded nul"),
            ));
        }
        len_u32("CommentLength", self.text.len() + 1)?;
        Ok(())
    }
}

impl Encode for PackageComment {
    fn encoded_len(&self) -> usize {
        4 + self.text.len() + 1 + 3
    }

    fn encode_to<W: Write>(&self, w: &mut FieldWriter<W>) -> Result<()> {
        self.validate()?;
        w.u32("CommentLength", len_u32("CommentLength", self.text.len() + 1)?)?;
        w.bytes("Comment", self.text.as_bytes())?;
        w.u8("Comment", 0)?;
        w.bytes("Reserved", &[0; 3])
    }
}

impl Decode for PackageComment {
    fn decode_from<R: Read>(r: &mut FieldReader<R>) -> Result<Self> {
        let len = r.u32("CommentLength")?;
        let mut bytes = r.bytes("Comment", len as usize)?;
        match bytes.pop() {
            Some(0) => {}
            _ => {
                return Err(Error::corruption(
                    "comment is not nul terminated",
                    ErrorContext::new("Comment", format!("{} bytes", len), "nul terminated text"),
                ))
            }
        }
        let text = String::from_utf8(bytes).map_err(|e| {
            Error::corruption(
                "comment is not valid utf-8",
                ErrorContext::new("Comment", e.utf8_error(), "valid utf-8"),
            )
        })?;
        r.skip("Reserved", 3)?;
        let comment = Self { text };
        comment.validate().map_err(super::into_corruption)?;
        Ok(comment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_round_trip() {
        let comment = PackageComment::new("build 42 ✓");
        let bytes = comment.encode().unwrap();
        assert_eq!(bytes.len(), comment.encoded_len());
        assert_eq!(bytes[4 + comment.text.len()], 0);
        let (decoded, consumed) = PackageComment::decode(&bytes[..]).unwrap();
        assert_eq!(decoded, comment);
        assert_eq!(consumed, bytes.len() as u64);
    }

    #[test]
    fn test_missing_terminator() {
        let bytes = [2, 0, 0, 0, b'h', b'i', 0, 0, 0];
        let err = PackageComment::decode(&bytes[..]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corruption);
    }

    #[test]
    fn test_embedded_nul_rejected() {
        let err = PackageComment::new("a\0b").encode().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
