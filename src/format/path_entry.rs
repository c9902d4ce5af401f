use std::io::{Read, Write};

use super::{len_u16, Decode, Encode, FieldReader, FieldWriter, Validate};
use crate::error::{Error, ErrorContext, Result};
use crate::path;

/// a length-prefixed package path
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathEntry {
    pub path: String,
}

impl PathEntry {
    /// build from an unnormalized path
    pub fn new(raw: &str) -> Result<Self> {
        Ok(Self {
            path: path::normalize(raw)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn is_dir(&self) -> bool {
        path::is_dir(&self.path)
    }
}

impl Validate for PathEntry {
    fn validate(&self) -> Result<()> {
        len_u16("PathLength", self.path.len())?;
        let normalized = path::normalize(&self.path)?;
        if normalized != self.path {
            return Err(Error::validation(
                "path is not normalized",
                ErrorContext::new("Path", &self.path, normalized),
            ));
        }
        Ok(())
    }
}

impl Encode for PathEntry {
    fn encoded_len(&self) -> usize {
        2 + self.path.len()
    }

    fn encode_to<W: Write>(&self, w: &mut FieldWriter<W>) -> Result<()> {
        let len = len_u16("PathLength", self.path.len())?;
        w.u16("PathLength", len)?;
        w.bytes("Path", self.path.as_bytes())
    }
}

impl Decode for PathEntry {
    fn decode_from<R: Read>(r: &mut FieldReader<R>) -> Result<Self> {
        let len = r.u16("PathLength")?;
        let path = r.string("Path", len as usize)?;
        Ok(Self { path })
    }
}
