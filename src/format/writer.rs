use std::io::Write;

use crate::error::{IoResultExt, Result};

/// little-endian field writer that counts written bytes
pub struct FieldWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> FieldWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    /// total bytes written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn bytes(&mut self, field: &str, bytes: &[u8]) -> Result<()> {
        self.inner
            .write_all(bytes)
            .with_field(field, "written successfully")?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    pub fn u8(&mut self, field: &str, v: u8) -> Result<()> {
        self.bytes(field, &[v])
    }

    pub fn u16(&mut self, field: &str, v: u16) -> Result<()> {
        self.bytes(field, &v.to_le_bytes())
    }

    pub fn u32(&mut self, field: &str, v: u32) -> Result<()> {
        self.bytes(field, &v.to_le_bytes())
    }

    pub fn i32(&mut self, field: &str, v: i32) -> Result<()> {
        self.bytes(field, &v.to_le_bytes())
    }

    pub fn u64(&mut self, field: &str, v: u64) -> Result<()> {
        self.bytes(field, &v.to_le_bytes())
    }
}
