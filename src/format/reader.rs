use std::io::{ErrorKind as IoErrorKind, Read};

use crate::error::{Error, ErrorContext, Result};

/// chunk size used when reading length-prefixed payloads
///
/// declared lengths come from untrusted bytes, so payloads are grown as data
/// actually arrives instead of being allocated up front.
const READ_CHUNK: usize = 64 * 1024;

/// little-endian field reader that counts consumed bytes
///
/// premature end of stream is reported as corruption, any other read
/// failure as an io error. both carry the field name and byte counts.
pub struct FieldReader<R> {
    inner: R,
    consumed: u64,
}

impl<R: Read> FieldReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, consumed: 0 }
    }

    /// total bytes consumed so far
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// fill `buf` completely; `already` is how many bytes of the field were
    /// obtained by earlier calls (for error reporting)
    fn fill(&mut self, field: &str, buf: &mut [u8], already: usize, total: usize) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => return Err(truncated(field, already + filled, total)),
                Ok(n) => {
                    filled += n;
                    self.consumed += n as u64;
                }
                Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
                Err(e) if e.kind() == IoErrorKind::UnexpectedEof => {
                    return Err(truncated(field, already + filled, total))
                }
                Err(source) => {
                    return Err(Error::Stream {
                        context: ErrorContext::new(
                            field,
                            format!("{} bytes", already + filled),
                            format!("{} bytes", total),
                        ),
                        source,
                    })
                }
            }
        }
        Ok(())
    }

    fn array<const N: usize>(&mut self, field: &str) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.fill(field, &mut buf, 0, N)?;
        Ok(buf)
    }

    pub fn u8(&mut self, field: &str) -> Result<u8> {
        Ok(self.array::<1>(field)?[0])
    }

    pub fn u16(&mut self, field: &str) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array(field)?))
    }

    pub fn u32(&mut self, field: &str) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array(field)?))
    }

    pub fn i32(&mut self, field: &str) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array(field)?))
    }

    pub fn u64(&mut self, field: &str) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array(field)?))
    }

    /// read exactly `len` bytes
    pub fn bytes(&mut self, field: &str, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len.min(READ_CHUNK));
        while out.len() < len {
            let start = out.len();
            let step = (len - start).min(READ_CHUNK);
            out.resize(start + step, 0);
            self.fill(field, &mut out[start..], start, len)?;
        }
        Ok(out)
    }

    /// read exactly `len` bytes as utf-8
    pub fn string(&mut self, field: &str, len: usize) -> Result<String> {
        let bytes = self.bytes(field, len)?;
        String::from_utf8(bytes).map_err(|e| {
            Error::corruption(
                format!("{} is not valid utf-8", field),
                ErrorContext::new(field, e.utf8_error(), "valid utf-8"),
            )
        })
    }

    /// discard `len` bytes
    pub fn skip(&mut self, field: &str, len: u64) -> Result<()> {
        let mut remaining = len;
        let mut buf = [0u8; 4096];
        while remaining > 0 {
            let step = remaining.min(buf.len() as u64) as usize;
            let already = (len - remaining) as usize;
            self.fill(field, &mut buf[..step], already, len as usize)?;
            remaining -= step as u64;
        }
        Ok(())
    }
}

fn truncated(field: &str, obtained: usize, expected: usize) -> Error {
    Error::corruption(
        format!("unexpected end of data reading {}", field),
        ErrorContext::new(
            field,
            format!("{} bytes", obtained),
            format!("{} bytes", expected),
        ),
    )
}
