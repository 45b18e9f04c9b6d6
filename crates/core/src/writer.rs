//! Bounded big-endian writer over a fixed byte slice.
//!
//! Header construction for RTP sub-headers, FLV tags and AVC configuration
//! records goes through [`ByteWriter`], which tracks a cursor against the
//! slice length and fails with [`Error::BufferOverflow`] instead of writing
//! past the end.

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct ByteWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> ByteWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes written so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn reserve(&mut self, needed: usize) -> Result<&mut [u8]> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(Error::BufferOverflow { needed, remaining });
        }
        let start = self.pos;
        self.pos += needed;
        Ok(&mut self.buf[start..start + needed])
    }

    pub fn put_u8(&mut self, value: u8) -> Result<()> {
        self.reserve(1)?[0] = value;
        Ok(())
    }

    pub fn put_u16(&mut self, value: u16) -> Result<()> {
        self.reserve(2)?.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// Writes the low 24 bits of `value`.
    pub fn put_u24(&mut self, value: u32) -> Result<()> {
        self.reserve(3)?.copy_from_slice(&value.to_be_bytes()[1..]);
        Ok(())
    }

    pub fn put_u32(&mut self, value: u32) -> Result<()> {
        self.reserve(4)?.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn put_slice(&mut self, data: &[u8]) -> Result<()> {
        self.reserve(data.len())?.copy_from_slice(data);
        Ok(())
    }

    /// The written prefix of the underlying slice.
    pub fn written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }
}
