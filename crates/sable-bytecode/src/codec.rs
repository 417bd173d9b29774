//! Low-level binary cursor and section writer.
//!
//! SB containers are little-endian except for the code stream, which is
//! big-endian. Both byte orders are exposed explicitly so call sites read
//! like the format description.

use crate::error::{BytecodeError, Result};

/// Bounds-checked cursor over container bytes.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(BytecodeError::UnexpectedEnd(self.pos))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_i16_le(&mut self) -> Result<i16> {
        Ok(self.read_u16_le()? as i16)
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        Ok(self.read_u32_le()? as i32)
    }

    pub fn read_f32_le(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32_le()?))
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_i16_be(&mut self) -> Result<i16> {
        Ok(self.read_u16_be()? as i16)
    }

    pub fn read_i32_be(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a zero-terminated byte string starting at the current position.
    pub fn read_cstr(&mut self, table: &'static str) -> Result<String> {
        let start = self.pos;
        if start >= self.data.len() {
            return Err(BytecodeError::UnexpectedEnd(start));
        }
        let nul = self.data[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(BytecodeError::UnexpectedEnd(start))?;
        let bytes = &self.data[start..start + nul];
        self.pos = start + nul + 1;
        String::from_utf8(bytes.to_vec()).map_err(|_| BytecodeError::InvalidString(table))
    }
}

/// Growable output buffer with backpatching and alignment support.
///
/// Sections are written sequentially; their absolute offsets and sizes are
/// patched into earlier header fields once known.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn write_u16_le(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i16_le(&mut self, v: i16) {
        self.write_u16_le(v as u16);
    }

    pub fn write_u32_le(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32_le(&mut self, v: i32) {
        self.write_u32_le(v as u32);
    }

    pub fn write_f32_le(&mut self, v: f32) {
        self.write_u32_le(v.to_bits());
    }

    pub fn write_u16_be(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i16_be(&mut self, v: i16) {
        self.write_u16_be(v as u16);
    }

    pub fn write_i32_be(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Writes the string bytes followed by the zero terminator.
    pub fn write_cstr(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    /// Pads with zeroes until the position is a multiple of `align`.
    pub fn align(&mut self, align: usize) {
        while self.buf.len() % align != 0 {
            self.buf.push(0);
        }
    }

    /// Overwrites a previously written u32 at `pos` (little-endian).
    pub fn patch_u32_le(&mut self, pos: usize, v: u32) {
        self.buf[pos..pos + 4].copy_from_slice(&v.to_le_bytes());
    }

    /// Overwrites a previously written u16 at `pos` (little-endian).
    pub fn patch_u16_le(&mut self, pos: usize, v: u16) {
        self.buf[pos..pos + 2].copy_from_slice(&v.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_mixed_endianness() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let mut r = Reader::new(&data);
        assert_eq!(r.read_u16_le().unwrap(), 0x0201);
        assert_eq!(r.read_u16_be().unwrap(), 0x0304);
        assert!(matches!(
            r.read_u8(),
            Err(BytecodeError::UnexpectedEnd(4))
        ));
    }

    #[test]
    fn test_reader_cstr() {
        let data = b"abc\0def\0";
        let mut r = Reader::new(data);
        assert_eq!(r.read_cstr("strings").unwrap(), "abc");
        assert_eq!(r.read_cstr("strings").unwrap(), "def");
        assert_eq!(r.position(), 8);
    }

    #[test]
    fn test_writer_align_and_patch() {
        let mut w = Writer::new();
        w.write_u32_le(0); // placeholder
        w.write_u8(0xAA);
        w.align(4);
        assert_eq!(w.position(), 8);
        w.patch_u32_le(0, 0xDEADBEEF);
        let bytes = w.into_bytes();
        assert_eq!(&bytes[0..4], &0xDEADBEEFu32.to_le_bytes());
        assert_eq!(&bytes[5..8], &[0, 0, 0]);
    }
}
