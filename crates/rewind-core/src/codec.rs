//! Little-endian byte sink and source used by type handlers.
//!
//! Handlers never touch raw buffers directly: they write through a
//! [`ByteWriter`] and read through a [`ByteReader`], which bounds-checks
//! every field and enforces the configured length limit.

use crate::serialize::WalkError;

/// Growable output buffer for one walk.
#[derive(Debug, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
    max_len: usize,
}

impl Default for ByteWriter {
    fn default() -> Self {
        Self::with_limit(u32::MAX as usize)
    }
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            max_len: u32::MAX as usize,
        }
    }

    /// A writer that refuses any length prefix above `max_len`, matching
    /// what a [`ByteReader::with_limit`] with the same bound will accept.
    pub fn with_limit(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_len: max_len.min(u32::MAX as usize),
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i8(&mut self, v: i8) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Floats are written as their IEEE-754 bit pattern, so NaN payloads and
    /// signed zeros survive unchanged.
    pub fn write_f32(&mut self, v: f32) {
        self.write_u32(v.to_bits());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.write_u64(v.to_bits());
    }

    /// Raw bytes with no length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// A `u32` length prefix. Fails if `len` is above the writer's limit.
    pub fn write_len(&mut self, len: usize) -> Result<(), WalkError> {
        if len > self.max_len {
            return Err(WalkError::LengthLimit {
                len,
                max: self.max_len,
            });
        }
        self.write_u32(len as u32);
        Ok(())
    }

    /// Length-prefixed bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), WalkError> {
        self.write_len(bytes.len())?;
        self.write_raw(bytes);
        Ok(())
    }

    /// Length-prefixed UTF-8.
    pub fn write_str(&mut self, s: &str) -> Result<(), WalkError> {
        self.write_bytes(s.as_bytes())
    }
}

/// Bounds-checked cursor over a serialized payload.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    max_len: usize,
}

impl<'a> ByteReader<'a> {
    /// A reader with no length limit beyond the 32-bit prefix.
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_limit(data, u32::MAX as usize)
    }

    /// A reader that rejects any length prefix above `max_len`.
    pub fn with_limit(data: &'a [u8], max_len: usize) -> Self {
        Self {
            data,
            pos: 0,
            max_len,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WalkError> {
        if n > self.remaining() {
            return Err(WalkError::UnexpectedEof {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], WalkError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, WalkError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, WalkError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(WalkError::InvalidTag {
                what: "bool",
                tag: other,
            }),
        }
    }

    pub fn read_u16(&mut self) -> Result<u16, WalkError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, WalkError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, WalkError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_i8(&mut self) -> Result<i8, WalkError> {
        Ok(i8::from_le_bytes(self.take_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16, WalkError> {
        Ok(i16::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, WalkError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, WalkError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, WalkError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, WalkError> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Raw bytes with no length prefix.
    pub fn read_raw(&mut self, n: usize) -> Result<&'a [u8], WalkError> {
        self.take(n)
    }

    /// A `u32` length prefix, checked against the reader's limit.
    pub fn read_len(&mut self) -> Result<usize, WalkError> {
        let len = self.read_u32()? as usize;
        if len > self.max_len {
            return Err(WalkError::LengthLimit {
                len,
                max: self.max_len,
            });
        }
        Ok(len)
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8], WalkError> {
        let len = self.read_len()?;
        self.take(len)
    }

    pub fn read_str(&mut self) -> Result<&'a str, WalkError> {
        std::str::from_utf8(self.read_bytes()?).map_err(|_| WalkError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_little_endian() {
        let mut out = ByteWriter::new();
        out.write_u32(0x0403_0201);
        out.write_i16(-2);
        assert_eq!(out.as_bytes(), &[0x01, 0x02, 0x03, 0x04, 0xFE, 0xFF]);
    }

    #[test]
    fn float_bits_preserved() {
        let mut out = ByteWriter::new();
        out.write_f64(-0.0);
        out.write_f32(f32::NAN);
        let bytes = out.into_bytes();
        let mut input = ByteReader::new(&bytes);
        let z = input.read_f64().unwrap();
        assert!(z == 0.0 && z.is_sign_negative());
        assert!(input.read_f32().unwrap().is_nan());
        assert!(input.is_empty());
    }

    #[test]
    fn read_past_end_reports_counts() {
        let mut input = ByteReader::new(&[1, 2]);
        match input.read_u32() {
            Err(WalkError::UnexpectedEof { needed, remaining }) => {
                assert_eq!(needed, 4);
                assert_eq!(remaining, 2);
            }
            other => panic!("expected UnexpectedEof, got: {other:?}"),
        }
        // A failed read does not advance the cursor.
        assert_eq!(input.position(), 0);
    }

    #[test]
    fn invalid_bool_rejected() {
        let mut input = ByteReader::new(&[2]);
        assert!(matches!(
            input.read_bool(),
            Err(WalkError::InvalidTag { what: "bool", tag: 2 })
        ));
    }

    #[test]
    fn length_limit_enforced() {
        let mut out = ByteWriter::new();
        out.write_str("hello").unwrap();
        let bytes = out.into_bytes();

        let mut limited = ByteReader::with_limit(&bytes, 4);
        assert!(matches!(
            limited.read_str(),
            Err(WalkError::LengthLimit { len: 5, max: 4 })
        ));

        let mut unlimited = ByteReader::new(&bytes);
        assert_eq!(unlimited.read_str().unwrap(), "hello");
    }

    #[test]
    fn writer_limit_matches_reader_limit() {
        let mut limited = ByteWriter::with_limit(4);
        limited.write_str("four").unwrap();
        assert!(matches!(
            limited.write_str("hello"),
            Err(WalkError::LengthLimit { len: 5, max: 4 })
        ));
        // The refused prefix is not written.
        assert_eq!(limited.len(), 8);
    }

    #[test]
    fn invalid_utf8_rejected() {
        let mut out = ByteWriter::new();
        out.write_bytes(&[0xFF, 0xFE]).unwrap();
        let bytes = out.into_bytes();
        let mut input = ByteReader::new(&bytes);
        assert!(matches!(input.read_str(), Err(WalkError::InvalidUtf8)));
    }
}
